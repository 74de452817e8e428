//! Basic usage example for redis-link

use redis_link::{Command, ConnectOptions, Connection};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt::init();

    let opts = ConnectOptions::from_url(
        &std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
    )?
    .with_sync_connect(true);

    let conn = Connection::start(opts).await?;
    println!("Connected");

    // Watch lifecycle events in the background
    let mut events = conn.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("event: {event:?}");
        }
    });

    // Single commands
    let pong = conn
        .command(Command::new("PING"), Some(Duration::from_secs(1)))
        .await?;
    println!("PING: {pong:?}");

    // A pipelined batch: one write, replies in command order
    let replies = conn
        .pipeline(
            vec![
                Command::new("SET").arg("greeting").arg("hello"),
                Command::new("GET").arg("greeting"),
                Command::new("INCR").arg("visits"),
            ],
            Some(Duration::from_secs(1)),
        )
        .await?;
    println!("pipeline: {replies:?}");

    // CLIENT REPLY accounting: only the ON acknowledgement comes back
    let replies = conn
        .pipeline(
            vec![
                Command::from_args(["CLIENT", "REPLY", "OFF"]),
                Command::from_args(["SET", "silent", "1"]),
                Command::from_args(["CLIENT", "REPLY", "ON"]),
            ],
            Some(Duration::from_secs(1)),
        )
        .await?;
    println!("CLIENT REPLY batch: {replies:?}");

    conn.stop(Some(Duration::from_secs(1))).await?;
    Ok(())
}
