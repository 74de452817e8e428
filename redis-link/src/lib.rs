//! Resilient single-connection Redis client
//!
//! `redis-link` manages one TCP or TLS connection to a Redis server and
//! exposes pipelined command execution over it. The connection survives
//! network failures: it reconnects with exponential backoff and fails
//! in-flight requests deterministically. Strict FIFO alignment between
//! sent commands and decoded replies is maintained, including the
//! bookkeeping required by `CLIENT REPLY ON|OFF|SKIP`.
//!
//! # Quick start
//!
//! ```no_run
//! use redis_link::{Command, Connection, ConnectOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opts = ConnectOptions::new("localhost", 6379).with_sync_connect(true);
//!     let conn = Connection::start(opts).await?;
//!
//!     let pong = conn.command(Command::new("PING"), None).await?;
//!     println!("{pong:?}");
//!
//!     conn.stop(None).await?;
//!     Ok(())
//! }
//! ```

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

mod backoff;
pub mod command;
pub mod connection;
pub mod events;
pub mod protocol;

pub use command::Command;
pub use connection::Connection;
pub use events::ConnectionEvent;
pub use redis_link_core::{
    config::{ConnectOptions, SentinelOptions},
    error::{Error, Result},
    value::RespValue,
};
