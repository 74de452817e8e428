//! In-process mock Redis server for connection tests
//!
//! Accepts connections on an ephemeral port and feeds every decoded
//! command to an async handler that returns the raw bytes to write back
//! (empty = stay silent, as a real server does under CLIENT REPLY OFF).

#![allow(dead_code)]

use bytes::BytesMut;
use redis_link::protocol;
use redis_link::RespValue;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

pub type Handler =
    Arc<dyn Fn(Vec<String>) -> Pin<Box<dyn Future<Output = Vec<u8>> + Send>> + Send + Sync>;

/// Wrap an async closure as a mock handler.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<u8>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

pub struct MockServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    close: Arc<Notify>,
    accept_loop: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(handler: Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        let accepted = Arc::new(AtomicUsize::new(0));
        let close = Arc::new(Notify::new());

        let accept_loop = {
            let accepted = accepted.clone();
            let close = close.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, handler.clone(), close.clone()));
                }
            })
        };

        Self {
            addr,
            accepted,
            close,
            accept_loop,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Abruptly close every currently open connection.
    pub fn kill_connections(&self) {
        self.close.notify_waiters();
    }

    /// Stop accepting new connections and close the open ones.
    pub fn shut_down(&self) {
        self.accept_loop.abort();
        self.kill_connections();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(mut stream: TcpStream, handler: Handler, close: Arc<Notify>) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let read = tokio::select! {
            _ = close.notified() => return,
            read = stream.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        loop {
            let value = match protocol::decode(&mut buf) {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(_) => return,
            };
            let response = handler(flatten(value)).await;
            if !response.is_empty() && stream.write_all(&response).await.is_err() {
                return;
            }
        }
    }
}

fn flatten(value: RespValue) -> Vec<String> {
    match value {
        RespValue::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_string().ok())
            .collect(),
        other => other.as_string().map(|s| vec![s]).unwrap_or_default(),
    }
}

// RESP reply builders

pub fn simple(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

pub fn error(s: &str) -> Vec<u8> {
    format!("-{s}\r\n").into_bytes()
}

pub fn bulk(s: &str) -> Vec<u8> {
    format!("${}\r\n{s}\r\n", s.len()).into_bytes()
}

pub fn integer(i: i64) -> Vec<u8> {
    format!(":{i}\r\n").into_bytes()
}

pub fn none() -> Vec<u8> {
    Vec::new()
}
