//! A resilient connection to a single Redis server
//!
//! [`Connection`] is a cheap-to-clone handle to a background controller
//! task that owns the actual socket. Callers submit pipelined batches from
//! any number of tasks; replies come back in command order, and strict FIFO
//! correspondence between the sent command stream and the reply stream is
//! maintained across all callers.
//!
//! When the link drops, in-flight requests fail with
//! [`Error::Disconnected`], the controller reconnects with exponential
//! backoff, and requests submitted in the meantime fail fast with
//! [`Error::Closed`].
//!
//! # Examples
//!
//! ```no_run
//! use redis_link::{Command, Connection, ConnectOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let opts = ConnectOptions::new("localhost", 6379).with_sync_connect(true);
//! let conn = Connection::start(opts).await?;
//!
//! let replies = conn
//!     .pipeline(
//!         vec![Command::new("SET").arg("k").arg("v"), Command::new("GET").arg("k")],
//!         None,
//!     )
//!     .await?;
//! println!("{replies:?}");
//! # Ok(())
//! # }
//! ```

mod controller;
mod reply_mode;
mod socket;
mod table;

use crate::command::Command;
use crate::events::ConnectionEvent;
use controller::{Controller, ControllerMessage, PipelineRequest};
use redis_link_core::{
    config::ConnectOptions,
    error::{Error, Result},
    value::RespValue,
};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Handle to a running connection
#[derive(Clone)]
pub struct Connection {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Connection {
    /// Start a connection with the given options.
    ///
    /// With `sync_connect` enabled this waits until the first connection
    /// attempt either succeeds or fails, and fails with the underlying
    /// reason in the latter case. Otherwise the handle is returned
    /// immediately while the connection is established in the background.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid options, or the first connect
    /// failure when `sync_connect` is enabled.
    pub async fn start(opts: ConnectOptions) -> Result<Self> {
        opts.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let (init_tx, init_rx) = if opts.sync_connect {
            let (init_tx, init_rx) = oneshot::channel();
            (Some(init_tx), Some(init_rx))
        } else {
            (None, None)
        };

        let controller = Controller::new(opts, rx, tx.downgrade(), events.clone(), init_tx);
        tokio::spawn(controller.run());

        if let Some(init_rx) = init_rx {
            match init_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(Error::Closed),
            }
        }

        Ok(Self { tx, events })
    }

    /// Submit a batch of commands in one write and wait for their replies,
    /// returned in command order. Error replies from the server are
    /// forwarded verbatim as [`RespValue::Error`] elements.
    ///
    /// `timeout` bounds the wait for this request only; `None` waits
    /// indefinitely. A timed out request never produces a second outcome:
    /// its reply is discarded when it eventually arrives.
    ///
    /// # Errors
    ///
    /// `Error::Closed` if the connection is currently down or stopped,
    /// `Error::Disconnected` if the link drops with this batch in flight,
    /// `Error::Timeout` if `timeout` elapses first.
    pub async fn pipeline(
        &self,
        commands: Vec<Command>,
        timeout: Option<Duration>,
    ) -> Result<Vec<RespValue>> {
        if commands.is_empty() {
            return Err(Error::Config(
                "a pipeline needs at least one command".to_string(),
            ));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControllerMessage::Pipeline(PipelineRequest {
                commands,
                timeout,
                reply: reply_tx,
            }))
            .map_err(|_| Error::Closed)?;

        reply_rx.await.map_err(|_| Error::Closed)?
    }

    /// Run a single command and return its reply.
    ///
    /// Unlike [`pipeline`](Self::pipeline), a server error reply is turned
    /// into `Err(Error::Server)`. A command the server does not answer
    /// (e.g. `CLIENT REPLY OFF`) yields [`RespValue::Null`].
    ///
    /// # Errors
    ///
    /// As for [`pipeline`](Self::pipeline), plus `Error::Server` for error
    /// replies.
    pub async fn command(
        &self,
        command: Command,
        timeout: Option<Duration>,
    ) -> Result<RespValue> {
        let mut replies = self.pipeline(vec![command], timeout).await?;
        match replies.pop() {
            Some(RespValue::Error(msg)) => Err(Error::Server(msg)),
            Some(reply) => Ok(reply),
            None => Ok(RespValue::Null),
        }
    }

    /// Subscribe to connection lifecycle events. A slow subscriber misses
    /// events instead of applying backpressure to the connection.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Request an orderly shutdown and wait for it to complete, bounded by
    /// `timeout` if given. In-flight requests fail with
    /// `Error::Disconnected`. Stopping an already stopped connection is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// `Error::Timeout` if the controller does not acknowledge in time.
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .tx
            .send(ControllerMessage::Stop { ack: ack_tx })
            .is_err()
        {
            return Ok(());
        }

        match timeout {
            Some(timeout) => {
                let _ = tokio::time::timeout(timeout, ack_rx)
                    .await
                    .map_err(|_| Error::Timeout)?;
            }
            None => {
                let _ = ack_rx.await;
            }
        }
        Ok(())
    }
}
