//! Connection controller: the per-connection state machine
//!
//! The controller is a single task draining its mailbox, so every state
//! transition is serialized. It owns the pending request table's write
//! side, applies reconnect backoff, and directs the socket owner. Pipeline
//! requests that arrive while a connection attempt is in progress are
//! postponed and re-delivered once the attempt resolves.

use super::socket::{self, Transport};
use super::table::{self, SharedTable};
use super::reply_mode::{self, ReplyMode};
use crate::backoff::ReconnectPolicy;
use crate::command::Command;
use crate::events::ConnectionEvent;
use bytes::BytesMut;
use redis_link_core::{
    config::ConnectOptions,
    error::{Error, Result},
    value::RespValue,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// A pipelined batch waiting to be sent
pub(crate) struct PipelineRequest {
    pub(crate) commands: Vec<Command>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) reply: oneshot::Sender<Result<Vec<RespValue>>>,
}

/// Events delivered to the controller mailbox
pub(crate) enum ControllerMessage {
    /// A caller submitted a batch
    Pipeline(PipelineRequest),
    /// The socket owner finished the handshake
    SocketConnected {
        epoch: u64,
        writer: WriteHalf<Transport>,
        address: String,
    },
    /// The socket owner exited abnormally
    SocketStopped { epoch: u64, reason: Error },
    /// The backoff delay elapsed
    ReconnectTick { generation: u64 },
    /// A per-request timer fired
    ClientTimeout { counter: u64 },
    /// Orderly shutdown request
    Stop { ack: oneshot::Sender<()> },
}

enum State {
    Connecting,
    Connected {
        writer: WriteHalf<Transport>,
        address: String,
    },
    Disconnected,
}

enum Flow {
    Continue,
    Exit,
}

pub(crate) struct Controller {
    opts: ConnectOptions,
    state: State,
    rx: mpsc::UnboundedReceiver<ControllerMessage>,
    // Weak so that dropping the last handle ends the mailbox loop instead
    // of the controller keeping its own channel alive.
    mailbox: mpsc::WeakUnboundedSender<ControllerMessage>,
    table: SharedTable,
    counter: u64,
    client_reply: ReplyMode,
    backoff: ReconnectPolicy,
    epoch: u64,
    reconnect_generation: u64,
    owner_stop: Option<watch::Sender<bool>>,
    postponed: VecDeque<PipelineRequest>,
    events: broadcast::Sender<ConnectionEvent>,
    init_waiter: Option<oneshot::Sender<Result<()>>>,
}

impl Controller {
    pub(crate) fn new(
        opts: ConnectOptions,
        rx: mpsc::UnboundedReceiver<ControllerMessage>,
        mailbox: mpsc::WeakUnboundedSender<ControllerMessage>,
        events: broadcast::Sender<ConnectionEvent>,
        init_waiter: Option<oneshot::Sender<Result<()>>>,
    ) -> Self {
        let backoff = ReconnectPolicy::new(opts.backoff_initial, opts.backoff_max);
        Self {
            opts,
            state: State::Connecting,
            rx,
            mailbox,
            table: table::shared(),
            counter: 0,
            client_reply: ReplyMode::default(),
            backoff,
            epoch: 0,
            reconnect_generation: 0,
            owner_stop: None,
            postponed: VecDeque::new(),
            events,
            init_waiter,
        }
    }

    pub(crate) async fn run(mut self) {
        self.spawn_socket_owner();
        while let Some(message) = self.rx.recv().await {
            if let Flow::Exit = self.handle(message).await {
                return;
            }
        }
        // Every handle is gone; nobody can observe us anymore.
        self.shutdown().await;
    }

    async fn handle(&mut self, message: ControllerMessage) -> Flow {
        match message {
            ControllerMessage::Pipeline(request) => match self.state {
                State::Connecting => {
                    self.postponed.push_back(request);
                    Flow::Continue
                }
                State::Connected { .. } => self.handle_pipeline(request).await,
                State::Disconnected => {
                    let _ = request.reply.send(Err(Error::Closed));
                    Flow::Continue
                }
            },

            ControllerMessage::SocketConnected {
                epoch,
                writer,
                address,
            } => {
                if epoch != self.epoch {
                    return Flow::Continue;
                }
                info!(%address, "connected");
                if self.backoff.backing_off() {
                    self.emit(ConnectionEvent::Reconnected {
                        address: address.clone(),
                    });
                }
                self.backoff.reset();
                self.state = State::Connected { writer, address };
                if let Some(waiter) = self.init_waiter.take() {
                    let _ = waiter.send(Ok(()));
                }
                self.flush_postponed().await
            }

            ControllerMessage::SocketStopped { epoch, reason } => {
                if epoch != self.epoch {
                    return Flow::Continue;
                }
                match std::mem::replace(&mut self.state, State::Disconnected) {
                    State::Connecting => {
                        warn!(error = %reason, "connection attempt failed");
                        self.emit(ConnectionEvent::FailedConnection {
                            address: self.display_address(),
                            reason: reason.to_string(),
                        });
                    }
                    State::Connected { address, .. } => {
                        warn!(%address, error = %reason, "connection lost");
                        self.emit(ConnectionEvent::Disconnection {
                            address,
                            reason: reason.to_string(),
                        });
                    }
                    State::Disconnected => {
                        self.emit(ConnectionEvent::Disconnection {
                            address: self.display_address(),
                            reason: reason.to_string(),
                        });
                    }
                }
                self.disconnect(reason).await
            }

            ControllerMessage::ReconnectTick { generation } => {
                if generation == self.reconnect_generation
                    && matches!(self.state, State::Disconnected)
                {
                    self.spawn_socket_owner();
                    self.state = State::Connecting;
                }
                Flow::Continue
            }

            ControllerMessage::ClientTimeout { counter } => {
                // Stale firings find no row and fall through.
                if let Some(sender) = self.table.lock().await.set_timed_out(counter) {
                    debug!(counter, "request timed out");
                    let _ = sender.send(Err(Error::Timeout));
                }
                Flow::Continue
            }

            ControllerMessage::Stop { ack } => {
                self.shutdown().await;
                let _ = ack.send(());
                Flow::Exit
            }
        }
    }

    /// Handle a pipeline request in the connected state.
    async fn handle_pipeline(&mut self, request: PipelineRequest) -> Flow {
        if !matches!(self.state, State::Connected { .. }) {
            let _ = request.reply.send(Err(Error::Closed));
            return Flow::Continue;
        }

        let (mode, ncommands) = reply_mode::account(self.client_reply, &request.commands);
        self.client_reply = mode;
        if ncommands == 0 {
            // The server will stay silent for this whole batch.
            let _ = request.reply.send(Ok(Vec::new()));
            return Flow::Continue;
        }

        let counter = self.counter;
        self.counter += 1;

        let mut wire = BytesMut::new();
        for command in &request.commands {
            command.encode(&mut wire);
        }

        self.table
            .lock()
            .await
            .insert(counter, request.reply, ncommands);

        let send_result = match self.state {
            State::Connected { ref mut writer, .. } => match writer.write_all(&wire).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            },
            _ => return Flow::Continue,
        };

        match send_result {
            Ok(()) => {
                if let Some(timeout) = request.timeout {
                    let mailbox = self.mailbox.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        if let Some(mailbox) = mailbox.upgrade() {
                            let _ = mailbox.send(ControllerMessage::ClientTimeout { counter });
                        }
                    });
                }
                Flow::Continue
            }
            Err(e) => {
                let address = match std::mem::replace(&mut self.state, State::Disconnected) {
                    State::Connected { address, .. } => address,
                    _ => self.display_address(),
                };
                warn!(%address, error = %e, "send failed");
                self.emit(ConnectionEvent::Disconnection {
                    address,
                    reason: e.to_string(),
                });
                // The freshly inserted row is failed by the drain below.
                self.disconnect(e.into()).await
            }
        }
    }

    /// Common disconnect path: fail in-flight requests, then either stop
    /// for good or schedule a reconnect attempt after backoff.
    async fn disconnect(&mut self, reason: Error) -> Flow {
        self.signal_owner_stop();
        self.state = State::Disconnected;

        if let Some(waiter) = self.init_waiter.take() {
            // sync_connect: the first attempt failed, so start() fails.
            self.fail_pending().await;
            self.fail_postponed();
            let _ = waiter.send(Err(reason));
            return Flow::Exit;
        }

        if reason.is_server_reply() || self.opts.exit_on_disconnection {
            warn!(error = %reason, "stopping connection");
            self.shutdown().await;
            return Flow::Exit;
        }

        self.fail_pending().await;
        self.fail_postponed();

        let delay = self.backoff.next_delay();
        self.reconnect_generation += 1;
        let generation = self.reconnect_generation;
        let mailbox = self.mailbox.clone();
        debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(ControllerMessage::ReconnectTick { generation });
            }
        });
        Flow::Continue
    }

    /// Re-deliver requests postponed while connecting.
    async fn flush_postponed(&mut self) -> Flow {
        while let Some(request) = self.postponed.pop_front() {
            if let Flow::Exit = self.handle_pipeline(request).await {
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    /// Fail every in-flight request that has not already been answered by
    /// the timeout path, exactly once each.
    async fn fail_pending(&mut self) {
        for sender in self.table.lock().await.drain() {
            let _ = sender.send(Err(Error::Disconnected));
        }
    }

    fn fail_postponed(&mut self) {
        for request in self.postponed.drain(..) {
            let _ = request.reply.send(Err(Error::Closed));
        }
    }

    async fn shutdown(&mut self) {
        self.signal_owner_stop();
        self.state = State::Disconnected;
        self.fail_pending().await;
        self.fail_postponed();
        if let Some(waiter) = self.init_waiter.take() {
            let _ = waiter.send(Err(Error::Closed));
        }
        debug!("connection controller stopped");
    }

    fn spawn_socket_owner(&mut self) {
        self.epoch += 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        self.owner_stop = Some(stop_tx);
        debug!(epoch = self.epoch, "spawning socket owner");
        tokio::spawn(socket::run(
            self.epoch,
            self.opts.clone(),
            self.table.clone(),
            self.mailbox.clone(),
            stop_rx,
        ));
    }

    fn signal_owner_stop(&mut self) {
        if let Some(stop) = self.owner_stop.take() {
            let _ = stop.send(true);
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine; telemetry is best-effort.
        let _ = self.events.send(event);
    }

    fn display_address(&self) -> String {
        format!("{}:{}", self.opts.host, self.opts.port)
    }
}
