//! Socket owner: transport setup, handshake and the reply read loop
//!
//! One socket owner task is spawned per connection attempt. It reports back
//! to the controller with `SocketConnected` or `SocketStopped`, tagged with
//! the epoch it was spawned under so messages from a superseded owner are
//! ignored. A stop signal from the controller ends the task silently.

use super::controller::ControllerMessage;
use super::table::SharedTable;
use crate::protocol;
use bytes::BytesMut;
use redis_link_core::{
    config::{ConnectOptions, SentinelOptions},
    error::{Error, Result},
    value::RespValue,
};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt, ReadBuf, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_native_tls::TlsStream;
use tracing::{debug, warn};

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// The underlying byte stream, plain or TLS
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, data),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Entry point of the socket owner task.
pub(crate) async fn run(
    epoch: u64,
    opts: ConnectOptions,
    table: SharedTable,
    controller: mpsc::WeakUnboundedSender<ControllerMessage>,
    mut stop: watch::Receiver<bool>,
) {
    let established = tokio::select! {
        result = timeout(opts.connect_timeout, establish(&opts)) => match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::Connection(format!(
                "timed out connecting to {}:{}",
                opts.host, opts.port
            ))),
        },
        _ = stop.changed() => return,
    };

    let (transport, address) = match established {
        Ok(pair) => pair,
        Err(reason) => {
            notify(&controller, ControllerMessage::SocketStopped { epoch, reason });
            return;
        }
    };

    debug!(%address, epoch, "connection established");
    let (reader, writer) = tokio::io::split(transport);
    notify(
        &controller,
        ControllerMessage::SocketConnected {
            epoch,
            writer,
            address,
        },
    );

    read_loop(epoch, reader, table, controller, stop).await;
}

fn notify(
    controller: &mpsc::WeakUnboundedSender<ControllerMessage>,
    message: ControllerMessage,
) {
    if let Some(controller) = controller.upgrade() {
        let _ = controller.send(message);
    }
}

/// Open the transport and run the handshake. The caller wraps this in the
/// connect timeout.
async fn establish(opts: &ConnectOptions) -> Result<(Transport, String)> {
    let (host, port) = match opts.sentinel {
        Some(ref sentinel) => resolve_master(sentinel).await?,
        None => (opts.host.clone(), opts.port),
    };
    let address = format!("{host}:{port}");

    let stream = TcpStream::connect(&address)
        .await
        .map_err(|e| Error::Connection(format!("failed to connect to {address}: {e}")))?;
    stream.set_nodelay(true)?;
    let stream = apply_keepalive(stream, opts)?;

    let mut transport = if opts.tls {
        let connector = native_tls::TlsConnector::new().map_err(|e| Error::Tls(e.to_string()))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = connector
            .connect(&host, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        Transport::Tls(Box::new(tls))
    } else {
        Transport::Plain(stream)
    };

    handshake(&mut transport, opts).await?;
    Ok((transport, address))
}

fn apply_keepalive(stream: TcpStream, opts: &ConnectOptions) -> Result<TcpStream> {
    let Some(idle) = opts.tcp_keepalive else {
        return Ok(stream);
    };
    let socket = socket2::Socket::from(stream.into_std()?);
    let keepalive = socket2::TcpKeepalive::new().with_time(idle);
    socket
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Connection(format!("failed to set TCP keepalive: {e}")))?;
    Ok(TcpStream::from_std(socket.into())?)
}

/// AUTH and SELECT, as demanded by the options. A `-ERR` reply here is a
/// server verdict and surfaces as a non-retriable error.
async fn handshake(transport: &mut Transport, opts: &ConnectOptions) -> Result<()> {
    if let Some(ref password) = opts.password {
        let mut args = vec![bytes::Bytes::from_static(b"AUTH")];
        if let Some(ref username) = opts.username {
            args.push(bytes::Bytes::copy_from_slice(username.as_bytes()));
        }
        args.push(bytes::Bytes::copy_from_slice(password.as_bytes()));
        match exchange(transport, &args).await? {
            RespValue::Error(msg) => return Err(Error::Auth(msg)),
            _ => debug!("authenticated"),
        }
    }

    if opts.database != 0 {
        let args = [
            bytes::Bytes::from_static(b"SELECT"),
            bytes::Bytes::from(opts.database.to_string().into_bytes()),
        ];
        if let RespValue::Error(msg) = exchange(transport, &args).await? {
            return Err(Error::Server(msg));
        }
        debug!(database = opts.database, "database selected");
    }

    Ok(())
}

/// Write one command and read one reply on a stream that has no other
/// traffic yet. Used for the handshake and for sentinel queries.
async fn exchange<S>(stream: &mut S, args: &[bytes::Bytes]) -> Result<RespValue>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = BytesMut::new();
    protocol::encode_command(args, &mut out);
    stream.write_all(&out).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    loop {
        if let Some(reply) = protocol::decode(&mut buf)? {
            return Ok(reply);
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::Connection(
                "connection closed during handshake".to_string(),
            ));
        }
    }
}

/// Ask the configured sentinels for the master address, first answer wins.
async fn resolve_master(sentinel: &SentinelOptions) -> Result<(String, u16)> {
    for (host, port) in &sentinel.endpoints {
        match query_sentinel(host, *port, sentinel).await {
            Ok(found) => return Ok(found),
            Err(e) => warn!(sentinel = %format!("{host}:{port}"), error = %e, "sentinel query failed"),
        }
    }
    Err(Error::Sentinel(format!(
        "no sentinel could resolve master '{}'",
        sentinel.master_name
    )))
}

async fn query_sentinel(
    host: &str,
    port: u16,
    sentinel: &SentinelOptions,
) -> Result<(String, u16)> {
    let mut stream = TcpStream::connect((host, port)).await?;

    if let Some(ref password) = sentinel.password {
        let args = [
            bytes::Bytes::from_static(b"AUTH"),
            bytes::Bytes::copy_from_slice(password.as_bytes()),
        ];
        if let RespValue::Error(msg) = exchange(&mut stream, &args).await? {
            return Err(Error::Auth(msg));
        }
    }

    let args = [
        bytes::Bytes::from_static(b"SENTINEL"),
        bytes::Bytes::from_static(b"get-master-addr-by-name"),
        bytes::Bytes::copy_from_slice(sentinel.master_name.as_bytes()),
    ];
    let reply = exchange(&mut stream, &args).await?;
    let items = match reply {
        RespValue::Array(items) if items.len() == 2 => items,
        RespValue::Null => {
            return Err(Error::Sentinel(format!(
                "sentinel does not know master '{}'",
                sentinel.master_name
            )))
        }
        other => {
            return Err(Error::Sentinel(format!(
                "unexpected sentinel reply: {other:?}"
            )))
        }
    };
    let master_host = items[0].as_string()?;
    let master_port = items[1]
        .as_string()?
        .parse()
        .map_err(|_| Error::Sentinel("sentinel returned a bad port".to_string()))?;
    Ok((master_host, master_port))
}

/// Read bytes, decode replies and resolve pending rows oldest-first until
/// the peer closes, the transport errors, or the controller signals stop.
async fn read_loop(
    epoch: u64,
    mut reader: ReadHalf<Transport>,
    table: SharedTable,
    controller: mpsc::WeakUnboundedSender<ControllerMessage>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
    loop {
        let read = tokio::select! {
            _ = stop.changed() => return,
            read = reader.read_buf(&mut buf) => read,
        };

        let reason = match read {
            Ok(0) => Error::Connection("connection closed by peer".to_string()),
            Ok(_) => match deliver_replies(&mut buf, &table).await {
                Ok(()) => continue,
                Err(e) => e,
            },
            Err(e) => e.into(),
        };

        notify(&controller, ControllerMessage::SocketStopped { epoch, reason });
        return;
    }
}

async fn deliver_replies(buf: &mut BytesMut, table: &SharedTable) -> Result<()> {
    while let Some(reply) = protocol::decode(buf)? {
        let completed = table.lock().await.push_reply(reply)?;
        if let Some(row) = completed {
            match row.sender {
                Some(sender) => {
                    // The caller may have gone away; that is not our problem.
                    let _ = sender.send(Ok(row.replies));
                }
                None => {
                    debug_assert!(row.timed_out);
                    debug!("discarding replies for a timed out request");
                }
            }
        }
    }
    Ok(())
}
