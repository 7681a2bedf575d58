//! Tokio based host for [`ConnectionContext`].
//!
//! Every accepted connection gets its own task. The task owns the stream, the
//! inbound and outbound buffers, the context, and the receiving end of the
//! connection's [`Responder`] channel, and waits on whichever comes first:
//!
//! - the socket becoming readable → [`ConnectionContext::on_readable`]
//! - the liveness deadline → [`ConnectionContext::on_timer`]
//! - a frame queued through the [`Responder`] → [`ConnectionContext::send`]
//! - the shutdown signal
//!
//! Because all four are handled by the same task, the context is never
//! entered concurrently. Writing the outbound buffer is one more branch of the
//! same wait, so a peer that stops reading cannot hold back the liveness
//! deadline. Once more than [`Config::max_outbound_size`] bytes are queued the
//! task stops reading and stops draining the responder queue until the peer
//! catches up.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinSet,
    time::{Instant, interval_at, timeout},
};

use crate::{
    Action, CloseCause, Config, ConnectionContext, ConnectionId, Error, Result,
    assemble::Message,
    close::CloseCode,
    frame::Frame,
};

/// Application callbacks of the host.
///
/// Callbacks run on the connection's task and must not block. Use
/// [`crate::dispatch::DispatchHandler`] to move work elsewhere.
pub trait MessageHandler: Send + Sync + 'static {
    /// A complete message arrived.
    fn on_message(&self, id: ConnectionId, message: Message, responder: &Responder);

    /// The connection ended. Called once per connection.
    fn on_close(&self, id: ConnectionId, cause: CloseCause) {
        let _ = (id, cause);
    }

    /// Periodic diagnostics with the number of live connections.
    fn on_tick(&self, connections: usize) {
        let _ = connections;
    }
}

/// Queues frames for a connection from any thread.
///
/// The queue holds [`Config::responder_capacity`] frames.
#[derive(Clone, Debug)]
pub struct Responder {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
}

impl Responder {
    fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        Self { id, tx }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` once the connection's task has finished.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues a frame without waiting.
    ///
    /// Fails with [`Error::Closed`] once the connection is gone, and with an
    /// [`io::ErrorKind::WouldBlock`] error while the queue is full.
    pub fn send(&self, frame: Frame) -> Result<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "responder queue is full",
            ))),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::Closed),
        }
    }

    pub fn text(&self, text: impl Into<Bytes>) -> Result<()> {
        self.send(Frame::text(text))
    }

    pub fn binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Frame::binary(data))
    }

    /// Sends a Close frame. The connection closes after it is written.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.send(Frame::close(code, reason))
    }
}

/// TCP accept loop with connection accounting.
pub struct Server<H> {
    config: Arc<Config>,
    handler: Arc<H>,
    next_id: AtomicU64,
    connected: Arc<AtomicUsize>,
}

impl<H: MessageHandler> Server<H> {
    pub fn new(config: Config, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            next_id: AtomicU64::new(1),
            connected: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Takes the handler back once no connection task holds it anymore.
    pub fn into_handler(self) -> Option<H> {
        Arc::try_unwrap(self.handler).ok()
    }

    /// Number of live connections.
    pub fn connections(&self) -> usize {
        self.connected.load(Ordering::Relaxed)
    }

    /// Accepts connections until `shutdown` flips to `true` or its sender is
    /// dropped, then waits for every connection task to finish.
    ///
    /// Open connections receive a Close(1001) frame on shutdown.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "listening");

        let period = self.config.tick_interval.max(Duration::from_millis(1));
        let mut tick = interval_at(Instant::now() + period, period);
        let mut tasks = JoinSet::new();

        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            tracing::debug!(%peer, error = %err, "set_nodelay failed");
                        }

                        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                        let config = Arc::clone(&self.config);
                        let handler = Arc::clone(&self.handler);
                        let connected = Arc::clone(&self.connected);
                        let shutdown = shutdown.clone();

                        connected.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(conn = %id, %peer, "connection accepted");

                        tasks.spawn(async move {
                            serve_connection(stream, id, &config, handler, shutdown).await;
                            connected.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
                _ = tick.tick() => {
                    let connections = self.connections();
                    tracing::info!(connections, "tick");
                    self.handler.on_tick(connections);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined {
                        tracing::warn!(error = %err, "connection task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(connections = self.connections(), "shutting down");
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "connection task failed");
            }
        }
        Ok(())
    }
}

/// Drives one connection over any byte stream until it closes.
///
/// Returns why the connection ended. The handler's
/// [`on_close`](MessageHandler::on_close) has been called by then. A change
/// of `shutdown`, or dropping its sender, closes the connection with
/// Close(1001). Whatever is still queued after the close is flushed for at
/// most [`Config::close_timeout`].
pub async fn serve_connection<S, H>(
    io: S,
    id: ConnectionId,
    config: &Config,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) -> CloseCause
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: MessageHandler + ?Sized,
{
    let (mut reader, mut writer) = tokio::io::split(io);
    let mut ctx = ConnectionContext::new(id, config, Instant::now());
    let mut inbound = BytesMut::with_capacity(config.read_buffer_size);
    let mut outbound = BytesMut::new();
    let (tx, mut rx) = mpsc::channel(config.responder_capacity.max(1));
    let responder = Responder::new(id, tx);

    let cause = loop {
        let deadline = ctx.deadline();
        let writing = !outbound.is_empty();
        let accepting = outbound.len() < config.max_outbound_size;

        let result = tokio::select! {
            written = writer.write_buf(&mut outbound), if writing => match written {
                Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(_) => Ok(Action::Continue),
                Err(err) => Err(err.into()),
            },
            read = reader.read_buf(&mut inbound), if accepting => match read {
                Ok(0) => break ctx.on_eof(&inbound),
                Ok(_) => ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |message| {
                    handler.on_message(id, message, &responder);
                }),
                Err(err) => Err(err.into()),
            },
            _ = sleep_until(deadline) => ctx.on_timer(Instant::now(), &mut outbound),
            Some(frame) = rx.recv(), if accepting => {
                ctx.send(&frame, &mut outbound).map(|()| match ctx.cause() {
                    Some(cause) => Action::Close(cause),
                    None => Action::Continue,
                })
            }
            _ = shutdown.changed() => {
                if ctx.is_upgraded() {
                    let _ = ctx.send(&Frame::close(CloseCode::Away, b""), &mut outbound);
                }
                ctx.close();
                Ok(Action::Close(CloseCause::Shutdown))
            }
        };

        match result {
            Ok(Action::Continue) => {}
            Ok(Action::Close(cause)) => break cause,
            Err(Error::Io(err)) => {
                tracing::debug!(conn = %id, error = %err, "connection i/o failed");
                break CloseCause::Io;
            }
            Err(err) => break err.cause(),
        }
    };

    let flush = async {
        writer.write_all_buf(&mut outbound).await?;
        writer.shutdown().await?;
        io::Result::Ok(())
    };
    let flushed = timeout(config.close_timeout, flush).await;
    match flushed {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(conn = %id, error = %err, "final flush failed"),
        Err(_) => tracing::debug!(conn = %id, pending = outbound.len(), "final flush timed out"),
    }

    if cause.is_benign() {
        tracing::debug!(conn = %id, %cause, "connection closed");
    } else {
        tracing::warn!(conn = %id, %cause, "connection closed");
    }
    handler.on_close(id, cause);
    cause
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responder_queue_is_bounded() {
        let (tx, rx) = mpsc::channel(1);
        let responder = Responder::new(ConnectionId(7), tx);

        responder.text("first").unwrap();
        match responder.text("second") {
            Err(Error::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::WouldBlock),
            other => panic!("expected WouldBlock, got {other:?}"),
        }

        drop(rx);
        assert!(responder.is_closed());
        assert!(matches!(responder.text("third"), Err(Error::Closed)));
    }
}
