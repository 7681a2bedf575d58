//! Per-connection state and the read-dispatch entry point.

use std::fmt;

use bytes::Bytes;
use tokio::time::Instant;

use crate::{
    Config, Error, Result,
    assemble::{Assembly, Message},
    close::{self, CloseCode},
    codec::{FrameParser, ReadState, Role},
    frame::{Frame, OpCode},
    handshake::{self, Handshake},
    io::{Inbound, Outbound},
    liveness::{Heartbeat, Liveness, Tick},
};

/// Identifier the host assigns to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for a complete upgrade request.
    Handshake,
    /// Upgraded, frames are exchanged.
    Open,
    /// Terminal. Every later call fails with [`Error::Closed`].
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The peer sent a Close frame. [`CloseCode::Status`] when it carried no code.
    PeerClosed(CloseCode),
    /// The peer hung up. `truncated` is set when a partial handshake, frame or
    /// message was still pending.
    Eof { truncated: bool },
    /// The upgrade request was rejected.
    Handshake,
    /// The peer violated the framing protocol.
    Protocol,
    /// No pong arrived in time, or the upgrade never completed.
    LivenessTimeout,
    /// Reading or writing the connection failed.
    Io,
    /// Closed locally.
    Shutdown,
}

impl CloseCause {
    /// Returns `true` for causes that are part of normal operation.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            CloseCause::PeerClosed(_) | CloseCause::Eof { .. } | CloseCause::Shutdown
        )
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::PeerClosed(code) => write!(f, "peer closed ({})", u16::from(*code)),
            CloseCause::Eof { truncated: false } => f.write_str("eof"),
            CloseCause::Eof { truncated: true } => f.write_str("eof (truncated)"),
            CloseCause::Handshake => f.write_str("handshake failed"),
            CloseCause::Protocol => f.write_str("protocol error"),
            CloseCause::LivenessTimeout => f.write_str("liveness timeout"),
            CloseCause::Io => f.write_str("i/o error"),
            CloseCause::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// What the host must do after a call returned successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep the connection and wait for the next event.
    Continue,
    /// Flush the outbound buffer, then close the connection.
    Close(CloseCause),
}

/// State of one connection.
///
/// The host creates a context when a connection opens, calls
/// [`on_readable`](Self::on_readable) on every read-readiness event and
/// [`on_timer`](Self::on_timer) when [`deadline`](Self::deadline) passes, and
/// drops it when the connection closes.
///
/// All methods take `&mut self`: a context must never be entered from two
/// threads at once. The timer has to be delivered on the same execution context
/// as reads, which is what the per-connection task in [`crate::server`] does.
/// Different connections are independent and may run in parallel.
#[derive(Debug)]
pub struct ConnectionContext {
    id: ConnectionId,
    phase: Phase,
    parser: FrameParser,
    assembly: Assembly,
    liveness: Liveness,
    cause: Option<CloseCause>,
    max_message_size: usize,
    max_handshake_size: usize,
    check_utf8: bool,
}

impl ConnectionContext {
    /// Creates the context of a connection opened at `now`.
    pub fn new(id: ConnectionId, config: &Config, now: Instant) -> Self {
        Self {
            id,
            phase: Phase::Handshake,
            parser: FrameParser::new(Role::Server, config.max_frame_size),
            assembly: Assembly::Idle,
            liveness: Liveness::new(Heartbeat::from(config), now),
            cause: None,
            max_message_size: config.max_message_size,
            max_handshake_size: config.max_handshake_size,
            check_utf8: config.check_utf8,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns `true` once the upgrade completed and until the connection closes.
    #[inline]
    pub fn is_upgraded(&self) -> bool {
        self.phase == Phase::Open
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Why the connection closed, once it has.
    #[inline]
    pub fn cause(&self) -> Option<CloseCause> {
        self.cause
    }

    #[inline]
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    #[inline]
    pub fn read_state(&self) -> &ReadState {
        self.parser.state()
    }

    #[inline]
    pub fn is_accumulating(&self) -> bool {
        self.assembly.is_accumulating()
    }

    /// The single instant the host must call [`on_timer`](Self::on_timer) at.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Closed => None,
            _ => self.liveness.deadline(),
        }
    }

    /// Processes everything currently buffered in `inbound`.
    ///
    /// Completes the upgrade if it has not happened yet, then parses frames
    /// until more bytes are needed. Pings are answered and pongs recorded
    /// before the next frame is looked at. Every completed message is passed to
    /// `on_message` in arrival order.
    ///
    /// Incomplete input is left in `inbound` and reported as
    /// [`Action::Continue`]. On a protocol error a Close(1002) frame is written
    /// on a best effort basis. Any error or [`Action::Close`] leaves the
    /// context closed.
    pub fn on_readable<I, O, F>(
        &mut self,
        inbound: &mut I,
        outbound: &mut O,
        now: Instant,
        mut on_message: F,
    ) -> Result<Action>
    where
        I: Inbound + ?Sized,
        O: Outbound + ?Sized,
        F: FnMut(Message),
    {
        match self.phase {
            Phase::Closed => return Err(Error::Closed),
            Phase::Handshake => {
                match handshake::accept(inbound, outbound, self.max_handshake_size) {
                    Ok(Handshake::Partial) => return Ok(Action::Continue),
                    Ok(Handshake::Complete(request)) => {
                        tracing::debug!(conn = %self.id, path = %request.path, "connection upgraded");
                        self.phase = Phase::Open;
                    }
                    Err(err) => return Err(self.fail(err, outbound)),
                }
            }
            Phase::Open => {}
        }

        match self.drain(inbound, outbound, now, &mut on_message) {
            Ok(action) => Ok(action),
            Err(err) => Err(self.fail(err, outbound)),
        }
    }

    fn drain<I, O, F>(
        &mut self,
        inbound: &mut I,
        outbound: &mut O,
        now: Instant,
        on_message: &mut F,
    ) -> Result<Action>
    where
        I: Inbound + ?Sized,
        O: Outbound + ?Sized,
        F: FnMut(Message),
    {
        while let Some(frame) = self.parser.parse(inbound)? {
            match frame.opcode() {
                OpCode::Ping => outbound.write_frame(&Frame::pong(frame.into_payload()))?,
                OpCode::Pong => {
                    if let Some(rtt) = self.liveness.on_pong(now) {
                        tracing::trace!(conn = %self.id, rtt = ?rtt, "pong received");
                    }
                }
                OpCode::Close => return self.on_close_frame(&frame, outbound),
                OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                    let message =
                        self.assembly
                            .push(frame, self.max_message_size, self.check_utf8)?;
                    if let Some(message) = message {
                        on_message(message);
                    }
                }
            }
        }
        Ok(Action::Continue)
    }

    fn on_close_frame<O>(&mut self, frame: &Frame, outbound: &mut O) -> Result<Action>
    where
        O: Outbound + ?Sized,
    {
        let (reply, code) = match close::parse_payload(frame.payload())? {
            Some((code, reason)) => {
                tracing::debug!(conn = %self.id, code = u16::from(code), reason, "close received");
                (Frame::close(code, b""), code)
            }
            None => (Frame::close_raw(Bytes::new()), CloseCode::Status),
        };
        outbound.write_frame(&reply)?;

        let cause = CloseCause::PeerClosed(code);
        self.finish(cause);
        Ok(Action::Close(cause))
    }

    /// Called when the liveness deadline passed.
    ///
    /// Writes a ping when one is due. Fails with [`Error::LivenessTimeout`]
    /// when the outstanding ping expired, or when the upgrade did not complete
    /// before the first ping was due.
    pub fn on_timer<O>(&mut self, now: Instant, outbound: &mut O) -> Result<Action>
    where
        O: Outbound + ?Sized,
    {
        match self.phase {
            Phase::Closed => Err(Error::Closed),
            Phase::Handshake => match self.liveness.deadline() {
                Some(deadline) if now >= deadline => {
                    Err(self.fail(Error::LivenessTimeout, outbound))
                }
                _ => Ok(Action::Continue),
            },
            Phase::Open => match self.liveness.on_timer(now) {
                Tick::Wait => Ok(Action::Continue),
                Tick::SendPing => match outbound.write_frame(&Frame::ping(Bytes::new())) {
                    Ok(()) => Ok(Action::Continue),
                    Err(err) => Err(self.fail(err.into(), outbound)),
                },
                Tick::Expired => Err(self.fail(Error::LivenessTimeout, outbound)),
            },
        }
    }

    /// Called when the peer hung up. Never an error.
    pub fn on_eof<I>(&mut self, inbound: &I) -> CloseCause
    where
        I: Inbound + ?Sized,
    {
        if let Some(cause) = self.cause {
            return cause;
        }
        let truncated = inbound.buffered() > 0
            || !self.parser.is_at_boundary()
            || self.assembly.is_accumulating();
        let cause = CloseCause::Eof { truncated };
        tracing::debug!(conn = %self.id, truncated, "peer hung up");
        self.finish(cause);
        cause
    }

    /// Writes an application frame. Sending a Close frame closes the context.
    pub fn send<O>(&mut self, frame: &Frame, outbound: &mut O) -> Result<()>
    where
        O: Outbound + ?Sized,
    {
        if self.phase != Phase::Open {
            return Err(Error::Closed);
        }
        outbound.write_frame(frame)?;
        if frame.opcode() == OpCode::Close {
            self.finish(CloseCause::Shutdown);
        }
        Ok(())
    }

    /// Closes the context locally.
    pub fn close(&mut self) {
        if self.phase != Phase::Closed {
            self.finish(CloseCause::Shutdown);
        }
    }

    fn finish(&mut self, cause: CloseCause) {
        self.phase = Phase::Closed;
        self.cause = Some(cause);
        self.assembly = Assembly::Idle;
        self.liveness.close();
    }

    fn fail<O>(&mut self, err: Error, outbound: &mut O) -> Error
    where
        O: Outbound + ?Sized,
    {
        if err.is_protocol_error() && self.phase == Phase::Open {
            let close = Frame::close(CloseCode::Protocol, b"");
            if let Err(io) = outbound.write_frame(&close) {
                tracing::debug!(conn = %self.id, error = %io, "failed to queue close frame");
            }
        }
        tracing::debug!(conn = %self.id, error = %err, "closing connection");
        self.finish(err.cause());
        err
    }
}
