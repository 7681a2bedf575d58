//! # hpx-wsengine
//!
//! Incremental WebSocket (RFC 6455) framing and connection-lifecycle engine for
//! readiness-driven event loops.
//!
//! The engine does not own sockets. A host event loop keeps one
//! [`ConnectionContext`] per connection and calls into it whenever the
//! connection becomes readable or its liveness timer fires. On every call the
//! context works with whatever bytes are buffered: it completes the HTTP
//! upgrade, drains every complete frame, reassembles fragmented messages,
//! answers control frames and hands finished [`Message`]s to a callback. Partial
//! input is never an error; the context resumes where it stopped on the next
//! readiness event.
//!
//! ```text
//! readiness ──► ConnectionContext::on_readable
//!                 │
//!                 ├─ handshake  (until upgraded)
//!                 ├─ codec      (loop until more data is needed)
//!                 ├─ control    (ping → pong, pong → liveness, close → echo)
//!                 └─ assemble   ──► on_message(Message)
//!
//! timer ──────► ConnectionContext::on_timer ──► liveness (ping / timeout)
//! ```
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use hpx_wsengine::{Action, Config, ConnectionContext, ConnectionId};
//! use tokio::time::Instant;
//!
//! let config = Config::default();
//! let mut ctx = ConnectionContext::new(ConnectionId(1), &config, Instant::now());
//!
//! let mut inbound = BytesMut::from(
//!     &b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\n\
//!        Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
//!        Sec-WebSocket-Version: 13\r\n\r\n"[..],
//! );
//! let mut outbound = BytesMut::new();
//!
//! let action = ctx
//!     .on_readable(&mut inbound, &mut outbound, Instant::now(), |message| {
//!         println!("{:?}", message.opcode());
//!     })
//!     .unwrap();
//!
//! assert_eq!(action, Action::Continue);
//! assert!(ctx.is_upgraded());
//! assert!(outbound.starts_with(b"HTTP/1.1 101"));
//! ```
//!
//! The [`server`] module contains a tokio based host that plays the event-loop
//! role, and [`dispatch`] a sharded worker pool for offloading message handling.

mod assemble;
pub mod close;
pub mod codec;
mod config;
mod context;
pub mod dispatch;
pub mod frame;
pub mod handshake;
pub mod io;
pub mod liveness;
#[doc(hidden)]
pub mod mask;
pub mod server;

pub use assemble::{Assembly, Message};
pub use config::Config;
pub use context::{Action, CloseCause, ConnectionContext, ConnectionId, Phase};
pub use frame::{Frame, OpCode};
pub use io::{Inbound, Outbound};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that terminate a single connection.
///
/// None of these are fatal to the process. The host closes the affected
/// connection and reports [`Error::cause`] as the reason.
#[derive(Error, Debug)]
pub enum Error {
    /// The HTTP upgrade request was rejected.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The peer violated the framing protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// No pong arrived within the configured window.
    #[error("liveness check timed out")]
    LivenessTimeout,

    /// The context was already closed.
    #[error("connection is closed")]
    Closed,

    /// I/O error reported by the host.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this is a framing protocol violation.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if the upgrade handshake was rejected.
    pub fn is_handshake_error(&self) -> bool {
        matches!(self, Self::Handshake(_))
    }

    /// Returns `true` if the connection failed its liveness check.
    pub fn is_liveness_timeout(&self) -> bool {
        matches!(self, Self::LivenessTimeout)
    }

    /// The close cause a host should report for this error.
    pub fn cause(&self) -> CloseCause {
        match self {
            Self::Handshake(_) => CloseCause::Handshake,
            Self::Protocol(_) => CloseCause::Protocol,
            Self::LivenessTimeout => CloseCause::LivenessTimeout,
            Self::Closed => CloseCause::Shutdown,
            Self::Io(_) => CloseCause::Io,
        }
    }
}

/// Reasons an upgrade request is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The buffered bytes do not start with `GET /`.
    #[error("not a websocket upgrade request")]
    NotWebSocket,

    /// The HTTP request could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A required upgrade header is missing or has the wrong value.
    #[error("missing or invalid header: {0}")]
    MissingHeader(&'static str),

    /// `Sec-WebSocket-Version` is not 13.
    #[error("Sec-WebSocket-Version must be 13")]
    UnsupportedVersion,

    /// The request grew past the configured handshake limit.
    #[error("handshake request exceeds {0} bytes")]
    TooLarge(usize),
}

/// Framing violations detected while parsing or reassembling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// RSV1-3 set without a negotiated extension.
    #[error("reserved bits are not zero")]
    ReservedBits,

    /// Opcode outside the RFC 6455 set.
    #[error("invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// Control frame with FIN unset.
    #[error("control frame must not be fragmented")]
    ControlFrameFragmented,

    /// Control frame payload above 125 bytes.
    #[error("control frame payload too large")]
    ControlFrameTooLarge,

    /// Frame payload above the configured maximum.
    #[error("frame too large")]
    FrameTooLarge,

    /// Client frame without a masking key.
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// Continuation frame with no message in flight.
    #[error("continuation without initiation")]
    ContinuationWithoutStart,

    /// New data frame while a fragmented message is still open.
    #[error("data frame received before previous message finished")]
    UnfinishedMessage,

    /// Reassembled message above the configured maximum.
    #[error("message too large")]
    MessageTooLarge,

    /// Text message is not valid UTF-8.
    #[error("invalid UTF-8")]
    InvalidUtf8,

    /// Close frame payload is malformed.
    #[error("invalid close frame")]
    InvalidClosePayload,
}
