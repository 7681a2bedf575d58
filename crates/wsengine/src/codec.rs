//! # codec
//!
//! Incremental frame parsing and frame encoding.
//!
//! [`FrameParser`] turns the unread bytes of a connection into complete
//! [`Frame`]s. It never waits: every call either returns a frame, reports that
//! more bytes are needed, or fails with a [`ProtocolError`].
//!
//! ```text
//!            header complete                payload complete
//! ┌────────┐ ───────────────► ┌───────────┐ ────────────────► frame
//! │ Header │                  │ Payload(h)│
//! └────────┘ ◄─────────────── └───────────┘
//!     │         next frame          │
//!     └─ fewer bytes than header    └─ fewer bytes than h.payload_len
//!        → Ok(None), nothing read      → Ok(None), header kept
//! ```
//!
//! In the `Header` state the parser only peeks. Bytes are consumed once the
//! whole header is buffered and valid, so calling again with the same short
//! input is harmless. In the `Payload` state the header is already consumed
//! and kept, so it is parsed at most once per frame.
//!
//! The parser also implements the `tokio_util` [`Decoder`](codec::Decoder)
//! trait, and [`Encoder`] the matching [`Encoder`](codec::Encoder) trait, so
//! the same code drives a [`Framed`](tokio_util::codec::Framed) stream. The
//! integration tests use that to play the client side.

use bytes::BytesMut;
use tokio_util::codec;

use crate::{
    Error, ProtocolError,
    frame::{Frame, FrameHeader, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    io::Inbound,
};

/// Which end of the connection a codec serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends masked frames, accepts unmasked ones.
    Client,
    /// Sends unmasked frames, requires masked ones.
    Server,
}

/// Parser progress within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// Waiting for a complete header. Nothing of the next frame is consumed.
    Header,
    /// Header consumed, waiting for its payload.
    Payload(FrameHeader),
}

/// Incremental frame parser.
#[derive(Debug)]
pub struct FrameParser {
    role: Role,
    state: ReadState,
    max_frame_size: usize,
}

impl FrameParser {
    /// Creates a parser rejecting payloads above `max_frame_size`.
    pub fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            role,
            state: ReadState::Header,
            max_frame_size,
        }
    }

    #[inline]
    pub fn state(&self) -> &ReadState {
        &self.state
    }

    /// Returns `true` when no byte of a frame has been consumed yet.
    #[inline]
    pub fn is_at_boundary(&self) -> bool {
        self.state == ReadState::Header
    }

    /// Parses the next frame from `src`.
    ///
    /// - `Ok(Some(frame))`: a frame was consumed, payload unmasked.
    /// - `Ok(None)`: more bytes are needed.
    /// - `Err(_)`: the stream is invalid. Nothing of the offending header was
    ///   consumed and the parser should not be used again.
    pub fn parse<I>(&mut self, src: &mut I) -> Result<Option<Frame>, ProtocolError>
    where
        I: Inbound + ?Sized,
    {
        let header = match self.state {
            ReadState::Payload(header) => header,
            ReadState::Header => {
                let Some(header) = FrameHeader::parse(src.peek(MAX_HEAD_SIZE))? else {
                    return Ok(None);
                };
                self.check(&header)?;
                src.discard(header.head_len);
                self.state = ReadState::Payload(header);
                header
            }
        };

        // bounded by max_frame_size in check()
        let len = header.payload_len as usize;
        if src.buffered() < len {
            return Ok(None);
        }

        let mut payload = BytesMut::with_capacity(len);
        src.read_into(&mut payload, len);
        if let Some(mask) = header.mask {
            crate::mask::apply_mask(&mut payload, mask, 0);
        }

        self.state = ReadState::Header;
        Ok(Some(Frame::new(
            header.fin,
            header.opcode,
            header.mask,
            payload.freeze(),
        )))
    }

    fn check(&self, header: &FrameHeader) -> Result<(), ProtocolError> {
        if header.rsv != 0 {
            return Err(ProtocolError::ReservedBits);
        }
        if header.opcode.is_control() {
            if !header.fin {
                return Err(ProtocolError::ControlFrameFragmented);
            }
            if header.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(ProtocolError::ControlFrameTooLarge);
            }
        }
        if header.payload_len > self.max_frame_size as u64 {
            return Err(ProtocolError::FrameTooLarge);
        }
        if self.role == Role::Server && header.mask.is_none() {
            return Err(ProtocolError::UnmaskedFrame);
        }
        Ok(())
    }
}

impl codec::Decoder for FrameParser {
    type Item = Frame;
    type Error = Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.parse(src)?)
    }
}

/// Frame encoder. Client encoders mask every frame with a random key.
#[derive(Debug)]
pub struct Encoder {
    role: Role,
}

impl Encoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = Error;

    #[inline]
    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.role == Role::Client && frame.mask.is_none() {
            frame.mask = Some(rand::random());
        }
        frame.encode(dst);
        Ok(())
    }
}

/// Parser and encoder for one role, usable with `tokio_util::codec::Framed`.
#[derive(Debug)]
pub struct Codec {
    decoder: FrameParser,
    encoder: Encoder,
}

impl Codec {
    pub fn new(role: Role, max_frame_size: usize) -> Self {
        Self {
            decoder: FrameParser::new(role, max_frame_size),
            encoder: Encoder::new(role),
        }
    }
}

impl codec::Decoder for Codec {
    type Item = Frame;
    type Error = Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}
