//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! [`FrameHeader`] is the parsed fixed part. It lives in the connection's parser
//! state between the moment the header bytes are consumed and the moment the
//! whole payload is buffered. [`Frame`] is a header plus its payload and is used
//! for both directions.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ProtocolError, close::CloseCode};

/// Smallest possible header: two bytes, no extended length, no mask.
pub const MIN_HEAD_SIZE: usize = 2;

/// Largest possible header: two bytes, 64-bit length, mask.
pub const MAX_HEAD_SIZE: usize = 14;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket operation code.
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8).
/// 0x3-0x7 and 0xB-0xF are reserved and rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    ///
    /// Control frames cannot be fragmented, carry at most 125 bytes, and may
    /// arrive between the fragments of a data message.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for `Text` and `Binary`, the opcodes that start a message.
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    /// RSV1-3 packed into the low three bits.
    pub rsv: u8,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
    /// Number of bytes the encoded header occupies.
    pub head_len: usize,
}

impl FrameHeader {
    /// Number of header bytes implied by the first two bytes of a frame.
    #[inline]
    pub fn encoded_len(first_two: [u8; 2]) -> usize {
        let extra = match first_two[1] & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask = if first_two[1] & 0x80 != 0 { 4 } else { 0 };
        MIN_HEAD_SIZE + extra + mask
    }

    /// Parses a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` is shorter than the full header. Only the
    /// wire format is checked here; role and size policy belong to the codec.
    pub fn parse(buf: &[u8]) -> Result<Option<FrameHeader>, ProtocolError> {
        if buf.len() < MIN_HEAD_SIZE {
            return Ok(None);
        }
        let opcode = OpCode::try_from(buf[0] & 0x0F)?;
        let head_len = Self::encoded_len([buf[0], buf[1]]);
        if buf.len() < head_len {
            return Ok(None);
        }

        let fin = buf[0] & 0x80 != 0;
        let rsv = (buf[0] >> 4) & 0x07;
        let masked = buf[1] & 0x80 != 0;

        let (payload_len, rest) = match buf[1] & 0x7F {
            126 => (u64::from(u16::from_be_bytes([buf[2], buf[3]])), &buf[4..]),
            127 => {
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), &buf[10..])
            }
            len => (u64::from(len), &buf[2..]),
        };

        let mask = masked.then(|| [rest[0], rest[1], rest[2], rest[3]]);

        Ok(Some(FrameHeader {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            head_len,
        }))
    }
}

/// A WebSocket frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) mask: Option<[u8; 4]>,
    pub(crate) payload: Bytes,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("fin", &self.fin)
            .field("opcode", &self.opcode)
            .field("masked", &self.mask.is_some())
            .field("len", &self.payload.len())
            .finish()
    }
}

impl Frame {
    /// Low-level constructor.
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, None, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    /// A continuation fragment. Final by default, use [`Frame::with_fin`] for
    /// middle fragments.
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Continuation, None, payload)
    }

    /// A close frame carrying `code` and `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        Self::new(true, OpCode::Close, None, code.payload(reason.as_ref()))
    }

    /// A close frame with an arbitrary (possibly empty) payload.
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, None, payload)
    }

    #[must_use]
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    #[must_use]
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    #[inline(always)]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[inline(always)]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    #[inline(always)]
    pub fn mask(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// The unmasked payload.
    #[inline(always)]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline(always)]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Splits a data frame into fragments of at most `max_size` payload bytes.
    ///
    /// The first fragment keeps the opcode, the rest are continuations and only
    /// the last one has FIN set. An empty payload yields the frame unchanged.
    pub fn into_fragments(self, max_size: usize) -> Vec<Frame> {
        let max_size = max_size.max(1);
        if self.payload.len() <= max_size {
            return vec![self];
        }

        let count = self.payload.len().div_ceil(max_size);
        let mut fragments = Vec::with_capacity(count);
        let mut payload = self.payload;
        let mut opcode = self.opcode;
        while !payload.is_empty() {
            let chunk = payload.split_to(max_size.min(payload.len()));
            let fin = payload.is_empty() && self.fin;
            fragments.push(Frame::new(fin, opcode, self.mask, chunk));
            opcode = OpCode::Continuation;
        }
        fragments
    }

    /// Writes the header into `dst`.
    #[inline]
    pub(crate) fn write_head(&self, dst: &mut BytesMut) {
        let first_byte = (self.fin as u8) << 7 | u8::from(self.opcode);
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len();

        dst.put_u8(first_byte);
        if len < 126 {
            dst.put_u8(len as u8 | mask_bit);
        } else if len < 65536 {
            dst.put_u8(126 | mask_bit);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(127 | mask_bit);
            dst.put_u64(len as u64);
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask);
        }
    }

    /// Appends the wire encoding of this frame to `dst`, masking the payload if
    /// a key is set.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(MAX_HEAD_SIZE + self.payload.len());
        self.write_head(dst);

        let index = dst.len();
        dst.extend_from_slice(&self.payload);
        if let Some(mask) = self.mask {
            crate::mask::apply_mask(&mut dst[index..], mask, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_try_from() {
        assert_eq!(OpCode::try_from(0x1).unwrap(), OpCode::Text);
        assert_eq!(OpCode::try_from(0xA).unwrap(), OpCode::Pong);
        for &code in &[0x3, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            assert_eq!(
                OpCode::try_from(code),
                Err(ProtocolError::InvalidOpCode(code))
            );
        }
    }

    #[test]
    fn test_is_control() {
        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Continuation.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(OpCode::Binary.is_data());
        assert!(!OpCode::Continuation.is_data());
    }

    #[test]
    fn test_encode_length_forms() {
        for (len, head) in [(0usize, 2usize), (125, 2), (126, 4), (65535, 4), (65536, 10)] {
            let mut dst = BytesMut::new();
            Frame::binary(vec![0u8; len]).encode(&mut dst);
            assert_eq!(dst.len(), head + len, "payload {len}");

            let header = FrameHeader::parse(&dst).unwrap().unwrap();
            assert_eq!(header.head_len, head);
            assert_eq!(header.payload_len, len as u64);
            assert_eq!(header.opcode, OpCode::Binary);
            assert!(header.fin);
            assert!(header.mask.is_none());
        }
    }

    #[test]
    fn test_parse_masked_header() {
        let mut dst = BytesMut::new();
        Frame::text("Hello")
            .with_fin(false)
            .with_mask([0x37, 0xfa, 0x21, 0x3d])
            .encode(&mut dst);

        // RFC 6455 Section 5.7 example, FIN cleared
        assert_eq!(
            &dst[..],
            &[0x01, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );

        let header = FrameHeader::parse(&dst).unwrap().unwrap();
        assert!(!header.fin);
        assert_eq!(header.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(header.head_len, 6);
    }

    #[test]
    fn test_parse_short_buffer() {
        assert_eq!(FrameHeader::parse(&[]), Ok(None));
        assert_eq!(FrameHeader::parse(&[0x82]), Ok(None));
        // 16-bit length announced, only one length byte present
        assert_eq!(FrameHeader::parse(&[0x82, 126, 0x01]), Ok(None));
        // mask announced, key incomplete
        assert_eq!(FrameHeader::parse(&[0x82, 0x81, 1, 2]), Ok(None));
    }

    #[test]
    fn test_parse_reserved_opcode() {
        assert_eq!(
            FrameHeader::parse(&[0x83, 0x00]),
            Err(ProtocolError::InvalidOpCode(3))
        );
    }

    #[test]
    fn test_into_fragments() {
        let fragments = Frame::binary(vec![7u8; 10]).into_fragments(4);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].opcode(), OpCode::Binary);
        assert!(!fragments[0].is_fin());
        assert_eq!(fragments[1].opcode(), OpCode::Continuation);
        assert!(!fragments[1].is_fin());
        assert_eq!(fragments[2].opcode(), OpCode::Continuation);
        assert!(fragments[2].is_fin());
        assert_eq!(fragments[2].payload().len(), 2);

        let single = Frame::text("").into_fragments(4);
        assert_eq!(single.len(), 1);
        assert!(single[0].is_fin());
    }

    #[test]
    fn test_close_frame() {
        let frame = Frame::close(CloseCode::Normal, b"bye");
        assert_eq!(frame.opcode(), OpCode::Close);
        assert_eq!(&frame.payload()[..], &[0x03, 0xE8, b'b', b'y', b'e']);
    }
}
