//! Byte-level connection handles.
//!
//! The engine never touches a socket. The host event loop owns the raw byte
//! channel and lends the engine two views of it on every call:
//!
//! - [`Inbound`]: the bytes received so far and not yet consumed. The engine
//!   peeks before it commits, so a partial frame or handshake is left in place.
//! - [`Outbound`]: where encoded frames and handshake responses go. Writes must
//!   not block; the host flushes them after the call returns.
//!
//! Both are implemented for [`BytesMut`], which is what the reference host in
//! [`crate::server`] uses as its per-connection buffers.

use bytes::{Buf, BytesMut};

use crate::frame::Frame;

/// Read side of a connection's buffer.
pub trait Inbound {
    /// Number of bytes currently buffered.
    fn buffered(&self) -> usize;

    /// Up to `n` buffered bytes from the front, without consuming them.
    fn peek(&self, n: usize) -> &[u8];

    /// Drops up to `n` bytes from the front and returns how many were dropped.
    fn discard(&mut self, n: usize) -> usize;

    /// Moves up to `n` bytes from the front into `dst` and returns how many
    /// were moved.
    fn read_into(&mut self, dst: &mut BytesMut, n: usize) -> usize;
}

/// Write side of a connection.
pub trait Outbound {
    /// Queues raw bytes for transmission.
    fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Queues an encoded frame.
    fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.write_raw(&buf)
    }
}

impl Inbound for BytesMut {
    #[inline]
    fn buffered(&self) -> usize {
        self.len()
    }

    #[inline]
    fn peek(&self, n: usize) -> &[u8] {
        &self[..n.min(self.len())]
    }

    #[inline]
    fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.len());
        self.advance(n);
        n
    }

    #[inline]
    fn read_into(&mut self, dst: &mut BytesMut, n: usize) -> usize {
        let n = n.min(self.len());
        dst.extend_from_slice(&self[..n]);
        self.advance(n);
        n
    }
}

impl Outbound for BytesMut {
    #[inline]
    fn write_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    #[inline]
    fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        frame.encode(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_does_not_consume() {
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        assert_eq!(buf.peek(3), b"abc");
        assert_eq!(buf.peek(100), b"abcdef");
        assert_eq!(buf.buffered(), 6);

        assert_eq!(buf.discard(2), 2);
        assert_eq!(buf.peek(2), b"cd");

        let mut dst = BytesMut::new();
        assert_eq!(buf.read_into(&mut dst, 10), 4);
        assert_eq!(&dst[..], b"cdef");
        assert_eq!(buf.buffered(), 0);
        assert_eq!(buf.discard(1), 0);
    }

    #[test]
    fn test_write_frame() {
        let mut out = BytesMut::new();
        out.write_frame(&Frame::pong("x")).unwrap();
        assert_eq!(&out[..], &[0x8A, 0x01, b'x']);
    }
}
