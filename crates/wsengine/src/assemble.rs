//! Message reassembly across continuation frames.

use bytes::{Bytes, BytesMut};

use crate::{
    ProtocolError,
    frame::{Frame, OpCode},
};

/// A complete application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    opcode: OpCode,
    payload: Bytes,
}

impl Message {
    /// Either [`OpCode::Text`] or [`OpCode::Binary`].
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// A single unfragmented frame carrying this message.
    pub fn into_frame(self) -> Frame {
        Frame::new(true, self.opcode, None, self.payload)
    }
}

/// Reassembly state of one connection.
///
/// The opcode of the message in flight and its buffered bytes only exist
/// together, inside `Accumulating`.
#[derive(Debug, Default)]
pub enum Assembly {
    /// No fragmented message in flight.
    #[default]
    Idle,
    /// A message started with FIN unset and is waiting for continuations.
    Accumulating { opcode: OpCode, buffer: BytesMut },
}

impl Assembly {
    /// Returns `true` while a fragmented message is in flight.
    pub fn is_accumulating(&self) -> bool {
        matches!(self, Assembly::Accumulating { .. })
    }

    /// Feeds a data or continuation frame.
    ///
    /// Returns the finished message when `frame` has FIN set. An unfragmented
    /// message takes the same path and is returned without copying.
    pub fn push(
        &mut self,
        frame: Frame,
        max_message_size: usize,
        check_utf8: bool,
    ) -> Result<Option<Message>, ProtocolError> {
        let (fin, opcode, payload) = (frame.fin, frame.opcode, frame.payload);

        let message = match (std::mem::take(self), opcode) {
            (Assembly::Idle, OpCode::Continuation) => {
                return Err(ProtocolError::ContinuationWithoutStart);
            }
            (Assembly::Accumulating { .. }, OpCode::Text | OpCode::Binary) => {
                return Err(ProtocolError::UnfinishedMessage);
            }
            (state, OpCode::Close | OpCode::Ping | OpCode::Pong) => {
                *self = state;
                return Err(ProtocolError::InvalidOpCode(u8::from(opcode)));
            }
            (Assembly::Idle, opcode) => {
                if payload.len() > max_message_size {
                    return Err(ProtocolError::MessageTooLarge);
                }
                if !fin {
                    *self = Assembly::Accumulating {
                        opcode,
                        buffer: BytesMut::from(&payload[..]),
                    };
                    return Ok(None);
                }
                Message { opcode, payload }
            }
            (Assembly::Accumulating { opcode, mut buffer }, OpCode::Continuation) => {
                if buffer.len() + payload.len() > max_message_size {
                    return Err(ProtocolError::MessageTooLarge);
                }
                buffer.extend_from_slice(&payload);
                if !fin {
                    *self = Assembly::Accumulating { opcode, buffer };
                    return Ok(None);
                }
                Message {
                    opcode,
                    payload: buffer.freeze(),
                }
            }
        };

        if check_utf8 && message.opcode == OpCode::Text && message.as_text().is_none() {
            return Err(ProtocolError::InvalidUtf8);
        }
        Ok(Some(message))
    }
}
