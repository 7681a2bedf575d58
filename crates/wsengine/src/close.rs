// This code is sourced primarily from the tungstenite-rs library, which can be found at:
// https://github.com/snapview/tungstenite-rs/blob/42b8797e8b7f39efb7d9322dc8af3e9089db4f7d/src/protocol/frame/coding.rs#L117
//
// Original contributions by:
// Copyright (c) 2017 Alexey Galakhov
// Copyright (c) 2016 Jason Housley
// Licensed under both MIT and Apache 2.0 licenses
//
// Modifications made by:
// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is provided "AS IS", WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. See the License for specific language governing permissions and limitations.
//

//! Close status codes (RFC 6455 Section 7.4).

use bytes::Bytes;

use crate::ProtocolError;

/// Status code carried in the first two bytes of a Close frame payload.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// 1000, the purpose of the connection was fulfilled.
    Normal,
    /// 1001, the endpoint is going away.
    Away,
    /// 1002, protocol error.
    Protocol,
    /// 1003, the endpoint cannot accept this kind of data.
    Unsupported,
    /// 1005, no status code was present. Never sent on the wire.
    Status,
    /// 1006, closed without a Close frame. Never sent on the wire.
    Abnormal,
    /// 1007, message data did not match its type.
    Invalid,
    /// 1008, policy violation.
    Policy,
    /// 1009, message too big to process.
    Size,
    /// 1010, the client expected an extension the server did not offer.
    Extension,
    /// 1011, unexpected server condition.
    Error,
    /// 1012, the server is restarting.
    Restart,
    /// 1013, try again later.
    Again,
    /// 1015, TLS handshake failure. Never sent on the wire.
    Tls,
    /// 1016-2999, reserved by the RFC.
    Reserved(u16),
    /// 3000-3999, registered with IANA.
    Iana(u16),
    /// 4000-4999, private use.
    Library(u16),
    /// Anything else.
    Bad(u16),
}

impl CloseCode {
    /// Whether this code may appear in a Close frame sent by a peer.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Bad(_)
                | CloseCode::Reserved(_)
                | CloseCode::Status
                | CloseCode::Abnormal
                | CloseCode::Tls
        )
    }

    /// Encodes `code` followed by `reason` as a Close frame payload.
    pub fn payload(self, reason: &[u8]) -> Bytes {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(self).to_be_bytes());
        payload.extend_from_slice(reason);
        payload.into()
    }
}

/// Splits a received Close payload into its code and reason.
///
/// An empty payload is legal and yields `None`. A one byte payload, a code that
/// may not be sent, or a reason that is not UTF-8 is a protocol error.
pub fn parse_payload(payload: &[u8]) -> Result<Option<(CloseCode, &str)>, ProtocolError> {
    match payload {
        [] => Ok(None),
        [_] => Err(ProtocolError::InvalidClosePayload),
        [hi, lo, reason @ ..] => {
            let code = CloseCode::from(u16::from_be_bytes([*hi, *lo]));
            if !code.is_allowed() {
                return Err(ProtocolError::InvalidClosePayload);
            }
            let reason =
                std::str::from_utf8(reason).map_err(|_| ProtocolError::InvalidClosePayload)?;
            Ok(Some((code, reason)))
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1016..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Iana(code)
            | CloseCode::Library(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(CloseCode::from(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from(1002), CloseCode::Protocol);
        assert_eq!(CloseCode::from(2500), CloseCode::Reserved(2500));
        assert_eq!(CloseCode::from(4001), CloseCode::Library(4001));
        assert_eq!(CloseCode::from(999), CloseCode::Bad(999));
        assert_eq!(u16::from(CloseCode::Away), 1001);
        assert_eq!(u16::from(CloseCode::Iana(3001)), 3001);
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(&[]), Ok(None));
        assert_eq!(
            parse_payload(&[0x03]),
            Err(ProtocolError::InvalidClosePayload)
        );

        let payload = CloseCode::Normal.payload(b"bye");
        assert_eq!(
            parse_payload(&payload),
            Ok(Some((CloseCode::Normal, "bye")))
        );

        // 1005 must never be sent by a peer
        let payload = CloseCode::Status.payload(b"");
        assert_eq!(
            parse_payload(&payload),
            Err(ProtocolError::InvalidClosePayload)
        );

        let payload = [0x03, 0xE8, 0xFF, 0xFE];
        assert_eq!(
            parse_payload(&payload),
            Err(ProtocolError::InvalidClosePayload)
        );
    }
}
