//! Opportunistic server-side upgrade handshake (RFC 6455 Section 4.2).
//!
//! The handshake is attempted on every readiness event until it completes,
//! using only the bytes buffered so far:
//!
//! 1. Fast path: the buffer must start with `GET /`. Fewer than five bytes is
//!    undecided, anything else is not a WebSocket connection.
//! 2. The full HTTP/1.1 request is parsed from a peek of the buffer. An
//!    incomplete request leaves the buffer untouched and reports
//!    [`Handshake::Partial`].
//! 3. The upgrade headers are validated and the `101 Switching Protocols`
//!    response is written.
//! 4. Exactly the request's bytes are discarded. Frames the client pipelined
//!    behind the request stay buffered for the frame parser.
//!
//! A rejected request gets an HTTP error response before the error is returned.

use base64::prelude::*;
use http::{StatusCode, header};
use sha1::{Digest, Sha1};

use crate::{
    HandshakeError, Result,
    io::{Inbound, Outbound},
};

/// Prefix every upgrade request starts with.
pub const WEBSOCKET_PREFIX: &[u8] = b"GET /";

/// RFC 6455 GUID for `Sec-WebSocket-Accept`.
const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_HEADERS: usize = 32;

/// Progress of the upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// More bytes are needed. Nothing was consumed.
    Partial,
    /// The connection is upgraded.
    Complete(UpgradeRequest),
}

/// The parts of an accepted upgrade request the host may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target, e.g. `/chat?room=1`.
    pub path: String,
    /// The client's `Sec-WebSocket-Key`.
    pub key: String,
    /// Bytes the request occupied in the inbound buffer.
    pub consumed: usize,
}

/// Peeks at the start of the buffer. `None` while fewer than five bytes are
/// available.
pub fn is_upgrade_prefix(buf: &[u8]) -> Option<bool> {
    if buf.len() < WEBSOCKET_PREFIX.len() {
        return None;
    }
    Some(buf.starts_with(WEBSOCKET_PREFIX))
}

/// Computes `Sec-WebSocket-Accept` for a client key.
pub fn compute_accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID);
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Tries to complete the upgrade from the bytes buffered in `inbound`.
///
/// Requests still incomplete after `max_size` bytes are rejected with
/// [`HandshakeError::TooLarge`].
pub fn accept<I, O>(inbound: &mut I, outbound: &mut O, max_size: usize) -> Result<Handshake>
where
    I: Inbound + ?Sized,
    O: Outbound + ?Sized,
{
    let parsed = {
        let buf = inbound.peek(max_size);
        match parse_request(buf) {
            Ok(Some(request)) => Ok(request),
            Ok(None) if inbound.buffered() >= max_size => Err(HandshakeError::TooLarge(max_size)),
            Ok(None) => return Ok(Handshake::Partial),
            Err(err) => Err(err),
        }
    };

    let request = match parsed {
        Ok(request) => request,
        Err(err) => {
            outbound.write_raw(&reject_response(&err))?;
            return Err(err.into());
        }
    };

    outbound.write_raw(&accept_response(&request.key))?;
    inbound.discard(request.consumed);
    Ok(Handshake::Complete(request))
}

/// Parses and validates an upgrade request from the front of `buf`.
///
/// `Ok(None)` means the request is not complete yet.
pub fn parse_request(buf: &[u8]) -> std::result::Result<Option<UpgradeRequest>, HandshakeError> {
    match is_upgrade_prefix(buf) {
        None => return Ok(None),
        Some(false) => return Err(HandshakeError::NotWebSocket),
        Some(true) => {}
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let consumed = match req.parse(buf) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => return Err(HandshakeError::Malformed(err.to_string())),
    };

    if req.method != Some("GET") {
        return Err(HandshakeError::NotWebSocket);
    }
    if req.version != Some(1) {
        return Err(HandshakeError::Malformed("HTTP/1.1 required".to_string()));
    }

    let headers = req.headers;
    if find_header(headers, &header::HOST).is_none() {
        return Err(HandshakeError::MissingHeader("Host"));
    }
    if !has_token(find_header(headers, &header::UPGRADE), "websocket") {
        return Err(HandshakeError::MissingHeader("Upgrade"));
    }
    if !has_token(find_header(headers, &header::CONNECTION), "upgrade") {
        return Err(HandshakeError::MissingHeader("Connection"));
    }
    match find_header(headers, &header::SEC_WEBSOCKET_VERSION) {
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Version")),
        Some(version) if version.trim_ascii() != b"13" => {
            return Err(HandshakeError::UnsupportedVersion);
        }
        Some(_) => {}
    }

    let key = find_header(headers, &header::SEC_WEBSOCKET_KEY)
        .map(|key| key.trim_ascii())
        .filter(|key| {
            BASE64_STANDARD
                .decode(key)
                .is_ok_and(|nonce| nonce.len() == 16)
        })
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;

    Ok(Some(UpgradeRequest {
        path: req.path.unwrap_or("/").to_string(),
        key: String::from_utf8_lossy(key).into_owned(),
        consumed,
    }))
}

fn find_header<'a>(headers: &[httparse::Header<'a>], name: &header::HeaderName) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name.as_str()))
        .map(|h| h.value)
}

/// Whether a comma separated header value contains `token`, ignoring case.
fn has_token(value: Option<&[u8]>, token: &str) -> bool {
    value.is_some_and(|value| {
        value
            .split(|&b| b == b',')
            .any(|part| part.trim_ascii().eq_ignore_ascii_case(token.as_bytes()))
    })
}

fn accept_response(key: &str) -> Vec<u8> {
    let status = StatusCode::SWITCHING_PROTOCOLS;
    format!(
        "HTTP/1.1 {} {}\r\n{}: websocket\r\n{}: Upgrade\r\n{}: {}\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        header::UPGRADE,
        header::CONNECTION,
        header::SEC_WEBSOCKET_ACCEPT,
        compute_accept_key(key.as_bytes()),
    )
    .into_bytes()
}

fn reject_response(err: &HandshakeError) -> Vec<u8> {
    let status = match err {
        HandshakeError::UnsupportedVersion => StatusCode::UPGRADE_REQUIRED,
        HandshakeError::TooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    let mut response = format!(
        "HTTP/1.1 {} {}\r\n{}: close\r\n{}: 0\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        header::CONNECTION,
        header::CONTENT_LENGTH,
    );
    if status == StatusCode::UPGRADE_REQUIRED {
        response.push_str("sec-websocket-version: 13\r\n");
    }
    response.push_str("\r\n");
    response.into_bytes()
}
