//! Drives `ConnectionContext` directly with in-memory buffers, the way a
//! readiness-based event loop would.

use bytes::{Bytes, BytesMut};
use hpx_wsengine::{
    Action, CloseCause, Config, ConnectionContext, ConnectionId, Error, Frame, Message, OpCode,
    Phase, ProtocolError,
    codec::{FrameParser, ReadState, Role},
};
use tokio::time::Instant;

const REQUEST: &[u8] = b"GET /ws HTTP/1.1\r\n\
    Host: localhost:9090\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 13\r\n\r\n";

const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

fn client_bytes(frames: &[Frame]) -> BytesMut {
    let mut buf = BytesMut::new();
    for frame in frames {
        frame.clone().with_mask(MASK).encode(&mut buf);
    }
    buf
}

fn new_context() -> ConnectionContext {
    ConnectionContext::new(ConnectionId(1), &Config::default(), Instant::now())
}

fn open_context() -> ConnectionContext {
    let mut ctx = new_context();
    let mut inbound = BytesMut::from(REQUEST);
    let mut outbound = BytesMut::new();
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |_| {})
        .unwrap();
    assert!(ctx.is_upgraded());
    ctx
}

/// Server frames written to `outbound`, skipping a leading 101 response.
fn server_frames(outbound: &[u8]) -> Vec<Frame> {
    let start = if outbound.starts_with(b"HTTP/1.1") {
        outbound
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| pos + 4)
            .unwrap()
    } else {
        0
    };
    let mut buf = BytesMut::from(&outbound[start..]);
    let mut parser = FrameParser::new(Role::Client, 1 << 20);
    let mut frames = Vec::new();
    while let Some(frame) = parser.parse(&mut buf).unwrap() {
        frames.push(frame);
    }
    assert!(buf.is_empty(), "trailing bytes in outbound");
    frames
}

/// Feeds `chunks` one readiness event at a time into a fresh context.
fn feed(chunks: &[&[u8]]) -> (Vec<Message>, BytesMut) {
    let mut ctx = new_context();
    let mut inbound = BytesMut::new();
    let mut outbound = BytesMut::new();
    let mut messages = Vec::new();

    for chunk in chunks {
        inbound.extend_from_slice(chunk);
        let action = ctx
            .on_readable(&mut inbound, &mut outbound, Instant::now(), |m| {
                messages.push(m)
            })
            .unwrap();
        assert_eq!(action, Action::Continue);
    }
    assert!(inbound.is_empty());
    assert!(ctx.is_upgraded());
    (messages, outbound)
}

fn sample_stream() -> Vec<u8> {
    let mut stream = REQUEST.to_vec();
    stream.extend_from_slice(&client_bytes(&[
        Frame::text("hello"),
        Frame::binary(vec![0xAB; 300]),
        Frame::text("frag-").with_fin(false),
        Frame::ping("p1"),
        Frame::continuation("ment").with_fin(false),
        Frame::continuation("ed"),
        Frame::pong("unsolicited"),
        Frame::binary(Bytes::new()),
    ]));
    stream
}

#[test]
fn any_two_way_split_yields_the_same_messages() {
    let stream = sample_stream();
    let (expected, expected_out) = feed(&[&stream]);

    assert_eq!(expected.len(), 4);
    assert_eq!(expected[0].as_text(), Some("hello"));
    assert_eq!(expected[1].payload().len(), 300);
    assert_eq!(expected[2].as_text(), Some("frag-mented"));
    assert!(expected[3].payload().is_empty());

    for at in 0..=stream.len() {
        let (messages, outbound) = feed(&[&stream[..at], &stream[at..]]);
        assert_eq!(messages, expected, "split at {at}");
        assert_eq!(outbound, expected_out, "split at {at}");
    }
}

#[test]
fn byte_at_a_time_yields_the_same_messages() {
    let stream = sample_stream();
    let (expected, expected_out) = feed(&[&stream]);

    let chunks: Vec<&[u8]> = stream.chunks(1).collect();
    let (messages, outbound) = feed(&chunks);
    assert_eq!(messages, expected);
    assert_eq!(outbound, expected_out);
}

#[test]
fn ping_between_fragments_is_answered_first() {
    let mut ctx = open_context();
    let mut outbound = BytesMut::new();
    let mut messages = Vec::new();

    let mut inbound = client_bytes(&[Frame::text("part1").with_fin(false), Frame::ping("hb")]);
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |m| {
        messages.push(m)
    })
    .unwrap();

    let frames = server_frames(&outbound);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode(), OpCode::Pong);
    assert_eq!(&frames[0].payload()[..], b"hb");
    assert!(messages.is_empty());
    assert!(ctx.is_accumulating());

    let mut inbound = client_bytes(&[Frame::continuation("part2")]);
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |m| {
        messages.push(m)
    })
    .unwrap();

    assert_eq!(server_frames(&outbound).len(), 1);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].opcode(), OpCode::Text);
    assert_eq!(messages[0].as_text(), Some("part1part2"));
    assert!(!ctx.is_accumulating());
}

#[test]
fn continuation_without_start_closes_the_connection() {
    let mut ctx = open_context();
    let mut inbound = client_bytes(&[Frame::continuation("x"), Frame::text("never")]);
    let mut outbound = BytesMut::new();
    let mut messages = Vec::new();

    let err = ctx
        .on_readable(&mut inbound, &mut outbound, Instant::now(), |m| {
            messages.push(m)
        })
        .unwrap_err();

    assert!(err.is_protocol_error());
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::ContinuationWithoutStart)
    ));
    assert_eq!(err.cause(), CloseCause::Protocol);
    assert!(messages.is_empty());
    assert_eq!(ctx.phase(), Phase::Closed);

    let frames = server_frames(&outbound);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode(), OpCode::Close);
    assert_eq!(&frames[0].payload()[..2], &1002u16.to_be_bytes());
}

#[test]
fn handshake_split_inside_a_header_line() {
    let split = REQUEST
        .windows(b"webs".len())
        .position(|w| w == b"webs")
        .unwrap()
        + 2;

    let mut ctx = new_context();
    let mut inbound = BytesMut::from(&REQUEST[..split]);
    let mut outbound = BytesMut::new();

    let action = ctx
        .on_readable(&mut inbound, &mut outbound, Instant::now(), |_| {})
        .unwrap();
    assert_eq!(action, Action::Continue);
    assert!(!ctx.is_upgraded());
    assert_eq!(inbound.len(), split);
    assert!(outbound.is_empty());

    inbound.extend_from_slice(&REQUEST[split..]);
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |_| {})
        .unwrap();
    assert!(ctx.is_upgraded());
    assert!(inbound.is_empty());
    assert!(outbound.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
}

#[test]
fn header_survives_until_payload_arrives() {
    let mut ctx = open_context();
    let bytes = client_bytes(&[Frame::binary(vec![5u8; 1000])]);
    let mut outbound = BytesMut::new();
    let mut messages = Vec::new();

    // 2 + 2 + 4 header bytes, then part of the payload
    let mut inbound = BytesMut::from(&bytes[..100]);
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |m| {
        messages.push(m)
    })
    .unwrap();
    assert!(messages.is_empty());
    assert!(matches!(ctx.read_state(), ReadState::Payload(h) if h.payload_len == 1000));

    inbound.extend_from_slice(&bytes[100..]);
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |m| {
        messages.push(m)
    })
    .unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].payload().iter().all(|&b| b == 5));
    assert_eq!(*ctx.read_state(), ReadState::Header);
}

#[test]
fn binary_round_trip_single_and_fragmented() {
    for len in [0usize, 1, 125, 126, 65535, 65537] {
        let payload: Bytes = (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();

        let fragments = if len < 2 {
            vec![
                Frame::binary(Bytes::new()).with_fin(false),
                Frame::continuation(payload.clone()),
            ]
        } else {
            Frame::binary(payload.clone()).into_fragments(len.div_ceil(2))
        };
        assert!(fragments.len() >= 2);

        for frames in [vec![Frame::binary(payload.clone())], fragments] {
            let mut ctx = open_context();
            let mut inbound = client_bytes(&frames);
            let mut outbound = BytesMut::new();
            let mut messages = Vec::new();

            ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |m| {
                messages.push(m)
            })
            .unwrap();

            assert_eq!(messages.len(), 1, "len {len}, {} frames", frames.len());
            assert_eq!(messages[0].opcode(), OpCode::Binary);
            assert_eq!(messages[0].payload(), &payload, "len {len}");

            // echo it back and check the server encoding
            ctx.send(&messages[0].clone().into_frame(), &mut outbound)
                .unwrap();
            let echoed = server_frames(&outbound);
            assert_eq!(echoed.len(), 1);
            assert!(echoed[0].mask().is_none());
            assert_eq!(echoed[0].payload(), &payload);
        }
    }
}

#[test]
fn oversized_frame_is_rejected_before_payload_arrives() {
    let config = Config::default().max_frame_size(1024).max_message_size(4096);
    let mut ctx = ConnectionContext::new(ConnectionId(9), &config, Instant::now());
    let mut inbound = BytesMut::from(REQUEST);
    let mut outbound = BytesMut::new();
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |_| {})
        .unwrap();

    let bytes = client_bytes(&[Frame::binary(vec![0u8; 2048])]);
    inbound.extend_from_slice(&bytes[..8]);
    let err = ctx
        .on_readable(&mut inbound, &mut outbound, Instant::now(), |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::FrameTooLarge)));
}

#[test]
fn eof_mid_frame_is_truncated_but_benign() {
    let mut ctx = open_context();
    let bytes = client_bytes(&[Frame::text("cut short")]);
    let mut inbound = BytesMut::from(&bytes[..4]);
    let mut outbound = BytesMut::new();
    ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |_| {})
        .unwrap();

    let cause = ctx.on_eof(&inbound);
    assert_eq!(cause, CloseCause::Eof { truncated: true });
    assert!(cause.is_benign());
    assert!(matches!(
        ctx.on_readable(&mut inbound, &mut outbound, Instant::now(), |_| {}),
        Err(Error::Closed)
    ));
}
