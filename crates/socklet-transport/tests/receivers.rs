//! Integration tests for the three receiver families.
//!
//! Each receiver is wired to an unbounded channel standing in for the HTTP
//! body or WebSocket sink, so the tests can read exactly what would have
//! gone over the wire.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use socklet_protocol::CloseReason;
use socklet_transport::{
    DetachHook, PeerAddrs, PollingFormat, PollingReceiver, Receiver, ReceiverId, StreamingFormat,
    StreamingReceiver, WebSocketMode, WebSocketReceiver,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

// =========================================================================
// Helpers
// =========================================================================

fn addrs() -> PeerAddrs {
    let local: SocketAddr = "127.0.0.1:8090".parse().unwrap();
    let remote: SocketAddr = "127.0.0.1:50123".parse().unwrap();
    PeerAddrs::new(Some(local), Some(remote))
}

/// Drains every chunk currently buffered, as strings.
fn drain(rx: &mut UnboundedReceiver<Bytes>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(chunk) = rx.try_recv() {
        out.push(String::from_utf8(chunk.to_vec()).unwrap());
    }
    out
}

fn is_ended(rx: &mut UnboundedReceiver<Bytes>) -> bool {
    matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected))
}

fn detach_log() -> (Arc<Mutex<Vec<ReceiverId>>>, DetachHook) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let hook_log = Arc::clone(&log);
    let hook: DetachHook = Box::new(move |id| hook_log.lock().unwrap().push(id));
    (log, hook)
}

// =========================================================================
// Polling
// =========================================================================

#[test]
fn test_polling_open_is_single_response() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (log, hook) = detach_log();
    let receiver = PollingReceiver::new(PollingFormat::Xhr, tx, addrs()).with_detach_hook(hook);

    assert!(receiver.open());
    assert_eq!(drain(&mut rx), ["o\n"]);
    assert!(is_ended(&mut rx));
    assert!(receiver.is_closed());
    assert_eq!(*log.lock().unwrap(), vec![receiver.id()]);

    // Anything after the first response observably fails.
    assert!(!receiver.heartbeat());
    assert!(!receiver.close(&CloseReason::normal()));
}

#[test]
fn test_polling_jsonp_wraps_message_batch() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let format = PollingFormat::jsonp(Some("callback".into())).unwrap();
    let receiver = PollingReceiver::new(format, tx, addrs());

    assert!(receiver.write(&["hi".into(), "there".into()]));
    assert_eq!(
        drain(&mut rx),
        ["callback(\"a[\\\"hi\\\",\\\"there\\\"]\");\r\n"]
    );
}

#[test]
fn test_polling_write_to_dropped_body_returns_false() {
    let (tx, rx) = mpsc::unbounded_channel();
    let receiver = PollingReceiver::new(PollingFormat::Xhr, tx, addrs());
    drop(rx);

    assert!(!receiver.open());
    assert!(receiver.is_closed());
}

#[test]
fn test_polling_exposes_addresses() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let receiver = PollingReceiver::new(PollingFormat::Xhr, tx, addrs());
    assert_eq!(receiver.local_addr(), addrs().local);
    assert_eq!(receiver.remote_addr(), addrs().remote);
}

// =========================================================================
// Streaming
// =========================================================================

#[test]
fn test_streaming_writes_prelude_then_frames() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let receiver = StreamingReceiver::new(StreamingFormat::EventSource, 4096, tx, addrs());

    assert!(receiver.open());
    assert!(receiver.write(&["x".into()]));
    assert!(receiver.heartbeat());

    assert_eq!(
        drain(&mut rx),
        ["\r\n", "data: o\r\n\r\n", "data: a[\"x\"]\r\n\r\n", "data: h\r\n\r\n"]
    );
    assert!(!receiver.is_closed());
}

#[test]
fn test_streaming_self_closes_at_response_ceiling() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (log, hook) = detach_log();
    // "o\n" is 2 bytes, each a["xxxxxxxx"]\n is 14 bytes.
    let receiver = StreamingReceiver::new(StreamingFormat::XhrStreaming, 30, tx, addrs())
        .with_detach_hook(hook);

    assert!(receiver.open());
    assert!(receiver.write(&["xxxxxxxx".into()]));
    assert!(!receiver.is_closed(), "16 bytes is under the ceiling");

    assert!(receiver.write(&["xxxxxxxx".into()]));
    assert!(receiver.is_closed(), "30 bytes reaches the ceiling");
    assert_eq!(receiver.bytes_sent(), 30);
    assert_eq!(log.lock().unwrap().len(), 1);

    // The prelude and all three frames made it; then the body ended.
    assert_eq!(drain(&mut rx).len(), 4);
    assert!(is_ended(&mut rx));
    assert!(!receiver.write(&["late".into()]));
}

#[test]
fn test_streaming_close_writes_frame_and_ends_body() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let receiver = StreamingReceiver::new(StreamingFormat::XhrStreaming, 4096, tx, addrs());
    drain(&mut rx);

    assert!(receiver.close(&CloseReason::go_away()));
    assert_eq!(drain(&mut rx), ["c[3000,\"Go away!\"]\n"]);
    assert!(is_ended(&mut rx));
}

#[test]
fn test_streaming_htmlfile_frames_are_script_blocks() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let format = StreamingFormat::htmlfile(Some("cb".into())).unwrap();
    let receiver = StreamingReceiver::new(format, 4096, tx, addrs());

    assert!(receiver.open());
    let chunks = drain(&mut rx);
    assert_eq!(chunks.len(), 2);
    assert!(chunks[0].starts_with("<!doctype html>"));
    assert_eq!(chunks[1], "<script>\np(\"o\");\n</script>\r\n");
}

// =========================================================================
// WebSocket
// =========================================================================

#[test]
fn test_websocket_framed_sends_one_message_per_frame() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let receiver = WebSocketReceiver::new(WebSocketMode::Framed, tx, addrs());

    assert!(receiver.open());
    assert!(receiver.write(&["a".into(), "b".into()]));
    assert!(receiver.close(&CloseReason::normal()));

    assert_eq!(
        drain(&mut rx),
        ["o", "a[\"a\",\"b\"]", "c[1000,\"Normal closure\"]"]
    );
    assert!(is_ended(&mut rx));
}

#[test]
fn test_websocket_raw_sends_bare_messages_only() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let receiver = WebSocketReceiver::new(WebSocketMode::Raw, tx, addrs());

    assert!(receiver.open());
    assert!(receiver.heartbeat());
    assert!(receiver.write(&["a".into(), "b".into()]));
    assert!(receiver.close(&CloseReason::normal()));

    assert_eq!(drain(&mut rx), ["a", "b"]);
    assert!(is_ended(&mut rx));
    assert!(!receiver.heartbeat());
}
