#![allow(dead_code)]

use socket_pulse::close::CloseReason;
use socket_pulse::config::WebSocketConfig;
use socket_pulse::connection::{attach, ConnectionHandle};
use socket_pulse::message::Message;
use socket_pulse::request::HttpRequest;
use socket_pulse::service::Service;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader, DuplexStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{timeout, Duration};

pub const MASK_KEY: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

pub const OP_CONTINUE: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

#[derive(Debug)]
pub enum ServiceEvent {
    Connected,
    Disconnected(CloseReason),
    Received(Message),
}

/// Forwards every callback into a channel the test can assert on.
pub struct RecordingService {
    events: UnboundedSender<ServiceEvent>,
    timeout: Option<u64>,
}

impl RecordingService {
    pub fn new(events: UnboundedSender<ServiceEvent>, timeout: Option<u64>) -> Self {
        Self { events, timeout }
    }
}

impl Service for RecordingService {
    fn connected(&self, _connection: &ConnectionHandle) {
        let _ = self.events.send(ServiceEvent::Connected);
    }

    fn disconnected(&self, _connection: &ConnectionHandle, reason: CloseReason) {
        let _ = self.events.send(ServiceEvent::Disconnected(reason));
    }

    fn received(&self, _connection: &ConnectionHandle, message: Message) {
        let _ = self.events.send(ServiceEvent::Received(message));
    }

    fn connection_timeout(&self) -> Option<u64> {
        self.timeout
    }
}

pub fn upgrade_request(extensions: Option<&str>) -> HttpRequest {
    let mut headers = HashMap::new();
    headers.insert(String::from("host"), String::from("localhost:9002"));
    headers.insert(String::from("connection"), String::from("Upgrade"));
    headers.insert(String::from("upgrade"), String::from("websocket"));
    headers.insert(
        String::from("sec-websocket-key"),
        String::from("dGhlIHNhbXBsZSBub25jZQ=="),
    );
    if let Some(value) = extensions {
        headers.insert(String::from("sec-websocket-extensions"), value.to_string());
    }

    HttpRequest {
        method: String::from("GET"),
        uri: String::from("/"),
        version: 1,
        headers,
    }
}

/// Wires a connection engine to one end of an in-memory duplex pipe and
/// plays the client on the other end.
pub fn attach_connection(
    timeout_seconds: Option<u64>,
    config: WebSocketConfig,
    extensions: Option<&str>,
) -> (
    DuplexStream,
    ConnectionHandle,
    UnboundedReceiver<ServiceEvent>,
) {
    let (client, server) = tokio::io::duplex(1024 * 1024);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let service = Arc::new(RecordingService::new(events_tx, timeout_seconds));

    let (read_half, write_half) = tokio::io::split(server);
    let handle = attach(
        BufReader::new(read_half),
        write_half,
        upgrade_request(extensions),
        service,
        config,
    );

    (client, handle, events_rx)
}

pub fn attach_default() -> (
    DuplexStream,
    ConnectionHandle,
    UnboundedReceiver<ServiceEvent>,
) {
    attach_connection(None, WebSocketConfig::default(), None)
}

fn frame_bytes(first_byte: u8, masked: bool, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![first_byte];
    let mask_bit = if masked { 0x80 } else { 0x00 };

    match payload.len() {
        0..=125 => out.push(mask_bit | payload.len() as u8),
        126..=65535 => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        _ => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
    }

    if masked {
        out.extend_from_slice(&MASK_KEY);
        out.extend(
            payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ MASK_KEY[i % 4]),
        );
    } else {
        out.extend_from_slice(payload);
    }

    out
}

/// A well-formed masked client frame.
pub fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
    frame_bytes(((fin as u8) << 7) | (opcode & 0x0F), true, payload)
}

/// A client frame without the mandatory mask.
pub fn unmasked_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
    frame_bytes(((fin as u8) << 7) | (opcode & 0x0F), false, payload)
}

/// A masked client frame with full control over the first header byte, for
/// poking at RSV bits.
pub fn client_frame_raw(first_byte: u8, payload: &[u8]) -> Vec<u8> {
    frame_bytes(first_byte, true, payload)
}

/// Reads one frame the server wrote. Panics on a masked frame, servers must
/// never mask.
pub async fn read_server_frame(stream: &mut DuplexStream) -> (bool, u8, Vec<u8>) {
    let mut header = [0u8; 2];
    stream
        .read_exact(&mut header)
        .await
        .expect("expected a frame header from the server");

    let fin = header[0] & 0x80 != 0;
    let opcode = header[0] & 0x0F;
    assert_eq!(header[1] & 0x80, 0, "server frames must not be masked");

    let mut length = (header[1] & 0x7F) as usize;
    if length == 126 {
        let mut bytes = [0u8; 2];
        stream.read_exact(&mut bytes).await.unwrap();
        length = u16::from_be_bytes(bytes) as usize;
    } else if length == 127 {
        let mut bytes = [0u8; 8];
        stream.read_exact(&mut bytes).await.unwrap();
        length = u64::from_be_bytes(bytes) as usize;
    }

    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await.unwrap();

    (fin, opcode, payload)
}

pub async fn expect_close_frame(stream: &mut DuplexStream, code: u16, description: Option<&str>) {
    let (fin, opcode, payload) = read_server_frame(stream).await;
    assert!(fin, "close frames are never fragmented");
    assert_eq!(opcode, OP_CLOSE);
    assert!(payload.len() >= 2, "expected a status code in the close frame");
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), code);
    match description {
        Some(expected) => {
            assert_eq!(std::str::from_utf8(&payload[2..]).unwrap(), expected);
        }
        None => assert_eq!(payload.len(), 2),
    }
}

pub async fn expect_eof(stream: &mut DuplexStream) {
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for the server to close the stream")
        .expect("expected a clean end of stream");
    assert_eq!(read, 0, "expected the server to close the stream");
}

/// Asserts the server writes nothing for a little while.
pub async fn expect_silence(stream: &mut DuplexStream) {
    let mut buf = [0u8; 1];
    let result = timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
    assert!(result.is_err(), "expected no more data from the server");
}

pub async fn next_event(events: &mut UnboundedReceiver<ServiceEvent>) -> ServiceEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a service event")
        .expect("the connection dropped its service without an event")
}

pub async fn expect_connected(events: &mut UnboundedReceiver<ServiceEvent>) {
    match next_event(events).await {
        ServiceEvent::Connected => {}
        other => panic!("expected the connected callback, got {:?}", other),
    }
}

pub async fn expect_disconnected(
    events: &mut UnboundedReceiver<ServiceEvent>,
    reason: CloseReason,
) {
    match next_event(events).await {
        ServiceEvent::Disconnected(actual) => assert_eq!(actual, reason),
        other => panic!("expected the disconnected callback, got {:?}", other),
    }
}

pub async fn expect_text(events: &mut UnboundedReceiver<ServiceEvent>, expected: &str) {
    match next_event(events).await {
        ServiceEvent::Received(Message::Text(text)) => assert_eq!(text, expected),
        other => panic!("expected a text message, got {:?}", other),
    }
}

pub async fn expect_binary(events: &mut UnboundedReceiver<ServiceEvent>, expected: &[u8]) {
    match next_event(events).await {
        ServiceEvent::Received(Message::Binary(data)) => assert_eq!(data, expected),
        other => panic!("expected a binary message, got {:?}", other),
    }
}

/// Asserts the service hears nothing more, ever: the engine dropped its
/// service reference, so the event channel just closes.
pub async fn expect_no_more_events(events: &mut UnboundedReceiver<ServiceEvent>) {
    let outcome = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for the connection to finish");
    assert!(
        outcome.is_none(),
        "expected no further service events, got {:?}",
        outcome
    );
}
