//! The per-connection protocol engine.
//!
//! Every upgraded socket gets one engine task that owns the write half and
//! the whole protocol state: reassembly of fragmented messages, masking and
//! RSV enforcement, the closing handshake and the heartbeat. A companion
//! reader task decodes frames off the read half and forwards them into the
//! engine's event queue; outbound calls made through a [`ConnectionHandle`]
//! land on the same queue. The engine therefore observes one serial schedule
//! per connection and needs no locks, while handles stay cheap to clone and
//! safe to use from any thread.

use crate::close::{self, ClosePayloadError, CloseReason};
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::extensions::parse_extensions;
use crate::frame::{Frame, OpCode};
use crate::message::Message;
use crate::read::FrameReader;
use crate::request::HttpRequest;
use crate::service::Service;
use crate::utils::generate_connection_id;
use crate::write::Writer;
use log::{debug, warn};
use std::io;
use std::mem;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use uuid::Uuid;

const SEC_WEBSOCKET_EXTENSIONS: &str = "sec-websocket-extensions";

const UNMASKED_FRAME: &str = "Received a frame from a client that wasn't masked";
const STRAY_CONTINUATION: &str = "Continuation sent with prior binary or text frame";
const INVALID_UTF8: &str = "Failed to convert received payload to UTF-8 String";
const CLOSE_PAYLOAD_LENGTH: &str =
    "Close frames, that have a payload, must be between 2 and 125 octets inclusive";
const MESSAGE_TOO_LARGE: &str =
    "Received a message larger than the configured maximum message size";
const RSV_DESCRIPTION_SUFFIX: &str =
    " must be 0 unless negotiated to define meaning for non-zero values";

/// Outbound operations, marshalled onto the engine task.
pub(crate) enum Command {
    Send(Message),
    Ping(Vec<u8>),
    Close {
        reason: Option<CloseReason>,
        description: Option<String>,
    },
    Shutdown {
        reason: Option<CloseReason>,
        description: Option<String>,
    },
}

/// Everything the engine task reacts to, in arrival order.
pub(crate) enum Event {
    Frame(Result<Frame, Error>),
    Command(Command),
    /// Produced by the engine's own idle timer, never sent over the queue
    Idle,
}

/// A cheap, cloneable way to talk to a running connection from anywhere.
///
/// All operations are fire-and-forget: they enqueue work for the connection
/// task and return immediately. Once the connection is closing or gone the
/// work is silently discarded, which makes handles safe to hold on to for
/// longer than the connection lives.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    events: UnboundedSender<Event>,
}

impl ConnectionHandle {
    /// The random 128-bit identifier of this connection.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn send(&self, message: Message) {
        self.enqueue(Command::Send(message));
    }

    pub fn send_text(&self, text: String) {
        self.send(Message::Text(text));
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        self.send(Message::Binary(data));
    }

    /// Sends a ping frame with the given payload, empty is fine.
    pub fn ping(&self, payload: Vec<u8>) {
        self.enqueue(Command::Ping(payload));
    }

    /// Starts a closing handshake and keeps reading until the peer answers
    /// with its own close frame. The reason defaults to a normal closure.
    pub fn close(&self, reason: Option<CloseReason>, description: Option<String>) {
        self.enqueue(Command::Close {
            reason,
            description,
        });
    }

    /// Sends a close frame and then shuts the write half down once it is
    /// flushed, without waiting for the peer's answer.
    pub fn shutdown(&self, reason: Option<CloseReason>, description: Option<String>) {
        self.enqueue(Command::Shutdown {
            reason,
            description,
        });
    }

    fn enqueue(&self, command: Command) {
        if self.events.send(Event::Command(command)).is_err() {
            debug!("connection {} is already detached, dropping command", self.id);
        }
    }
}

/// Reassembly mode across fragmented frames.
#[derive(Debug, Clone, Copy, PartialEq)]
enum MessageState {
    Unknown,
    Text,
    Binary,
}

/// Whether the engine loop keeps going after handling one event.
enum Flow {
    Continue,
    Stop,
}

struct Connection<T, S> {
    id: Uuid,
    request: HttpRequest,
    service: Arc<S>,
    handle: ConnectionHandle,
    writer: Writer<T>,
    reader_task: JoinHandle<()>,
    config: WebSocketConfig,
    message_state: MessageState,
    message_buffer: Vec<u8>,
    rsv_errors: Vec<&'static str>,
    extension_negotiated: bool,
    connection_timeout: Option<u64>,
    waiting_for_pong: bool,
    await_close: bool,
    disconnected_fired: bool,
    writable: bool,
    last_io: Instant,
}

/// Wires an upgraded stream into a running connection engine.
///
/// The `BufReader` must sit exactly past the upgrade response, any bytes it
/// already buffered are treated as the start of the frame stream. The
/// service's `connected` callback fires on the new task before the first
/// frame is processed.
pub fn attach<T, S>(
    buf_reader: BufReader<ReadHalf<T>>,
    write_half: WriteHalf<T>,
    request: HttpRequest,
    service: Arc<S>,
    config: WebSocketConfig,
) -> ConnectionHandle
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    S: Service,
{
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let id = generate_connection_id();
    let handle = ConnectionHandle {
        id,
        events: event_tx.clone(),
    };

    let reader = FrameReader::new(buf_reader, config.clone());
    let reader_task = tokio::spawn(read_loop(reader, event_tx));

    // "Negotiated" deliberately looks at the client's offer only: this
    // engine accepts no extension in its handshake response, but a client
    // that offered permessage-deflate may still set RSV1 and the failure
    // mode for that belongs to the compression layer, not to us.
    let extension_negotiated = request
        .header(SEC_WEBSOCKET_EXTENSIONS)
        .and_then(parse_extensions)
        .map(|extensions| extensions.permessage_deflate)
        .unwrap_or(false);

    let connection_timeout = service.connection_timeout();

    let connection = Connection {
        id,
        request,
        service,
        handle: handle.clone(),
        writer: Writer::new(write_half),
        reader_task,
        config,
        message_state: MessageState::Unknown,
        message_buffer: Vec::new(),
        rsv_errors: Vec::new(),
        extension_negotiated,
        connection_timeout,
        waiting_for_pong: false,
        await_close: false,
        disconnected_fired: false,
        writable: true,
        last_io: Instant::now(),
    };

    tokio::spawn(connection.run(event_rx));

    handle
}

/// Decodes frames until the stream errors out or the engine goes away.
async fn read_loop<T: AsyncRead>(mut reader: FrameReader<T>, events: UnboundedSender<Event>) {
    loop {
        let result = reader.read_frame().await;
        let stop = result.is_err();
        if events.send(Event::Frame(result)).is_err() || stop {
            // The engine is gone, or the frame stream is beyond recovery
            break;
        }
    }
}

impl<T, S> Connection<T, S>
where
    T: AsyncWrite,
    S: Service,
{
    async fn run(mut self, mut events: UnboundedReceiver<Event>) {
        debug!("connection {} attached for {}", self.id, self.request.uri);
        self.service.connected(&self.handle);

        let idle_interval = self
            .connection_timeout
            .map(|seconds| Duration::from_millis(seconds.saturating_mul(500)));

        loop {
            let idle_deadline = self.last_io + idle_interval.unwrap_or_default();

            let event = tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => event,
                    // The reader and every handle are gone, nothing can
                    // reach this connection anymore
                    None => break,
                },
                _ = sleep_until(idle_deadline), if idle_interval.is_some() => Event::Idle,
            };

            let flow = match event {
                Event::Frame(Ok(frame)) => {
                    self.last_io = Instant::now();
                    self.on_frame(frame).await
                }
                Event::Frame(Err(error)) => self.on_read_error(error).await,
                Event::Command(command) => self.on_command(command).await,
                Event::Idle => self.on_idle().await,
            };

            if let Flow::Stop = flow {
                break;
            }
        }

        self.detach().await;
    }

    /// Handles one decoded inbound frame: at most one service callback, zero
    /// or more outbound frames, all before the next frame is looked at.
    async fn on_frame(&mut self, mut frame: Frame) -> Flow {
        if !self.validate_rsv(&frame) {
            let description = format!("{}{}", self.rsv_errors.join(","), RSV_DESCRIPTION_SUFFIX);
            self.rsv_errors.clear();
            return self
                .connection_closed(CloseReason::ProtocolError, Some(description), true)
                .await;
        }

        let masked = frame.mask.is_some();
        frame.unmask();

        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if !masked {
                    return self
                        .connection_closed(
                            CloseReason::ProtocolError,
                            Some(String::from(UNMASKED_FRAME)),
                            true,
                        )
                        .await;
                }
                if self.message_state != MessageState::Unknown {
                    let kind = if frame.opcode == OpCode::Text {
                        "text"
                    } else {
                        "binary"
                    };
                    return self
                        .connection_closed(
                            CloseReason::ProtocolError,
                            Some(format!("A {} frame must be the first in the message", kind)),
                            true,
                        )
                        .await;
                }
                if frame.final_fragment {
                    self.deliver(frame.opcode == OpCode::Text, frame.payload).await
                } else {
                    self.message_state = if frame.opcode == OpCode::Text {
                        MessageState::Text
                    } else {
                        MessageState::Binary
                    };
                    self.message_buffer = frame.payload;
                    Flow::Continue
                }
            }
            OpCode::Continue => {
                if self.message_state == MessageState::Unknown {
                    return self
                        .connection_closed(
                            CloseReason::ProtocolError,
                            Some(String::from(STRAY_CONTINUATION)),
                            true,
                        )
                        .await;
                }
                self.message_buffer.extend_from_slice(&frame.payload);
                if let Some(max_message_size) = self.config.max_message_size {
                    if self.message_buffer.len() > max_message_size {
                        self.message_state = MessageState::Unknown;
                        self.message_buffer = Vec::new();
                        return self
                            .connection_closed(
                                CloseReason::MessageTooLarge,
                                Some(String::from(MESSAGE_TOO_LARGE)),
                                true,
                            )
                            .await;
                    }
                }
                if frame.final_fragment {
                    let text = self.message_state == MessageState::Text;
                    let payload = mem::take(&mut self.message_buffer);
                    self.message_state = MessageState::Unknown;
                    self.deliver(text, payload).await
                } else {
                    Flow::Continue
                }
            }
            OpCode::Close => self.on_close_frame(frame.payload).await,
            OpCode::Ping => {
                // A pong reply is the one frame still allowed after we sent
                // our own close frame
                if self.writable {
                    if let Err(error) = self
                        .write_frame(Frame::new(true, OpCode::Pong, frame.payload))
                        .await
                    {
                        warn!("connection {} failed to write pong: {}", self.id, error);
                    }
                }
                Flow::Continue
            }
            OpCode::Pong => {
                if self.waiting_for_pong {
                    self.waiting_for_pong = false;
                }
                Flow::Continue
            }
            OpCode::Reserved(code) => {
                self.connection_closed(
                    CloseReason::ProtocolError,
                    Some(format!(
                        "Parsed a frame with an invalid operation code of {}",
                        code
                    )),
                    true,
                )
                .await
            }
        }
    }

    /// RSV1 is tolerated when the client offered permessage-deflate, RSV2
    /// and RSV3 never are. Offending bit names are collected so the close
    /// description can list all of them at once.
    fn validate_rsv(&mut self, frame: &Frame) -> bool {
        if frame.rsv1 && !self.extension_negotiated {
            self.rsv_errors.push("RSV1");
        }
        if frame.rsv2 {
            self.rsv_errors.push("RSV2");
        }
        if frame.rsv3 {
            self.rsv_errors.push("RSV3");
        }
        self.rsv_errors.is_empty()
    }

    /// Hands a complete message to the service. The text opcode MUST be
    /// encoded as UTF-8, a zero-length payload is simply the empty string.
    async fn deliver(&mut self, text: bool, payload: Vec<u8>) -> Flow {
        if text {
            match String::from_utf8(payload) {
                Ok(content) => {
                    self.service.received(&self.handle, Message::Text(content));
                    Flow::Continue
                }
                Err(_) => {
                    self.connection_closed(
                        CloseReason::InvalidDataContents,
                        Some(String::from(INVALID_UTF8)),
                        true,
                    )
                    .await
                }
            }
        } else {
            self.service.received(&self.handle, Message::Binary(payload));
            Flow::Continue
        }
    }

    async fn on_close_frame(&mut self, payload: Vec<u8>) -> Flow {
        match close::decode_close_payload(&payload) {
            Ok((reason, description)) => {
                debug!(
                    "connection {} received close frame: {:?} {:?}",
                    self.id, reason, description
                );
                // Echo the (normalized) reason back and surface it. When we
                // initiated the close ourselves this is the peer's answer,
                // and awaitClose already suppresses a second close frame.
                self.connection_closed(reason, None, true).await
            }
            Err(ClosePayloadError::InvalidLength) => {
                self.connection_closed(
                    CloseReason::ProtocolError,
                    Some(String::from(CLOSE_PAYLOAD_LENGTH)),
                    true,
                )
                .await
            }
            Err(ClosePayloadError::InvalidUtf8) => {
                self.connection_closed(
                    CloseReason::InvalidDataContents,
                    Some(String::from(INVALID_UTF8)),
                    true,
                )
                .await
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Send(message) => {
                if self.can_transmit() {
                    if let Err(error) = self.write_frame(message.into_frame()).await {
                        warn!("connection {} failed to write message: {}", self.id, error);
                    }
                } else {
                    debug!(
                        "connection {} is closing, discarding outbound message",
                        self.id
                    );
                }
                Flow::Continue
            }
            Command::Ping(payload) => {
                if self.can_transmit() {
                    if let Err(error) = self
                        .write_frame(Frame::new(true, OpCode::Ping, payload))
                        .await
                    {
                        warn!("connection {} failed to write ping: {}", self.id, error);
                    }
                }
                Flow::Continue
            }
            Command::Close {
                reason,
                description,
            } => self.local_close(reason, description, false).await,
            Command::Shutdown {
                reason,
                description,
            } => self.local_close(reason, description, true).await,
        }
    }

    /// A close requested on this side. Soft closes keep reading until the
    /// peer answers; hard closes shut the write half down after the flush.
    async fn local_close(
        &mut self,
        reason: Option<CloseReason>,
        description: Option<String>,
        hard_close: bool,
    ) -> Flow {
        if !self.writable {
            // Nothing can be written anymore, close the channel directly
            return Flow::Stop;
        }
        if !self.await_close {
            let reason = reason.unwrap_or(CloseReason::Normal);
            let payload = close::encode_close_payload(reason, description.as_deref());
            if let Err(error) = self.write_frame(Frame::new(true, OpCode::Close, payload)).await {
                warn!(
                    "connection {} failed to write close frame: {}",
                    self.id, error
                );
            }
            self.await_close = true;
        }
        if hard_close {
            self.shutdown_output().await;
        }
        // Keep reading until the peer answers with its own close or goes away
        Flow::Continue
    }

    async fn on_idle(&mut self) -> Flow {
        if self.waiting_for_pong || self.await_close {
            // A whole heartbeat cycle passed without an answer (or without
            // the peer finishing the close handshake), the peer is presumed
            // unreachable. No close frame on this path, the channel just
            // goes away.
            debug!("connection {} missed a heartbeat, dropping the channel", self.id);
            return Flow::Stop;
        }
        self.waiting_for_pong = true;
        if self.writable {
            if let Err(error) = self
                .write_frame(Frame::new(true, OpCode::Ping, Vec::new()))
                .await
            {
                warn!(
                    "connection {} failed to write heartbeat ping: {}",
                    self.id, error
                );
            }
        }
        Flow::Continue
    }

    /// Maps decoder errors onto close reasons.
    async fn on_read_error(&mut self, error: Error) -> Flow {
        match &error {
            Error::IOError { source } if is_channel_inactive(source) => {
                debug!("connection {} channel went inactive: {}", self.id, source);
                // disconnected fires on detach, with no reason code
            }
            Error::ControlFramesFragmented
            | Error::ControlFramePayloadSize
            | Error::MaxFrameSize => {
                self.connection_closed(
                    CloseReason::ProtocolError,
                    Some(error.to_string()),
                    true,
                )
                .await;
            }
            _ => {
                self.connection_closed(CloseReason::ServerError, Some(error.to_string()), true)
                    .await;
            }
        }
        Flow::Stop
    }

    /// Converges every close path that puts a close frame on the wire: the
    /// echo to a peer close, protocol violations and payload errors.
    async fn connection_closed(
        &mut self,
        reason: CloseReason,
        description: Option<String>,
        hard_close: bool,
    ) -> Flow {
        if self.writable && !self.await_close {
            let payload = close::encode_close_payload(reason, description.as_deref());
            if let Err(error) = self.write_frame(Frame::new(true, OpCode::Close, payload)).await {
                debug!(
                    "connection {} failed to write close frame: {}",
                    self.id, error
                );
            }
            self.await_close = true;
        }
        if hard_close {
            self.shutdown_output().await;
        }
        self.fire_disconnected(reason);
        Flow::Stop
    }

    fn can_transmit(&self) -> bool {
        self.writable && !self.await_close
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let result = self.writer.write_frame(frame).await;
        if result.is_err() {
            self.writable = false;
        }
        self.last_io = Instant::now();
        result
    }

    async fn shutdown_output(&mut self) {
        if self.writable {
            self.writable = false;
            if let Err(error) = self.writer.shutdown().await {
                debug!(
                    "connection {} failed to shut the write half down: {}",
                    self.id, error
                );
            }
        }
    }

    fn fire_disconnected(&mut self, reason: CloseReason) {
        if !self.disconnected_fired {
            self.disconnected_fired = true;
            self.service.disconnected(&self.handle, reason);
        }
    }

    async fn detach(&mut self) {
        self.reader_task.abort();
        self.shutdown_output().await;
        self.fire_disconnected(CloseReason::NoReasonCodeSent);
        debug!("connection {} detached", self.id);
    }
}

fn is_channel_inactive(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
