use httparse::Error as HttpParseError;
use std::io;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    // Handshake Errors
    #[error("Invalid handshake request method and version")]
    InvalidHTTPHandshake,

    #[error("Connection: Upgrade header missing in the request")]
    NoConnectionHeaderPresent,

    #[error("Upgrade: websocket header missing in the request")]
    NoUpgradeHeaderPresent,

    #[error("Host header missing in the request")]
    NoHostHeaderPresent,

    #[error("Couldn't find Sec-WebSocket-Key header in the request")]
    NoSecWebsocketKey,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: HttpParseError,
    },

    #[error("Incomplete HTTP request")]
    IncompleteHTTPRequest,

    // Framing Errors
    //
    // The display texts double as the close-frame descriptions the engine
    // sends back before failing the connection, so they are worded for the
    // peer, not for a stack trace.
    #[error("Control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("Control frames are only allowed to have payload up to and including 125 octets")]
    ControlFramePayloadSize,

    #[error("Frames must be smaller than the configured maximum acceptable frame size")]
    MaxFrameSize,
}
