use crate::frame::{Frame, OpCode};

/// A complete, reassembled WebSocket message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    // Function to get the payload as binary (Vec<u8>)
    pub fn as_binary(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    // Outbound messages always go out as a single unfragmented frame
    pub(crate) fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::new(true, OpCode::Text, text.into_bytes()),
            Message::Binary(data) => Frame::new(true, OpCode::Binary, data),
        }
    }
}
