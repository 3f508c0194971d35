use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::frame::{Frame, OpCode};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadHalf};

/// Decodes frames off the read half of an upgraded stream.
///
/// The decoder is deliberately dumb about protocol semantics: it parses the
/// header bits, the extended lengths and the mask key, and enforces the two
/// control-frame limits plus the configured frame-size cap. Everything else,
/// including RSV validation and unmasking, belongs to the connection, which
/// owns the negotiation state those rules depend on.
pub(crate) struct FrameReader<T> {
    buf_reader: BufReader<ReadHalf<T>>,
    config: WebSocketConfig,
}

impl<T: AsyncRead> FrameReader<T> {
    pub(crate) fn new(buf_reader: BufReader<ReadHalf<T>>, config: WebSocketConfig) -> Self {
        Self { buf_reader, config }
    }

    pub(crate) async fn read_frame(&mut self) -> Result<Frame, Error> {
        let mut header = [0u8; 2];

        self.buf_reader.read_exact(&mut header).await?;

        // The first bit in the first byte in the frame tells us whether the
        // current frame is the final fragment of a message, the next three
        // are the RSV bits, and the last 4 bits are the opcode
        let final_fragment = (header[0] & 0b10000000) != 0;
        let rsv1 = (header[0] & 0b01000000) != 0;
        let rsv2 = (header[0] & 0b00100000) != 0;
        let rsv3 = (header[0] & 0b00010000) != 0;
        let opcode = OpCode::from(header[0] & 0b00001111);

        // As a rule in websockets protocol, if your opcode is a control
        // opcode(ping,pong,close), your message can't be fragmented(split
        // between multiple frames)
        if !final_fragment && opcode.is_control() {
            Err(Error::ControlFramesFragmented)?;
        }

        // According to the websocket protocol specification, the first bit of
        // the second byte of each frame is the "Mask bit", it tells us if the
        // payload is masked or not
        let masked = (header[1] & 0b10000000) != 0;

        // In the second byte of a WebSocket frame, the next 7 bits after the
        // Mask bit are used to represent the payload length, or the size of
        // the data being sent in the frame.
        let mut length = (header[1] & 0b01111111) as usize;

        // Control frames are only allowed to have a payload up to and
        // including 125 octets
        if length > 125 && opcode.is_control() {
            Err(Error::ControlFramePayloadSize)?;
        }

        if length == 126 {
            let mut be_bytes = [0u8; 2];
            self.buf_reader.read_exact(&mut be_bytes).await?;
            length = u16::from_be_bytes(be_bytes) as usize;
        } else if length == 127 {
            let mut be_bytes = [0u8; 8];
            self.buf_reader.read_exact(&mut be_bytes).await?;
            length = u64::from_be_bytes(be_bytes) as usize;
        }

        if let Some(max_frame_size) = self.config.max_frame_size {
            if length > max_frame_size {
                Err(Error::MaxFrameSize)?;
            }
        }

        // According to Websockets RFC, a client should always send masked
        // frames, while frames sent from server to a client are not masked.
        // Whether a missing key is acceptable is decided by the connection,
        // the decoder only carries the key along.
        let mask = if masked {
            let mut mask = [0u8; 4];
            self.buf_reader.read_exact(&mut mask).await?;
            Some(mask)
        } else {
            None
        };

        let mut payload = vec![0u8; length];
        self.buf_reader.read_exact(&mut payload).await?;

        Ok(Frame {
            final_fragment,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask,
            payload,
        })
    }
}
