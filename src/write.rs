use crate::error::Error;
use crate::frame::Frame;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt, WriteHalf};

/// Writes server frames to the write half of an upgraded stream.
///
/// Frames leave a server unmasked, so the encoder is header + payload and
/// nothing else. Each frame goes out in a single write followed by a flush.
pub(crate) struct Writer<T> {
    write_half: WriteHalf<T>,
}

impl<T: AsyncWrite> Writer<T> {
    pub(crate) fn new(write_half: WriteHalf<T>) -> Self {
        Self { write_half }
    }

    pub(crate) async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        // The first byte of a websockets frame contains the final fragment
        // bit, and the OpCode. In (frame.final_fragment as u8) << 7 we are
        // doing a left bitwise shift, if final_fragment is true it will be
        // converted from 1 to 10000000, after that it will perform a bitwise
        // OR operation with OpCode, so if Opcode is text(0x1) the final
        // result will be 10000001, which is 129 decimal
        let first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
        let payload_len = frame.payload.len();

        let mut buffer = BytesMut::with_capacity(payload_len + 10);
        buffer.extend_from_slice(&[first_byte]);

        // According to Websockets RFC, if the payload length is less or equal
        // 125, it's written as a 8-bit unsigned integer, if it's between 126
        // and 65535 it's prefixed by 126 plus two length bytes, and above
        // that by 127 plus eight length bytes
        if payload_len <= 125 {
            buffer.extend_from_slice(&[payload_len as u8]);
        } else if payload_len <= 65535 {
            buffer.extend_from_slice(&[126]);
            buffer.extend_from_slice(&(payload_len as u16).to_be_bytes());
        } else {
            buffer.extend_from_slice(&[127]);
            buffer.extend_from_slice(&(payload_len as u64).to_be_bytes());
        }

        buffer.extend_from_slice(&frame.payload);

        self.write_half.write_all(&buffer).await?;
        self.write_half.flush().await?;

        Ok(())
    }

    /// Flushes and closes the write half, leaving the read half alone.
    pub(crate) async fn shutdown(&mut self) -> Result<(), Error> {
        self.write_half.shutdown().await?;
        Ok(())
    }
}
