/// Message framing — splits the TCP byte stream into one-message lines.
///
/// Frames on `\n` (one JSON object per line) so that split or coalesced
/// reads never corrupt message boundaries. Lines that are not valid
/// protocol JSON come out as [`Inbound::Invalid`] instead of an error:
/// a peer feeding us junk gets an ERROR reply, not a dropped connection.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Message;

/// Maximum frame length (including the newline). A frame this large is
/// not chat traffic; the connection is closed.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Codec error: oversized frame, serialization failure, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame exceeds maximum length ({MAX_FRAME_LENGTH} bytes)")]
    FrameTooLong,
    #[error("failed to serialize message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed protocol message.
    Frame(Message),
    /// A line that is not valid protocol JSON. The caller decides what to
    /// do with it; the connection stays open.
    Invalid { raw: String },
}

/// A tokio codec framing chat messages on `\n` boundaries.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                // No complete line yet. Check if the buffer is getting too large.
                if src.len() > MAX_FRAME_LENGTH {
                    return Err(CodecError::FrameTooLong);
                }
                return Ok(None);
            };

            let line_bytes = src.split_to(pos);
            src.advance(1); // skip \n

            // Tolerate \r\n terminators and skip blank keepalive lines.
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            return Ok(Some(match Message::decode(line) {
                Ok(msg) => Inbound::Frame(msg),
                Err(_) => Inbound::Invalid {
                    raw: line.to_owned(),
                },
            }));
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.encode()?;
        dst.reserve(wire.len() + 1);
        dst.put_slice(wire.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
