//! gRPC length-prefixed message framing.
//!
//! `[1 byte compressed flag][4 bytes big-endian length][message]`

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Length of the message prefix.
pub const PREFIX_LEN: usize = 5;

/// One framed message, still compressed if `compressed` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub compressed: bool,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum State {
    #[default]
    ReadingMetadata,
    ReadingMessageData {
        compressed: bool,
        length: usize,
    },
}

/// Incremental decoder for a stream of framed messages. Bytes can arrive in
/// any split, down to one byte at a time.
#[derive(Debug, Default)]
pub struct MessageReader {
    buffer: BytesMut,
    state: State,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet part of a returned message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True between messages with nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.state == State::ReadingMetadata && self.buffer.is_empty()
    }

    /// Next complete message, if the buffer holds one.
    pub fn next_message(&mut self) -> Option<RawMessage> {
        loop {
            match self.state {
                State::ReadingMetadata => {
                    if self.buffer.len() < PREFIX_LEN {
                        return None;
                    }
                    let compressed = self.buffer.get_u8() > 0;
                    let length = self.buffer.get_u32() as usize;
                    self.state = State::ReadingMessageData { compressed, length };
                }
                State::ReadingMessageData { compressed, length } => {
                    if self.buffer.len() < length {
                        return None;
                    }
                    let payload = self.buffer.split_to(length).freeze();
                    self.state = State::ReadingMetadata;
                    return Some(RawMessage { compressed, payload });
                }
            }
        }
    }
}

/// Frame `payload` with its prefix.
pub fn encode_message(compressed: bool, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREFIX_LEN + payload.len());
    buf.put_u8(compressed as u8);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}
