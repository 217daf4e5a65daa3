//! Frames held back for ordering and flow control.
//!
//! The proxy runs flow control against each endpoint on its own instead of
//! passing WINDOW_UPDATEs through, since DATA may be held while a processor
//! collects enough of it to act on. Anything that belongs to a stream and must
//! stay ordered behind that DATA (HEADERS, PUSH_PROMISE, PRIORITY,
//! RST_STREAM) is queued the same way. WINDOW_UPDATE is the exception: it
//! acknowledges what the peer sent, so it is written immediately.
//!
//! Header blocks are queued decoded and only HPACK-encoded when they leave.
//! Streams drain out of order relative to each other, and the receiver's
//! dynamic table follows wire order.

use std::fmt;

use bytes::Bytes;

use crate::h2_codec::{H2Frame, PriorityParam};
use crate::hpack::{split_into_chunks, H2Header, HpackEncoder};

/// Priority block at the start of a HEADERS payload.
pub const HEADERS_PRIORITY_METADATA_LENGTH: usize = 5;

/// Promised stream ID at the start of a PUSH_PROMISE payload. No pad-length
/// octet is counted since the relay never pads.
pub const PUSH_PROMISE_METADATA_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedFrame {
    Data {
        stream_id: u32,
        end_stream: bool,
        data: Bytes,
    },
    Header {
        stream_id: u32,
        end_stream: bool,
        priority: Option<PriorityParam>,
        headers: Vec<H2Header>,
    },
    PushPromise {
        stream_id: u32,
        promise_id: u32,
        headers: Vec<H2Header>,
    },
    Priority {
        stream_id: u32,
        priority: PriorityParam,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
}

impl QueuedFrame {
    pub fn stream_id(&self) -> u32 {
        match self {
            QueuedFrame::Data { stream_id, .. }
            | QueuedFrame::Header { stream_id, .. }
            | QueuedFrame::PushPromise { stream_id, .. }
            | QueuedFrame::Priority { stream_id, .. }
            | QueuedFrame::RstStream { stream_id, .. } => *stream_id,
        }
    }

    /// Cost against the flow-control windows. Only DATA counts.
    pub fn flow_control_size(&self) -> i64 {
        match self {
            QueuedFrame::Data { data, .. } => data.len() as i64,
            _ => 0,
        }
    }

    /// Expand into the wire frames that carry this queued frame, in order.
    ///
    /// Header blocks are encoded with `encoder` and split so that no frame
    /// payload exceeds `max_frame_size`: the first fragment leaves room for
    /// the priority or promised-stream metadata, CONTINUATIONs use the full
    /// size. DATA is expected to be sized already.
    pub fn to_frames(&self, encoder: &mut HpackEncoder, max_frame_size: usize) -> Vec<H2Frame> {
        match self {
            QueuedFrame::Data {
                stream_id,
                end_stream,
                data,
            } => vec![H2Frame::Data {
                stream_id: *stream_id,
                end_stream: *end_stream,
                data: data.clone(),
            }],
            QueuedFrame::Header {
                stream_id,
                end_stream,
                priority,
                headers,
            } => {
                let mut first_max = max_frame_size;
                if priority.is_some() {
                    first_max = first_max.saturating_sub(HEADERS_PRIORITY_METADATA_LENGTH);
                }
                let block = Bytes::from(encoder.encode(headers));
                let mut chunks = split_into_chunks(first_max, max_frame_size, block).into_iter();
                let first = chunks.next().unwrap_or_default();
                let rest: Vec<Bytes> = chunks.collect();
                let mut frames = vec![H2Frame::Headers {
                    stream_id: *stream_id,
                    end_stream: *end_stream,
                    end_headers: rest.is_empty(),
                    priority: *priority,
                    fragment: first,
                }];
                frames.extend(continuations(*stream_id, rest));
                frames
            }
            QueuedFrame::PushPromise {
                stream_id,
                promise_id,
                headers,
            } => {
                let first_max = max_frame_size.saturating_sub(PUSH_PROMISE_METADATA_LENGTH);
                let block = Bytes::from(encoder.encode(headers));
                let mut chunks = split_into_chunks(first_max, max_frame_size, block).into_iter();
                let first = chunks.next().unwrap_or_default();
                let rest: Vec<Bytes> = chunks.collect();
                let mut frames = vec![H2Frame::PushPromise {
                    stream_id: *stream_id,
                    promise_id: *promise_id,
                    end_headers: rest.is_empty(),
                    fragment: first,
                }];
                frames.extend(continuations(*stream_id, rest));
                frames
            }
            QueuedFrame::Priority {
                stream_id,
                priority,
            } => vec![H2Frame::Priority {
                stream_id: *stream_id,
                priority: *priority,
            }],
            QueuedFrame::RstStream {
                stream_id,
                error_code,
            } => vec![H2Frame::RstStream {
                stream_id: *stream_id,
                error_code: *error_code,
            }],
        }
    }
}

fn continuations(stream_id: u32, rest: Vec<Bytes>) -> impl Iterator<Item = H2Frame> {
    let last = rest.len();
    rest.into_iter()
        .enumerate()
        .map(move |(i, fragment)| H2Frame::Continuation {
            stream_id,
            end_headers: i + 1 == last,
            fragment,
        })
}

impl fmt::Display for QueuedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueuedFrame::Data {
                stream_id,
                end_stream,
                data,
            } => write!(f, "data[id={}, endStream={}, len={}]", stream_id, end_stream, data.len()),
            QueuedFrame::Header {
                stream_id,
                end_stream,
                priority,
                headers,
            } => {
                write!(f, "header[id={}, endStream={}", stream_id, end_stream)?;
                if let Some(p) = priority {
                    write!(f, ", priority={}", p)?;
                }
                write!(f, ", fields={}]", headers.len())
            }
            QueuedFrame::PushPromise {
                stream_id,
                promise_id,
                headers,
            } => write!(
                f,
                "push promise[id={}, promiseID={}, fields={}]",
                stream_id,
                promise_id,
                headers.len()
            ),
            QueuedFrame::Priority {
                stream_id,
                priority,
            } => write!(f, "priority[id={}, priority={}]", stream_id, priority),
            QueuedFrame::RstStream {
                stream_id,
                error_code,
            } => write!(f, "RSTStream[id={}, errCode={:#x}]", stream_id, error_code),
        }
    }
}
