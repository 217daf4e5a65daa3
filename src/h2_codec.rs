//! HTTP/2 frame codec for the relay.
//!
//! This is the sans-I/O half of the framer boundary: it turns raw bytes into
//! [`H2Frame`] values and back. Unlike a full HTTP/2 stack it does not interpret
//! stream state or reassemble header blocks; CONTINUATION frames are surfaced as
//! frames of their own so the relay can reassemble them against its own
//! continuation state.
//!
//! Reference: RFC 7540 (HTTP/2)

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// HTTP/2 SETTINGS identifiers (RFC 7540 Section 6.5.2)
#[allow(dead_code)]
pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

/// HTTP/2 error codes (RFC 7540 Section 7)
#[allow(dead_code)]
pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

/// Size of the fixed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2FrameHeader {
    pub length: u32,      // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,   // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type = data[3];
        let flags = data[4];
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]) & 0x7FFF_FFFF;

        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Write the 9-byte header.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8((self.length >> 16) as u8);
        dst.put_u8((self.length >> 8) as u8);
        dst.put_u8(self.length as u8);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & 0x7FFF_FFFF);
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }

    /// Check if END_STREAM flag is set
    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    /// Check if END_HEADERS flag is set
    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    /// Check if ACK flag is set (SETTINGS and PING)
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

/// Stream dependency metadata carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityParam {
    pub stream_dependency: u32,
    pub exclusive: bool,
    pub weight: u8,
}

impl PriorityParam {
    /// Length of the encoded priority block.
    pub const LEN: usize = 5;

    fn parse(buf: &[u8]) -> Self {
        let raw = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Self {
            stream_dependency: raw & 0x7FFF_FFFF,
            exclusive: raw & 0x8000_0000 != 0,
            weight: buf[4],
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        let mut raw = self.stream_dependency & 0x7FFF_FFFF;
        if self.exclusive {
            raw |= 0x8000_0000;
        }
        dst.put_u32(raw);
        dst.put_u8(self.weight);
    }
}

impl fmt::Display for PriorityParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{dep={}, exclusive={}, weight={}}}",
            self.stream_dependency, self.exclusive, self.weight
        )
    }
}

/// One HTTP/2 frame as read from or written to the wire.
///
/// Padding is stripped on parse and never produced on encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Frame {
    Data {
        stream_id: u32,
        end_stream: bool,
        data: Bytes,
    },
    Headers {
        stream_id: u32,
        end_stream: bool,
        end_headers: bool,
        priority: Option<PriorityParam>,
        fragment: Bytes,
    },
    Priority {
        stream_id: u32,
        priority: PriorityParam,
    },
    RstStream {
        stream_id: u32,
        error_code: u32,
    },
    Settings {
        ack: bool,
        /// (identifier, value) pairs. Empty for ACK frames.
        settings: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
        promise_id: u32,
        end_headers: bool,
        fragment: Bytes,
    },
    Ping {
        ack: bool,
        data: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: u32,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        end_headers: bool,
        fragment: Bytes,
    },
    /// A frame type this codec does not know. The relay treats it as fatal.
    Unknown {
        frame_type: u8,
        flags: u8,
        stream_id: u32,
        payload: Bytes,
    },
}

impl H2Frame {
    /// Parse a frame from its header and exactly `header.length` payload bytes.
    pub fn parse(header: &H2FrameHeader, payload: Bytes) -> Result<Self> {
        let stream_id = header.stream_id;
        let frame = match header.frame_type {
            frame_type::DATA => H2Frame::Data {
                stream_id,
                end_stream: header.is_end_stream(),
                data: strip_padding(header, payload, "DATA")?,
            },
            frame_type::HEADERS => {
                let mut payload = strip_padding(header, payload, "HEADERS")?;
                let priority = if header.flags & flags::PRIORITY != 0 {
                    if payload.len() < PriorityParam::LEN {
                        return Err(Error::Frame(
                            "PRIORITY HEADERS frame with insufficient data".to_string(),
                        ));
                    }
                    let priority = PriorityParam::parse(&payload);
                    payload.advance(PriorityParam::LEN);
                    Some(priority)
                } else {
                    None
                };
                H2Frame::Headers {
                    stream_id,
                    end_stream: header.is_end_stream(),
                    end_headers: header.is_end_headers(),
                    priority,
                    fragment: payload,
                }
            }
            frame_type::PRIORITY => {
                if payload.len() < PriorityParam::LEN {
                    return Err(Error::Frame("PRIORITY frame too short".to_string()));
                }
                H2Frame::Priority {
                    stream_id,
                    priority: PriorityParam::parse(&payload),
                }
            }
            frame_type::RST_STREAM => {
                if payload.len() < 4 {
                    return Err(Error::Frame("RST_STREAM frame too short".to_string()));
                }
                H2Frame::RstStream {
                    stream_id,
                    error_code: read_u32(&payload),
                }
            }
            frame_type::SETTINGS => {
                let ack = header.is_ack();
                let mut settings = Vec::new();
                if !ack {
                    // Each entry is 6 bytes: u16 id + u32 value
                    for entry in payload.chunks_exact(6) {
                        let id = u16::from_be_bytes([entry[0], entry[1]]);
                        let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
                        settings.push((id, value));
                    }
                }
                H2Frame::Settings { ack, settings }
            }
            frame_type::PUSH_PROMISE => {
                let mut payload = strip_padding(header, payload, "PUSH_PROMISE")?;
                if payload.len() < 4 {
                    return Err(Error::Frame("PUSH_PROMISE frame too short".to_string()));
                }
                let promise_id = read_u32(&payload) & 0x7FFF_FFFF;
                payload.advance(4);
                H2Frame::PushPromise {
                    stream_id,
                    promise_id,
                    end_headers: header.is_end_headers(),
                    fragment: payload,
                }
            }
            frame_type::PING => {
                if payload.len() < 8 {
                    return Err(Error::Frame("PING frame too short".to_string()));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(&payload[..8]);
                H2Frame::Ping {
                    ack: header.is_ack(),
                    data,
                }
            }
            frame_type::GOAWAY => {
                if payload.len() < 8 {
                    return Err(Error::Frame("GOAWAY frame too short".to_string()));
                }
                let last_stream_id = read_u32(&payload) & 0x7FFF_FFFF;
                let error_code = read_u32(&payload[4..]);
                H2Frame::GoAway {
                    last_stream_id,
                    error_code,
                    debug_data: payload.slice(8..),
                }
            }
            frame_type::WINDOW_UPDATE => {
                if payload.len() < 4 {
                    return Err(Error::Frame("WINDOW_UPDATE frame too short".to_string()));
                }
                H2Frame::WindowUpdate {
                    stream_id,
                    increment: read_u32(&payload) & 0x7FFF_FFFF,
                }
            }
            frame_type::CONTINUATION => H2Frame::Continuation {
                stream_id,
                end_headers: header.is_end_headers(),
                fragment: payload,
            },
            other => H2Frame::Unknown {
                frame_type: other,
                flags: header.flags,
                stream_id,
                payload,
            },
        };
        Ok(frame)
    }

    /// Serialize the frame, header included, onto `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            H2Frame::Data {
                stream_id,
                end_stream,
                data,
            } => {
                let flags = if *end_stream { flags::END_STREAM } else { 0 };
                put_header(dst, data.len(), frame_type::DATA, flags, *stream_id);
                dst.put_slice(data);
            }
            H2Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                priority,
                fragment,
            } => {
                let mut flag_bits = 0;
                if *end_stream {
                    flag_bits |= flags::END_STREAM;
                }
                if *end_headers {
                    flag_bits |= flags::END_HEADERS;
                }
                let mut length = fragment.len();
                if priority.is_some() {
                    flag_bits |= flags::PRIORITY;
                    length += PriorityParam::LEN;
                }
                put_header(dst, length, frame_type::HEADERS, flag_bits, *stream_id);
                if let Some(priority) = priority {
                    priority.encode(dst);
                }
                dst.put_slice(fragment);
            }
            H2Frame::Priority {
                stream_id,
                priority,
            } => {
                put_header(dst, PriorityParam::LEN, frame_type::PRIORITY, 0, *stream_id);
                priority.encode(dst);
            }
            H2Frame::RstStream {
                stream_id,
                error_code,
            } => {
                put_header(dst, 4, frame_type::RST_STREAM, 0, *stream_id);
                dst.put_u32(*error_code);
            }
            H2Frame::Settings { ack, settings } => {
                if *ack {
                    put_header(dst, 0, frame_type::SETTINGS, flags::ACK, 0);
                } else {
                    put_header(dst, settings.len() * 6, frame_type::SETTINGS, 0, 0);
                    for (id, value) in settings {
                        dst.put_u16(*id);
                        dst.put_u32(*value);
                    }
                }
            }
            H2Frame::PushPromise {
                stream_id,
                promise_id,
                end_headers,
                fragment,
            } => {
                let flags = if *end_headers { flags::END_HEADERS } else { 0 };
                put_header(dst, 4 + fragment.len(), frame_type::PUSH_PROMISE, flags, *stream_id);
                dst.put_u32(promise_id & 0x7FFF_FFFF);
                dst.put_slice(fragment);
            }
            H2Frame::Ping { ack, data } => {
                let flags = if *ack { flags::ACK } else { 0 };
                put_header(dst, 8, frame_type::PING, flags, 0);
                dst.put_slice(data);
            }
            H2Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                put_header(dst, 8 + debug_data.len(), frame_type::GOAWAY, 0, 0);
                dst.put_u32(last_stream_id & 0x7FFF_FFFF);
                dst.put_u32(*error_code);
                dst.put_slice(debug_data);
            }
            H2Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                put_header(dst, 4, frame_type::WINDOW_UPDATE, 0, *stream_id);
                dst.put_u32(increment & 0x7FFF_FFFF);
            }
            H2Frame::Continuation {
                stream_id,
                end_headers,
                fragment,
            } => {
                let flags = if *end_headers { flags::END_HEADERS } else { 0 };
                put_header(dst, fragment.len(), frame_type::CONTINUATION, flags, *stream_id);
                dst.put_slice(fragment);
            }
            H2Frame::Unknown {
                frame_type,
                flags,
                stream_id,
                payload,
            } => {
                put_header(dst, payload.len(), *frame_type, *flags, *stream_id);
                dst.put_slice(payload);
            }
        }
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// The stream the frame belongs to; zero for connection-level frames.
    pub fn stream_id(&self) -> u32 {
        match self {
            H2Frame::Data { stream_id, .. }
            | H2Frame::Headers { stream_id, .. }
            | H2Frame::Priority { stream_id, .. }
            | H2Frame::RstStream { stream_id, .. }
            | H2Frame::PushPromise { stream_id, .. }
            | H2Frame::WindowUpdate { stream_id, .. }
            | H2Frame::Continuation { stream_id, .. }
            | H2Frame::Unknown { stream_id, .. } => *stream_id,
            H2Frame::Settings { .. } | H2Frame::Ping { .. } | H2Frame::GoAway { .. } => 0,
        }
    }

    pub fn frame_type(&self) -> u8 {
        match self {
            H2Frame::Data { .. } => frame_type::DATA,
            H2Frame::Headers { .. } => frame_type::HEADERS,
            H2Frame::Priority { .. } => frame_type::PRIORITY,
            H2Frame::RstStream { .. } => frame_type::RST_STREAM,
            H2Frame::Settings { .. } => frame_type::SETTINGS,
            H2Frame::PushPromise { .. } => frame_type::PUSH_PROMISE,
            H2Frame::Ping { .. } => frame_type::PING,
            H2Frame::GoAway { .. } => frame_type::GOAWAY,
            H2Frame::WindowUpdate { .. } => frame_type::WINDOW_UPDATE,
            H2Frame::Continuation { .. } => frame_type::CONTINUATION,
            H2Frame::Unknown { frame_type, .. } => *frame_type,
        }
    }
}

impl fmt::Display for H2Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            H2Frame::Data {
                stream_id,
                end_stream,
                data,
            } => write!(f, "DATA[id={}, endStream={}, len={}]", stream_id, end_stream, data.len()),
            H2Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                fragment,
                ..
            } => write!(
                f,
                "HEADERS[id={}, endStream={}, endHeaders={}, len={}]",
                stream_id,
                end_stream,
                end_headers,
                fragment.len()
            ),
            H2Frame::Priority {
                stream_id,
                priority,
            } => write!(f, "PRIORITY[id={}, priority={}]", stream_id, priority),
            H2Frame::RstStream {
                stream_id,
                error_code,
            } => write!(f, "RST_STREAM[id={}, errCode={:#x}]", stream_id, error_code),
            H2Frame::Settings { ack, settings } => {
                write!(f, "SETTINGS[ack={}, settings={:?}]", ack, settings)
            }
            H2Frame::PushPromise {
                stream_id,
                promise_id,
                end_headers,
                fragment,
            } => write!(
                f,
                "PUSH_PROMISE[id={}, promiseID={}, endHeaders={}, len={}]",
                stream_id,
                promise_id,
                end_headers,
                fragment.len()
            ),
            H2Frame::Ping { ack, .. } => write!(f, "PING[ack={}]", ack),
            H2Frame::GoAway {
                last_stream_id,
                error_code,
                ..
            } => write!(f, "GOAWAY[lastStreamID={}, errCode={:#x}]", last_stream_id, error_code),
            H2Frame::WindowUpdate {
                stream_id,
                increment,
            } => write!(f, "WINDOW_UPDATE[id={}, increment={}]", stream_id, increment),
            H2Frame::Continuation {
                stream_id,
                end_headers,
                fragment,
            } => write!(
                f,
                "CONTINUATION[id={}, endHeaders={}, len={}]",
                stream_id,
                end_headers,
                fragment.len()
            ),
            H2Frame::Unknown {
                frame_type,
                stream_id,
                ..
            } => write!(f, "UNKNOWN[type={:#x}, id={}]", frame_type, stream_id),
        }
    }
}

/// Buffering frame decoder.
///
/// Feed raw bytes with [`H2Codec::process`] (or [`H2Codec::extend`] plus
/// [`H2Codec::decode_frame`]) and get back complete frames. Partial frames stay
/// buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct H2Codec {
    /// Buffer for incomplete frames
    buffer: BytesMut,
}

impl H2Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes to the decode buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop one complete frame from the buffer, if there is one.
    pub fn decode_frame(&mut self) -> Result<Option<H2Frame>> {
        let header = match H2FrameHeader::parse(&self.buffer) {
            Some(h) => h,
            None => return Ok(None),
        };
        if self.buffer.len() < header.total_size() {
            return Ok(None);
        }
        // Split the frame off the front so the remainder is not copied.
        let mut frame = self.buffer.split_to(header.total_size());
        frame.advance(FRAME_HEADER_SIZE);
        H2Frame::parse(&header, frame.freeze()).map(Some)
    }

    /// Process incoming data and return every frame it completes.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<H2Frame>> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.decode_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Drop any partially buffered frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

fn put_header(dst: &mut BytesMut, length: usize, frame_type: u8, flags: u8, stream_id: u32) {
    H2FrameHeader {
        length: length as u32,
        frame_type,
        flags,
        stream_id,
    }
    .encode(dst);
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Remove the pad-length octet and trailing padding when PADDED is set.
fn strip_padding(header: &H2FrameHeader, mut payload: Bytes, kind: &str) -> Result<Bytes> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::Frame(format!("PADDED {} frame with no payload", kind)));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(Error::Frame(format!("Invalid padding length in {} frame", kind)));
    }
    payload.truncate(payload.len() - pad_length);
    payload.advance(1);
    Ok(payload)
}
