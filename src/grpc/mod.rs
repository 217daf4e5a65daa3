//! gRPC message layer.
//!
//! [`as_stream_processor_factory`] turns a [`ProcessorFactory`] into a regular
//! [`StreamProcessorFactory`]. The resulting processors recognize gRPC streams
//! by their `content-type`, reassemble length-prefixed messages out of DATA
//! frames, decompress them and hand whole messages to a [`MessageProcessor`].
//! On the way out the messages are compressed again and re-framed.
//!
//! Streams that are not gRPC pass through untouched.

mod adapter;
mod compression;
mod emitter;
pub mod message;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::Result;
use crate::h2_codec::PriorityParam;
use crate::hpack::H2Header;
use crate::processor::{Direction, Processor, Processors, StreamProcessorFactory};

pub use compression::{compress, decompress};

use adapter::Adapter;
use emitter::Emitter;

#[derive(Debug, thiserror::Error)]
pub enum GrpcError {
    #[error("unrecognized grpc-encoding {0}")]
    UnrecognizedEncoding(String),

    #[error("uncompressing {encoding} message: {source}")]
    Decompress {
        encoding: Encoding,
        #[source]
        source: io::Error,
    },

    #[error("compressing {encoding} message: {source}")]
    Compress {
        encoding: Encoding,
        #[source]
        source: io::Error,
    },

    /// The stream ended part way through a length-prefixed message.
    #[error("stream ended with {buffered} bytes of an incomplete message")]
    TruncatedMessage { buffered: usize },
}

/// The `grpc-encoding` content coding.
/// See: https://github.com/grpc/grpc/blob/master/doc/PROTOCOL-HTTP2.md#requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    #[default]
    Identity = 0,
    Gzip = 1,
    /// Raw DEFLATE, without a zlib wrapper.
    Deflate = 2,
    /// Snappy framing format.
    Snappy = 3,
}

impl Encoding {
    /// Parse a `grpc-encoding` header value.
    pub fn from_header(value: &str) -> std::result::Result<Self, GrpcError> {
        match value {
            "identity" => Ok(Encoding::Identity),
            "gzip" => Ok(Encoding::Gzip),
            "deflate" => Ok(Encoding::Deflate),
            "snappy" => Ok(Encoding::Snappy),
            other => Err(GrpcError::UnrecognizedEncoding(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Snappy => "snappy",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Encoding::Gzip,
            2 => Encoding::Deflate,
            3 => Encoding::Snappy,
            _ => Encoding::Identity,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `content-type` value names gRPC (`application/grpc`, with an
/// optional `+codec` suffix or parameters).
pub fn is_grpc_content_type(value: &str) -> bool {
    match value.strip_prefix("application/grpc") {
        Some(rest) => rest.is_empty() || rest.starts_with('+') || rest.starts_with(';'),
        None => false,
    }
}

/// Processes gRPC traffic of one stream in one direction.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<PriorityParam>,
    ) -> Result<()>;

    /// One whole, decompressed message. `end_stream` is only set on the last
    /// message of the stream, which may be empty.
    async fn message(&self, data: Bytes, end_stream: bool) -> Result<()>;
}

/// Creates gRPC processors for a stream.
///
/// `server` and `client` forward messages toward the server and toward the
/// client respectively; a processor must forward to them, possibly with edits.
/// Returns the client-to-server and server-to-client processors; `None` is a
/// processor that forwards unchanged.
pub type ProcessorFactory = Arc<
    dyn Fn(
            &Url,
            Arc<dyn MessageProcessor>,
            Arc<dyn MessageProcessor>,
        ) -> (Option<Arc<dyn MessageProcessor>>, Option<Arc<dyn MessageProcessor>>)
        + Send
        + Sync,
>;

/// Compression state of one direction of a stream, written by the adapter as
/// messages arrive and read by the emitter when they are sent on.
#[derive(Debug, Default)]
pub(crate) struct MessageCoding {
    compressed: AtomicBool,
    encoding: AtomicU8,
}

impl MessageCoding {
    fn compressed(&self) -> bool {
        self.compressed.load(Ordering::Acquire)
    }

    fn set_compressed(&self, compressed: bool) {
        self.compressed.store(compressed, Ordering::Release);
    }

    fn encoding(&self) -> Encoding {
        Encoding::from_u8(self.encoding.load(Ordering::Acquire))
    }

    fn set_encoding(&self, encoding: Encoding) {
        self.encoding.store(encoding as u8, Ordering::Release);
    }
}

/// Forwards everything unchanged.
struct Noop {
    dest: Arc<dyn MessageProcessor>,
}

#[async_trait]
impl MessageProcessor for Noop {
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<PriorityParam>,
    ) -> Result<()> {
        self.dest.header(headers, end_stream, priority).await
    }

    async fn message(&self, data: Bytes, end_stream: bool) -> Result<()> {
        self.dest.message(data, end_stream).await
    }
}

/// Adapt a gRPC [`ProcessorFactory`] to the HTTP/2 processor chain.
pub fn as_stream_processor_factory(factory: ProcessorFactory) -> StreamProcessorFactory {
    Arc::new(move |url: &Url, sinks: &Processors| {
        let c2s_sink = sinks.for_direction(Direction::ClientToServer).clone();
        let s2c_sink = sinks.for_direction(Direction::ServerToClient).clone();
        let c2s_coding = Arc::new(MessageCoding::default());
        let s2c_coding = Arc::new(MessageCoding::default());

        let to_server: Arc<dyn MessageProcessor> =
            Arc::new(Emitter::new(c2s_sink.clone(), c2s_coding.clone()));
        let to_client: Arc<dyn MessageProcessor> =
            Arc::new(Emitter::new(s2c_sink.clone(), s2c_coding.clone()));

        let (c2s, s2c) = factory(url, to_server.clone(), to_client.clone());
        let c2s = c2s.unwrap_or_else(|| Arc::new(Noop { dest: to_server }));
        let s2c = s2c.unwrap_or_else(|| Arc::new(Noop { dest: to_client }));

        // Detection happens on whichever direction sees the first gRPC
        // content-type and applies to both.
        let enabled = Arc::new(AtomicBool::new(false));
        let c2s_adapter: Arc<dyn Processor> =
            Arc::new(Adapter::new(enabled.clone(), c2s, c2s_sink, c2s_coding));
        let s2c_adapter: Arc<dyn Processor> = Arc::new(Adapter::new(enabled, s2c, s2c_sink, s2c_coding));
        (Some(c2s_adapter), Some(s2c_adapter))
    })
}
