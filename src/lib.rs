//! h2-intercept: an intercepting HTTP/2 relay
//!
//! This crate is the protocol engine of a man-in-the-middle proxy. It sits
//! between an HTTP/2 client and server, runs flow control and HPACK against
//! each side on its own, and exposes every stream to a chain of processors that
//! can observe or rewrite headers and data in flight. An optional gRPC layer
//! lifts DATA frames into whole, decompressed messages.
//!
//! # Features
//!
//! - **Per-direction relays**: HPACK state, flow-control windows and max frame
//!   size are tracked separately for the client and server legs
//! - **Ordered emission**: frames of a stream leave in the order they were
//!   queued, blocked only by that stream's window
//! - **CONTINUATION handling**: header blocks are reassembled before processors
//!   see them and split again on the way out
//! - **gRPC messages**: length-prefixed messages with identity, gzip, deflate
//!   and snappy coding
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use h2_intercept::Config;
//! use tokio::io::{AsyncRead, AsyncWrite};
//! use url::Url;
//!
//! // `client` and `server` are established connections, TLS already handled.
//! async fn intercept<C, S>(client: C, server: S, url: &Url) -> h2_intercept::Result<()>
//! where
//!     C: AsyncRead + AsyncWrite + Send + 'static,
//!     S: AsyncRead + AsyncWrite + Send + 'static,
//! {
//!     let (_close, closing) = tokio::sync::watch::channel(false);
//!     let config = Config::new().with_debug_logs(true);
//!     config.proxy(closing, client, server, url).await
//! }
//! ```
//!
//! # Architecture
//!
//! - [`h2_codec`]: sans-I/O frame model (bytes to [`H2Frame`] and back)
//! - [`framer`]: async frame reader and writer over byte streams
//! - [`hpack`]: header compression wrappers
//! - [`relay`]: one direction of a proxied connection
//! - [`processor`]: the interception API
//! - [`grpc`]: gRPC message adapter
//!
//! TLS, connection setup and the surrounding HTTP/1.1 proxy are left to the
//! caller; [`Config::proxy`] takes two established byte streams.

pub mod config;
pub mod error;
pub mod framer;
pub mod grpc;
pub mod h2_codec;
pub mod hpack;
pub mod output_buffer;
pub mod processor;
pub mod queued_frame;
pub mod relay;

pub use config::{forward_preface, Config, HostFilter};
pub use error::{Error, Result};
pub use framer::{FrameReader, FrameWriter};
pub use h2_codec::{
    error_code, flags, frame_type, is_h2c_preface, settings_id, H2Codec, H2Frame, H2FrameHeader,
    PriorityParam, CONNECTION_PREFACE,
};
pub use hpack::{split_into_chunks, H2Header, HpackDecoder, HpackEncoder};
pub use processor::{Direction, Processor, Processors, StreamProcessorFactory};
pub use queued_frame::QueuedFrame;
