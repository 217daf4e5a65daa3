//! Error types for the relay.
//!
//! Every variant is fatal to the relay loop that produced it: the caller tears
//! down the whole proxied connection and nothing is retried here.

use std::io;

use crate::grpc::GrpcError;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The client did not open with the HTTP/2 connection preface.
    #[error("client sent unexpected preface: {}", hex(.0))]
    Preface(Vec<u8>),

    /// A frame payload could not be interpreted.
    #[error("frame error: {0}")]
    Frame(String),

    #[error("HPACK error: {0}")]
    Hpack(String),

    #[error("unexpected CONTINUATION frame for stream {stream_id}")]
    UnexpectedContinuation { stream_id: u32 },

    #[error("CONTINUATION for stream {got} but pending headers on stream {expected}")]
    ContinuationStreamMismatch { expected: u32, got: u32 },

    #[error("unrecognized frame type {0:#x}")]
    UnknownFrameType(u8),

    #[error("reading frame: {0}")]
    ReadFrame(#[source] Box<Error>),

    #[error("processing frame {frame}: {source}")]
    ProcessFrame {
        frame: String,
        #[source]
        source: Box<Error>,
    },

    #[error("sending frame: {0}")]
    SendFrame(#[source] Box<Error>),

    /// The peer relay or the output queue is gone, i.e. the connection is shutting down.
    #[error("relay closed")]
    RelayClosed,

    #[error("gRPC error: {0}")]
    Grpc(#[from] GrpcError),
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}
