//! The framer boundary: whole frames in and out of a byte stream.
//!
//! `FrameReader` drives an [`H2Codec`] from an `AsyncRead`; `FrameWriter`
//! serializes [`H2Frame`]s onto an `AsyncWrite`. Neither knows anything about
//! streams or flow control.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::h2_codec::{H2Codec, H2Frame};

/// Read buffer size for a single `read` call.
const READ_CHUNK_SIZE: usize = 16 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reads complete frames from a byte stream.
pub struct FrameReader {
    io: BoxedReader,
    codec: H2Codec,
    buf: Vec<u8>,
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.codec.buffered())
            .finish()
    }
}

impl FrameReader {
    pub fn new(io: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            io: Box::new(io),
            codec: H2Codec::new(),
            buf: vec![0; READ_CHUNK_SIZE],
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames. EOF in
    /// the middle of a frame is an `UnexpectedEof` I/O error.
    pub async fn read_frame(&mut self) -> Result<Option<H2Frame>> {
        loop {
            if let Some(frame) = self.codec.decode_frame()? {
                return Ok(Some(frame));
            }
            let n = self.io.read(&mut self.buf).await?;
            if n == 0 {
                if self.codec.buffered() == 0 {
                    return Ok(None);
                }
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {} bytes of a partial frame", self.codec.buffered()),
                )));
            }
            self.codec.extend(&self.buf[..n]);
        }
    }
}

/// Writes frames to a byte stream, one flush per frame.
pub struct FrameWriter {
    io: BoxedWriter,
    buf: BytesMut,
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish()
    }
}

impl FrameWriter {
    pub fn new(io: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            io: Box::new(io),
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    pub async fn write_frame(&mut self, frame: &H2Frame) -> Result<()> {
        self.buf.clear();
        frame.encode(&mut self.buf);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Write raw bytes that are not a frame, i.e. the connection preface.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.io.write_all(data).await?;
        self.io.flush().await?;
        Ok(())
    }
}
