use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::message::{MessageReader, RawMessage};
use super::{decompress, is_grpc_content_type, Encoding, GrpcError, MessageCoding, MessageProcessor};
use crate::error::Result;
use crate::h2_codec::PriorityParam;
use crate::hpack::H2Header;
use crate::processor::Processor;

/// HTTP/2 processor in front of a [`MessageProcessor`].
///
/// Until the stream is known to be gRPC every event goes straight to `sink`.
/// After that, DATA is cut into messages for `processor`.
pub(crate) struct Adapter {
    /// Shared with the opposite direction's adapter.
    enabled: Arc<AtomicBool>,
    processor: Arc<dyn MessageProcessor>,
    sink: Arc<dyn Processor>,
    coding: Arc<MessageCoding>,
    reader: Mutex<MessageReader>,
}

impl Adapter {
    pub(crate) fn new(
        enabled: Arc<AtomicBool>,
        processor: Arc<dyn MessageProcessor>,
        sink: Arc<dyn Processor>,
        coding: Arc<MessageCoding>,
    ) -> Self {
        Self {
            enabled,
            processor,
            sink,
            coding,
            reader: Mutex::new(MessageReader::new()),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Decompress per the negotiated coding, if the message says it is compressed.
    fn open(&self, message: &RawMessage) -> std::result::Result<Bytes, GrpcError> {
        if !message.compressed {
            return Ok(message.payload.clone());
        }
        match self.coding.encoding() {
            Encoding::Identity => Ok(message.payload.clone()),
            encoding => decompress(encoding, &message.payload).map(Bytes::from),
        }
    }
}

#[async_trait]
impl Processor for Adapter {
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<PriorityParam>,
    ) -> Result<()> {
        if !self.is_enabled() {
            let grpc = headers
                .iter()
                .any(|h| h.name == "content-type" && is_grpc_content_type(&h.value));
            if !grpc {
                return self.sink.header(headers, end_stream, priority).await;
            }
            self.enabled.store(true, Ordering::Release);
        }

        for h in headers.iter().filter(|h| h.name == "grpc-encoding") {
            self.coding.set_encoding(Encoding::from_header(&h.value)?);
        }
        self.processor.header(headers, end_stream, priority).await
    }

    async fn data(&self, data: Bytes, end_stream: bool) -> Result<()> {
        if !self.is_enabled() {
            return self.sink.data(data, end_stream).await;
        }

        let messages = {
            let mut reader = self.reader.lock().await;
            reader.push(&data);
            let messages: Vec<RawMessage> = std::iter::from_fn(|| reader.next_message()).collect();
            if end_stream && !reader.is_idle() {
                return Err(GrpcError::TruncatedMessage {
                    buffered: reader.buffered(),
                }
                .into());
            }
            messages
        };

        // gRPC may end a stream with an empty DATA frame.
        if messages.is_empty() {
            if end_stream {
                self.coding.set_compressed(false);
                return self.processor.message(Bytes::new(), true).await;
            }
            return Ok(());
        }

        // Messages are re-aligned with DATA frames, so only the last one of a
        // frame that ends the stream carries end_stream.
        let last = messages.len() - 1;
        for (i, message) in messages.into_iter().enumerate() {
            let payload = self.open(&message)?;
            self.coding.set_compressed(message.compressed);
            self.processor.message(payload, end_stream && i == last).await?;
        }
        Ok(())
    }

    async fn priority(&self, priority: PriorityParam) -> Result<()> {
        self.sink.priority(priority).await
    }

    async fn rst_stream(&self, error_code: u32) -> Result<()> {
        self.sink.rst_stream(error_code).await
    }

    async fn push_promise(&self, promise_id: u32, headers: Vec<H2Header>) -> Result<()> {
        self.sink.push_promise(promise_id, headers).await
    }
}
