use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::message::encode_message;
use super::{compress, Encoding, MessageCoding, MessageProcessor};
use crate::error::Result;
use crate::h2_codec::PriorityParam;
use crate::hpack::H2Header;
use crate::processor::Processor;

/// Re-frames messages into DATA for the HTTP/2 sink, compressing them the way
/// the message being replaced was compressed.
pub(crate) struct Emitter {
    sink: Arc<dyn Processor>,
    coding: Arc<MessageCoding>,
}

impl Emitter {
    pub(crate) fn new(sink: Arc<dyn Processor>, coding: Arc<MessageCoding>) -> Self {
        Self { sink, coding }
    }
}

#[async_trait]
impl MessageProcessor for Emitter {
    async fn header(
        &self,
        headers: Vec<H2Header>,
        end_stream: bool,
        priority: Option<PriorityParam>,
    ) -> Result<()> {
        self.sink.header(headers, end_stream, priority).await
    }

    async fn message(&self, data: Bytes, end_stream: bool) -> Result<()> {
        let compressed = self.coding.compressed();
        let framed = match self.coding.encoding() {
            Encoding::Identity => encode_message(compressed, &data),
            _ if !compressed => encode_message(false, &data),
            encoding => encode_message(true, &compress(encoding, &data)?),
        };
        self.sink.data(framed, end_stream).await
    }
}
