//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! Thin wrapper around `fluke-hpack` providing the H2Header type and the
//! decoder/encoder pair each relay direction owns, plus header-block
//! fragmentation for CONTINUATION output.

use bytes::Bytes;

use crate::error::{Error, Result};

/// Dynamic table limit for decoders and the cap on encoder table sizes.
pub const UNBOUNDED_TABLE_SIZE: usize = u32::MAX as usize;

/// A decoded HTTP/2 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for H2Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Look up the first header with the given name.
pub fn find_header<'a>(headers: &'a [H2Header], name: &str) -> Option<&'a str> {
    headers.iter().find(|h| h.name == name).map(|h| h.value.as_str())
}

/// HPACK decoder for HTTP/2 header blocks.
/// Wraps `fluke_hpack::Decoder` which maintains dynamic table state per-direction.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        let mut inner = fluke_hpack::Decoder::new();
        inner.set_max_allowed_table_size(UNBOUNDED_TABLE_SIZE);
        Self { inner }
    }

    /// Decode a complete HPACK-encoded header block into H2Headers.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<H2Header>> {
        let pairs = self
            .inner
            .decode(data)
            .map_err(|e| Error::Hpack(format!("decode error: {:?}", e)))?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| {
                H2Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

/// HPACK encoder for HTTP/2 header blocks.
/// Wraps `fluke_hpack::Encoder` which maintains dynamic table state per-direction.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
    /// Smallest and latest table size set since the last header block, to be
    /// announced at the start of the next one.
    pending_size_update: Option<(usize, usize)>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
            pending_size_update: None,
        }
    }

    /// Apply a SETTINGS_HEADER_TABLE_SIZE advertised by the receiving endpoint.
    ///
    /// The decoder only learns the new size from a dynamic table size update
    /// at the start of the next header block. If the size dipped below its
    /// final value in between, the smallest value is announced first so the
    /// decoder evicts the same entries.
    /// See: https://httpwg.org/specs/rfc7541.html#encoding.context.update
    pub fn set_max_table_size(&mut self, size: usize) {
        let size = size.min(UNBOUNDED_TABLE_SIZE);
        self.inner.set_max_table_size(size);
        self.pending_size_update = Some(match self.pending_size_update {
            Some((smallest, _)) => (smallest.min(size), size),
            None => (size, size),
        });
    }

    /// Encode headers into an HPACK header block, led by any pending table
    /// size update.
    pub fn encode(&mut self, headers: &[H2Header]) -> Vec<u8> {
        let mut block = Vec::new();
        // A block may not end with a size update, so an empty one carries none.
        if !headers.is_empty() {
            if let Some((smallest, size)) = self.pending_size_update.take() {
                if smallest < size {
                    block.extend(size_update(smallest));
                }
                block.extend(size_update(size));
            }
        }
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_bytes(), h.value.as_bytes()))
            .collect();
        block.extend(self.inner.encode(pairs));
        block
    }
}

/// Dynamic table size update: `001` then the size as a 5-bit prefix integer.
fn size_update(size: usize) -> Vec<u8> {
    let mut encoded = fluke_hpack::encoder::encode_integer(size, 5);
    encoded[0] |= 0x20;
    encoded
}

/// Split an encoded header block into a first fragment of at most
/// `first_chunk_max` bytes followed by continuation fragments of at most
/// `continuation_max` bytes.
///
/// Always returns at least one chunk, which is empty for an empty block.
pub fn split_into_chunks(first_chunk_max: usize, continuation_max: usize, data: Bytes) -> Vec<Bytes> {
    let mut remaining = data;
    let first = remaining.split_to(remaining.len().min(first_chunk_max));
    let mut chunks = vec![first];
    let continuation_max = continuation_max.max(1);
    while !remaining.is_empty() {
        let next = remaining.split_to(remaining.len().min(continuation_max));
        chunks.push(next);
    }
    chunks
}

// ============================================================================
// Tests
// ============================================================================
