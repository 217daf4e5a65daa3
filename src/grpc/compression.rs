//! Message (de)compression for the `grpc-encoding` codings.

use std::io::{Read, Write};

use super::{Encoding, GrpcError};

/// Decompress one message payload.
pub fn decompress(encoding: Encoding, data: &[u8]) -> Result<Vec<u8>, GrpcError> {
    let mut decoded = Vec::new();
    let result = match encoding {
        Encoding::Identity => {
            decoded.extend_from_slice(data);
            Ok(0)
        }
        Encoding::Gzip => flate2::read::GzDecoder::new(data).read_to_end(&mut decoded),
        Encoding::Deflate => flate2::read::DeflateDecoder::new(data).read_to_end(&mut decoded),
        Encoding::Snappy => snap::read::FrameDecoder::new(data).read_to_end(&mut decoded),
    };
    result.map_err(|source| GrpcError::Decompress { encoding, source })?;
    Ok(decoded)
}

/// Compress one message payload.
pub fn compress(encoding: Encoding, data: &[u8]) -> Result<Vec<u8>, GrpcError> {
    let compressed = match encoding {
        Encoding::Identity => Ok(data.to_vec()),
        Encoding::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).and_then(|_| encoder.finish())
        }
        Encoding::Deflate => {
            let mut encoder =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).and_then(|_| encoder.finish())
        }
        Encoding::Snappy => {
            let mut encoder = snap::write::FrameEncoder::new(Vec::new());
            encoder
                .write_all(data)
                .and_then(|_| encoder.into_inner().map_err(|e| e.into_error()))
        }
    };
    compressed.map_err(|source| GrpcError::Compress { encoding, source })
}
