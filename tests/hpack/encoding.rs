//! Tests for HPACK encoding

use bytes::Bytes;
use h2_intercept::{split_into_chunks, H2Header, HpackDecoder, HpackEncoder};

#[test]
fn test_encode_decode_roundtrip() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    let headers = vec![
        H2Header::new(":status", "200"),
        H2Header::new("content-type", "application/json"),
    ];
    let encoded = encoder.encode(&headers);
    let decoded = decoder.decode(&encoded).unwrap();
    assert_eq!(decoded, headers);
}

#[test]
fn test_encode_literal_header() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    let headers = vec![H2Header::new("x-custom", "value")];
    let encoded = encoder.encode(&headers);
    let decoded = decoder.decode(&encoded).unwrap();
    assert_eq!(decoded[0].name, "x-custom");
}

#[test]
fn test_encode_indexed_header() {
    let mut encoder = HpackEncoder::new();
    let headers = vec![H2Header::new(":method", "GET")];
    // Fully indexed from the static table
    assert_eq!(encoder.encode(&headers), vec![0x82]);
}

#[test]
fn test_encoder_and_decoder_stay_in_sync() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    let headers = vec![
        H2Header::new(":authority", "api.example.com"),
        H2Header::new("user-agent", "grpc-go/1.60"),
    ];
    for _ in 0..3 {
        let encoded = encoder.encode(&headers);
        assert_eq!(decoder.decode(&encoded).unwrap(), headers);
    }
}

#[test]
fn test_smaller_table_size_still_decodes() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();
    encoder.set_max_table_size(0);

    let headers = vec![H2Header::new("x-trace", "0123456789")];
    for _ in 0..2 {
        let encoded = encoder.encode(&headers);
        assert_eq!(decoder.decode(&encoded).unwrap(), headers);
    }
}

#[test]
fn test_h2header_display() {
    let header = H2Header::new("content-type", "text/html");
    assert_eq!(header.to_string(), "content-type: text/html");
}

#[test]
fn test_encode_decode_comprehensive_roundtrip() {
    // Comprehensive roundtrip with mixed pseudo + regular headers
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    let headers = vec![
        H2Header::new(":status", "200"),
        H2Header::new("content-type", "application/json"),
        H2Header::new("x-request-id", "abc-123-def"),
        H2Header::new("set-cookie", "session=xyz"),
        H2Header::new("set-cookie", "theme=dark"),
    ];

    let encoded = encoder.encode(&headers);
    let decoded = decoder.decode(&encoded).unwrap();

    assert_eq!(decoded.len(), headers.len());
    for (orig, dec) in headers.iter().zip(decoded.iter()) {
        assert_eq!(orig.name, dec.name);
        assert_eq!(orig.value, dec.value);
    }
}

#[test]
fn test_large_block_split_and_reassembled() {
    let mut encoder = HpackEncoder::new();
    let mut decoder = HpackDecoder::new();

    let headers: Vec<H2Header> = (0..64)
        .map(|i| H2Header::new(format!("x-header-{i}"), "v".repeat(200)))
        .collect();
    let block = Bytes::from(encoder.encode(&headers));

    let chunks = split_into_chunks(1019, 1024, block.clone());
    assert!(chunks.len() > 1);
    assert!(chunks[0].len() <= 1019);
    assert!(chunks[1..].iter().all(|c| !c.is_empty() && c.len() <= 1024));

    let reassembled = chunks.concat();
    assert_eq!(reassembled, block.to_vec());
    assert_eq!(decoder.decode(&reassembled).unwrap(), headers);
}
