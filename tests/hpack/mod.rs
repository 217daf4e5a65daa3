//! Integration tests for the HPACK wrappers.

mod encoding;
