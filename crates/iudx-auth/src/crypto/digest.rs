//! Hex-encoded message digests.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// SHA-256 of a string, lowercase hex. Used for token and sub-token hashes.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// SHA-1 of a string, lowercase hex. Used for provider email hashes.
pub fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}
