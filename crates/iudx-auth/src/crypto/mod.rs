//! Cryptographic primitives for IUDX Auth.
//!
//! This module provides:
//! - SHA-256 hashing of bearer tokens (only hashes are persisted)
//! - SHA-1 hashing of provider emails for provider identity hashes
//! - Cryptographically secure random token suffixes

pub mod digest;
pub mod random;

pub use digest::{sha1_hex, sha256_hex};
pub use random::{random_token_hex, TOKEN_LEN, TOKEN_LEN_HEX};
