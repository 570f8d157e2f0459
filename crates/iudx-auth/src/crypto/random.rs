//! Secure random number generation.
//!
//! Uses the operating system's cryptographic random source via `rand`.

use rand::RngCore;

/// Number of random bytes in a token or sub-token suffix.
pub const TOKEN_LEN: usize = 16;

/// Length of the hex-encoded random suffix.
pub const TOKEN_LEN_HEX: usize = 2 * TOKEN_LEN;

/// Fill a buffer with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// Generate a fixed-size array of cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    fill_random(&mut buf);
    buf
}

/// Generate a 128-bit random token suffix as 32 lowercase hex characters.
pub fn random_token_hex() -> String {
    hex::encode(random_bytes::<TOKEN_LEN>())
}
