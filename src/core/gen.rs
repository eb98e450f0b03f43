//! # Generate
//!
//! Generate random session tokens and nonces. Both are security relevant
//! — tokens address sessions across trust boundaries and nonces bind
//! proofs to a session — so generation draws from the operating system's
//! CSPRNG.

use base64ct::{Base64, Encoding};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

const TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

// 24 alphanumeric characters carry just over 140 bits of entropy.
const TOKEN_LEN: usize = 24;

/// Generates a random URL-safe session token.
#[must_use]
pub fn session_token() -> String {
    (0..TOKEN_LEN)
        .map(|_| char::from(TOKEN_CHARS[OsRng.gen_range(0..TOKEN_CHARS.len())]))
        .collect()
}

/// Generates a base64 encoded 128-bit nonce.
#[must_use]
pub fn nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    Base64::encode_string(&bytes)
}
