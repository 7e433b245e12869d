//! SHA256 double-hashing, scrypt proof-of-work hashing and hash byte-order
//! helpers.

use scrypt::Params;
use sha2::{Digest, Sha256};

/// Bitcoin's double SHA256: SHA256(SHA256(data)).
///
/// This is used for block header hashing, transaction IDs, and merkle trees.
#[inline]
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut result = [0u8; 32];
    result.copy_from_slice(&second);
    result
}

/// Scrypt with N=1024, r=1, p=1, salted with the data itself.
///
/// Proof-of-work hash of scrypt chains. Returns all `0xff` bytes if the
/// parameters are rejected, which no target accepts.
pub fn scrypt_1024_1_1(data: &[u8]) -> [u8; 32] {
    let mut result = [0xffu8; 32];
    let Ok(params) = Params::new(10, 1, 1, result.len()) else {
        return result;
    };
    if scrypt::scrypt(data, data, &params, &mut result).is_err() {
        return [0xffu8; 32];
    }
    result
}

/// Double SHA256 of two concatenated 32-byte hashes (one merkle tree node).
#[inline]
pub fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    double_sha256(&combined)
}

/// Reverse the byte order of a 32-byte array.
///
/// Bitcoin displays hashes in reverse byte order (little-endian display).
#[inline]
pub fn reverse_bytes(bytes: &[u8; 32]) -> [u8; 32] {
    let mut reversed = *bytes;
    reversed.reverse();
    reversed
}

/// Convert a hash to its display format (reversed hex).
pub fn hash_to_display_hex(hash: &[u8; 32]) -> String {
    hex::encode(reverse_bytes(hash))
}

/// Parse a display-format (reversed) hex hash into internal byte order.
///
/// Returns `None` unless the input is exactly 64 hex characters.
pub fn hash_from_display_hex(display: &str) -> Option<[u8; 32]> {
    if display.len() != 64 {
        return None;
    }
    let mut hash = [0u8; 32];
    hex::decode_to_slice(display, &mut hash).ok()?;
    hash.reverse();
    Some(hash)
}
