//! Payout address decoding and scriptPubKey generation.
//!
//! Supports:
//! - Base58Check addresses (P2PKH and P2SH, any version byte)
//! - CashAddr addresses (`prefix:payload`) as used by Bitcoin Cash forks,
//!   which is also the format node templates use for miner fund addresses

use thiserror::Error;

use crate::hash::double_sha256;

/// Address decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid address format")]
    InvalidFormat,

    #[error("Invalid Base58 character: {0}")]
    InvalidBase58Char(char),

    #[error("Invalid checksum")]
    InvalidChecksum,

    #[error("Invalid CashAddr encoding: {0}")]
    InvalidCashAddr(String),

    #[error("Unsupported address type")]
    UnsupportedType,

    #[error("Unexpected address hash length: expected {expected}, got {got}")]
    HashLength { expected: usize, got: usize },
}

/// Address kind, determining the scriptPubKey template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG
    P2PKH,
    /// OP_HASH160 <hash> OP_EQUAL
    P2SH,
}

/// A decoded address: its type and hash payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddress {
    pub address_type: AddressType,
    /// Version byte (Base58Check) or type bits (CashAddr).
    pub version: u8,
    pub hash: Vec<u8>,
}

impl DecodedAddress {
    /// The scriptPubKey paying to this address.
    pub fn script_pubkey(&self) -> Vec<u8> {
        match self.address_type {
            AddressType::P2PKH => p2pkh_script(&self.hash),
            AddressType::P2SH => p2sh_script(&self.hash),
        }
    }
}

// Script opcodes used by payout templates
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;

/// Pay-to-public-key-hash script for an address hash of any width.
pub fn p2pkh_script(hash: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(hash.len() + 5);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(hash.len() as u8);
    script.extend_from_slice(hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Pay-to-script-hash script.
pub fn p2sh_script(hash: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(hash.len() + 3);
    script.push(OP_HASH160);
    script.push(hash.len() as u8);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    script
}

/// Decode a Base58Check address.
///
/// `p2sh_versions` lists the version bytes that mark script-hash addresses
/// for the caller's network; every other version decodes as P2PKH.
pub fn decode_base58check(address: &str, p2sh_versions: &[u8]) -> Result<DecodedAddress, AddressError> {
    let decoded = base58_decode(address.trim())?;

    if decoded.len() < 5 {
        return Err(AddressError::InvalidFormat);
    }

    // Verify checksum (last 4 bytes)
    let (payload, checksum) = decoded.split_at(decoded.len() - 4);
    if checksum != &double_sha256(payload)[..4] {
        return Err(AddressError::InvalidChecksum);
    }

    let version = payload[0];
    let address_type = if p2sh_versions.contains(&version) {
        AddressType::P2SH
    } else {
        AddressType::P2PKH
    };

    Ok(DecodedAddress {
        address_type,
        version,
        hash: payload[1..].to_vec(),
    })
}

/// Decode a CashAddr address of the form `prefix:payload`.
pub fn decode_cashaddr(address: &str) -> Result<DecodedAddress, AddressError> {
    let trimmed = address.trim();
    let has_lower = trimmed.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = trimmed.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(AddressError::InvalidCashAddr("Mixed case".into()));
    }
    let lowered = trimmed.to_ascii_lowercase();

    let (prefix, payload) = lowered
        .split_once(':')
        .ok_or_else(|| AddressError::InvalidCashAddr("Missing prefix".into()))?;
    if prefix.is_empty() || payload.len() <= CASHADDR_CHECKSUM_LEN {
        return Err(AddressError::InvalidFormat);
    }

    let mut data = Vec::with_capacity(payload.len());
    for c in payload.chars() {
        let idx = CHARSET
            .find(c)
            .ok_or_else(|| AddressError::InvalidCashAddr(format!("Invalid character: {}", c)))?;
        data.push(idx as u8);
    }

    let mut checked = prefix_expand(prefix);
    checked.extend_from_slice(&data);
    if cashaddr_polymod(&checked) != 0 {
        return Err(AddressError::InvalidChecksum);
    }

    data.truncate(data.len() - CASHADDR_CHECKSUM_LEN);
    let bytes = convert_bits(&data, 5, 8, false)?;
    let (&version, hash) = bytes.split_first().ok_or(AddressError::InvalidFormat)?;

    let address_type = match (version >> 3) & 0x0f {
        0 => AddressType::P2PKH,
        1 => AddressType::P2SH,
        _ => return Err(AddressError::UnsupportedType),
    };

    let expected = cashaddr_hash_size(version & 0x07);
    if hash.len() != expected {
        return Err(AddressError::HashLength {
            expected,
            got: hash.len(),
        });
    }

    Ok(DecodedAddress {
        address_type,
        version: version >> 3,
        hash: hash.to_vec(),
    })
}

// ============================================================================
// Base58 Implementation
// ============================================================================

const BASE58_ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let mut result: Vec<u8> = Vec::new();

    // Leading '1's become leading zeros
    let leading_zeros = input.chars().take_while(|&c| c == '1').count();

    for c in input.chars() {
        let value = BASE58_ALPHABET
            .iter()
            .position(|&x| x as char == c)
            .ok_or(AddressError::InvalidBase58Char(c))? as u32;

        // Multiply result by 58 and add value
        let mut carry = value;
        for byte in result.iter_mut().rev() {
            let temp = (*byte as u32) * 58 + carry;
            *byte = (temp & 0xFF) as u8;
            carry = temp >> 8;
        }

        while carry > 0 {
            result.insert(0, (carry & 0xFF) as u8);
            carry >>= 8;
        }
    }

    let mut final_result = vec![0u8; leading_zeros];
    final_result.extend(result);

    Ok(final_result)
}

// ============================================================================
// CashAddr Implementation
// ============================================================================

const CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const CASHADDR_CHECKSUM_LEN: usize = 8;

fn cashaddr_hash_size(size_bits: u8) -> usize {
    match size_bits {
        0 => 20,
        1 => 24,
        2 => 28,
        3 => 32,
        4 => 40,
        5 => 48,
        6 => 56,
        _ => 64,
    }
}

fn prefix_expand(prefix: &str) -> Vec<u8> {
    let mut result: Vec<u8> = prefix.bytes().map(|b| b & 0x1f).collect();
    result.push(0);
    result
}

fn cashaddr_polymod(values: &[u8]) -> u64 {
    const GEN: [u64; 5] = [0x98f2bc8e61, 0x79b76d99e2, 0xf33e5fb3c4, 0xae2eabe2a8, 0x1e4f43e470];

    let mut chk: u64 = 1;
    for &value in values {
        let top = chk >> 35;
        chk = ((chk & 0x07ffffffff) << 5) ^ (value as u64);
        for (i, &g) in GEN.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= g;
            }
        }
    }

    chk ^ 1
}

fn convert_bits(data: &[u8], from_bits: u8, to_bits: u8, pad: bool) -> Result<Vec<u8>, AddressError> {
    let mut acc: u32 = 0;
    let mut bits: u8 = 0;
    let mut result = Vec::new();
    let max_value = (1u32 << to_bits) - 1;

    for &value in data {
        if value >> from_bits != 0 {
            return Err(AddressError::InvalidCashAddr("Invalid value in data".into()));
        }
        acc = (acc << from_bits) | (value as u32);
        bits += from_bits;

        while bits >= to_bits {
            bits -= to_bits;
            result.push(((acc >> bits) & max_value) as u8);
        }
    }

    if pad {
        if bits > 0 {
            result.push(((acc << (to_bits - bits)) & max_value) as u8);
        }
    } else if bits >= from_bits || ((acc << (to_bits - bits)) & max_value) != 0 {
        return Err(AddressError::InvalidCashAddr("Invalid padding".into()));
    }

    Ok(result)
}
