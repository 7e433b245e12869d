//! Block header serialization and final block assembly.

use thiserror::Error;

use crate::hash::double_sha256;
use crate::transaction::encode_varint;

/// Size of a block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Block header must be 80 bytes, got {0}")]
pub struct HeaderLengthError(pub usize);

/// A Bitcoin block header (80 bytes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version with BIP9 versionbits.
    pub version: u32,
    /// Hash of the previous block (internal byte order).
    pub prev_block_hash: [u8; 32],
    /// Merkle root of all transactions.
    pub merkle_root: [u8; 32],
    /// Block timestamp (Unix time).
    pub timestamp: u32,
    /// Difficulty target in compact "bits" format.
    pub bits: u32,
    /// Nonce for proof of work.
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialize the block header to 80 bytes.
    pub fn serialize(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut header = [0u8; BLOCK_HEADER_SIZE];

        header[0..4].copy_from_slice(&self.version.to_le_bytes());
        header[4..36].copy_from_slice(&self.prev_block_hash);
        header[36..68].copy_from_slice(&self.merkle_root);
        header[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        header[72..76].copy_from_slice(&self.bits.to_le_bytes());
        header[76..80].copy_from_slice(&self.nonce.to_le_bytes());

        header
    }

    /// Parse a header from the first 80 bytes of `data`.
    pub fn deserialize(data: &[u8]) -> Result<Self, HeaderLengthError> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(HeaderLengthError(data.len()));
        }

        let word = |offset: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&data[offset..offset + 4]);
            u32::from_le_bytes(bytes)
        };

        let mut prev_block_hash = [0u8; 32];
        prev_block_hash.copy_from_slice(&data[4..36]);
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&data[36..68]);

        Ok(BlockHeader {
            version: word(0),
            prev_block_hash,
            merkle_root,
            timestamp: word(68),
            bits: word(72),
            nonce: word(76),
        })
    }

    /// Compute the block hash (double SHA256).
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.serialize())
    }
}

/// Serialize a complete block for submission as lowercase hex.
///
/// Layout: header, transaction count (selected + coinbase), the witness
/// serialization of the coinbase, then the selected transactions exactly as
/// the node supplied them.
pub fn assemble_block_hex(
    header: &BlockHeader,
    coinbase_witness: &[u8],
    tx_count: usize,
    tx_hex_data: &str,
) -> String {
    let mut prefix = Vec::with_capacity(BLOCK_HEADER_SIZE + 9);
    prefix.extend_from_slice(&header.serialize());
    encode_varint(tx_count as u64 + 1, &mut prefix);

    let mut block = String::with_capacity((prefix.len() + coinbase_witness.len()) * 2 + tx_hex_data.len());
    block.push_str(&hex::encode(prefix));
    block.push_str(&hex::encode(coinbase_witness));
    block.push_str(tx_hex_data);
    block
}
