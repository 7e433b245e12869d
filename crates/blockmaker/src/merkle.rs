//! Merkle tree computation for Bitcoin transactions.

use thiserror::Error;

use crate::address::OP_RETURN;
use crate::hash::{double_sha256, hash_pair, hash_to_display_hex};
use crate::tree::TransactionRecord;

/// Witness commitment header (magic bytes).
pub const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitmentError {
    #[error("transaction {0} has no witness hash")]
    MissingWitnessHash(String),

    #[error("default_witness_commitment is not valid hex")]
    InvalidDefaultCommitment,
}

/// Compute the merkle root from a list of transaction IDs.
///
/// Odd levels duplicate their last element. An empty list gives a zero root.
pub fn compute_merkle_root(txids: &[[u8; 32]]) -> [u8; 32] {
    if txids.is_empty() {
        return [0u8; 32];
    }

    let mut current_level: Vec<[u8; 32]> = txids.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }

    current_level[0]
}

/// Compute the merkle path for the coinbase.
///
/// `txids` are the block's transactions without the coinbase. The result is
/// the list of sibling hashes that, hashed in order with the coinbase txid,
/// yields the merkle root.
pub fn merkle_path(txids: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut path = Vec::new();

    // Level without its first element, which is the unknown coinbase branch
    let mut level: Vec<[u8; 32]> = txids.to_vec();

    while !level.is_empty() {
        path.push(level[0]);

        // Pair up the rest starting after the coinbase sibling
        let rest = &level[1..];
        level = rest
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }

    path
}

/// Recompute the merkle root from the coinbase txid and its merkle path.
pub fn merkle_root_from_path(coinbase_txid: &[u8; 32], path: &[[u8; 32]]) -> [u8; 32] {
    path.iter()
        .fold(*coinbase_txid, |current, branch| hash_pair(&current, branch))
}

/// Compute the witness commitment for a SegWit block.
///
/// The witness commitment is: SHA256d(witness_merkle_root || witness_reserved_value)
pub fn compute_witness_commitment(witness_merkle_root: &[u8; 32], witness_reserved_value: &[u8; 32]) -> [u8; 32] {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(witness_merkle_root);
    data[32..].copy_from_slice(witness_reserved_value);

    double_sha256(&data)
}

/// Generate the scriptPubKey for a witness commitment output.
///
/// Format: OP_RETURN <commitment>
/// Where commitment = 0xaa21a9ed || witness_commitment
pub fn witness_commitment_script(witness_commitment: &[u8; 32]) -> Vec<u8> {
    let mut script = Vec::with_capacity(38);

    script.push(OP_RETURN);
    script.push(0x24); // Push 36 bytes
    script.extend_from_slice(&WITNESS_COMMITMENT_HEADER);
    script.extend_from_slice(witness_commitment);

    script
}

/// Witness commitment script for the selected transactions.
///
/// The coinbase contributes an all-zero witness hash and a zero reserved
/// value. When the template was not filtered the node's precomputed
/// `default_witness_commitment` is authoritative and used as is.
pub fn calculate_witness_commitment(
    selected: &[TransactionRecord],
    default_commitment: Option<&str>,
    tx_filter: bool,
) -> Result<Vec<u8>, CommitmentError> {
    if let (false, Some(default)) = (tx_filter, default_commitment) {
        return hex::decode(default).map_err(|_| CommitmentError::InvalidDefaultCommitment);
    }

    let mut wtxids = Vec::with_capacity(selected.len() + 1);
    wtxids.push([0u8; 32]);
    for tx in selected {
        let wtxid = tx
            .witness_hash
            .ok_or_else(|| CommitmentError::MissingWitnessHash(hash_to_display_hex(&tx.txid)))?;
        wtxids.push(wtxid);
    }

    let witness_root = compute_merkle_root(&wtxids);
    let commitment = compute_witness_commitment(&witness_root, &[0u8; 32]);
    Ok(witness_commitment_script(&commitment))
}
