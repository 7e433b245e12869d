//! Transaction selection from block template entries.
//!
//! Two modes exist. Without a transaction limit every entry is validated and
//! passed through in template order. With a limit, entries are decoded to
//! find in-block parents and included parent-first until the limit is
//! reached; fees of transactions left out are taken off the block reward.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::hash::{hash_from_display_hex, reverse_bytes};
use crate::proto::Proto;
use crate::transaction::TransactionError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("transaction {index}: missing or invalid field '{field}'")]
    InvalidField { index: usize, field: &'static str },

    #[error("transaction {index}: data is not valid hex")]
    InvalidHex { index: usize },

    #[error("transaction {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: TransactionError,
    },

    #[error("block reward overflows while applying fee of transaction {index}")]
    RewardOverflow { index: usize },
}

/// One transaction entry from a block template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Serialized transaction as supplied by the node.
    pub hex_data: String,
    /// Serialized size in bytes.
    pub size: usize,
    /// Transaction id (internal byte order).
    pub txid: [u8; 32],
    /// Witness hash (internal byte order), when the node supplied one.
    pub witness_hash: Option<[u8; 32]>,
    /// Declared fee; nodes may report negative values.
    pub fee: i64,
}

impl TransactionRecord {
    /// Parse and validate one template entry.
    pub fn from_json(index: usize, entry: &Value) -> Result<Self, TreeError> {
        let field = |field: &'static str| TreeError::InvalidField { index, field };

        let hex_data = entry.get("data").and_then(Value::as_str).ok_or_else(|| field("data"))?;
        let txid = entry
            .get("txid")
            .and_then(Value::as_str)
            .and_then(hash_from_display_hex)
            .ok_or_else(|| field("txid"))?;
        let fee = entry.get("fee").and_then(Value::as_i64).ok_or_else(|| field("fee"))?;
        let witness_hash = match entry.get("hash") {
            None => None,
            Some(hash) => Some(hash.as_str().and_then(hash_from_display_hex).ok_or_else(|| field("hash"))?),
        };

        if hex_data.len() % 2 != 0 || !hex_data.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TreeError::InvalidHex { index });
        }

        Ok(TransactionRecord {
            hex_data: hex_data.to_string(),
            size: hex_data.len() / 2,
            txid,
            witness_hash,
            fee,
        })
    }
}

/// Transactions chosen for a block and the block reward left after
/// excluded fees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    pub transactions: Vec<TransactionRecord>,
    pub block_reward: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    Visiting,
    Included,
}

struct TransactionNode {
    record: TransactionRecord,
    depends_on: Option<usize>,
    state: VisitState,
}

/// Parse every template entry.
pub fn parse_transactions(entries: &[Value]) -> Result<Vec<TransactionRecord>, TreeError> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| TransactionRecord::from_json(index, entry))
        .collect()
}

/// Validate all entries and keep them in template order.
///
/// The node's coinbase value already pays out every fee, so the reward is
/// returned unchanged.
pub fn transaction_checker(entries: &[Value], block_reward: i64) -> Result<SelectionResult, TreeError> {
    Ok(SelectionResult {
        transactions: parse_transactions(entries)?,
        block_reward,
    })
}

/// Select at most `tx_num_limit` transactions, parents first.
///
/// Each transaction records at most one in-block parent: the last input, in
/// input order, that spends another template transaction. When
/// `sort_by_hash` is set the result is reordered by ascending txid (display
/// hex), which hash-ordered chains require.
pub fn transaction_filter<P: Proto>(
    entries: &[Value],
    tx_num_limit: usize,
    block_reward: i64,
    sort_by_hash: bool,
) -> Result<SelectionResult, TreeError> {
    let records = parse_transactions(entries)?;

    let mut reward = block_reward;
    let mut txid_map = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        txid_map.insert(record.txid, index);
        reward = reward
            .checked_sub(record.fee)
            .ok_or(TreeError::RewardOverflow { index })?;
    }

    let mut nodes = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let data = hex::decode(&record.hex_data).map_err(|_| TreeError::InvalidHex { index })?;
        let tx = P::decode_transaction(&data).map_err(|source| TreeError::Decode { index, source })?;

        let depends_on = tx
            .inputs
            .iter()
            .filter_map(|input| txid_map.get(&input.previous_output_hash).copied())
            .last();

        nodes.push(TransactionNode {
            record,
            depends_on,
            state: VisitState::Unvisited,
        });
    }

    let mut result = Vec::with_capacity(tx_num_limit.min(nodes.len()));
    for index in 0..nodes.len() {
        if !add_transaction(&mut nodes, index, tx_num_limit, &mut result, &mut reward)? {
            break;
        }
    }

    if sort_by_hash {
        result.sort_by_key(|tx| reverse_bytes(&tx.txid));
    }

    debug!(
        ticker = P::TICKER,
        total = nodes.len(),
        selected = result.len(),
        "Transaction filter finished"
    );

    Ok(SelectionResult {
        transactions: result,
        block_reward: reward,
    })
}

/// Include a transaction after its dependency chain.
///
/// Returns false once the limit is reached; entries already committed stay
/// in place.
fn add_transaction(
    nodes: &mut [TransactionNode],
    index: usize,
    tx_num_limit: usize,
    result: &mut Vec<TransactionRecord>,
    block_reward: &mut i64,
) -> Result<bool, TreeError> {
    // A node met again while its own chain is resolving closes a cycle
    if nodes[index].state != VisitState::Unvisited {
        return Ok(true);
    }

    nodes[index].state = VisitState::Visiting;
    if let Some(parent) = nodes[index].depends_on {
        if !add_transaction(nodes, parent, tx_num_limit, result, block_reward)? {
            nodes[index].state = VisitState::Unvisited;
            return Ok(false);
        }
    }

    if result.len() >= tx_num_limit {
        nodes[index].state = VisitState::Unvisited;
        return Ok(false);
    }

    let node = &mut nodes[index];
    *block_reward = block_reward
        .checked_add(node.record.fee)
        .ok_or(TreeError::RewardOverflow { index })?;
    node.state = VisitState::Included;
    result.push(node.record.clone());
    Ok(true)
}

/// Segwit is active when any entry's witness hash differs from its id.
///
/// Runs over the raw template entries, before any filtering.
pub fn is_segwit_enabled(entries: &[Value]) -> bool {
    entries.iter().any(|entry| {
        match (entry.get("txid").and_then(Value::as_str), entry.get("hash").and_then(Value::as_str)) {
            (Some(txid), Some(hash)) => !txid.eq_ignore_ascii_case(hash),
            _ => false,
        }
    })
}
