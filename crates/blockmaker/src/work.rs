//! Block work built from a node's `getblocktemplate` response.
//!
//! A [`BlockWork`] owns everything a stratum job needs: the header, both
//! coinbase serializations with their extra-nonce patch points, the merkle
//! path and the selected transactions. It is loaded once from a template and
//! then serves notify payloads, share submissions and the final block.

use std::marker::PhantomData;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::address::{p2pkh_script, AddressError, AddressType};
use crate::block::{assemble_block_hex, BlockHeader};
use crate::coinbase::{CoinbaseBuilder, CoinbaseError, CoinbasePayload};
use crate::config::{ConfigError, MiningConfig};
use crate::difficulty::{format_difficulty, get_difficulty};
use crate::hash::{hash_from_display_hex, hash_to_display_hex};
use crate::merkle::{calculate_witness_commitment, merkle_path, CommitmentError};
use crate::notify::{NotifyMessage, Submission, SubmitError, WorkerConfig};
use crate::proto::{ConsensusCheck, Proto};
use crate::tree::{is_segwit_enabled, transaction_checker, transaction_filter, SelectionResult, TreeError};

/// Errors from loading a block template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no result")]
    NoResult,

    #[error("missing data")]
    MissingData,

    #[error("height or header data invalid format")]
    InvalidFormat,

    #[error("invalid coinbasedevreward: {0}")]
    DevReward(&'static str),

    #[error("invalid minerfund: {0}")]
    MinerFund(&'static str),

    #[error("invalid minerfund address: {0}")]
    MinerFundAddress(#[source] AddressError),

    #[error(transparent)]
    Transactions(#[from] TreeError),

    #[error(transparent)]
    Commitment(#[from] CommitmentError),

    #[error(transparent)]
    Coinbase(#[from] CoinbaseError),

    #[error("block reward overflows after miner fund of {0}")]
    RewardOverflow(i64),
}

/// Lifecycle of a [`BlockWork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Empty,
    Loading,
    Ready,
    Failed,
}

/// Header fields read from a template.
struct TemplateHeader {
    height: u64,
    version: u32,
    prev_block_hash: [u8; 32],
    curtime: u32,
    bits: u32,
    coinbase_value: i64,
}

/// Per-job block state for coin family `P`.
///
/// Not internally synchronized; callers serialize access.
#[derive(Debug, Clone)]
pub struct BlockWork<P: Proto> {
    job_id: u64,
    config: MiningConfig,
    payout_script: Vec<u8>,
    state: WorkState,

    header: BlockHeader,
    /// Version announced to workers, before any version rolling.
    job_version: u32,
    height: u64,
    block_reward: i64,
    segwit_enabled: bool,
    merkle_path: Vec<[u8; 32]>,

    dev_fee: i64,
    dev_script_pubkey: Vec<u8>,
    witness_commitment: Vec<u8>,
    legacy: CoinbasePayload,
    witness: CoinbasePayload,

    tx_hex_data: String,
    tx_count: usize,
    notify: Option<NotifyMessage>,

    _proto: PhantomData<P>,
}

impl<P: Proto> BlockWork<P> {
    /// Create an empty work paying to `config.payout_address`.
    pub fn new(job_id: u64, config: MiningConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let address = P::decode_address(&config.payout_address)?;
        if address.hash.len() != P::ADDRESS_LEN {
            return Err(ConfigError::AddressLength {
                expected: P::ADDRESS_LEN,
                got: address.hash.len(),
            });
        }
        if address.address_type != AddressType::P2PKH {
            return Err(ConfigError::PayoutAddressType);
        }

        Ok(BlockWork {
            job_id,
            config,
            payout_script: p2pkh_script(&address.hash),
            state: WorkState::Empty,
            header: BlockHeader::default(),
            job_version: 0,
            height: 0,
            block_reward: 0,
            segwit_enabled: false,
            merkle_path: Vec::new(),
            dev_fee: 0,
            dev_script_pubkey: Vec::new(),
            witness_commitment: Vec::new(),
            legacy: CoinbasePayload::default(),
            witness: CoinbasePayload::default(),
            tx_hex_data: String::new(),
            tx_count: 0,
            notify: None,
            _proto: PhantomData,
        })
    }

    /// Load the work from a `getblocktemplate` JSON-RPC response.
    ///
    /// On error the work is left in [`WorkState::Failed`] and must not be
    /// handed out to workers.
    pub fn load_from_template(&mut self, document: &Value) -> Result<(), TemplateError> {
        self.state = WorkState::Loading;
        match self.load(document) {
            Ok(()) => {
                self.state = WorkState::Ready;
                Ok(())
            }
            Err(error) => {
                warn!(ticker = P::TICKER, job_id = self.job_id, error = %error, "Failed to load block template");
                self.state = WorkState::Failed;
                Err(error)
            }
        }
    }

    fn load(&mut self, document: &Value) -> Result<(), TemplateError> {
        let template = document
            .get("result")
            .filter(|result| result.is_object())
            .ok_or(TemplateError::NoResult)?;

        let header = read_header(template)?;
        let transactions = template
            .get("transactions")
            .and_then(Value::as_array)
            .ok_or(TemplateError::MissingData)?;

        self.height = header.height;
        self.segwit_enabled = P::SEGWIT && is_segwit_enabled(transactions);

        let limit = self.config.tx_num_limit;
        let tx_filter = limit > 0 && transactions.len() > limit;
        let SelectionResult {
            transactions: selected,
            block_reward,
        } = if tx_filter {
            transaction_filter::<P>(transactions, limit, header.coinbase_value, self.config.sort_by_hash)?
        } else {
            transaction_checker(transactions, header.coinbase_value)?
        };
        self.block_reward = block_reward;

        self.dev_fee = 0;
        self.dev_script_pubkey.clear();
        if let Some((value, script)) = coinbase_dev_reward(template)? {
            self.dev_fee = value;
            self.dev_script_pubkey = script;
        }
        if let Some((value, script)) = miner_fund::<P>(template)? {
            self.block_reward = self
                .block_reward
                .checked_sub(value)
                .ok_or(TemplateError::RewardOverflow(value))?;
            self.dev_fee = value;
            self.dev_script_pubkey = script;
        }

        if tx_filter {
            info!(
                ticker = P::TICKER,
                transactions_before = transactions.len(),
                transactions_after = selected.len(),
                coinbase_value_before = header.coinbase_value,
                coinbase_value_after = self.block_reward,
                difficulty = %format_difficulty(get_difficulty(header.bits)),
                "Transaction filter applied"
            );
        } else {
            debug!(
                ticker = P::TICKER,
                transactions = selected.len(),
                coinbase_value = self.block_reward,
                "Template transactions checked"
            );
        }

        self.witness_commitment = if self.segwit_enabled {
            let default = template.get("default_witness_commitment").and_then(Value::as_str);
            calculate_witness_commitment(&selected, default, tx_filter)?
        } else {
            Vec::new()
        };

        self.header = BlockHeader {
            version: header.version,
            prev_block_hash: header.prev_block_hash,
            merkle_root: [0u8; 32],
            timestamp: header.curtime,
            bits: header.bits,
            nonce: 0,
        };
        self.job_version = header.version;

        self.build_coinbase(&[])?;

        self.tx_hex_data = selected.iter().map(|tx| tx.hex_data.as_str()).collect();
        let txids: Vec<[u8; 32]> = selected.iter().map(|tx| tx.txid).collect();
        self.merkle_path = merkle_path(&txids);
        self.tx_count = selected.len();

        self.notify = Some(self.notify_payload(true));

        debug!(
            ticker = P::TICKER,
            job_id = self.job_id,
            height = self.height,
            segwit = self.segwit_enabled,
            transactions = self.tx_count,
            "Block template loaded"
        );
        Ok(())
    }

    /// Build the coinbase payloads, with `extra_data` after the height.
    fn build_coinbase(&mut self, extra_data: &[u8]) -> Result<(), CoinbaseError> {
        let mut builder = CoinbaseBuilder::new(self.height, self.payout_script.clone(), self.block_reward)
            .with_dev_fee(self.dev_fee, self.dev_script_pubkey.clone())
            .with_extra_data(extra_data)
            .with_message(self.config.coinbase_message.as_bytes())
            .with_extra_nonce_size(self.config.extra_nonce_size());
        if self.segwit_enabled {
            builder = builder.with_witness_commitment(self.witness_commitment.clone());
        }

        let coinbase = builder.build()?;
        self.legacy = coinbase.legacy;
        self.witness = coinbase.witness;
        Ok(())
    }

    fn notify_payload(&self, reset_previous_work: bool) -> NotifyMessage {
        P::build_notify(
            self.job_id,
            &self.header,
            self.job_version,
            &self.legacy,
            &self.merkle_path,
            reset_previous_work,
        )
    }

    pub fn ready(&self) -> bool {
        self.state == WorkState::Ready
    }

    pub fn state(&self) -> WorkState {
        self.state
    }

    /// Refresh the header time and rebuild the notify payload.
    pub fn mutate(&mut self) {
        debug_assert!(self.ready(), "mutate on work that is not ready");
        self.header.timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(self.header.timestamp);
        self.notify = Some(self.notify_payload(true));
    }

    /// Rebuild the notify payload.
    pub fn build_notify_message(&mut self, reset_previous_work: bool) -> &NotifyMessage {
        debug_assert!(self.ready(), "notify requested for work that is not ready");
        self.notify.insert(self.notify_payload(reset_previous_work))
    }

    /// Latest notify payload, if the work has been loaded.
    pub fn notify_message(&self) -> Option<&NotifyMessage> {
        self.notify.as_ref()
    }

    /// Apply a worker's share to the header and both coinbase payloads.
    pub fn prepare_for_submit(&mut self, worker: &WorkerConfig, submission: &Submission) -> Result<(), SubmitError> {
        debug_assert!(self.ready(), "submit against work that is not ready");
        P::prepare_for_submit(
            &mut self.header,
            self.job_version,
            &mut self.legacy,
            &mut self.witness,
            &self.merkle_path,
            worker,
            &self.config,
            submission,
        )
    }

    /// Proof-of-work check of the current header.
    pub fn check_consensus(&self) -> ConsensusCheck {
        P::check_consensus(&self.header)
    }

    /// Current header hash as display hex.
    pub fn block_hash(&self) -> String {
        hash_to_display_hex(&P::block_hash(&self.header))
    }

    /// Network difficulty of the work.
    pub fn expected_work(&self) -> f64 {
        get_difficulty(self.header.bits)
    }

    /// Reward per unit of difficulty, scaled by coin price and a pool
    /// coefficient. Used to compare works across coins.
    pub fn abstract_profit_value(&self, price: f64, coeff: f64) -> f64 {
        price * self.block_reward as f64 / get_difficulty(self.header.bits) * coeff
    }

    /// Serialize the block with the current header and witness coinbase.
    pub fn build_block(&self) -> String {
        debug_assert!(self.ready(), "block requested for work that is not ready");
        assemble_block_hex(&self.header, &self.witness.data, self.tx_count, &self.tx_hex_data)
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn job_version(&self) -> u32 {
        self.job_version
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Miner payout after excluded fees and miner fund.
    pub fn block_reward(&self) -> i64 {
        self.block_reward
    }

    pub fn dev_fee(&self) -> i64 {
        self.dev_fee
    }

    pub fn segwit_enabled(&self) -> bool {
        self.segwit_enabled
    }

    /// Number of selected transactions, without the coinbase.
    pub fn tx_count(&self) -> usize {
        self.tx_count
    }

    pub fn merkle_path(&self) -> &[[u8; 32]] {
        &self.merkle_path
    }

    pub fn legacy_coinbase(&self) -> &CoinbasePayload {
        &self.legacy
    }

    pub fn witness_coinbase(&self) -> &CoinbasePayload {
        &self.witness
    }
}

fn read_header(template: &Value) -> Result<TemplateHeader, TemplateError> {
    const REQUIRED: [&str; 6] = ["height", "version", "previousblockhash", "curtime", "bits", "coinbasevalue"];
    if REQUIRED.iter().any(|field| template.get(*field).is_none()) {
        return Err(TemplateError::MissingData);
    }

    let word = |field: &str| template[field].as_u64().and_then(|value| u32::try_from(value).ok());
    let (Some(height), Some(version), Some(prev_block_hash), Some(curtime), Some(bits), Some(coinbase_value)) = (
        template["height"].as_u64(),
        word("version"),
        template["previousblockhash"].as_str().and_then(hash_from_display_hex),
        word("curtime"),
        template["bits"]
            .as_str()
            .and_then(|bits| u32::from_str_radix(bits, 16).ok()),
        template["coinbasevalue"].as_i64(),
    ) else {
        return Err(TemplateError::InvalidFormat);
    };

    Ok(TemplateHeader {
        height,
        version,
        prev_block_hash,
        curtime,
        bits,
        coinbase_value,
    })
}

/// `coinbasedevreward`: an additional output next to the miner payout.
fn coinbase_dev_reward(template: &Value) -> Result<Option<(i64, Vec<u8>)>, TemplateError> {
    let Some(reward) = template.get("coinbasedevreward") else {
        return Ok(None);
    };

    let value = reward
        .get("value")
        .and_then(Value::as_i64)
        .ok_or(TemplateError::DevReward("value"))?;
    let script = reward
        .get("scriptpubkey")
        .and_then(Value::as_str)
        .and_then(|script| hex::decode(script).ok())
        .ok_or(TemplateError::DevReward("scriptpubkey"))?;

    Ok(Some((value, script)))
}

/// `coinbasetxn.minerfund`: a mandatory share of the reward paid to the
/// first listed address.
fn miner_fund<P: Proto>(template: &Value) -> Result<Option<(i64, Vec<u8>)>, TemplateError> {
    let Some(fund) = template.get("coinbasetxn").and_then(|coinbase| coinbase.get("minerfund")) else {
        return Ok(None);
    };

    let address = fund
        .get("addresses")
        .and_then(Value::as_array)
        .and_then(|addresses| addresses.first())
        .and_then(Value::as_str)
        .ok_or(TemplateError::MinerFund("addresses"))?;
    let value = fund
        .get("minimumvalue")
        .and_then(Value::as_i64)
        .ok_or(TemplateError::MinerFund("minimumvalue"))?;

    let script = P::decode_address(address)
        .map_err(TemplateError::MinerFundAddress)?
        .script_pubkey();

    Ok(Some((value, script)))
}
