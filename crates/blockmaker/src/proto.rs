//! Coin family definitions.
//!
//! Each supported chain implements [`Proto`], which bundles the pieces that
//! differ between forks: transaction codec, address format, proof-of-work
//! check, stratum notify layout and share submission handling. Work objects
//! are generic over it, so the family is fixed when the pool is configured.

use crate::address::{decode_base58check, decode_cashaddr, AddressError, DecodedAddress};
use crate::block::BlockHeader;
use crate::coinbase::CoinbasePayload;
use crate::config::MiningConfig;
use crate::difficulty::{bits_to_target, hash_difficulty, hash_meets_target};
use crate::hash::{reverse_bytes, scrypt_1024_1_1};
use crate::notify::{self, NotifyMessage, Submission, SubmitError, WorkerConfig};
use crate::transaction::{Transaction, TransactionError};

/// Maximum size of coinbase scriptSig.
pub const MAX_COINBASE_SCRIPTSIG_SIZE: usize = 100;

/// Outcome of a proof-of-work check on a header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusCheck {
    /// The header hash meets the network target.
    pub valid: bool,
    /// Difficulty the header hash satisfies.
    pub share_difficulty: f64,
}

/// Capabilities of one coin family.
pub trait Proto {
    /// Ticker used in log lines.
    const TICKER: &'static str;

    /// Width of the payout address hash in bytes.
    const ADDRESS_LEN: usize = 20;

    /// Whether transactions of this chain may carry witness data.
    const SEGWIT: bool;

    /// Scale between stratum share difficulty and header difficulty.
    const DIFFICULTY_FACTOR: f64 = 1.0;

    /// Decode a payout or miner fund address.
    fn decode_address(address: &str) -> Result<DecodedAddress, AddressError>;

    /// Decode a template transaction; the data must be consumed exactly.
    fn decode_transaction(data: &[u8]) -> Result<Transaction, TransactionError> {
        Transaction::decode(data)
    }

    /// Proof-of-work hash of a header (internal byte order).
    fn block_hash(header: &BlockHeader) -> [u8; 32] {
        header.hash()
    }

    /// Hash compared against the target. Same as the block hash unless the
    /// chain uses a different proof-of-work function.
    fn pow_hash(header: &BlockHeader) -> [u8; 32] {
        Self::block_hash(header)
    }

    /// Check a header against its own target.
    fn check_consensus(header: &BlockHeader) -> ConsensusCheck {
        let hash = Self::pow_hash(header);
        ConsensusCheck {
            valid: hash_meets_target(&reverse_bytes(&hash), &bits_to_target(header.bits)),
            share_difficulty: hash_difficulty(&hash),
        }
    }

    /// Build the stratum notify payload for a job.
    fn build_notify(
        job_id: u64,
        header: &BlockHeader,
        job_version: u32,
        legacy: &CoinbasePayload,
        merkle_path: &[[u8; 32]],
        reset_previous_work: bool,
    ) -> NotifyMessage {
        notify::build_notify(job_id, header, job_version, legacy, merkle_path, reset_previous_work)
    }

    /// Apply a worker's share submission to the header and coinbase.
    #[allow(clippy::too_many_arguments)]
    fn prepare_for_submit(
        header: &mut BlockHeader,
        job_version: u32,
        legacy: &mut CoinbasePayload,
        witness: &mut CoinbasePayload,
        merkle_path: &[[u8; 32]],
        worker: &WorkerConfig,
        config: &MiningConfig,
        submission: &Submission,
    ) -> Result<(), SubmitError> {
        notify::prepare_for_submit(header, job_version, legacy, witness, merkle_path, worker, config, submission)
    }
}

/// Bitcoin and its segwit-enabled forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitcoin {}

impl Bitcoin {
    /// P2SH version bytes (mainnet, testnet).
    const P2SH_VERSIONS: [u8; 2] = [0x05, 0xc4];
}

impl Proto for Bitcoin {
    const TICKER: &'static str = "BTC";
    const SEGWIT: bool = true;

    fn decode_address(address: &str) -> Result<DecodedAddress, AddressError> {
        decode_base58check(address, &Self::P2SH_VERSIONS)
    }
}

/// Litecoin: Bitcoin codec and segwit, scrypt proof-of-work.
///
/// Block ids stay double SHA256; only the consensus check hashes with scrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Litecoin {}

impl Litecoin {
    /// P2SH version bytes (mainnet `M`, legacy `3`, testnet `Q`, legacy testnet `2`).
    const P2SH_VERSIONS: [u8; 4] = [0x32, 0x05, 0x3a, 0xc4];
}

impl Proto for Litecoin {
    const TICKER: &'static str = "LTC";
    const SEGWIT: bool = true;
    const DIFFICULTY_FACTOR: f64 = 65536.0;

    fn decode_address(address: &str) -> Result<DecodedAddress, AddressError> {
        decode_base58check(address, &Self::P2SH_VERSIONS)
    }

    fn pow_hash(header: &BlockHeader) -> [u8; 32] {
        scrypt_1024_1_1(&header.serialize())
    }
}

/// Bitcoin Cash family: no witness data, CashAddr addresses.
///
/// Hash-ordered forks of this family additionally need `sort_by_hash` set
/// in their mining configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitcoinCash {}

impl Proto for BitcoinCash {
    const TICKER: &'static str = "BCH";
    const SEGWIT: bool = false;

    fn decode_address(address: &str) -> Result<DecodedAddress, AddressError> {
        if address.contains(':') {
            decode_cashaddr(address)
        } else {
            decode_base58check(address, &Bitcoin::P2SH_VERSIONS)
        }
    }
}
