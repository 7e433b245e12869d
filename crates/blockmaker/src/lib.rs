//! Block template assembly for mining pools.
//!
//! This crate turns a node's `getblocktemplate` response into stratum work:
//! - Transaction selection with in-block dependency ordering
//! - Coinbase construction with reserved extra-nonce space
//! - Merkle path and witness commitment calculation
//! - Share submission handling and final block serialization
//!
//! Coin specific behavior is selected through the [`Proto`] trait.

pub mod address;
pub mod block;
pub mod coinbase;
pub mod config;
pub mod difficulty;
pub mod hash;
pub mod merkle;
pub mod notify;
pub mod proto;
pub mod transaction;
pub mod tree;
pub mod work;

pub use address::{AddressError, AddressType, DecodedAddress};
pub use block::BlockHeader;
pub use coinbase::{Coinbase, CoinbaseBuilder, CoinbasePayload};
pub use config::{ConfigError, MiningConfig};
pub use difficulty::{bits_to_target, get_difficulty, hash_meets_target};
pub use hash::double_sha256;
pub use merkle::{compute_merkle_root, merkle_path};
pub use notify::{NotifyMessage, Submission, SubmitError, WorkerConfig};
pub use proto::{Bitcoin, BitcoinCash, ConsensusCheck, Litecoin, Proto};
pub use transaction::{Transaction, TransactionError};
pub use tree::{transaction_checker, transaction_filter, SelectionResult, TransactionRecord, TreeError};
pub use work::{BlockWork, TemplateError, WorkState};
