//! Mining configuration shared by every job of a pool instance.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::AddressError;

/// Largest extra-nonce part a worker may hold, in bytes.
pub const MAX_EXTRA_NONCE_PART_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse mining config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {name} size: {size} (must be 1-8 bytes)")]
    InvalidExtraNonceSize { name: &'static str, size: usize },

    #[error("Invalid payout address: {0}")]
    Address(#[from] AddressError),

    #[error("Payout address hash is {got} bytes, expected {expected}")]
    AddressLength { expected: usize, got: usize },

    #[error("Payout address must be a pay-to-public-key-hash address")]
    PayoutAddressType,
}

/// Mining settings for block template assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Address receiving the block reward.
    pub payout_address: String,

    /// Pool tag written into every coinbase script-sig.
    #[serde(default)]
    pub coinbase_message: String,

    /// Maximum number of template transactions per block; 0 keeps them all.
    #[serde(default)]
    pub tx_num_limit: usize,

    /// Extra-nonce bytes assigned per worker connection (extranonce1).
    #[serde(default = "default_extra_nonce_size")]
    pub fixed_extra_nonce_size: usize,

    /// Extra-nonce bytes rolled by the worker (extranonce2).
    #[serde(default = "default_extra_nonce_size")]
    pub mutable_extra_nonce_size: usize,

    /// Order selected transactions by id (hash-ordered chains).
    #[serde(default)]
    pub sort_by_hash: bool,

    /// Version bits workers may roll (BIP320).
    #[serde(default = "default_version_mask")]
    pub version_mask: u32,
}

fn default_extra_nonce_size() -> usize {
    4
}

fn default_version_mask() -> u32 {
    0x1fffe000
}

impl MiningConfig {
    /// Config with default settings for `payout_address`.
    pub fn new(payout_address: impl Into<String>) -> Self {
        MiningConfig {
            payout_address: payout_address.into(),
            coinbase_message: String::new(),
            tx_num_limit: 0,
            fixed_extra_nonce_size: default_extra_nonce_size(),
            mutable_extra_nonce_size: default_extra_nonce_size(),
            sort_by_hash: false,
            version_mask: default_version_mask(),
        }
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: MiningConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, size) in [
            ("extranonce1", self.fixed_extra_nonce_size),
            ("extranonce2", self.mutable_extra_nonce_size),
        ] {
            if size == 0 || size > MAX_EXTRA_NONCE_PART_SIZE {
                return Err(ConfigError::InvalidExtraNonceSize { name, size });
            }
        }
        Ok(())
    }

    /// Total bytes reserved in the coinbase for extra nonces.
    pub fn extra_nonce_size(&self) -> usize {
        self.fixed_extra_nonce_size + self.mutable_extra_nonce_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MiningConfig::from_json(r#"{ "payout_address": "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2" }"#).unwrap();

        assert_eq!(config, MiningConfig::new("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"));
        assert_eq!(config.extra_nonce_size(), 8);
        assert_eq!(config.tx_num_limit, 0);
        assert!(!config.sort_by_hash);
    }

    #[test]
    fn test_full_config() {
        let config = MiningConfig::from_json(
            r#"{
                "payout_address": "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a",
                "coinbase_message": "/pool/",
                "tx_num_limit": 500,
                "fixed_extra_nonce_size": 4,
                "mutable_extra_nonce_size": 8,
                "sort_by_hash": true,
                "version_mask": 0
            }"#,
        )
        .unwrap();

        assert_eq!(config.coinbase_message, "/pool/");
        assert_eq!(config.tx_num_limit, 500);
        assert_eq!(config.extra_nonce_size(), 12);
        assert!(config.sort_by_hash);
        assert_eq!(config.version_mask, 0);
    }

    #[test]
    fn test_missing_payout_address() {
        assert!(matches!(MiningConfig::from_json("{}"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_extra_nonce_size() {
        let result = MiningConfig::from_json(r#"{ "payout_address": "x", "mutable_extra_nonce_size": 9 }"#);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidExtraNonceSize { name: "extranonce2", size: 9 })
        ));

        let mut config = MiningConfig::new("x");
        config.fixed_extra_nonce_size = 0;
        assert!(config.validate().is_err());
    }
}
