//! Coinbase transaction construction for pool mining.
//!
//! The coinbase transaction is the first transaction in a block that creates
//! new coins (the block reward) and collects transaction fees. Pools reserve
//! zero bytes at the end of its script-sig which workers later fill with their
//! extra-nonce, so the builder records where those bytes live in both the
//! legacy and the witness serialization.

use std::ops::Range;

use thiserror::Error;

use crate::hash::double_sha256;
use crate::proto::MAX_COINBASE_SCRIPTSIG_SIZE;
use crate::transaction::{serialize_for_coinbase, Transaction, TxIn, TxOut};

/// Errors that can occur when building a coinbase transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoinbaseError {
    #[error("Coinbase scriptSig is {0} bytes (maximum 100)")]
    ScriptSigTooLong(usize),

    #[error("Negative miner payout: {0}")]
    NegativePayout(i64),

    #[error("Segwit coinbase requires a witness commitment script")]
    MissingWitnessCommitment,
}

/// Extra-nonce bytes did not match the reserved region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Extra nonce must be {expected} bytes, got {got}")]
pub struct ExtraNonceSizeError {
    pub expected: usize,
    pub got: usize,
}

/// One serialization of the coinbase with its patch points.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinbasePayload {
    /// Serialized transaction.
    pub data: Vec<u8>,
    /// Offset of the caller supplied extra data (right after the height).
    pub extra_data_offset: usize,
    /// Offset of the reserved extra-nonce bytes.
    pub extra_nonce_offset: usize,
    /// Number of reserved extra-nonce bytes.
    pub extra_nonce_size: usize,
}

impl CoinbasePayload {
    /// Byte range of the extra-nonce region in `data`.
    pub fn extra_nonce_range(&self) -> Range<usize> {
        self.extra_nonce_offset..self.extra_nonce_offset + self.extra_nonce_size
    }

    /// Overwrite the extra-nonce region with `extra_nonce1 ‖ extra_nonce2`.
    pub fn write_extra_nonce(&mut self, extra_nonce1: &[u8], extra_nonce2: &[u8]) -> Result<(), ExtraNonceSizeError> {
        let got = extra_nonce1.len() + extra_nonce2.len();
        if got != self.extra_nonce_size {
            return Err(ExtraNonceSizeError {
                expected: self.extra_nonce_size,
                got,
            });
        }

        let range = self.extra_nonce_range();
        let (first, second) = self.data[range].split_at_mut(extra_nonce1.len());
        first.copy_from_slice(extra_nonce1);
        second.copy_from_slice(extra_nonce2);
        Ok(())
    }

    /// Bytes before the extra-nonce region.
    pub fn coinbase1(&self) -> &[u8] {
        &self.data[..self.extra_nonce_offset]
    }

    /// Bytes after the extra-nonce region.
    pub fn coinbase2(&self) -> &[u8] {
        &self.data[self.extra_nonce_range().end..]
    }

    /// Double SHA256 of the payload. For the legacy payload this is the txid.
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.data)
    }
}

/// A constructed coinbase transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coinbase {
    pub transaction: Transaction,
    /// Serialization without marker, flag or witness (hashed for the txid).
    pub legacy: CoinbasePayload,
    /// Serialization with witness data when present (goes into the block).
    pub witness: CoinbasePayload,
}

impl Coinbase {
    pub fn txid(&self) -> [u8; 32] {
        self.legacy.hash()
    }

    /// Sum of all output values.
    pub fn total_output_value(&self) -> i64 {
        self.transaction.outputs.iter().map(|output| output.value).sum()
    }
}

/// Builder for constructing coinbase transactions.
#[derive(Debug, Clone)]
pub struct CoinbaseBuilder {
    /// The block height (required by BIP34).
    block_height: u64,
    /// Output script receiving the block reward.
    payout_script: Vec<u8>,
    /// Value paid to the payout script.
    block_reward: i64,
    /// Development fee output, skipped when the value is zero.
    dev_fee: i64,
    dev_script_pubkey: Vec<u8>,
    /// Witness commitment output script, present only for segwit blocks.
    witness_commitment: Option<Vec<u8>>,
    /// Caller data placed right after the height.
    extra_data: Vec<u8>,
    /// Pool tag.
    message: Vec<u8>,
    /// Reserved extra-nonce bytes (fixed + mutable).
    extra_nonce_size: usize,
}

impl CoinbaseBuilder {
    /// Create a new coinbase builder.
    pub fn new(block_height: u64, payout_script: Vec<u8>, block_reward: i64) -> Self {
        CoinbaseBuilder {
            block_height,
            payout_script,
            block_reward,
            dev_fee: 0,
            dev_script_pubkey: Vec::new(),
            witness_commitment: None,
            extra_data: Vec::new(),
            message: Vec::new(),
            extra_nonce_size: 0,
        }
    }

    /// Add a development fee output.
    pub fn with_dev_fee(mut self, dev_fee: i64, dev_script_pubkey: Vec<u8>) -> Self {
        self.dev_fee = dev_fee;
        self.dev_script_pubkey = dev_script_pubkey;
        self
    }

    /// Enable segwit with the given commitment output script.
    pub fn with_witness_commitment(mut self, script: Vec<u8>) -> Self {
        self.witness_commitment = Some(script);
        self
    }

    pub fn with_extra_data(mut self, extra_data: &[u8]) -> Self {
        self.extra_data = extra_data.to_vec();
        self
    }

    pub fn with_message(mut self, message: &[u8]) -> Self {
        self.message = message.to_vec();
        self
    }

    pub fn with_extra_nonce_size(mut self, extra_nonce_size: usize) -> Self {
        self.extra_nonce_size = extra_nonce_size;
        self
    }

    /// Build the coinbase transaction and both of its serializations.
    pub fn build(&self) -> Result<Coinbase, CoinbaseError> {
        if self.block_reward < 0 {
            return Err(CoinbaseError::NegativePayout(self.block_reward));
        }
        if let Some(script) = &self.witness_commitment {
            if script.is_empty() {
                return Err(CoinbaseError::MissingWitnessCommitment);
            }
        }

        // scriptSig: height ‖ extra data ‖ message ‖ reserved extra nonce
        let mut script_sig = Vec::with_capacity(MAX_COINBASE_SCRIPTSIG_SIZE);
        serialize_for_coinbase(self.block_height, &mut script_sig);
        let extra_data_offset = script_sig.len();
        script_sig.extend_from_slice(&self.extra_data);
        script_sig.extend_from_slice(&self.message);
        let extra_nonce_offset = script_sig.len();
        script_sig.resize(extra_nonce_offset + self.extra_nonce_size, 0);

        if script_sig.len() > MAX_COINBASE_SCRIPTSIG_SIZE {
            return Err(CoinbaseError::ScriptSigTooLong(script_sig.len()));
        }

        let segwit = self.witness_commitment.is_some();
        let mut input = TxIn::coinbase(script_sig);
        if segwit {
            // Witness reserved value
            input.witness = vec![vec![0u8; 32]];
        }

        let mut transaction = Transaction {
            version: if segwit { 2 } else { 1 },
            inputs: vec![input],
            outputs: Vec::with_capacity(3),
            lock_time: 0,
        };

        transaction.outputs.push(TxOut {
            value: self.block_reward,
            script_pubkey: self.payout_script.clone(),
        });

        if self.dev_fee != 0 {
            transaction.outputs.push(TxOut {
                value: self.dev_fee,
                script_pubkey: self.dev_script_pubkey.clone(),
            });
        }

        if let Some(script) = &self.witness_commitment {
            transaction.outputs.push(TxOut {
                value: 0,
                script_pubkey: script.clone(),
            });
        }

        let payload = |with_witness: bool| {
            let base = transaction.first_script_sig_offset(with_witness);
            CoinbasePayload {
                data: transaction.serialize(with_witness),
                extra_data_offset: base + extra_data_offset,
                extra_nonce_offset: base + extra_nonce_offset,
                extra_nonce_size: self.extra_nonce_size,
            }
        };
        let legacy = payload(false);
        let witness = payload(true);

        Ok(Coinbase {
            transaction,
            legacy,
            witness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::p2pkh_script;
    use crate::merkle::{compute_witness_commitment, witness_commitment_script};

    const HEIGHT: u64 = 875_000;
    const REWARD: i64 = 312_500_000;

    fn builder() -> CoinbaseBuilder {
        CoinbaseBuilder::new(HEIGHT, p2pkh_script(&[0x11; 20]), REWARD)
            .with_message(b"/blockmaker/")
            .with_extra_nonce_size(8)
    }

    fn commitment() -> Vec<u8> {
        witness_commitment_script(&compute_witness_commitment(&[0u8; 32], &[0u8; 32]))
    }

    #[test]
    fn test_legacy_coinbase() {
        let coinbase = builder().build().unwrap();

        assert_eq!(coinbase.transaction.version, 1);
        assert_eq!(coinbase.transaction.outputs.len(), 1);
        assert_eq!(coinbase.legacy, coinbase.witness);
        assert_eq!(coinbase.total_output_value(), REWARD);

        let input = &coinbase.transaction.inputs[0];
        assert_eq!(input.previous_output_hash, [0u8; 32]);
        assert_eq!(input.previous_output_index, u32::MAX);
        assert_eq!(input.sequence, u32::MAX);
    }

    #[test]
    fn test_segwit_coinbase() {
        let coinbase = builder().with_witness_commitment(commitment()).build().unwrap();

        assert_eq!(coinbase.transaction.version, 2);
        assert_eq!(coinbase.transaction.inputs[0].witness, vec![vec![0u8; 32]]);

        let last = coinbase.transaction.outputs.last().unwrap();
        assert_eq!(last.value, 0);
        assert_eq!(last.script_pubkey, commitment());

        // Marker and flag shift every witness offset by two bytes
        assert_eq!(coinbase.witness.extra_nonce_offset, coinbase.legacy.extra_nonce_offset + 2);
        assert_eq!(coinbase.witness.extra_data_offset, coinbase.legacy.extra_data_offset + 2);
        assert!(coinbase.witness.data.len() > coinbase.legacy.data.len());
    }

    #[test]
    fn test_output_sum_includes_dev_fee() {
        let coinbase = builder()
            .with_dev_fee(1_000_000, vec![0x51])
            .with_witness_commitment(commitment())
            .build()
            .unwrap();

        assert_eq!(coinbase.transaction.outputs.len(), 3);
        assert_eq!(coinbase.transaction.outputs[1].script_pubkey, vec![0x51]);
        assert_eq!(coinbase.total_output_value(), REWARD + 1_000_000);
    }

    #[test]
    fn test_offsets_point_into_script_sig() {
        let extra = [0xE1, 0xE2, 0xE3];
        let coinbase = builder()
            .with_extra_data(&extra)
            .with_witness_commitment(commitment())
            .build()
            .unwrap();

        for payload in [&coinbase.legacy, &coinbase.witness] {
            let start = payload.extra_data_offset;
            assert_eq!(&payload.data[start..start + 3], &extra);
            assert_eq!(&payload.data[start + 3..start + 3 + 12], b"/blockmaker/");

            let range = payload.extra_nonce_range();
            assert!(range.end <= payload.data.len());
            assert_eq!(&payload.data[range], &[0u8; 8]);
            assert_eq!(payload.extra_nonce_offset, start + 3 + 12);
        }
    }

    #[test]
    fn test_serializations_decode() {
        let coinbase = builder().with_witness_commitment(commitment()).build().unwrap();

        let legacy = Transaction::decode(&coinbase.legacy.data).unwrap();
        assert!(!legacy.has_witness());
        assert_eq!(legacy.txid(), coinbase.txid());

        let witness = Transaction::decode(&coinbase.witness.data).unwrap();
        assert_eq!(witness, coinbase.transaction);
    }

    #[test]
    fn test_write_extra_nonce() {
        let mut coinbase = builder().build().unwrap();
        let before = coinbase.txid();

        coinbase.legacy.write_extra_nonce(&[1, 2, 3, 4], &[5, 6, 7, 8]).unwrap();
        assert_eq!(&coinbase.legacy.data[coinbase.legacy.extra_nonce_range()], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_ne!(coinbase.txid(), before);

        let result = coinbase.legacy.write_extra_nonce(&[1, 2, 3, 4], &[5, 6]);
        assert_eq!(result, Err(ExtraNonceSizeError { expected: 8, got: 6 }));
    }

    #[test]
    fn test_coinbase_split() {
        let coinbase = builder().build().unwrap();
        let payload = &coinbase.legacy;

        let mut joined = payload.coinbase1().to_vec();
        joined.extend_from_slice(&[0u8; 8]);
        joined.extend_from_slice(payload.coinbase2());
        assert_eq!(joined, payload.data);
    }

    #[test]
    fn test_script_sig_limit() {
        let result = builder().with_message(&[b'x'; 100]).build();
        assert!(matches!(result, Err(CoinbaseError::ScriptSigTooLong(_))));
    }

    #[test]
    fn test_negative_payout() {
        let result = CoinbaseBuilder::new(HEIGHT, vec![0x51], -1).build();
        assert_eq!(result, Err(CoinbaseError::NegativePayout(-1)));
    }
}
