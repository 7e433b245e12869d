//! Stratum job payloads and share submission handling.
//!
//! Framing and transport belong to the stratum server. This module only
//! produces the `mining.notify` parameters for a job and applies the values
//! from a `mining.submit` back onto the header and coinbase.

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::block::BlockHeader;
use crate::coinbase::{CoinbasePayload, ExtraNonceSizeError};
use crate::config::MiningConfig;
use crate::merkle::merkle_root_from_path;

/// Errors from applying a share submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Invalid submit parameter '{0}'")]
    InvalidParam(&'static str),

    #[error("extranonce1 must be {expected} bytes, got {got}")]
    ExtraNonce1Size { expected: usize, got: usize },

    #[error("extranonce2 must be {expected} bytes, got {got}")]
    ExtraNonce2Size { expected: usize, got: usize },

    #[error("Version bits {bits:#010x} outside allowed mask {mask:#010x}")]
    VersionBitsOutsideMask { bits: u32, mask: u32 },

    #[error(transparent)]
    ExtraNonce(#[from] ExtraNonceSizeError),
}

/// Parameters of a `mining.notify` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotifyMessage {
    pub job_id: String,
    /// Previous block hash with each 4-byte word byte-swapped.
    pub prev_hash: String,
    pub coinbase1: String,
    pub coinbase2: String,
    pub merkle_branches: Vec<String>,
    pub version: String,
    pub bits: String,
    pub time: String,
    pub clean_jobs: bool,
}

impl NotifyMessage {
    /// Positional parameters in stratum order.
    pub fn to_params(&self) -> Value {
        json!([
            self.job_id,
            self.prev_hash,
            self.coinbase1,
            self.coinbase2,
            self.merkle_branches,
            self.version,
            self.bits,
            self.time,
            self.clean_jobs,
        ])
    }
}

/// Per-connection worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Extra-nonce prefix assigned to the connection.
    pub extra_nonce1: Vec<u8>,
    /// Version bits negotiated through `mining.configure`; zero disables
    /// version rolling.
    pub version_mask: u32,
}

/// Values from a `mining.submit` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub extra_nonce2: Vec<u8>,
    pub time: u32,
    pub nonce: u32,
    pub version_bits: Option<u32>,
}

impl Submission {
    /// Parse `[worker, job_id, extranonce2, ntime, nonce, version_bits?]`.
    pub fn from_params(params: &[Value]) -> Result<Self, SubmitError> {
        let text = |index: usize, name: &'static str| {
            params
                .get(index)
                .and_then(Value::as_str)
                .ok_or(SubmitError::InvalidParam(name))
        };
        let word = |index: usize, name: &'static str| {
            text(index, name).and_then(|value| parse_hex_u32(value).ok_or(SubmitError::InvalidParam(name)))
        };

        let extra_nonce2 =
            hex::decode(text(2, "extranonce2")?).map_err(|_| SubmitError::InvalidParam("extranonce2"))?;
        let version_bits = match params.get(5) {
            None | Some(Value::Null) => None,
            Some(_) => Some(word(5, "version_bits")?),
        };

        Ok(Submission {
            extra_nonce2,
            time: word(3, "ntime")?,
            nonce: word(4, "nonce")?,
            version_bits,
        })
    }
}

fn parse_hex_u32(value: &str) -> Option<u32> {
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    u32::from_str_radix(value, 16).ok()
}

/// Previous block hash in stratum's word-swapped form.
pub fn stratum_prev_hash(hash: &[u8; 32]) -> String {
    let mut swapped = *hash;
    for word in swapped.chunks_exact_mut(4) {
        word.reverse();
    }
    hex::encode(swapped)
}

/// Build the notify parameters for a job.
pub fn build_notify(
    job_id: u64,
    header: &BlockHeader,
    job_version: u32,
    legacy: &CoinbasePayload,
    merkle_path: &[[u8; 32]],
    reset_previous_work: bool,
) -> NotifyMessage {
    NotifyMessage {
        job_id: format!("{:x}", job_id),
        prev_hash: stratum_prev_hash(&header.prev_block_hash),
        coinbase1: hex::encode(legacy.coinbase1()),
        coinbase2: hex::encode(legacy.coinbase2()),
        merkle_branches: merkle_path.iter().map(hex::encode).collect(),
        version: format!("{:08x}", job_version),
        bits: format!("{:08x}", header.bits),
        time: format!("{:08x}", header.timestamp),
        clean_jobs: reset_previous_work,
    }
}

/// Apply a share submission to the job's header and coinbase payloads.
///
/// Both payloads receive the same extra-nonce bytes; the merkle root is
/// recomputed from the patched legacy coinbase.
#[allow(clippy::too_many_arguments)]
pub fn prepare_for_submit(
    header: &mut BlockHeader,
    job_version: u32,
    legacy: &mut CoinbasePayload,
    witness: &mut CoinbasePayload,
    merkle_path: &[[u8; 32]],
    worker: &WorkerConfig,
    config: &MiningConfig,
    submission: &Submission,
) -> Result<(), SubmitError> {
    if worker.extra_nonce1.len() != config.fixed_extra_nonce_size {
        return Err(SubmitError::ExtraNonce1Size {
            expected: config.fixed_extra_nonce_size,
            got: worker.extra_nonce1.len(),
        });
    }
    if submission.extra_nonce2.len() != config.mutable_extra_nonce_size {
        return Err(SubmitError::ExtraNonce2Size {
            expected: config.mutable_extra_nonce_size,
            got: submission.extra_nonce2.len(),
        });
    }

    let version = match submission.version_bits {
        None => job_version,
        Some(bits) => {
            let mask = worker.version_mask & config.version_mask;
            if bits & !mask != 0 {
                return Err(SubmitError::VersionBitsOutsideMask { bits, mask });
            }
            (job_version & !mask) | bits
        }
    };

    legacy.write_extra_nonce(&worker.extra_nonce1, &submission.extra_nonce2)?;
    witness.write_extra_nonce(&worker.extra_nonce1, &submission.extra_nonce2)?;

    header.version = version;
    header.merkle_root = merkle_root_from_path(&legacy.hash(), merkle_path);
    header.timestamp = submission.time;
    header.nonce = submission.nonce;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::p2pkh_script;
    use crate::coinbase::{Coinbase, CoinbaseBuilder};
    use crate::merkle::{compute_merkle_root, compute_witness_commitment, witness_commitment_script};

    fn config() -> MiningConfig {
        MiningConfig::new("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2")
    }

    fn coinbase() -> Coinbase {
        let commitment = witness_commitment_script(&compute_witness_commitment(&[0u8; 32], &[0u8; 32]));
        CoinbaseBuilder::new(100, p2pkh_script(&[0x22; 20]), 50)
            .with_witness_commitment(commitment)
            .with_extra_nonce_size(config().extra_nonce_size())
            .build()
            .unwrap()
    }

    fn worker() -> WorkerConfig {
        WorkerConfig {
            extra_nonce1: vec![0xA1, 0xA2, 0xA3, 0xA4],
            version_mask: 0x1fffe000,
        }
    }

    fn submission() -> Submission {
        Submission {
            extra_nonce2: vec![0xB1, 0xB2, 0xB3, 0xB4],
            time: 1_700_000_123,
            nonce: 0xCAFEBABE,
            version_bits: None,
        }
    }

    #[test]
    fn test_stratum_prev_hash() {
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        assert!(stratum_prev_hash(&hash).starts_with("0403020108070605"));
    }

    #[test]
    fn test_build_notify() {
        let coinbase = coinbase();
        let header = BlockHeader {
            version: 0x20000000,
            bits: 0x1703a30c,
            timestamp: 0x65000000,
            ..Default::default()
        };
        let path = vec![[0x33u8; 32]];

        let notify = build_notify(26, &header, 0x20000004, &coinbase.legacy, &path, true);

        assert_eq!(notify.job_id, "1a");
        assert_eq!(notify.version, "20000004");
        assert_eq!(notify.bits, "1703a30c");
        assert_eq!(notify.time, "65000000");
        assert_eq!(notify.merkle_branches, vec!["33".repeat(32)]);
        assert!(notify.clean_jobs);

        // Legacy coinbase around the reserved extra nonce
        let joined = format!("{}{}{}", notify.coinbase1, "00".repeat(8), notify.coinbase2);
        assert_eq!(joined, hex::encode(&coinbase.legacy.data));

        let params = notify.to_params();
        assert_eq!(params.as_array().map(Vec::len), Some(9));
        assert_eq!(params[8], json!(true));
    }

    #[test]
    fn test_submission_from_params() {
        let params = vec![json!("worker.1"), json!("1a"), json!("b1b2b3b4"), json!("6553f100"), json!("cafebabe")];
        let submission = Submission::from_params(&params).unwrap();

        assert_eq!(submission.extra_nonce2, vec![0xB1, 0xB2, 0xB3, 0xB4]);
        assert_eq!(submission.time, 0x6553f100);
        assert_eq!(submission.nonce, 0xCAFEBABE);
        assert_eq!(submission.version_bits, None);

        let mut rolled = params.clone();
        rolled.push(json!("00002000"));
        assert_eq!(Submission::from_params(&rolled).unwrap().version_bits, Some(0x2000));
    }

    #[test]
    fn test_submission_from_bad_params() {
        let short = vec![json!("worker.1"), json!("1a"), json!("b1b2b3b4")];
        assert_eq!(Submission::from_params(&short), Err(SubmitError::InvalidParam("ntime")));

        let bad_nonce = vec![json!("w"), json!("1"), json!("00"), json!("00000000"), json!("xyz")];
        assert_eq!(Submission::from_params(&bad_nonce), Err(SubmitError::InvalidParam("nonce")));

        let bad_extra = vec![json!("w"), json!("1"), json!("0"), json!("00000000"), json!("00000000")];
        assert_eq!(Submission::from_params(&bad_extra), Err(SubmitError::InvalidParam("extranonce2")));
    }

    #[test]
    fn test_prepare_for_submit_patches_both_payloads() {
        let Coinbase { mut legacy, mut witness, .. } = coinbase();
        let path = vec![[0x44u8; 32], [0x55u8; 32]];
        let mut header = BlockHeader {
            version: 0x20000000,
            ..Default::default()
        };

        prepare_for_submit(
            &mut header,
            0x20000000,
            &mut legacy,
            &mut witness,
            &path,
            &worker(),
            &config(),
            &submission(),
        )
        .unwrap();

        let expected = [0xA1, 0xA2, 0xA3, 0xA4, 0xB1, 0xB2, 0xB3, 0xB4];
        assert_eq!(&legacy.data[legacy.extra_nonce_range()], &expected);
        assert_eq!(&witness.data[witness.extra_nonce_range()], &expected);

        // One sibling per level: coinbase, 0x44 leaf, then the 0x55 subtree
        let root = merkle_root_from_path(&legacy.hash(), &path);
        assert_eq!(header.merkle_root, root);
        assert_eq!(
            compute_merkle_root(&[legacy.hash(), [0x44u8; 32]]),
            merkle_root_from_path(&legacy.hash(), &path[..1])
        );
        assert_eq!(header.timestamp, 1_700_000_123);
        assert_eq!(header.nonce, 0xCAFEBABE);
        assert_eq!(header.version, 0x20000000);
    }

    #[test]
    fn test_prepare_for_submit_version_rolling() {
        let Coinbase { mut legacy, mut witness, .. } = coinbase();
        let mut header = BlockHeader::default();
        let mut rolled = submission();
        rolled.version_bits = Some(0x00ffe000);

        prepare_for_submit(&mut header, 0x20000000, &mut legacy, &mut witness, &[], &worker(), &config(), &rolled)
            .unwrap();
        assert_eq!(header.version, 0x20ffe000);

        rolled.version_bits = Some(0x00000001);
        let result =
            prepare_for_submit(&mut header, 0x20000000, &mut legacy, &mut witness, &[], &worker(), &config(), &rolled);
        assert_eq!(
            result,
            Err(SubmitError::VersionBitsOutsideMask {
                bits: 1,
                mask: 0x1fffe000
            })
        );
    }

    #[test]
    fn test_prepare_for_submit_size_checks() {
        let Coinbase { mut legacy, mut witness, .. } = coinbase();
        let mut header = BlockHeader::default();

        let mut short_worker = worker();
        short_worker.extra_nonce1.pop();
        let result = prepare_for_submit(
            &mut header,
            1,
            &mut legacy,
            &mut witness,
            &[],
            &short_worker,
            &config(),
            &submission(),
        );
        assert_eq!(result, Err(SubmitError::ExtraNonce1Size { expected: 4, got: 3 }));

        let mut long = submission();
        long.extra_nonce2.push(0);
        let result = prepare_for_submit(&mut header, 1, &mut legacy, &mut witness, &[], &worker(), &config(), &long);
        assert_eq!(result, Err(SubmitError::ExtraNonce2Size { expected: 4, got: 5 }));

        // Nothing was written
        assert_eq!(&legacy.data[legacy.extra_nonce_range()], &[0u8; 8]);
    }
}
