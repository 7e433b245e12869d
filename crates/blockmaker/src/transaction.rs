//! Bitcoin-style transaction model and its consensus serialization.
//!
//! The same model is used for decoding template transactions (to discover
//! in-block dependencies) and for building the coinbase, so both go through
//! one encoder and one strict decoder.

use thiserror::Error;

use crate::hash::double_sha256;

/// Transaction decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEof(usize),

    #[error("{0} trailing bytes after transaction")]
    TrailingBytes(usize),

    #[error("Length {0} exceeds remaining data")]
    LengthOverflow(u64),

    #[error("Invalid segwit flag: {0:#04x}")]
    InvalidSegwitFlag(u8),
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Hash of the spent transaction (internal byte order).
    pub previous_output_hash: [u8; 32],
    /// Index of the spent output.
    pub previous_output_index: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    /// Witness stack (empty for non-witness inputs).
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// The input of a coinbase transaction: null outpoint, final sequence.
    pub fn coinbase(script_sig: Vec<u8>) -> Self {
        TxIn {
            previous_output_hash: [0u8; 32],
            previous_output_index: u32::MAX,
            script_sig,
            sequence: u32::MAX,
            witness: Vec::new(),
        }
    }
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// A decoded or constructed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Whether any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Serialize the transaction.
    ///
    /// With `with_witness` set, the marker, flag and witness stacks are
    /// written when the transaction has witness data; otherwise the output
    /// equals the legacy serialization.
    pub fn serialize(&self, with_witness: bool) -> Vec<u8> {
        let witness = with_witness && self.has_witness();
        let mut out = Vec::with_capacity(256);

        out.extend_from_slice(&self.version.to_le_bytes());
        if witness {
            out.push(0x00); // Marker
            out.push(0x01); // Flag
        }

        encode_varint(self.inputs.len() as u64, &mut out);
        for input in &self.inputs {
            out.extend_from_slice(&input.previous_output_hash);
            out.extend_from_slice(&input.previous_output_index.to_le_bytes());
            encode_var_bytes(&input.script_sig, &mut out);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }

        encode_varint(self.outputs.len() as u64, &mut out);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            encode_var_bytes(&output.script_pubkey, &mut out);
        }

        if witness {
            for input in &self.inputs {
                encode_varint(input.witness.len() as u64, &mut out);
                for item in &input.witness {
                    encode_var_bytes(item, &mut out);
                }
            }
        }

        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Transaction id: double SHA256 of the legacy serialization.
    pub fn txid(&self) -> [u8; 32] {
        double_sha256(&self.serialize(false))
    }

    /// Witness hash: double SHA256 of the witness serialization.
    pub fn wtxid(&self) -> [u8; 32] {
        double_sha256(&self.serialize(true))
    }

    /// Byte offset of the first input's script-sig body in a serialization.
    pub fn first_script_sig_offset(&self, with_witness: bool) -> usize {
        let mut offset = 4;
        if with_witness && self.has_witness() {
            offset += 2;
        }
        offset += varint_size(self.inputs.len() as u64);
        if let Some(input) = self.inputs.first() {
            offset += 32 + 4 + varint_size(input.script_sig.len() as u64);
        }
        offset
    }

    /// Decode a transaction that must occupy `data` exactly.
    pub fn decode(data: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = Reader::new(data);
        let tx = Self::read(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(TransactionError::TrailingBytes(reader.remaining()));
        }
        Ok(tx)
    }

    fn read(reader: &mut Reader<'_>) -> Result<Self, TransactionError> {
        let version = reader.read_u32()? as i32;

        // An empty input list is the segwit marker
        let mut input_count = reader.read_varint()?;
        let mut witness = false;
        if input_count == 0 {
            let flag = reader.read_u8()?;
            if flag != 0x01 {
                return Err(TransactionError::InvalidSegwitFlag(flag));
            }
            witness = true;
            input_count = reader.read_varint()?;
        }

        let mut inputs = Vec::with_capacity(reader.bounded_capacity(input_count, 41));
        for _ in 0..input_count {
            let previous_output_hash = reader.read_array::<32>()?;
            let previous_output_index = reader.read_u32()?;
            let script_sig = reader.read_var_bytes()?.to_vec();
            let sequence = reader.read_u32()?;
            inputs.push(TxIn {
                previous_output_hash,
                previous_output_index,
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = reader.read_varint()?;
        let mut outputs = Vec::with_capacity(reader.bounded_capacity(output_count, 9));
        for _ in 0..output_count {
            let value = reader.read_u64()? as i64;
            let script_pubkey = reader.read_var_bytes()?.to_vec();
            outputs.push(TxOut { value, script_pubkey });
        }

        if witness {
            for input in inputs.iter_mut() {
                let items = reader.read_varint()?;
                let mut stack = Vec::with_capacity(reader.bounded_capacity(items, 1));
                for _ in 0..items {
                    stack.push(reader.read_var_bytes()?.to_vec());
                }
                input.witness = stack;
            }
        }

        let lock_time = reader.read_u32()?;

        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

/// Cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Clamp a declared element count so a corrupt count cannot trigger a
    /// huge allocation.
    fn bounded_capacity(&self, count: u64, min_element_size: usize) -> usize {
        (count as usize).min(self.remaining() / min_element_size.max(1))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], TransactionError> {
        if len > self.remaining() {
            return Err(TransactionError::UnexpectedEof(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, TransactionError> {
        Ok(self.take(1)?[0])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], TransactionError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    fn read_u32(&mut self) -> Result<u32, TransactionError> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64, TransactionError> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_varint(&mut self) -> Result<u64, TransactionError> {
        match self.read_u8()? {
            0xfd => Ok(u16::from_le_bytes(self.read_array::<2>()?) as u64),
            0xfe => Ok(self.read_u32()? as u64),
            0xff => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    fn read_var_bytes(&mut self) -> Result<&'a [u8], TransactionError> {
        let len = self.read_varint()?;
        if len > self.remaining() as u64 {
            return Err(TransactionError::LengthOverflow(len));
        }
        self.take(len as usize)
    }
}

/// Encode a variable-length integer (Bitcoin varint).
pub fn encode_varint(value: u64, output: &mut Vec<u8>) {
    if value < 0xfd {
        output.push(value as u8);
    } else if value <= 0xffff {
        output.push(0xfd);
        output.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffffffff {
        output.push(0xfe);
        output.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        output.push(0xff);
        output.extend_from_slice(&value.to_le_bytes());
    }
}

/// Encoded size of a varint.
pub fn varint_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffffffff => 5,
        _ => 9,
    }
}

fn encode_var_bytes(bytes: &[u8], output: &mut Vec<u8>) {
    encode_varint(bytes.len() as u64, output);
    output.extend_from_slice(bytes);
}

/// Append a block height to a coinbase script-sig.
///
/// Matches the node's script integer push: `OP_0` for zero, `OP_1`..`OP_16`
/// for small values, otherwise a minimal little-endian push with a padding
/// byte when the top bit would read as a sign.
pub fn serialize_for_coinbase(height: u64, script: &mut Vec<u8>) {
    if height == 0 {
        script.push(0x00);
        return;
    }
    if height <= 16 {
        script.push(0x50 + height as u8);
        return;
    }

    let mut bytes = Vec::with_capacity(9);
    let mut n = height;
    while n > 0 {
        bytes.push((n & 0xFF) as u8);
        n >>= 8;
    }
    if let Some(&last) = bytes.last() {
        if last & 0x80 != 0 {
            bytes.push(0x00);
        }
    }

    script.push(bytes.len() as u8);
    script.extend_from_slice(&bytes);
}
