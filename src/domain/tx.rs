//! Byte-level Bitcoin transaction model.
//!
//! Only what the coordination core needs: parsing whatever a counterparty
//! hands us, serializing what we assemble, and computing txids. Unsigned
//! transactions serialize in the legacy (non-witness) layout; the segwit
//! marker/flag is emitted only when witnesses are present.
//!
//! Outpoint txids are kept in display order in memory and reversed at the
//! wire boundary.

use crate::foundation::{CoinjoinError, Outpoint, Result, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SEGWIT_MARKER: u8 = 0x00;
pub const SEGWIT_FLAG: u8 = 0x01;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: Outpoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    pub fn new(outpoint: Outpoint) -> Self {
        Self { outpoint, script_sig: Vec::new(), sequence: 0xffff_ffff }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self { value, script_pubkey }
    }
}

/// Witness stack per input; empty stacks are legal for non-witness inputs.
pub type Witness = Vec<Vec<u8>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
    /// One witness stack per input when present.
    pub witnesses: Option<Vec<Witness>>,
}

impl Transaction {
    pub fn new_unsigned(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self { version: 2, inputs, outputs, locktime: 0, witnesses: None }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.estimate_serialized_len());
        out.extend_from_slice(&self.version.to_le_bytes());

        let with_witness = self.witnesses.as_ref().is_some_and(|w| w.iter().any(|stack| !stack.is_empty()));
        if with_witness {
            out.push(SEGWIT_MARKER);
            out.push(SEGWIT_FLAG);
        }

        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            let mut txid_le: [u8; 32] = *input.outpoint.txid.as_bytes();
            txid_le.reverse();
            out.extend_from_slice(&txid_le);
            out.extend_from_slice(&input.outpoint.vout.to_le_bytes());
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }

        if with_witness {
            let witnesses = self.witnesses.as_ref().expect("checked above");
            for stack in witnesses {
                write_varint(&mut out, stack.len() as u64);
                for item in stack {
                    write_varint(&mut out, item.len() as u64);
                    out.extend_from_slice(item);
                }
            }
        }

        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Serialize without witness data regardless of what is attached;
    /// this is the txid preimage.
    pub fn serialize_without_witness(&self) -> Vec<u8> {
        let stripped = Transaction { witnesses: None, ..self.clone() };
        stripped.serialize()
    }

    pub fn txid(&self) -> Txid {
        let data = self.serialize_without_witness();
        let first: [u8; 32] = Sha256::digest(&data).into();
        let mut second: [u8; 32] = Sha256::digest(first).into();
        second.reverse();
        Txid::new(second)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u32_le()?;

        let mut has_witness = false;
        // A zero here cannot be an input count on anything we accept, so it
        // is the segwit marker.
        if cursor.peek()? == SEGWIT_MARKER {
            cursor.read_u8()?;
            let flag = cursor.read_u8()?;
            if flag != SEGWIT_FLAG {
                return Err(CoinjoinError::ParseError(format!("bad segwit flag 0x{flag:02x}")));
            }
            has_witness = true;
        }

        let input_count = cursor.read_varint()?;
        if input_count == 0 {
            return Err(CoinjoinError::ParseError("transaction has no inputs".into()));
        }
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            let mut txid_le = cursor.read_array::<32>()?;
            txid_le.reverse();
            let vout = cursor.read_u32_le()?;
            let script_len = cursor.read_varint()?;
            let script_sig = cursor.read_bytes(script_len as usize)?.to_vec();
            let sequence = cursor.read_u32_le()?;
            inputs.push(TxInput { outpoint: Outpoint::new(Txid::new(txid_le), vout), script_sig, sequence });
        }

        let output_count = cursor.read_varint()?;
        if output_count == 0 {
            return Err(CoinjoinError::ParseError("transaction has no outputs".into()));
        }
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            let value = cursor.read_u64_le()?;
            let script_len = cursor.read_varint()?;
            let script_pubkey = cursor.read_bytes(script_len as usize)?.to_vec();
            outputs.push(TxOutput { value, script_pubkey });
        }

        let witnesses = if has_witness {
            let mut stacks = Vec::with_capacity(inputs.len());
            for _ in 0..inputs.len() {
                let item_count = cursor.read_varint()?;
                let mut stack = Vec::with_capacity(item_count.min(32) as usize);
                for _ in 0..item_count {
                    let len = cursor.read_varint()?;
                    stack.push(cursor.read_bytes(len as usize)?.to_vec());
                }
                stacks.push(stack);
            }
            Some(stacks)
        } else {
            None
        };

        let locktime = cursor.read_u32_le()?;
        if !cursor.is_empty() {
            return Err(CoinjoinError::ParseError(format!("{} trailing bytes after transaction", cursor.remaining())));
        }

        Ok(Self { version, inputs, outputs, locktime, witnesses })
    }

    fn estimate_serialized_len(&self) -> usize {
        10 + self.inputs.len() * 41 + self.outputs.iter().map(|o| 9 + o.script_pubkey.len()).sum::<usize>()
    }
}

/// P2WSH spends are what fidelity bonds live in; the maker engine refuses
/// to sign them inside a CoinJoin.
pub fn is_p2wsh(script_pubkey: &[u8]) -> bool {
    script_pubkey.len() == 34 && script_pubkey[0] == 0x00 && script_pubkey[1] == 0x20
}

pub fn is_p2wpkh(script_pubkey: &[u8]) -> bool {
    script_pubkey.len() == 22 && script_pubkey[0] == 0x00 && script_pubkey[1] == 0x14
}

/// Estimated virtual size for fee purposes: P2WPKH inputs ~68 vB, outputs
/// 31 vB, 11 vB overhead.
pub fn estimate_vsize(num_inputs: usize, num_outputs: usize) -> u64 {
    (num_inputs * 68 + num_outputs * 31 + 11) as u64
}

pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn peek(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or_else(|| CoinjoinError::ParseError("truncated transaction".into()))
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(CoinjoinError::ParseError("truncated transaction".into()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_varint(&mut self) -> Result<u64> {
        let prefix = self.read_u8()?;
        let value = match prefix {
            0xfd => u64::from(u16::from_le_bytes(self.read_array::<2>()?)),
            0xfe => u64::from(u32::from_le_bytes(self.read_array::<4>()?)),
            0xff => u64::from_le_bytes(self.read_array::<8>()?),
            byte => u64::from(byte),
        };
        // Reject non-minimal encodings so a tx has exactly one byte form.
        let minimal = match value {
            0..=0xfc => prefix < 0xfd,
            0xfd..=0xffff => prefix == 0xfd,
            0x1_0000..=0xffff_ffff => prefix == 0xfe,
            _ => prefix == 0xff,
        };
        if !minimal {
            return Err(CoinjoinError::ParseError("non-minimal varint".into()));
        }
        Ok(value)
    }
}
