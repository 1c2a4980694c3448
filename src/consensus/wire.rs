//! Carrier wire format
//!
//! The host ledger's transactions are opaque to this crate except for a
//! few markers:
//!
//! - privacy payload: output script `OP_RETURN <push "PRIV" || payload>`
//! - FCMP payload: input witness item `"FCMP" || payload`
//! - FCMP output: output script `OP_RETURN 0x60 "FCMP" || O || I || C`
//!
//! `payload` is the bincode `PrivacyTransaction`. Anything that does not
//! match a marker, or fails to decode, is simply not a privacy
//! transaction.

use crate::crypto::hash::sha256d;
use crate::fcmp::curve_tree::{OutputTuple, OUTPUT_TUPLE_LEN};
use crate::privacy::transaction::PrivacyTransaction;
use crate::structures::types::{Amount, Hash256, Height, OutPoint};
use crate::{Error, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};

pub const OP_RETURN: u8 = 0x6a;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
/// Largest push encoded with a single length opcode
pub const MAX_DIRECT_PUSH: usize = 75;
/// Tags an output script as an FCMP output tuple
pub const OP_FCMP_TUPLE: u8 = 0x60;

pub const PRIVACY_MARKER: &[u8; 4] = b"PRIV";
pub const FCMP_MARKER: &[u8; 4] = b"FCMP";

/// Upper bound on a decoded privacy payload
pub const MAX_PAYLOAD_SIZE: u64 = 1 << 20;

const FCMP_SCRIPT_LEN: usize = 2 + FCMP_MARKER.len() + OUTPUT_TUPLE_LEN;

fn payload_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PAYLOAD_SIZE)
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

pub fn encode_payload(tx: &PrivacyTransaction) -> Result<Vec<u8>> {
    Ok(payload_options().serialize(tx)?)
}

pub fn decode_payload(bytes: &[u8]) -> Option<PrivacyTransaction> {
    payload_options().deserialize(bytes).ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierInput {
    pub prevout: OutPoint,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierOutput {
    pub value: Amount,
    pub script: Vec<u8>,
}

impl CarrierOutput {
    pub fn new(value: Amount, script: Vec<u8>) -> Self {
        Self { value, script }
    }
}

/// Host ledger transaction, as far as the privacy layer sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierTx {
    pub version: u32,
    pub inputs: Vec<CarrierInput>,
    pub outputs: Vec<CarrierOutput>,
    pub lock_time: u32,
}

impl CarrierTx {
    pub fn new(version: u32) -> Self {
        Self { version, inputs: Vec::new(), outputs: Vec::new(), lock_time: 0 }
    }

    /// Double SHA-256 of the bincode encoding
    pub fn txid(&self) -> Result<Hash256> {
        let bytes = bincode::serialize(self)?;
        Ok(Hash256(sha256d(&bytes)))
    }

    /// Carry `tx` in an OP_RETURN output.
    pub fn with_privacy_payload(mut self, tx: &PrivacyTransaction) -> Result<Self> {
        self.outputs.push(CarrierOutput::new(0, privacy_script(tx)?));
        Ok(self)
    }

    /// Carry `tx` in the witness of a new input, plus one tuple output per
    /// FCMP output.
    pub fn with_fcmp_payload(mut self, prevout: OutPoint, tx: &PrivacyTransaction) -> Result<Self> {
        self.inputs.push(CarrierInput { prevout, witness: vec![fcmp_witness_item(tx)?] });
        for tuple in &tx.fcmp_outputs {
            self.outputs.push(CarrierOutput::new(0, fcmp_output_script(tuple)));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierBlock {
    pub height: Height,
    pub transactions: Vec<CarrierTx>,
}

/// Minimal push of `data`: direct, PUSHDATA1 or PUSHDATA2.
pub fn push_data(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 3);
    match data.len() {
        n if n <= MAX_DIRECT_PUSH => out.push(n as u8),
        n if n <= u8::MAX as usize => {
            out.push(OP_PUSHDATA1);
            out.push(n as u8);
        }
        n if n <= u16::MAX as usize => {
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        n => return Err(Error::InvalidInput(format!("push of {} bytes exceeds PUSHDATA2", n))),
    }
    out.extend_from_slice(data);
    Ok(out)
}

/// The single push that makes up all of `script`.
fn read_push(script: &[u8]) -> Option<&[u8]> {
    let (&opcode, rest) = script.split_first()?;
    let (len, body) = match opcode {
        n if n as usize <= MAX_DIRECT_PUSH => (n as usize, rest),
        OP_PUSHDATA1 => {
            let (&n, body) = rest.split_first()?;
            (n as usize, body)
        }
        OP_PUSHDATA2 => {
            if rest.len() < 2 {
                return None;
            }
            (u16::from_le_bytes([rest[0], rest[1]]) as usize, &rest[2..])
        }
        _ => return None,
    };
    (body.len() == len).then_some(body)
}

pub fn privacy_script(tx: &PrivacyTransaction) -> Result<Vec<u8>> {
    let mut data = PRIVACY_MARKER.to_vec();
    data.extend_from_slice(&encode_payload(tx)?);
    let mut script = vec![OP_RETURN];
    script.extend_from_slice(&push_data(&data)?);
    Ok(script)
}

pub fn decode_privacy_script(script: &[u8]) -> Option<PrivacyTransaction> {
    let (&first, rest) = script.split_first()?;
    if first != OP_RETURN {
        return None;
    }
    let data = read_push(rest)?;
    decode_payload(data.strip_prefix(PRIVACY_MARKER.as_slice())?)
}

pub fn fcmp_witness_item(tx: &PrivacyTransaction) -> Result<Vec<u8>> {
    let mut item = FCMP_MARKER.to_vec();
    item.extend_from_slice(&encode_payload(tx)?);
    Ok(item)
}

pub fn decode_fcmp_witness(item: &[u8]) -> Option<PrivacyTransaction> {
    decode_payload(item.strip_prefix(FCMP_MARKER.as_slice())?)
}

pub fn fcmp_output_script(tuple: &OutputTuple) -> Vec<u8> {
    let mut script = Vec::with_capacity(FCMP_SCRIPT_LEN);
    script.push(OP_RETURN);
    script.push(OP_FCMP_TUPLE);
    script.extend_from_slice(FCMP_MARKER);
    script.extend_from_slice(&tuple.to_bytes());
    script
}

/// Decode an FCMP output script. Tuples with invalid points are refused.
pub fn decode_fcmp_output_script(script: &[u8]) -> Option<OutputTuple> {
    if script.len() != FCMP_SCRIPT_LEN || script[0] != OP_RETURN || script[1] != OP_FCMP_TUPLE {
        return None;
    }
    let body = script[2..].strip_prefix(FCMP_MARKER.as_slice())?;
    OutputTuple::from_bytes(body).filter(OutputTuple::is_valid)
}

/// Where a privacy payload was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLocation {
    Output(usize),
    Witness { input: usize, item: usize },
}

/// The privacy payload of `tx`, if any. Output payloads are looked at
/// before witness payloads; the first decodable one wins.
pub fn extract_privacy_tx(tx: &CarrierTx) -> Option<(PayloadLocation, PrivacyTransaction)> {
    for (index, output) in tx.outputs.iter().enumerate() {
        if let Some(ptx) = decode_privacy_script(&output.script) {
            return Some((PayloadLocation::Output(index), ptx));
        }
    }
    for (input_index, input) in tx.inputs.iter().enumerate() {
        for (item_index, item) in input.witness.iter().enumerate() {
            if let Some(ptx) = decode_fcmp_witness(item) {
                return Some((PayloadLocation::Witness { input: input_index, item: item_index }, ptx));
            }
        }
    }
    None
}

/// FCMP output tuples of `tx`, in output order
pub fn extract_fcmp_outputs(tx: &CarrierTx) -> Vec<OutputTuple> {
    tx.outputs
        .iter()
        .filter_map(|o| decode_fcmp_output_script(&o.script))
        .collect()
}

pub fn is_privacy_tx(tx: &CarrierTx) -> bool {
    extract_privacy_tx(tx).is_some()
}
