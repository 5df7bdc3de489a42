//! PSBT finalization for vault branches
//!
//! The miniscript satisfier cannot finalize these scripts (branch selection
//! is explicit, and business vaults reuse keys), so witness stacks are
//! assembled directly from the chosen [`SpendPath`]:
//!
//! ```text
//! checksig branch:   [<sig>..., <flags>, <witnessScript>]
//! multisig branch:   [<>, <sig_1>..<sig_m>, <flags>, <witnessScript>]
//! ```
//!
//! The leading empty element on multisig branches feeds the extra pop of
//! OP_CHECKMULTISIG; branch flags are a 0x01 push for an IF arm and an
//! empty push for an ELSE arm, outermost flag last. Signatures are matched
//! to script keys by serialized bytes, so signer order always follows the
//! path, never the map order of the PSBT.

use base64::prelude::*;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::opcodes::all::{OP_CHECKMULTISIG, OP_CHECKMULTISIGVERIFY};
use bitcoin::psbt::Psbt;
use bitcoin::script::Instruction;
use bitcoin::{Script, Transaction, Txid, Witness};
use heirloom_vault::spend_path::{BranchFlag, SpendPath};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinalizeError {
    #[error("input {0} has no witness script")]
    MissingWitnessScript(usize),

    #[error("input {input}: no signature for {signer}")]
    MissingSignature { input: usize, signer: String },

    #[error("input {input}: {have} of {needed} required signatures present")]
    MissingSignatures {
        input: usize,
        needed: usize,
        have: usize,
    },

    #[error("input {input}: spend path does not match the witness script")]
    WrongBranch { input: usize },

    #[error("challenge branch requires the SHA-256 preimage")]
    MissingPreimage,

    #[error("preimage does not hash to the script's challenge image")]
    PreimageMismatch,

    #[error("input {0} is not finalized")]
    NotFinalized(usize),

    #[error("transaction extraction failed: {0}")]
    Extract(String),

    #[error("malformed psbt: {0}")]
    Malformed(String),
}

/// Coarse script classification, from the script bytes alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    CheckSig,
    Multisig,
}

/// Multisig iff the script contains OP_CHECKMULTISIG(VERIFY) anywhere.
pub fn detect_script_kind(script: &Script) -> ScriptKind {
    for instruction in script.instructions().flatten() {
        if let Instruction::Op(op) = instruction {
            if op == OP_CHECKMULTISIG || op == OP_CHECKMULTISIGVERIFY {
                return ScriptKind::Multisig;
            }
        }
    }
    ScriptKind::CheckSig
}

/// Extra material some branches need at finalization time.
#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    /// SHA-256 preimage for a challenge-gated branch.
    pub preimage: Option<Vec<u8>>,
}

fn signature_for(
    psbt_input: &bitcoin::psbt::Input,
    key: &heirloom_keys::ScriptKey,
) -> Option<Vec<u8>> {
    psbt_input
        .partial_sigs
        .iter()
        .find(|(pk, _)| pk.to_bytes().as_slice() == key.as_bytes())
        .map(|(_, sig)| sig.to_vec())
}

fn finalize_input(
    psbt: &mut Psbt,
    index: usize,
    path: &SpendPath,
    options: &FinalizeOptions,
) -> Result<(), FinalizeError> {
    let input = &psbt.inputs[index];
    let witness_script = input
        .witness_script
        .clone()
        .ok_or(FinalizeError::MissingWitnessScript(index))?;

    if path.threshold.is_some() && detect_script_kind(&witness_script) != ScriptKind::Multisig {
        return Err(FinalizeError::WrongBranch { input: index });
    }

    let mut witness = Witness::new();

    match &path.threshold {
        Some(threshold) => {
            // The CHECKMULTISIG off-by-one consumes one extra element.
            witness.push([0u8; 0]);
            let sigs: Vec<Vec<u8>> = threshold
                .keys
                .iter()
                .filter_map(|key| signature_for(input, key))
                .collect();
            if sigs.len() < threshold.required {
                return Err(FinalizeError::MissingSignatures {
                    input: index,
                    needed: threshold.required,
                    have: sigs.len(),
                });
            }
            // Exactly `required` signatures, in script key order.
            for sig in sigs.iter().take(threshold.required) {
                witness.push(sig);
            }
        }
        None => {
            for signer in &path.signers {
                let sig = signature_for(input, &signer.key).ok_or_else(|| {
                    FinalizeError::MissingSignature {
                        input: index,
                        signer: signer.label.clone(),
                    }
                })?;
                witness.push(&sig);
            }
        }
    }

    if let Some(oracle) = &path.oracle {
        let sig = signature_for(input, &oracle.key).ok_or_else(|| {
            FinalizeError::MissingSignature {
                input: index,
                signer: oracle.label.clone(),
            }
        })?;
        witness.push(&sig);
    }

    if let Some(image) = path.challenge_hash {
        let preimage = options
            .preimage
            .as_ref()
            .ok_or(FinalizeError::MissingPreimage)?;
        if sha256::Hash::hash(preimage) != image {
            return Err(FinalizeError::PreimageMismatch);
        }
        witness.push(preimage);
    }

    for flag in &path.selectors {
        match flag {
            BranchFlag::True => witness.push([0x01]),
            BranchFlag::False => witness.push([0u8; 0]),
        }
    }

    witness.push(witness_script.as_bytes());

    let input = &mut psbt.inputs[index];
    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    input.sighash_type = None;
    input.bip32_derivation.clear();
    input.witness_script = None;
    input.redeem_script = None;
    Ok(())
}

/// Finalize every input of a signed PSBT along one spend path.
pub fn finalize(
    psbt: &mut Psbt,
    path: &SpendPath,
    options: &FinalizeOptions,
) -> Result<(), FinalizeError> {
    for index in 0..psbt.inputs.len() {
        finalize_input(psbt, index, path, options)?;
    }
    Ok(())
}

/// The broadcastable result.
#[derive(Debug, Clone)]
pub struct FinalizedTransaction {
    pub txid: Txid,
    pub hex: String,
    pub transaction: Transaction,
}

/// Extract the network transaction from a finalized PSBT.
pub fn extract(psbt: Psbt) -> Result<FinalizedTransaction, FinalizeError> {
    for (index, input) in psbt.inputs.iter().enumerate() {
        if input.final_script_witness.is_none() {
            return Err(FinalizeError::NotFinalized(index));
        }
    }
    let transaction = psbt
        .extract_tx()
        .map_err(|e| FinalizeError::Extract(e.to_string()))?;
    Ok(FinalizedTransaction {
        txid: transaction.compute_txid(),
        hex: serialize_hex(&transaction),
        transaction,
    })
}

/// Merge two PSBTs for the same unsigned transaction, pooling signatures.
/// Commutative and idempotent over the signature sets.
pub fn combine(a: Psbt, b: Psbt) -> Result<Psbt, FinalizeError> {
    let mut merged = a;
    merged
        .combine(b)
        .map_err(|e| FinalizeError::Malformed(e.to_string()))?;
    Ok(merged)
}

pub fn to_base64(psbt: &Psbt) -> String {
    BASE64_STANDARD.encode(psbt.serialize())
}

pub fn from_base64(s: &str) -> Result<Psbt, FinalizeError> {
    let bytes = BASE64_STANDARD
        .decode(s.trim())
        .map_err(|e| FinalizeError::Malformed(e.to_string()))?;
    Psbt::deserialize(&bytes).map_err(|e| FinalizeError::Malformed(e.to_string()))
}

pub fn to_hex(psbt: &Psbt) -> String {
    hex::encode(psbt.serialize())
}

pub fn from_hex(s: &str) -> Result<Psbt, FinalizeError> {
    let bytes = hex::decode(s.trim()).map_err(|e| FinalizeError::Malformed(e.to_string()))?;
    Psbt::deserialize(&bytes).map_err(|e| FinalizeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::opcodes::all::{OP_CHECKSIG, OP_IF};
    use bitcoin::script::Builder;

    #[test]
    fn test_detect_script_kind() {
        let multisig = Builder::new()
            .push_opcode(OP_IF)
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();
        assert_eq!(detect_script_kind(&multisig), ScriptKind::Multisig);

        let checksig = Builder::new().push_opcode(OP_CHECKSIG).into_script();
        assert_eq!(detect_script_kind(&checksig), ScriptKind::CheckSig);
    }
}
