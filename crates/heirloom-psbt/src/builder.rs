//! Unsigned PSBT construction for vault spend paths
//!
//! Inheritance spends are full sweeps by construction: every confirmed UTXO
//! at the vault address is consumed and a single output carries the
//! remainder. The chosen [`SpendPath`] dictates nLockTime and per-input
//! nSequence — those fields are consensus-critical for CLTV/CSV branches
//! and are never derived anywhere else.
//!
//! Every input gets `witness_utxo` and `witness_script` (hardware wallets
//! cannot validate amounts without them), and BIP-32 derivation hints when
//! the caller has the master fingerprints on file.

use crate::fee::{estimate_vsize, FeeError, FeeEstimates, FeePolicy, InputClass, DUST_LIMIT_SAT};
use bitcoin::absolute::LockTime;
use bitcoin::bip32::{DerivationPath, Fingerprint};
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    WScriptHash, Witness,
};
use heirloom_vault::spend_path::SpendPath;
use std::collections::BTreeMap;
use thiserror::Error;

/// BIP-32 origin info per script key, keyed by the derived public key.
pub type KeySourceMap = BTreeMap<secp256k1::PublicKey, (Fingerprint, DerivationPath)>;

#[derive(Error, Debug)]
pub enum PsbtError {
    #[error("no confirmed UTXOs to spend")]
    NoSpendableUtxos,

    #[error("insufficient funds: need {needed} for fees, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("output of {0} is below the {DUST_LIMIT_SAT} sat dust limit")]
    DustOutput(Amount),

    #[error("invalid destination address: {0}")]
    InvalidDestination(String),

    #[error("destination is not valid for {0}")]
    InvalidNetwork(Network),

    #[error("refresh requires the unrestricted owner path")]
    NotOwnerPath,

    #[error("fee: {0}")]
    Fee(#[from] FeeError),

    #[error("psbt: {0}")]
    Psbt(String),
}

/// A UTXO at the vault address, as reported by a chain backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultUtxo {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub confirmed: bool,
    pub height: Option<u32>,
}

/// A refresh PSBT plus the script the caller must persist when the refresh
/// targets a fresh address. Losing that script loses the funds.
#[derive(Debug)]
pub struct RefreshPsbt {
    pub psbt: Psbt,
    pub new_witness_script: Option<ScriptBuf>,
}

fn vault_script_pubkey(witness_script: &Script) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&WScriptHash::hash(witness_script.as_bytes()))
}

fn confirmed_total(utxos: &[&VaultUtxo]) -> Amount {
    utxos.iter().map(|u| u.value).sum()
}

/// Shared core: consume all confirmed UTXOs, emit one output, set the
/// path's locktime demands, populate per-input PSBT fields.
#[allow(clippy::too_many_arguments)]
fn build_spend(
    witness_script: &Script,
    utxos: &[VaultUtxo],
    n_lock_time: Option<u32>,
    n_sequence: Sequence,
    output_script: ScriptBuf,
    class: InputClass,
    fee: FeePolicy,
    estimates: Option<&FeeEstimates>,
    key_sources: &KeySourceMap,
) -> Result<Psbt, PsbtError> {
    let spendable: Vec<&VaultUtxo> = utxos.iter().filter(|u| u.confirmed).collect();
    if spendable.is_empty() {
        return Err(PsbtError::NoSpendableUtxos);
    }
    let fee_rate = fee.resolve(estimates)?;
    let total_in = confirmed_total(&spendable);

    let inputs: Vec<TxIn> = spendable
        .iter()
        .map(|utxo| TxIn {
            previous_output: utxo.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: n_sequence,
            witness: Witness::default(),
        })
        .collect();

    let lock_time = match n_lock_time {
        Some(height) => LockTime::from_consensus(height),
        None => LockTime::ZERO,
    };

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time,
        input: inputs,
        output: vec![TxOut {
            value: total_in,
            script_pubkey: output_script,
        }],
    };

    let vsize = estimate_vsize(tx.base_size(), class, tx.input.len());
    let fee_amount = Amount::from_sat(vsize as u64 * fee_rate);

    let send = total_in
        .checked_sub(fee_amount)
        .ok_or(PsbtError::InsufficientFunds {
            needed: fee_amount,
            available: total_in,
        })?;
    if send.to_sat() < DUST_LIMIT_SAT {
        return Err(PsbtError::DustOutput(send));
    }
    tx.output[0].value = send;

    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| PsbtError::Psbt(e.to_string()))?;
    let spk = vault_script_pubkey(witness_script);
    for (i, utxo) in spendable.iter().enumerate() {
        psbt.inputs[i].witness_utxo = Some(TxOut {
            value: utxo.value,
            script_pubkey: spk.clone(),
        });
        psbt.inputs[i].witness_script = Some(witness_script.to_owned());
        if !key_sources.is_empty() {
            psbt.inputs[i].bip32_derivation = key_sources.clone();
        }
    }
    Ok(psbt)
}

/// Build a sweep PSBT along the chosen spend path to an external address.
#[allow(clippy::too_many_arguments)]
pub fn build_sweep(
    witness_script: &Script,
    network: Network,
    utxos: &[VaultUtxo],
    path: &SpendPath,
    destination: &str,
    fee: FeePolicy,
    estimates: Option<&FeeEstimates>,
    key_sources: &KeySourceMap,
) -> Result<Psbt, PsbtError> {
    let address = destination
        .parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .map_err(|e| PsbtError::InvalidDestination(e.to_string()))?
        .require_network(network)
        .map_err(|_| PsbtError::InvalidNetwork(network))?;

    build_spend(
        witness_script,
        utxos,
        path.lock.n_lock_time,
        path.lock.n_sequence,
        address.script_pubkey(),
        InputClass::for_path(path),
        fee,
        estimates,
        key_sources,
    )
}

/// Build a dead-man-switch refresh: spend back to the vault, resetting the
/// CSV timer. Passing `new_witness_script` sends to a fresh address with
/// the same spending rules (better privacy); the returned script must then
/// be persisted atomically or the refreshed UTXO becomes unspendable.
#[allow(clippy::too_many_arguments)]
pub fn build_refresh(
    witness_script: &Script,
    utxos: &[VaultUtxo],
    path: &SpendPath,
    new_witness_script: Option<&Script>,
    fee: FeePolicy,
    estimates: Option<&FeeEstimates>,
    key_sources: &KeySourceMap,
) -> Result<RefreshPsbt, PsbtError> {
    if path.lock.n_sequence != Sequence::MAX || path.lock.n_lock_time.is_some() {
        return Err(PsbtError::NotOwnerPath);
    }
    let target = new_witness_script.unwrap_or(witness_script);
    let psbt = build_spend(
        witness_script,
        utxos,
        None,
        Sequence::MAX,
        vault_script_pubkey(target),
        InputClass::OwnerSig,
        fee,
        estimates,
        key_sources,
    )?;
    Ok(RefreshPsbt {
        psbt,
        new_witness_script: new_witness_script.map(|s| s.to_owned()),
    })
}

/// Fee a refresh would cost right now, without building the PSBT.
pub fn estimate_refresh_cost(
    witness_script: &Script,
    utxos: &[VaultUtxo],
    fee: FeePolicy,
    estimates: Option<&FeeEstimates>,
) -> Result<Amount, PsbtError> {
    let spendable: Vec<&VaultUtxo> = utxos.iter().filter(|u| u.confirmed).collect();
    if spendable.is_empty() {
        return Err(PsbtError::NoSpendableUtxos);
    }
    let fee_rate = fee.resolve(estimates)?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: spendable
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: vault_script_pubkey(witness_script),
        }],
    };
    let vsize = estimate_vsize(tx.base_size(), InputClass::OwnerSig, tx.input.len());
    Ok(Amount::from_sat(vsize as u64 * fee_rate))
}
