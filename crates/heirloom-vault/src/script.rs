//! Witness script assembly
//!
//! Emits the canonical P2WSH witness script for each vault shape. The
//! scripts are explicit IF/ELSE templates rather than compiler output, so
//! they are byte-exact reproducible from the configuration and identical
//! across implementations:
//!
//! ```text
//! two-branch (CLTV or CSV):
//!   OP_IF <owner> OP_CHECKSIG
//!   OP_ELSE <lock> OP_CLTV|OP_CSV OP_DROP <beneficiary> OP_CHECKSIG
//!   OP_ENDIF
//!
//! tiered (spouse / family):
//!   OP_IF <owner> OP_CHECKSIG
//!   OP_ELSE
//!     OP_IF <S> OP_CSV OP_DROP <mid> OP_CHECKSIG
//!     OP_ELSE [gates] <H> OP_CSV OP_DROP (<heir> OP_CHECKSIG | <k> heirs <n> OP_CHECKMULTISIG)
//!     OP_ENDIF
//!   OP_ENDIF
//!
//! decaying multisig:
//!   OP_IF <Nb> keys <M> OP_CHECKMULTISIG
//!   OP_ELSE <H> OP_CLTV OP_DROP <Na> heirs <K> OP_CHECKMULTISIG
//!   OP_ENDIF
//!
//! business (owner key reused across joint and solo branches by design):
//!   OP_IF
//!     OP_IF <owner> OP_CHECKSIGVERIFY <partner> OP_CHECKSIG
//!     OP_ELSE <S> OP_CSV OP_DROP <owner> OP_CHECKSIG
//!     OP_ENDIF
//!   OP_ELSE <H> OP_CSV OP_DROP <trustee> OP_CHECKSIG
//!   OP_ENDIF
//! ```
//!
//! Multisig quorums are sorted lexicographically (BIP-67 style) in both
//! branches. The challenge gate prefixes the furthest heir branch with
//! `OP_SHA256 <hash> OP_EQUALVERIFY`; the oracle gate inserts
//! `<oracle> OP_CHECKSIGVERIFY` ahead of the final signature check.

use crate::config::KeyRole;
use crate::policy::sort_bip67;
use crate::timelock::TimelockError;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_CLTV, OP_CSV, OP_DROP, OP_ELSE,
    OP_ENDIF, OP_EQUALVERIFY, OP_IF, OP_SHA256,
};
use bitcoin::script::Builder;
use bitcoin::{Address, Network, Script, ScriptBuf, Sequence, WScriptHash};
use heirloom_keys::ScriptKey;
use thiserror::Error;

/// CHECKMULTISIG accepts at most 20 keys.
pub const MAX_MULTISIG_KEYS: usize = 20;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("owner key must not appear in the decayed quorum")]
    OwnerInDecayedQuorum,

    #[error("multisig quorum of {0} keys exceeds the CHECKMULTISIG limit")]
    QuorumTooLarge(usize),

    #[error("invalid threshold {required} of {available}")]
    BadThreshold { required: usize, available: usize },

    #[error("empty key quorum")]
    EmptyQuorum,

    #[error("timelock error: {0}")]
    Lock(#[from] TimelockError),

    #[error("address derivation failed: {0}")]
    Address(String),
}

/// Gate material resolved for script emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateSpec {
    pub challenge: Option<sha256::Hash>,
    pub oracle: Option<ScriptKey>,
}

impl GateSpec {
    pub fn none() -> Self {
        Self::default()
    }
}

/// The far tier of a tiered script: one heir or a fixed 2-of-N quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FarTier {
    Single { role: KeyRole, key: ScriptKey },
    Threshold { required: usize, keys: Vec<ScriptKey> },
}

/// A fully resolved script shape; everything the assembler and the
/// spend-path model need, with locks already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptTemplate {
    Cltv {
        owner: ScriptKey,
        heir: ScriptKey,
        height: u32,
        gates: GateSpec,
    },
    Csv {
        owner: ScriptKey,
        beneficiary_role: KeyRole,
        beneficiary: ScriptKey,
        sequence: Sequence,
        gates: GateSpec,
    },
    Tiered {
        owner: ScriptKey,
        mid_role: KeyRole,
        mid: ScriptKey,
        mid_sequence: Sequence,
        far: FarTier,
        far_sequence: Sequence,
        gates: GateSpec,
    },
    Decay {
        owner: ScriptKey,
        threshold_before: usize,
        before: Vec<ScriptKey>,
        threshold_after: usize,
        after: Vec<ScriptKey>,
        height: u32,
        gates: GateSpec,
    },
    Business {
        owner: ScriptKey,
        partner: ScriptKey,
        trustee: ScriptKey,
        solo_sequence: Sequence,
        trustee_sequence: Sequence,
        gates: GateSpec,
    },
}

fn push_key(builder: Builder, key: &ScriptKey) -> Builder {
    builder.push_slice(key.to_bytes())
}

/// `OP_SHA256 <hash> OP_EQUALVERIFY` prefix for a challenge-gated branch.
fn push_challenge(mut builder: Builder, gates: &GateSpec) -> Builder {
    if let Some(hash) = gates.challenge {
        builder = builder
            .push_opcode(OP_SHA256)
            .push_slice(hash.to_byte_array())
            .push_opcode(OP_EQUALVERIFY);
    }
    builder
}

/// `<oracle> OP_CHECKSIGVERIFY` ahead of the final signature check.
fn push_oracle(mut builder: Builder, gates: &GateSpec) -> Builder {
    if let Some(oracle) = gates.oracle {
        builder = push_key(builder, &oracle).push_opcode(OP_CHECKSIGVERIFY);
    }
    builder
}

fn push_multisig(
    mut builder: Builder,
    required: usize,
    keys: &[ScriptKey],
) -> Result<Builder, ScriptError> {
    if keys.is_empty() {
        return Err(ScriptError::EmptyQuorum);
    }
    if keys.len() > MAX_MULTISIG_KEYS {
        return Err(ScriptError::QuorumTooLarge(keys.len()));
    }
    if required == 0 || required > keys.len() {
        return Err(ScriptError::BadThreshold {
            required,
            available: keys.len(),
        });
    }
    let mut sorted = keys.to_vec();
    sort_bip67(&mut sorted);
    builder = builder.push_int(required as i64);
    for key in &sorted {
        builder = push_key(builder, key);
    }
    Ok(builder
        .push_int(sorted.len() as i64)
        .push_opcode(OP_CHECKMULTISIG))
}

/// Emit the witness script for a template.
pub fn witness_script(template: &ScriptTemplate) -> Result<ScriptBuf, ScriptError> {
    let script = match template {
        ScriptTemplate::Cltv {
            owner,
            heir,
            height,
            gates,
        } => {
            crate::timelock::validate_cltv_height(*height)?;
            let mut b = Builder::new().push_opcode(OP_IF);
            b = push_key(b, owner).push_opcode(OP_CHECKSIG).push_opcode(OP_ELSE);
            b = push_challenge(b, gates)
                .push_int(*height as i64)
                .push_opcode(OP_CLTV)
                .push_opcode(OP_DROP);
            b = push_oracle(b, gates);
            push_key(b, heir)
                .push_opcode(OP_CHECKSIG)
                .push_opcode(OP_ENDIF)
                .into_script()
        }
        ScriptTemplate::Csv {
            owner,
            beneficiary,
            sequence,
            gates,
            ..
        } => {
            crate::timelock::validate_bip68(sequence.to_consensus_u32())?;
            let mut b = Builder::new().push_opcode(OP_IF);
            b = push_key(b, owner).push_opcode(OP_CHECKSIG).push_opcode(OP_ELSE);
            b = push_challenge(b, gates)
                .push_int(sequence.to_consensus_u32() as i64)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP);
            b = push_oracle(b, gates);
            push_key(b, beneficiary)
                .push_opcode(OP_CHECKSIG)
                .push_opcode(OP_ENDIF)
                .into_script()
        }
        ScriptTemplate::Tiered {
            owner,
            mid,
            mid_sequence,
            far,
            far_sequence,
            gates,
            ..
        } => {
            crate::timelock::validate_bip68(mid_sequence.to_consensus_u32())?;
            crate::timelock::validate_bip68(far_sequence.to_consensus_u32())?;
            let mut b = Builder::new().push_opcode(OP_IF);
            b = push_key(b, owner).push_opcode(OP_CHECKSIG).push_opcode(OP_ELSE);
            // Mid tier: short horizon, never gated.
            b = b
                .push_opcode(OP_IF)
                .push_int(mid_sequence.to_consensus_u32() as i64)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP);
            b = push_key(b, mid).push_opcode(OP_CHECKSIG).push_opcode(OP_ELSE);
            // Far tier: gated.
            b = push_challenge(b, gates)
                .push_int(far_sequence.to_consensus_u32() as i64)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP);
            b = push_oracle(b, gates);
            b = match far {
                FarTier::Single { key, .. } => push_key(b, key).push_opcode(OP_CHECKSIG),
                FarTier::Threshold { required, keys } => push_multisig(b, *required, keys)?,
            };
            b.push_opcode(OP_ENDIF).push_opcode(OP_ENDIF).into_script()
        }
        ScriptTemplate::Decay {
            owner,
            threshold_before,
            before,
            threshold_after,
            after,
            height,
            gates,
        } => {
            crate::timelock::validate_cltv_height(*height)?;
            if after.iter().any(|k| k == owner) {
                return Err(ScriptError::OwnerInDecayedQuorum);
            }
            let mut b = Builder::new().push_opcode(OP_IF);
            b = push_multisig(b, *threshold_before, before)?.push_opcode(OP_ELSE);
            b = push_challenge(b, gates)
                .push_int(*height as i64)
                .push_opcode(OP_CLTV)
                .push_opcode(OP_DROP);
            b = push_oracle(b, gates);
            push_multisig(b, *threshold_after, after)?
                .push_opcode(OP_ENDIF)
                .into_script()
        }
        ScriptTemplate::Business {
            owner,
            partner,
            trustee,
            solo_sequence,
            trustee_sequence,
            gates,
        } => {
            crate::timelock::validate_bip68(solo_sequence.to_consensus_u32())?;
            crate::timelock::validate_bip68(trustee_sequence.to_consensus_u32())?;
            let mut b = Builder::new().push_opcode(OP_IF).push_opcode(OP_IF);
            // Joint: both signatures.
            b = push_key(b, owner).push_opcode(OP_CHECKSIGVERIFY);
            b = push_key(b, partner).push_opcode(OP_CHECKSIG).push_opcode(OP_ELSE);
            // Owner solo after the CSV delay.
            b = b
                .push_int(solo_sequence.to_consensus_u32() as i64)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP);
            b = push_key(b, owner)
                .push_opcode(OP_CHECKSIG)
                .push_opcode(OP_ENDIF)
                .push_opcode(OP_ELSE);
            // Trustee tier: gated.
            b = push_challenge(b, gates)
                .push_int(trustee_sequence.to_consensus_u32() as i64)
                .push_opcode(OP_CSV)
                .push_opcode(OP_DROP);
            b = push_oracle(b, gates);
            push_key(b, trustee)
                .push_opcode(OP_CHECKSIG)
                .push_opcode(OP_ENDIF)
                .into_script()
        }
    };
    Ok(script)
}

/// SegWit v0 script-hash address for a witness script.
pub fn p2wsh_address(script: &Script, network: Network) -> Result<Address, ScriptError> {
    let spk = ScriptBuf::new_p2wsh(&WScriptHash::hash(script.as_bytes()));
    Address::from_script(&spk, network).map_err(|e| ScriptError::Address(e.to_string()))
}

/// Whether `s` parses as an address usable on `network`. Signet shares
/// testnet's `tb` HRP, so a testnet-valid bech32 address is signet-valid.
pub fn validate_address(s: &str, network: Network) -> bool {
    s.parse::<Address<bitcoin::address::NetworkUnchecked>>()
        .map(|addr| addr.is_valid_for_network(network))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn key(prefix: u8, fill: u8) -> ScriptKey {
        let mut bytes = [fill; 33];
        bytes[0] = prefix;
        ScriptKey::from_bytes(bytes).unwrap()
    }

    fn cltv_template() -> ScriptTemplate {
        ScriptTemplate::Cltv {
            owner: key(2, 0xaa),
            heir: key(3, 0xbb),
            height: 900_000,
            gates: GateSpec::none(),
        }
    }

    fn csv_template() -> ScriptTemplate {
        ScriptTemplate::Csv {
            owner: key(2, 0xaa),
            beneficiary_role: KeyRole::Heir,
            beneficiary: key(3, 0xbb),
            sequence: Sequence::from_height(12_960),
            gates: GateSpec::none(),
        }
    }

    fn decay_template() -> ScriptTemplate {
        ScriptTemplate::Decay {
            owner: key(2, 0xaa),
            threshold_before: 2,
            before: vec![key(2, 0xaa), key(2, 0xcc), key(3, 0xee)],
            threshold_after: 1,
            after: vec![key(2, 0xcc), key(3, 0xee)],
            height: 900_000,
            gates: GateSpec::none(),
        }
    }

    fn opcode_count(script: &Script, opcode: bitcoin::opcodes::Opcode) -> usize {
        script
            .instructions()
            .filter(|ins| {
                matches!(ins, Ok(bitcoin::script::Instruction::Op(op)) if *op == opcode)
            })
            .count()
    }

    #[test]
    fn test_scripts_are_branch_framed() {
        for template in [cltv_template(), csv_template(), decay_template()] {
            let script = witness_script(&template).unwrap();
            let bytes = script.as_bytes();
            assert_eq!(bytes[0], OP_IF.to_u8(), "must start with OP_IF");
            assert_eq!(
                bytes[bytes.len() - 1],
                OP_ENDIF.to_u8(),
                "must end with OP_ENDIF"
            );
        }
    }

    #[test]
    fn test_cltv_script_opcodes() {
        let script = witness_script(&cltv_template()).unwrap();
        let asm = script.to_asm_string();
        assert!(asm.contains("OP_CLTV"), "asm: {}", asm);
        assert!(!asm.contains("OP_CSV"));
        assert_eq!(opcode_count(&script, OP_CHECKSIG), 2);
    }

    #[test]
    fn test_csv_script_opcodes() {
        let script = witness_script(&csv_template()).unwrap();
        let asm = script.to_asm_string();
        assert!(asm.contains("OP_CSV"), "asm: {}", asm);
        assert!(!asm.contains("OP_CLTV"));
    }

    #[test]
    fn test_decay_script_has_two_checkmultisig() {
        let script = witness_script(&decay_template()).unwrap();
        assert_eq!(opcode_count(&script, OP_CHECKMULTISIG), 2);
        assert!(script.to_asm_string().contains("OP_CLTV"));
    }

    #[test]
    fn test_decay_rejects_owner_in_decayed_quorum() {
        let template = ScriptTemplate::Decay {
            owner: key(2, 0xaa),
            threshold_before: 2,
            before: vec![key(2, 0xaa), key(2, 0xcc)],
            threshold_after: 1,
            after: vec![key(2, 0xaa), key(2, 0xcc)],
            height: 900_000,
            gates: GateSpec::none(),
        };
        assert!(matches!(
            witness_script(&template),
            Err(ScriptError::OwnerInDecayedQuorum)
        ));
    }

    #[test]
    fn test_multisig_keys_sorted_regardless_of_input_order() {
        let a = ScriptTemplate::Decay {
            owner: key(2, 0xaa),
            threshold_before: 2,
            before: vec![key(3, 0xee), key(2, 0xaa), key(2, 0xcc)],
            threshold_after: 1,
            after: vec![key(3, 0xee), key(2, 0xcc)],
            height: 900_000,
            gates: GateSpec::none(),
        };
        assert_eq!(
            witness_script(&a).unwrap(),
            witness_script(&decay_template()).unwrap()
        );
    }

    #[test]
    fn test_challenge_gate_in_heir_branch() {
        let hash = sha256::Hash::hash(b"proof of kinship");
        let template = ScriptTemplate::Csv {
            owner: key(2, 0xaa),
            beneficiary_role: KeyRole::Heir,
            beneficiary: key(3, 0xbb),
            sequence: Sequence::from_height(12_960),
            gates: GateSpec {
                challenge: Some(hash),
                oracle: None,
            },
        };
        let script = witness_script(&template).unwrap();
        let asm = script.to_asm_string();
        assert!(asm.contains("OP_SHA256"));
        assert!(asm.contains("OP_EQUALVERIFY"));
        // The gate sits in the ELSE branch, after the owner's CHECKSIG.
        let owner_pos = asm.find("OP_CHECKSIG").unwrap();
        let gate_pos = asm.find("OP_SHA256").unwrap();
        assert!(gate_pos > owner_pos);
    }

    #[test]
    fn test_oracle_gate_adds_checksigverify() {
        let template = ScriptTemplate::Csv {
            owner: key(2, 0xaa),
            beneficiary_role: KeyRole::Heir,
            beneficiary: key(3, 0xbb),
            sequence: Sequence::from_height(12_960),
            gates: GateSpec {
                challenge: None,
                oracle: Some(key(2, 0xdd)),
            },
        };
        let script = witness_script(&template).unwrap();
        assert_eq!(opcode_count(&script, OP_CHECKSIGVERIFY), 1);
    }

    #[test]
    fn test_business_script_shape() {
        let template = ScriptTemplate::Business {
            owner: key(2, 0xaa),
            partner: key(2, 0xcc),
            trustee: key(3, 0xee),
            solo_sequence: Sequence::from_height(4320),
            trustee_sequence: Sequence::from_height(12_960),
            gates: GateSpec::none(),
        };
        let script = witness_script(&template).unwrap();
        let bytes = script.as_bytes();
        assert_eq!(bytes[0], OP_IF.to_u8());
        assert_eq!(bytes[1], OP_IF.to_u8(), "nested IF for the joint branch");
        assert_eq!(bytes[bytes.len() - 1], OP_ENDIF.to_u8());
        assert_eq!(opcode_count(&script, OP_CHECKSIGVERIFY), 1);
        assert_eq!(opcode_count(&script, OP_CHECKSIG), 3);
        assert_eq!(opcode_count(&script, OP_CSV), 2);
    }

    #[test]
    fn test_mainnet_address_shape() {
        let script = witness_script(&cltv_template()).unwrap();
        let addr = p2wsh_address(&script, Network::Bitcoin).unwrap().to_string();
        assert!(addr.starts_with("bc1q"), "address: {}", addr);
        assert_eq!(addr.len(), 62);
        assert!(validate_address(&addr, Network::Bitcoin));
        assert!(!validate_address(&addr, Network::Testnet));
    }

    #[test]
    fn test_testnet_address_shape() {
        let script = witness_script(&csv_template()).unwrap();
        let addr = p2wsh_address(&script, Network::Testnet).unwrap().to_string();
        assert!(addr.starts_with("tb1q"), "address: {}", addr);
        assert!(validate_address(&addr, Network::Testnet));
        // Signet shares testnet's HRP.
        assert!(validate_address(&addr, Network::Signet));
        assert!(!validate_address(&addr, Network::Bitcoin));
    }

    #[test]
    fn test_script_determinism() {
        let s1 = witness_script(&decay_template()).unwrap();
        let s2 = witness_script(&decay_template()).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(
            p2wsh_address(&s1, Network::Bitcoin).unwrap(),
            p2wsh_address(&s2, Network::Bitcoin).unwrap()
        );
    }

    #[test]
    fn test_quorum_limits() {
        let too_many: Vec<ScriptKey> = (0..21u8).map(|i| key(2, i)).collect();
        let template = ScriptTemplate::Decay {
            owner: key(2, 0xaa),
            threshold_before: 2,
            before: too_many,
            threshold_after: 1,
            after: vec![key(2, 0xcc)],
            height: 900_000,
            gates: GateSpec::none(),
        };
        assert!(matches!(
            witness_script(&template),
            Err(ScriptError::QuorumTooLarge(21))
        ));
    }

    #[test]
    fn test_address_parse_helper() {
        assert!(!validate_address("definitely not an address", Network::Bitcoin));
        // A mainnet P2WSH address parses back to the same script hash.
        let script = witness_script(&cltv_template()).unwrap();
        let addr = p2wsh_address(&script, Network::Bitcoin).unwrap();
        let reparsed = Address::from_str(&addr.to_string())
            .unwrap()
            .require_network(Network::Bitcoin)
            .unwrap();
        assert_eq!(reparsed.script_pubkey(), addr.script_pubkey());
    }
}
