//! Spend-type detection from observed witnesses
//!
//! For the branch-flag templates, the selector immediately below the
//! witness script says which side of the outer IF a spend took: a single
//! 0x01 byte selects the owner-side branch, an empty push selects the
//! heir-side branch. Watch services use this to tell an owner refresh from
//! an heir claim without any key material.
//!
//! A timing fallback covers witnesses that cannot be read: a spend
//! confirmed before the relative window elapsed can only be the owner.

use bitcoin::Witness;
use serde::{Deserialize, Serialize};

/// Which script branch a spend exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendKind {
    /// Owner-side branch: sweep, refresh, joint or pre-decay quorum.
    OwnerBranch,
    /// Heir-side branch: claim, trustee or post-decay quorum.
    HeirBranch,
    Unknown,
}

/// How the classification was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    WitnessAnalysis,
    TimelockTiming,
    Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendObservation {
    pub kind: SpendKind,
    pub method: DetectionMethod,
    /// Witness items below the script.
    pub stack_size: usize,
}

/// Classify a P2WSH spend by its outermost branch selector.
pub fn classify_witness(witness: &Witness) -> SpendObservation {
    let items: Vec<&[u8]> = witness.iter().collect();
    if items.len() < 2 {
        return SpendObservation {
            kind: SpendKind::Unknown,
            method: DetectionMethod::Indeterminate,
            stack_size: items.len().saturating_sub(1),
        };
    }

    // Last item is the witness script; the selector sits just below it.
    let stack_size = items.len() - 1;
    let selector = items[stack_size - 1];
    let kind = if selector == [0x01] {
        SpendKind::OwnerBranch
    } else if selector.is_empty() {
        SpendKind::HeirBranch
    } else {
        // No branch selector at this position; not one of our templates.
        SpendKind::Unknown
    };

    SpendObservation {
        kind,
        method: if kind == SpendKind::Unknown {
            DetectionMethod::Indeterminate
        } else {
            DetectionMethod::WitnessAnalysis
        },
        stack_size,
    }
}

/// Timing fallback: before the relative window has elapsed only the owner
/// side can spend. Past that point timing alone says nothing.
pub fn classify_by_timing(
    spend_height: u32,
    utxo_height: u32,
    window_blocks: u32,
) -> Option<SpendKind> {
    if spend_height.saturating_sub(utxo_height) < window_blocks {
        Some(SpendKind::OwnerBranch)
    } else {
        None
    }
}

/// Witness analysis first, timing as fallback.
pub fn classify(
    witness: &Witness,
    spend_height: u32,
    utxo_height: u32,
    window_blocks: u32,
) -> SpendObservation {
    let observation = classify_witness(witness);
    if observation.kind == SpendKind::Unknown && spend_height > 0 && utxo_height > 0 {
        if let Some(kind) = classify_by_timing(spend_height, utxo_height, window_blocks) {
            return SpendObservation {
                kind,
                method: DetectionMethod::TimelockTiming,
                stack_size: observation.stack_size,
            };
        }
    }
    observation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness_of(items: &[&[u8]]) -> Witness {
        let mut witness = Witness::new();
        for item in items {
            witness.push(item);
        }
        witness
    }

    const SIG: &[u8] = &[0x30; 71];
    const SCRIPT: &[u8] = &[0x63, 0x21, 0x02, 0x68];

    #[test]
    fn test_owner_branch_detected() {
        let w = witness_of(&[SIG, &[0x01], SCRIPT]);
        let obs = classify_witness(&w);
        assert_eq!(obs.kind, SpendKind::OwnerBranch);
        assert_eq!(obs.method, DetectionMethod::WitnessAnalysis);
        assert_eq!(obs.stack_size, 2);
    }

    #[test]
    fn test_heir_branch_detected() {
        let w = witness_of(&[SIG, &[], SCRIPT]);
        let obs = classify_witness(&w);
        assert_eq!(obs.kind, SpendKind::HeirBranch);
    }

    #[test]
    fn test_nested_branches_read_outer_selector() {
        // Business owner-solo: [sig, inner empty, outer 0x01, script]
        let w = witness_of(&[SIG, &[], &[0x01], SCRIPT]);
        assert_eq!(classify_witness(&w).kind, SpendKind::OwnerBranch);

        // Tiered far branch: [sig, inner empty, outer empty, script]
        let w = witness_of(&[SIG, &[], &[], SCRIPT]);
        assert_eq!(classify_witness(&w).kind, SpendKind::HeirBranch);
    }

    #[test]
    fn test_garbage_witness_is_unknown() {
        let obs = classify_witness(&witness_of(&[SCRIPT]));
        assert_eq!(obs.kind, SpendKind::Unknown);

        // A signature where the selector should be.
        let obs = classify_witness(&witness_of(&[SIG, SIG, SCRIPT]));
        assert_eq!(obs.kind, SpendKind::Unknown);
    }

    #[test]
    fn test_timing_fallback() {
        assert_eq!(
            classify_by_timing(810_000, 800_000, 12_960),
            Some(SpendKind::OwnerBranch)
        );
        assert_eq!(classify_by_timing(815_000, 800_000, 12_960), None);

        // Unreadable witness, pre-expiry spend: timing decides.
        let obs = classify(&witness_of(&[SCRIPT]), 810_000, 800_000, 12_960);
        assert_eq!(obs.kind, SpendKind::OwnerBranch);
        assert_eq!(obs.method, DetectionMethod::TimelockTiming);

        // Post-expiry: stays unknown.
        let obs = classify(&witness_of(&[SCRIPT]), 830_000, 800_000, 12_960);
        assert_eq!(obs.kind, SpendKind::Unknown);
    }
}
