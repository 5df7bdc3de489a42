//! Fee model
//!
//! Witness-size based vsize estimation. Per-input witness weight is fixed
//! per spend class rather than computed from a satisfaction, so estimates
//! are stable before any signature exists:
//!
//! - owner single-sig path: ~150 weight units of witness,
//! - heir single-sig timelock/CSV path: ~200 wu (extra branch data),
//! - multisig branch (either quorum): ~325 wu (dummy + two signatures +
//!   branch flag + a larger script).
//!
//! `vsize = ceil((base_size * 4 + witness_wu) / 4)`, fee = vsize * rate.

use heirloom_vault::spend_path::SpendPath;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum output value the engine will emit, in satoshis.
pub const DUST_LIMIT_SAT: u64 = 546;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FeeError {
    #[error("fee tier requested but no fee estimates available")]
    MissingEstimates,

    #[error("fee rate must be at least 1 sat/vB")]
    ZeroRate,
}

/// Recommended rates in sat/vB, as served by esplora backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimates {
    pub fastest: u64,
    pub half_hour: u64,
    pub hour: u64,
    pub economy: u64,
    pub minimum: u64,
}

/// A named confirmation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    Fastest,
    HalfHour,
    Hour,
    Economy,
}

/// Either an explicit rate or a tier resolved against live estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePolicy {
    Rate(u64),
    Tier(FeeTier),
}

impl FeePolicy {
    pub fn resolve(&self, estimates: Option<&FeeEstimates>) -> Result<u64, FeeError> {
        let rate = match self {
            FeePolicy::Rate(rate) => *rate,
            FeePolicy::Tier(tier) => {
                let estimates = estimates.ok_or(FeeError::MissingEstimates)?;
                match tier {
                    FeeTier::Fastest => estimates.fastest,
                    FeeTier::HalfHour => estimates.half_hour,
                    FeeTier::Hour => estimates.hour,
                    FeeTier::Economy => estimates.economy,
                }
            }
        };
        if rate == 0 {
            return Err(FeeError::ZeroRate);
        }
        Ok(rate)
    }
}

/// Witness-weight class of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputClass {
    OwnerSig,
    HeirSig,
    Multisig,
}

impl InputClass {
    /// Witness weight units this input contributes.
    pub fn witness_weight(&self) -> usize {
        match self {
            InputClass::OwnerSig => 150,
            InputClass::HeirSig => 200,
            InputClass::Multisig => 325,
        }
    }

    /// Classify a spend path: any multi-signature branch is heaviest, an
    /// unrestricted single-sig path is the owner class, and a timelocked
    /// single-sig path carries the extra branch data.
    pub fn for_path(path: &SpendPath) -> Self {
        if path.threshold.is_some() || path.signature_count() >= 2 {
            InputClass::Multisig
        } else if path.lock.n_sequence == bitcoin::Sequence::MAX
            && path.lock.n_lock_time.is_none()
        {
            InputClass::OwnerSig
        } else {
            InputClass::HeirSig
        }
    }
}

/// Virtual size of a transaction with `n_inputs` inputs of one class.
pub fn estimate_vsize(base_size: usize, class: InputClass, n_inputs: usize) -> usize {
    let witness = class.witness_weight() * n_inputs;
    (base_size * 4 + witness).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimates() -> FeeEstimates {
        FeeEstimates {
            fastest: 40,
            half_hour: 25,
            hour: 12,
            economy: 4,
            minimum: 1,
        }
    }

    #[test]
    fn test_resolve_explicit_rate() {
        assert_eq!(FeePolicy::Rate(7).resolve(None).unwrap(), 7);
        assert_eq!(FeePolicy::Rate(0).resolve(None), Err(FeeError::ZeroRate));
    }

    #[test]
    fn test_resolve_tiers() {
        let e = estimates();
        assert_eq!(FeePolicy::Tier(FeeTier::Fastest).resolve(Some(&e)).unwrap(), 40);
        assert_eq!(FeePolicy::Tier(FeeTier::Economy).resolve(Some(&e)).unwrap(), 4);
        assert_eq!(
            FeePolicy::Tier(FeeTier::Hour).resolve(None),
            Err(FeeError::MissingEstimates)
        );
    }

    #[test]
    fn test_vsize_ordering() {
        // Same shape, heavier witness class => strictly larger vsize.
        let base = 125;
        let owner = estimate_vsize(base, InputClass::OwnerSig, 2);
        let heir = estimate_vsize(base, InputClass::HeirSig, 2);
        let multi = estimate_vsize(base, InputClass::Multisig, 2);
        assert!(owner < heir);
        assert!(heir < multi);
    }

    #[test]
    fn test_vsize_arithmetic() {
        // base 100, one owner input: (400 + 150) / 4 = 137.5 -> 138
        assert_eq!(estimate_vsize(100, InputClass::OwnerSig, 1), 138);
    }
}
