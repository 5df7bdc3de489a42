//! Spend-path enumeration
//!
//! Catalogues every way a vault script can be spent: which branch flags
//! select it, which signatures it needs and in what witness order, and the
//! nLockTime / nSequence the transaction must carry. The PSBT builder and
//! finalizer consume this model verbatim — they never re-derive locks or
//! witness layout on their own.
//!
//! Witness layout for a path, bottom of the stack first:
//!
//! ```text
//! [empty dummy]          if the branch ends in OP_CHECKMULTISIG
//! <sig> ...              one per signer, in `signers` order
//! <oracle sig>           if the branch is oracle-gated
//! <preimage>             if the branch is challenge-gated
//! <flag> ...             branch selectors, innermost first, outermost last
//! <witness script>
//! ```
//!
//! `OP_IF` pops the top stack element, so the outermost selector is the
//! last item pushed before the script itself.

use crate::compile::{combinations, MAX_SPEND_CONDITIONS};
use crate::script::{FarTier, GateSpec, ScriptTemplate};
use crate::timelock;
use bitcoin::hashes::sha256;
use bitcoin::Sequence;
use heirloom_keys::ScriptKey;
use serde::{Deserialize, Serialize};

/// nSequence for a CLTV spend: anything below 0xFFFFFFFF activates
/// nLockTime; this is the conventional choice.
pub const CLTV_INPUT_SEQUENCE: u32 = 0xFFFF_FFFE;

/// A single branch selector push: `True` pushes 0x01, `False` pushes the
/// empty vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchFlag {
    True,
    False,
}

/// A signer slot on the witness stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSigner {
    pub label: String,
    pub key: ScriptKey,
}

impl PathSigner {
    fn new(label: &str, key: ScriptKey) -> Self {
        Self {
            label: label.to_string(),
            key,
        }
    }
}

/// Locktime demands the transaction must satisfy for this path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequirement {
    /// CLTV branches require this nLockTime; `None` means nLockTime 0.
    pub n_lock_time: Option<u32>,
    /// Every input spending this path carries this nSequence.
    pub n_sequence: Sequence,
}

impl LockRequirement {
    fn unrestricted() -> Self {
        Self {
            n_lock_time: None,
            n_sequence: Sequence::MAX,
        }
    }

    fn cltv(height: u32) -> Self {
        Self {
            n_lock_time: Some(height),
            n_sequence: Sequence::from_consensus(CLTV_INPUT_SEQUENCE),
        }
    }

    fn csv(sequence: Sequence) -> Self {
        Self {
            n_lock_time: None,
            n_sequence: sequence,
        }
    }
}

/// When a path becomes spendable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Immediate,
    AtHeight(u32),
    AfterConfirmations(Sequence),
}

impl Availability {
    pub fn describe(&self) -> String {
        match self {
            Availability::Immediate => "immediately".to_string(),
            Availability::AtHeight(height) => format!(
                "from block {} (~{})",
                height,
                timelock::height_to_estimated_date(*height)
            ),
            Availability::AfterConfirmations(seq) => {
                format!("once the UTXO ages {}", timelock::describe_sequence(*seq))
            }
        }
    }
}

/// Key combinations able to satisfy a thresholded branch, capped to keep the
/// enumeration bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathThreshold {
    pub required: usize,
    /// Quorum keys in script (BIP-67) order; signatures go on the stack in
    /// this order.
    pub keys: Vec<ScriptKey>,
    pub combinations: Vec<Vec<ScriptKey>>,
    pub truncated: bool,
}

/// One way to spend the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendPath {
    pub name: String,
    /// Selector pushes in witness order: innermost first, outermost last.
    pub selectors: Vec<BranchFlag>,
    /// Single-signature slots in witness order. Empty for threshold paths.
    pub signers: Vec<PathSigner>,
    /// Present iff the branch ends in OP_CHECKMULTISIG.
    pub threshold: Option<PathThreshold>,
    /// Oracle co-signature slot, stacked above the main signatures.
    pub oracle: Option<PathSigner>,
    /// SHA-256 image a challenge-gated branch commits to.
    pub challenge_hash: Option<sha256::Hash>,
    pub lock: LockRequirement,
    pub availability: Availability,
    pub description: String,
}

impl SpendPath {
    /// Whether this path needs the CHECKMULTISIG dummy element.
    pub fn needs_multisig_dummy(&self) -> bool {
        self.threshold.is_some()
    }

    pub fn requires_preimage(&self) -> bool {
        self.challenge_hash.is_some()
    }

    /// Total signatures this path puts on the stack.
    pub fn signature_count(&self) -> usize {
        let base = match &self.threshold {
            Some(th) => th.required,
            None => self.signers.len(),
        };
        base + usize::from(self.oracle.is_some())
    }
}

fn threshold_info(required: usize, sorted_keys: &[ScriptKey]) -> PathThreshold {
    let combos = combinations(sorted_keys.len(), required);
    let truncated = combos.len() >= MAX_SPEND_CONDITIONS;
    PathThreshold {
        required,
        keys: sorted_keys.to_vec(),
        combinations: combos
            .into_iter()
            .map(|indexes| indexes.into_iter().map(|i| sorted_keys[i]).collect())
            .collect(),
        truncated,
    }
}

fn gated(path: SpendPath, gates: &GateSpec) -> SpendPath {
    let mut path = path;
    if let Some(oracle) = gates.oracle {
        path.oracle = Some(PathSigner::new("oracle", oracle));
    }
    path.challenge_hash = gates.challenge;
    path
}

fn sorted(keys: &[ScriptKey]) -> Vec<ScriptKey> {
    let mut out = keys.to_vec();
    crate::policy::sort_bip67(&mut out);
    out
}

/// Enumerate every spend path of a script template.
pub fn enumerate(template: &ScriptTemplate) -> Vec<SpendPath> {
    match template {
        ScriptTemplate::Cltv {
            owner,
            heir,
            height,
            gates,
        } => vec![
            SpendPath {
                name: "owner".to_string(),
                selectors: vec![BranchFlag::True],
                signers: vec![PathSigner::new("owner", *owner)],
                threshold: None,
                oracle: None,
                challenge_hash: None,
                lock: LockRequirement::unrestricted(),
                availability: Availability::Immediate,
                description: "Owner sweeps at any time".to_string(),
            },
            gated(
                SpendPath {
                    name: "heir".to_string(),
                    selectors: vec![BranchFlag::False],
                    signers: vec![PathSigner::new("heir", *heir)],
                    threshold: None,
                    oracle: None,
                    challenge_hash: None,
                    lock: LockRequirement::cltv(*height),
                    availability: Availability::AtHeight(*height),
                    description: format!("Heir claims once block {} is reached", height),
                },
                gates,
            ),
        ],
        ScriptTemplate::Csv {
            owner,
            beneficiary_role,
            beneficiary,
            sequence,
            gates,
        } => vec![
            SpendPath {
                name: "owner".to_string(),
                selectors: vec![BranchFlag::True],
                signers: vec![PathSigner::new("owner", *owner)],
                threshold: None,
                oracle: None,
                challenge_hash: None,
                lock: LockRequirement::unrestricted(),
                availability: Availability::Immediate,
                description: "Owner sweeps or refreshes at any time".to_string(),
            },
            gated(
                SpendPath {
                    name: beneficiary_role.to_string(),
                    selectors: vec![BranchFlag::False],
                    signers: vec![PathSigner::new(&beneficiary_role.to_string(), *beneficiary)],
                    threshold: None,
                    oracle: None,
                    challenge_hash: None,
                    lock: LockRequirement::csv(*sequence),
                    availability: Availability::AfterConfirmations(*sequence),
                    description: format!(
                        "{} claims after the vault sits untouched {}",
                        beneficiary_role,
                        timelock::describe_sequence(*sequence)
                    ),
                },
                gates,
            ),
        ],
        ScriptTemplate::Tiered {
            owner,
            mid_role,
            mid,
            mid_sequence,
            far,
            far_sequence,
            gates,
        } => {
            let mut paths = vec![
                SpendPath {
                    name: "owner".to_string(),
                    selectors: vec![BranchFlag::True],
                    signers: vec![PathSigner::new("owner", *owner)],
                    threshold: None,
                    oracle: None,
                    challenge_hash: None,
                    lock: LockRequirement::unrestricted(),
                    availability: Availability::Immediate,
                    description: "Owner sweeps at any time".to_string(),
                },
                SpendPath {
                    name: mid_role.to_string(),
                    // Inner IF true, outer IF false.
                    selectors: vec![BranchFlag::True, BranchFlag::False],
                    signers: vec![PathSigner::new(&mid_role.to_string(), *mid)],
                    threshold: None,
                    oracle: None,
                    challenge_hash: None,
                    lock: LockRequirement::csv(*mid_sequence),
                    availability: Availability::AfterConfirmations(*mid_sequence),
                    description: format!(
                        "{} claims after {}",
                        mid_role,
                        timelock::describe_sequence(*mid_sequence)
                    ),
                },
            ];
            let far_path = match far {
                FarTier::Single { role, key } => SpendPath {
                    name: role.to_string(),
                    selectors: vec![BranchFlag::False, BranchFlag::False],
                    signers: vec![PathSigner::new(&role.to_string(), *key)],
                    threshold: None,
                    oracle: None,
                    challenge_hash: None,
                    lock: LockRequirement::csv(*far_sequence),
                    availability: Availability::AfterConfirmations(*far_sequence),
                    description: format!(
                        "{} claims after {}",
                        role,
                        timelock::describe_sequence(*far_sequence)
                    ),
                },
                FarTier::Threshold { required, keys } => {
                    let quorum = sorted(keys);
                    SpendPath {
                        name: "heirs".to_string(),
                        selectors: vec![BranchFlag::False, BranchFlag::False],
                        signers: Vec::new(),
                        threshold: Some(threshold_info(*required, &quorum)),
                        oracle: None,
                        challenge_hash: None,
                        lock: LockRequirement::csv(*far_sequence),
                        availability: Availability::AfterConfirmations(*far_sequence),
                        description: format!(
                            "{} of {} heirs claim after {}",
                            required,
                            quorum.len(),
                            timelock::describe_sequence(*far_sequence)
                        ),
                    }
                }
            };
            paths.push(gated(far_path, gates));
            paths
        }
        ScriptTemplate::Decay {
            threshold_before,
            before,
            threshold_after,
            after,
            height,
            gates,
            ..
        } => {
            let before_sorted = sorted(before);
            let after_sorted = sorted(after);
            vec![
                SpendPath {
                    name: "multisig_before_decay".to_string(),
                    selectors: vec![BranchFlag::True],
                    signers: Vec::new(),
                    threshold: Some(threshold_info(*threshold_before, &before_sorted)),
                    oracle: None,
                    challenge_hash: None,
                    lock: LockRequirement::unrestricted(),
                    availability: Availability::Immediate,
                    description: format!(
                        "{} of {} keys spend before the quorum decays",
                        threshold_before,
                        before_sorted.len()
                    ),
                },
                gated(
                    SpendPath {
                        name: "multisig_after_decay".to_string(),
                        selectors: vec![BranchFlag::False],
                        signers: Vec::new(),
                        threshold: Some(threshold_info(*threshold_after, &after_sorted)),
                        oracle: None,
                        challenge_hash: None,
                        lock: LockRequirement::cltv(*height),
                        availability: Availability::AtHeight(*height),
                        description: format!(
                            "{} of {} heirs spend from block {}",
                            threshold_after,
                            after_sorted.len(),
                            height
                        ),
                    },
                    gates,
                ),
            ]
        }
        ScriptTemplate::Business {
            owner,
            partner,
            trustee,
            solo_sequence,
            trustee_sequence,
            gates,
        } => vec![
            SpendPath {
                name: "joint".to_string(),
                // Inner IF true, outer IF true. The partner's CHECKSIG runs
                // last, so their signature sits lowest on the stack.
                selectors: vec![BranchFlag::True, BranchFlag::True],
                signers: vec![
                    PathSigner::new("partner", *partner),
                    PathSigner::new("owner", *owner),
                ],
                threshold: None,
                oracle: None,
                challenge_hash: None,
                lock: LockRequirement::unrestricted(),
                availability: Availability::Immediate,
                description: "Owner and partner co-sign at any time".to_string(),
            },
            SpendPath {
                name: "owner_solo".to_string(),
                selectors: vec![BranchFlag::False, BranchFlag::True],
                signers: vec![PathSigner::new("owner", *owner)],
                threshold: None,
                oracle: None,
                challenge_hash: None,
                lock: LockRequirement::csv(*solo_sequence),
                availability: Availability::AfterConfirmations(*solo_sequence),
                description: format!(
                    "Owner alone after {}",
                    timelock::describe_sequence(*solo_sequence)
                ),
            },
            gated(
                SpendPath {
                    name: "trustee".to_string(),
                    selectors: vec![BranchFlag::False],
                    signers: vec![PathSigner::new("trustee", *trustee)],
                    threshold: None,
                    oracle: None,
                    challenge_hash: None,
                    lock: LockRequirement::csv(*trustee_sequence),
                    availability: Availability::AfterConfirmations(*trustee_sequence),
                    description: format!(
                        "Trustee after {}",
                        timelock::describe_sequence(*trustee_sequence)
                    ),
                },
                gates,
            ),
        ],
    }
}

/// The path an owner refresh (dead-man-switch reset) uses.
pub fn owner_path(paths: &[SpendPath]) -> Option<&SpendPath> {
    paths
        .iter()
        .find(|p| p.lock.n_sequence == Sequence::MAX && p.lock.n_lock_time.is_none())
}
