//! Inheritance policy construction
//!
//! Builds the canonical miniscript policy for a validated configuration,
//! with concrete hex keys at the leaves. Per profile:
//!
//! ```text
//! solo      or(pk(OWNER), and(pk(RECOVERY), older(R)))
//! spouse    or(pk(OWNER), or(and(pk(SPOUSE), older(S)), and(pk(HEIR), older(H))))
//! family    or(pk(OWNER), or(and(pk(RECOVERY), older(S)), and(thresh(2, heirs..), older(H))))
//! business  or(and(pk(OWNER), pk(PARTNER)), or(and(pk(OWNER), older(S)), and(pk(TRUSTEE), older(H))))
//! dms       or(pk(OWNER), and(pk(HEIR), older(T)))
//! timelock  or(pk(OWNER), and(pk(HEIR), after(H)))
//! decay     or(thresh(Nb, pk(OWNER), heirs..), and(thresh(Na, heirs..), after(H)))
//! ```
//!
//! Gates wrap only the furthest heir-tier subexpression; owner-tier and
//! short-horizon recovery/spouse branches are never wrapped. Duress is never
//! emitted into a policy: Bitcoin Script cannot force a destination, so a
//! "duress key" would just be a second owner key.

use crate::config::{
    Gate, KeyRole, Modifier, ResolvedKeys, VaultConfiguration, VaultProfile, VaultTimelock,
};
use crate::timelock::{TimelockError, SEQUENCE_LOCKTIME_MASK, SEQUENCE_LOCKTIME_TYPE_FLAG};
use heirloom_keys::{KeyError, ScriptKey};
use miniscript::policy::Concrete;
use miniscript::{AbsLockTime, RelLockTime, Threshold};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

pub type Policy = Concrete<ScriptKey>;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("missing key for role {0}")]
    MissingRole(KeyRole),

    #[error("missing timelock for role {0}")]
    MissingTimelock(KeyRole),

    #[error("role {role} needs a {expected} timelock")]
    WrongTimelockKind {
        role: KeyRole,
        expected: &'static str,
    },

    #[error("insufficient keys: need {needed}, have {have}")]
    InsufficientKeys { needed: usize, have: usize },

    #[error("invalid threshold {required} of {available}")]
    InvalidThreshold { required: usize, available: usize },

    #[error("decaying vault requires a decay quorum")]
    MissingDecay,

    #[error("lock encoding: {0}")]
    LockEncoding(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("timelock error: {0}")]
    Lock(#[from] TimelockError),

    #[error("policy parse error: {0}")]
    Parse(String),

    #[error("unsupported shape: {0}")]
    Unsupported(String),
}

/// A built policy plus any non-fatal notes recorded along the way.
#[derive(Debug)]
pub struct PolicyBundle {
    pub policy: Policy,
    pub warnings: Vec<String>,
}

/// One stage of a staggered vault: an independent policy with its own lock
/// and percentage share.
#[derive(Debug)]
pub struct StagePolicy {
    pub policy: Policy,
    pub percentage: u8,
    pub lock: VaultTimelock,
}

fn pk(key: ScriptKey) -> Arc<Policy> {
    Arc::new(Concrete::Key(key))
}

fn and(a: Arc<Policy>, b: Arc<Policy>) -> Arc<Policy> {
    Arc::new(Concrete::And(vec![a, b]))
}

fn or(a: Arc<Policy>, b: Arc<Policy>) -> Arc<Policy> {
    Arc::new(Concrete::Or(vec![(1, a), (1, b)]))
}

fn thresh(required: usize, keys: &[ScriptKey]) -> Result<Arc<Policy>, PolicyError> {
    if required == 0 || required > keys.len() {
        return Err(PolicyError::InvalidThreshold {
            required,
            available: keys.len(),
        });
    }
    let subs: Vec<Arc<Policy>> = keys.iter().copied().map(pk).collect();
    let th = Threshold::new(required, subs).map_err(|_| PolicyError::InvalidThreshold {
        required,
        available: keys.len(),
    })?;
    Ok(Arc::new(Concrete::Thresh(th)))
}

fn older(lock: &VaultTimelock, role: KeyRole) -> Result<Arc<Policy>, PolicyError> {
    let seq = lock.as_sequence().ok_or(PolicyError::WrongTimelockKind {
        role,
        expected: "relative",
    })?;
    let rel = RelLockTime::from_consensus(seq.to_consensus_u32())
        .map_err(|e| PolicyError::LockEncoding(e.to_string()))?;
    Ok(Arc::new(Concrete::Older(rel)))
}

fn after(lock: &VaultTimelock, role: KeyRole) -> Result<Arc<Policy>, PolicyError> {
    let height = lock.as_height().ok_or(PolicyError::WrongTimelockKind {
        role,
        expected: "absolute",
    })?;
    let abs = AbsLockTime::from_consensus(height)
        .map_err(|e| PolicyError::LockEncoding(e.to_string()))?;
    Ok(Arc::new(Concrete::After(abs)))
}

fn role_key(keys: &ResolvedKeys, role: KeyRole) -> Result<ScriptKey, PolicyError> {
    keys.role(role).ok_or(PolicyError::MissingRole(role))
}

fn role_lock<'a>(
    cfg: &'a VaultConfiguration,
    role: KeyRole,
) -> Result<&'a VaultTimelock, PolicyError> {
    cfg.timelocks
        .get(&role)
        .ok_or(PolicyError::MissingTimelock(role))
}

/// Sort keys lexicographically by serialized bytes (BIP-67 style) so the
/// quorum order is deterministic across runs and implementations.
pub fn sort_bip67(keys: &mut [ScriptKey]) {
    keys.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
}

/// Render the canonical policy string: concrete hex keys at the leaves and
/// no or-branch weights. This form is byte-stable across library versions
/// and is what the analyzer parses back.
pub fn policy_string(policy: &Policy) -> String {
    match policy {
        Concrete::Key(key) => format!("pk({key})"),
        Concrete::After(t) => format!("after({})", t.to_consensus_u32()),
        Concrete::Older(t) => format!("older({})", t.to_consensus_u32()),
        Concrete::Sha256(hash) => format!("sha256({hash})"),
        Concrete::And(subs) => {
            let inner: Vec<String> = subs.iter().map(|s| policy_string(s)).collect();
            format!("and({})", inner.join(","))
        }
        Concrete::Or(subs) => {
            let inner: Vec<String> = subs.iter().map(|(_, s)| policy_string(s)).collect();
            format!("or({})", inner.join(","))
        }
        Concrete::Thresh(th) => {
            let mut parts = vec![th.k().to_string()];
            parts.extend(th.iter().map(|s| policy_string(s)));
            format!("thresh({})", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// Wrap the furthest heir-tier branch with the configured gates.
fn apply_gates(
    branch: Arc<Policy>,
    cfg: &VaultConfiguration,
    keys: &ResolvedKeys,
    warnings: &mut Vec<String>,
) -> Result<Arc<Policy>, PolicyError> {
    let mut wrapped = branch;
    if cfg.has_gate(Gate::Oracle) {
        let oracle = role_key(keys, KeyRole::Oracle)?;
        wrapped = and(pk(oracle), wrapped);
    }
    if cfg.has_gate(Gate::Challenge) {
        match cfg.challenge_hash {
            Some(hash) => wrapped = and(Arc::new(Concrete::Sha256(hash)), wrapped),
            None => warnings
                .push("challenge gate configured without a hash; gate skipped".to_string()),
        }
    }
    Ok(wrapped)
}

/// Build the policy for a resolved configuration.
pub fn build_policy(
    cfg: &VaultConfiguration,
    keys: &ResolvedKeys,
) -> Result<PolicyBundle, PolicyError> {
    let mut warnings = Vec::new();
    let owner = role_key(keys, KeyRole::Owner)?;

    let policy = if cfg.decay.is_some() {
        decay_policy(cfg, keys, owner, &mut warnings)?
    } else {
        match cfg.profile {
            VaultProfile::Solo => solo_policy(cfg, keys, owner, &mut warnings)?,
            VaultProfile::DeadManSwitch => {
                let heir = role_key(keys, KeyRole::Heir)?;
                let branch = and(pk(heir), older(role_lock(cfg, KeyRole::Heir)?, KeyRole::Heir)?);
                let gated = apply_gates(branch, cfg, keys, &mut warnings)?;
                or(pk(owner), gated)
            }
            VaultProfile::Spouse => {
                let spouse = role_key(keys, KeyRole::Spouse)?;
                let heir = role_key(keys, KeyRole::Heir)?;
                let near = and(
                    pk(spouse),
                    older(role_lock(cfg, KeyRole::Spouse)?, KeyRole::Spouse)?,
                );
                let far = and(pk(heir), older(role_lock(cfg, KeyRole::Heir)?, KeyRole::Heir)?);
                let far = apply_gates(far, cfg, keys, &mut warnings)?;
                or(pk(owner), or(near, far))
            }
            VaultProfile::Family => {
                let recovery = role_key(keys, KeyRole::Recovery)?;
                let mut heir_keys: Vec<ScriptKey> =
                    keys.heirs.iter().map(|(_, k)| *k).collect();
                if heir_keys.len() < 2 {
                    return Err(PolicyError::InsufficientKeys {
                        needed: 2,
                        have: heir_keys.len(),
                    });
                }
                sort_bip67(&mut heir_keys);
                let near = and(
                    pk(recovery),
                    older(role_lock(cfg, KeyRole::Recovery)?, KeyRole::Recovery)?,
                );
                let far = and(
                    thresh(2, &heir_keys)?,
                    older(role_lock(cfg, KeyRole::Heir)?, KeyRole::Heir)?,
                );
                let far = apply_gates(far, cfg, keys, &mut warnings)?;
                or(pk(owner), or(near, far))
            }
            VaultProfile::Business => {
                let partner = role_key(keys, KeyRole::Partner)?;
                let trustee = role_key(keys, KeyRole::Trustee)?;
                let joint = and(pk(owner), pk(partner));
                let solo = and(pk(owner), older(role_lock(cfg, KeyRole::Owner)?, KeyRole::Owner)?);
                let far = and(
                    pk(trustee),
                    older(role_lock(cfg, KeyRole::Trustee)?, KeyRole::Trustee)?,
                );
                let far = apply_gates(far, cfg, keys, &mut warnings)?;
                or(joint, or(solo, far))
            }
        }
    };

    Ok(PolicyBundle {
        policy: Arc::try_unwrap(policy).unwrap_or_else(|arc| (*arc).clone()),
        warnings,
    })
}

/// Solo is either the relative-recovery shape or, when the configuration
/// carries an absolute heir lock, the pure CLTV timelock vault that legacy
/// configurations migrate into.
fn solo_policy(
    cfg: &VaultConfiguration,
    keys: &ResolvedKeys,
    owner: ScriptKey,
    warnings: &mut Vec<String>,
) -> Result<Arc<Policy>, PolicyError> {
    if let (Some(heir), Some(lock @ VaultTimelock::Absolute(_))) =
        (keys.role(KeyRole::Heir), cfg.timelocks.get(&KeyRole::Heir))
    {
        let branch = and(pk(heir), after(lock, KeyRole::Heir)?);
        let gated = apply_gates(branch, cfg, keys, warnings)?;
        return Ok(or(pk(owner), gated));
    }
    let recovery = role_key(keys, KeyRole::Recovery)?;
    let branch = and(
        pk(recovery),
        older(role_lock(cfg, KeyRole::Recovery)?, KeyRole::Recovery)?,
    );
    // Recovery is a short-horizon branch, never gated.
    Ok(or(pk(owner), branch))
}

/// Decaying multisig: a present quorum including the owner, and a reduced
/// heirs-only quorum after the decay height. The owner key never appears in
/// the decayed quorum.
fn decay_policy(
    cfg: &VaultConfiguration,
    keys: &ResolvedKeys,
    owner: ScriptKey,
    warnings: &mut Vec<String>,
) -> Result<Arc<Policy>, PolicyError> {
    let quorum = cfg.decay.as_ref().ok_or(PolicyError::MissingDecay)?;
    let mut heir_keys: Vec<ScriptKey> = keys.heirs.iter().map(|(_, k)| *k).collect();
    if heir_keys.is_empty() {
        return Err(PolicyError::InsufficientKeys { needed: 1, have: 0 });
    }
    sort_bip67(&mut heir_keys);

    let mut before_keys = heir_keys.clone();
    before_keys.push(owner);
    sort_bip67(&mut before_keys);

    let before = thresh(quorum.threshold_before, &before_keys)?;
    let lock = role_lock(cfg, KeyRole::Heir)?;
    let decayed = and(
        thresh(quorum.threshold_after, &heir_keys)?,
        after(lock, KeyRole::Heir)?,
    );
    let decayed = apply_gates(decayed, cfg, keys, warnings)?;
    Ok(or(before, decayed))
}

/// The role whose timelock defines the furthest heir tier, per profile.
pub fn furthest_tier_role(profile: VaultProfile) -> KeyRole {
    match profile {
        VaultProfile::Business => KeyRole::Trustee,
        VaultProfile::Solo => KeyRole::Recovery,
        _ => KeyRole::Heir,
    }
}

/// Expand a staggered configuration into one policy per stage. Stages share
/// keys and gates; each stage's furthest lock is base + offset and each
/// carries its own percentage. Funding each stage as an independent UTXO is
/// the caller's responsibility.
pub fn stage_policies(
    cfg: &VaultConfiguration,
    keys: &ResolvedKeys,
) -> Result<Vec<StagePolicy>, PolicyError> {
    let mut stages = Vec::new();
    for (staged_cfg, percentage) in staged_configurations(cfg)? {
        let role = staged_role(&staged_cfg);
        let lock = *role_lock(&staged_cfg, role)?;
        let bundle = build_policy(&staged_cfg, keys)?;
        stages.push(StagePolicy {
            policy: bundle.policy,
            percentage,
            lock,
        });
    }
    Ok(stages)
}

/// Expand a configuration into per-stage configurations with their
/// percentage shares. A non-staggered configuration yields itself at 100%.
pub fn staged_configurations(
    cfg: &VaultConfiguration,
) -> Result<Vec<(VaultConfiguration, u8)>, PolicyError> {
    if !cfg.has_modifier(Modifier::Staggered) || cfg.stages.is_empty() {
        return Ok(vec![(cfg.clone(), 100)]);
    }
    let role = staged_role(cfg);
    let base = *role_lock(cfg, role)?;
    let mut out = Vec::with_capacity(cfg.stages.len());
    for stage in &cfg.stages {
        let lock = offset_lock(&base, stage.offset_blocks)?;
        let mut staged_cfg = cfg.clone();
        staged_cfg.timelocks.insert(role, lock);
        // Each stage is an ordinary single-lock configuration of its own.
        staged_cfg.stages.clear();
        staged_cfg.modifiers.retain(|m| *m != Modifier::Staggered);
        out.push((staged_cfg, stage.percentage));
    }
    Ok(out)
}

fn staged_role(cfg: &VaultConfiguration) -> KeyRole {
    if cfg.decay.is_some() {
        KeyRole::Heir
    } else if cfg.profile == VaultProfile::Solo
        && matches!(cfg.timelocks.get(&KeyRole::Heir), Some(VaultTimelock::Absolute(_)))
    {
        KeyRole::Heir
    } else {
        furthest_tier_role(cfg.profile)
    }
}

fn offset_lock(base: &VaultTimelock, offset_blocks: u32) -> Result<VaultTimelock, PolicyError> {
    match base {
        VaultTimelock::Absolute(height) => {
            let lock = VaultTimelock::Absolute(height.saturating_add(offset_blocks));
            lock.validate()?;
            Ok(lock)
        }
        VaultTimelock::Relative(value) => {
            if value & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
                return Err(PolicyError::Unsupported(
                    "staggered stages require block-mode relative locks".to_string(),
                ));
            }
            let blocks = (value & SEQUENCE_LOCKTIME_MASK) + offset_blocks;
            if blocks > SEQUENCE_LOCKTIME_MASK {
                return Err(PolicyError::Lock(TimelockError::Bip68OutOfRange(blocks)));
            }
            Ok(VaultTimelock::Relative(blocks))
        }
    }
}

/// What a policy string contains, for display and for compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Timelock,
    DeadManSwitch,
    Multisig,
    Hybrid,
    Simple,
}

#[derive(Debug, Clone)]
pub struct PolicyAnalysis {
    pub kind: PolicyKind,
    pub keys: Vec<ScriptKey>,
    pub absolute_locks: Vec<u32>,
    pub relative_locks: Vec<u32>,
    pub has_challenge: bool,
    pub has_oracle: bool,
}

/// Parse and classify a policy string.
pub fn analyze(policy_str: &str) -> Result<PolicyAnalysis, PolicyError> {
    let policy =
        Policy::from_str(policy_str).map_err(|e| PolicyError::Parse(e.to_string()))?;

    let mut analysis = PolicyAnalysis {
        kind: PolicyKind::Simple,
        keys: Vec::new(),
        absolute_locks: Vec::new(),
        relative_locks: Vec::new(),
        has_challenge: false,
        has_oracle: false,
    };
    let mut has_thresh = false;
    walk(&policy, &mut analysis, &mut has_thresh);

    analysis.kind = if has_thresh {
        PolicyKind::Multisig
    } else if !analysis.absolute_locks.is_empty() && !analysis.relative_locks.is_empty() {
        PolicyKind::Hybrid
    } else if !analysis.absolute_locks.is_empty() {
        PolicyKind::Timelock
    } else if !analysis.relative_locks.is_empty() {
        PolicyKind::DeadManSwitch
    } else {
        PolicyKind::Simple
    };
    Ok(analysis)
}

fn walk(policy: &Policy, analysis: &mut PolicyAnalysis, has_thresh: &mut bool) {
    match policy {
        Concrete::Key(key) => {
            if !analysis.keys.contains(key) {
                analysis.keys.push(*key);
            }
        }
        Concrete::After(t) => analysis.absolute_locks.push(t.to_consensus_u32()),
        Concrete::Older(t) => analysis.relative_locks.push(t.to_consensus_u32()),
        Concrete::Sha256(_) => analysis.has_challenge = true,
        Concrete::And(subs) => {
            // An and-group joining a timelock with two or more distinct keys
            // is the oracle co-sign shape.
            let mut keys = 0usize;
            let mut locks = 0usize;
            flatten_and(policy, &mut keys, &mut locks);
            if keys >= 2 && locks >= 1 {
                analysis.has_oracle = true;
            }
            for sub in subs {
                walk(sub, analysis, has_thresh);
            }
        }
        Concrete::Or(pairs) => {
            for (_, sub) in pairs {
                walk(sub, analysis, has_thresh);
            }
        }
        Concrete::Thresh(th) => {
            *has_thresh = true;
            for sub in th.iter() {
                walk(sub, analysis, has_thresh);
            }
        }
        _ => {}
    }
}

fn flatten_and(policy: &Policy, keys: &mut usize, locks: &mut usize) {
    match policy {
        Concrete::And(subs) => {
            for sub in subs {
                flatten_and(sub, keys, locks);
            }
        }
        Concrete::Key(_) => *keys += 1,
        Concrete::After(_) | Concrete::Older(_) => *locks += 1,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecayQuorum, StaggerStage};
    use bitcoin::hashes::{sha256, Hash};

    fn key(prefix: u8, fill: u8) -> String {
        format!("{:02x}{}", prefix, hex::encode([fill; 32]))
    }

    fn resolved(cfg: &VaultConfiguration) -> ResolvedKeys {
        cfg.resolve_keys().unwrap()
    }

    #[test]
    fn test_dms_policy_shape() {
        let cfg = VaultConfiguration::dead_man_switch(key(2, 0xaa), key(3, 0xbb), 90).unwrap();
        let bundle = build_policy(&cfg, &resolved(&cfg)).unwrap();
        let s = policy_string(&bundle.policy);
        assert!(s.starts_with(&format!("or(pk({})", key(2, 0xaa))));
        assert!(s.contains("older(12960)"));
        assert!(!s.contains("after("));
    }

    #[test]
    fn test_timelock_policy_shape() {
        let cfg = VaultConfiguration::timelock_vault(key(2, 0xaa), key(3, 0xbb), 900_000);
        let bundle = build_policy(&cfg, &resolved(&cfg)).unwrap();
        let s = policy_string(&bundle.policy);
        assert!(s.contains("after(900000)"));
        assert!(!s.contains("older("));
    }

    #[test]
    fn test_spouse_policy_shape() {
        let cfg = VaultConfiguration::new(VaultProfile::Spouse)
            .with_key(KeyRole::Owner, key(2, 0xaa))
            .with_key(KeyRole::Spouse, key(2, 0xcc))
            .with_key(KeyRole::Heir, key(3, 0xbb))
            .with_timelock(KeyRole::Spouse, VaultTimelock::Relative(4320))
            .with_timelock(KeyRole::Heir, VaultTimelock::Relative(12_960));
        let bundle = build_policy(&cfg, &resolved(&cfg)).unwrap();
        let s = policy_string(&bundle.policy);
        assert!(s.contains("older(4320)"));
        assert!(s.contains("older(12960)"));
    }

    #[test]
    fn test_gates_wrap_only_heir_branch() {
        let hash = sha256::Hash::hash(b"family recipe");
        let mut cfg =
            VaultConfiguration::dead_man_switch(key(2, 0xaa), key(3, 0xbb), 90).unwrap();
        cfg.gates = vec![Gate::Challenge, Gate::Oracle];
        cfg.challenge_hash = Some(hash);
        cfg.keys.insert(KeyRole::Oracle, key(2, 0xdd));

        let bundle = build_policy(&cfg, &resolved(&cfg)).unwrap();
        let s = policy_string(&bundle.policy);

        // The owner subexpression stays a bare pk(owner).
        assert!(s.starts_with(&format!("or(pk({}),", key(2, 0xaa))));
        // Challenge wraps the heir branch, oracle co-signs inside it.
        assert!(s.contains(&format!("sha256({})", hash)));
        assert!(s.contains(&format!("pk({})", key(2, 0xdd))));
        let owner_prefix = format!("or(pk({}),and(sha256(", key(2, 0xaa));
        assert!(s.starts_with(&owner_prefix), "unexpected policy: {}", s);
    }

    #[test]
    fn test_challenge_without_hash_warns_and_skips() {
        let mut cfg =
            VaultConfiguration::dead_man_switch(key(2, 0xaa), key(3, 0xbb), 90).unwrap();
        cfg.gates = vec![Gate::Challenge];

        let bundle = build_policy(&cfg, &resolved(&cfg)).unwrap();
        assert_eq!(bundle.warnings.len(), 1);
        assert!(!policy_string(&bundle.policy).contains("sha256"));
    }

    #[test]
    fn test_decay_policy_excludes_owner_from_decayed_quorum() {
        let owner = key(2, 0xaa);
        let mut cfg = VaultConfiguration::new(VaultProfile::Family)
            .with_key(KeyRole::Owner, owner.clone())
            .with_heir("Alice", 50, key(2, 0xcc))
            .with_heir("Bob", 50, key(3, 0xee))
            .with_timelock(KeyRole::Heir, VaultTimelock::Absolute(900_000));
        cfg.decay = Some(DecayQuorum {
            threshold_before: 2,
            threshold_after: 1,
        });

        let bundle = build_policy(&cfg, &resolved(&cfg)).unwrap();
        let s = policy_string(&bundle.policy);

        // The owner key appears exactly once: in the pre-decay quorum.
        assert_eq!(s.matches(&owner).count(), 1);
        assert!(s.contains("thresh(2"));
        assert!(s.contains("thresh(1"));
        assert!(s.contains("after(900000)"));
    }

    #[test]
    fn test_family_requires_two_heirs() {
        let cfg = VaultConfiguration::new(VaultProfile::Family)
            .with_key(KeyRole::Owner, key(2, 0xaa))
            .with_key(KeyRole::Recovery, key(2, 0xcc))
            .with_heir("Only", 100, key(3, 0xbb))
            .with_timelock(KeyRole::Recovery, VaultTimelock::Relative(4320))
            .with_timelock(KeyRole::Heir, VaultTimelock::Relative(12_960));
        assert!(matches!(
            build_policy(&cfg, &resolved(&cfg)),
            Err(PolicyError::InsufficientKeys { needed: 2, have: 1 })
        ));
    }

    #[test]
    fn test_staggered_stages() {
        let mut cfg =
            VaultConfiguration::dead_man_switch(key(2, 0xaa), key(3, 0xbb), 90).unwrap();
        cfg.modifiers = vec![Modifier::Staggered];
        cfg.stages = vec![
            StaggerStage { percentage: 50, offset_blocks: 0 },
            StaggerStage { percentage: 50, offset_blocks: 4320 },
        ];

        let stages = stage_policies(&cfg, &resolved(&cfg)).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].lock, VaultTimelock::Relative(12_960));
        assert_eq!(stages[1].lock, VaultTimelock::Relative(17_280));
        assert!(policy_string(&stages[1].policy).contains("older(17280)"));
    }

    #[test]
    fn test_stage_offset_overflow_rejected() {
        let mut cfg =
            VaultConfiguration::dead_man_switch(key(2, 0xaa), key(3, 0xbb), 400).unwrap();
        cfg.modifiers = vec![Modifier::Staggered];
        cfg.stages = vec![StaggerStage { percentage: 100, offset_blocks: 20_000 }];
        assert!(stage_policies(&cfg, &resolved(&cfg)).is_err());
    }

    #[test]
    fn test_analyze_timelock_policy() {
        let x = key(2, 0xaa);
        let y = key(2, 0xcc);
        let s = format!("or(pk({}),and(pk({}),after(900000)))", x, y);
        let analysis = analyze(&s).unwrap();

        assert_eq!(analysis.kind, PolicyKind::Timelock);
        assert_eq!(analysis.keys.len(), 2);
        assert_eq!(analysis.absolute_locks, vec![900_000]);
        assert!(analysis.relative_locks.is_empty());
        assert!(!analysis.has_challenge);
        assert!(!analysis.has_oracle);
    }

    #[test]
    fn test_analyze_detects_oracle_and_challenge() {
        let hash = sha256::Hash::hash(b"secret");
        let s = format!(
            "or(pk({}),and(sha256({}),and(pk({}),and(pk({}),older(12960)))))",
            key(2, 0xaa),
            hash,
            key(2, 0xdd),
            key(3, 0xbb),
        );
        let analysis = analyze(&s).unwrap();
        assert!(analysis.has_challenge);
        assert!(analysis.has_oracle);
        assert_eq!(analysis.kind, PolicyKind::DeadManSwitch);
    }

    #[test]
    fn test_analyze_multisig_kind() {
        let s = format!(
            "or(thresh(2,pk({}),pk({}),pk({})),and(thresh(1,pk({}),pk({})),after(900000)))",
            key(2, 0xaa),
            key(2, 0xcc),
            key(3, 0xee),
            key(2, 0xcc),
            key(3, 0xee),
        );
        let analysis = analyze(&s).unwrap();
        assert_eq!(analysis.kind, PolicyKind::Multisig);
    }
}
