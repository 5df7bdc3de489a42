//! Compatibility validation
//!
//! Rejects incoherent infrastructure / profile / modifier combinations
//! before any script is produced. Validation never mutates its input and
//! never fails: it returns a structured verdict, and a configuration is
//! valid iff the error list is empty.

use crate::config::{
    Gate, KeyRole, Modifier, VaultConfiguration, VaultProfile, VaultTimelock,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage/transport options a vault setup can rely on. `Local` is
/// implicitly always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Infrastructure {
    Local,
    MicroSd,
    Shamir,
    Nostr,
    Ipfs,
    MultisigConfig,
}

/// One rule violation or caution, with a stable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub code: String,
    pub message: String,
}

impl Finding {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The validator's verdict. Never a hard error; callers branch on
/// [`Verdict::is_valid`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub recommendations: Vec<String>,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_codes(&self) -> Vec<&str> {
        self.errors.iter().map(|f| f.code.as_str()).collect()
    }

    fn error(&mut self, code: &'static str, message: impl Into<String>) {
        self.errors.push(Finding::new(code, message));
    }

    fn warn(&mut self, code: &'static str, message: impl Into<String>) {
        self.warnings.push(Finding::new(code, message));
    }

    fn recommend(&mut self, message: impl Into<String>) {
        self.recommendations.push(message.into());
    }

    fn merge(&mut self, other: Verdict) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.recommendations.extend(other.recommendations);
    }
}

fn has(infra: &[Infrastructure], wanted: Infrastructure) -> bool {
    wanted == Infrastructure::Local || infra.contains(&wanted)
}

/// Validate a configuration together with the infrastructure it will rely
/// on. This is the full pre-creation check.
pub fn validate(cfg: &VaultConfiguration, infra: &[Infrastructure]) -> Verdict {
    let mut verdict = validate_configuration(cfg);

    // Infrastructure conflicts and redundancies.
    if has(infra, Infrastructure::Shamir) && has(infra, Infrastructure::MultisigConfig) {
        verdict.error(
            "INFRA_CONFLICT",
            "shamir share splitting conflicts with a distributed multisig configuration",
        );
    }
    if has(infra, Infrastructure::Nostr) && has(infra, Infrastructure::Ipfs) {
        verdict.warn(
            "INFRA_REDUNDANT",
            "nostr and ipfs both provide offsite blob storage; one is enough",
        );
    }

    // Logic requirements.
    if cfg.decay.is_some() && !has(infra, Infrastructure::MultisigConfig) {
        verdict.error(
            "LOGIC_REQUIRES_MULTISIG_CONFIG",
            "a decaying multisig vault requires the multisig_config infrastructure",
        );
    }
    if cfg.has_gate(Gate::Oracle)
        && !has(infra, Infrastructure::Nostr)
        && !has(infra, Infrastructure::Ipfs)
    {
        verdict.error(
            "GATE_REQUIRES_RELAY",
            "the oracle gate requires nostr or ipfs so the oracle can reach its key material",
        );
    }

    // Modifier constraints.
    if cfg.has_modifier(Modifier::Decoy) && has(infra, Infrastructure::MultisigConfig) {
        verdict.error(
            "MODIFIER_CONFLICT",
            "a decoy vault cannot coexist with a shared multisig configuration",
        );
    }

    // Recommendations.
    if !has(infra, Infrastructure::MicroSd)
        && !has(infra, Infrastructure::Nostr)
        && !has(infra, Infrastructure::Ipfs)
    {
        verdict.recommend(
            "only local storage is configured; add a microsd or offsite backup so heirs \
             can recover the vault descriptor",
        );
    }
    if cfg.has_gate(Gate::Challenge) {
        verdict.recommend(
            "store the challenge preimage with the heir documentation, outside the vault device",
        );
    }

    verdict
}

/// The configuration-coherence subset, used by the orchestrator before any
/// script is produced.
pub fn validate_configuration(cfg: &VaultConfiguration) -> Verdict {
    let mut verdict = Verdict::default();

    if !cfg.keys.contains_key(&KeyRole::Owner) {
        verdict.error("MISSING_OWNER", "every profile requires an owner key");
    }

    // A decaying vault is satisfied by the owner plus the heir roster; the
    // profile's usual role keys are not part of its script.
    if cfg.decay.is_none() {
        for role in cfg.profile.required_roles() {
            // Owner is reported once, above.
            if *role == KeyRole::Owner {
                continue;
            }
            if !cfg.keys.contains_key(role) {
                verdict.error(
                    "MISSING_ROLE_KEY",
                    format!("profile {} requires a {} key", cfg.profile, role),
                );
            }
        }
    }
    // Solo accepts either a recovery key (CSV shape) or an heir key with an
    // absolute lock (legacy CLTV shape).
    if cfg.profile == VaultProfile::Solo
        && !cfg.keys.contains_key(&KeyRole::Recovery)
        && !cfg.keys.contains_key(&KeyRole::Heir)
    {
        verdict.error(
            "MISSING_ROLE_KEY",
            "solo profile requires a recovery key or an heir key with an absolute lock",
        );
    }

    // Key material must normalize.
    if let Err(e) = cfg.resolve_keys() {
        verdict.error("INVALID_KEY", e.to_string());
    }

    // Timelock presence, range and kind.
    verdict.merge(check_timelocks(cfg));

    // Beneficiary percentages.
    let sum: u32 = cfg.heirs.iter().map(|h| h.percentage as u32).sum();
    if sum > 100 {
        verdict.error(
            "PERCENT_SUM",
            format!("beneficiary percentages sum to {}%, above 100%", sum),
        );
    }
    if cfg.heirs.iter().any(|h| h.percentage == 0) {
        verdict.error("PERCENT_SUM", "beneficiary percentages must be at least 1");
    }

    if cfg.profile == VaultProfile::Family && cfg.decay.is_none() && cfg.heirs.len() < 2 {
        verdict.error(
            "HEIR_COUNT",
            "the family profile needs at least two heirs for its 2-of-N quorum",
        );
    }
    if cfg.has_modifier(Modifier::MultiBeneficiary) && cfg.heirs.len() < 2 {
        verdict.error(
            "HEIR_COUNT",
            "the multi-beneficiary modifier needs at least two beneficiaries",
        );
    }

    // Decay coherence.
    if let Some(quorum) = &cfg.decay {
        let heirs = cfg.heirs.len();
        if heirs == 0 {
            verdict.error("HEIR_COUNT", "a decaying vault needs at least one heir");
        }
        if quorum.threshold_after == 0 || quorum.threshold_after > heirs {
            verdict.error(
                "DECAY_THRESHOLD",
                format!(
                    "decayed threshold {} of {} heirs is unsatisfiable",
                    quorum.threshold_after, heirs
                ),
            );
        }
        if quorum.threshold_before == 0 || quorum.threshold_before > heirs + 1 {
            verdict.error(
                "DECAY_THRESHOLD",
                format!(
                    "pre-decay threshold {} of {} keys is unsatisfiable",
                    quorum.threshold_before,
                    heirs + 1
                ),
            );
        }
        if let Some(owner_key) = cfg.keys.get(&KeyRole::Owner) {
            if cfg.heirs.iter().any(|h| &h.key == owner_key) {
                verdict.error(
                    "DECAY_OWNER",
                    "the owner key must not appear among the heirs of a decaying vault",
                );
            }
        }
    }

    // Gates.
    if cfg.has_gate(Gate::Challenge) && cfg.challenge_hash.is_none() {
        verdict.warn(
            "CHALLENGE_HASH",
            "challenge gate configured without a hash; the gate will be skipped",
        );
    }
    if cfg.has_gate(Gate::Oracle) && !cfg.keys.contains_key(&KeyRole::Oracle) {
        verdict.error("MISSING_ROLE_KEY", "the oracle gate requires an oracle key");
    }

    // Stages.
    if cfg.has_modifier(Modifier::Staggered) {
        if cfg.stages.is_empty() {
            verdict.error("STAGE_PERCENT", "staggered modifier without stages");
        }
        let stage_sum: u32 = cfg.stages.iter().map(|s| s.percentage as u32).sum();
        if stage_sum > 100 || cfg.stages.iter().any(|s| s.percentage == 0) {
            verdict.error(
                "STAGE_PERCENT",
                format!("stage percentages sum to {}%, outside 1..=100", stage_sum),
            );
        }
    } else if !cfg.stages.is_empty() {
        verdict.warn(
            "STAGE_PERCENT",
            "stages configured without the staggered modifier; they will be ignored",
        );
    }

    verdict
}

fn check_timelocks(cfg: &VaultConfiguration) -> Verdict {
    let mut verdict = Verdict::default();

    for (role, lock) in &cfg.timelocks {
        if let Err(e) = lock.validate() {
            verdict.error("TIMELOCK_RANGE", format!("{} timelock: {}", role, e));
        }
    }

    let relative_blocks = |role: KeyRole| -> Option<u32> {
        match cfg.timelocks.get(&role) {
            Some(VaultTimelock::Relative(v)) => Some(v & crate::timelock::SEQUENCE_LOCKTIME_MASK),
            _ => None,
        }
    };

    match cfg.profile {
        VaultProfile::DeadManSwitch => {
            if !matches!(
                cfg.timelocks.get(&KeyRole::Heir),
                Some(VaultTimelock::Relative(_))
            ) {
                verdict.error(
                    "MISSING_TIMELOCK",
                    "a dead-man-switch vault needs a relative heir timelock",
                );
            }
        }
        VaultProfile::Spouse => {
            match (relative_blocks(KeyRole::Spouse), relative_blocks(KeyRole::Heir)) {
                (Some(s), Some(h)) => {
                    if s >= h {
                        verdict.error(
                            "TIER_ORDER",
                            format!("spouse lock ({s} blocks) must be shorter than heir lock ({h})"),
                        );
                    }
                }
                _ => verdict.error(
                    "MISSING_TIMELOCK",
                    "a spouse vault needs relative spouse and heir timelocks",
                ),
            }
        }
        VaultProfile::Family if cfg.decay.is_none() => {
            match (relative_blocks(KeyRole::Recovery), relative_blocks(KeyRole::Heir)) {
                (Some(s), Some(h)) => {
                    if s >= h {
                        verdict.error(
                            "TIER_ORDER",
                            format!(
                                "recovery lock ({s} blocks) must be shorter than heir lock ({h})"
                            ),
                        );
                    }
                }
                _ => verdict.error(
                    "MISSING_TIMELOCK",
                    "a family vault needs relative recovery and heir timelocks",
                ),
            }
        }
        VaultProfile::Business => {
            match (relative_blocks(KeyRole::Owner), relative_blocks(KeyRole::Trustee)) {
                (Some(s), Some(h)) => {
                    if s >= h {
                        verdict.error(
                            "TIER_ORDER",
                            format!(
                                "owner-solo lock ({s} blocks) must be shorter than trustee lock ({h})"
                            ),
                        );
                    }
                }
                _ => verdict.error(
                    "MISSING_TIMELOCK",
                    "a business vault needs relative owner-solo and trustee timelocks",
                ),
            }
        }
        VaultProfile::Solo if cfg.decay.is_none() => {
            let has_recovery = matches!(
                cfg.timelocks.get(&KeyRole::Recovery),
                Some(VaultTimelock::Relative(_))
            );
            let has_legacy = matches!(
                cfg.timelocks.get(&KeyRole::Heir),
                Some(VaultTimelock::Absolute(_))
            );
            if !has_recovery && !has_legacy {
                verdict.error(
                    "MISSING_TIMELOCK",
                    "a solo vault needs a relative recovery lock or an absolute heir lock",
                );
            }
        }
        _ => {}
    }

    if cfg.decay.is_some()
        && !matches!(
            cfg.timelocks.get(&KeyRole::Heir),
            Some(VaultTimelock::Absolute(_))
        )
    {
        verdict.error(
            "MISSING_TIMELOCK",
            "a decaying vault needs an absolute heir timelock (the decay height)",
        );
    }

    verdict
}

/// A configuration in the legacy `primaryLogic` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyConfiguration {
    pub primary_logic: String,
    #[serde(default)]
    pub security_addons: Vec<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

/// The profile triple a legacy configuration migrates into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratedProfile {
    pub profile: VaultProfile,
    pub gates: Vec<Gate>,
    pub modifiers: Vec<Modifier>,
    /// The legacy multisig_decay logic keeps its decaying quorum.
    pub decays: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MigrationError {
    #[error("unrecognized inheritance logic '{0}'")]
    UnknownLogic(String),

    #[error("unrecognized security addon '{0}'")]
    UnknownGate(String),

    #[error("unrecognized modifier '{0}'")]
    UnknownModifier(String),
}

/// Convert a legacy configuration to the profile model, non-destructively.
/// Unrecognized values are hard errors: the engine accepts only the
/// enumerated shapes.
pub fn migrate_legacy(legacy: &LegacyConfiguration) -> Result<MigratedProfile, MigrationError> {
    let (profile, decays) = match legacy.primary_logic.as_str() {
        "timelock" => (VaultProfile::Solo, false),
        "deadmanswitch" | "dead_man_switch" => (VaultProfile::DeadManSwitch, false),
        "multisig_decay" => (VaultProfile::Family, true),
        "business" => (VaultProfile::Business, false),
        "spouse" => (VaultProfile::Spouse, false),
        "family" => (VaultProfile::Family, false),
        other => return Err(MigrationError::UnknownLogic(other.to_string())),
    };

    let mut gates = Vec::new();
    for addon in &legacy.security_addons {
        match addon.as_str() {
            "challenge" => gates.push(Gate::Challenge),
            "oracle" => gates.push(Gate::Oracle),
            other => return Err(MigrationError::UnknownGate(other.to_string())),
        }
    }

    let mut modifiers = Vec::new();
    for modifier in &legacy.modifiers {
        match modifier.as_str() {
            "staggered" => modifiers.push(Modifier::Staggered),
            "multi_beneficiary" => modifiers.push(Modifier::MultiBeneficiary),
            "decoy" => modifiers.push(Modifier::Decoy),
            other => return Err(MigrationError::UnknownModifier(other.to_string())),
        }
    }

    Ok(MigratedProfile {
        profile,
        gates,
        modifiers,
        decays,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecayQuorum;

    fn key(prefix: u8, fill: u8) -> String {
        format!("{:02x}{}", prefix, hex::encode([fill; 32]))
    }

    fn dms_cfg() -> VaultConfiguration {
        VaultConfiguration::dead_man_switch(key(2, 0xaa), key(3, 0xbb), 90).unwrap()
    }

    fn decay_cfg() -> VaultConfiguration {
        let mut cfg = VaultConfiguration::new(VaultProfile::Family)
            .with_key(KeyRole::Owner, key(2, 0xaa))
            .with_heir("Alice", 50, key(2, 0xcc))
            .with_heir("Bob", 50, key(3, 0xee))
            .with_timelock(KeyRole::Heir, VaultTimelock::Absolute(900_000));
        cfg.decay = Some(DecayQuorum {
            threshold_before: 2,
            threshold_after: 1,
        });
        cfg
    }

    #[test]
    fn test_valid_dms_config() {
        let verdict = validate(&dms_cfg(), &[]);
        assert!(verdict.is_valid(), "errors: {:?}", verdict.errors);
    }

    #[test]
    fn test_shamir_multisig_conflict() {
        let verdict = validate(
            &decay_cfg(),
            &[Infrastructure::Shamir, Infrastructure::MultisigConfig],
        );
        assert!(verdict.error_codes().contains(&"INFRA_CONFLICT"));
    }

    #[test]
    fn test_nostr_ipfs_redundancy_is_warning_only() {
        let verdict = validate(&dms_cfg(), &[Infrastructure::Nostr, Infrastructure::Ipfs]);
        assert!(verdict.is_valid());
        assert!(verdict.warnings.iter().any(|w| w.code == "INFRA_REDUNDANT"));
    }

    #[test]
    fn test_decay_requires_multisig_config() {
        let verdict = validate(&decay_cfg(), &[]);
        assert!(verdict
            .error_codes()
            .contains(&"LOGIC_REQUIRES_MULTISIG_CONFIG"));

        let verdict = validate(&decay_cfg(), &[Infrastructure::MultisigConfig]);
        assert!(verdict.is_valid(), "errors: {:?}", verdict.errors);
    }

    #[test]
    fn test_oracle_gate_requires_relay() {
        let mut cfg = dms_cfg();
        cfg.gates = vec![Gate::Oracle];
        cfg.keys.insert(KeyRole::Oracle, key(2, 0xdd));

        let verdict = validate(&cfg, &[]);
        assert!(verdict.error_codes().contains(&"GATE_REQUIRES_RELAY"));

        let verdict = validate(&cfg, &[Infrastructure::Nostr]);
        assert!(verdict.is_valid(), "errors: {:?}", verdict.errors);
    }

    #[test]
    fn test_decoy_conflicts_with_multisig_config() {
        let mut cfg = dms_cfg();
        cfg.modifiers = vec![Modifier::Decoy];
        let verdict = validate(&cfg, &[Infrastructure::MultisigConfig]);
        assert!(verdict.error_codes().contains(&"MODIFIER_CONFLICT"));
    }

    #[test]
    fn test_percentage_sum_enforced() {
        let mut cfg = dms_cfg();
        cfg.heirs.push(crate::config::Beneficiary {
            name: "A".into(),
            percentage: 60,
            key: key(2, 0xcc),
        });
        cfg.heirs.push(crate::config::Beneficiary {
            name: "B".into(),
            percentage: 50,
            key: key(3, 0xee),
        });
        let verdict = validate_configuration(&cfg);
        assert!(verdict.error_codes().contains(&"PERCENT_SUM"));
    }

    #[test]
    fn test_tier_order_enforced() {
        let cfg = VaultConfiguration::new(VaultProfile::Spouse)
            .with_key(KeyRole::Owner, key(2, 0xaa))
            .with_key(KeyRole::Spouse, key(2, 0xcc))
            .with_key(KeyRole::Heir, key(3, 0xbb))
            .with_timelock(KeyRole::Spouse, VaultTimelock::Relative(12_960))
            .with_timelock(KeyRole::Heir, VaultTimelock::Relative(4_320));
        let verdict = validate_configuration(&cfg);
        assert!(verdict.error_codes().contains(&"TIER_ORDER"));
    }

    #[test]
    fn test_owner_among_decay_heirs_rejected() {
        let mut cfg = decay_cfg();
        cfg.heirs[0].key = key(2, 0xaa); // same as owner
        let verdict = validate_configuration(&cfg);
        assert!(verdict.error_codes().contains(&"DECAY_OWNER"));
    }

    #[test]
    fn test_missing_owner() {
        let mut cfg = dms_cfg();
        cfg.keys.remove(&KeyRole::Owner);
        let verdict = validate_configuration(&cfg);
        assert!(verdict.error_codes().contains(&"MISSING_OWNER"));
    }

    #[test]
    fn test_challenge_without_hash_is_warning() {
        let mut cfg = dms_cfg();
        cfg.gates = vec![Gate::Challenge];
        let verdict = validate_configuration(&cfg);
        assert!(verdict.is_valid());
        assert!(verdict.warnings.iter().any(|w| w.code == "CHALLENGE_HASH"));
    }

    #[test]
    fn test_migrate_legacy_logics() {
        let migrated = migrate_legacy(&LegacyConfiguration {
            primary_logic: "multisig_decay".into(),
            security_addons: vec!["challenge".into()],
            modifiers: vec!["staggered".into()],
        })
        .unwrap();
        assert_eq!(migrated.profile, VaultProfile::Family);
        assert!(migrated.decays);
        assert_eq!(migrated.gates, vec![Gate::Challenge]);
        assert_eq!(migrated.modifiers, vec![Modifier::Staggered]);

        assert_eq!(
            migrate_legacy(&LegacyConfiguration {
                primary_logic: "timelock".into(),
                security_addons: vec![],
                modifiers: vec![],
            })
            .unwrap()
            .profile,
            VaultProfile::Solo
        );
    }

    #[test]
    fn test_migrate_unknown_values_hard_error() {
        assert_eq!(
            migrate_legacy(&LegacyConfiguration {
                primary_logic: "quantum_vault".into(),
                security_addons: vec![],
                modifiers: vec![],
            }),
            Err(MigrationError::UnknownLogic("quantum_vault".into()))
        );
        assert!(matches!(
            migrate_legacy(&LegacyConfiguration {
                primary_logic: "timelock".into(),
                security_addons: vec!["biometrics".into()],
                modifiers: vec![],
            }),
            Err(MigrationError::UnknownGate(_))
        ));
    }
}
