//! Vault configuration model
//!
//! The canonical shape a wizard produces: a profile, role-keyed key material
//! and timelocks, heir roster, optional gates and modifiers. A configuration
//! is validated once ([`crate::validate`]), then frozen; every derived
//! artifact (policy, script, address) is a pure function of it.

use crate::timelock::{self, TimelockError};
use bitcoin::hashes::sha256;
use bitcoin::Sequence;
use heirloom_keys::{KeyError, ScriptKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Roles a key can hold inside a vault script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    Owner,
    Recovery,
    Spouse,
    Heir,
    Partner,
    Trustee,
    Oracle,
    Backup,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyRole::Owner => "owner",
            KeyRole::Recovery => "recovery",
            KeyRole::Spouse => "spouse",
            KeyRole::Heir => "heir",
            KeyRole::Partner => "partner",
            KeyRole::Trustee => "trustee",
            KeyRole::Oracle => "oracle",
            KeyRole::Backup => "backup",
        };
        f.write_str(name)
    }
}

/// The five canonical vault profiles. Immutable once a vault exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultProfile {
    Solo,
    Spouse,
    Family,
    Business,
    DeadManSwitch,
}

impl VaultProfile {
    /// Roles whose keys must be present, beyond the always-mandatory owner.
    pub fn required_roles(&self) -> &'static [KeyRole] {
        match self {
            VaultProfile::Solo => &[KeyRole::Owner],
            VaultProfile::Spouse => &[KeyRole::Owner, KeyRole::Spouse, KeyRole::Heir],
            VaultProfile::Family => &[KeyRole::Owner, KeyRole::Recovery],
            VaultProfile::Business => &[KeyRole::Owner, KeyRole::Partner, KeyRole::Trustee],
            VaultProfile::DeadManSwitch => &[KeyRole::Owner, KeyRole::Heir],
        }
    }
}

impl fmt::Display for VaultProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VaultProfile::Solo => "solo",
            VaultProfile::Spouse => "spouse",
            VaultProfile::Family => "family",
            VaultProfile::Business => "business",
            VaultProfile::DeadManSwitch => "dead_man_switch",
        };
        f.write_str(name)
    }
}

/// Security gates, applied only to the furthest heir-tier branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    /// SHA-256 preimage the heir must reveal.
    Challenge,
    /// Additional oracle co-signature.
    Oracle,
}

/// Configuration modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    /// Release in stages, one independent UTXO per stage.
    Staggered,
    /// Split between several beneficiaries at funding time.
    MultiBeneficiary,
    /// Application-layer decoy vault; never reaches the script.
    Decoy,
}

/// One stage of a staggered release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaggerStage {
    /// Share of the total, 1..=100.
    pub percentage: u8,
    /// Blocks added to the base timelock for this stage.
    pub offset_blocks: u32,
}

/// A named beneficiary with a percentage share and key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub name: String,
    /// 1..=100; the sum over a vault must not exceed 100, the remainder is
    /// implicitly the owner's.
    pub percentage: u8,
    /// Hex compressed key or extended public key.
    pub key: String,
}

/// Quorum sizes for a decaying multisig vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayQuorum {
    /// Required signatures before the decay height (owner + heirs quorum).
    pub threshold_before: usize,
    /// Required signatures after the decay height (heirs only).
    pub threshold_after: usize,
}

/// A timelock value as stored in a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultTimelock {
    /// Absolute block height, enforced via CLTV.
    Absolute(u32),
    /// BIP-68 consensus encoding, enforced via CSV.
    Relative(u32),
}

impl VaultTimelock {
    pub fn relative_days(days: u32, allow_time_mode: bool) -> Result<Self, TimelockError> {
        Ok(VaultTimelock::Relative(
            timelock::days_to_csv(days, allow_time_mode)?.to_consensus_u32(),
        ))
    }

    pub fn validate(&self) -> Result<(), TimelockError> {
        match self {
            VaultTimelock::Absolute(height) => timelock::validate_cltv_height(*height),
            VaultTimelock::Relative(value) => timelock::validate_bip68(*value),
        }
    }

    pub fn as_sequence(&self) -> Option<Sequence> {
        match self {
            VaultTimelock::Relative(value) => Some(Sequence::from_consensus(*value)),
            VaultTimelock::Absolute(_) => None,
        }
    }

    pub fn as_height(&self) -> Option<u32> {
        match self {
            VaultTimelock::Absolute(height) => Some(*height),
            VaultTimelock::Relative(_) => None,
        }
    }
}

impl fmt::Display for VaultTimelock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultTimelock::Absolute(height) => write!(f, "block {}", height),
            VaultTimelock::Relative(value) => {
                f.write_str(&timelock::describe_sequence(Sequence::from_consensus(*value)))
            }
        }
    }
}

/// The full inheritance configuration for one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfiguration {
    pub profile: VaultProfile,
    #[serde(default)]
    pub gates: Vec<Gate>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Raw key material per role (hex compressed key or extended key).
    pub keys: BTreeMap<KeyRole, String>,
    /// Timelock per role; which roles carry one depends on the profile.
    pub timelocks: BTreeMap<KeyRole, VaultTimelock>,
    /// Heir roster for family / decaying / multi-beneficiary vaults.
    #[serde(default)]
    pub heirs: Vec<Beneficiary>,
    /// Present iff this vault decays to an heirs-only quorum.
    #[serde(default)]
    pub decay: Option<DecayQuorum>,
    /// Stages for the staggered modifier.
    #[serde(default)]
    pub stages: Vec<StaggerStage>,
    /// Hash the challenge gate commits to.
    #[serde(default)]
    pub challenge_hash: Option<sha256::Hash>,
}

/// Key material after normalization; what the policy builder and script
/// assembler actually consume.
#[derive(Debug, Clone)]
pub struct ResolvedKeys {
    pub roles: BTreeMap<KeyRole, ScriptKey>,
    /// (name, key) per heir, in roster order.
    pub heirs: Vec<(String, ScriptKey)>,
}

impl ResolvedKeys {
    pub fn role(&self, role: KeyRole) -> Option<ScriptKey> {
        self.roles.get(&role).copied()
    }
}

impl VaultConfiguration {
    pub fn new(profile: VaultProfile) -> Self {
        Self {
            profile,
            gates: Vec::new(),
            modifiers: Vec::new(),
            keys: BTreeMap::new(),
            timelocks: BTreeMap::new(),
            heirs: Vec::new(),
            decay: None,
            stages: Vec::new(),
            challenge_hash: None,
        }
    }

    pub fn with_key(mut self, role: KeyRole, key: impl Into<String>) -> Self {
        self.keys.insert(role, key.into());
        self
    }

    pub fn with_timelock(mut self, role: KeyRole, lock: VaultTimelock) -> Self {
        self.timelocks.insert(role, lock);
        self
    }

    pub fn with_heir(mut self, name: impl Into<String>, percentage: u8, key: impl Into<String>) -> Self {
        self.heirs.push(Beneficiary {
            name: name.into(),
            percentage,
            key: key.into(),
        });
        self
    }

    /// A dead-man-switch vault: owner always, heir after an inactivity window.
    pub fn dead_man_switch(
        owner: impl Into<String>,
        heir: impl Into<String>,
        inactivity_days: u32,
    ) -> Result<Self, TimelockError> {
        Ok(Self::new(VaultProfile::DeadManSwitch)
            .with_key(KeyRole::Owner, owner)
            .with_key(KeyRole::Heir, heir)
            .with_timelock(
                KeyRole::Heir,
                VaultTimelock::relative_days(inactivity_days, true)?,
            ))
    }

    /// A pure CLTV timelock vault: owner always, heir from a block height.
    /// This is the shape legacy `timelock` configurations migrate into.
    pub fn timelock_vault(
        owner: impl Into<String>,
        heir: impl Into<String>,
        unlock_height: u32,
    ) -> Self {
        Self::new(VaultProfile::Solo)
            .with_key(KeyRole::Owner, owner)
            .with_key(KeyRole::Heir, heir)
            .with_timelock(KeyRole::Heir, VaultTimelock::Absolute(unlock_height))
    }

    /// Normalize every configured key. Any malformed key is a hard error.
    pub fn resolve_keys(&self) -> Result<ResolvedKeys, KeyError> {
        let mut roles = BTreeMap::new();
        for (role, raw) in &self.keys {
            roles.insert(*role, heirloom_keys::normalize(raw)?);
        }
        let mut heirs = Vec::with_capacity(self.heirs.len());
        for heir in &self.heirs {
            heirs.push((heir.name.clone(), heirloom_keys::normalize(&heir.key)?));
        }
        Ok(ResolvedKeys { roles, heirs })
    }

    pub fn has_gate(&self, gate: Gate) -> bool {
        self.gates.contains(&gate)
    }

    pub fn has_modifier(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_hex() -> String {
        format!("02{}", "aa".repeat(32))
    }

    fn heir_hex() -> String {
        format!("03{}", "bb".repeat(32))
    }

    #[test]
    fn test_dead_man_switch_shape() {
        let cfg = VaultConfiguration::dead_man_switch(owner_hex(), heir_hex(), 90).unwrap();
        assert_eq!(cfg.profile, VaultProfile::DeadManSwitch);
        assert_eq!(
            cfg.timelocks[&KeyRole::Heir],
            VaultTimelock::Relative(12_960)
        );
    }

    #[test]
    fn test_resolve_keys() {
        let cfg = VaultConfiguration::dead_man_switch(owner_hex(), heir_hex(), 30).unwrap();
        let keys = cfg.resolve_keys().unwrap();
        assert_eq!(keys.role(KeyRole::Owner).unwrap().to_string(), owner_hex());
        assert_eq!(keys.role(KeyRole::Heir).unwrap().to_string(), heir_hex());
    }

    #[test]
    fn test_resolve_rejects_malformed_key() {
        let cfg = VaultConfiguration::dead_man_switch("04deadbeef".to_string(), heir_hex(), 30)
            .unwrap();
        assert!(cfg.resolve_keys().is_err());
    }

    #[test]
    fn test_timelock_validation() {
        VaultTimelock::Absolute(900_000).validate().unwrap();
        assert!(VaultTimelock::Absolute(0).validate().is_err());
        assert!(VaultTimelock::Absolute(600_000_000).validate().is_err());
        VaultTimelock::Relative(12_960).validate().unwrap();
        assert!(VaultTimelock::Relative(1 << 31).validate().is_err());
    }

    #[test]
    fn test_configuration_serde_roundtrip() {
        let cfg = VaultConfiguration::dead_man_switch(owner_hex(), heir_hex(), 90)
            .unwrap()
            .with_heir("Alice", 60, heir_hex());
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: VaultConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_profile_required_roles() {
        assert!(VaultProfile::Business
            .required_roles()
            .contains(&KeyRole::Trustee));
        assert!(VaultProfile::DeadManSwitch
            .required_roles()
            .contains(&KeyRole::Heir));
    }
}
