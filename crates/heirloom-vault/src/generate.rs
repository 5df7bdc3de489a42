//! Vault address orchestration
//!
//! Walks a configuration through validation, key resolution, policy
//! construction, compilation analysis, script assembly and spend-path
//! enumeration, and returns one result bundle. Lock values are computed
//! once, up front, so the script and later PSBTs can never disagree.
//!
//! Failures fold into the bundle (`is_valid = false` plus a message) rather
//! than leaking partial state. Validity is keyed on the derived address,
//! not on miniscript sanity: business and decaying vaults produce perfectly
//! valid addresses from policies the compiler refuses to call sane.

use crate::compile::{self, CompileError};
use crate::config::{KeyRole, ResolvedKeys, VaultConfiguration, VaultProfile, VaultTimelock};
use crate::policy::{self, PolicyError};
use crate::script::{self, FarTier, GateSpec, ScriptError, ScriptTemplate};
use crate::spend_path::{self, SpendPath};
use crate::timelock::TimelockError;
use bitcoin::{Network, ScriptBuf, Sequence};
use heirloom_keys::KeyError;
use thiserror::Error;

#[derive(Error, Debug)]
enum GenerateError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    Key(#[from] KeyError),

    #[error("{0}")]
    Policy(#[from] PolicyError),

    #[error("{0}")]
    Script(#[from] ScriptError),

    #[error("{0}")]
    Lock(#[from] TimelockError),

    #[error("policy is not sane: {0}")]
    NotSane(String),
}

/// Everything derived for one vault address.
#[derive(Debug, Clone)]
pub struct VaultBundle {
    pub network: Network,
    pub is_valid: bool,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub address: Option<String>,
    pub witness_script: Option<ScriptBuf>,
    pub policy: Option<String>,
    pub miniscript: Option<String>,
    pub script_asm: Option<String>,
    pub is_sane: Option<bool>,
    pub spend_paths: Vec<SpendPath>,
    /// Encoded CSV value of the furthest tier, when the vault is CSV-based.
    pub sequence: Option<Sequence>,
    /// CLTV height, when the vault is height-based.
    pub lock_height: Option<u32>,
    /// Share of the funds this bundle covers (below 100 for staggered stages).
    pub percentage: u8,
}

impl VaultBundle {
    fn invalid(network: Network, message: String) -> Self {
        Self {
            network,
            is_valid: false,
            error: Some(message),
            warnings: Vec::new(),
            address: None,
            witness_script: None,
            policy: None,
            miniscript: None,
            script_asm: None,
            is_sane: None,
            spend_paths: Vec::new(),
            sequence: None,
            lock_height: None,
            percentage: 100,
        }
    }
}

/// Generate the address bundle for a configuration.
pub fn generate(cfg: &VaultConfiguration, network: Network) -> VaultBundle {
    match run(cfg, network) {
        Ok(bundle) => bundle,
        Err(e) => {
            log::debug!("vault generation failed: {e}");
            VaultBundle::invalid(network, e.to_string())
        }
    }
}

/// Generate one bundle per staggered stage (a single bundle at 100% for
/// non-staggered configurations). Stages are independent UTXOs; funding
/// each is the caller's responsibility.
pub fn generate_stages(cfg: &VaultConfiguration, network: Network) -> Vec<VaultBundle> {
    let staged = match policy::staged_configurations(cfg) {
        Ok(staged) => staged,
        Err(e) => return vec![VaultBundle::invalid(network, e.to_string())],
    };
    staged
        .into_iter()
        .map(|(stage_cfg, percentage)| {
            let mut bundle = generate(&stage_cfg, network);
            bundle.percentage = percentage;
            bundle
        })
        .collect()
}

fn run(cfg: &VaultConfiguration, network: Network) -> Result<VaultBundle, GenerateError> {
    let verdict = crate::validate::validate_configuration(cfg);
    if !verdict.is_valid() {
        return Err(GenerateError::Configuration(
            verdict.error_codes().join(", "),
        ));
    }
    let mut warnings: Vec<String> = verdict.warnings.iter().map(|w| w.message.clone()).collect();

    let keys = cfg.resolve_keys()?;
    let template = build_template(cfg, &keys)?;

    let policy_bundle = policy::build_policy(cfg, &keys)?;
    warnings.extend(policy_bundle.warnings);
    let policy_str = policy::policy_string(&policy_bundle.policy);

    // Sanity is a gate for ordinary profiles and advisory for the shapes
    // that reuse keys by design.
    let sanity_advisory =
        cfg.profile == VaultProfile::Business || cfg.decay.is_some();
    let (miniscript, script_asm, is_sane) =
        match compile::compile_policy(&policy_bundle.policy) {
            Ok(compiled) => {
                if !compiled.is_sane {
                    let reason = compiled
                        .sanity_error
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string());
                    if sanity_advisory {
                        warnings.push(format!(
                            "policy is not sane ({reason}); using the direct script assembler"
                        ));
                    } else {
                        return Err(GenerateError::NotSane(reason));
                    }
                }
                (Some(compiled.miniscript), compiled.script_asm, Some(compiled.is_sane))
            }
            Err(CompileError::Compiler(reason)) if sanity_advisory => {
                warnings.push(format!(
                    "policy does not compile ({reason}); using the direct script assembler"
                ));
                (None, None, Some(false))
            }
            Err(e) => return Err(GenerateError::NotSane(e.to_string())),
        };

    let witness_script = script::witness_script(&template)?;
    let address = script::p2wsh_address(&witness_script, network)?;
    let is_valid = script::validate_address(&address.to_string(), network);

    let spend_paths = spend_path::enumerate(&template);
    let (sequence, lock_height) = template_locks(&template);

    Ok(VaultBundle {
        network,
        is_valid,
        error: None,
        warnings,
        address: Some(address.to_string()),
        witness_script: Some(witness_script),
        policy: Some(policy_str),
        miniscript,
        script_asm,
        is_sane,
        spend_paths,
        sequence,
        lock_height,
        percentage: 100,
    })
}

fn template_locks(template: &ScriptTemplate) -> (Option<Sequence>, Option<u32>) {
    match template {
        ScriptTemplate::Cltv { height, .. } => (None, Some(*height)),
        ScriptTemplate::Csv { sequence, .. } => (Some(*sequence), None),
        ScriptTemplate::Tiered { far_sequence, .. } => (Some(*far_sequence), None),
        ScriptTemplate::Decay { height, .. } => (None, Some(*height)),
        ScriptTemplate::Business {
            trustee_sequence, ..
        } => (Some(*trustee_sequence), None),
    }
}

fn gate_spec(cfg: &VaultConfiguration, keys: &ResolvedKeys) -> Result<GateSpec, GenerateError> {
    let mut gates = GateSpec::none();
    if cfg.has_gate(crate::config::Gate::Challenge) {
        gates.challenge = cfg.challenge_hash;
    }
    if cfg.has_gate(crate::config::Gate::Oracle) {
        gates.oracle = Some(
            keys.role(KeyRole::Oracle)
                .ok_or(PolicyError::MissingRole(KeyRole::Oracle))?,
        );
    }
    Ok(gates)
}

fn role_key(keys: &ResolvedKeys, role: KeyRole) -> Result<heirloom_keys::ScriptKey, GenerateError> {
    keys.role(role)
        .ok_or_else(|| GenerateError::Policy(PolicyError::MissingRole(role)))
}

fn relative(cfg: &VaultConfiguration, role: KeyRole) -> Result<Sequence, GenerateError> {
    match cfg.timelocks.get(&role) {
        Some(lock @ VaultTimelock::Relative(_)) => {
            Ok(lock.as_sequence().expect("relative lock"))
        }
        Some(VaultTimelock::Absolute(_)) => Err(GenerateError::Policy(
            PolicyError::WrongTimelockKind {
                role,
                expected: "relative",
            },
        )),
        None => Err(GenerateError::Policy(PolicyError::MissingTimelock(role))),
    }
}

fn absolute(cfg: &VaultConfiguration, role: KeyRole) -> Result<u32, GenerateError> {
    match cfg.timelocks.get(&role) {
        Some(VaultTimelock::Absolute(height)) => Ok(*height),
        Some(VaultTimelock::Relative(_)) => Err(GenerateError::Policy(
            PolicyError::WrongTimelockKind {
                role,
                expected: "absolute",
            },
        )),
        None => Err(GenerateError::Policy(PolicyError::MissingTimelock(role))),
    }
}

/// Map a validated configuration onto its script template, computing every
/// lock value exactly once.
fn build_template(
    cfg: &VaultConfiguration,
    keys: &ResolvedKeys,
) -> Result<ScriptTemplate, GenerateError> {
    let owner = role_key(keys, KeyRole::Owner)?;
    let gates = gate_spec(cfg, keys)?;

    if let Some(quorum) = &cfg.decay {
        let heirs: Vec<_> = keys.heirs.iter().map(|(_, k)| *k).collect();
        let mut before = heirs.clone();
        before.push(owner);
        return Ok(ScriptTemplate::Decay {
            owner,
            threshold_before: quorum.threshold_before,
            before,
            threshold_after: quorum.threshold_after,
            after: heirs,
            height: absolute(cfg, KeyRole::Heir)?,
            gates,
        });
    }

    match cfg.profile {
        VaultProfile::Solo => {
            // Legacy CLTV shape when an heir key with an absolute lock is
            // configured; otherwise the relative recovery shape.
            if let (Some(heir), Some(VaultTimelock::Absolute(_))) =
                (keys.role(KeyRole::Heir), cfg.timelocks.get(&KeyRole::Heir))
            {
                return Ok(ScriptTemplate::Cltv {
                    owner,
                    heir,
                    height: absolute(cfg, KeyRole::Heir)?,
                    gates,
                });
            }
            Ok(ScriptTemplate::Csv {
                owner,
                beneficiary_role: KeyRole::Recovery,
                beneficiary: role_key(keys, KeyRole::Recovery)?,
                sequence: relative(cfg, KeyRole::Recovery)?,
                // Recovery is a short-horizon branch; gates never apply.
                gates: GateSpec::none(),
            })
        }
        VaultProfile::DeadManSwitch => Ok(ScriptTemplate::Csv {
            owner,
            beneficiary_role: KeyRole::Heir,
            beneficiary: role_key(keys, KeyRole::Heir)?,
            sequence: relative(cfg, KeyRole::Heir)?,
            gates,
        }),
        VaultProfile::Spouse => Ok(ScriptTemplate::Tiered {
            owner,
            mid_role: KeyRole::Spouse,
            mid: role_key(keys, KeyRole::Spouse)?,
            mid_sequence: relative(cfg, KeyRole::Spouse)?,
            far: FarTier::Single {
                role: KeyRole::Heir,
                key: role_key(keys, KeyRole::Heir)?,
            },
            far_sequence: relative(cfg, KeyRole::Heir)?,
            gates,
        }),
        VaultProfile::Family => Ok(ScriptTemplate::Tiered {
            owner,
            mid_role: KeyRole::Recovery,
            mid: role_key(keys, KeyRole::Recovery)?,
            mid_sequence: relative(cfg, KeyRole::Recovery)?,
            far: FarTier::Threshold {
                required: 2,
                keys: keys.heirs.iter().map(|(_, k)| *k).collect(),
            },
            far_sequence: relative(cfg, KeyRole::Heir)?,
            gates,
        }),
        VaultProfile::Business => Ok(ScriptTemplate::Business {
            owner,
            partner: role_key(keys, KeyRole::Partner)?,
            trustee: role_key(keys, KeyRole::Trustee)?,
            solo_sequence: relative(cfg, KeyRole::Owner)?,
            trustee_sequence: relative(cfg, KeyRole::Trustee)?,
            gates,
        }),
    }
}
