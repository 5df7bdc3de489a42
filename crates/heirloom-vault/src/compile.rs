//! Miniscript compiler adapter
//!
//! The only module that touches the miniscript compiler machinery. The rest
//! of the engine consumes its output: a compiled miniscript string, sanity
//! flags, script ASM when the keys are real curve points, and the semantic
//! spend conditions.
//!
//! Sanity here is advisory: a business vault intentionally reuses the owner
//! key across branches, which the compiler rejects as non-sane, and the
//! direct script assembler is used instead. Address validity never depends
//! on a sane compilation.

use crate::policy::Policy;
use heirloom_keys::{KeyError, ScriptKey};
use miniscript::policy::Liftable;
use miniscript::policy::Semantic;
use miniscript::{Miniscript, Segwitv0, TranslatePk, Translator};
use std::str::FromStr;
use thiserror::Error;

/// Combination cap shared with the spend-path model; past this the
/// enumeration is truncated rather than allowed to blow up.
pub const MAX_SPEND_CONDITIONS: usize = 1_000;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("policy compilation failed: {0}")]
    Compiler(String),

    #[error("miniscript parse failed: {0}")]
    Parse(String),

    #[error("policy lift failed: {0}")]
    Lift(String),
}

/// Output bundle of a compilation.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub policy: String,
    pub miniscript: String,
    /// Rendered only when every key is a point on the curve.
    pub script_asm: Option<String>,
    pub script: Option<bitcoin::ScriptBuf>,
    pub is_sane: bool,
    pub sanity_error: Option<String>,
}

struct CurveCheck;

impl Translator<ScriptKey, bitcoin::PublicKey, KeyError> for CurveCheck {
    fn pk(&mut self, pk: &ScriptKey) -> Result<bitcoin::PublicKey, KeyError> {
        pk.to_public_key()
    }

    miniscript::translate_hash_clone!(ScriptKey, bitcoin::PublicKey, KeyError);
}

fn render(ms: &Miniscript<ScriptKey, Segwitv0>) -> Option<bitcoin::ScriptBuf> {
    ms.translate_pk(&mut CurveCheck).ok().map(|concrete| concrete.encode())
}

fn bundle(policy_str: String, ms: Miniscript<ScriptKey, Segwitv0>) -> CompiledPolicy {
    let (is_sane, sanity_error) = match ms.sanity_check() {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    let script = render(&ms);
    CompiledPolicy {
        policy: policy_str,
        miniscript: ms.to_string(),
        script_asm: script.as_ref().map(|s| s.to_asm_string()),
        script,
        is_sane,
        sanity_error,
    }
}

/// Compile a concrete policy down to miniscript.
pub fn compile_policy(policy: &Policy) -> Result<CompiledPolicy, CompileError> {
    let ms: Miniscript<ScriptKey, Segwitv0> = policy
        .compile()
        .map_err(|e| CompileError::Compiler(e.to_string()))?;
    Ok(bundle(crate::policy::policy_string(policy), ms))
}

/// Parse a miniscript string and report the same bundle, lifting back to a
/// policy for display.
pub fn compile_miniscript(ms_str: &str) -> Result<CompiledPolicy, CompileError> {
    let ms = Miniscript::<ScriptKey, Segwitv0>::from_str(ms_str)
        .map_err(|e| CompileError::Parse(e.to_string()))?;
    let policy_str = ms
        .lift()
        .map(|sem| sem.to_string())
        .map_err(|e| CompileError::Lift(e.to_string()))?;
    Ok(bundle(policy_str, ms))
}

/// A minimal satisfying set for a policy: which keys must sign and which
/// locks must have matured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendCondition {
    pub keys: Vec<ScriptKey>,
    pub after: Option<u32>,
    pub older: Option<u32>,
    pub requires_preimage: bool,
}

impl SpendCondition {
    fn empty() -> Self {
        Self {
            keys: Vec::new(),
            after: None,
            older: None,
            requires_preimage: false,
        }
    }

    fn merge(mut self, other: &SpendCondition) -> Self {
        for key in &other.keys {
            if !self.keys.contains(key) {
                self.keys.push(*key);
            }
        }
        self.after = match (self.after, other.after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.older = match (self.older, other.older) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.requires_preimage |= other.requires_preimage;
        self
    }
}

/// Enumerate every minimal satisfying set of a policy, capped at
/// [`MAX_SPEND_CONDITIONS`].
pub fn spend_conditions(policy: &Policy) -> Result<Vec<SpendCondition>, CompileError> {
    let semantic = policy.lift().map_err(|e| CompileError::Lift(e.to_string()))?;
    let mut conditions = enumerate(&semantic);
    conditions.truncate(MAX_SPEND_CONDITIONS);
    Ok(conditions)
}

fn enumerate(policy: &Semantic<ScriptKey>) -> Vec<SpendCondition> {
    match policy {
        Semantic::Trivial => vec![SpendCondition::empty()],
        Semantic::Unsatisfiable => Vec::new(),
        Semantic::Key(key) => {
            let mut cond = SpendCondition::empty();
            cond.keys.push(*key);
            vec![cond]
        }
        Semantic::After(t) => {
            let mut cond = SpendCondition::empty();
            cond.after = Some(t.to_consensus_u32());
            vec![cond]
        }
        Semantic::Older(t) => {
            let mut cond = SpendCondition::empty();
            cond.older = Some(t.to_consensus_u32());
            vec![cond]
        }
        Semantic::Sha256(_) => {
            let mut cond = SpendCondition::empty();
            cond.requires_preimage = true;
            vec![cond]
        }
        Semantic::Thresh(th) => {
            let children: Vec<Vec<SpendCondition>> = th.iter().map(|sub| enumerate(sub)).collect();
            let mut out = Vec::new();
            for picks in combinations(children.len(), th.k()) {
                let mut partial = vec![SpendCondition::empty()];
                for index in picks {
                    let mut next = Vec::new();
                    for base in &partial {
                        for child in &children[index] {
                            next.push(base.clone().merge(child));
                            if next.len() > MAX_SPEND_CONDITIONS {
                                break;
                            }
                        }
                        if next.len() > MAX_SPEND_CONDITIONS {
                            break;
                        }
                    }
                    partial = next;
                }
                out.extend(partial);
                if out.len() > MAX_SPEND_CONDITIONS {
                    out.truncate(MAX_SPEND_CONDITIONS);
                    break;
                }
            }
            out
        }
        // Other hash kinds never appear in vault policies.
        _ => Vec::new(),
    }
}

/// All `k`-element index combinations of `0..n`, in lexicographic order.
pub fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        if out.len() >= MAX_SPEND_CONDITIONS {
            return out;
        }
        // Advance to the next combination.
        let mut i = k;
        loop {
            if i == 0 {
                return out;
            }
            i -= 1;
            if current[i] != i + n - k {
                break;
            }
            if i == 0 {
                return out;
            }
        }
        current[i] += 1;
        for j in i + 1..k {
            current[j] = current[j - 1] + 1;
        }
    }
}
