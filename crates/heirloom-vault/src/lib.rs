//! Heirloom vault engine
//!
//! Turns a high-level inheritance configuration into a miniscript policy, a
//! canonical P2WSH witness script, an address, and the catalogue of spend
//! paths the PSBT layer builds transactions from.
//!
//! # Shape
//!
//! ```text
//! validate -> resolve keys -> locks -> policy -> compile (analysis)
//!                                   -> script assembler -> address
//!                                   -> spend paths
//! ```
//!
//! The compiled miniscript is analysis only; the witness script always
//! comes from the direct assembler so it is byte-exact reproducible.

pub mod checkin;
pub mod compile;
pub mod config;
pub mod generate;
pub mod policy;
pub mod script;
pub mod spend_detect;
pub mod spend_path;
pub mod timelock;
pub mod validate;
pub mod vault;

pub use config::{VaultConfiguration, VaultProfile};
pub use generate::{generate, generate_stages, VaultBundle};
pub use spend_path::SpendPath;
pub use vault::{Vault, VaultStore};
