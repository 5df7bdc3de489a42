//! PSBT construction and finalization for Heirloom vaults
//!
//! Builds unsigned PSBTs for the three legitimate flows — owner sweep,
//! owner refresh (dead-man-switch reset), heir claim — and finalizes
//! signed ones into broadcastable transactions. Branch selection, locktime
//! and sequence values all come from the vault's spend-path model; this
//! crate never re-derives them.

pub mod builder;
pub mod fee;
pub mod finalize;

pub use builder::{
    build_refresh, build_sweep, estimate_refresh_cost, KeySourceMap, PsbtError, RefreshPsbt,
    VaultUtxo,
};
pub use fee::{FeeEstimates, FeePolicy, FeeTier, InputClass, DUST_LIMIT_SAT};
pub use finalize::{
    combine, extract, finalize, from_base64, from_hex, to_base64, to_hex, FinalizeError,
    FinalizeOptions, FinalizedTransaction,
};
