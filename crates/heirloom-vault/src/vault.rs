//! The vault entity and its storage boundary
//!
//! A [`Vault`] is the persisted record: configuration plus the artifacts
//! derived at creation time. The engine never touches storage directly —
//! records move through the [`VaultStore`] trait, whose implementations
//! encrypt at rest under a user-supplied password and hand the engine only
//! decrypted objects.

use crate::checkin::{CheckinRecord, CheckinStatus, CheckinThresholds};
use crate::config::VaultConfiguration;
use crate::generate::VaultBundle;
use bitcoin::{Network, ScriptBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("generation bundle is invalid: {0}")]
    InvalidBundle(String),

    #[error("stored witness script is not hex: {0}")]
    BadScriptHex(String),
}

/// One persisted vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: Uuid,
    pub configuration: VaultConfiguration,
    pub network: Network,
    pub address: String,
    /// Witness script bytes, hex encoded for storage.
    pub witness_script: String,
    /// Encoded CSV value for CSV-based vaults.
    pub sequence: Option<u32>,
    /// CLTV height for height-based vaults.
    pub lock_height: Option<u32>,
    /// Check-in record for dead-man-switch vaults.
    #[serde(default)]
    pub checkin: Option<CheckinRecord>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Vault {
    /// Freeze a generation bundle into a persisted record.
    pub fn from_bundle(
        configuration: VaultConfiguration,
        bundle: &VaultBundle,
        now: u64,
    ) -> Result<Self, VaultError> {
        if !bundle.is_valid {
            return Err(VaultError::InvalidBundle(
                bundle.error.clone().unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        let address = bundle
            .address
            .clone()
            .ok_or_else(|| VaultError::InvalidBundle("missing address".to_string()))?;
        let script = bundle
            .witness_script
            .clone()
            .ok_or_else(|| VaultError::InvalidBundle("missing witness script".to_string()))?;

        Ok(Self {
            id: Uuid::new_v4(),
            configuration,
            network: bundle.network,
            address,
            witness_script: hex::encode(script.as_bytes()),
            sequence: bundle.sequence.map(|s| s.to_consensus_u32()),
            lock_height: bundle.lock_height,
            checkin: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn witness_script(&self) -> Result<ScriptBuf, VaultError> {
        let bytes =
            hex::decode(&self.witness_script).map_err(|e| VaultError::BadScriptHex(e.to_string()))?;
        Ok(ScriptBuf::from(bytes))
    }

    /// Check-in health, for dead-man-switch vaults. `interval_days` comes
    /// from the configured inactivity window.
    pub fn checkin_status(
        &self,
        interval_days: u32,
        thresholds: &CheckinThresholds,
        now: u64,
    ) -> CheckinStatus {
        crate::checkin::status(self.checkin.as_ref(), interval_days, thresholds, now)
    }

    pub fn touch(&mut self, now: u64) {
        self.updated_at = now;
    }
}

/// Storage boundary. Implementations own encryption-at-rest; the engine
/// only sees decrypted records.
pub trait VaultStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn list(&self) -> Result<Vec<Vault>, Self::Error>;
    fn create(&mut self, vault: &Vault, password: &str) -> Result<(), Self::Error>;
    fn update(&mut self, id: Uuid, vault: &Vault, password: &str) -> Result<(), Self::Error>;
    fn delete(&mut self, id: Uuid) -> Result<(), Self::Error>;
    fn export(&self, id: Uuid, password: &str) -> Result<Vec<u8>, Self::Error>;
    fn import(&mut self, blob: &[u8], password: &str) -> Result<Vault, Self::Error>;
}
