//! Esplora-backed chain access
//!
//! The engine's only I/O boundary: balance and UTXO lookup, tip height,
//! recommended fees, raw transaction fetch and broadcast against
//! esplora-compatible backends (mempool.space, blockstream.info).
//!
//! Endpoints are tried in order; the first success wins and only when all
//! fail is an error surfaced. Every request honours the client's deadline —
//! on timeout the call returns a typed failure and leaves no hidden state.
//! Responses never feed consensus-critical decisions directly: PSBT
//! construction re-checks amounts and confirmation state.

use bitcoin::{Network, OutPoint, Txid};
use heirloom_psbt::{FeeEstimates, VaultUtxo};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("client construction failed: {0}")]
    Client(String),

    #[error("all {attempts} configured endpoints failed; last error: {last}")]
    AllEndpointsFailed { attempts: usize, last: String },

    #[error("endpoint returned HTTP {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("response did not parse: {0}")]
    Parse(String),

    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),
}

/// Balance fields as served under `/address/{addr}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainStats {
    pub funded_txo_sum: u64,
    pub spent_txo_sum: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressInfo {
    pub chain_stats: ChainStats,
}

impl AddressInfo {
    /// Confirmed balance in satoshis.
    pub fn balance(&self) -> u64 {
        self.chain_stats
            .funded_txo_sum
            .saturating_sub(self.chain_stats.spent_txo_sum)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtxoStatus {
    pub confirmed: bool,
    pub block_height: Option<u32>,
    pub block_time: Option<u64>,
}

/// One entry under `/address/{addr}/utxo`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: UtxoStatus,
}

impl AddressUtxo {
    pub fn to_vault_utxo(&self) -> Result<VaultUtxo, ChainError> {
        Ok(VaultUtxo {
            outpoint: OutPoint {
                txid: Txid::from_str(&self.txid).map_err(|e| ChainError::Parse(e.to_string()))?,
                vout: self.vout,
            },
            value: bitcoin::Amount::from_sat(self.value),
            confirmed: self.status.confirmed,
            height: self.status.block_height,
        })
    }
}

/// Wire form of `/v1/fees/recommended`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendedFees {
    #[serde(rename = "fastestFee")]
    pub fastest_fee: u64,
    #[serde(rename = "halfHourFee")]
    pub half_hour_fee: u64,
    #[serde(rename = "hourFee")]
    pub hour_fee: u64,
    #[serde(rename = "economyFee")]
    pub economy_fee: u64,
    #[serde(rename = "minimumFee")]
    pub minimum_fee: u64,
}

impl From<RecommendedFees> for FeeEstimates {
    fn from(fees: RecommendedFees) -> Self {
        FeeEstimates {
            fastest: fees.fastest_fee,
            half_hour: fees.half_hour_fee,
            hour: fees.hour_fee,
            economy: fees.economy_fee,
            minimum: fees.minimum_fee,
        }
    }
}

/// Default esplora bases per network. Signet shares testnet's address HRP
/// but has its own API roots.
pub fn default_endpoints(network: Network) -> Vec<String> {
    let bases: &[&str] = match network {
        Network::Bitcoin => &["https://mempool.space/api", "https://blockstream.info/api"],
        Network::Testnet => &[
            "https://mempool.space/testnet/api",
            "https://blockstream.info/testnet/api",
        ],
        Network::Signet => &["https://mempool.space/signet/api"],
        _ => &["http://127.0.0.1:3002"],
    };
    bases.iter().map(|s| s.to_string()).collect()
}

/// HTTP client over a prioritized endpoint list.
pub struct ChainClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    network: Network,
}

impl ChainClient {
    /// Client with the default endpoints and a per-request deadline.
    pub fn new(network: Network, deadline: Duration) -> Result<Self, ChainError> {
        Self::with_endpoints(default_endpoints(network), network, deadline)
    }

    pub fn with_endpoints(
        endpoints: Vec<String>,
        network: Network,
        deadline: Duration,
    ) -> Result<Self, ChainError> {
        if endpoints.is_empty() {
            return Err(ChainError::Client("no endpoints configured".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .map_err(|e| ChainError::Client(e.to_string()))?;
        Ok(Self {
            http,
            endpoints,
            network,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// GET `path` from the first endpoint that answers, returning the body.
    async fn get_text(&self, path: &str) -> Result<String, ChainError> {
        let mut last = String::from("no endpoints tried");
        for base in &self.endpoints {
            let url = format!("{}{}", base, path);
            match self.http.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return Ok(body);
                    }
                    last = format!("{url}: HTTP {} ({})", status.as_u16(), body.trim());
                    log::warn!("chain endpoint failed: {last}");
                }
                Err(e) => {
                    last = format!("{url}: {e}");
                    log::warn!("chain endpoint unreachable: {last}");
                }
            }
        }
        Err(ChainError::AllEndpointsFailed {
            attempts: self.endpoints.len(),
            last,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body).map_err(|e| ChainError::Parse(e.to_string()))
    }

    /// Current tip height.
    pub async fn tip_height(&self) -> Result<u32, ChainError> {
        let body = self.get_text("/blocks/tip/height").await?;
        body.trim()
            .parse()
            .map_err(|_| ChainError::Parse(format!("tip height: {body:?}")))
    }

    /// Confirmed balance of an address, in satoshis.
    pub async fn balance(&self, address: &str) -> Result<u64, ChainError> {
        let info: AddressInfo = self.get_json(&format!("/address/{address}")).await?;
        Ok(info.balance())
    }

    /// Every UTXO at an address.
    pub async fn utxos(&self, address: &str) -> Result<Vec<VaultUtxo>, ChainError> {
        let raw: Vec<AddressUtxo> = self.get_json(&format!("/address/{address}/utxo")).await?;
        raw.iter().map(AddressUtxo::to_vault_utxo).collect()
    }

    /// Recommended fee rates.
    pub async fn fee_estimates(&self) -> Result<FeeEstimates, ChainError> {
        let fees: RecommendedFees = self.get_json("/v1/fees/recommended").await?;
        Ok(fees.into())
    }

    /// Raw transaction hex.
    pub async fn tx_hex(&self, txid: &Txid) -> Result<String, ChainError> {
        let body = self.get_text(&format!("/tx/{txid}/hex")).await?;
        Ok(body.trim().to_string())
    }

    /// Broadcast raw transaction hex; the node's rejection message is
    /// surfaced verbatim.
    pub async fn broadcast(&self, tx_hex: &str) -> Result<Txid, ChainError> {
        let mut last = String::from("no endpoints tried");
        for base in &self.endpoints {
            let url = format!("{}/tx", base);
            match self
                .http
                .post(&url)
                .body(tx_hex.to_string())
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        return Txid::from_str(body.trim())
                            .map_err(|e| ChainError::Parse(e.to_string()));
                    }
                    // A rejection with a node message is final, not an
                    // endpoint outage; do not retry it elsewhere.
                    return Err(ChainError::BroadcastRejected(body.trim().to_string()));
                }
                Err(e) => {
                    last = format!("{url}: {e}");
                    log::warn!("broadcast endpoint unreachable: {last}");
                }
            }
        }
        Err(ChainError::AllEndpointsFailed {
            attempts: self.endpoints.len(),
            last,
        })
    }
}
