//! Check-in status for dead-man-switch vaults
//!
//! The owner must refresh (spend-to-self) before the inactivity window
//! closes; this module is the pure state machine the dashboard and
//! notification layers read. A successful refresh broadcast records the
//! new txid and timestamp.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Health of a dead-man-switch vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckinState {
    Healthy,
    Warning,
    Critical,
    Expired,
}

/// Day thresholds separating the states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinThresholds {
    pub warning_days: u32,
    pub critical_days: u32,
}

impl Default for CheckinThresholds {
    fn default() -> Self {
        Self {
            warning_days: 7,
            critical_days: 2,
        }
    }
}

/// The last recorded owner refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinRecord {
    /// Unix seconds of the last refresh broadcast.
    pub last_checkin: u64,
    /// Txid of the refresh transaction, if known.
    #[serde(with = "txid_serde", default)]
    pub last_txid: Option<Txid>,
}

mod txid_serde {
    use bitcoin::Txid;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(txid: &Option<Txid>, serializer: S) -> Result<S::Ok, S::Error> {
        match txid {
            Some(txid) => serializer.serialize_some(&txid.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Txid>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| Txid::from_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

impl CheckinRecord {
    pub fn new(now: u64) -> Self {
        Self {
            last_checkin: now,
            last_txid: None,
        }
    }

    /// Record a broadcast refresh.
    pub fn record_refresh(&mut self, txid: Txid, now: u64) {
        self.last_checkin = now;
        self.last_txid = Some(txid);
    }
}

/// Computed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinStatus {
    pub state: CheckinState,
    /// Days until the window closes; non-positive once expired.
    pub days_remaining: i64,
    /// Unix seconds at which the window closes.
    pub deadline: u64,
}

/// Pure transition function. A vault without any check-in yet was just
/// created, so it reports healthy with the full window ahead.
pub fn status(
    record: Option<&CheckinRecord>,
    interval_days: u32,
    thresholds: &CheckinThresholds,
    now: u64,
) -> CheckinStatus {
    let record = match record {
        Some(record) => record,
        None => {
            return CheckinStatus {
                state: CheckinState::Healthy,
                days_remaining: interval_days as i64,
                deadline: now + interval_days as u64 * SECONDS_PER_DAY as u64,
            }
        }
    };

    let deadline = record.last_checkin + interval_days as u64 * SECONDS_PER_DAY as u64;
    let delta = deadline as i64 - now as i64;
    let days_remaining = delta.div_euclid(SECONDS_PER_DAY)
        + if delta.rem_euclid(SECONDS_PER_DAY) > 0 { 1 } else { 0 };

    let state = if days_remaining <= 0 {
        CheckinState::Expired
    } else if days_remaining <= thresholds.critical_days as i64 {
        CheckinState::Critical
    } else if days_remaining <= thresholds.warning_days as i64 {
        CheckinState::Warning
    } else {
        CheckinState::Healthy
    };

    CheckinStatus {
        state,
        days_remaining,
        deadline,
    }
}
