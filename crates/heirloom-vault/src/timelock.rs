//! Timelock arithmetic
//!
//! Conversions between calendar dates, block heights (CLTV) and BIP-68
//! sequence values (CSV). Date estimates are anchored to a fixed
//! (height, date) pair and assume 144 blocks per day; callers with a live
//! tip height pass it in and bypass the estimate.
//!
//! An off-by-one here is a funds-loss bug (a past CLTV lets the heir spend
//! immediately), so past dates and out-of-range BIP-68 encodings are hard
//! errors, never clamped.

use bitcoin::Sequence;
use chrono::{NaiveDate, Utc};
use thiserror::Error;

/// Anchor: block 878,000 was mined around 2025-01-01.
pub const ANCHOR_HEIGHT: u32 = 878_000;

/// Average blocks per day assumed by all estimates.
pub const BLOCKS_PER_DAY: u32 = 144;

/// BIP-68: bit 31 disables the relative locktime entirely.
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;

/// BIP-68: bit 22 switches the low 16 bits to 512-second intervals.
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;

/// BIP-68: the low 16 bits carry the lock value.
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// Consensus boundary below which nLockTime is a block height.
pub const LOCKTIME_HEIGHT_THRESHOLD: u32 = 500_000_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimelockError {
    #[error("locktime height {target} is not in the future (current estimate {current})")]
    LocktimeInPast { target: u32, current: u32 },

    #[error("relative timelock of {0} blocks exceeds the BIP-68 range")]
    Bip68OutOfRange(u32),

    #[error("sequence {0:#010x} sets bits without BIP-68 meaning")]
    Bip68ReservedBits(u32),

    #[error("absolute lock height {0} out of range")]
    InvalidHeight(u32),
}

fn anchor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid anchor date")
}

/// Estimated chain height at a given date, floored at zero for dates before
/// the anchor.
pub fn estimated_height_at(date: NaiveDate) -> u32 {
    let days = (date - anchor_date()).num_days();
    let height = ANCHOR_HEIGHT as i64 + days * BLOCKS_PER_DAY as i64;
    height.clamp(0, u32::MAX as i64) as u32
}

/// Estimated chain height right now.
pub fn current_estimated_height() -> u32 {
    estimated_height_at(Utc::now().date_naive())
}

/// Estimated calendar date at which a given height will be reached.
pub fn height_to_estimated_date(height: u32) -> NaiveDate {
    let days = (height as i64 - ANCHOR_HEIGHT as i64) / BLOCKS_PER_DAY as i64;
    anchor_date() + chrono::Duration::days(days)
}

/// Convert a calendar date to a CLTV block height. Future-only: a date at or
/// behind the current height errors out instead of producing a lock the heir
/// could satisfy immediately.
pub fn date_to_cltv(date: NaiveDate, current_height: Option<u32>) -> Result<u32, TimelockError> {
    let target = estimated_height_at(date);
    let current = current_height.unwrap_or_else(current_estimated_height);
    if target <= current {
        return Err(TimelockError::LocktimeInPast { target, current });
    }
    validate_cltv_height(target)?;
    Ok(target)
}

/// Absolute lock heights must be interpretable as heights (not times) and
/// fit the engine's 31-bit bound.
pub fn validate_cltv_height(height: u32) -> Result<(), TimelockError> {
    if height == 0 || height >= LOCKTIME_HEIGHT_THRESHOLD || height >= (1 << 31) {
        return Err(TimelockError::InvalidHeight(height));
    }
    Ok(())
}

/// Encode an inactivity window in days as a BIP-68 sequence.
///
/// Multiplies by 144. When the block count would overflow 16 bits and
/// `allow_time_mode` is set, the window is re-encoded in 512-second
/// intervals with bit 22 set; otherwise the overflow is an error.
pub fn days_to_csv(days: u32, allow_time_mode: bool) -> Result<Sequence, TimelockError> {
    let blocks = days
        .checked_mul(BLOCKS_PER_DAY)
        .ok_or(TimelockError::Bip68OutOfRange(u32::MAX))?;
    if blocks == 0 {
        return Err(TimelockError::Bip68OutOfRange(0));
    }
    if blocks <= SEQUENCE_LOCKTIME_MASK {
        return Ok(Sequence::from_height(blocks as u16));
    }
    if !allow_time_mode {
        return Err(TimelockError::Bip68OutOfRange(blocks));
    }
    let seconds = days as u64 * 86_400;
    let intervals = seconds.div_ceil(512);
    if intervals > SEQUENCE_LOCKTIME_MASK as u64 {
        return Err(TimelockError::Bip68OutOfRange(blocks));
    }
    Ok(Sequence::from_512_second_intervals(intervals as u16))
}

/// Assert the BIP-68 encoding invariants: disable bit clear, no bits outside
/// the type flag and the 16-bit value, value non-zero.
pub fn validate_bip68(value: u32) -> Result<(), TimelockError> {
    if value & !(SEQUENCE_LOCKTIME_MASK | SEQUENCE_LOCKTIME_TYPE_FLAG) != 0 {
        return Err(TimelockError::Bip68ReservedBits(value));
    }
    if value & SEQUENCE_LOCKTIME_MASK == 0 {
        return Err(TimelockError::Bip68OutOfRange(value));
    }
    Ok(())
}

/// Human-readable form of a relative lock, in the unit it was encoded with.
pub fn describe_sequence(seq: Sequence) -> String {
    let value = seq.to_consensus_u32();
    if value & SEQUENCE_LOCKTIME_TYPE_FLAG != 0 {
        let seconds = (value & SEQUENCE_LOCKTIME_MASK) as u64 * 512;
        format!("~{} days ({} x 512s)", seconds / 86_400, value & SEQUENCE_LOCKTIME_MASK)
    } else {
        let blocks = value & SEQUENCE_LOCKTIME_MASK;
        format!("~{} days ({} blocks)", blocks / BLOCKS_PER_DAY, blocks)
    }
}
