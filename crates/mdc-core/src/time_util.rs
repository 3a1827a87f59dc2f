//! Time utilities.
//!
//! All timestamps in the collector are **microseconds since Unix epoch**.
//! Exchange-supplied ISO-8601 strings are parsed at the precision the
//! exchange actually provides (Coinbase: microseconds, BitMEX: milliseconds)
//! and scaled to microseconds.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::DateTime;

use crate::error::MdcError;

/// Current wall-clock time as **microseconds** since Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_secs() * 1_000_000 + u64::from(d.subsec_micros())
}

/// Current wall-clock time as **milliseconds** since Unix epoch.
#[inline]
pub fn now_ms() -> u64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_secs() * 1_000 + u64::from(d.subsec_millis())
}

/// Current wall-clock time as **seconds** since Unix epoch.
#[inline]
pub fn now_s() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Parse an ISO-8601 timestamp (`2022-01-02T03:04:05.678901Z`) into
/// microseconds since Unix epoch, keeping the full fractional precision.
pub fn parse_iso_us(iso_time: &str) -> Result<u64, MdcError> {
    let dt = DateTime::parse_from_rfc3339(iso_time)
        .map_err(|e| MdcError::Parse(format!("bad ISO timestamp {iso_time:?}: {e}")))?;
    dt.timestamp_micros()
        .try_into()
        .map_err(|_| MdcError::Parse(format!("ISO timestamp out of range: {iso_time:?}")))
}

/// Parse an ISO-8601 timestamp carrying millisecond precision
/// (`2022-01-02T03:04:05.678Z`) into microseconds since Unix epoch.
///
/// The fractional part is truncated to milliseconds before scaling, so a
/// higher-precision input does not leak sub-millisecond digits.
pub fn parse_iso_ms(iso_time: &str) -> Result<u64, MdcError> {
    let dt = DateTime::parse_from_rfc3339(iso_time)
        .map_err(|e| MdcError::Parse(format!("bad ISO timestamp {iso_time:?}: {e}")))?;
    u64::try_from(dt.timestamp_millis())
        .map(|ms| ms * 1_000)
        .map_err(|_| MdcError::Parse(format!("ISO timestamp out of range: {iso_time:?}")))
}
