//! Human-readable durations used throughout the config ("500ms", "5s", "1m").

use std::time::Duration;

use crate::error::ConfigError;

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Like [`parse_duration`], but reports which field was malformed.
pub fn require_duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// A duration that drives a timer loop; zero is rejected.
pub fn require_period(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let period = require_duration(field, value)?;
    if period.is_zero() {
        return Err(ConfigError::ZeroDuration { field });
    }
    Ok(period)
}

/// Parse a period, treating zero and malformed values as unset.
pub fn parse_period(s: &str) -> Option<Duration> {
    parse_duration(s).filter(|d| !d.is_zero())
}
