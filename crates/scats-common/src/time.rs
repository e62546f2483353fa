//! Timestamp helpers
//!
//! Transis stamps every detector-count message with a local time carrying an
//! explicit UTC offset, e.g. `2019-10-03T15:43:00+10:00`. Downstream consumers
//! want plain epoch seconds.

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{CommonError, Result};

/// Parse an offset timestamp (`YYYY-MM-DDTHH:MM:SS±HH:MM`, fractional seconds allowed)
pub fn parse_timestamp(value: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value.trim()).map_err(|source| CommonError::InvalidTimestamp {
        value: value.to_string(),
        source,
    })
}

/// Convert an offset timestamp string to epoch seconds
pub fn epoch_from_timestamp(value: &str) -> Result<i64> {
    Ok(parse_timestamp(value)?.timestamp())
}

/// Format an instant as RFC 3339 with an explicit `+00:00` offset
///
/// Unlike Transis, which stamps local time, receive times are always UTC.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}
