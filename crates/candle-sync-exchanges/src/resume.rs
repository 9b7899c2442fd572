use candle_sync_core::candle::Candle;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::error::SyncError;
use crate::exchange::Exchange;

/// Where a run starts fetching for one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub cursor: DateTime<Utc>,
    /// True when the cursor was derived from stored candles.
    pub resumed: bool,
}

/// Compute the cursor for a series: one millisecond past the last stored
/// bar, or `fallback` when nothing is stored yet.
pub fn plan(series: &[Candle], fallback: DateTime<Utc>) -> ResumePoint {
    match series.last() {
        Some(last) => ResumePoint {
            cursor: last.timestamp + TimeDelta::milliseconds(1),
            resumed: true,
        },
        None => ResumePoint {
            cursor: fallback,
            resumed: false,
        },
    }
}

/// Parse the user-supplied start instant.
///
/// Accepts a calendar date (midnight UTC), an ISO local date-time taken as
/// UTC, or any full timestamp the exchange itself understands.
pub fn parse_start(input: &str, exchange: &dyn Exchange) -> Result<DateTime<Utc>, SyncError> {
    let trimmed = input.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    exchange.parse_timestamp(trimmed).map_err(|_| {
        SyncError::Configuration(format!(
            "invalid start '{input}': provide an ISO date 'YYYY-MM-DD' or a full timestamp"
        ))
    })
}
