use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// A single OHLCV candle. Timestamps carry millisecond precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Format a timestamp the way progress lines print it.
pub fn human(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}
