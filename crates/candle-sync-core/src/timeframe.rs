use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;

use crate::error::CoreError;

/// Fixed duration spanned by each candle of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 12] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H12,
        Timeframe::D1,
        Timeframe::W1,
    ];

    /// Canonical short form, also used in directory and file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    pub fn duration(&self) -> TimeDelta {
        match self {
            Timeframe::M1 => TimeDelta::minutes(1),
            Timeframe::M3 => TimeDelta::minutes(3),
            Timeframe::M5 => TimeDelta::minutes(5),
            Timeframe::M15 => TimeDelta::minutes(15),
            Timeframe::M30 => TimeDelta::minutes(30),
            Timeframe::H1 => TimeDelta::hours(1),
            Timeframe::H2 => TimeDelta::hours(2),
            Timeframe::H4 => TimeDelta::hours(4),
            Timeframe::H6 => TimeDelta::hours(6),
            Timeframe::H12 => TimeDelta::hours(12),
            Timeframe::D1 => TimeDelta::days(1),
            Timeframe::W1 => TimeDelta::weeks(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == trimmed)
            .ok_or_else(|| CoreError::InvalidTimeframe(s.to_string()))
    }
}
