use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A unified instrument symbol: `BASE/QUOTE` for spot, `BASE/QUOTE:SETTLE`
/// for a margined swap (e.g. `BTC/USDT:USDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub base: String,
    pub quote: String,
    pub settle: Option<String>,
}

impl Instrument {
    pub fn is_swap(&self) -> bool {
        self.settle.is_some()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)?;
        if let Some(settle) = &self.settle {
            write!(f, ":{settle}")?;
        }
        Ok(())
    }
}

impl FromStr for Instrument {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidInstrument(s.to_string());

        let (pair, settle) = match s.trim().split_once(':') {
            Some((pair, settle)) => (pair, Some(settle)),
            None => (s.trim(), None),
        };
        let (base, quote) = pair.split_once('/').ok_or_else(invalid)?;

        let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) || settle.is_some_and(|s| !valid(s)) {
            return Err(invalid());
        }

        Ok(Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
            settle: settle.map(str::to_uppercase),
        })
    }
}

/// How an instrument settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractType {
    Perpetual,
    Delivery,
    Spot,
}

impl ContractType {
    /// Short tag used in series file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Perpetual => "perp",
            ContractType::Delivery => "delivery",
            ContractType::Spot => "spot",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange-reported identity of an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentMetadata {
    pub base: String,
    pub quote: String,
    pub contract_type: ContractType,
}
