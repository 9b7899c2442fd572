use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use candle_sync_core::candle::Candle;
use candle_sync_core::instrument::{Instrument, InstrumentMetadata};
use candle_sync_core::timeframe::Timeframe;
use chrono::{DateTime, Utc};

use crate::error::{ExchangeError, SyncError};

/// Exchanges with a historical candle client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeId {
    /// Binance USDⓈ-M futures.
    BinanceUsdm,
    Okx,
}

impl ExchangeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::BinanceUsdm => "binanceusdm",
            ExchangeId::Okx => "okx",
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binanceusdm" => Ok(ExchangeId::BinanceUsdm),
            "okx" => Ok(ExchangeId::Okx),
            other => Err(SyncError::Configuration(format!(
                "unsupported exchange: '{other}'. Expected: binanceusdm, okx"
            ))),
        }
    }
}

/// Source of historical candles.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn id(&self) -> ExchangeId;

    /// Largest page a single `fetch_page` call may return.
    fn max_page_size(&self) -> usize;

    /// Minimum spacing between requests demanded by the exchange.
    fn min_request_interval(&self) -> Duration;

    /// Fetch up to `max_rows` candles with timestamps at or after `since`,
    /// sorted ascending. An empty page means no more data is available.
    async fn fetch_page(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        max_rows: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Look up how the exchange lists an instrument.
    async fn instrument_metadata(
        &self,
        instrument: &Instrument,
    ) -> Result<InstrumentMetadata, ExchangeError>;

    /// Parse a full timestamp string in the exchange's accepted format.
    fn parse_timestamp(&self, input: &str) -> Result<DateTime<Utc>, ExchangeError> {
        DateTime::parse_from_rfc3339(input.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ExchangeError::Parse(format!("invalid timestamp '{input}': {e}")))
    }
}

/// Classify a non-success HTTP response.
pub(crate) async fn status_error(response: reqwest::Response) -> ExchangeError {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return ExchangeError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    let body = response.text().await.unwrap_or_default();
    ExchangeError::Api {
        status: status.as_u16(),
        message: body,
    }
}
