use std::fmt;
use std::time::Duration;

use candle_sync_core::error::CoreError;
use candle_sync_core::timeframe::Timeframe;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Exchange rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),
}

impl ExchangeError {
    /// Whether the failure is worth retrying with the same request.
    ///
    /// Connectivity problems, throttling and server-side errors are
    /// transient; rejections of the request itself are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ExchangeError::Network(_) | ExchangeError::RateLimited { .. } => true,
            ExchangeError::Api { status, .. } => *status >= 500,
            ExchangeError::Rejected { .. }
            | ExchangeError::Parse(_)
            | ExchangeError::UnknownInstrument(_) => false,
        }
    }

    /// Wait requested by the exchange before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExchangeError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

/// Which side of the store access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePhase {
    Read,
    Write,
}

impl fmt::Display for StoragePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoragePhase::Read => f.write_str("read"),
            StoragePhase::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{instrument} {timeframe}: instrument lookup failed: {source}")]
    Exchange {
        instrument: String,
        timeframe: Timeframe,
        source: ExchangeError,
    },

    #[error("{instrument} {timeframe}: failed to {phase} series: {source}")]
    Storage {
        instrument: String,
        timeframe: Timeframe,
        phase: StoragePhase,
        source: CoreError,
    },
}
