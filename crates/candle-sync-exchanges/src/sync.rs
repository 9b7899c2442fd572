use std::path::PathBuf;

use candle_sync_core::candle::human;
use candle_sync_core::error::CoreError;
use candle_sync_core::instrument::{ContractType, Instrument};
use candle_sync_core::series::merge_series;
use candle_sync_core::store::{SeriesKey, SeriesStore};
use candle_sync_core::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{StoragePhase, SyncError};
use crate::exchange::Exchange;
use crate::pagination::{FetchPolicy, PageRequest, StopReason, paginate};
use crate::resume;

/// Everything a run needs, built once at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub instruments: Vec<Instrument>,
    pub timeframe: Timeframe,
    /// Start used for series with no stored candles.
    pub since: String,
    /// Stop fetching a series after this many new rows.
    pub limit: Option<usize>,
    pub policy: FetchPolicy,
}

/// Result of syncing one series.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub key: SeriesKey,
    pub path: PathBuf,
    /// Rows received from the exchange this run.
    pub fetched: usize,
    /// Rows in the stored series after the run.
    pub rows: usize,
    /// Whether the stored series was rewritten.
    pub written: bool,
    pub stop: StopReason,
}

/// Bring one instrument's series up to date: look it up, resume after the
/// last stored bar, page through new candles and merge them into the store.
///
/// Nothing is written unless new rows arrived, and only after pagination
/// has finished.
pub async fn sync_instrument(
    exchange: &dyn Exchange,
    store: &SeriesStore,
    instrument: &Instrument,
    config: &SyncConfig,
    fallback: DateTime<Utc>,
) -> Result<SyncReport, SyncError> {
    let timeframe = config.timeframe;
    let label = format!("{instrument} {timeframe}");

    let metadata = exchange
        .instrument_metadata(instrument)
        .await
        .map_err(|source| SyncError::Exchange {
            instrument: instrument.to_string(),
            timeframe,
            source,
        })?;
    if metadata.contract_type != ContractType::Perpetual {
        warn!(
            "{instrument} is a {} instrument on {}, not a perpetual swap",
            metadata.contract_type,
            exchange.id()
        );
    }

    let storage_error = |phase: StoragePhase, source: CoreError| SyncError::Storage {
        instrument: instrument.to_string(),
        timeframe,
        phase,
        source,
    };

    let key = SeriesKey::new(exchange.id().as_str(), timeframe, &metadata);
    let path = store.series_path(&key);
    let existing = store
        .read_series(&key)
        .map_err(|e| storage_error(StoragePhase::Read, e))?;

    let start = resume::plan(&existing, fallback);
    if start.resumed {
        info!("[{label}] resume from {}", human(&start.cursor));
    } else {
        info!("[{label}] start from {}", human(&start.cursor));
    }

    let outcome = paginate(
        exchange,
        &PageRequest {
            instrument,
            timeframe,
            since: start.cursor,
            limit: config.limit,
        },
        &config.policy,
    )
    .await;

    let fetched = outcome.candles.len();
    if fetched == 0 {
        info!("[{label}] nothing new to save");
        return Ok(SyncReport {
            key,
            path,
            fetched,
            rows: existing.len(),
            written: false,
            stop: outcome.stop,
        });
    }

    let merged = merge_series(existing, outcome.candles);
    store
        .write_series(&key, &merged)
        .map_err(|e| storage_error(StoragePhase::Write, e))?;
    info!("[{label}] saved {} rows -> {}", merged.len(), path.display());

    Ok(SyncReport {
        key,
        path,
        fetched,
        rows: merged.len(),
        written: true,
        stop: outcome.stop,
    })
}

/// Sync every configured instrument in turn.
///
/// An unparseable start aborts before any instrument is touched. After
/// that, a failing instrument is logged and the run moves on to the next.
pub async fn sync_all(
    exchange: &dyn Exchange,
    store: &SeriesStore,
    config: &SyncConfig,
) -> Result<Vec<(Instrument, Result<SyncReport, SyncError>)>, SyncError> {
    let fallback = resume::parse_start(&config.since, exchange)?;

    let mut results = Vec::with_capacity(config.instruments.len());
    for instrument in &config.instruments {
        let result = sync_instrument(exchange, store, instrument, config, fallback).await;
        if let Err(e) = &result {
            error!("{e}");
        }
        results.push((instrument.clone(), result));
    }

    Ok(results)
}
