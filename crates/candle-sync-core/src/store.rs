use std::path::{Path, PathBuf};

use crate::candle::Candle;
use crate::error::CoreError;
use crate::instrument::{ContractType, InstrumentMetadata};
use crate::schema;
use crate::timeframe::Timeframe;

/// Identity of one stored series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub exchange: String,
    pub timeframe: Timeframe,
    pub base: String,
    pub quote: String,
    pub contract_type: ContractType,
}

impl SeriesKey {
    pub fn new(exchange: &str, timeframe: Timeframe, metadata: &InstrumentMetadata) -> Self {
        Self {
            exchange: exchange.to_string(),
            timeframe,
            base: metadata.base.clone(),
            quote: metadata.quote.clone(),
            contract_type: metadata.contract_type,
        }
    }

    /// File name of the series table, e.g. `BTCUSDT_perp_1m.parquet`.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}_{}_{}.parquet",
            self.base, self.quote, self.contract_type, self.timeframe
        )
    }
}

/// A series table found on disk while walking the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSeries {
    pub exchange: String,
    pub timeframe: String,
    pub name: String,
    pub path: PathBuf,
}

/// Filesystem-backed store holding one Parquet table per series.
///
/// Directory layout: `{data_dir}/{exchange}/{timeframe}/{BASE}{QUOTE}_{contract}_{timeframe}.parquet`
pub struct SeriesStore {
    data_dir: PathBuf,
}

impl SeriesStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Path to the Parquet table for a series.
    pub fn series_path(&self, key: &SeriesKey) -> PathBuf {
        self.data_dir
            .join(&key.exchange)
            .join(key.timeframe.as_str())
            .join(key.file_name())
    }

    /// Read the stored series. A missing table is an empty series.
    pub fn read_series(&self, key: &SeriesKey) -> Result<Vec<Candle>, CoreError> {
        let path = self.series_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        schema::read_parquet(&path)
    }

    /// Replace the stored series wholesale.
    ///
    /// The table is written and synced to a sibling temporary file, then
    /// renamed over the target, so readers see either the old table or the
    /// new one.
    pub fn write_series(&self, key: &SeriesKey, candles: &[Candle]) -> Result<(), CoreError> {
        let path = self.series_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = path.with_extension("parquet.tmp");
        if let Err(e) = schema::write_parquet(&tmp_path, candles) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn read_path(&self, path: &Path) -> Result<Vec<Candle>, CoreError> {
        schema::read_parquet(path)
    }

    /// List every series table in the store, sorted by exchange, timeframe, name.
    pub fn list_series(&self) -> Result<Vec<StoredSeries>, CoreError> {
        if !self.data_dir.exists() {
            return Ok(Vec::new());
        }

        let mut series = Vec::new();
        for exchange_entry in std::fs::read_dir(&self.data_dir)? {
            let exchange_entry = exchange_entry?;
            if !exchange_entry.file_type()?.is_dir() {
                continue;
            }
            let exchange = exchange_entry.file_name().to_string_lossy().into_owned();

            for timeframe_entry in std::fs::read_dir(exchange_entry.path())? {
                let timeframe_entry = timeframe_entry?;
                if !timeframe_entry.file_type()?.is_dir() {
                    continue;
                }
                let timeframe = timeframe_entry.file_name().to_string_lossy().into_owned();

                for file_entry in std::fs::read_dir(timeframe_entry.path())? {
                    let file_entry = file_entry?;
                    let file_name = file_entry.file_name();
                    if let Some(name) = file_name.to_string_lossy().strip_suffix(".parquet") {
                        series.push(StoredSeries {
                            exchange: exchange.clone(),
                            timeframe: timeframe.clone(),
                            name: name.to_string(),
                            path: file_entry.path(),
                        });
                    }
                }
            }
        }

        series.sort_by(|a, b| {
            (&a.exchange, &a.timeframe, &a.name).cmp(&(&b.exchange, &b.timeframe, &b.name))
        });
        Ok(series)
    }
}
