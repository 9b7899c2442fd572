use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;

use crate::candle::Candle;
use crate::error::CoreError;

const PRICE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Series table layout: a millisecond UTC timestamp followed by the five
/// OHLCV values stored as decimal strings so no precision is lost.
pub fn candle_schema() -> Schema {
    let mut fields = vec![Field::new(
        "timestamp",
        DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
        false,
    )];
    fields.extend(
        PRICE_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, false)),
    );
    Schema::new(fields)
}

pub fn candles_to_record_batch(candles: &[Candle]) -> Result<RecordBatch, CoreError> {
    let schema = Arc::new(candle_schema());

    let timestamps: Vec<i64> = candles
        .iter()
        .map(|c| c.timestamp.timestamp_millis())
        .collect();

    let decimal_column = |value: fn(&Candle) -> Decimal| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(
            candles.iter().map(|c| value(c).to_string()),
        ))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(timestamps).with_timezone("UTC")),
        decimal_column(|c| c.open),
        decimal_column(|c| c.high),
        decimal_column(|c| c.low),
        decimal_column(|c| c.close),
        decimal_column(|c| c.volume),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

fn string_column<'a>(batch: &'a RecordBatch, index: usize) -> Result<&'a StringArray, CoreError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| {
            CoreError::InvalidData(format!("expected {} column", PRICE_COLUMNS[index - 1]))
        })
}

fn decimal_at(column: &StringArray, row: usize, name: &str) -> Result<Decimal, CoreError> {
    column
        .value(row)
        .parse()
        .map_err(|e| CoreError::InvalidData(format!("invalid {name} at row {row}: {e}")))
}

pub fn record_batch_to_candles(batch: &RecordBatch) -> Result<Vec<Candle>, CoreError> {
    if batch.num_columns() != PRICE_COLUMNS.len() + 1 {
        return Err(CoreError::InvalidData(format!(
            "expected {} columns, found {}",
            PRICE_COLUMNS.len() + 1,
            batch.num_columns()
        )));
    }

    let timestamps = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .ok_or_else(|| CoreError::InvalidData("expected timestamp column".into()))?;

    let opens = string_column(batch, 1)?;
    let highs = string_column(batch, 2)?;
    let lows = string_column(batch, 3)?;
    let closes = string_column(batch, 4)?;
    let volumes = string_column(batch, 5)?;

    let mut candles = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if timestamps.is_null(i) {
            return Err(CoreError::InvalidData(format!("null timestamp at row {i}")));
        }
        let millis = timestamps.value(i);
        let timestamp = chrono::DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| CoreError::InvalidData(format!("invalid timestamp: {millis}")))?;

        candles.push(Candle {
            timestamp,
            open: decimal_at(opens, i, "open")?,
            high: decimal_at(highs, i, "high")?,
            low: decimal_at(lows, i, "low")?,
            close: decimal_at(closes, i, "close")?,
            volume: decimal_at(volumes, i, "volume")?,
        });
    }

    Ok(candles)
}

/// Write `candles` as a single-batch table and flush it to disk.
pub fn write_parquet(path: &Path, candles: &[Candle]) -> Result<(), CoreError> {
    let batch = candles_to_record_batch(candles)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    let file = writer.into_inner()?;
    file.sync_all()?;

    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<Vec<Candle>, CoreError> {
    let file = std::fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut all_candles = Vec::new();
    for batch in reader {
        let mut candles = record_batch_to_candles(&batch?)?;
        all_candles.append(&mut candles);
    }

    Ok(all_candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn sample_candles() -> Vec<Candle> {
        vec![
            Candle {
                timestamp: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
                open: dec!(28923.63),
                high: dec!(28961.66),
                low: dec!(28913.12),
                close: dec!(28961.66),
                volume: dec!(27.457032),
            },
            Candle {
                timestamp: Utc.with_ymd_and_hms(2021, 1, 1, 0, 1, 0).unwrap(),
                open: dec!(28961.67),
                high: dec!(29017.50),
                low: dec!(28961.01),
                close: dec!(29009.91),
                volume: dec!(58.477501),
            },
        ]
    }

    #[test]
    fn record_batch_roundtrip() {
        let candles = sample_candles();
        let batch = candles_to_record_batch(&candles).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(record_batch_to_candles(&batch).unwrap(), candles);
    }

    #[test]
    fn parquet_file_roundtrip() {
        let candles = sample_candles();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.parquet");

        write_parquet(&path, &candles).unwrap();
        assert_eq!(read_parquet(&path).unwrap(), candles);
    }

    #[test]
    fn millisecond_timestamps_preserved() {
        let candle = Candle {
            timestamp: chrono::DateTime::from_timestamp_millis(1_609_459_200_123).unwrap(),
            ..sample_candles()[0].clone()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ms.parquet");

        write_parquet(&path, &[candle.clone()]).unwrap();
        let result = read_parquet(&path).unwrap();
        assert_eq!(result[0].timestamp.timestamp_millis(), 1_609_459_200_123);
    }

    #[test]
    fn decimal_precision_preserved() {
        let candle = Candle {
            timestamp: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            open: dec!(0.00001234),
            high: dec!(0.00001300),
            low: dec!(0.00001200),
            close: dec!(0.00001299),
            volume: dec!(123456789.000001),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("precision.parquet");

        write_parquet(&path, &[candle.clone()]).unwrap();
        let result = read_parquet(&path).unwrap();

        assert_eq!(result[0].open, dec!(0.00001234));
        assert_eq!(result[0].high, dec!(0.00001300));
        assert_eq!(result[0].volume, dec!(123456789.000001));
    }

    #[test]
    fn schema_column_names() {
        let schema = candle_schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["timestamp", "open", "high", "low", "close", "volume"]);
    }
}
