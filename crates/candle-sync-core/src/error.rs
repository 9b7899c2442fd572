use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid instrument '{0}': expected BASE/QUOTE or BASE/QUOTE:SETTLE")]
    InvalidInstrument(String),

    #[error("Unsupported timeframe '{0}'")]
    InvalidTimeframe(String),
}
