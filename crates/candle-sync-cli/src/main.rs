use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_sync_core::candle::human;
use candle_sync_core::instrument::Instrument;
use candle_sync_core::series::first_disorder;
use candle_sync_core::store::SeriesStore;
use candle_sync_core::timeframe::Timeframe;
use candle_sync_exchanges::binance_usdm::BinanceUsdm;
use candle_sync_exchanges::exchange::{Exchange, ExchangeId};
use candle_sync_exchanges::okx::Okx;
use candle_sync_exchanges::pagination::FetchPolicy;
use candle_sync_exchanges::sync::{SyncConfig, sync_all};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "candle-sync",
    about = "Incrementally download exchange OHLCV history to Parquet"
)]
struct Cli {
    /// Root directory for series tables
    #[arg(long, env = "DATA_DIR", default_value = "data/raw")]
    data_dir: PathBuf,

    /// Exchange: binanceusdm, okx
    #[arg(long, env = "EXCHANGE", default_value = "binanceusdm")]
    exchange: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new candles for instruments, resuming from stored data
    Sync {
        /// Unified symbols to fetch (comma-separated), e.g. BTC/USDT:USDT
        #[arg(
            short,
            long,
            env = "SYMBOLS",
            value_delimiter = ',',
            default_value = "BTC/USDT:USDT,ETH/USDT:USDT"
        )]
        symbols: Vec<String>,

        /// Candle timeframe: 1m, 5m, 15m, 1h, 4h, 1d ...
        #[arg(short, long, env = "TIMEFRAME", default_value = "1m")]
        timeframe: String,

        /// ISO date (YYYY-MM-DD) or full timestamp; ignored for series that already exist
        #[arg(long, env = "SINCE", default_value = "2021-01-01")]
        since: String,

        /// Stop after this many new rows per instrument
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the series present in the store
    Status,

    /// Check stored series for ordering problems
    Validate,
}

fn create_exchange(id: ExchangeId) -> Box<dyn Exchange> {
    match id {
        ExchangeId::BinanceUsdm => Box::new(BinanceUsdm::new()),
        ExchangeId::Okx => Box::new(Okx::new()),
    }
}

fn build_config(
    symbols: &[String],
    timeframe: &str,
    since: &str,
    limit: Option<usize>,
) -> Result<SyncConfig> {
    let instruments = symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Instrument>())
        .collect::<Result<Vec<_>, _>>()?;
    if instruments.is_empty() {
        anyhow::bail!("no symbols given");
    }

    Ok(SyncConfig {
        instruments,
        timeframe: timeframe.parse::<Timeframe>()?,
        since: since.to_string(),
        limit,
        policy: FetchPolicy::default(),
    })
}

async fn cmd_sync(store: &SeriesStore, exchange_id: ExchangeId, config: &SyncConfig) -> Result<()> {
    let exchange = create_exchange(exchange_id);
    info!(
        "Using exchange {} ({} instrument(s), {})",
        exchange.id(),
        config.instruments.len(),
        config.timeframe
    );

    let results = sync_all(exchange.as_ref(), store, config).await?;

    let mut failed = 0;
    for (instrument, result) in &results {
        match result {
            Ok(report) => info!(
                "{instrument}: +{} fetched, {} rows in {}",
                report.fetched,
                report.rows,
                report.path.display()
            ),
            Err(e) => {
                warn!("{instrument}: skipped: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        warn!("{failed} of {} instrument(s) failed", results.len());
    }

    Ok(())
}

fn cmd_status(store: &SeriesStore) -> Result<()> {
    let series = store.list_series().context("failed to list series")?;

    if series.is_empty() {
        println!("No data in store.");
        return Ok(());
    }

    for entry in &series {
        let name = format!("{}/{}/{}", entry.exchange, entry.timeframe, entry.name);
        let candles = match store.read_path(&entry.path) {
            Ok(candles) => candles,
            Err(e) => {
                println!("{name}: unreadable: {e}");
                continue;
            }
        };

        match (candles.first(), candles.last()) {
            (Some(first), Some(last)) => println!(
                "{name}: {} row(s), {} to {}",
                candles.len(),
                human(&first.timestamp),
                human(&last.timestamp)
            ),
            _ => println!("{name}: no rows"),
        }
    }

    Ok(())
}

fn cmd_validate(store: &SeriesStore) -> Result<()> {
    let series = store.list_series().context("failed to list series")?;

    if series.is_empty() {
        println!("No data to validate.");
        return Ok(());
    }

    let mut issues = 0;

    for entry in &series {
        let name = format!("{}/{}/{}", entry.exchange, entry.timeframe, entry.name);
        match store.read_path(&entry.path) {
            Ok(candles) => {
                if candles.is_empty() {
                    println!("WARN: {name}: empty table");
                    issues += 1;
                    continue;
                }

                if let Some(i) = first_disorder(&candles) {
                    println!("WARN: {name}: timestamps not strictly ascending at row {i}");
                    issues += 1;
                }

                let inverted = candles.iter().filter(|c| c.high < c.low).count();
                if inverted > 0 {
                    println!("WARN: {name}: {inverted} candle(s) with high below low");
                    issues += 1;
                }
            }
            Err(e) => {
                println!("ERROR: {name}: failed to read: {e}");
                issues += 1;
            }
        }
    }

    if issues == 0 {
        println!("All series valid.");
    } else {
        println!("{issues} issue(s) found.");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let store = SeriesStore::new(&cli.data_dir);

    match &cli.command {
        Commands::Sync {
            symbols,
            timeframe,
            since,
            limit,
        } => {
            let exchange_id: ExchangeId = cli.exchange.parse()?;
            let config = build_config(symbols, timeframe, since, *limit)?;
            cmd_sync(&store, exchange_id, &config).await?;
        }
        Commands::Status => cmd_status(&store)?,
        Commands::Validate => cmd_validate(&store)?,
    }

    Ok(())
}
