use std::time::Duration;

use async_trait::async_trait;
use candle_sync_core::candle::Candle;
use candle_sync_core::instrument::{ContractType, Instrument, InstrumentMetadata};
use candle_sync_core::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::{Exchange, ExchangeId, status_error};

const BINANCE_USDM_BASE_URL: &str = "https://fapi.binance.com";
const KLINES_PATH: &str = "/fapi/v1/klines";
const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";

/// Rows per `/fapi/v1/klines` request.
pub const BINANCE_USDM_MAX_PAGE: usize = 1500;

/// Binance USDⓈ-M futures market data.
/// Public endpoints only, no authentication required.
pub struct BinanceUsdm {
    client: Client,
    base_url: String,
    symbols: OnceCell<Vec<BinanceSymbol>>,
}

impl BinanceUsdm {
    pub fn new() -> Self {
        Self::with_base_url(BINANCE_USDM_BASE_URL.to_string())
    }

    /// Create with a custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            symbols: OnceCell::new(),
        }
    }

    /// Exchange symbol for a unified instrument, e.g. `BTC/USDT:USDT` -> `BTCUSDT`.
    pub fn market_id(instrument: &Instrument) -> String {
        format!("{}{}", instrument.base, instrument.quote)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {url} {query:?}");

        let response = self.client.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(format!("failed to parse response: {e}")))
    }

    /// `exchangeInfo` is large, so it is fetched once per client.
    async fn symbols(&self) -> Result<&[BinanceSymbol], ExchangeError> {
        let symbols = self
            .symbols
            .get_or_try_init(|| async {
                let info: BinanceExchangeInfo = self.get_json(EXCHANGE_INFO_PATH, &[]).await?;
                Ok::<_, ExchangeError>(info.symbols)
            })
            .await?;
        Ok(symbols.as_slice())
    }
}

impl Default for BinanceUsdm {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct BinanceExchangeInfo {
    symbols: Vec<BinanceSymbol>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceSymbol {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    base_asset: String,
    quote_asset: String,
}

impl BinanceSymbol {
    fn metadata(&self) -> InstrumentMetadata {
        let contract_type = match self.contract_type.as_str() {
            "PERPETUAL" => ContractType::Perpetual,
            "" => ContractType::Spot,
            _ => ContractType::Delivery,
        };
        InstrumentMetadata {
            base: self.base_asset.clone(),
            quote: self.quote_asset.clone(),
            contract_type,
        }
    }
}

fn decimal_field(row: &[Value], index: usize, name: &str) -> Result<Decimal, ExchangeError> {
    row[index]
        .as_str()
        .ok_or_else(|| ExchangeError::Parse(format!("kline {name} is not a string")))?
        .parse()
        .map_err(|e| ExchangeError::Parse(format!("invalid kline {name}: {e}")))
}

/// Parse one kline row:
/// `[open_time, open, high, low, close, volume, close_time, quote_volume, trades, ...]`
fn parse_kline(row: &[Value]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Parse(format!(
            "expected at least 6 kline fields, got {}",
            row.len()
        )));
    }

    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| ExchangeError::Parse("invalid kline open time".into()))?;
    let timestamp = DateTime::from_timestamp_millis(open_time)
        .ok_or_else(|| ExchangeError::Parse(format!("invalid kline open time: {open_time}")))?;

    Ok(Candle {
        timestamp,
        open: decimal_field(row, 1, "open")?,
        high: decimal_field(row, 2, "high")?,
        low: decimal_field(row, 3, "low")?,
        close: decimal_field(row, 4, "close")?,
        volume: decimal_field(row, 5, "volume")?,
    })
}

#[async_trait]
impl Exchange for BinanceUsdm {
    fn id(&self) -> ExchangeId {
        ExchangeId::BinanceUsdm
    }

    fn max_page_size(&self) -> usize {
        BINANCE_USDM_MAX_PAGE
    }

    fn min_request_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn fetch_page(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        max_rows: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit = max_rows.min(BINANCE_USDM_MAX_PAGE);
        let rows: Vec<Vec<Value>> = self
            .get_json(
                KLINES_PATH,
                &[
                    ("symbol", Self::market_id(instrument)),
                    ("interval", timeframe.as_str().to_string()),
                    ("startTime", since.timestamp_millis().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let mut candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    async fn instrument_metadata(
        &self,
        instrument: &Instrument,
    ) -> Result<InstrumentMetadata, ExchangeError> {
        let market_id = Self::market_id(instrument);
        self.symbols()
            .await?
            .iter()
            .find(|s| s.symbol == market_id)
            .map(BinanceSymbol::metadata)
            .ok_or_else(|| ExchangeError::UnknownInstrument(instrument.to_string()))
    }
}
