use std::time::Duration;

use async_trait::async_trait;
use candle_sync_core::candle::Candle;
use candle_sync_core::instrument::{ContractType, Instrument, InstrumentMetadata};
use candle_sync_core::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::debug;

use crate::error::ExchangeError;
use crate::exchange::{Exchange, ExchangeId, status_error};

const OKX_BASE_URL: &str = "https://www.okx.com";
const HISTORY_CANDLES_PATH: &str = "/api/v5/market/history-candles";
const INSTRUMENTS_PATH: &str = "/api/v5/public/instruments";

/// `history-candles` returns at most 100 rows per request.
pub const OKX_MAX_PAGE: usize = 100;

/// OKX returns this code when the request rate is exceeded.
const RATE_LIMIT_CODE: &str = "50011";

/// OKX public market data.
pub struct Okx {
    client: Client,
    base_url: String,
}

impl Okx {
    pub fn new() -> Self {
        Self::with_base_url(OKX_BASE_URL.to_string())
    }

    /// Create with a custom base URL (for testing).
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Exchange instrument id: `BTC-USDT-SWAP` for swaps, `BTC-USDT` for spot.
    pub fn inst_id(instrument: &Instrument) -> String {
        if instrument.is_swap() {
            format!("{}-{}-SWAP", instrument.base, instrument.quote)
        } else {
            format!("{}-{}", instrument.base, instrument.quote)
        }
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {url} {query:?}");

        let response = self.client.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: OkxResponse<T> = response
            .json()
            .await
            .map_err(|e| ExchangeError::Parse(format!("failed to parse response: {e}")))?;

        match body.code.as_str() {
            "0" => Ok(body.data),
            RATE_LIMIT_CODE => Err(ExchangeError::RateLimited {
                retry_after_secs: 1,
            }),
            _ => Err(ExchangeError::Rejected {
                code: body.code,
                message: body.msg,
            }),
        }
    }
}

impl Default for Okx {
    fn default() -> Self {
        Self::new()
    }
}

/// Candle interval as OKX spells it. Daily and longer bars use the UTC
/// variants so they align with midnight UTC rather than Hong Kong time.
fn okx_bar(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M3 => "3m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::M30 => "30m",
        Timeframe::H1 => "1H",
        Timeframe::H2 => "2H",
        Timeframe::H4 => "4H",
        Timeframe::H6 => "6Hutc",
        Timeframe::H12 => "12Hutc",
        Timeframe::D1 => "1Dutc",
        Timeframe::W1 => "1Wutc",
    }
}

#[derive(Debug, Deserialize)]
struct OkxResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxInstrument {
    inst_type: String,
    #[serde(default)]
    uly: String,
    #[serde(default)]
    base_ccy: String,
    #[serde(default)]
    quote_ccy: String,
}

impl OkxInstrument {
    fn metadata(&self, instrument: &Instrument) -> InstrumentMetadata {
        let contract_type = match self.inst_type.as_str() {
            "SWAP" => ContractType::Perpetual,
            "FUTURES" => ContractType::Delivery,
            _ => ContractType::Spot,
        };

        // Derivatives leave baseCcy/quoteCcy empty and name the pair in `uly`.
        let (base, quote) = match self.uly.split_once('-') {
            Some((base, quote)) if self.base_ccy.is_empty() => (base, quote),
            _ if !self.base_ccy.is_empty() => (self.base_ccy.as_str(), self.quote_ccy.as_str()),
            _ => (instrument.base.as_str(), instrument.quote.as_str()),
        };

        InstrumentMetadata {
            base: base.to_string(),
            quote: quote.to_string(),
            contract_type,
        }
    }
}

/// Parse one candle row: `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.
fn parse_candle(row: &[String]) -> Result<Candle, ExchangeError> {
    if row.len() < 6 {
        return Err(ExchangeError::Parse(format!(
            "expected at least 6 candle fields, got {}",
            row.len()
        )));
    }

    let millis: i64 = row[0]
        .parse()
        .map_err(|e| ExchangeError::Parse(format!("invalid candle ts '{}': {e}", row[0])))?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ExchangeError::Parse(format!("invalid candle ts: {millis}")))?;

    let field = |index: usize, name: &str| -> Result<Decimal, ExchangeError> {
        row[index]
            .parse()
            .map_err(|e| ExchangeError::Parse(format!("invalid candle {name} '{}': {e}", row[index])))
    };

    Ok(Candle {
        timestamp,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}

#[async_trait]
impl Exchange for Okx {
    fn id(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn max_page_size(&self) -> usize {
        OKX_MAX_PAGE
    }

    fn min_request_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    /// OKX pages backwards from `after`, newest first. Bounding the window
    /// to `limit` bars past `since` keeps the page anchored at the cursor.
    /// Empty windows that end before now are skipped, so a listing date or
    /// an outage after `since` does not read as the end of the history.
    async fn fetch_page(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        since: DateTime<Utc>,
        max_rows: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit = max_rows.clamp(1, OKX_MAX_PAGE);
        let inst_id = Self::inst_id(instrument);
        let window_ms = timeframe.duration().num_milliseconds() * limit as i64;
        let now_ms = Utc::now().timestamp_millis();
        let mut start_ms = since.timestamp_millis();

        loop {
            let end_ms = start_ms + window_ms;
            let rows: Vec<Vec<String>> = self
                .get_data(
                    HISTORY_CANDLES_PATH,
                    &[
                        ("instId", inst_id.clone()),
                        ("bar", okx_bar(timeframe).to_string()),
                        ("before", (start_ms - 1).to_string()),
                        ("after", end_ms.to_string()),
                        ("limit", limit.to_string()),
                    ],
                )
                .await?;

            if rows.is_empty() && end_ms < now_ms {
                debug!("{inst_id}: no bars before {end_ms}, moving window forward");
                start_ms = end_ms;
                sleep(self.min_request_interval()).await;
                continue;
            }

            let mut candles = rows
                .iter()
                .map(|row| parse_candle(row))
                .collect::<Result<Vec<_>, _>>()?;
            candles.sort_by_key(|c| c.timestamp);
            return Ok(candles);
        }
    }

    async fn instrument_metadata(
        &self,
        instrument: &Instrument,
    ) -> Result<InstrumentMetadata, ExchangeError> {
        let inst_type = if instrument.is_swap() { "SWAP" } else { "SPOT" };
        let instruments: Vec<OkxInstrument> = self
            .get_data(
                INSTRUMENTS_PATH,
                &[
                    ("instType", inst_type.to_string()),
                    ("instId", Self::inst_id(instrument)),
                ],
            )
            .await?;

        instruments
            .first()
            .map(|inst| inst.metadata(instrument))
            .ok_or_else(|| ExchangeError::UnknownInstrument(instrument.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn btc_swap() -> Instrument {
        "BTC/USDT:USDT".parse().unwrap()
    }

    fn row(ts: i64, close: &str) -> Vec<String> {
        [
            ts.to_string().as_str(),
            "29000.1",
            "29050.0",
            "28990.5",
            close,
            "120.5",
            "0.12",
            "3500000.0",
            "1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn inst_id_formats() {
        assert_eq!(Okx::inst_id(&btc_swap()), "BTC-USDT-SWAP");
        assert_eq!(Okx::inst_id(&"ETH/USDC".parse().unwrap()), "ETH-USDC");
    }

    #[test]
    fn bar_mapping_uses_utc_variants() {
        assert_eq!(okx_bar(Timeframe::M15), "15m");
        assert_eq!(okx_bar(Timeframe::H4), "4H");
        assert_eq!(okx_bar(Timeframe::D1), "1Dutc");
        assert_eq!(okx_bar(Timeframe::W1), "1Wutc");
    }

    #[test]
    fn parse_candle_row() {
        let candle = parse_candle(&row(1_609_459_200_000, "29010.0")).unwrap();
        assert_eq!(
            candle.timestamp,
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(candle.open, dec!(29000.1));
        assert_eq!(candle.close, dec!(29010.0));
        assert_eq!(candle.volume, dec!(120.5));
    }

    #[test]
    fn parse_candle_bad_price() {
        let mut bad = row(1_609_459_200_000, "29010.0");
        bad[2] = "abc".into();
        assert!(parse_candle(&bad).is_err());
    }

    #[tokio::test]
    async fn fetch_page_bounds_window_and_reverses() {
        let server = MockServer::start().await;
        // [since, since + 100 minutes) for 1m bars
        Mock::given(method("GET"))
            .and(path(HISTORY_CANDLES_PATH))
            .and(query_param("instId", "BTC-USDT-SWAP"))
            .and(query_param("bar", "1m"))
            .and(query_param("before", "1609459199999"))
            .and(query_param("after", "1609465200000"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "msg": "",
                "data": [row(1_609_459_260_000, "2.0"), row(1_609_459_200_000, "1.0")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = Okx::with_base_url(server.uri());
        let since = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let page = exchange
            .fetch_page(&btc_swap(), Timeframe::M1, since, 1500)
            .await
            .unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(page[0].close, dec!(1.0));
        assert_eq!(page[1].close, dec!(2.0));
    }

    #[tokio::test]
    async fn fetch_page_skips_empty_windows() {
        let server = MockServer::start().await;
        let empty = json!({"code": "0", "msg": "", "data": []});
        // nothing listed until 200 minutes after the cursor
        for after in ["1609465200000", "1609471200000"] {
            Mock::given(method("GET"))
                .and(path(HISTORY_CANDLES_PATH))
                .and(query_param("after", after))
                .respond_with(ResponseTemplate::new(200).set_body_json(empty.clone()))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(HISTORY_CANDLES_PATH))
            .and(query_param("before", "1609471199999"))
            .and(query_param("after", "1609477200000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "msg": "",
                "data": [row(1_609_471_260_000, "2.0"), row(1_609_471_200_000, "1.0")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = Okx::with_base_url(server.uri());
        let since = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let page = exchange
            .fetch_page(&btc_swap(), Timeframe::M1, since, 100)
            .await
            .unwrap();

        assert_eq!(page.len(), 2);
        assert_eq!(
            page[0].timestamp,
            Utc.with_ymd_and_hms(2021, 1, 1, 3, 20, 0).unwrap()
        );
        assert_eq!(page[1].close, dec!(2.0));
    }

    #[tokio::test]
    async fn empty_window_reaching_now_is_end_of_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HISTORY_CANDLES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "msg": "",
                "data": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchange = Okx::with_base_url(server.uri());
        let since = Utc::now() - chrono::TimeDelta::minutes(10);
        let page = exchange
            .fetch_page(&btc_swap(), Timeframe::M1, since, 100)
            .await
            .unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn error_code_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HISTORY_CANDLES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "51001",
                "msg": "Instrument ID does not exist",
                "data": []
            })))
            .mount(&server)
            .await;

        let exchange = Okx::with_base_url(server.uri());
        let err = exchange
            .fetch_page(&btc_swap(), Timeframe::M1, Utc::now(), 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected { ref code, .. } if code == "51001"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn rate_limit_code_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HISTORY_CANDLES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "50011",
                "msg": "Too Many Requests",
                "data": []
            })))
            .mount(&server)
            .await;

        let exchange = Okx::with_base_url(server.uri());
        let err = exchange
            .fetch_page(&btc_swap(), Timeframe::M1, Utc::now(), 100)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn swap_metadata_from_underlying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTRUMENTS_PATH))
            .and(query_param("instType", "SWAP"))
            .and(query_param("instId", "BTC-USDT-SWAP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "msg": "",
                "data": [{
                    "instType": "SWAP",
                    "instId": "BTC-USDT-SWAP",
                    "uly": "BTC-USDT",
                    "baseCcy": "",
                    "quoteCcy": "",
                    "settleCcy": "USDT",
                    "ctType": "linear"
                }]
            })))
            .mount(&server)
            .await;

        let exchange = Okx::with_base_url(server.uri());
        let metadata = exchange.instrument_metadata(&btc_swap()).await.unwrap();
        assert_eq!(
            metadata,
            InstrumentMetadata {
                base: "BTC".into(),
                quote: "USDT".into(),
                contract_type: ContractType::Perpetual,
            }
        );
    }

    #[tokio::test]
    async fn unknown_instrument_when_no_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(INSTRUMENTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "msg": "",
                "data": []
            })))
            .mount(&server)
            .await;

        let exchange = Okx::with_base_url(server.uri());
        let err = exchange
            .instrument_metadata(&"FOO/USDT:USDT".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownInstrument(_)));
    }
}
