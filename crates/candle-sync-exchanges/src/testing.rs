//! In-memory exchange replaying a fixed script of page responses.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use candle_sync_core::candle::Candle;
use candle_sync_core::instrument::{ContractType, Instrument, InstrumentMetadata};
use candle_sync_core::timeframe::Timeframe;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::exchange::{Exchange, ExchangeId};

pub(crate) struct ScriptedExchange {
    script: Mutex<VecDeque<Result<Vec<Candle>, ExchangeError>>>,
    requests: Mutex<Vec<DateTime<Utc>>>,
    contract_type: ContractType,
    max_page_size: usize,
}

impl ScriptedExchange {
    pub(crate) fn new(script: Vec<Result<Vec<Candle>, ExchangeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            contract_type: ContractType::Perpetual,
            max_page_size: 500,
        }
    }

    pub(crate) fn with_contract_type(mut self, contract_type: ContractType) -> Self {
        self.contract_type = contract_type;
        self
    }

    /// Cursor of every `fetch_page` call, in order.
    pub(crate) fn requests(&self) -> Vec<DateTime<Utc>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    fn id(&self) -> ExchangeId {
        ExchangeId::BinanceUsdm
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    fn min_request_interval(&self) -> Duration {
        Duration::ZERO
    }

    async fn fetch_page(
        &self,
        _instrument: &Instrument,
        _timeframe: Timeframe,
        since: DateTime<Utc>,
        _max_rows: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.requests.lock().unwrap().push(since);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn instrument_metadata(
        &self,
        instrument: &Instrument,
    ) -> Result<InstrumentMetadata, ExchangeError> {
        Ok(InstrumentMetadata {
            base: instrument.base.clone(),
            quote: instrument.quote.clone(),
            contract_type: self.contract_type,
        })
    }
}

pub(crate) fn minute(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(n)
}

pub(crate) fn candle(at: DateTime<Utc>, close: Decimal) -> Candle {
    Candle {
        timestamp: at,
        open: close,
        high: close,
        low: close,
        close,
        volume: Decimal::ONE,
    }
}

/// `len` one-minute candles starting `offset` minutes after 2021-01-01.
pub(crate) fn page(offset: i64, len: i64) -> Vec<Candle> {
    (offset..offset + len)
        .map(|n| candle(minute(n), Decimal::from(n)))
        .collect()
}
