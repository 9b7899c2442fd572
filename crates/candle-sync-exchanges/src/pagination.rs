use std::time::Duration;

use candle_sync_core::candle::{Candle, human};
use candle_sync_core::instrument::Instrument;
use candle_sync_core::timeframe::Timeframe;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::exchange::Exchange;

/// Wait before retrying a request that failed with a transient error.
/// A longer `retry-after` from the exchange takes precedence.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Added to the exchange's minimum request interval between pages.
pub const RATE_LIMIT_MARGIN: Duration = Duration::from_millis(50);

/// Pacing and retry behaviour of the pagination loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub retry_backoff: Duration,
    pub rate_limit_margin: Duration,
    /// Consecutive transient failures tolerated at one cursor.
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            retry_backoff: RETRY_BACKOFF,
            rate_limit_margin: RATE_LIMIT_MARGIN,
            max_retries: None,
        }
    }
}

/// One pagination run over a single series.
#[derive(Debug, Clone)]
pub struct PageRequest<'a> {
    pub instrument: &'a Instrument,
    pub timeframe: Timeframe,
    pub since: DateTime<Utc>,
    /// Stop once at least this many rows were fetched.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The exchange returned an empty page.
    Exhausted,
    /// The row limit was reached.
    LimitReached,
    /// The exchange rejected a request; rows fetched before it are kept.
    ExchangeFailure(String),
}

#[derive(Debug, Clone)]
pub struct PaginationOutcome {
    /// Every row received, in request order.
    pub candles: Vec<Candle>,
    /// Cursor a follow-up run would start from.
    pub cursor: DateTime<Utc>,
    /// Requests issued, retries included.
    pub requests: usize,
    /// Backoff pauses taken after transient failures.
    pub retries: usize,
    pub stop: StopReason,
}

/// Page through an exchange's history starting at `request.since`.
///
/// Each page is requested at the current cursor and the cursor moves to one
/// millisecond past the last bar received. Exchange rejections end the run
/// without raising; whatever was fetched until then is still returned.
pub async fn paginate(
    exchange: &dyn Exchange,
    request: &PageRequest<'_>,
    policy: &FetchPolicy,
) -> PaginationOutcome {
    let label = format!("{} {}", request.instrument, request.timeframe);
    let page_size = exchange.max_page_size();
    let pause = exchange.min_request_interval() + policy.rate_limit_margin;

    let mut cursor = request.since;
    let mut candles = Vec::new();
    let mut requests = 0;
    let mut retries = 0;
    let mut failures_at_cursor = 0u32;

    let stop = loop {
        requests += 1;
        debug!("[{label}] requesting up to {page_size} rows from {}", human(&cursor));

        let page = match exchange
            .fetch_page(request.instrument, request.timeframe, cursor, page_size)
            .await
        {
            Ok(page) => page,
            Err(e) if e.is_transient() => {
                if let Some(max) = policy.max_retries
                    && failures_at_cursor >= max
                {
                    warn!("[{label}] giving up after {max} retries: {e}");
                    break StopReason::ExchangeFailure(format!(
                        "gave up after {max} retries: {e}"
                    ));
                }
                failures_at_cursor += 1;
                retries += 1;
                let wait = e
                    .retry_after()
                    .map_or(policy.retry_backoff, |after| after.max(policy.retry_backoff));
                warn!("[{label}] network error, retrying in {wait:?}: {e}");
                sleep(wait).await;
                continue;
            }
            Err(e) => {
                warn!("[{label}] exchange error, stopping: {e}");
                break StopReason::ExchangeFailure(e.to_string());
            }
        };
        failures_at_cursor = 0;

        let Some(last) = page.last() else {
            info!("[{label}] no more data from server");
            break StopReason::Exhausted;
        };

        let next = last.timestamp + TimeDelta::milliseconds(1);
        if next <= cursor {
            warn!(
                "[{label}] page ends at {} before cursor {}, stopping",
                human(&last.timestamp),
                human(&cursor)
            );
            break StopReason::Exhausted;
        }
        cursor = next;

        let added = page.len();
        candles.extend(page);
        info!("[{label}] +{added} rows up to {}", human(&cursor));

        if let Some(limit) = request.limit
            && candles.len() >= limit
        {
            info!("[{label}] hit row limit {limit}, stopping");
            break StopReason::LimitReached;
        }

        sleep(pause).await;
    };

    PaginationOutcome {
        candles,
        cursor,
        requests,
        retries,
        stop,
    }
}
