use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::candle::Candle;

/// Merge freshly fetched candles into a stored series.
///
/// Rows are concatenated (`existing` then `fresh`), deduplicated by
/// timestamp with the later row winning, and returned in ascending order.
/// A bar the exchange revised after it was stored is therefore replaced by
/// the revised value.
pub fn merge_series(existing: Vec<Candle>, fresh: Vec<Candle>) -> Vec<Candle> {
    let mut by_timestamp: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    for candle in existing.into_iter().chain(fresh) {
        by_timestamp.insert(candle.timestamp, candle);
    }
    by_timestamp.into_values().collect()
}

/// Index of the first candle whose timestamp is not strictly greater than
/// its predecessor's, or `None` if the series is well-ordered.
pub fn first_disorder(candles: &[Candle]) -> Option<usize> {
    candles
        .windows(2)
        .position(|pair| pair[1].timestamp <= pair[0].timestamp)
        .map(|i| i + 1)
}
