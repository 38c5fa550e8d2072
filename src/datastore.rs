//! Historical datastore query interface.
//!
//! The engine is driven entirely through this narrow, read-only seam:
//! historical OHLCV for indicator warm-up, distinct option expiries,
//! per-second index ticks for the backtest day, and per-second option
//! ticks from a subscription timestamp. [`MemoryDatastore`] is the
//! in-process implementation used by backtest fixtures and tests;
//! production deployments implement the trait over their own store.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::models::{Candle, SecondTick};

/// Errors raised by datastore queries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatastoreError {
    /// The backing store failed to answer a query
    #[error("Datastore query failed: {context}")]
    Query {
        /// What was queried and why it failed
        context: String,
    },
}

impl DatastoreError {
    /// Create a query error
    pub fn query(context: impl Into<String>) -> Self {
        Self::Query {
            context: context.into(),
        }
    }
}

/// Read-only access to historical market data.
pub trait HistoricalDatastore {
    /// Up to `limit` candles for (symbol, timeframe) with
    /// `bucket_start < before`, ordered ascending by bucket start.
    fn candles(
        &self,
        symbol: &str,
        timeframe: u32,
        before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Candle>, DatastoreError>;

    /// Distinct option expiry dates for `underlying` on or after `from`,
    /// ascending.
    fn expiries(&self, underlying: &str, from: NaiveDate) -> Result<Vec<NaiveDate>, DatastoreError>;

    /// Per-second index ticks for the trading day, ordered by timestamp.
    /// Rows carry the intra-second OHLC, volume, and open interest.
    fn index_ticks(
        &self,
        day: NaiveDate,
        symbols: &[String],
    ) -> Result<Vec<SecondTick>, DatastoreError>;

    /// Per-second LTP ticks for one option ticker (compact form) on the
    /// trading day, with `timestamp >= from`, ordered ascending.
    fn option_ticks(
        &self,
        day: NaiveDate,
        ticker: &str,
        from: NaiveDateTime,
    ) -> Result<Vec<SecondTick>, DatastoreError>;
}

/// In-memory datastore for backtest fixtures and tests.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    candles: HashMap<(String, u32), Vec<Candle>>,
    expiries: HashMap<String, Vec<NaiveDate>>,
    index_ticks: HashMap<String, Vec<SecondTick>>,
    option_ticks: HashMap<String, Vec<SecondTick>>,
}

impl MemoryDatastore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert historical candles for a (symbol, timeframe) pair,
    /// keeping them sorted by bucket start.
    pub fn insert_candles(&mut self, symbol: &str, timeframe: u32, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.bucket_start);
        self.candles
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .extend(candles);
    }

    /// Insert the distinct expiry list for an underlying.
    pub fn insert_expiries(&mut self, underlying: &str, mut expiries: Vec<NaiveDate>) {
        expiries.sort();
        expiries.dedup();
        self.expiries.insert(underlying.to_string(), expiries);
    }

    /// Insert per-second index ticks for a symbol.
    pub fn insert_index_ticks(&mut self, symbol: &str, mut ticks: Vec<SecondTick>) {
        ticks.sort_by_key(|t| t.timestamp);
        self.index_ticks
            .entry(symbol.to_string())
            .or_default()
            .extend(ticks);
    }

    /// Insert per-second option ticks for a compact ticker.
    pub fn insert_option_ticks(&mut self, ticker: &str, mut ticks: Vec<SecondTick>) {
        ticks.sort_by_key(|t| t.timestamp);
        self.option_ticks
            .entry(ticker.to_string())
            .or_default()
            .extend(ticks);
    }
}

impl HistoricalDatastore for MemoryDatastore {
    fn candles(
        &self,
        symbol: &str,
        timeframe: u32,
        before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Candle>, DatastoreError> {
        let all = self
            .candles
            .get(&(symbol.to_string(), timeframe))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let eligible: Vec<Candle> = all
            .iter()
            .filter(|c| c.bucket_start < before)
            .cloned()
            .collect();
        let start = eligible.len().saturating_sub(limit);
        Ok(eligible[start..].to_vec())
    }

    fn expiries(&self, underlying: &str, from: NaiveDate) -> Result<Vec<NaiveDate>, DatastoreError> {
        Ok(self
            .expiries
            .get(underlying)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|d| **d >= from)
            .copied()
            .collect())
    }

    fn index_ticks(
        &self,
        day: NaiveDate,
        symbols: &[String],
    ) -> Result<Vec<SecondTick>, DatastoreError> {
        let mut rows: Vec<SecondTick> = symbols
            .iter()
            .filter_map(|s| self.index_ticks.get(s))
            .flatten()
            .filter(|t| t.timestamp.date() == day)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.symbol.cmp(&b.symbol)));
        Ok(rows)
    }

    fn option_ticks(
        &self,
        day: NaiveDate,
        ticker: &str,
        from: NaiveDateTime,
    ) -> Result<Vec<SecondTick>, DatastoreError> {
        Ok(self
            .option_ticks
            .get(ticker)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|t| t.timestamp.date() == day && t.timestamp >= from)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
    }

    fn candle(minute: u32, close: f64) -> Candle {
        Candle {
            symbol: "NIFTY".into(),
            timeframe: 1,
            bucket_start: day().and_hms_opt(9, minute, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1,
        }
    }

    #[test]
    fn test_candles_respects_before_and_limit() {
        let mut store = MemoryDatastore::new();
        store.insert_candles("NIFTY", 1, (15..30).map(|m| candle(m, m as f64)).collect());

        let cutoff = day().and_hms_opt(9, 25, 0).unwrap();
        let rows = store.candles("NIFTY", 1, cutoff, 5).unwrap();
        assert_eq!(rows.len(), 5);
        // Last candle strictly before the cutoff
        assert_eq!(rows.last().unwrap().bucket_start.time().minute(), 24);
        // Ascending order, most recent window
        assert_eq!(rows.first().unwrap().bucket_start.time().minute(), 20);
    }

    #[test]
    fn test_expiries_filters_and_sorts() {
        let mut store = MemoryDatastore::new();
        store.insert_expiries(
            "NIFTY",
            vec![
                NaiveDate::from_ymd_opt(2024, 10, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 9, 26).unwrap(),
                NaiveDate::from_ymd_opt(2024, 10, 3).unwrap(),
            ],
        );
        let expiries = store.expiries("NIFTY", day()).unwrap();
        assert_eq!(
            expiries,
            vec![
                NaiveDate::from_ymd_opt(2024, 10, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 10, 10).unwrap(),
            ]
        );
    }

    #[test]
    fn test_option_ticks_from_timestamp() {
        let mut store = MemoryDatastore::new();
        let ticks: Vec<SecondTick> = (0..10)
            .map(|s| {
                SecondTick::option(
                    "NIFTY:2024-10-03:OPT:25800:CE",
                    day().and_hms_opt(9, 15, s).unwrap(),
                    100.0 + s as f64,
                )
            })
            .collect();
        store.insert_option_ticks("NIFTY03OCT2425800CE", ticks);

        let from = day().and_hms_opt(9, 15, 5).unwrap();
        let rows = store
            .option_ticks(day(), "NIFTY03OCT2425800CE", from)
            .unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].timestamp, from);
    }
}
