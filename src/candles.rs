//! Tick-to-candle folding.
//!
//! One builder per timeframe, holding at most one open bucket per
//! symbol. Buckets are aligned to the exchange market open plus a whole
//! number of intervals; a tick whose bucket lies past the current one
//! emits the completed candle, a tick whose bucket lies before it is
//! out of order and discarded.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use tracing::debug;

use crate::models::{Candle, SecondTick};

/// Builds OHLCV candles from per-second ticks for a single timeframe.
#[derive(Debug)]
pub struct CandleBuilder {
    timeframe: u32,
    market_open: NaiveTime,
    current: HashMap<String, Candle>,
    discarded_out_of_order: u64,
}

impl CandleBuilder {
    /// Create a builder for a timeframe in whole minutes.
    pub fn new(timeframe: u32, market_open: NaiveTime) -> Self {
        Self {
            timeframe,
            market_open,
            current: HashMap::new(),
            discarded_out_of_order: 0,
        }
    }

    /// The timeframe this builder folds into, in minutes.
    pub fn timeframe(&self) -> u32 {
        self.timeframe
    }

    /// Number of ticks dropped for arriving out of order.
    pub fn discarded(&self) -> u64 {
        self.discarded_out_of_order
    }

    /// Bucket start for a timestamp: market open plus a whole number of
    /// intervals; anything before the open claims the opening bucket.
    pub fn bucket_start(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let open_minutes = (self.market_open.hour() * 60 + self.market_open.minute()) as i64;
        let tick_minutes = (ts.time().hour() * 60 + ts.time().minute()) as i64;
        let since_open = tick_minutes - open_minutes;

        let day_open = ts.date().and_time(self.market_open);
        if since_open < 0 {
            return day_open;
        }
        let bucket_index = since_open / self.timeframe as i64;
        day_open + Duration::minutes(bucket_index * self.timeframe as i64)
    }

    /// Fold one tick; returns the completed candle when the tick opens a
    /// later bucket.
    pub fn process_tick(&mut self, tick: &SecondTick) -> Option<Candle> {
        let bucket = self.bucket_start(tick.timestamp);

        match self.current.get_mut(&tick.symbol) {
            None => {
                self.current.insert(tick.symbol.clone(), self.open_bucket(tick, bucket));
                None
            }
            Some(candle) if bucket == candle.bucket_start => {
                candle.absorb(tick.high, tick.low, tick.ltp, tick.volume);
                None
            }
            Some(candle) if bucket > candle.bucket_start => {
                let completed = candle.clone();
                self.current.insert(tick.symbol.clone(), self.open_bucket(tick, bucket));
                Some(completed)
            }
            Some(candle) => {
                self.discarded_out_of_order += 1;
                debug!(
                    symbol = %tick.symbol,
                    tick_bucket = %bucket,
                    current_bucket = %candle.bucket_start,
                    "discarding out-of-order tick"
                );
                None
            }
        }
    }

    /// Force-complete the open bucket for one symbol.
    pub fn force_flush(&mut self, symbol: &str) -> Option<Candle> {
        self.current.remove(symbol)
    }

    /// Force-complete every open bucket (end of day).
    pub fn force_flush_all(&mut self) -> Vec<Candle> {
        let mut flushed: Vec<Candle> = self.current.drain().map(|(_, c)| c).collect();
        flushed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        flushed
    }

    fn open_bucket(&self, tick: &SecondTick, bucket: NaiveDateTime) -> Candle {
        Candle {
            symbol: tick.symbol.clone(),
            timeframe: self.timeframe,
            bucket_start: bucket,
            open: tick.open,
            high: tick.high,
            low: tick.low,
            close: tick.ltp,
            volume: tick.volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn open() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 15, 0).unwrap()
    }

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn tick(time: NaiveDateTime, price: f64, volume: i64) -> SecondTick {
        SecondTick::index("NIFTY", time, price, price + 1.0, price - 1.0, price, volume, 0)
    }

    #[test]
    fn test_bucket_alignment_to_market_open() {
        let builder = CandleBuilder::new(5, open());
        assert_eq!(builder.bucket_start(ts(9, 16, 30)), ts(9, 15, 0));
        assert_eq!(builder.bucket_start(ts(9, 20, 0)), ts(9, 20, 0));
        assert_eq!(builder.bucket_start(ts(9, 24, 59)), ts(9, 20, 0));
        assert_eq!(builder.bucket_start(ts(9, 25, 0)), ts(9, 25, 0));
    }

    #[test]
    fn test_pre_open_ticks_claim_opening_bucket() {
        let builder = CandleBuilder::new(5, open());
        assert_eq!(builder.bucket_start(ts(9, 7, 12)), ts(9, 15, 0));
    }

    #[test]
    fn test_candle_completes_on_next_bucket() {
        let mut builder = CandleBuilder::new(1, open());
        assert!(builder.process_tick(&tick(ts(9, 15, 0), 100.0, 10)).is_none());
        assert!(builder.process_tick(&tick(ts(9, 15, 30), 103.0, 5)).is_none());

        let completed = builder.process_tick(&tick(ts(9, 16, 0), 99.0, 7)).unwrap();
        assert_eq!(completed.bucket_start, ts(9, 15, 0));
        assert_eq!(completed.open, 100.0);
        assert_eq!(completed.high, 104.0);
        assert_eq!(completed.low, 99.0);
        assert_eq!(completed.close, 103.0);
        assert_eq!(completed.volume, 15);

        // The new bucket carries the triggering tick
        let open_candle = builder.force_flush("NIFTY").unwrap();
        assert_eq!(open_candle.bucket_start, ts(9, 16, 0));
        assert_eq!(open_candle.open, 99.0);
    }

    #[test]
    fn test_out_of_order_ticks_discarded() {
        let mut builder = CandleBuilder::new(1, open());
        builder.process_tick(&tick(ts(9, 16, 0), 100.0, 1));
        assert!(builder.process_tick(&tick(ts(9, 15, 10), 98.0, 1)).is_none());
        assert_eq!(builder.discarded(), 1);
        // Current candle untouched
        let current = builder.force_flush("NIFTY").unwrap();
        assert_eq!(current.bucket_start, ts(9, 16, 0));
        assert_eq!(current.close, 100.0);
    }

    #[test]
    fn test_force_flush_all() {
        let mut builder = CandleBuilder::new(1, open());
        builder.process_tick(&tick(ts(9, 15, 0), 100.0, 1));
        let mut other = tick(ts(9, 15, 1), 50.0, 1);
        other.symbol = "BANKNIFTY".to_string();
        builder.process_tick(&other);

        let flushed = builder.force_flush_all();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].symbol, "BANKNIFTY");
        assert_eq!(flushed[1].symbol, "NIFTY");
        assert!(builder.force_flush_all().is_empty());
    }

    #[test]
    fn test_per_symbol_buckets_are_independent() {
        let mut builder = CandleBuilder::new(1, open());
        builder.process_tick(&tick(ts(9, 15, 0), 100.0, 1));
        let mut other = tick(ts(9, 16, 0), 50.0, 1);
        other.symbol = "BANKNIFTY".to_string();
        // BANKNIFTY's first tick opens its own bucket; NIFTY's stays open
        assert!(builder.process_tick(&other).is_none());
        let nifty = builder.force_flush("NIFTY").unwrap();
        assert_eq!(nifty.bucket_start, ts(9, 15, 0));
    }
}
