/// Candle module
///
/// Contains the OHLCV candle/bar structure.
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle/bar.
///
/// `bucket_start` is aligned to the exchange market open plus a whole
/// number of timeframe intervals; the candle covers the half-open
/// interval `[bucket_start, bucket_start + timeframe)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Canonical symbol the candle belongs to
    pub symbol: String,
    /// Timeframe in whole minutes
    pub timeframe: u32,
    /// Start of the bucket this candle covers
    pub bucket_start: NaiveDateTime,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Volume
    pub volume: i64,
}

impl Candle {
    /// Fold one more price/volume observation into the candle.
    pub fn absorb(&mut self, price_high: f64, price_low: f64, close: f64, volume: i64) {
        self.high = self.high.max(price_high);
        self.low = self.low.min(price_low);
        self.close = close;
        self.volume += volume;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_absorb_updates_range_and_volume() {
        let mut candle = Candle {
            symbol: "NIFTY".into(),
            timeframe: 1,
            bucket_start: NaiveDate::from_ymd_opt(2024, 10, 1)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
            open: 100.0,
            high: 100.0,
            low: 100.0,
            close: 100.0,
            volume: 10,
        };
        candle.absorb(104.0, 99.0, 103.0, 5);
        assert_eq!(candle.high, 104.0);
        assert_eq!(candle.low, 99.0);
        assert_eq!(candle.close, 103.0);
        assert_eq!(candle.volume, 15);
        assert_eq!(candle.open, 100.0);
    }
}
