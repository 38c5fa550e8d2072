/// Tick module
///
/// The engine consumes ticks pre-aggregated to one row per symbol per
/// second; the aggregated row keeps that second's OHLC so candle highs
/// and lows are not lost to the aggregation.
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A second-aggregated tick for one symbol.
///
/// For index symbols `open/high/low` carry the intra-second range;
/// option rows carry only the last traded price (the OHLC fields
/// collapse to `ltp`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondTick {
    /// Canonical symbol string (datastore rows may carry compact tickers;
    /// the data manager normalizes on ingest)
    pub symbol: String,
    /// Second this row aggregates (naive exchange wall-clock)
    pub timestamp: NaiveDateTime,
    /// Last traded price within the second
    pub ltp: f64,
    /// First traded price within the second
    pub open: f64,
    /// Highest traded price within the second
    pub high: f64,
    /// Lowest traded price within the second
    pub low: f64,
    /// Total traded quantity within the second
    pub volume: i64,
    /// Open interest at the end of the second
    pub oi: i64,
}

impl SecondTick {
    /// Build an index tick with full intra-second OHLC.
    #[allow(clippy::too_many_arguments)]
    pub fn index(
        symbol: impl Into<String>,
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
        oi: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            ltp: close,
            open,
            high,
            low,
            volume,
            oi,
        }
    }

    /// Build an option tick carrying only an LTP.
    pub fn option(symbol: impl Into<String>, timestamp: NaiveDateTime, ltp: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            ltp,
            open: ltp,
            high: ltp,
            low: ltp,
            volume: 0,
            oi: 0,
        }
    }
}

/// LTP table row with the metadata nodes may inspect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Last traded price
    pub ltp: f64,
    /// Timestamp of the last trade
    pub timestamp: NaiveDateTime,
    /// Last traded quantity / second volume
    pub volume: i64,
    /// Open interest
    pub oi: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 1)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_option_tick_collapses_ohlc() {
        let tick = SecondTick::option("NIFTY:2024-10-03:OPT:25800:CE", ts(), 142.5);
        assert_eq!(tick.open, 142.5);
        assert_eq!(tick.high, 142.5);
        assert_eq!(tick.low, 142.5);
        assert_eq!(tick.ltp, 142.5);
        assert_eq!(tick.volume, 0);
    }

    #[test]
    fn test_index_tick_keeps_range() {
        let tick = SecondTick::index("NIFTY", ts(), 25_800.0, 25_812.0, 25_795.0, 25_803.0, 900, 0);
        assert_eq!(tick.ltp, 25_803.0);
        assert!(tick.high > tick.low);
    }
}
