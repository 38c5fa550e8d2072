//! Technical indicators with dual bulk/incremental evaluation.
//!
//! Every indicator computes the same values two ways: `bulk` runs
//! vectorized over full history at initialization, and `update` advances
//! the internal state by one candle in O(1). The kernel proves the two
//! agree before the engine starts: it runs `bulk`, replays the same
//! candles through a fresh instance's `update`, and rejects any
//! divergence beyond an absolute 1e-6 at the last candle.
//!
//! Indicator keys are function-style literals (`EMA(21)`,
//! `MACD(12,26,9)`, `BBAND(14,2)`); equal keys collide to one instance,
//! so duplicate registrations across strategy nodes share state.

mod atr;
mod bollinger;
mod ema;
mod macd;
mod rsi;
mod sma;

pub use atr::Atr;
pub use bollinger::BollingerBands;
pub use ema::Ema;
pub use macd::Macd;
pub use rsi::Rsi;
pub use sma::Sma;

use crate::constants::INDICATOR_PARITY_TOLERANCE;
use crate::models::Candle;
use crate::models::strategy::IndicatorDef;

/// Error type for indicator construction and evaluation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IndicatorError {
    /// Not enough candles to compute the indicator
    #[error("Insufficient data: need at least {need} candles, got {got}")]
    InsufficientData {
        /// Minimum number of candles required
        need: usize,
        /// Candles provided
        got: usize,
    },

    /// A period parameter is zero or inconsistent
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// The registry has no indicator under this name
    #[error("Unknown indicator '{name}'")]
    Unknown {
        /// The name that failed to resolve
        name: String,
    },

    /// A required parameter is missing from the document definition
    #[error("Indicator '{name}' is missing parameter '{param}'")]
    MissingParameter {
        /// Indicator name
        name: String,
        /// Missing parameter
        param: &'static str,
    },

    /// Bulk and incremental evaluation disagree at the last candle
    #[error(
        "Bulk/incremental mismatch for {key} column '{column}': bulk={bulk:?}, incremental={incremental:?}"
    )]
    ParityMismatch {
        /// Indicator key
        key: String,
        /// Column that diverged
        column: String,
        /// Bulk value at the last candle
        bulk: Option<f64>,
        /// Incremental value at the last candle
        incremental: Option<f64>,
    },
}

/// Result type for indicator operations
pub type Result<T> = std::result::Result<T, IndicatorError>;

/// An indicator with verified bulk/incremental parity.
pub trait Indicator {
    /// Function-style key, e.g. `EMA(21)`. Equal keys share one instance.
    fn key(&self) -> String;

    /// Output column suffixes for multi-column indicators; empty for
    /// single-column indicators (the column is named after the key).
    fn columns(&self) -> &'static [&'static str] {
        &[]
    }

    /// Vectorized evaluation over full history; one series per output
    /// column (a single series for single-column indicators).
    fn bulk(&self, candles: &[Candle]) -> Result<Vec<Vec<Option<f64>>>>;

    /// Discard all internal state.
    fn reset(&mut self);

    /// Advance the internal state by one completed candle; one value per
    /// output column. Amortized O(1).
    fn update(&mut self, candle: &Candle) -> Vec<Option<f64>>;

    /// A fresh instance with the same parameters and no state.
    fn fresh(&self) -> Box<dyn Indicator>;

    /// Seed internal state so the next `update` continues the series
    /// that `bulk(candles)` ends.
    fn initialize_from(&mut self, candles: &[Candle]) {
        self.reset();
        for candle in candles {
            self.update(candle);
        }
    }
}

/// Build an indicator from a strategy-document definition.
pub fn build(def: &IndicatorDef) -> Result<Box<dyn Indicator>> {
    let period = |param: &'static str| {
        def.timeperiod
            .map(|p| p as usize)
            .ok_or(IndicatorError::MissingParameter {
                name: def.indicator_name.clone(),
                param,
            })
    };
    match def.indicator_name.to_ascii_lowercase().as_str() {
        "sma" => Ok(Box::new(Sma::new(period("timeperiod")?)?)),
        "ema" => Ok(Box::new(Ema::new(period("timeperiod")?)?)),
        "rsi" => Ok(Box::new(Rsi::new(period("timeperiod")?)?)),
        "atr" => Ok(Box::new(Atr::new(period("timeperiod")?)?)),
        "bband" | "bbands" | "bollinger" => Ok(Box::new(BollingerBands::new(
            period("timeperiod")?,
            def.std_dev.unwrap_or(2.0),
        )?)),
        "macd" => {
            let fast = def.fast_period.unwrap_or(12) as usize;
            let slow = def.slow_period.unwrap_or(26) as usize;
            let signal = def.signal_period.unwrap_or(9) as usize;
            Ok(Box::new(Macd::new(fast, slow, signal)?))
        }
        _ => Err(IndicatorError::Unknown {
            name: def.indicator_name.clone(),
        }),
    }
}

/// Column key with `(`, `)`, `,` flattened to `_`: `EMA(21)` → `EMA_21`.
pub fn sanitize_key(key: &str) -> String {
    key.trim_end_matches(')').replace(['(', ','], "_")
}

/// Fully-qualified column names for an indicator: the sanitized key for
/// single-column indicators, `key_suffix` per output otherwise.
pub fn column_names(indicator: &dyn Indicator) -> Vec<String> {
    let base = sanitize_key(&indicator.key());
    let suffixes = indicator.columns();
    if suffixes.is_empty() {
        vec![base]
    } else {
        suffixes.iter().map(|s| format!("{base}_{s}")).collect()
    }
}

/// Verify bulk/incremental parity over `candles`, then seed the live
/// instance from them. Returns the bulk series (one per column) so the
/// caller can attach history columns.
///
/// Parity is judged at the last candle: both sides absent is fine, both
/// present must agree within 1e-6, one-sided presence is a mismatch.
pub fn verify_and_initialize(
    indicator: &mut Box<dyn Indicator>,
    candles: &[Candle],
) -> Result<Vec<Vec<Option<f64>>>> {
    let bulk_series = indicator.bulk(candles)?;

    let mut replica = indicator.fresh();
    let mut incremental_last: Vec<Option<f64>> = vec![None; bulk_series.len()];
    for candle in candles {
        incremental_last = replica.update(candle);
    }

    let names = column_names(indicator.as_ref());
    for (idx, series) in bulk_series.iter().enumerate() {
        let bulk_last = series.last().copied().flatten();
        let inc_last = incremental_last.get(idx).copied().flatten();
        let agrees = match (bulk_last, inc_last) {
            (Some(b), Some(i)) => (b - i).abs() <= INDICATOR_PARITY_TOLERANCE,
            (None, None) => true,
            _ => false,
        };
        if !agrees {
            return Err(IndicatorError::ParityMismatch {
                key: indicator.key(),
                column: names.get(idx).cloned().unwrap_or_default(),
                bulk: bulk_last,
                incremental: inc_last,
            });
        }
    }

    indicator.initialize_from(candles);
    Ok(bulk_series)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{Duration, NaiveDate};

    /// Deterministic wavy candle series for parity tests.
    pub fn candles(n: usize) -> Vec<Candle> {
        let start = NaiveDate::from_ymd_opt(2024, 9, 2)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        (0..n)
            .map(|i| {
                let base = 25_000.0 + (i as f64 * 0.37).sin() * 120.0 + i as f64 * 0.8;
                Candle {
                    symbol: "NIFTY".into(),
                    timeframe: 1,
                    bucket_start: start + Duration::minutes(i as i64),
                    open: base - 3.0,
                    high: base + ((i % 7) as f64) + 5.0,
                    low: base - ((i % 5) as f64) - 6.0,
                    close: base,
                    volume: 1_000 + (i as i64 % 97) * 13,
                }
            })
            .collect()
    }

    /// Assert bulk-vs-replay parity at every candle, not just the last.
    pub fn assert_full_parity(indicator: &mut Box<dyn Indicator>, candles: &[Candle]) {
        let bulk = indicator.bulk(candles).unwrap();
        let mut replica = indicator.fresh();
        for (row, candle) in candles.iter().enumerate() {
            let values = replica.update(candle);
            for (col, series) in bulk.iter().enumerate() {
                match (series[row], values[col]) {
                    (Some(b), Some(i)) => assert!(
                        (b - i).abs() <= INDICATOR_PARITY_TOLERANCE,
                        "{} col {col} row {row}: bulk={b} incremental={i}",
                        indicator.key()
                    ),
                    (None, None) => {}
                    (b, i) => panic!(
                        "{} col {col} row {row}: bulk={b:?} incremental={i:?}",
                        indicator.key()
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, timeperiod: Option<u32>) -> IndicatorDef {
        IndicatorDef {
            indicator_name: name.to_string(),
            timeperiod,
            fast_period: None,
            slow_period: None,
            signal_period: None,
            std_dev: None,
        }
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("EMA(21)"), "EMA_21");
        assert_eq!(sanitize_key("MACD(12,26,9)"), "MACD_12_26_9");
        assert_eq!(sanitize_key("BBAND(14,2)"), "BBAND_14_2");
    }

    #[test]
    fn test_registry_builds_known_indicators() {
        assert_eq!(build(&def("EMA", Some(21))).unwrap().key(), "EMA(21)");
        assert_eq!(build(&def("rsi", Some(14))).unwrap().key(), "RSI(14)");
        assert_eq!(build(&def("bband", Some(14))).unwrap().key(), "BBAND(14,2)");
    }

    #[test]
    fn test_registry_rejects_unknown() {
        let err = match build(&def("vwap", Some(14))) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, IndicatorError::Unknown { .. }));
    }

    #[test]
    fn test_registry_requires_period() {
        let err = match build(&def("ema", None)) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, IndicatorError::MissingParameter { .. }));
    }

    #[test]
    fn test_verify_and_initialize_seeds_state() {
        let mut candles = test_support::candles(121);
        let next = candles.pop().unwrap();
        let mut indicator = build(&def("EMA", Some(21))).unwrap();
        let series = verify_and_initialize(&mut indicator, &candles).unwrap();
        assert_eq!(series.len(), 1);
        assert!(series[0].last().unwrap().is_some());

        // The next update continues seamlessly from the seeded state: it
        // must equal a bulk run over history + the new candle.
        let live = indicator.update(&next)[0].unwrap();
        let mut extended = candles;
        extended.push(next);
        let reference = indicator.bulk(&extended).unwrap()[0]
            .last()
            .copied()
            .flatten()
            .unwrap();
        assert!((live - reference).abs() <= INDICATOR_PARITY_TOLERANCE);
    }
}
