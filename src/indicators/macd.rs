//! Moving Average Convergence Divergence (MACD) indicator.

use crate::models::Candle;

use super::ema::{EmaState, ema_series};
use super::{Indicator, IndicatorError, Result};

/// MACD over close prices, producing `macd`, `signal`, and `hist` columns.
///
/// `macd = EMA(fast) − EMA(slow)`; the signal line is an EMA over the
/// defined portion of the macd line (so it seeds from the first
/// `signal_period` macd values); `hist = macd − signal`.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    fast_ema: EmaState,
    slow_ema: EmaState,
    signal_ema: EmaState,
}

impl Macd {
    /// Create a MACD with fast/slow/signal periods.
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self> {
        if fast == 0 || slow == 0 || signal == 0 {
            return Err(IndicatorError::InvalidPeriod(
                "All periods must be greater than 0".to_string(),
            ));
        }
        if fast >= slow {
            return Err(IndicatorError::InvalidPeriod(
                "Fast period must be less than slow period".to_string(),
            ));
        }
        Ok(Self {
            fast,
            slow,
            signal,
            fast_ema: EmaState::new(fast),
            slow_ema: EmaState::new(slow),
            signal_ema: EmaState::new(signal),
        })
    }
}

impl Indicator for Macd {
    fn key(&self) -> String {
        format!("MACD({},{},{})", self.fast, self.slow, self.signal)
    }

    fn columns(&self) -> &'static [&'static str] {
        &["macd", "signal", "hist"]
    }

    fn bulk(&self, candles: &[Candle]) -> Result<Vec<Vec<Option<f64>>>> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let min_points = self.slow + self.signal;
        if closes.len() < min_points {
            return Err(IndicatorError::InsufficientData {
                need: min_points,
                got: closes.len(),
            });
        }

        let fast_series = ema_series(&closes, self.fast);
        let slow_series = ema_series(&closes, self.slow);

        let macd_line: Vec<Option<f64>> = fast_series
            .iter()
            .zip(&slow_series)
            .map(|(fast, slow)| match (fast, slow) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect();

        // Signal EMA runs over the compacted (defined) macd values, then
        // maps back onto the full index range.
        let macd_values: Vec<f64> = macd_line.iter().copied().flatten().collect();
        let signal_compact = ema_series(&macd_values, self.signal);
        let mut signal_line = vec![None; closes.len()];
        let mut compact_idx = 0;
        for i in 0..closes.len() {
            if macd_line[i].is_some() {
                signal_line[i] = signal_compact.get(compact_idx).copied().flatten();
                compact_idx += 1;
            }
        }

        let histogram: Vec<Option<f64>> = macd_line
            .iter()
            .zip(&signal_line)
            .map(|(macd, signal)| match (macd, signal) {
                (Some(m), Some(s)) => Some(m - s),
                _ => None,
            })
            .collect();

        Ok(vec![macd_line, signal_line, histogram])
    }

    fn reset(&mut self) {
        self.fast_ema.reset();
        self.slow_ema.reset();
        self.signal_ema.reset();
    }

    fn update(&mut self, candle: &Candle) -> Vec<Option<f64>> {
        let fast = self.fast_ema.update(candle.close);
        let slow = self.slow_ema.update(candle.close);
        let macd = match (fast, slow) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        };
        let signal = macd.and_then(|m| self.signal_ema.update(m));
        let hist = match (macd, signal) {
            (Some(m), Some(s)) => Some(m - s),
            _ => None,
        };
        vec![macd, signal, hist]
    }

    fn fresh(&self) -> Box<dyn Indicator> {
        Box::new(Self {
            fast: self.fast,
            slow: self.slow,
            signal: self.signal,
            fast_ema: EmaState::new(self.fast),
            slow_ema: EmaState::new(self.slow),
            signal_ema: EmaState::new(self.signal),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support;

    #[test]
    fn test_macd_columns() {
        let macd = Macd::new(12, 26, 9).unwrap();
        assert_eq!(macd.key(), "MACD(12,26,9)");
        assert_eq!(macd.columns(), &["macd", "signal", "hist"]);
    }

    #[test]
    fn test_macd_defined_after_warmup() {
        let candles = test_support::candles(60);
        let series = Macd::new(12, 26, 9).unwrap().bulk(&candles).unwrap();
        // macd defined from slow-1; signal from slow+signal-2
        assert!(series[0][24].is_none());
        assert!(series[0][25].is_some());
        assert!(series[1][32].is_none());
        assert!(series[1][33].is_some());
        assert!(series[2][33].is_some());
    }

    #[test]
    fn test_macd_parity() {
        let candles = test_support::candles(300);
        let mut indicator: Box<dyn Indicator> = Box::new(Macd::new(12, 26, 9).unwrap());
        test_support::assert_full_parity(&mut indicator, &candles);
    }

    #[test]
    fn test_macd_rejects_inverted_periods() {
        assert!(Macd::new(26, 12, 9).is_err());
        assert!(Macd::new(0, 26, 9).is_err());
    }
}
