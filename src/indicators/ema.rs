//! Exponential Moving Average (EMA) indicator.

use crate::models::Candle;

use super::sma::sma_series;
use super::{Indicator, IndicatorError, Result};

/// Exponential moving average over close prices.
///
/// The first value is an SMA seed at index `period - 1`; every later
/// value applies `(close − prev) × 2/(period+1) + prev`.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    state: EmaState,
}

impl Ema {
    /// Create an EMA with the given period.
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod(
                "Period must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            period,
            state: EmaState::new(period),
        })
    }
}

/// Incremental EMA state, reusable inside RSI and MACD.
#[derive(Debug, Clone)]
pub(super) struct EmaState {
    period: usize,
    multiplier: f64,
    seen: usize,
    seed_sum: f64,
    prev: Option<f64>,
}

impl EmaState {
    pub(super) fn new(period: usize) -> Self {
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            seen: 0,
            seed_sum: 0.0,
            prev: None,
        }
    }

    pub(super) fn reset(&mut self) {
        self.seen = 0;
        self.seed_sum = 0.0;
        self.prev = None;
    }

    pub(super) fn update(&mut self, value: f64) -> Option<f64> {
        self.seen += 1;
        match self.prev {
            Some(prev) => {
                let next = (value - prev) * self.multiplier + prev;
                self.prev = Some(next);
                Some(next)
            }
            None => {
                self.seed_sum += value;
                if self.seen < self.period {
                    return None;
                }
                let seed = self.seed_sum / self.period as f64;
                self.prev = Some(seed);
                Some(seed)
            }
        }
    }
}

/// EMA over a raw series, SMA-seeded; shared with RSI and MACD.
pub(super) fn ema_series(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || data.is_empty() || data.len() < period {
        return vec![None; data.len()];
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = sma_series(data, period);
    let mut result = Vec::with_capacity(data.len());
    for (i, seed_value) in seed.iter().enumerate() {
        if i < period - 1 {
            result.push(None);
        } else if i == period - 1 {
            result.push(*seed_value);
        } else {
            let prev: f64 = result[i - 1].expect("EMA defined from the seed index onward");
            result.push(Some((data[i] - prev) * multiplier + prev));
        }
    }
    result
}

impl Indicator for Ema {
    fn key(&self) -> String {
        format!("EMA({})", self.period)
    }

    fn bulk(&self, candles: &[Candle]) -> Result<Vec<Vec<Option<f64>>>> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        Ok(vec![ema_series(&closes, self.period)])
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    fn update(&mut self, candle: &Candle) -> Vec<Option<f64>> {
        vec![self.state.update(candle.close)]
    }

    fn fresh(&self) -> Box<dyn Indicator> {
        Box::new(Self {
            period: self.period,
            state: EmaState::new(self.period),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support;

    #[test]
    fn test_ema_seed_is_sma() {
        let candles = test_support::candles(3);
        let mut ema = Ema::new(3).unwrap();
        assert_eq!(ema.update(&candles[0])[0], None);
        assert_eq!(ema.update(&candles[1])[0], None);
        let seed = ema.update(&candles[2])[0].unwrap();
        let mean: f64 = candles.iter().map(|c| c.close).sum::<f64>() / 3.0;
        assert!((seed - mean).abs() < 1e-12);
    }

    #[test]
    fn test_ema_period_1_tracks_price() {
        let candles = test_support::candles(5);
        let mut ema = Ema::new(1).unwrap();
        for candle in &candles {
            assert_eq!(ema.update(candle)[0], Some(candle.close));
        }
    }

    #[test]
    fn test_ema_parity() {
        let candles = test_support::candles(250);
        let mut indicator: Box<dyn Indicator> = Box::new(Ema::new(21).unwrap());
        test_support::assert_full_parity(&mut indicator, &candles);
    }

    #[test]
    fn test_ema_insufficient_data_yields_none() {
        let candles = test_support::candles(2);
        let series = Ema::new(5).unwrap().bulk(&candles).unwrap();
        assert!(series[0].iter().all(|v| v.is_none()));
    }
}
