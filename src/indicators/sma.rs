//! Simple Moving Average (SMA) indicator.

use std::collections::VecDeque;

use crate::models::Candle;

use super::{Indicator, IndicatorError, Result};

/// Simple moving average over close prices.
///
/// The first `period - 1` values are `None`; from there each value is the
/// arithmetic mean of the last `period` closes.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<f64>,
}

impl Sma {
    /// Create an SMA with the given period.
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod(
                "Period must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period),
        })
    }
}

/// Rolling mean over a raw series; shared with the Bollinger middle band.
pub(super) fn sma_series(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || data.len() < period {
        return vec![None; data.len()];
    }
    let mut result = vec![None; data.len()];
    let mut sum: f64 = data[..period].iter().sum();
    result[period - 1] = Some(sum / period as f64);
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result[i] = Some(sum / period as f64);
    }
    result
}

impl Indicator for Sma {
    fn key(&self) -> String {
        format!("SMA({})", self.period)
    }

    fn bulk(&self, candles: &[Candle]) -> Result<Vec<Vec<Option<f64>>>> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        Ok(vec![sma_series(&closes, self.period)])
    }

    fn reset(&mut self) {
        self.window.clear();
    }

    fn update(&mut self, candle: &Candle) -> Vec<Option<f64>> {
        self.window.push_back(candle.close);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return vec![None];
        }
        // Summed over the bounded window; no running-sum drift
        let sum: f64 = self.window.iter().sum();
        vec![Some(sum / self.period as f64)]
    }

    fn fresh(&self) -> Box<dyn Indicator> {
        Box::new(Self {
            period: self.period,
            window: VecDeque::with_capacity(self.period),
        })
    }
}
