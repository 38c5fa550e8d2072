//! Average True Range (ATR) indicator.

use crate::models::Candle;

use super::{Indicator, IndicatorError, Result};

/// Average True Range with Wilder smoothing.
///
/// The first true range is `high − low`; later ones take the greatest of
/// `high − low`, `|high − prev_close|`, `|low − prev_close|`. The first
/// ATR is an SMA of the first `period` true ranges, after which
/// `atr = (prev × (period−1) + tr) / period`.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<f64>,
    seen: usize,
    seed_sum: f64,
    prev_atr: Option<f64>,
}

impl Atr {
    /// Create an ATR with the given period.
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod(
                "Period must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            period,
            prev_close: None,
            seen: 0,
            seed_sum: 0.0,
            prev_atr: None,
        })
    }

    fn true_range(candle: &Candle, prev_close: Option<f64>) -> f64 {
        match prev_close {
            None => candle.high - candle.low,
            Some(prev) => {
                let h_l = candle.high - candle.low;
                let h_pc = (candle.high - prev).abs();
                let l_pc = (candle.low - prev).abs();
                h_l.max(h_pc).max(l_pc)
            }
        }
    }
}

impl Indicator for Atr {
    fn key(&self) -> String {
        format!("ATR({})", self.period)
    }

    fn bulk(&self, candles: &[Candle]) -> Result<Vec<Vec<Option<f64>>>> {
        if candles.len() <= self.period {
            return Err(IndicatorError::InsufficientData {
                need: self.period + 1,
                got: candles.len(),
            });
        }

        let mut true_ranges = Vec::with_capacity(candles.len());
        let mut prev_close = None;
        for candle in candles {
            true_ranges.push(Self::true_range(candle, prev_close));
            prev_close = Some(candle.close);
        }

        let mut result = vec![None; candles.len()];
        let first_atr: f64 = true_ranges[..self.period].iter().sum::<f64>() / self.period as f64;
        result[self.period - 1] = Some(first_atr);

        let mut prev_atr = first_atr;
        for i in self.period..true_ranges.len() {
            let atr = (prev_atr * (self.period - 1) as f64 + true_ranges[i]) / self.period as f64;
            result[i] = Some(atr);
            prev_atr = atr;
        }
        Ok(vec![result])
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.seen = 0;
        self.seed_sum = 0.0;
        self.prev_atr = None;
    }

    fn update(&mut self, candle: &Candle) -> Vec<Option<f64>> {
        let tr = Self::true_range(candle, self.prev_close);
        self.prev_close = Some(candle.close);
        self.seen += 1;

        match self.prev_atr {
            Some(prev) => {
                let atr = (prev * (self.period - 1) as f64 + tr) / self.period as f64;
                self.prev_atr = Some(atr);
                vec![Some(atr)]
            }
            None => {
                self.seed_sum += tr;
                if self.seen < self.period {
                    return vec![None];
                }
                let seed = self.seed_sum / self.period as f64;
                self.prev_atr = Some(seed);
                vec![Some(seed)]
            }
        }
    }

    fn fresh(&self) -> Box<dyn Indicator> {
        Box::new(Self {
            period: self.period,
            prev_close: None,
            seen: 0,
            seed_sum: 0.0,
            prev_atr: None,
        })
    }
}
