//! Relative Strength Index (RSI) indicator.

use crate::models::Candle;

use super::ema::{EmaState, ema_series};
use super::{Indicator, IndicatorError, Result};

/// Relative Strength Index over close prices.
///
/// Price changes split into gains and losses, each smoothed with an
/// SMA-seeded EMA; `RSI = 100 − 100/(1 + gain/loss)` with the all-gain
/// case pinned at 100. The first value appears at candle index `period`
/// (one observation is consumed by the change calculation).
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<f64>,
    avg_gain: EmaState,
    avg_loss: EmaState,
}

impl Rsi {
    /// Create an RSI with the given period.
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod(
                "Period must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            period,
            prev_close: None,
            avg_gain: EmaState::new(period),
            avg_loss: EmaState::new(period),
        })
    }

    fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        }
    }
}

impl Indicator for Rsi {
    fn key(&self) -> String {
        format!("RSI({})", self.period)
    }

    fn bulk(&self, candles: &[Candle]) -> Result<Vec<Vec<Option<f64>>>> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        if closes.len() <= self.period {
            return Err(IndicatorError::InsufficientData {
                need: self.period + 1,
                got: closes.len(),
            });
        }

        let mut gains = Vec::with_capacity(closes.len() - 1);
        let mut losses = Vec::with_capacity(closes.len() - 1);
        for i in 1..closes.len() {
            let change = closes[i] - closes[i - 1];
            gains.push(change.max(0.0));
            losses.push((-change).max(0.0));
        }

        let avg_gains = ema_series(&gains, self.period);
        let avg_losses = ema_series(&losses, self.period);

        let mut result = vec![None; closes.len()];
        for i in 0..avg_gains.len() {
            if let (Some(gain), Some(loss)) = (avg_gains[i], avg_losses[i]) {
                result[i + 1] = Some(Self::rsi_from(gain, loss));
            }
        }
        Ok(vec![result])
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.avg_gain.reset();
        self.avg_loss.reset();
    }

    fn update(&mut self, candle: &Candle) -> Vec<Option<f64>> {
        let Some(prev) = self.prev_close.replace(candle.close) else {
            return vec![None];
        };
        let change = candle.close - prev;
        let gain = self.avg_gain.update(change.max(0.0));
        let loss = self.avg_loss.update((-change).max(0.0));
        match (gain, loss) {
            (Some(g), Some(l)) => vec![Some(Self::rsi_from(g, l))],
            _ => vec![None],
        }
    }

    fn fresh(&self) -> Box<dyn Indicator> {
        Box::new(Self {
            period: self.period,
            prev_close: None,
            avg_gain: EmaState::new(self.period),
            avg_loss: EmaState::new(self.period),
        })
    }
}
