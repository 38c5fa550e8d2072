//! Bollinger Bands indicator.

use std::collections::VecDeque;

use crate::models::Candle;

use super::sma::sma_series;
use super::{Indicator, IndicatorError, Result};

/// Bollinger bands over close prices: `upper`, `middle`, `lower` columns.
///
/// Middle band is the SMA; the outer bands sit `multiplier` population
/// standard deviations away, with the deviation taken over the same
/// window as the mean.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    multiplier: f64,
    window: VecDeque<f64>,
}

impl BollingerBands {
    /// Create Bollinger bands with the given period and multiplier.
    pub fn new(period: usize, multiplier: f64) -> Result<Self> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod(
                "Period must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            period,
            multiplier,
            window: VecDeque::with_capacity(period),
        })
    }

    fn bands(window: &[f64], mean: f64, multiplier: f64) -> (f64, f64) {
        let variance =
            window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / window.len() as f64;
        let std_dev = variance.sqrt();
        (mean + multiplier * std_dev, mean - multiplier * std_dev)
    }
}

impl Indicator for BollingerBands {
    fn key(&self) -> String {
        // Whole-number multipliers render without a decimal point, so the
        // standard configuration reads BBAND(14,2).
        if self.multiplier.fract() == 0.0 {
            format!("BBAND({},{})", self.period, self.multiplier as i64)
        } else {
            format!("BBAND({},{})", self.period, self.multiplier)
        }
    }

    fn columns(&self) -> &'static [&'static str] {
        &["upper", "middle", "lower"]
    }

    fn bulk(&self, candles: &[Candle]) -> Result<Vec<Vec<Option<f64>>>> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        if closes.len() < self.period {
            return Err(IndicatorError::InsufficientData {
                need: self.period,
                got: closes.len(),
            });
        }

        let middle = sma_series(&closes, self.period);
        let mut upper = vec![None; closes.len()];
        let mut lower = vec![None; closes.len()];
        for i in (self.period - 1)..closes.len() {
            let window = &closes[i + 1 - self.period..=i];
            let mean = middle[i].expect("SMA defined from period-1 onward");
            let (u, l) = Self::bands(window, mean, self.multiplier);
            upper[i] = Some(u);
            lower[i] = Some(l);
        }
        Ok(vec![upper, middle, lower])
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
            return vec![None, None, None];
        }
        let window: Vec<f64> = self.window.iter().copied().collect();
        let mean = window.iter().sum::<f64>() / self.period as f64;
        let (upper, lower) = Self::bands(&window, mean, self.multiplier);
        vec![Some(upper), Some(mean), Some(lower)]
    }

    fn fresh(&self) -> Box<dyn Indicator> {
        Box::new(Self {
            period: self.period,
            multiplier: self.multiplier,
            window: VecDeque::with_capacity(self.period),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support;

    #[test]
    fn test_band_ordering() {
        let candles = test_support::candles(60);
        let series = BollingerBands::new(14, 2.0).unwrap().bulk(&candles).unwrap();
        for i in 13..60 {
            let upper = series[0][i].unwrap();
            let middle = series[1][i].unwrap();
            let lower = series[2][i].unwrap();
            assert!(upper >= middle && middle >= lower);
        }
    }

    #[test]
    fn test_key_formats_whole_multiplier() {
        assert_eq!(BollingerBands::new(14, 2.0).unwrap().key(), "BBAND(14,2)");
        assert_eq!(
            BollingerBands::new(20, 1.5).unwrap().key(),
            "BBAND(20,1.5)"
        );
    }

    #[test]
    fn test_bollinger_parity() {
        let candles = test_support::candles(200);
        let mut indicator: Box<dyn Indicator> =
            Box::new(BollingerBands::new(14, 2.0).unwrap());
        test_support::assert_full_parity(&mut indicator, &candles);
    }

    #[test]
    fn test_flat_prices_collapse_bands() {
        let mut candles = test_support::candles(30);
        for candle in candles.iter_mut() {
            candle.close = 100.0;
        }
        let series = BollingerBands::new(14, 2.0).unwrap().bulk(&candles).unwrap();
        let last_upper = series[0].last().copied().flatten().unwrap();
        let last_lower = series[2].last().copied().flatten().unwrap();
        assert!((last_upper - 100.0).abs() < 1e-12);
        assert!((last_lower - 100.0).abs() < 1e-12);
    }
}
