//! Final backtest report.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::positions::Position;

/// One equity-curve sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    /// Sample timestamp
    pub timestamp: NaiveDateTime,
    /// Cumulative realized + unrealized P&L at the sample
    pub pnl: f64,
    /// Distance below the running P&L peak
    pub drawdown: f64,
}

/// Per-position P&L line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionPnl {
    /// VPI of the position
    pub position_id: String,
    /// Symbol traded
    pub symbol: String,
    /// Realized P&L (plus unrealized when still open)
    pub pnl: f64,
}

/// Everything a run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestReport {
    /// Strategy name from the document
    pub strategy_name: Option<String>,
    /// Backtest day
    pub day: NaiveDate,
    /// Every position with its entry and exit records
    pub positions: Vec<Position>,
    /// Per-position P&L
    pub position_pnls: Vec<PositionPnl>,
    /// Number of closed trades
    pub trades: usize,
    /// Aggregate P&L across positions
    pub total_pnl: f64,
    /// Deepest peak-to-trough P&L drawdown observed
    pub max_drawdown: f64,
    /// Equity-curve samples (one per tick batch with exposure)
    pub equity_curve: Vec<EquityPoint>,
    /// Candles completed during the run, per `SYMBOL:TFm` key
    pub candle_counts: BTreeMap<String, u64>,
    /// Whether a square-off (or drain) ended the strategy
    pub strategy_ended: bool,
    /// Ticks processed by the run
    pub ticks_processed: u64,
}

impl BacktestReport {
    /// Assemble the report from the run's final state.
    pub fn assemble(
        strategy_name: Option<String>,
        day: NaiveDate,
        positions: Vec<Position>,
        equity_curve: Vec<EquityPoint>,
        candle_counts: BTreeMap<String, u64>,
        strategy_ended: bool,
        ticks_processed: u64,
    ) -> Self {
        let position_pnls: Vec<PositionPnl> = positions
            .iter()
            .map(|p| PositionPnl {
                position_id: p.position_id.clone(),
                symbol: p.symbol.clone(),
                pnl: p.realized_pnl() + p.unrealized_pnl(),
            })
            .collect();
        let trades = positions.iter().filter(|p| !p.is_open()).count();
        let total_pnl = position_pnls.iter().map(|p| p.pnl).sum();
        let max_drawdown = equity_curve
            .iter()
            .map(|e| e.drawdown)
            .fold(0.0_f64, f64::max);

        Self {
            strategy_name,
            day,
            positions,
            position_pnls,
            trades,
            total_pnl,
            max_drawdown,
            equity_curve,
            candle_counts,
            strategy_ended,
            ticks_processed,
        }
    }
}

/// Running equity tracker feeding the report.
#[derive(Debug, Default)]
pub struct EquityTracker {
    samples: Vec<EquityPoint>,
    peak: f64,
}

impl EquityTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample.
    pub fn record(&mut self, timestamp: NaiveDateTime, pnl: f64) {
        self.peak = self.peak.max(pnl);
        self.samples.push(EquityPoint {
            timestamp,
            pnl,
            drawdown: self.peak - pnl,
        });
    }

    /// The collected samples.
    pub fn into_samples(self) -> Vec<EquityPoint> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use crate::positions::{EntryData, PositionStore};

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_equity_tracker_drawdown() {
        let mut tracker = EquityTracker::new();
        tracker.record(ts(9, 20), 100.0);
        tracker.record(ts(9, 21), 250.0);
        tracker.record(ts(9, 22), 40.0);
        tracker.record(ts(9, 23), 260.0);
        let samples = tracker.into_samples();
        assert_eq!(samples[1].drawdown, 0.0);
        assert_eq!(samples[2].drawdown, 210.0);
        assert_eq!(samples[3].drawdown, 0.0);
    }

    #[test]
    fn test_report_aggregates() {
        let mut store = PositionStore::new();
        let vpi = store.open_position(EntryData {
            node_id: "e".into(),
            symbol: "NIFTY:2024-10-03:OPT:25800:CE".into(),
            quantity: 50,
            side: OrderSide::Buy,
            price: 140.0,
            time: ts(9, 17),
            re_entry_num: 0,
            spot: None,
        });
        store.close_position(
            &vpi,
            crate::positions::ExitRecord {
                node_id: "x".into(),
                price: 150.0,
                time: ts(10, 30),
                reason: "exit_condition_met".into(),
                trigger_node_id: None,
                re_entry_num: 0,
                spot: None,
            },
        );

        let mut tracker = EquityTracker::new();
        tracker.record(ts(10, 30), 500.0);
        let report = BacktestReport::assemble(
            Some("demo".into()),
            NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            store.get_all_positions().to_vec(),
            tracker.into_samples(),
            BTreeMap::new(),
            true,
            1_234,
        );
        assert_eq!(report.trades, 1);
        assert!((report.total_pnl - 500.0).abs() < 1e-9);
        assert_eq!(report.position_pnls.len(), 1);
        assert_eq!(report.max_drawdown, 0.0);
        assert!(report.strategy_ended);

        // Serializes cleanly for downstream consumers
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"totalPnl\""));
    }
}
