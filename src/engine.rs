//! Engine wiring and the main run loop.
//!
//! One engine run replays one trading day: initialize the data manager
//! from history, build the node graph, then drive the per-second tick
//! loop (the data manager settles first, then one scheduler cycle, then
//! the position price refresh) until the graph drains, a square-off
//! fires, or the tick source reaches market close.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::constants::sessions;
use crate::data::DataManager;
use crate::datastore::HistoricalDatastore;
use crate::error::Result;
use crate::expiry::ExpiryCalculator;
use crate::graph::{CycleCtx, CycleOutcome, NodeGraph, Scheduler};
use crate::indicators;
use crate::models::StrategyDocument;
use crate::models::strategy::parse_timeframe;
use crate::options::{OptionPattern, OptionUniverse, PatternResolver};
use crate::orders::OrderPlacer;
use crate::positions::{ExitRecord, PositionStore};
use crate::results::{BacktestReport, EquityTracker};
use crate::symbols::ScripCache;
use crate::ticks::TickSource;

/// Backtest engine for one datastore and scrip universe.
pub struct Engine {
    store: Arc<dyn HistoricalDatastore>,
    scrips: Arc<ScripCache>,
}

impl Engine {
    /// Create an engine over a datastore and scrip cache.
    pub fn new(store: Arc<dyn HistoricalDatastore>, scrips: Arc<ScripCache>) -> Self {
        Self { store, scrips }
    }

    /// Replay one strategy over one trading day.
    pub fn run(
        &self,
        document: &StrategyDocument,
        day: NaiveDate,
        orders: &mut dyn OrderPlacer,
    ) -> Result<BacktestReport> {
        let config = document.trading_config()?;
        let underlying = config.underlying.clone();
        let market_open = sessions::market_open(&config.exchange);
        let market_close = day.and_time(sessions::market_close(&config.exchange));

        info!(
            strategy = document.strategy_name.as_deref().unwrap_or("unnamed"),
            %underlying,
            %day,
            "initializing backtest"
        );

        // Data manager: indicators registered first so initialization can
        // verify parity and seed state while loading history.
        let mut data = DataManager::new(
            self.store.clone(),
            self.scrips.clone(),
            day,
            market_open,
        );
        for timeframe_config in &config.timeframes {
            let minutes = parse_timeframe(&timeframe_config.timeframe)?;
            for def in timeframe_config.indicators.values() {
                let indicator = indicators::build(def)?;
                data.register_indicator(&underlying, minutes, indicator);
            }
        }
        let required: Vec<(String, u32)> = document
            .timeframes()?
            .into_iter()
            .map(|minutes| (underlying.clone(), minutes))
            .collect();
        data.initialize(&required)?;

        // Option universe over the document's patterns
        let patterns = document
            .option_patterns()
            .iter()
            .map(|raw| OptionPattern::parse(raw))
            .collect::<Result<Vec<_>>>()?;
        let mut expiry = ExpiryCalculator::new(self.store.clone());
        if !patterns.is_empty() {
            let underlyings: Vec<String> = patterns
                .iter()
                .map(|p| p.underlying(&underlying).to_string())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            expiry.preload(&underlyings, day)?;
        }
        let mut universe = OptionUniverse::new(
            underlying.clone(),
            patterns,
            PatternResolver::new(underlying.clone(), expiry),
        );

        // Node graph and scheduler
        let graph = NodeGraph::from_document(document)?;
        let mut scheduler = Scheduler::new(graph, underlying.clone());

        // Tick stream
        let mut source = TickSource::open(
            self.store.as_ref(),
            day,
            std::slice::from_ref(&underlying),
            market_open,
            sessions::market_close(&config.exchange),
        )?;

        let mut positions = PositionStore::new();
        let mut equity = EquityTracker::new();

        while let Some(batch) = source.advance(&mut data, &mut universe)? {
            let now = batch[0].timestamp;

            // Data settles fully before the graph runs
            for tick in &batch {
                data.process_tick(tick)?;
            }

            let mut ctx = CycleCtx {
                data: &mut data,
                universe: &mut universe,
                positions: &mut positions,
                orders: &mut *orders,
                now,
                market_close,
            };
            let outcome = scheduler.cycle(&mut ctx)?;

            positions.update_prices(data.ltp_table());
            if !positions.get_all_positions().is_empty() {
                equity.record(now, positions.total_pnl());
            }

            if outcome == CycleOutcome::Terminated {
                info!(%now, "run terminated before market close");
                break;
            }
        }

        // End of day: flush open candle buckets, then close whatever the
        // graph left open (only reachable when no square-off fired).
        data.force_flush_builders();
        if !positions.get_open_positions().is_empty() {
            let spot = data.ltp(&underlying);
            for vpi in positions.open_position_ids() {
                let Some(position) = positions.get(&vpi) else {
                    continue;
                };
                let price = data.ltp(&position.symbol).unwrap_or(position.current_price);
                let re_entry_num = position.re_entry_num;
                warn!(%vpi, price, "position open at end of day; forcing close");
                positions.close_position(
                    &vpi,
                    ExitRecord {
                        node_id: "end-of-day".into(),
                        price,
                        time: market_close,
                        reason: "forced_square_off".into(),
                        trigger_node_id: None,
                        re_entry_num,
                        spot,
                    },
                );
            }
            equity.record(market_close, positions.total_pnl());
        }

        let report = BacktestReport::assemble(
            document.strategy_name.clone(),
            day,
            positions.get_all_positions().to_vec(),
            equity.into_samples(),
            data.candle_counts().clone(),
            scheduler.strategy_ended() || scheduler.terminated(),
            source.ticks_emitted(),
        );
        info!(
            trades = report.trades,
            total_pnl = report.total_pnl,
            ticks = report.ticks_processed,
            "backtest complete"
        );
        Ok(report)
    }
}
