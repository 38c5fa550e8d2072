//! # tradegraph
//!
//! A deterministic backtesting engine for declarative options-trading
//! strategies. Strategies arrive as directed graphs of typed nodes
//! (start, entry/exit signals, entries, exits, re-entry signals, square
//! off); the engine replays one trading day of per-second ticks through
//! that graph, building multi-timeframe candles with incrementally
//! updated indicators, resolving dynamic option contracts as spot moves,
//! and reporting realized P&L.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use tradegraph::datastore::MemoryDatastore;
//! use tradegraph::orders::BacktestOrderPlacer;
//! use tradegraph::symbols::ScripCache;
//! use tradegraph::{Engine, StrategyDocument};
//!
//! fn main() -> tradegraph::Result<()> {
//!     let mut store = MemoryDatastore::new();
//!     // ... insert historical candles, index ticks, option ticks, expiries ...
//!
//!     let json = std::fs::read_to_string("strategy.json").expect("strategy file");
//!     let document = StrategyDocument::from_json(&json)?;
//!     let engine = Engine::new(Arc::new(store), Arc::new(ScripCache::new()));
//!     let mut orders = BacktestOrderPlacer::new();
//!     let report = engine.run(
//!         &document,
//!         NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
//!         &mut orders,
//!     )?;
//!
//!     println!("trades: {}", report.trades);
//!     println!("total P&L: {:.2}", report.total_pnl);
//!     Ok(())
//! }
//! ```
//!
//! ## Determinism
//!
//! The engine is single-threaded and synchronous: ticks are processed
//! strictly in order, the data manager settles fully before the node
//! graph runs, and option contracts become visible only at or after
//! their subscription timestamp. The same input stream always produces
//! the same positions and P&L.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// Tick-to-candle folding per timeframe
pub mod candles;
/// Exchange sessions, strike intervals, and sizing constants
pub mod constants;
/// The data manager: LTP, candle rings, indicators, option buffers
pub mod data;
/// Historical datastore query interface and in-memory implementation
pub mod datastore;
/// Engine wiring and the main run loop
pub mod engine;
/// Error types and result definitions
pub mod error;
/// Expiry-code resolution (W/M/Q/Y)
pub mod expiry;
/// Strategy node graph and the per-tick scheduler
pub mod graph;
/// Technical indicators with verified bulk/incremental parity
pub mod indicators;
/// Core data types
pub mod models;
/// Option pattern resolution and the dynamic contract universe
pub mod options;
/// Order placement boundary
pub mod orders;
/// Position store
pub mod positions;
/// Final backtest report
pub mod results;
/// Symbol codec and scrip-master cache
pub mod symbols;
/// Chronological tick source
pub mod ticks;

// Re-export main types
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use models::{Candle, SecondTick, StrategyDocument, Symbol};
pub use results::BacktestReport;
