//! Central data management.
//!
//! The data manager owns everything the strategy reads: the LTP and
//! quote tables, the per-(symbol, timeframe) rings of completed candles
//! with their indicator columns, the candle builders, and the buffered
//! option tick streams loaded on demand. It settles fully for a tick
//! before the node graph runs, so every node in a cycle sees one
//! consistent snapshot.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, info, warn};

use crate::candles::CandleBuilder;
use crate::constants::{CANDLE_RING_CAPACITY, HISTORY_CANDLES};
use crate::datastore::HistoricalDatastore;
use crate::error::{EngineError, Result};
use crate::indicators::{self, Indicator};
use crate::models::tick::Quote;
use crate::models::{Candle, SecondTick, Symbol};
use crate::symbols::{self, ScripCache};

/// A completed candle plus its indicator columns.
#[derive(Debug, Clone)]
pub struct CandleRow {
    /// The completed candle
    pub candle: Candle,
    /// Indicator columns keyed by sanitized column name, e.g. `EMA_21`
    pub columns: BTreeMap<String, f64>,
}

impl CandleRow {
    /// Column lookup spanning candle fields and indicator columns.
    pub fn value(&self, field: &str) -> Option<f64> {
        match field {
            "open" => Some(self.candle.open),
            "high" => Some(self.candle.high),
            "low" => Some(self.candle.low),
            "close" => Some(self.candle.close),
            "volume" => Some(self.candle.volume as f64),
            other => self.columns.get(other).copied(),
        }
    }
}

/// Owns market state and the candle/indicator pipeline.
pub struct DataManager {
    store: Arc<dyn HistoricalDatastore>,
    scrips: Arc<ScripCache>,
    broker: Option<String>,
    day: NaiveDate,
    market_open: NaiveTime,

    ltp: HashMap<String, f64>,
    quotes: HashMap<String, Quote>,

    // "SYMBOL:TF" → indicator key → instance
    indicators: HashMap<String, BTreeMap<String, Box<dyn Indicator>>>,
    // "SYMBOL:TF" → bounded ring of completed candles
    buffers: HashMap<String, VecDeque<CandleRow>>,
    builders: BTreeMap<u32, CandleBuilder>,

    // canonical option symbol → pending per-second ticks, insertion order
    option_buffers: BTreeMap<String, VecDeque<SecondTick>>,
    // per-"SYMBOL:TF" count of candles completed during the run
    candle_counts: BTreeMap<String, u64>,
}

/// Ring/table key for a (symbol, timeframe) pair.
pub fn pair_key(symbol: &str, timeframe: u32) -> String {
    format!("{symbol}:{timeframe}m")
}

impl DataManager {
    /// Create a data manager for one backtest day.
    pub fn new(
        store: Arc<dyn HistoricalDatastore>,
        scrips: Arc<ScripCache>,
        day: NaiveDate,
        market_open: NaiveTime,
    ) -> Self {
        Self {
            store,
            scrips,
            broker: None,
            day,
            market_open,
            ltp: HashMap::new(),
            quotes: HashMap::new(),
            indicators: HashMap::new(),
            buffers: HashMap::new(),
            builders: BTreeMap::new(),
            option_buffers: BTreeMap::new(),
            candle_counts: BTreeMap::new(),
        }
    }

    /// Route unknown tick symbols through the scrip cache for this broker
    /// instead of rejecting them (live adapters).
    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = Some(broker.into());
        self
    }

    /// The backtest day this manager serves.
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Register an indicator instance for a (symbol, timeframe) pair.
    ///
    /// Returns the indicator key; duplicate keys collide to the first
    /// registered instance.
    pub fn register_indicator(
        &mut self,
        symbol: &str,
        timeframe: u32,
        indicator: Box<dyn Indicator>,
    ) -> String {
        let key = indicator.key();
        let slot = self.indicators.entry(pair_key(symbol, timeframe)).or_default();
        if slot.contains_key(&key) {
            debug!(%key, symbol, timeframe, "indicator already registered; sharing instance");
            return key;
        }
        info!(%key, symbol, timeframe, "registered indicator");
        slot.insert(key.clone(), indicator);
        key
    }

    /// Prepare every required (symbol, timeframe) pair: fetch history,
    /// verify and seed indicators, and populate the 20-candle ring.
    ///
    /// Pairs without history are fatal when indicators depend on them;
    /// otherwise the ring simply starts empty and fills from ticks.
    /// Option symbols are never pre-populated.
    pub fn initialize(&mut self, required: &[(String, u32)]) -> Result<()> {
        let open = self.day.and_time(self.market_open);

        for (symbol, timeframe) in required {
            self.builders
                .entry(*timeframe)
                .or_insert_with(|| CandleBuilder::new(*timeframe, self.market_open));

            let key = pair_key(symbol, *timeframe);
            let history = self
                .store
                .candles(symbol, *timeframe, open, HISTORY_CANDLES)?;

            let has_indicators = self
                .indicators
                .get(&key)
                .is_some_and(|slot| !slot.is_empty());

            if history.is_empty() {
                if has_indicators {
                    return Err(EngineError::initialization(format!(
                        "no historical candles for {key} but indicators are registered on it"
                    )));
                }
                warn!(%key, "no historical candles; ring will fill from ticks");
                self.buffers.entry(key.clone()).or_default();
                continue;
            }

            // Bulk-compute, check incremental parity, and seed live state;
            // collect the bulk columns so the trailing ring rows carry them.
            let mut columns: Vec<(String, Vec<Option<f64>>)> = Vec::new();
            if let Some(slot) = self.indicators.get_mut(&key) {
                for indicator in slot.values_mut() {
                    let names = indicators::column_names(indicator.as_ref());
                    let series = indicators::verify_and_initialize(indicator, &history)?;
                    info!(key = %indicator.key(), pair = %key, "indicator parity verified");
                    columns.extend(names.into_iter().zip(series));
                }
            }

            let tail = history.len().saturating_sub(CANDLE_RING_CAPACITY);
            let mut ring: VecDeque<CandleRow> = VecDeque::with_capacity(CANDLE_RING_CAPACITY);
            for (offset, candle) in history[tail..].iter().enumerate() {
                let row_idx = tail + offset;
                let mut row = CandleRow {
                    candle: candle.clone(),
                    columns: BTreeMap::new(),
                };
                for (name, series) in &columns {
                    if let Some(value) = series.get(row_idx).copied().flatten() {
                        row.columns.insert(name.clone(), value);
                    }
                }
                ring.push_back(row);
            }
            info!(%key, candles = ring.len(), "seeded candle ring from history");
            self.buffers.insert(key, ring);
        }
        Ok(())
    }

    /// Process one tick: normalize the symbol, refresh LTP/quotes, and
    /// (for indices and futures) advance the candle pipeline.
    ///
    /// Returns the tick rewritten with its canonical symbol.
    pub fn process_tick(&mut self, tick: &SecondTick) -> Result<SecondTick> {
        let symbol = self.normalize(&tick.symbol, tick.timestamp)?;
        let key = symbol.key();

        let mut normalized = tick.clone();
        normalized.symbol = key.clone();

        self.ltp.insert(key.clone(), normalized.ltp);
        self.quotes.insert(
            key.clone(),
            Quote {
                ltp: normalized.ltp,
                timestamp: normalized.timestamp,
                volume: normalized.volume,
                oi: normalized.oi,
            },
        );

        if !symbol.is_option() {
            let mut completed: Vec<(u32, Candle)> = Vec::new();
            for (timeframe, builder) in self.builders.iter_mut() {
                if let Some(candle) = builder.process_tick(&normalized) {
                    completed.push((*timeframe, candle));
                }
            }
            for (timeframe, candle) in completed {
                self.append_completed(&key, timeframe, candle);
            }
        }

        Ok(normalized)
    }

    fn append_completed(&mut self, symbol: &str, timeframe: u32, candle: Candle) {
        let key = pair_key(symbol, timeframe);
        let mut row = CandleRow {
            candle,
            columns: BTreeMap::new(),
        };

        if let Some(slot) = self.indicators.get_mut(&key) {
            for indicator in slot.values_mut() {
                let names = indicators::column_names(indicator.as_ref());
                let values = indicator.update(&row.candle);
                for (name, value) in names.into_iter().zip(values) {
                    if let Some(v) = value {
                        row.columns.insert(name, v);
                    }
                }
            }
        }

        debug!(%key, bucket = %row.candle.bucket_start, "completed candle");
        let ring = self.buffers.entry(key.clone()).or_default();
        ring.push_back(row);
        while ring.len() > CANDLE_RING_CAPACITY {
            ring.pop_front();
        }
        *self.candle_counts.entry(key).or_insert(0) += 1;
    }

    fn normalize(&self, raw: &str, timestamp: NaiveDateTime) -> Result<Symbol> {
        if let Ok(symbol) = symbols::to_canonical(raw) {
            return Ok(symbol);
        }
        if let Some(broker) = &self.broker {
            return self
                .scrips
                .to_canonical(broker, raw)
                .map_err(EngineError::from);
        }
        Err(EngineError::data_integrity(
            timestamp,
            format!("cannot normalize symbol '{raw}'"),
        ))
    }

    /// Load an option contract's remaining day of per-second ticks and
    /// seed its LTP. Idempotent; returns the first available LTP, or
    /// `None` when the contract has no data after `from`.
    pub fn load_option_contract(
        &mut self,
        symbol: &Symbol,
        from: NaiveDateTime,
    ) -> Result<Option<f64>> {
        let key = symbol.key();
        if self.option_buffers.contains_key(&key) {
            return Ok(self.ltp.get(&key).copied());
        }

        let ticker = symbols::from_canonical(symbol)?;
        let mut ticks = self.store.option_ticks(self.day, &ticker, from)?;
        // Canonical symbol on every buffered row
        for tick in &mut ticks {
            tick.symbol = key.clone();
        }

        if ticks.is_empty() {
            warn!(%key, %from, "no option ticks after subscription; contract stays unloaded");
            return Ok(None);
        }

        let first = ticks[0].clone();
        self.ltp.insert(key.clone(), first.ltp);
        self.quotes.insert(
            key.clone(),
            Quote {
                ltp: first.ltp,
                timestamp: first.timestamp,
                volume: first.volume,
                oi: first.oi,
            },
        );
        info!(%key, ticks = ticks.len(), first_ltp = first.ltp, %from, "loaded option contract");
        self.option_buffers.insert(key, ticks.into_iter().collect());
        Ok(Some(first.ltp))
    }

    /// Whether a contract has been loaded.
    pub fn is_option_loaded(&self, symbol: &Symbol) -> bool {
        self.option_buffers.contains_key(&symbol.key())
    }

    /// Pop every buffered option tick stamped exactly `ts`, across all
    /// loaded contracts (deterministic symbol order). Stale earlier
    /// ticks are dropped; later ticks stay buffered, so contracts never
    /// leak data from the future.
    pub fn drain_option_ticks_at(&mut self, ts: NaiveDateTime) -> Vec<SecondTick> {
        let mut drained = Vec::new();
        for queue in self.option_buffers.values_mut() {
            while let Some(front) = queue.front() {
                if front.timestamp < ts {
                    queue.pop_front();
                } else if front.timestamp == ts {
                    drained.push(queue.pop_front().expect("front checked above"));
                } else {
                    break;
                }
            }
        }
        drained
    }

    /// Last traded price for a canonical symbol key.
    pub fn ltp(&self, symbol: &str) -> Option<f64> {
        self.ltp.get(symbol).copied()
    }

    /// The full LTP table.
    pub fn ltp_table(&self) -> &HashMap<String, f64> {
        &self.ltp
    }

    /// Quote (price/timestamp/volume/oi) for a canonical symbol key.
    pub fn quote(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.get(symbol)
    }

    /// The completed-candle ring for a (symbol, timeframe) pair.
    pub fn candles(&self, symbol: &str, timeframe: u32) -> Option<&VecDeque<CandleRow>> {
        self.buffers.get(&pair_key(symbol, timeframe))
    }

    /// A ring row `offset` completed candles back (0 = latest).
    pub fn candle_at(&self, symbol: &str, timeframe: u32, offset: usize) -> Option<&CandleRow> {
        let ring = self.candles(symbol, timeframe)?;
        ring.len().checked_sub(1 + offset).and_then(|i| ring.get(i))
    }

    /// Candles completed during the run, per (symbol, timeframe) key.
    pub fn candle_counts(&self) -> &BTreeMap<String, u64> {
        &self.candle_counts
    }

    /// Force-complete every open bucket (end of day) and fold the
    /// resulting candles through the indicator/ring pipeline.
    pub fn force_flush_builders(&mut self) {
        let mut flushed: Vec<(u32, Candle)> = Vec::new();
        for (timeframe, builder) in self.builders.iter_mut() {
            for candle in builder.force_flush_all() {
                flushed.push((*timeframe, candle));
            }
        }
        for (timeframe, candle) in flushed {
            let symbol = candle.symbol.clone();
            self.append_completed(&symbol, timeframe, candle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use crate::indicators::test_support;
    use crate::models::strategy::IndicatorDef;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 1).unwrap()
    }

    fn open() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 15, 0).unwrap()
    }

    fn ema_def(period: u32) -> IndicatorDef {
        IndicatorDef {
            indicator_name: "EMA".into(),
            timeperiod: Some(period),
            fast_period: None,
            slow_period: None,
            signal_period: None,
            std_dev: None,
        }
    }

    fn manager_with_history() -> DataManager {
        let mut store = MemoryDatastore::new();
        // History strictly before the backtest day
        store.insert_candles("NIFTY", 1, test_support::candles(120));
        let mut dm = DataManager::new(
            Arc::new(store),
            Arc::new(ScripCache::new()),
            day(),
            open(),
        );
        let indicator = crate::indicators::build(&ema_def(21)).unwrap();
        dm.register_indicator("NIFTY", 1, indicator);
        dm.initialize(&[("NIFTY".into(), 1)]).unwrap();
        dm
    }

    fn index_tick(h: u32, m: u32, s: u32, price: f64) -> SecondTick {
        SecondTick::index(
            "NIFTY",
            day().and_hms_opt(h, m, s).unwrap(),
            price,
            price,
            price,
            price,
            100,
            0,
        )
    }

    #[test]
    fn test_initialize_trims_ring_to_capacity() {
        let dm = manager_with_history();
        let ring = dm.candles("NIFTY", 1).unwrap();
        assert_eq!(ring.len(), CANDLE_RING_CAPACITY);
        // Every seeded row carries the indicator column
        assert!(ring.iter().all(|row| row.columns.contains_key("EMA_21")));
    }

    #[test]
    fn test_initialize_without_indicators_still_seeds_ring() {
        let mut store = MemoryDatastore::new();
        store.insert_candles("NIFTY", 5, test_support::candles(40));
        let mut dm = DataManager::new(
            Arc::new(store),
            Arc::new(ScripCache::new()),
            day(),
            open(),
        );
        dm.initialize(&[("NIFTY".into(), 5)]).unwrap();
        assert_eq!(dm.candles("NIFTY", 5).unwrap().len(), CANDLE_RING_CAPACITY);
    }

    #[test]
    fn test_missing_history_with_indicators_is_fatal() {
        let store = MemoryDatastore::new();
        let mut dm = DataManager::new(
            Arc::new(store),
            Arc::new(ScripCache::new()),
            day(),
            open(),
        );
        dm.register_indicator("NIFTY", 1, crate::indicators::build(&ema_def(21)).unwrap());
        assert!(dm.initialize(&[("NIFTY".into(), 1)]).is_err());
    }

    #[test]
    fn test_process_tick_updates_ltp_and_completes_candles() {
        let mut dm = manager_with_history();
        dm.process_tick(&index_tick(9, 15, 0, 25_800.0)).unwrap();
        assert_eq!(dm.ltp("NIFTY"), Some(25_800.0));

        let before = dm.candles("NIFTY", 1).unwrap().len();
        // Next minute completes the 09:15 candle
        dm.process_tick(&index_tick(9, 16, 0, 25_810.0)).unwrap();
        let ring = dm.candles("NIFTY", 1).unwrap();
        assert_eq!(ring.len(), before.min(CANDLE_RING_CAPACITY));
        let last = ring.back().unwrap();
        assert_eq!(last.candle.close, 25_800.0);
        // The fresh candle got an incrementally-updated indicator column
        assert!(last.columns.contains_key("EMA_21"));
        assert_eq!(dm.candle_counts().get("NIFTY:1m"), Some(&1));
    }

    #[test]
    fn test_option_ticks_update_ltp_only() {
        let mut dm = manager_with_history();
        let tick = SecondTick::option(
            "NIFTY:2024-10-03:OPT:25800:CE",
            day().and_hms_opt(9, 17, 0).unwrap(),
            150.0,
        );
        dm.process_tick(&tick).unwrap();
        assert_eq!(dm.ltp("NIFTY:2024-10-03:OPT:25800:CE"), Some(150.0));
        assert!(dm.candles("NIFTY:2024-10-03:OPT:25800:CE", 1).is_none());
    }

    #[test]
    fn test_compact_ticker_normalized() {
        let mut dm = manager_with_history();
        let tick = SecondTick::option(
            "NIFTY03OCT2425800CE.NFO",
            day().and_hms_opt(9, 17, 0).unwrap(),
            151.5,
        );
        let normalized = dm.process_tick(&tick).unwrap();
        assert_eq!(normalized.symbol, "NIFTY:2024-10-03:OPT:25800:CE");
        assert_eq!(dm.ltp("NIFTY:2024-10-03:OPT:25800:CE"), Some(151.5));
    }

    #[test]
    fn test_unknown_symbol_is_data_integrity_error() {
        let mut dm = manager_with_history();
        let tick = SecondTick::option("???", day().and_hms_opt(9, 17, 0).unwrap(), 1.0);
        assert!(dm.process_tick(&tick).is_err());
    }

    #[test]
    fn test_load_and_drain_option_contract() {
        let mut store = MemoryDatastore::new();
        store.insert_candles("NIFTY", 1, test_support::candles(40));
        let ticks: Vec<SecondTick> = (0..60)
            .map(|s| {
                SecondTick::option(
                    "NIFTY03OCT2425800CE",
                    day().and_hms_opt(9, 17, s).unwrap(),
                    140.0 + s as f64,
                )
            })
            .collect();
        store.insert_option_ticks("NIFTY03OCT2425800CE", ticks);

        let mut dm = DataManager::new(
            Arc::new(store),
            Arc::new(ScripCache::new()),
            day(),
            open(),
        );
        dm.initialize(&[("NIFTY".into(), 1)]).unwrap();

        let symbol: Symbol = "NIFTY:2024-10-03:OPT:25800:CE".parse().unwrap();
        let from = day().and_hms_opt(9, 17, 10).unwrap();
        let first = dm.load_option_contract(&symbol, from).unwrap();
        assert_eq!(first, Some(150.0));
        assert!(dm.is_option_loaded(&symbol));

        // Idempotent
        assert_eq!(dm.load_option_contract(&symbol, from).unwrap(), Some(150.0));

        // Draining at a second yields exactly that second's tick
        let drained = dm.drain_option_ticks_at(day().and_hms_opt(9, 17, 12).unwrap());
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].ltp, 142.0);
        assert_eq!(drained[0].symbol, symbol.key());

        // The stale 9:17:10..11 ticks were dropped by the drain above;
        // the next drain starts after 9:17:12.
        let drained = dm.drain_option_ticks_at(day().and_hms_opt(9, 17, 13).unwrap());
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].ltp, 143.0);
    }

    #[test]
    fn test_load_option_contract_without_data() {
        let mut store = MemoryDatastore::new();
        store.insert_candles("NIFTY", 1, test_support::candles(40));
        let mut dm = DataManager::new(
            Arc::new(store),
            Arc::new(ScripCache::new()),
            day(),
            open(),
        );
        dm.initialize(&[("NIFTY".into(), 1)]).unwrap();
        let symbol: Symbol = "NIFTY:2024-10-03:OPT:99999:CE".parse().unwrap();
        let first = dm
            .load_option_contract(&symbol, day().and_hms_opt(9, 17, 0).unwrap())
            .unwrap();
        assert_eq!(first, None);
        assert!(!dm.is_option_loaded(&symbol));
    }

    #[test]
    fn test_force_flush_builders_appends_open_bucket() {
        let mut dm = manager_with_history();
        dm.process_tick(&index_tick(15, 29, 30, 25_900.0)).unwrap();
        dm.force_flush_builders();
        let last = dm.candles("NIFTY", 1).unwrap().back().unwrap().clone();
        assert_eq!(last.candle.close, 25_900.0);
    }
}
