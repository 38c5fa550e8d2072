//! Chronological tick source.
//!
//! Walks a dense per-second timeline from market open to close. Each
//! second is processed in order: index ticks for that second are fed to
//! the option universe (which may subscribe new contracts), matching
//! option ticks are drained from the data manager's buffers, and the
//! merged batch is handed back to the engine. Seconds with no data
//! advance silently; the source never reads past the current second to
//! produce data for an earlier one, and normalization failures are
//! fatal on first occurrence.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::info;

use crate::data::DataManager;
use crate::datastore::HistoricalDatastore;
use crate::error::{EngineError, Result};
use crate::models::SecondTick;
use crate::options::OptionUniverse;
use crate::symbols;

/// Second-batched merger of index and subscribed option ticks.
pub struct TickSource {
    index_batches: BTreeMap<NaiveDateTime, Vec<SecondTick>>,
    cursor: NaiveDateTime,
    close: NaiveDateTime,
    ticks_emitted: u64,
}

impl TickSource {
    /// Load the day's index ticks and build the dense timeline.
    pub fn open(
        store: &dyn HistoricalDatastore,
        day: NaiveDate,
        symbols: &[String],
        market_open: NaiveTime,
        market_close: NaiveTime,
    ) -> Result<Self> {
        let rows = store.index_ticks(day, symbols)?;
        let mut index_batches: BTreeMap<NaiveDateTime, Vec<SecondTick>> = BTreeMap::new();
        for row in rows {
            index_batches.entry(row.timestamp).or_default().push(row);
        }
        info!(
            day = %day,
            seconds = index_batches.len(),
            "tick source opened"
        );
        Ok(Self {
            index_batches,
            cursor: day.and_time(market_open),
            close: day.and_time(market_close),
            ticks_emitted: 0,
        })
    }

    /// Total ticks yielded so far.
    pub fn ticks_emitted(&self) -> u64 {
        self.ticks_emitted
    }

    /// Produce the next non-empty merged batch, or `None` at end of day.
    ///
    /// Index ticks reach the universe before options are drained, so a
    /// contract subscribed at second `t` can already deliver its tick at
    /// `t`; it can never deliver anything earlier.
    pub fn advance(
        &mut self,
        data: &mut DataManager,
        universe: &mut OptionUniverse,
    ) -> Result<Option<Vec<SecondTick>>> {
        while self.cursor <= self.close {
            let second = self.cursor;
            self.cursor += Duration::seconds(1);

            let mut batch: Vec<SecondTick> = Vec::new();
            if let Some(index_ticks) = self.index_batches.remove(&second) {
                for mut tick in index_ticks {
                    let symbol = symbols::to_canonical(&tick.symbol).map_err(|e| {
                        EngineError::data_integrity(second, format!("tick source: {e}"))
                    })?;
                    tick.symbol = symbol.key();
                    universe.on_index_tick(symbol.underlying(), tick.ltp, second, data)?;
                    batch.push(tick);
                }
            }

            batch.extend(data.drain_option_ticks_at(second));

            if !batch.is_empty() {
                self.ticks_emitted += batch.len() as u64;
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }
}
