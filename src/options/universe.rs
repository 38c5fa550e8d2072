/// Dynamic option universe.
///
/// Discovers contracts as spot moves: the first tick of an underlying
/// resolves every matching pattern at that spot's ATM and subscribes
/// the results; each later tick re-checks the ATM and, when it has
/// shifted by at least one strike interval, resolves again and
/// subscribes additively. Contracts are never unsubscribed, and a
/// (pattern, ATM) pair always resolves to the same contract, so an
/// oscillating spot reuses symbols instead of minting new ones.
use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::data::DataManager;
use crate::error::Result;
use crate::models::Symbol;

use super::pattern::{OptionPattern, PatternResolver};

/// Tracks ATM per underlying and the accumulated subscription set.
pub struct OptionUniverse {
    patterns: Vec<OptionPattern>,
    resolver: PatternResolver,
    trading_instrument: String,
    current_atm: HashMap<String, i64>,
    // (pattern key, ATM) → resolved contract
    resolution_cache: HashMap<(String, i64), Symbol>,
    subscribed: BTreeSet<String>,
}

impl OptionUniverse {
    /// Create a universe over the strategy's patterns.
    pub fn new(
        trading_instrument: impl Into<String>,
        patterns: Vec<OptionPattern>,
        resolver: PatternResolver,
    ) -> Self {
        Self {
            patterns,
            resolver,
            trading_instrument: trading_instrument.into(),
            current_atm: HashMap::new(),
            resolution_cache: HashMap::new(),
            subscribed: BTreeSet::new(),
        }
    }

    /// Canonical keys of every contract subscribed so far.
    pub fn subscribed(&self) -> &BTreeSet<String> {
        &self.subscribed
    }

    /// Feed one index tick. On discovery or an ATM shift of at least one
    /// interval, resolves all matching patterns and loads any new
    /// contracts through the data manager from `ts` forward.
    pub fn on_index_tick(
        &mut self,
        underlying: &str,
        spot: f64,
        ts: NaiveDateTime,
        data: &mut DataManager,
    ) -> Result<()> {
        let atm = self.resolver.atm(underlying, spot);
        match self.current_atm.get(underlying) {
            None => {
                info!(underlying, spot, atm, %ts, "index discovered");
                self.current_atm.insert(underlying.to_string(), atm);
                self.subscribe_all(underlying, spot, ts, data)
            }
            Some(&previous) => {
                let interval = self.resolver.interval(underlying) as i64;
                if (atm - previous).abs() >= interval {
                    info!(underlying, previous, atm, %ts, "ATM shifted; rebalancing");
                    self.current_atm.insert(underlying.to_string(), atm);
                    self.subscribe_all(underlying, spot, ts, data)
                } else {
                    Ok(())
                }
            }
        }
    }

    fn subscribe_all(
        &mut self,
        underlying: &str,
        spot: f64,
        ts: NaiveDateTime,
        data: &mut DataManager,
    ) -> Result<()> {
        let atm = self.resolver.atm(underlying, spot);
        let patterns: Vec<OptionPattern> = self
            .patterns
            .iter()
            .filter(|p| p.underlying(&self.trading_instrument) == underlying)
            .cloned()
            .collect();

        for pattern in patterns {
            let symbol = self.resolve_cached(&pattern, spot, ts, atm)?;
            let key = symbol.key();
            if self.subscribed.contains(&key) {
                continue;
            }
            data.load_option_contract(&symbol, ts)?;
            self.subscribed.insert(key.clone());
            info!(pattern = %pattern.key(), contract = %key, atm, "subscribed option contract");
        }
        Ok(())
    }

    fn resolve_cached(
        &mut self,
        pattern: &OptionPattern,
        spot: f64,
        ts: NaiveDateTime,
        atm: i64,
    ) -> Result<Symbol> {
        let cache_key = (pattern.key(), atm);
        if let Some(symbol) = self.resolution_cache.get(&cache_key) {
            debug!(pattern = %pattern.key(), atm, contract = %symbol, "pattern cache hit");
            return Ok(symbol.clone());
        }
        let symbol = self.resolver.resolve(pattern, spot, ts.date())?;
        self.resolution_cache.insert(cache_key, symbol.clone());
        Ok(symbol)
    }

    /// Resolve a pattern for an entry node at the current spot, through
    /// the same (pattern, ATM) cache the subscription path uses, so an
    /// entry always trades the contract the universe streamed.
    pub fn resolve_for_entry(
        &mut self,
        pattern: &OptionPattern,
        spot: f64,
        ts: NaiveDateTime,
    ) -> Result<Symbol> {
        let underlying = pattern.underlying(&self.trading_instrument).to_string();
        let atm = self.resolver.atm(&underlying, spot);
        self.resolve_cached(pattern, spot, ts, atm)
    }
}
