/// Scrip-master cache
///
/// Live brokers publish daily scrip masters mapping their trading
/// symbols to instrument tokens and lot sizes. The cache ingests those
/// CSVs once at startup and answers lookups in both directions; it is
/// immutable afterwards and injected wherever needed. A miss at lookup
/// time is a hard error, never a silent fallback.
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::models::Symbol;

use super::SymbolError;

/// One row of a broker scrip master.
#[derive(Debug, Clone, Deserialize)]
pub struct ScripEntry {
    /// Broker name, e.g. `angelone`
    pub broker: String,
    /// Broker-side trading symbol
    pub tradingsymbol: String,
    /// Canonical symbol string
    pub canonical: String,
    /// Broker instrument token
    pub token: String,
    /// Contract lot size
    pub lot_size: i64,
    /// Exchange segment
    pub exchange: String,
}

/// Immutable lookup table over ingested scrip masters.
#[derive(Debug, Default)]
pub struct ScripCache {
    by_broker_symbol: HashMap<(String, String), ScripEntry>,
    by_canonical: HashMap<(String, String), ScripEntry>,
}

impl ScripCache {
    /// Create an empty cache (useful when a backtest needs no broker data).
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a scrip master CSV from a reader.
    pub fn ingest<R: Read>(&mut self, reader: R) -> Result<usize, SymbolError> {
        self.ingest_rows(csv::Reader::from_reader(reader))
    }

    /// Ingest a scrip master CSV from disk.
    pub fn ingest_file(&mut self, path: impl AsRef<Path>) -> Result<usize, SymbolError> {
        self.ingest_rows(csv::Reader::from_path(path)?)
    }

    fn ingest_rows<R: Read>(&mut self, mut reader: csv::Reader<R>) -> Result<usize, SymbolError> {
        let mut ingested = 0;
        for row in reader.deserialize::<ScripEntry>() {
            let entry = row?;
            self.by_broker_symbol.insert(
                (entry.broker.clone(), entry.tradingsymbol.clone()),
                entry.clone(),
            );
            self.by_canonical
                .insert((entry.broker.clone(), entry.canonical.clone()), entry);
            ingested += 1;
        }
        Ok(ingested)
    }

    /// Number of distinct (broker, tradingsymbol) entries.
    pub fn len(&self) -> usize {
        self.by_broker_symbol.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.by_broker_symbol.is_empty()
    }

    /// Translate a broker trading symbol to canonical form.
    pub fn to_canonical(&self, broker: &str, tradingsymbol: &str) -> Result<Symbol, SymbolError> {
        let entry = self
            .by_broker_symbol
            .get(&(broker.to_string(), tradingsymbol.to_string()))
            .ok_or_else(|| SymbolError::ScripNotFound {
                what: "tradingsymbol",
                key: tradingsymbol.to_string(),
                broker: broker.to_string(),
            })?;
        entry
            .canonical
            .parse::<Symbol>()
            .map_err(|reason| SymbolError::InvalidCompactTicker {
                ticker: entry.canonical.clone(),
                reason,
            })
    }

    /// Translate a canonical symbol to a broker trading symbol.
    pub fn from_canonical(&self, broker: &str, symbol: &Symbol) -> Result<&str, SymbolError> {
        self.entry_for(broker, symbol)
            .map(|e| e.tradingsymbol.as_str())
    }

    /// Broker instrument token for a canonical symbol.
    pub fn get_token(&self, broker: &str, symbol: &Symbol) -> Result<&str, SymbolError> {
        self.entry_for(broker, symbol).map(|e| e.token.as_str())
    }

    /// Contract lot size for a canonical symbol.
    pub fn get_lot_size(&self, broker: &str, symbol: &Symbol) -> Result<i64, SymbolError> {
        self.entry_for(broker, symbol).map(|e| e.lot_size)
    }

    fn entry_for(&self, broker: &str, symbol: &Symbol) -> Result<&ScripEntry, SymbolError> {
        self.by_canonical
            .get(&(broker.to_string(), symbol.key()))
            .ok_or_else(|| SymbolError::ScripNotFound {
                what: "canonical",
                key: symbol.key(),
                broker: broker.to_string(),
            })
    }
}
