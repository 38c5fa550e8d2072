//! Symbol codec and scrip-master cache.
//!
//! Everything inside the engine speaks the canonical symbol form (see
//! [`crate::models::Symbol`]); this module owns the two boundary
//! translations: the datastore's compact option tickers and the
//! per-broker scrip masters.

mod codec;
mod scrip;

pub use codec::{from_canonical, is_compact, to_canonical};
pub use scrip::{ScripCache, ScripEntry};

use thiserror::Error;

/// Errors raised by symbol translation and scrip lookups.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SymbolError {
    /// A compact ticker did not match the expected grammar
    #[error("Invalid compact ticker '{ticker}': {reason}")]
    InvalidCompactTicker {
        /// The offending ticker
        ticker: String,
        /// Why it failed to parse
        reason: String,
    },

    /// A canonical symbol could not be rendered in compact form
    #[error("Cannot render '{symbol}' as a compact ticker: {reason}")]
    NotRepresentable {
        /// The canonical symbol
        symbol: String,
        /// Why it cannot be rendered
        reason: String,
    },

    /// A scrip lookup found no entry; missing scrip data is a hard error
    #[error("Scrip not found for {what} '{key}' (broker: {broker})")]
    ScripNotFound {
        /// What was looked up (`tradingsymbol` or `canonical`)
        what: &'static str,
        /// The lookup key
        key: String,
        /// Broker the lookup was scoped to
        broker: String,
    },

    /// The scrip master file could not be read or parsed
    #[error("Failed to ingest scrip master: {0}")]
    ScripIngest(#[from] csv::Error),
}
