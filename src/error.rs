//! Error types and result definitions.

use thiserror::Error;

/// Main error type for the engine.
///
/// The variants follow the failure taxonomy of the runtime: initialization,
/// data-integrity, and resolution failures are fatal and abort the run with
/// full context; order-lifecycle failures are handled locally by the owning
/// node and never surface here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// The engine refused to start (missing scrip data, missing expiries,
    /// indicator parity failure, historical candles unavailable).
    #[error("Initialization failed: {context}")]
    Initialization {
        /// What was being initialized and why it failed
        context: String,
    },

    /// A tick or symbol could not be trusted mid-run; re-raised on first
    /// occurrence to prevent silent divergence.
    #[error("Data integrity violation at {timestamp}: {context}")]
    DataIntegrity {
        /// Timestamp of the offending tick (engine wall-clock)
        timestamp: String,
        /// Error context
        context: String,
    },

    /// An option pattern could not be resolved to a concrete contract.
    #[error("Cannot resolve option pattern '{pattern}': {reason}")]
    Resolution {
        /// The pattern that failed, in `ALIAS:EXPIRY:STRIKE:TYPE` form
        pattern: String,
        /// Reason resolution failed
        reason: String,
    },

    /// The strategy document is malformed or references unknown nodes.
    #[error("Invalid strategy document: {0}")]
    StrategyDocument(String),

    /// Failed to parse a strategy document or report as JSON
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Symbol codec or scrip-cache failure
    #[error(transparent)]
    Symbol(#[from] crate::symbols::SymbolError),

    /// Expiry-code resolution failure
    #[error(transparent)]
    Expiry(#[from] crate::expiry::ExpiryError),

    /// Indicator construction or parity failure
    #[error(transparent)]
    Indicator(#[from] crate::indicators::IndicatorError),

    /// Historical datastore query failure
    #[error(transparent)]
    Datastore(#[from] crate::datastore::DatastoreError),

    /// Order placement failure outside the normal rejected/cancelled flow
    #[error(transparent)]
    Order(#[from] crate::orders::OrderError),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create an initialization error
    pub fn initialization(context: impl Into<String>) -> Self {
        Self::Initialization {
            context: context.into(),
        }
    }

    /// Create a data-integrity error stamped with the tick timestamp
    pub fn data_integrity(timestamp: impl ToString, context: impl Into<String>) -> Self {
        Self::DataIntegrity {
            timestamp: timestamp.to_string(),
            context: context.into(),
        }
    }

    /// Create a resolution error for an option pattern
    pub fn resolution(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create a strategy-document error
    pub fn document(msg: impl Into<String>) -> Self {
        Self::StrategyDocument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_error_message() {
        let err = EngineError::initialization("no candles for NIFTY:5m");
        assert!(err.to_string().contains("NIFTY:5m"));
    }

    #[test]
    fn test_resolution_error_message() {
        let err = EngineError::resolution("TI:W9:ATM:CE", "only 3 expiries available");
        assert!(err.to_string().contains("TI:W9:ATM:CE"));
        assert!(err.to_string().contains("3 expiries"));
    }

    #[test]
    fn test_data_integrity_carries_timestamp() {
        let err = EngineError::data_integrity("2024-10-01 09:17:02", "unknown symbol XYZ");
        assert!(err.to_string().contains("09:17:02"));
    }
}
