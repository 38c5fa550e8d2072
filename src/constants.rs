//! Exchange sessions, strike intervals, and engine-wide sizing constants.

use chrono::NaiveTime;

/// Exchange trading sessions (naive exchange wall-clock).
pub mod sessions {
    use chrono::NaiveTime;

    /// NSE/BSE cash and derivatives session open
    pub const NSE_OPEN: (u32, u32) = (9, 15);
    /// NSE/BSE session close
    pub const NSE_CLOSE: (u32, u32) = (15, 30);
    /// MCX/NCDEX commodity session open
    pub const MCX_OPEN: (u32, u32) = (9, 0);
    /// MCX session close
    pub const MCX_CLOSE: (u32, u32) = (23, 30);

    /// Market open for an exchange, defaulting to the NSE session.
    pub fn market_open(exchange: &str) -> NaiveTime {
        let (h, m) = match exchange.to_ascii_uppercase().as_str() {
            "MCX" | "NCDEX" => MCX_OPEN,
            _ => NSE_OPEN,
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// Market close for an exchange, defaulting to the NSE session.
    pub fn market_close(exchange: &str) -> NaiveTime {
        let (h, m) = match exchange.to_ascii_uppercase().as_str() {
            "MCX" | "NCDEX" => MCX_CLOSE,
            _ => NSE_CLOSE,
        };
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }
}

/// Strike-ladder intervals per underlying.
pub mod strike_intervals {
    /// Fallback interval for underlyings not in the table
    pub const DEFAULT: f64 = 100.0;

    /// Strike interval for an underlying index.
    pub fn for_underlying(underlying: &str) -> f64 {
        match underlying {
            "NIFTY" | "FINNIFTY" => 50.0,
            "BANKNIFTY" | "SENSEX" | "BANKEX" => 100.0,
            "MIDCPNIFTY" => 25.0,
            _ => DEFAULT,
        }
    }
}

/// Number of historical candles fetched per (symbol, timeframe) at startup.
pub const HISTORY_CANDLES: usize = 500;

/// Capacity of the per-(symbol, timeframe) completed-candle ring.
pub const CANDLE_RING_CAPACITY: usize = 20;

/// Absolute tolerance for bulk-vs-incremental indicator parity.
pub const INDICATOR_PARITY_TOLERANCE: f64 = 1e-6;

/// Convenience wrapper over [`sessions::market_open`] for the default exchange.
pub fn default_market_open() -> NaiveTime {
    sessions::market_open("NSE")
}
