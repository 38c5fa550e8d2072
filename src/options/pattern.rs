/// Option patterns and their resolution to concrete contracts.
///
/// A pattern such as `TI:W0:ATM:CE` names a contract relative to spot:
/// the trading-instrument alias, an expiry code, a moneyness code, and
/// the option side. Resolution happens in exactly one place, so
/// pattern syntax never leaks into the rest of the engine.
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use crate::constants::strike_intervals;
use crate::error::{EngineError, Result};
use crate::expiry::{ExpiryCalculator, ExpiryCode};
use crate::models::Symbol;
use crate::models::symbol::OptionKind;

/// Moneyness relative to the rounded spot.
///
/// Offsets step by the underlying's strike interval: ITM strikes sit
/// below ATM, OTM strikes above, regardless of option side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrikeCode {
    /// At the money
    Atm,
    /// `k` strikes in the money, `1 ≤ k ≤ 16`
    Itm(u8),
    /// `k` strikes out of the money, `1 ≤ k ≤ 16`
    Otm(u8),
}

impl StrikeCode {
    /// Signed strike offset in interval steps.
    pub fn offset(self) -> i64 {
        match self {
            Self::Atm => 0,
            Self::Itm(k) => -(k as i64),
            Self::Otm(k) => k as i64,
        }
    }
}

impl fmt::Display for StrikeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atm => write!(f, "ATM"),
            Self::Itm(k) => write!(f, "ITM{k}"),
            Self::Otm(k) => write!(f, "OTM{k}"),
        }
    }
}

impl FromStr for StrikeCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "ATM" {
            return Ok(Self::Atm);
        }
        let depth_of = |rest: &str| -> std::result::Result<u8, String> {
            let depth: u8 = rest
                .parse()
                .map_err(|_| format!("invalid strike depth in '{s}'"))?;
            if (1..=16).contains(&depth) {
                Ok(depth)
            } else {
                Err(format!("strike depth {depth} out of range 1..=16 in '{s}'"))
            }
        };
        if let Some(rest) = s.strip_prefix("ITM") {
            return depth_of(rest).map(Self::Itm);
        }
        if let Some(rest) = s.strip_prefix("OTM") {
            return depth_of(rest).map(Self::Otm);
        }
        Err(format!("invalid strike code '{s}'"))
    }
}

/// A dynamic option target from a strategy node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionPattern {
    /// Underlying alias: `TI`/`SI` for the configured instrument, or an
    /// explicit underlying name
    pub underlying_alias: String,
    /// Expiry code (`W0`, `M1`, ...)
    pub expiry_code: ExpiryCode,
    /// Moneyness code
    pub strike_code: StrikeCode,
    /// Call or put
    pub option_kind: OptionKind,
}

impl OptionPattern {
    /// Parse `ALIAS:EXPIRY:STRIKE:TYPE`, e.g. `TI:W0:ATM:CE`.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        let [alias, expiry, strike, kind] = parts.as_slice() else {
            return Err(EngineError::resolution(
                raw,
                "expected ALIAS:EXPIRY:STRIKE:TYPE",
            ));
        };
        Ok(Self {
            underlying_alias: alias.to_string(),
            expiry_code: ExpiryCode::parse(expiry)
                .map_err(|e| EngineError::resolution(raw, e.to_string()))?,
            strike_code: strike
                .parse()
                .map_err(|e: String| EngineError::resolution(raw, e))?,
            option_kind: kind
                .parse()
                .map_err(|e: String| EngineError::resolution(raw, e))?,
        })
    }

    /// Whether a raw string has pattern shape (as opposed to a canonical
    /// symbol or bare underlying).
    pub fn is_pattern(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    /// The pattern in its string form, usable as a cache key.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.underlying_alias, self.expiry_code, self.strike_code, self.option_kind
        )
    }

    /// The concrete underlying this pattern targets.
    pub fn underlying<'a>(&'a self, trading_instrument: &'a str) -> &'a str {
        match self.underlying_alias.as_str() {
            "TI" | "SI" => trading_instrument,
            other => other,
        }
    }
}

/// Resolves patterns to concrete contracts at a (spot, reference date).
pub struct PatternResolver {
    trading_instrument: String,
    expiry: ExpiryCalculator,
}

impl PatternResolver {
    /// Create a resolver bound to the strategy's trading instrument.
    pub fn new(trading_instrument: impl Into<String>, expiry: ExpiryCalculator) -> Self {
        Self {
            trading_instrument: trading_instrument.into(),
            expiry,
        }
    }

    /// The ATM strike for an underlying at a spot price.
    pub fn atm(&self, underlying: &str, spot: f64) -> i64 {
        let interval = strike_intervals::for_underlying(underlying);
        ((spot / interval).round() * interval) as i64
    }

    /// Strike interval for an underlying, from the fixed table.
    pub fn interval(&self, underlying: &str) -> f64 {
        strike_intervals::for_underlying(underlying)
    }

    /// Resolve a pattern at (spot, reference date) to exactly one
    /// concrete contract.
    pub fn resolve(
        &mut self,
        pattern: &OptionPattern,
        spot: f64,
        reference_date: NaiveDate,
    ) -> Result<Symbol> {
        let underlying = pattern.underlying(&self.trading_instrument).to_string();
        let interval = strike_intervals::for_underlying(&underlying);
        let atm = self.atm(&underlying, spot);
        let strike = atm + pattern.strike_code.offset() * interval as i64;
        if strike <= 0 {
            return Err(EngineError::resolution(
                pattern.key(),
                format!("resolved strike {strike} is not positive (spot {spot})"),
            ));
        }
        let expiry = self
            .expiry
            .resolve(&underlying, pattern.expiry_code, reference_date)
            .map_err(|e| EngineError::resolution(pattern.key(), e.to_string()))?;
        Ok(Symbol::option(underlying, expiry, strike, pattern.option_kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;
    use std::sync::Arc;

    fn resolver() -> PatternResolver {
        let mut store = MemoryDatastore::new();
        store.insert_expiries(
            "NIFTY",
            vec![
                NaiveDate::from_ymd_opt(2024, 10, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 10, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 10, 31).unwrap(),
            ],
        );
        PatternResolver::new("NIFTY", ExpiryCalculator::new(Arc::new(store)))
    }

    #[test]
    fn test_parse_pattern() {
        let pattern = OptionPattern::parse("TI:W0:ATM:CE").unwrap();
        assert_eq!(pattern.underlying_alias, "TI");
        assert_eq!(pattern.strike_code, StrikeCode::Atm);
        assert_eq!(pattern.key(), "TI:W0:ATM:CE");
    }

    #[test]
    fn test_parse_rejects_bad_patterns() {
        assert!(OptionPattern::parse("TI:W0:ATM").is_err());
        assert!(OptionPattern::parse("TI:W0:ITM17:CE").is_err());
        assert!(OptionPattern::parse("TI:W0:ITM0:CE").is_err());
        assert!(OptionPattern::parse("TI:X0:ATM:CE").is_err());
        assert!(OptionPattern::parse("TI:W0:ATM:XX").is_err());
    }

    #[test]
    fn test_is_pattern() {
        assert!(OptionPattern::is_pattern("TI:W0:OTM5:PE"));
        assert!(!OptionPattern::is_pattern("NIFTY"));
        assert!(!OptionPattern::is_pattern("NIFTY:2024-10-03:OPT:25800:CE"));
    }

    #[test]
    fn test_atm_rounds_to_interval() {
        let resolver = resolver();
        assert_eq!(resolver.atm("NIFTY", 25_800.0), 25_800);
        assert_eq!(resolver.atm("NIFTY", 25_824.9), 25_800);
        assert_eq!(resolver.atm("NIFTY", 25_825.0), 25_850);
        assert_eq!(resolver.atm("BANKNIFTY", 51_949.0), 51_900);
    }

    #[test]
    fn test_resolve_atm_and_offsets() {
        let mut resolver = resolver();
        let reference = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();

        let atm = OptionPattern::parse("TI:W0:ATM:CE").unwrap();
        assert_eq!(
            resolver.resolve(&atm, 25_800.0, reference).unwrap().key(),
            "NIFTY:2024-10-03:OPT:25800:CE"
        );

        let otm5 = OptionPattern::parse("TI:W0:OTM5:CE").unwrap();
        assert_eq!(
            resolver.resolve(&otm5, 25_800.0, reference).unwrap().key(),
            "NIFTY:2024-10-03:OPT:26050:CE"
        );

        let itm2 = OptionPattern::parse("TI:M0:ITM2:PE").unwrap();
        assert_eq!(
            resolver.resolve(&itm2, 25_800.0, reference).unwrap().key(),
            "NIFTY:2024-10-31:OPT:25700:PE"
        );
    }

    #[test]
    fn test_unresolvable_expiry_is_resolution_error() {
        let mut resolver = resolver();
        let reference = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let pattern = OptionPattern::parse("TI:W9:ATM:CE").unwrap();
        let err = resolver.resolve(&pattern, 25_800.0, reference).unwrap_err();
        assert!(matches!(err, EngineError::Resolution { .. }));
    }
}
