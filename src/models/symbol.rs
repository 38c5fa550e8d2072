/// Canonical symbol module
///
/// The string grammar every component speaks internally:
/// `NIFTY`, `NIFTY:2024-10-03:FUT`, `NIFTY:2024-10-03:OPT:25800:CE`.
/// Broker and datastore spellings are converted at the boundary by the
/// symbol codec.
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Call/put side of an option contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    /// Call option
    CE,
    /// Put option
    PE,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CE => write!(f, "CE"),
            Self::PE => write!(f, "PE"),
        }
    }
}

impl FromStr for OptionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CE" => Ok(Self::CE),
            "PE" => Ok(Self::PE),
            other => Err(format!("invalid option kind '{other}', expected CE or PE")),
        }
    }
}

/// A canonical in-process symbol.
///
/// `Display` and `FromStr` round-trip through the canonical string form,
/// which is also the key used in LTP tables and candle buffers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// An index or stock, e.g. `NIFTY`
    Index(String),
    /// A future, e.g. `NIFTY:2024-10-31:FUT`
    Future {
        /// Underlying index or stock
        underlying: String,
        /// Contract expiry date
        expiry: NaiveDate,
    },
    /// An option contract, e.g. `NIFTY:2024-10-03:OPT:25800:CE`
    Option {
        /// Underlying index or stock
        underlying: String,
        /// Contract expiry date
        expiry: NaiveDate,
        /// Strike price (whole points)
        strike: i64,
        /// Call or put
        kind: OptionKind,
    },
}

impl Symbol {
    /// Construct an index symbol.
    pub fn index(name: impl Into<String>) -> Self {
        Self::Index(name.into())
    }

    /// Construct an option symbol.
    pub fn option(
        underlying: impl Into<String>,
        expiry: NaiveDate,
        strike: i64,
        kind: OptionKind,
    ) -> Self {
        Self::Option {
            underlying: underlying.into(),
            expiry,
            strike,
            kind,
        }
    }

    /// Whether this symbol is an option contract.
    ///
    /// Only indices and futures get candle buffers; options track LTP only.
    pub fn is_option(&self) -> bool {
        matches!(self, Self::Option { .. })
    }

    /// The underlying name (the symbol itself for indices).
    pub fn underlying(&self) -> &str {
        match self {
            Self::Index(name) => name,
            Self::Future { underlying, .. } | Self::Option { underlying, .. } => underlying,
        }
    }

    /// Owned canonical string form, usable as a map key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Whether a raw string is already in canonical form.
    pub fn is_canonical(s: &str) -> bool {
        s.parse::<Symbol>().is_ok()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(name) => write!(f, "{name}"),
            Self::Future { underlying, expiry } => write!(f, "{underlying}:{expiry}:FUT"),
            Self::Option {
                underlying,
                expiry,
                strike,
                kind,
            } => write!(f, "{underlying}:{expiry}:OPT:{strike}:{kind}"),
        }
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [name] if is_valid_name(name) => Ok(Self::Index(name.to_string())),
            [underlying, date, "FUT"] => {
                let expiry = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|e| format!("invalid expiry '{date}' in '{s}': {e}"))?;
                Ok(Self::Future {
                    underlying: underlying.to_string(),
                    expiry,
                })
            }
            [underlying, date, "OPT", strike, kind] => {
                let expiry = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|e| format!("invalid expiry '{date}' in '{s}': {e}"))?;
                let strike = strike
                    .parse::<i64>()
                    .map_err(|e| format!("invalid strike '{strike}' in '{s}': {e}"))?;
                let kind = kind.parse::<OptionKind>()?;
                Ok(Self::Option {
                    underlying: underlying.to_string(),
                    expiry,
                    strike,
                    kind,
                })
            }
            _ => Err(format!("invalid canonical symbol '{s}'")),
        }
    }
}

/// Index/stock names are alphanumeric plus the `&`, `-`, `_` that NSE
/// tickers use (`M&M`, `BAJAJ-AUTO`).
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '&' | '-' | '_'))
}
