/// Compact-ticker codec
///
/// The historical datastore stores option tickers in a compact form:
/// `{UNDERLYING}{DD}{MMM}{YY}{STRIKE}{CE|PE}` with an optional exchange
/// suffix, e.g. `NIFTY03OCT2425800CE.NFO`. Index and stock symbols pass
/// through unchanged. Conversions in both directions are exact inverses
/// for every representable symbol.
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::symbol::{OptionKind, Symbol};

use super::SymbolError;

static COMPACT_OPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]+?)(\d{2})([A-Z]{3})(\d{2})(\d+)(CE|PE)(?:\.([A-Z]+))?$")
        .expect("compact ticker pattern is valid")
});

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

fn month_number(name: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| *m == name)
        .map(|idx| idx as u32 + 1)
}

/// Whether a raw datastore symbol is a compact option ticker.
pub fn is_compact(symbol: &str) -> bool {
    COMPACT_OPTION.is_match(symbol)
}

/// Convert a datastore symbol to canonical form.
///
/// Compact option tickers are decoded; anything else (index, stock, or a
/// string already in canonical form) passes through via `Symbol::from_str`.
pub fn to_canonical(raw: &str) -> Result<Symbol, SymbolError> {
    if let Some(caps) = COMPACT_OPTION.captures(raw) {
        let underlying = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let day: u32 = caps[2].parse().unwrap_or(0);
        let month = month_number(&caps[3]).ok_or_else(|| SymbolError::InvalidCompactTicker {
            ticker: raw.to_string(),
            reason: format!("unknown month '{}'", &caps[3]),
        })?;
        let year: i32 = 2000 + caps[4].parse::<i32>().unwrap_or(0);
        let strike: i64 = caps[5]
            .parse()
            .map_err(|e| SymbolError::InvalidCompactTicker {
                ticker: raw.to_string(),
                reason: format!("bad strike: {e}"),
            })?;
        let kind = if &caps[6] == "CE" {
            OptionKind::CE
        } else {
            OptionKind::PE
        };
        let expiry = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            SymbolError::InvalidCompactTicker {
                ticker: raw.to_string(),
                reason: format!("no such date {year}-{month:02}-{day:02}"),
            }
        })?;
        return Ok(Symbol::option(underlying, expiry, strike, kind));
    }

    raw.parse::<Symbol>()
        .map_err(|reason| SymbolError::InvalidCompactTicker {
            ticker: raw.to_string(),
            reason,
        })
}

/// Render a canonical symbol in the datastore's compact form.
///
/// Index and future symbols pass through as their canonical string;
/// options become `UNDERLYINGDDMMMYYSTRIKE{CE|PE}` without an exchange
/// suffix.
pub fn from_canonical(symbol: &Symbol) -> Result<String, SymbolError> {
    match symbol {
        Symbol::Index(_) | Symbol::Future { .. } => Ok(symbol.to_string()),
        Symbol::Option {
            underlying,
            expiry,
            strike,
            kind,
        } => {
            let month = MONTHS
                .get(expiry.month0() as usize)
                .ok_or_else(|| SymbolError::NotRepresentable {
                    symbol: symbol.to_string(),
                    reason: format!("month {} out of range", expiry.month()),
                })?;
            Ok(format!(
                "{underlying}{:02}{month}{:02}{strike}{kind}",
                expiry.day(),
                expiry.year() % 100,
            ))
        }
    }
}
