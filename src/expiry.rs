//! Expiry-code resolution.
//!
//! Expiry codes index into the sorted list of expiries the datastore
//! knows about on the reference date. No weekday assumptions are made:
//! `W<k>` is simply the (k+1)th expiry; `M<k>`, `Q<k>`, and `Y<k>` take
//! the last expiry within the (k+1)th distinct month, quarter, and year.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

use crate::datastore::HistoricalDatastore;

/// Errors raised while resolving expiry codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExpiryError {
    /// The code itself is malformed
    #[error("Invalid expiry code '{code}': expected W/M/Q/Y followed by an offset")]
    InvalidCode {
        /// The offending code
        code: String,
    },

    /// No expiry data exists for the underlying
    #[error("No expiry data for '{underlying}' on or after {reference_date}")]
    NoData {
        /// The underlying queried
        underlying: String,
        /// Reference date of the query
        reference_date: NaiveDate,
    },

    /// The list has fewer groups than the offset requires
    #[error("Not enough {unit} expiries for '{code}' on {underlying}: only {available} available")]
    NotEnough {
        /// `weekly`, `monthly`, `quarterly`, or `yearly`
        unit: &'static str,
        /// The code that overran the list
        code: String,
        /// The underlying queried
        underlying: String,
        /// How many groups the list holds
        available: usize,
    },

    /// The datastore failed to answer
    #[error(transparent)]
    Datastore(#[from] crate::datastore::DatastoreError),
}

/// A parsed expiry code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpiryCode {
    /// Grouping unit
    pub unit: ExpiryUnit,
    /// Zero-based offset into the group list
    pub offset: usize,
}

/// Grouping unit of an expiry code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryUnit {
    /// Nth expiry overall
    Weekly,
    /// Last expiry of the Nth distinct month
    Monthly,
    /// Last expiry of the Nth distinct quarter
    Quarterly,
    /// Last expiry of the Nth distinct year
    Yearly,
}

impl ExpiryCode {
    /// Parse a code such as `W0`, `M1`, `Q0`, `Y2`.
    pub fn parse(code: &str) -> Result<Self, ExpiryError> {
        let invalid = || ExpiryError::InvalidCode {
            code: code.to_string(),
        };
        let mut chars = code.chars();
        let unit = match chars.next().ok_or_else(invalid)? {
            'W' => ExpiryUnit::Weekly,
            'M' => ExpiryUnit::Monthly,
            'Q' => ExpiryUnit::Quarterly,
            'Y' => ExpiryUnit::Yearly,
            _ => return Err(invalid()),
        };
        let offset: usize = chars.as_str().parse().map_err(|_| invalid())?;
        Ok(Self { unit, offset })
    }
}

impl std::fmt::Display for ExpiryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self.unit {
            ExpiryUnit::Weekly => 'W',
            ExpiryUnit::Monthly => 'M',
            ExpiryUnit::Quarterly => 'Q',
            ExpiryUnit::Yearly => 'Y',
        };
        write!(f, "{unit}{}", self.offset)
    }
}

/// Resolves expiry codes against the datastore, caching the expiry list
/// per (underlying, reference date) so a backtest day queries once.
pub struct ExpiryCalculator {
    store: Arc<dyn HistoricalDatastore>,
    cache: HashMap<(String, NaiveDate), Vec<NaiveDate>>,
}

impl ExpiryCalculator {
    /// Create a calculator over the given datastore.
    pub fn new(store: Arc<dyn HistoricalDatastore>) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    /// Warm the cache for a set of underlyings on the backtest date.
    pub fn preload(
        &mut self,
        underlyings: &[String],
        reference_date: NaiveDate,
    ) -> Result<(), ExpiryError> {
        for underlying in underlyings {
            self.expiries_for(underlying, reference_date)?;
        }
        Ok(())
    }

    /// Resolve an expiry code for an underlying on a reference date.
    pub fn resolve(
        &mut self,
        underlying: &str,
        code: ExpiryCode,
        reference_date: NaiveDate,
    ) -> Result<NaiveDate, ExpiryError> {
        let expiries = self.expiries_for(underlying, reference_date)?;
        if expiries.is_empty() {
            return Err(ExpiryError::NoData {
                underlying: underlying.to_string(),
                reference_date,
            });
        }

        let not_enough = |unit: &'static str, available: usize| ExpiryError::NotEnough {
            unit,
            code: code.to_string(),
            underlying: underlying.to_string(),
            available,
        };

        match code.unit {
            ExpiryUnit::Weekly => expiries
                .get(code.offset)
                .copied()
                .ok_or_else(|| not_enough("weekly", expiries.len())),
            ExpiryUnit::Monthly => {
                last_per_group(&expiries, |d| (d.year(), d.month()), code.offset)
                    .ok_or_else(|| not_enough("monthly", group_count(&expiries, |d| (d.year(), d.month()))))
            }
            ExpiryUnit::Quarterly => {
                last_per_group(&expiries, |d| (d.year(), (d.month0()) / 3), code.offset).ok_or_else(
                    || not_enough("quarterly", group_count(&expiries, |d| (d.year(), d.month0() / 3))),
                )
            }
            ExpiryUnit::Yearly => last_per_group(&expiries, |d| d.year(), code.offset)
                .ok_or_else(|| not_enough("yearly", group_count(&expiries, |d| d.year()))),
        }
    }

    fn expiries_for(
        &mut self,
        underlying: &str,
        reference_date: NaiveDate,
    ) -> Result<Vec<NaiveDate>, ExpiryError> {
        let key = (underlying.to_string(), reference_date);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let mut expiries = self.store.expiries(underlying, reference_date)?;
        expiries.sort();
        expiries.dedup();
        self.cache.insert(key, expiries.clone());
        Ok(expiries)
    }
}

/// Last expiry within the Nth distinct group; the list is sorted, so
/// within each group the last element wins.
fn last_per_group<K: PartialEq + Copy>(
    expiries: &[NaiveDate],
    group: impl Fn(&NaiveDate) -> K,
    offset: usize,
) -> Option<NaiveDate> {
    let mut groups: Vec<(K, NaiveDate)> = Vec::new();
    for expiry in expiries {
        let key = group(expiry);
        match groups.last_mut() {
            Some((last_key, last_date)) if *last_key == key => *last_date = *expiry,
            _ => groups.push((key, *expiry)),
        }
    }
    groups.get(offset).map(|(_, date)| *date)
}

fn group_count<K: PartialEq + Copy>(
    expiries: &[NaiveDate],
    group: impl Fn(&NaiveDate) -> K,
) -> usize {
    let mut count = 0;
    let mut last: Option<K> = None;
    for expiry in expiries {
        let key = group(expiry);
        if last != Some(key) {
            count += 1;
            last = Some(key);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryDatastore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calculator() -> ExpiryCalculator {
        let mut store = MemoryDatastore::new();
        store.insert_expiries(
            "NIFTY",
            vec![
                date(2024, 10, 3),
                date(2024, 10, 10),
                date(2024, 10, 17),
                date(2024, 10, 24),
                date(2024, 10, 31),
                date(2024, 11, 7),
                date(2024, 11, 28),
                date(2024, 12, 26),
                date(2025, 3, 27),
                date(2025, 12, 24),
            ],
        );
        ExpiryCalculator::new(Arc::new(store))
    }

    #[test]
    fn test_parse_codes() {
        assert_eq!(
            ExpiryCode::parse("W0").unwrap(),
            ExpiryCode {
                unit: ExpiryUnit::Weekly,
                offset: 0
            }
        );
        assert_eq!(ExpiryCode::parse("M12").unwrap().offset, 12);
        assert!(ExpiryCode::parse("X0").is_err());
        assert!(ExpiryCode::parse("W").is_err());
        assert!(ExpiryCode::parse("").is_err());
    }

    #[test]
    fn test_weekly_is_positional() {
        let mut calc = calculator();
        let reference = date(2024, 10, 1);
        assert_eq!(
            calc.resolve("NIFTY", ExpiryCode::parse("W0").unwrap(), reference)
                .unwrap(),
            date(2024, 10, 3)
        );
        assert_eq!(
            calc.resolve("NIFTY", ExpiryCode::parse("W1").unwrap(), reference)
                .unwrap(),
            date(2024, 10, 10)
        );
    }

    #[test]
    fn test_monthly_takes_last_of_month() {
        let mut calc = calculator();
        let reference = date(2024, 10, 1);
        assert_eq!(
            calc.resolve("NIFTY", ExpiryCode::parse("M0").unwrap(), reference)
                .unwrap(),
            date(2024, 10, 31)
        );
        assert_eq!(
            calc.resolve("NIFTY", ExpiryCode::parse("M1").unwrap(), reference)
                .unwrap(),
            date(2024, 11, 28)
        );
    }

    #[test]
    fn test_quarterly_and_yearly() {
        let mut calc = calculator();
        let reference = date(2024, 10, 1);
        // Q0 covers Oct-Dec 2024, last expiry 2024-12-26
        assert_eq!(
            calc.resolve("NIFTY", ExpiryCode::parse("Q0").unwrap(), reference)
                .unwrap(),
            date(2024, 12, 26)
        );
        // Y1 is the last expiry of 2025
        assert_eq!(
            calc.resolve("NIFTY", ExpiryCode::parse("Y1").unwrap(), reference)
                .unwrap(),
            date(2025, 12, 24)
        );
    }

    #[test]
    fn test_overrun_is_an_error() {
        let mut calc = calculator();
        let err = calc
            .resolve("NIFTY", ExpiryCode::parse("Y5").unwrap(), date(2024, 10, 1))
            .unwrap_err();
        assert!(matches!(err, ExpiryError::NotEnough { .. }));
    }

    #[test]
    fn test_no_data_is_an_error() {
        let mut calc = calculator();
        let err = calc
            .resolve("SENSEX", ExpiryCode::parse("W0").unwrap(), date(2024, 10, 1))
            .unwrap_err();
        assert!(matches!(err, ExpiryError::NoData { .. }));
    }

    #[test]
    fn test_reference_date_filters_past() {
        let mut calc = calculator();
        // From November, W0 skips all October expiries
        assert_eq!(
            calc.resolve("NIFTY", ExpiryCode::parse("W0").unwrap(), date(2024, 11, 1))
                .unwrap(),
            date(2024, 11, 7)
        );
    }
}
