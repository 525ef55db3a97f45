//! Domain types: identifiers, date groups, and the result mapping.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Ticker/symbol naming a tradable instrument. Case-sensitive.
pub type InstrumentId = String;

/// Closing prices for one date, keyed by instrument.
pub type DatePrices = BTreeMap<InstrumentId, f64>;

/// Closing prices by date. A date or instrument with no usable price is
/// absent, never present as an empty map or a placeholder value.
pub type PriceResult = BTreeMap<NaiveDate, DatePrices>;

/// Every identifier requested for one calendar date, deduplicated and sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub symbols: Vec<InstrumentId>,
}

impl DateGroup {
    pub fn new<I, S>(date: NaiveDate, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unique: BTreeSet<InstrumentId> = symbols
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        Self {
            date,
            symbols: unique.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Exclusive end of the lookup window `[date, date + 1 day)`.
    pub fn end(&self) -> NaiveDate {
        self.date
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
    }
}

/// Normalize a date → identifiers request into date groups.
///
/// Identifiers are deduplicated and sorted per date, a date listed more than
/// once is merged, groups left empty are dropped, and the result is ordered
/// by date.
pub fn date_groups<'a, R, C, S>(request: R) -> Vec<DateGroup>
where
    R: IntoIterator<Item = (&'a NaiveDate, &'a C)>,
    C: ?Sized + 'a,
    &'a C: IntoIterator<Item = &'a S>,
    S: AsRef<str> + ?Sized + 'a,
{
    let mut merged: BTreeMap<NaiveDate, BTreeSet<InstrumentId>> = BTreeMap::new();
    for (date, symbols) in request {
        merged
            .entry(*date)
            .or_default()
            .extend(symbols.into_iter().map(|s| s.as_ref().to_string()));
    }

    merged
        .into_iter()
        .filter(|(_, symbols)| !symbols.is_empty())
        .map(|(date, symbols)| DateGroup {
            date,
            symbols: symbols.into_iter().collect(),
        })
        .collect()
}
