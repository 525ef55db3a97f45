//! Price provider trait and structured error types.
//!
//! The PriceProvider trait abstracts over upstream market-data sources (Yahoo
//! Finance, CSV fixtures, in-memory tables) so the fetcher never depends on a
//! particular service and can be exercised against a mock in tests.

use crate::domain::InstrumentId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One daily row returned by an upstream provider.
///
/// Every price field is optional: upstream tables routinely carry holes for
/// halted sessions, fresh listings, or fields the provider does not compute.
/// Providers normalize NaN and infinities to `None` before handing rows out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adj_close: Option<f64>,
    pub volume: Option<u64>,
}

impl PriceRow {
    /// Row with only the two close fields populated.
    pub fn closes(date: NaiveDate, close: Option<f64>, adj_close: Option<f64>) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close: finite(close),
            adj_close: finite(adj_close),
            volume: None,
        }
    }

    /// True when no price field carries a value.
    pub fn is_void(&self) -> bool {
        self.open.is_none()
            && self.high.is_none()
            && self.low.is_none()
            && self.close.is_none()
            && self.adj_close.is_none()
    }
}

/// Drop NaN and infinities.
pub(crate) fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Raw upstream response for one batched lookup.
///
/// The shape depends on how many symbols were requested: a single-symbol
/// lookup comes back as a flat row set with no instrument dimension, while a
/// multi-symbol lookup is keyed by symbol. Symbols the provider knows nothing
/// about are simply absent from `ByInstrument`.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceTable {
    Flat(Vec<PriceRow>),
    ByInstrument(BTreeMap<InstrumentId, Vec<PriceRow>>),
}

impl PriceTable {
    /// Shape an upstream answer the way providers must: flat for exactly one
    /// requested symbol, keyed otherwise.
    pub fn for_request(
        symbols: &[InstrumentId],
        mut rows_by_symbol: BTreeMap<InstrumentId, Vec<PriceRow>>,
    ) -> Self {
        match symbols {
            [only] => PriceTable::Flat(rows_by_symbol.remove(only).unwrap_or_default()),
            _ => PriceTable::ByInstrument(rows_by_symbol),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PriceTable::Flat(rows) => rows.is_empty(),
            PriceTable::ByInstrument(by_symbol) => by_symbol.values().all(Vec::is_empty),
        }
    }
}

/// A named numeric field of a [`PriceRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    AdjClose,
    Close,
    Open,
    High,
    Low,
}

impl PriceField {
    /// Adjusted close first, raw close second.
    pub const CLOSE_FALLBACK: [PriceField; 2] = [PriceField::AdjClose, PriceField::Close];

    pub fn read(self, row: &PriceRow) -> Option<f64> {
        let value = match self {
            PriceField::AdjClose => row.adj_close,
            PriceField::Close => row.close,
            PriceField::Open => row.open,
            PriceField::High => row.high,
            PriceField::Low => row.low,
        };
        finite(value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriceField::AdjClose => "adj_close",
            PriceField::Close => "close",
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriceField {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adj_close" | "adjclose" | "adj close" => Ok(PriceField::AdjClose),
            "close" => Ok(PriceField::Close),
            "open" => Ok(PriceField::Open),
            "high" => Ok(PriceField::High),
            "low" => Ok(PriceField::Low),
            other => Err(DataError::Other(format!("unknown price field '{other}'"))),
        }
    }
}

/// Structured error types for upstream lookups.
///
/// These are designed to be displayable in CLI output and log records.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Where a price table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    CsvImport,
    Fixture,
}

/// Upstream market-data collaborator.
///
/// `fetch_daily` receives a sorted, deduplicated symbol list and a half-open
/// date range `[start, end)`. It must either return a table shaped by
/// [`PriceTable::for_request`] or an error; it never signals failure through
/// a silently malformed table.
pub trait PriceProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily rows for every symbol in one batched lookup.
    fn fetch_daily(
        &self,
        symbols: &[InstrumentId],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

impl<P: PriceProvider + ?Sized> PriceProvider for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_daily(
        &self,
        symbols: &[InstrumentId],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable, DataError> {
        (**self).fetch_daily(symbols, start, end)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

impl<P: PriceProvider + ?Sized> PriceProvider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_daily(
        &self,
        symbols: &[InstrumentId],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable, DataError> {
        (**self).fetch_daily(symbols, start, end)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}
