//! In-memory price provider backed by a fixed row set.
//!
//! Serves offline runs (rows loaded from CSV) and tests (rows added by hand,
//! failures injected per date). Every lookup is recorded so callers can check
//! how many upstream calls a fetch actually made.

use super::provider::{finite, DataError, DataSource, PriceProvider, PriceRow, PriceTable};
use crate::domain::InstrumentId;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// One recorded `fetch_daily` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub symbols: Vec<InstrumentId>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// CSV layout: `symbol,date,open,high,low,close,adj_close,volume`.
/// Empty cells are read as missing values.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    symbol: String,
    date: NaiveDate,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    adj_close: Option<f64>,
    volume: Option<u64>,
}

#[derive(Debug, Default)]
pub struct StaticProvider {
    rows: BTreeMap<InstrumentId, Vec<PriceRow>>,
    failing_dates: BTreeSet<NaiveDate>,
    source: Option<DataSource>,
    calls: Mutex<Vec<ProviderCall>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row for `symbol`. Rows are kept sorted by date.
    pub fn with_row(mut self, symbol: impl Into<InstrumentId>, row: PriceRow) -> Self {
        self.insert(symbol.into(), row);
        self
    }

    /// Add a row carrying only close fields.
    pub fn with_close(
        self,
        symbol: impl Into<InstrumentId>,
        date: NaiveDate,
        close: Option<f64>,
        adj_close: Option<f64>,
    ) -> Self {
        self.with_row(symbol, PriceRow::closes(date, close, adj_close))
    }

    /// Make every lookup whose window starts on `date` fail with a network error.
    pub fn fail_on(mut self, date: NaiveDate) -> Self {
        self.failing_dates.insert(date);
        self
    }

    /// Load rows from a CSV file.
    pub fn from_csv(path: &Path) -> Result<Self, DataError> {
        let file = std::fs::File::open(path)
            .map_err(|e| DataError::Csv(format!("open {}: {e}", path.display())))?;
        Self::from_reader(file)
    }

    /// Load rows from any CSV source with a header line.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut provider = Self {
            source: Some(DataSource::CsvImport),
            ..Self::default()
        };
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        for (line, record) in csv_reader.deserialize::<CsvRecord>().enumerate() {
            // +2: header line and 1-based numbering
            let record = record.map_err(|e| DataError::Csv(format!("line {}: {e}", line + 2)))?;
            if record.symbol.is_empty() {
                return Err(DataError::Csv(format!("line {}: empty symbol", line + 2)));
            }
            let row = PriceRow {
                date: record.date,
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
                adj_close: record.adj_close,
                volume: record.volume,
            };
            provider.insert(record.symbol, row);
        }
        Ok(provider)
    }

    fn insert(&mut self, symbol: InstrumentId, row: PriceRow) {
        let rows = self.rows.entry(symbol).or_default();
        let at = rows.partition_point(|r| r.date <= row.date);
        rows.insert(at, normalize(row));
    }

    pub fn source(&self) -> DataSource {
        self.source.unwrap_or(DataSource::Fixture)
    }

    pub fn symbol_count(&self) -> usize {
        self.rows.len()
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn rows_in_window(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Option<Vec<PriceRow>> {
        let rows: Vec<PriceRow> = self
            .rows
            .get(symbol)?
            .iter()
            .filter(|r| r.date >= start && r.date < end)
            .cloned()
            .collect();
        (!rows.is_empty()).then_some(rows)
    }
}

fn normalize(row: PriceRow) -> PriceRow {
    PriceRow {
        open: finite(row.open),
        high: finite(row.high),
        low: finite(row.low),
        close: finite(row.close),
        adj_close: finite(row.adj_close),
        ..row
    }
}

impl PriceProvider for StaticProvider {
    fn name(&self) -> &str {
        match self.source() {
            DataSource::CsvImport => "csv",
            _ => "static",
        }
    }

    fn fetch_daily(
        &self,
        symbols: &[InstrumentId],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable, DataError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProviderCall {
                symbols: symbols.to_vec(),
                start,
                end,
            });

        if self.failing_dates.contains(&start) {
            return Err(DataError::NetworkUnreachable(format!(
                "simulated outage for {start}"
            )));
        }

        let by_symbol = symbols
            .iter()
            .filter_map(|s| Some((s.clone(), self.rows_in_window(s, start, end)?)))
            .collect();
        Ok(PriceTable::for_request(symbols, by_symbol))
    }
}
