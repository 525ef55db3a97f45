//! PriceFetcher: date-batched close price lookups.
//!
//! One upstream call is issued per distinct date, covering every identifier
//! requested for that date. Upstream call count is therefore bounded by the
//! number of dates, however many identifiers each date carries.
//!
//! Failure handling is per date group: an upstream error is reported to the
//! [`FetchObserver`] and recorded in the [`FetchReport`], the date is left out
//! of the result, and the remaining dates are processed as usual. A fetch as a
//! whole never fails.

pub mod extract;
pub mod observer;

pub use extract::{extract_prices, first_price};
pub use observer::{FetchObserver, SilentObserver, TracingObserver};

use crate::data::{DataError, PriceField, PriceProvider};
use crate::domain::{date_groups, DateGroup, DatePrices, InstrumentId, PriceResult};
use crate::fingerprint::RequestFingerprint;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// A date group whose upstream lookup failed.
#[derive(Debug)]
pub struct GroupFailure {
    pub date: NaiveDate,
    pub symbols: Vec<InstrumentId>,
    pub error: DataError,
}

/// Everything learned while fetching a request.
#[derive(Debug)]
pub struct FetchReport {
    pub fingerprint: RequestFingerprint,
    pub prices: PriceResult,
    pub upstream_calls: usize,
    pub failures: Vec<GroupFailure>,
    /// Symbols whose lookup succeeded but yielded no usable price, per date.
    /// Covers both "did not trade" and "bad data"; the two are not told apart.
    pub unpriced: BTreeMap<NaiveDate, Vec<InstrumentId>>,
}

impl FetchReport {
    /// True when every requested (date, symbol) pair got a price.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.unpriced.is_empty()
    }

    /// Number of (date, symbol) pairs that got a price.
    pub fn priced_count(&self) -> usize {
        self.prices.values().map(BTreeMap::len).sum()
    }
}

/// Fetches closing prices for a date → identifiers request.
pub struct PriceFetcher<P> {
    provider: P,
    fields: Vec<PriceField>,
    observer: Box<dyn FetchObserver>,
}

impl<P: PriceProvider> PriceFetcher<P> {
    /// Adjusted close with close fallback, failures logged through `tracing`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            fields: PriceField::CLOSE_FALLBACK.to_vec(),
            observer: Box::new(TracingObserver),
        }
    }

    /// Replace the ordered list of candidate fields. An empty list keeps the
    /// current one.
    pub fn with_fields(mut self, fields: Vec<PriceField>) -> Self {
        if !fields.is_empty() {
            self.fields = fields;
        }
        self
    }

    pub fn with_observer(mut self, observer: impl FetchObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn fields(&self) -> &[PriceField] {
        &self.fields
    }

    /// Closing price per date and identifier. Dates and identifiers without a
    /// usable price are absent from the result.
    pub fn fetch_prices<'a, R, C, S>(&self, request: R) -> PriceResult
    where
        R: IntoIterator<Item = (&'a NaiveDate, &'a C)>,
        C: ?Sized + 'a,
        &'a C: IntoIterator<Item = &'a S>,
        S: AsRef<str> + ?Sized + 'a,
    {
        self.fetch_report(request).prices
    }

    /// Like [`fetch_prices`](Self::fetch_prices) but keeps failures, call
    /// count and unpriced symbols alongside the prices.
    pub fn fetch_report<'a, R, C, S>(&self, request: R) -> FetchReport
    where
        R: IntoIterator<Item = (&'a NaiveDate, &'a C)>,
        C: ?Sized + 'a,
        &'a C: IntoIterator<Item = &'a S>,
        S: AsRef<str> + ?Sized + 'a,
    {
        self.fetch_groups(&date_groups(request))
    }

    /// Process normalized groups strictly in order. Once the provider reports
    /// itself unavailable, the remaining groups fail without an upstream call.
    fn fetch_groups(&self, groups: &[DateGroup]) -> FetchReport {
        let fingerprint = RequestFingerprint::of(groups);
        let span = tracing::info_span!(
            "fetch_prices",
            request = fingerprint.short(),
            provider = self.provider.name(),
            groups = groups.len(),
        );
        let _enter = span.enter();

        let mut report = FetchReport {
            fingerprint,
            prices: PriceResult::new(),
            upstream_calls: 0,
            failures: Vec::new(),
            unpriced: BTreeMap::new(),
        };

        for group in groups.iter().filter(|g| !g.is_empty()) {
            self.observer.on_group_start(group);
            let outcome = if self.provider.is_available() {
                report.upstream_calls += 1;
                self.fetch_group(group)
            } else {
                Err(DataError::CircuitBreakerTripped)
            };

            let prices = match outcome {
                Ok(prices) => prices,
                Err(error) => {
                    self.observer.on_group_failed(group, &error);
                    report.failures.push(GroupFailure {
                        date: group.date,
                        symbols: group.symbols.clone(),
                        error,
                    });
                    continue;
                }
            };
            self.observer.on_group_complete(group, prices.len());

            let missing: Vec<InstrumentId> = group
                .symbols
                .iter()
                .filter(|s| !prices.contains_key(*s))
                .cloned()
                .collect();
            if !missing.is_empty() {
                report.unpriced.insert(group.date, missing);
            }
            if !prices.is_empty() {
                report.prices.insert(group.date, prices);
            }
        }

        tracing::info!(
            dates = report.prices.len(),
            priced = report.priced_count(),
            upstream_calls = report.upstream_calls,
            failed_groups = report.failures.len(),
            "price fetch finished"
        );
        report
    }

    fn fetch_group(&self, group: &DateGroup) -> Result<DatePrices, DataError> {
        let table = self
            .provider
            .fetch_daily(&group.symbols, group.date, group.end())?;
        if table.is_empty() {
            tracing::debug!(date = %group.date, "provider returned no rows");
        }
        Ok(extract_prices(&table, &group.symbols, &self.fields))
    }
}

/// Fetch with a default [`PriceFetcher`] around `provider`.
pub fn fetch_prices<'a, P, R, C, S>(provider: P, request: R) -> PriceResult
where
    P: PriceProvider,
    R: IntoIterator<Item = (&'a NaiveDate, &'a C)>,
    C: ?Sized + 'a,
    &'a C: IntoIterator<Item = &'a S>,
    S: AsRef<str> + ?Sized + 'a,
{
    PriceFetcher::new(provider).fetch_prices(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticProvider;
    use std::sync::{Arc, Mutex};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, d).unwrap()
    }

    #[derive(Default, Clone)]
    struct Recording(Arc<Mutex<Vec<String>>>);

    impl FetchObserver for Recording {
        fn on_group_start(&self, group: &DateGroup) {
            self.0.lock().unwrap().push(format!("start {}", group.date));
        }

        fn on_group_failed(&self, group: &DateGroup, error: &DataError) {
            self.0
                .lock()
                .unwrap()
                .push(format!("failed {} {error}", group.date));
        }

        fn on_group_complete(&self, group: &DateGroup, priced: usize) {
            self.0
                .lock()
                .unwrap()
                .push(format!("done {} {priced}", group.date));
        }
    }

    #[test]
    fn observer_sees_groups_in_date_order() {
        let provider = StaticProvider::new()
            .with_close("AAPL", day(3), None, Some(125.0))
            .fail_on(day(5));
        let events = Recording::default();
        let fetcher = PriceFetcher::new(provider).with_observer(events.clone());

        let mut request = BTreeMap::new();
        request.insert(day(5), vec!["ZZZZ"]);
        request.insert(day(3), vec!["AAPL"]);
        fetcher.fetch_prices(&request);

        let events = events.0.lock().unwrap().clone();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], "start 2023-01-03");
        assert_eq!(events[1], "done 2023-01-03 1");
        assert_eq!(events[2], "start 2023-01-05");
        assert!(events[3].starts_with("failed 2023-01-05 network unreachable"));
    }

    #[test]
    fn report_tracks_failures_and_unpriced_symbols() {
        let provider = StaticProvider::new()
            .with_close("AAPL", day(3), None, Some(125.0))
            .with_close("MSFT", day(3), None, None)
            .fail_on(day(5));
        let fetcher = PriceFetcher::new(provider).with_observer(SilentObserver);

        let mut request = BTreeMap::new();
        request.insert(day(3), vec!["AAPL", "MSFT", "GOOG"]);
        request.insert(day(5), vec!["ZZZZ"]);
        let report = fetcher.fetch_report(&request);

        assert_eq!(report.upstream_calls, 2);
        assert_eq!(report.priced_count(), 1);
        assert_eq!(report.prices[&day(3)]["AAPL"], 125.0);
        assert_eq!(report.unpriced[&day(3)], vec!["GOOG", "MSFT"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].date, day(5));
        assert_eq!(report.failures[0].symbols, vec!["ZZZZ"]);
        assert!(!report.is_complete());
    }

    #[test]
    fn custom_fields_change_the_extracted_value() {
        let provider = StaticProvider::new().with_close("AAPL", day(3), Some(130.0), Some(125.0));
        let fetcher = PriceFetcher::new(provider).with_fields(vec![PriceField::Close]);

        let mut request = BTreeMap::new();
        request.insert(day(3), vec!["AAPL"]);
        assert_eq!(fetcher.fetch_prices(&request)[&day(3)]["AAPL"], 130.0);
    }

    #[test]
    fn empty_field_list_keeps_default() {
        let fetcher = PriceFetcher::new(StaticProvider::new()).with_fields(Vec::new());
        assert_eq!(fetcher.fields(), &PriceField::CLOSE_FALLBACK);
    }

    #[test]
    fn free_function_borrows_the_provider() {
        let provider = StaticProvider::new().with_close("AAPL", day(4), None, Some(126.1));
        let mut request = BTreeMap::new();
        request.insert(day(4), ["AAPL"]);

        let prices = fetch_prices(&provider, &request);
        assert_eq!(prices[&day(4)]["AAPL"], 126.1);
        assert_eq!(provider.call_count(), 1);
    }

    /// Provider that goes offline after a fixed number of calls.
    struct FlakyAfter {
        inner: StaticProvider,
        budget: usize,
    }

    impl PriceProvider for FlakyAfter {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fetch_daily(
            &self,
            symbols: &[InstrumentId],
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<crate::data::PriceTable, DataError> {
            self.inner.fetch_daily(symbols, start, end)
        }

        fn is_available(&self) -> bool {
            self.inner.call_count() < self.budget
        }
    }

    #[test]
    fn unavailable_provider_fails_remaining_groups_without_calls() {
        let provider = FlakyAfter {
            inner: StaticProvider::new()
                .with_close("AAPL", day(3), None, Some(125.0))
                .with_close("AAPL", day(4), None, Some(126.1)),
            budget: 1,
        };
        let fetcher = PriceFetcher::new(provider).with_observer(SilentObserver);

        let mut request = BTreeMap::new();
        request.insert(day(3), vec!["AAPL"]);
        request.insert(day(4), vec!["AAPL"]);
        request.insert(day(5), vec!["AAPL"]);
        let report = fetcher.fetch_report(&request);

        assert_eq!(report.upstream_calls, 1);
        assert_eq!(fetcher.provider().inner.call_count(), 1);
        assert_eq!(report.prices.keys().copied().collect::<Vec<_>>(), vec![day(3)]);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, DataError::CircuitBreakerTripped)));
    }

    #[test]
    fn fingerprint_ignores_duplicates() {
        let fetcher = PriceFetcher::new(StaticProvider::new()).with_observer(SilentObserver);
        let mut a = BTreeMap::new();
        a.insert(day(3), vec!["MSFT", "AAPL"]);
        let mut b = BTreeMap::new();
        b.insert(day(3), vec!["AAPL", "AAPL", "MSFT"]);
        assert_eq!(
            fetcher.fetch_report(&a).fingerprint,
            fetcher.fetch_report(&b).fingerprint
        );
    }
}
