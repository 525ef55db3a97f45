//! End-to-end fetch behaviour against an in-memory provider.
//!
//! Covers the batching contract (one upstream call per date), the
//! flat/keyed response shapes, adjusted-close preference, and per-date
//! failure isolation.

use chrono::NaiveDate;
use closefetch_core::data::{PriceRow, PriceTable, ProviderCall, StaticProvider};
use closefetch_core::{
    DataError, InstrumentId, PriceFetcher, PriceProvider, PriceResult, SilentObserver,
};
use std::collections::{BTreeMap, HashMap, HashSet};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn request(groups: &[(NaiveDate, &[&'static str])]) -> BTreeMap<NaiveDate, Vec<&'static str>> {
    groups.iter().map(|(date, ids)| (*date, ids.to_vec())).collect()
}

fn fetcher(provider: StaticProvider) -> PriceFetcher<StaticProvider> {
    PriceFetcher::new(provider).with_observer(SilentObserver)
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn scenario_a_multi_symbol_prefers_adjusted_close() {
    let provider = StaticProvider::new()
        .with_close("AAPL", d(2023, 1, 3), Some(125.07), Some(125.0))
        .with_close("MSFT", d(2023, 1, 3), Some(240.5), None);
    let fetcher = fetcher(provider);

    let prices = fetcher.fetch_prices(&request(&[(d(2023, 1, 3), &["AAPL", "MSFT"])]));

    let mut expected = PriceResult::new();
    expected.insert(
        d(2023, 1, 3),
        [("AAPL".to_string(), 125.0), ("MSFT".to_string(), 240.5)]
            .into_iter()
            .collect(),
    );
    assert_eq!(prices, expected);
    assert_eq!(
        fetcher.provider().calls(),
        vec![ProviderCall {
            symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
            start: d(2023, 1, 3),
            end: d(2023, 1, 4),
        }]
    );
}

#[test]
fn scenario_b_single_symbol_flat_table() {
    let provider = StaticProvider::new().with_close("AAPL", d(2023, 1, 4), Some(126.36), Some(126.1));
    let prices = fetcher(provider).fetch_prices(&request(&[(d(2023, 1, 4), &["AAPL"])]));

    assert_eq!(prices.len(), 1);
    assert_eq!(prices[&d(2023, 1, 4)].len(), 1);
    assert_eq!(prices[&d(2023, 1, 4)]["AAPL"], 126.1);
}

#[test]
fn scenario_c_upstream_error_drops_the_date() {
    let provider = StaticProvider::new().fail_on(d(2023, 1, 5));
    let fetcher = fetcher(provider);

    let report = fetcher.fetch_report(&request(&[(d(2023, 1, 5), &["ZZZZ"])]));

    assert!(report.prices.is_empty());
    assert_eq!(report.upstream_calls, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].error,
        DataError::NetworkUnreachable(_)
    ));
}

#[test]
fn scenario_d_no_usable_price_means_no_date_entry() {
    let provider = StaticProvider::new().with_close("AAPL", d(2023, 1, 6), None, None);
    let fetcher = fetcher(provider);

    let report = fetcher.fetch_report(&request(&[(d(2023, 1, 6), &["AAPL", "GOOG"])]));

    assert!(report.prices.is_empty(), "got {:?}", report.prices);
    assert!(report.failures.is_empty());
    assert_eq!(report.unpriced[&d(2023, 1, 6)], vec!["AAPL", "GOOG"]);
}

// ── Batching ─────────────────────────────────────────────────────────

#[test]
fn empty_request_makes_no_calls() {
    let fetcher = fetcher(StaticProvider::new());
    let empty: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();

    assert!(fetcher.fetch_prices(&empty).is_empty());
    assert_eq!(fetcher.provider().call_count(), 0);
}

#[test]
fn empty_identifier_set_makes_no_call() {
    let fetcher = fetcher(StaticProvider::new().with_close("SPY", d(2023, 1, 3), Some(1.0), None));
    let req = request(&[(d(2023, 1, 3), &[]), (d(2023, 1, 4), &["SPY"])]);

    fetcher.fetch_prices(&req);

    let calls = fetcher.provider().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start, d(2023, 1, 4));
}

#[test]
fn one_call_per_date_with_sorted_deduplicated_symbols() {
    let fetcher = fetcher(StaticProvider::new());
    let req = request(&[
        (d(2023, 1, 3), &["MSFT", "AAPL", "MSFT", "GOOG"]),
        (d(2023, 1, 4), &["AAPL", "AAPL"]),
        (d(2023, 1, 9), &["TSLA"]),
    ]);

    fetcher.fetch_prices(&req);

    let calls = fetcher.provider().calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].symbols, vec!["AAPL", "GOOG", "MSFT"]);
    assert_eq!(calls[1].symbols, vec!["AAPL"]);
    assert_eq!(calls[2].symbols, vec!["TSLA"]);
    for call in &calls {
        assert_eq!(call.end, call.start.succ_opt().unwrap());
    }
}

#[test]
fn accepts_hash_maps_of_sets() {
    let provider = StaticProvider::new()
        .with_close("AAPL", d(2023, 1, 3), None, Some(125.0))
        .with_close("AAPL", d(2023, 1, 4), None, Some(126.1));
    let mut req: HashMap<NaiveDate, HashSet<InstrumentId>> = HashMap::new();
    req.entry(d(2023, 1, 3)).or_default().insert("AAPL".into());
    req.entry(d(2023, 1, 4)).or_default().insert("AAPL".into());

    let prices = fetcher(provider).fetch_prices(&req);
    assert_eq!(prices.len(), 2);
    assert_eq!(prices[&d(2023, 1, 4)]["AAPL"], 126.1);
}

// ── Failure isolation ────────────────────────────────────────────────

#[test]
fn failing_date_does_not_affect_others() {
    let provider = StaticProvider::new()
        .with_close("AAPL", d(2023, 1, 3), None, Some(125.0))
        .with_close("AAPL", d(2023, 1, 5), None, Some(127.0))
        .fail_on(d(2023, 1, 4));
    let fetcher = fetcher(provider);
    let req = request(&[
        (d(2023, 1, 3), &["AAPL"]),
        (d(2023, 1, 4), &["AAPL"]),
        (d(2023, 1, 5), &["AAPL"]),
    ]);

    let report = fetcher.fetch_report(&req);

    assert_eq!(report.upstream_calls, 3);
    assert_eq!(
        report.prices.keys().copied().collect::<Vec<_>>(),
        vec![d(2023, 1, 3), d(2023, 1, 5)]
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].date, d(2023, 1, 4));
}

/// Provider that is offline and errors if called anyway.
struct Offline;

impl PriceProvider for Offline {
    fn name(&self) -> &str {
        "offline"
    }

    fn fetch_daily(
        &self,
        _symbols: &[InstrumentId],
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<PriceTable, DataError> {
        Err(DataError::CircuitBreakerTripped)
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[test]
fn all_dates_failing_yields_empty_result() {
    let fetcher = PriceFetcher::new(Offline).with_observer(SilentObserver);
    let req = request(&[(d(2023, 1, 3), &["AAPL"]), (d(2023, 1, 4), &["MSFT", "AAPL"])]);

    let report = fetcher.fetch_report(&req);
    assert!(report.prices.is_empty());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.upstream_calls, 0);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.error, DataError::CircuitBreakerTripped)));
}

// ── Shape handling ───────────────────────────────────────────────────

/// Provider that always answers with a flat table, whatever was asked.
struct AlwaysFlat;

impl PriceProvider for AlwaysFlat {
    fn name(&self) -> &str {
        "always_flat"
    }

    fn fetch_daily(
        &self,
        _symbols: &[InstrumentId],
        start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<PriceTable, DataError> {
        Ok(PriceTable::Flat(vec![PriceRow::closes(start, Some(10.0), None)]))
    }
}

#[test]
fn flat_table_is_not_attributed_to_many_symbols() {
    let fetcher = PriceFetcher::new(AlwaysFlat).with_observer(SilentObserver);
    let prices = fetcher.fetch_prices(&request(&[
        (d(2023, 1, 3), &["AAPL", "MSFT"]),
        (d(2023, 1, 4), &["AAPL"]),
    ]));

    assert!(!prices.contains_key(&d(2023, 1, 3)));
    assert_eq!(prices[&d(2023, 1, 4)]["AAPL"], 10.0);
}

#[test]
fn non_trading_day_yields_nothing() {
    // 2023-01-07 is a Saturday; neighbouring sessions are outside the window.
    let provider = StaticProvider::new()
        .with_close("AAPL", d(2023, 1, 6), Some(129.6), None)
        .with_close("AAPL", d(2023, 1, 9), Some(130.1), None);
    let prices = fetcher(provider).fetch_prices(&request(&[(d(2023, 1, 7), &["AAPL"])]));
    assert!(prices.is_empty());
}

// ── Idempotence ──────────────────────────────────────────────────────

#[test]
fn repeated_fetches_are_identical() {
    let provider = StaticProvider::new()
        .with_close("AAPL", d(2023, 1, 3), Some(125.07), Some(125.0))
        .with_close("MSFT", d(2023, 1, 3), Some(240.5), None)
        .with_close("AAPL", d(2023, 1, 4), None, Some(126.1))
        .fail_on(d(2023, 1, 5));
    let fetcher = fetcher(provider);
    let req = request(&[
        (d(2023, 1, 3), &["AAPL", "MSFT"]),
        (d(2023, 1, 4), &["AAPL"]),
        (d(2023, 1, 5), &["ZZZZ"]),
    ]);

    let first = fetcher.fetch_report(&req);
    let second = fetcher.fetch_report(&req);
    assert_eq!(first.prices, second.prices);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(fetcher.provider().call_count(), 6);
}
