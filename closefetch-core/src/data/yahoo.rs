//! Yahoo Finance price provider.
//!
//! Every symbol is read from the v8 chart API, which carries adjusted close.
//! A lookup for exactly one symbol comes back as a flat row set; a lookup for
//! several symbols issues one chart request per symbol and comes back keyed by
//! symbol. There is no retry: any failure other than an unknown symbol fails
//! the whole lookup and the caller decides what to do with the date group.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. The CSV-backed [`StaticProvider`](super::StaticProvider) is the
//! offline fallback.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{finite, DataError, PriceProvider, PriceRow, PriceTable};
use crate::domain::InstrumentId;
use chrono::{DateTime, NaiveDate};
use reqwest::blocking::Response;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

// ── Wire format ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartData>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

// Yahoo drops series it has no data for.
#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

// ── Provider ─────────────────────────────────────────────────────────

/// Connection settings for [`YahooProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct YahooSettings {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for YahooSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
    base_url: Url,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl YahooProvider {
    pub fn new(
        settings: YahooSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent)
            .build()
            .map_err(|e| DataError::ClientBuild(e.to_string()))?;

        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| DataError::ClientBuild(format!("invalid base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DataError::ClientBuild(format!(
                "base url cannot carry a path: {}",
                settings.base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            circuit_breaker,
        })
    }

    pub fn with_defaults() -> Result<Self, DataError> {
        Self::new(
            YahooSettings::default(),
            Arc::new(CircuitBreaker::default_provider()),
        )
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// v8 chart URL for a single symbol over `[start, end)`.
    fn chart_url(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["v8", "finance", "chart", symbol]);
        }
        url.query_pairs_mut()
            .append_pair("period1", &day_start_ts(start).to_string())
            .append_pair("period2", &day_start_ts(end).to_string())
            .append_pair("interval", "1d")
            .append_pair("includeAdjustedClose", "true");
        url
    }

    /// Chart rows for one symbol. An unknown or delisted symbol is an empty
    /// series, not an error.
    fn fetch_series(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceRow>, DataError> {
        let rows = self
            .get_json::<ChartResponse>(self.chart_url(symbol, start, end), symbol)
            .and_then(|chart| parse_chart(symbol, chart, start, end));
        match rows {
            Err(DataError::SymbolNotFound { symbol }) => {
                tracing::debug!(%symbol, "symbol not found upstream, no price");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Issue one GET and decode the body, mapping HTTP failures onto
    /// [`DataError`] and feeding the circuit breaker.
    fn get_json<T: DeserializeOwned>(&self, url: Url, label: &str) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        tracing::debug!(%url, "requesting yahoo prices");
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                self.circuit_breaker.record_failure();
            }
            DataError::NetworkUnreachable(e.to_string())
        })?;

        let resp = self.check_status(resp, label)?;
        let body = resp.json::<T>().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {label}: {e}"))
        })?;
        self.circuit_breaker.record_success();
        Ok(body)
    }

    fn check_status(&self, resp: Response, label: &str) -> Result<Response, DataError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        match status {
            StatusCode::FORBIDDEN => {
                self.circuit_breaker.trip();
                Err(DataError::CircuitBreakerTripped)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                self.circuit_breaker.record_failure();
                let retry_after_secs = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                Err(DataError::RateLimited { retry_after_secs })
            }
            StatusCode::UNAUTHORIZED => Err(DataError::AuthenticationRequired(
                "Yahoo Finance requires authentication".into(),
            )),
            StatusCode::NOT_FOUND => Err(DataError::SymbolNotFound {
                symbol: label.to_string(),
            }),
            _ => {
                self.circuit_breaker.record_failure();
                Err(DataError::Other(format!("HTTP {status} for {label}")))
            }
        }
    }
}

impl PriceProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch_daily(
        &self,
        symbols: &[InstrumentId],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceTable, DataError> {
        match symbols {
            [] => Ok(PriceTable::ByInstrument(BTreeMap::new())),
            [symbol] => Ok(PriceTable::Flat(self.fetch_series(symbol, start, end)?)),
            _ => {
                let mut by_symbol = BTreeMap::new();
                for symbol in symbols {
                    let rows = self.fetch_series(symbol, start, end)?;
                    if !rows.is_empty() {
                        by_symbol.insert(symbol.clone(), rows);
                    }
                }
                Ok(PriceTable::ByInstrument(by_symbol))
            }
        }
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

// ── Parsing ──────────────────────────────────────────────────────────

fn day_start_ts(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}

fn api_error(err: ApiError, symbol: &str) -> DataError {
    if err.code == "Not Found" {
        DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        }
    } else {
        DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
    }
}

fn parse_chart(
    symbol: &str,
    resp: ChartResponse,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriceRow>, DataError> {
    let result = match (resp.chart.result, resp.chart.error) {
        (_, Some(err)) => return Err(api_error(err, symbol)),
        (Some(result), None) => result,
        (None, None) => {
            return Err(DataError::ResponseFormatChanged(
                "empty result with no error".into(),
            ))
        }
    };

    match result.into_iter().next() {
        Some(data) => rows_from_chart(data, start, end),
        None => Ok(Vec::new()),
    }
}

/// Convert one chart series into rows dated in exchange-local time, keeping
/// only `[start, end)` and dropping rows with no prices at all.
fn rows_from_chart(
    data: ChartData,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<PriceRow>, DataError> {
    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };
    let gmtoffset = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);

    let (quote, adj_closes) = match data.indicators {
        Some(ind) => (
            ind.quote.into_iter().next().unwrap_or_default(),
            ind.adjclose
                .and_then(|v| v.into_iter().next())
                .map(|a| a.adjclose)
                .unwrap_or_default(),
        ),
        None => (QuoteData::default(), Vec::new()),
    };

    let at = |series: &[Option<f64>], i: usize| finite(series.get(i).copied().flatten());

    let mut rows = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = DateTime::from_timestamp(ts + gmtoffset, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;
        if date < start || date >= end {
            continue;
        }

        let row = PriceRow {
            date,
            open: at(&quote.open, i),
            high: at(&quote.high, i),
            low: at(&quote.low, i),
            close: at(&quote.close, i),
            adj_close: at(&adj_closes, i),
            volume: quote.volume.get(i).copied().flatten(),
        };
        if !row.is_void() {
            rows.push(row);
        }
    }
    Ok(rows)
}
