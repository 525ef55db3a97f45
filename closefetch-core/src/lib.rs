//! closefetch core: date-batched historical close price lookups.
//!
//! This crate contains:
//! - Domain types (identifiers, date groups, the date → symbol → price result)
//! - The upstream provider seam (`PriceProvider`) and its response shapes
//! - Providers: Yahoo Finance (blocking HTTP) and an in-memory/CSV table
//! - The `PriceFetcher`: one upstream call per date, adjusted-close first,
//!   partial failures tolerated per date group
//! - TOML configuration and request fingerprinting

pub mod config;
pub mod data;
pub mod domain;
pub mod fetch;
pub mod fingerprint;

pub use config::{ConfigError, FetchConfig, ProviderKind};
pub use data::{DataError, PriceField, PriceProvider, PriceRow, PriceTable};
pub use domain::{date_groups, DateGroup, DatePrices, InstrumentId, PriceResult};
pub use fetch::{
    fetch_prices, FetchObserver, FetchReport, GroupFailure, PriceFetcher, SilentObserver,
    TracingObserver,
};
pub use fingerprint::RequestFingerprint;
