//! Upstream price providers.

pub mod circuit_breaker;
pub mod provider;
pub mod static_provider;
pub mod yahoo;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use provider::{DataError, DataSource, PriceField, PriceProvider, PriceRow, PriceTable};
pub use static_provider::{ProviderCall, StaticProvider};
pub use yahoo::{YahooProvider, YahooSettings};
