//! Diagnostics hooks for a price fetch.
//!
//! The fetcher never decides on its own how a failed date group is surfaced.
//! It reports to an injected observer; the default one writes `tracing`
//! records and leaves subscriber setup to the binary.

use crate::data::DataError;
use crate::domain::DateGroup;

/// Callbacks fired while date groups are processed, in request order.
pub trait FetchObserver: Send + Sync {
    /// Called before the upstream lookup for a group.
    fn on_group_start(&self, _group: &DateGroup) {}

    /// Called when the upstream lookup for a group failed. The group
    /// contributes nothing to the result; processing continues.
    fn on_group_failed(&self, group: &DateGroup, error: &DataError);

    /// Called after a group's prices were extracted. `priced` may be zero.
    fn on_group_complete(&self, _group: &DateGroup, _priced: usize) {}
}

/// Reports through `tracing`: failures at error level, progress at debug.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FetchObserver for TracingObserver {
    fn on_group_start(&self, group: &DateGroup) {
        tracing::debug!(
            date = %group.date,
            symbols = group.symbols.len(),
            "fetching date group"
        );
    }

    fn on_group_failed(&self, group: &DateGroup, error: &DataError) {
        tracing::error!(
            date = %group.date,
            symbols = %group.symbols.join(","),
            %error,
            "failed to fetch prices for date group"
        );
    }

    fn on_group_complete(&self, group: &DateGroup, priced: usize) {
        tracing::debug!(
            date = %group.date,
            priced,
            requested = group.symbols.len(),
            "date group done"
        );
    }
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl FetchObserver for SilentObserver {
    fn on_group_failed(&self, _group: &DateGroup, _error: &DataError) {}
}
