//! Request fingerprinting: deterministic identification of a price request.
//!
//! The fingerprint is computed over the normalized date groups, so two
//! requests that differ only in identifier order or duplicates hash the same.
//! It tags the fetch tracing span and the [`FetchReport`](crate::FetchReport),
//! which lets repeated runs of the same logical request be correlated in logs.

use crate::domain::DateGroup;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 hex digest of the canonical JSON of a request's date groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint(pub String);

impl RequestFingerprint {
    pub fn of(groups: &[DateGroup]) -> Self {
        let mut hasher = blake3::Hasher::new();
        // One canonical JSON line per group; the newline keeps group boundaries.
        for group in groups {
            let line = serde_json::json!({
                "date": group.date.to_string(),
                "symbols": &group.symbols,
            });
            hasher.update(line.to_string().as_bytes());
            hasher.update(b"\n");
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    /// First 12 hex characters, enough to tell runs apart in log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
