// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Freshness classification of cached payloads.
//!
//! ```text
//!  computed_at                 +stale_threshold              +ttl
//!      │────────── Fresh ──────────│────────── Stale ──────────│──── Expired ────▶
//! ```
//!
//! # Example
//!
//! ```
//! use analysis_cache::{Freshness, FreshnessPolicy};
//! use std::time::Duration;
//!
//! let policy = FreshnessPolicy::default();
//! let hour = 60 * 60 * 1000;
//! let ttl = Duration::from_secs(7 * 24 * 3600);
//!
//! assert_eq!(policy.classify(0, 0, ttl), Freshness::Fresh);
//! assert_eq!(policy.classify(0, 25 * hour, ttl), Freshness::Stale);
//! assert_eq!(policy.classify(0, 8 * 24 * hour, ttl), Freshness::Expired);
//! ```

use std::time::Duration;

/// Freshness class of a record at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve directly
    Fresh,
    /// Usable, should be refreshed
    Stale,
    /// Equivalent to no record
    Expired,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Stale => write!(f, "stale"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// Maps payload age to a [`Freshness`] class.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    /// Age at which a payload stops being fresh
    pub stale_threshold: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl FreshnessPolicy {
    #[must_use]
    pub fn new(stale_threshold: Duration) -> Self {
        Self { stale_threshold }
    }

    /// Classify a payload computed at `computed_at` as seen at `now`.
    ///
    /// Clock skew that puts `computed_at` in the future counts as age zero.
    #[must_use]
    pub fn classify(&self, computed_at: i64, now: i64, ttl: Duration) -> Freshness {
        let age = now.saturating_sub(computed_at).max(0) as u128;
        let ttl = ttl.as_millis();
        let stale = self.stale_threshold.as_millis();

        if age >= ttl {
            Freshness::Expired
        } else if age >= stale {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}
