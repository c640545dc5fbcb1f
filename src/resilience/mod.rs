//! Resilience helpers for store round trips.

pub mod retry;
