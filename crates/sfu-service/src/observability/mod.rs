//! Observability module for the SFU service.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sfu_conferences_active` | Gauge | none | Conferences that have not ended |
//! | `sfu_joins_total` | Counter | `status` | Join outcomes |
//! | `sfu_billing_notifications_total` | Counter | `kind`, `status` | Billing callback outcomes |
//! | `sfu_billing_notification_duration_seconds` | Histogram | `kind` | Billing callback latency |
//! | `sfu_chain_calls_total` | Counter | `method`, `status` | Contract call outcomes |
//! | `sfu_watchdog_forced_closes_total` | Counter | none | Conferences closed for exceeding the lifetime ceiling |
//! | `sfu_conferences_purged_total` | Counter | none | Ended conferences dropped from the registry |
//!
//! Labels are bounded by code: `status` by error kinds, `kind` by billing
//! event kinds, `method` by contract methods.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
