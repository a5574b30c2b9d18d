//! Observability module for the billing service.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `billing_db_queries_total` | Counter | `operation`, `status` | Ledger query outcomes |
//! | `billing_db_query_duration_seconds` | Histogram | `operation` | Ledger query latency |
//! | `billing_confirmations_total` | Counter | `kind`, `epoch` | Signed confirmations, and whether the epoch lookup succeeded |
//! | `billing_credentials_issued_total` | Counter | `kind` | Credentials issued on create and join |
//!
//! Labels are bounded by code: `operation` by repository methods, `kind` by
//! route, `epoch` and `status` by outcome.

pub mod metrics;
