//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the credits ledger:
//!
//! - `credits_entries_total` - Ledger entries appended
//! - `credits_transfers_total` - Executed transfers
//! - `credits_extensions_total` - Executed expiry extensions
//! - `credits_bonus_claims_total` - Granted daily bonuses
//! - `credits_writeoffs_total` - Materialized expiry write-offs
//! - `credits_idempotent_replays_total` - Requests answered from idempotency records
//! - `credits_commit_duration_seconds` - Store commit latency

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Ledger entries appended
    pub entries_total: IntCounter,

    /// Executed transfers
    pub transfers_total: IntCounter,

    /// Executed extensions
    pub extensions_total: IntCounter,

    /// Granted daily bonuses
    pub bonus_claims_total: IntCounter,

    /// Materialized write-offs
    pub writeoffs_total: IntCounter,

    /// Idempotent replays served
    pub idempotent_replays_total: IntCounter,

    /// Store commit latency
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total = IntCounter::with_opts(Opts::new(
            "credits_entries_total",
            "Ledger entries appended",
        ))?;
        registry.register(Box::new(entries_total.clone()))?;

        let transfers_total = IntCounter::with_opts(Opts::new(
            "credits_transfers_total",
            "Executed transfers",
        ))?;
        registry.register(Box::new(transfers_total.clone()))?;

        let extensions_total = IntCounter::with_opts(Opts::new(
            "credits_extensions_total",
            "Executed expiry extensions",
        ))?;
        registry.register(Box::new(extensions_total.clone()))?;

        let bonus_claims_total = IntCounter::with_opts(Opts::new(
            "credits_bonus_claims_total",
            "Granted daily bonuses",
        ))?;
        registry.register(Box::new(bonus_claims_total.clone()))?;

        let writeoffs_total = IntCounter::with_opts(Opts::new(
            "credits_writeoffs_total",
            "Materialized expiry write-offs",
        ))?;
        registry.register(Box::new(writeoffs_total.clone()))?;

        let idempotent_replays_total = IntCounter::with_opts(Opts::new(
            "credits_idempotent_replays_total",
            "Requests answered from idempotency records",
        ))?;
        registry.register(Box::new(idempotent_replays_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "credits_commit_duration_seconds",
                "Store commit latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            entries_total,
            transfers_total,
            extensions_total,
            bonus_claims_total,
            writeoffs_total,
            idempotent_replays_total,
            commit_duration,
            registry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let metrics = Metrics::new().unwrap();
        metrics.entries_total.inc();
        metrics.transfers_total.inc_by(2);
        assert_eq!(metrics.entries_total.get(), 1);
        assert_eq!(metrics.transfers_total.get(), 2);
        assert_eq!(metrics.registry.gather().len(), 7);
    }
}
