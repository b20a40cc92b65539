//! Prometheus metrics for the watcher
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge, CounterVec, Gauge};

use crate::types::TxKind;

lazy_static! {
    pub static ref TICKS: CounterVec = register_counter_vec!(
        "vea_watcher_ticks_total",
        "Watch loop ticks by outcome",
        &["result"]
    ).unwrap();

    pub static ref TRANSACTIONS: CounterVec = register_counter_vec!(
        "vea_watcher_transactions_total",
        "Transactions by action kind and status",
        &["kind", "status"]
    ).unwrap();

    pub static ref WATCHED_EPOCHS: Gauge = register_gauge!(
        "vea_watcher_watched_epochs",
        "Number of epochs currently under management"
    ).unwrap();

    pub static ref CLAIMABLE_EPOCH: Gauge = register_gauge!(
        "vea_watcher_claimable_epoch",
        "Latest claimable epoch derived from the trusted outbox block"
    ).unwrap();

    pub static ref FINALITY_DEGRADED: Gauge = register_gauge!(
        "vea_watcher_finality_degraded",
        "1 when the last tick fell back to latest blocks"
    ).unwrap();
}

/// Record a completed tick
pub fn record_tick(success: bool, watched_epochs: usize, claimable_epoch: u64) {
    let result = if success { "success" } else { "failed" };
    TICKS.with_label_values(&[result]).inc();
    WATCHED_EPOCHS.set(watched_epochs as f64);
    CLAIMABLE_EPOCH.set(claimable_epoch as f64);
}

/// Record a transaction status change
pub fn record_transaction(kind: TxKind, status: &str) {
    TRANSACTIONS
        .with_label_values(&[kind.as_str(), status])
        .inc();
}
