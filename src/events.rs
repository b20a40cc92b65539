//! Structured watcher events
//!
//! Core components push [`WatcherEvent`] values onto a bounded channel and never
//! log directly. [`run_event_logger`] owns the receiving end: it renders each
//! event as one `tracing` line and folds it into the shared stats and metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::B256;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::server::SharedStats;
use crate::state_machine::{DropReason, WaitReason};
use crate::types::{BotPath, TxKind};

/// Default channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatcherEvent {
    // ------------------------------------------------------------------
    // Bridger state
    // ------------------------------------------------------------------
    Started {
        path: BotPath,
        route: String,
        first_epoch: u64,
        last_epoch: u64,
    },
    TickCompleted {
        watched_epochs: usize,
        claimable_epoch: u64,
        timestamp: u64,
    },
    TickFailed {
        error: String,
    },
    Sleeping {
        secs: u64,
    },
    ShuttingDown,
    FinalityDegraded {
        chain: String,
        lag_secs: u64,
    },
    RollupBatchFallback {
        latest_block: u64,
        provable_block: u64,
    },
    ClockDrift {
        drift_secs: u64,
        threshold_secs: u64,
    },

    // ------------------------------------------------------------------
    // Epoch state
    // ------------------------------------------------------------------
    EpochAdded {
        epoch: u64,
    },
    EpochDropped {
        epoch: u64,
        reason: DropReason,
    },
    Waiting {
        epoch: u64,
        reason: WaitReason,
        remaining_secs: u64,
    },
    ClaimChallengeable {
        epoch: u64,
        claimed: B256,
        snapshot: B256,
    },
    ClaimNotFound {
        epoch: u64,
    },
    EpochFailed {
        epoch: u64,
        error: String,
    },

    // ------------------------------------------------------------------
    // Transaction state
    // ------------------------------------------------------------------
    TransactionSubmitted {
        epoch: u64,
        kind: TxKind,
        hash: B256,
        attempt: u32,
    },
    TransactionPending {
        epoch: u64,
        kind: TxKind,
        hash: B256,
    },
    TransactionNotFinal {
        epoch: u64,
        kind: TxKind,
        hash: B256,
        confirmations: u64,
    },
    TransactionFinal {
        epoch: u64,
        kind: TxKind,
        hash: B256,
    },
    TransactionExpired {
        epoch: u64,
        kind: TxKind,
        hash: B256,
    },
    TransactionReverted {
        epoch: u64,
        kind: TxKind,
        hash: B256,
    },
    SubmissionFailed {
        epoch: u64,
        kind: TxKind,
        reason: String,
    },
}

/// Cloneable producer handle. Never blocks: a full channel drops the event.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<WatcherEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WatcherEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn emit(&self, event: WatcherEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events lost to a full or closed channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Render one event as a structured log line
pub fn log_event(event: &WatcherEvent) {
    match event {
        WatcherEvent::Started {
            path,
            route,
            first_epoch,
            last_epoch,
        } => info!(%path, %route, first_epoch, last_epoch, "Watcher started"),
        WatcherEvent::TickCompleted {
            watched_epochs,
            claimable_epoch,
            ..
        } => debug!(watched_epochs, claimable_epoch, "Tick completed"),
        WatcherEvent::TickFailed { error } => error!(error = %error, "Tick failed, retrying next tick"),
        WatcherEvent::Sleeping { secs } => debug!(secs, "Sleeping"),
        WatcherEvent::ShuttingDown => info!("Shutdown requested, stopping watcher"),
        WatcherEvent::FinalityDegraded { chain, lag_secs } => warn!(
            chain = %chain,
            lag_secs,
            "Chain is not finalizing on schedule, falling back to latest blocks"
        ),
        WatcherEvent::RollupBatchFallback {
            latest_block,
            provable_block,
        } => warn!(
            latest_block,
            provable_block, "Latest rollup block has no finalized batch, using highest provable block"
        ),
        WatcherEvent::ClockDrift {
            drift_secs,
            threshold_secs,
        } => warn!(drift_secs, threshold_secs, "Inbox and settlement clocks drifted apart"),
        WatcherEvent::EpochAdded { epoch } => info!(epoch, "Watching new claimable epoch"),
        WatcherEvent::EpochDropped { epoch, reason } => {
            info!(epoch, reason = ?reason, "Epoch dropped")
        }
        WatcherEvent::Waiting {
            epoch,
            reason,
            remaining_secs,
        } => debug!(epoch, reason = ?reason, remaining_secs, "Waiting"),
        WatcherEvent::ClaimChallengeable {
            epoch,
            claimed,
            snapshot,
        } => warn!(
            epoch,
            claimed = %claimed,
            snapshot = %snapshot,
            "Claimed state root does not match inbox snapshot"
        ),
        WatcherEvent::ClaimNotFound { epoch } => {
            warn!(epoch, "Claim hash set but no matching claim in logs")
        }
        WatcherEvent::EpochFailed { epoch, error } => {
            error!(epoch, error = %error, "Epoch processing failed")
        }
        WatcherEvent::TransactionSubmitted {
            epoch,
            kind,
            hash,
            attempt,
        } => info!(epoch, %kind, tx_hash = %hash, attempt, "Transaction submitted"),
        WatcherEvent::TransactionPending { epoch, kind, hash } => {
            debug!(epoch, %kind, tx_hash = %hash, "Transaction pending")
        }
        WatcherEvent::TransactionNotFinal {
            epoch,
            kind,
            hash,
            confirmations,
        } => debug!(epoch, %kind, tx_hash = %hash, confirmations, "Transaction not final"),
        WatcherEvent::TransactionFinal { epoch, kind, hash } => {
            info!(epoch, %kind, tx_hash = %hash, "Transaction final")
        }
        WatcherEvent::TransactionExpired { epoch, kind, hash } => {
            warn!(epoch, %kind, tx_hash = %hash, "Transaction expired, eligible for resubmission")
        }
        WatcherEvent::TransactionReverted { epoch, kind, hash } => {
            warn!(epoch, %kind, tx_hash = %hash, "Transaction reverted on-chain")
        }
        WatcherEvent::SubmissionFailed {
            epoch,
            kind,
            reason,
        } => warn!(epoch, %kind, reason = %reason, "Transaction submission failed"),
    }
}

/// Fold an event into the shared stats and Prometheus metrics
pub async fn record_event(stats: &SharedStats, event: &WatcherEvent) {
    let mut stats = stats.write().await;
    match event {
        WatcherEvent::Started { path, route, .. } => {
            stats.bot_path = path.to_string();
            stats.route = route.clone();
        }
        WatcherEvent::TickCompleted {
            watched_epochs,
            claimable_epoch,
            timestamp,
        } => {
            stats.ticks += 1;
            stats.watched_epochs = *watched_epochs;
            stats.claimable_epoch = *claimable_epoch;
            stats.last_tick_timestamp = *timestamp;
            metrics::record_tick(true, *watched_epochs, *claimable_epoch);
        }
        WatcherEvent::TickFailed { .. } => {
            stats.failed_ticks += 1;
            metrics::TICKS.with_label_values(&["failed"]).inc();
        }
        WatcherEvent::FinalityDegraded { .. } | WatcherEvent::RollupBatchFallback { .. } => {
            stats.finality_degraded = true;
            metrics::FINALITY_DEGRADED.set(1.0);
        }
        WatcherEvent::EpochDropped { .. } => {
            stats.dropped_epochs += 1;
        }
        WatcherEvent::TransactionSubmitted { kind, .. } => {
            stats.transactions_submitted += 1;
            metrics::record_transaction(*kind, "submitted");
        }
        WatcherEvent::TransactionFinal { kind, .. } => {
            stats.transactions_final += 1;
            metrics::record_transaction(*kind, "final");
        }
        WatcherEvent::TransactionExpired { kind, .. } => {
            metrics::record_transaction(*kind, "expired");
        }
        WatcherEvent::TransactionReverted { kind, .. } => {
            stats.transactions_failed += 1;
            metrics::record_transaction(*kind, "reverted");
        }
        WatcherEvent::SubmissionFailed { kind, .. } => {
            stats.transactions_failed += 1;
            metrics::record_transaction(*kind, "failed");
        }
        _ => {}
    }
}

/// Consume events until every [`EventSink`] clone is dropped
pub async fn run_event_logger(mut rx: mpsc::Receiver<WatcherEvent>, stats: SharedStats) {
    while let Some(event) = rx.recv().await {
        log_event(&event);
        record_event(&stats, &event).await;
    }
    debug!("Event logger stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::WatcherStats;
    use tokio::sync::RwLock;

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = EventSink::channel(1);
        sink.emit(WatcherEvent::ShuttingDown);
        sink.emit(WatcherEvent::Sleeping { secs: 10 });

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), WatcherEvent::ShuttingDown);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(WatcherEvent::EpochAdded { epoch: 7 }).unwrap();
        assert_eq!(json["event"], "epoch_added");
        assert_eq!(json["epoch"], 7);
    }

    #[tokio::test]
    async fn test_logger_updates_stats() {
        let stats: SharedStats = Arc::new(RwLock::new(WatcherStats::default()));
        let (sink, rx) = EventSink::channel(16);

        sink.emit(WatcherEvent::TickCompleted {
            watched_epochs: 3,
            claimable_epoch: 99,
            timestamp: 1_700_000_000,
        });
        sink.emit(WatcherEvent::TransactionSubmitted {
            epoch: 98,
            kind: TxKind::Claim,
            hash: B256::repeat_byte(1),
            attempt: 0,
        });
        sink.emit(WatcherEvent::SubmissionFailed {
            epoch: 98,
            kind: TxKind::Challenge,
            reason: "execution reverted".into(),
        });
        drop(sink);

        run_event_logger(rx, stats.clone()).await;

        let stats = stats.read().await;
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.watched_epochs, 3);
        assert_eq!(stats.claimable_epoch, 99);
        assert_eq!(stats.transactions_submitted, 1);
        assert_eq!(stats.transactions_failed, 1);
    }
}
