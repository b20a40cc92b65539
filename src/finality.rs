//! Cross-chain finality estimation
//!
//! Each tick the oracle picks a trusted block on every chain:
//!
//! - PoS chains use the `finalized` tag, unless the finalized head lags the
//!   latest head by more than the chain's maximum finality time. The chain is then
//!   considered degraded and `latest` is used instead.
//! - A rollup inbox is trusted up to the highest block whose batch is posted on the
//!   settlement chain as of the settlement trusted block. When the latest rollup
//!   block is not batched yet, a binary search finds the highest one that is.
//!
//! Epoch numbers are derived from the trusted outbox block.

use std::sync::Arc;

use eyre::{eyre, Result};
use serde::Serialize;

use crate::chain::{BatchIndex, BlockSource};
use crate::epoch::{claimable_epoch, finalized_epoch};
use crate::events::{EventSink, WatcherEvent};
use crate::types::{BlockInfo, BlockTag};

/// Default clock-drift warning threshold between inbox and settlement chain
pub const DEFAULT_CLOCK_DRIFT_SECS: u64 = 30 * 60;

#[derive(Debug, Clone)]
pub struct FinalityConfig {
    pub epoch_period: u64,
    pub settlement_max_finality_secs: u64,
    pub outbox_max_finality_secs: u64,
    /// Used only when the inbox has no batch index
    pub inbox_max_finality_secs: u64,
    pub clock_drift_secs: u64,
}

/// Trusted blocks and the epochs derived from them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalityView {
    pub outbox: BlockInfo,
    pub outbox_latest: BlockInfo,
    pub inbox: BlockInfo,
    pub inbox_latest: BlockInfo,
    pub degraded: bool,
    /// `epochOf(outbox.timestamp) - 1`
    pub claimable_epoch: u64,
    /// `epochOf(outbox.timestamp) - 2`
    pub finalized_epoch: u64,
    /// Latest epoch whose inbox snapshot is final from the inbox's point of view
    pub inbox_finalized_epoch: u64,
}

pub struct FinalityOracle {
    outbox: Arc<dyn BlockSource>,
    inbox: Arc<dyn BlockSource>,
    settlement: Arc<dyn BlockSource>,
    batches: Option<Arc<dyn BatchIndex>>,
    config: FinalityConfig,
    events: EventSink,
    /// Highest rollup block known to be batched, lower bound for the next search
    last_provable: Option<u64>,
}

impl FinalityOracle {
    pub fn new(
        outbox: Arc<dyn BlockSource>,
        inbox: Arc<dyn BlockSource>,
        settlement: Arc<dyn BlockSource>,
        batches: Option<Arc<dyn BatchIndex>>,
        config: FinalityConfig,
        events: EventSink,
    ) -> Self {
        Self {
            outbox,
            inbox,
            settlement,
            batches,
            config,
            events,
            last_provable: None,
        }
    }

    pub fn config(&self) -> &FinalityConfig {
        &self.config
    }

    /// Refresh trusted blocks on all chains
    pub async fn refresh(&mut self) -> Result<FinalityView> {
        let settlement_latest = self.settlement.block(BlockTag::Latest).await?;
        let (_, settlement_degraded) = trusted_block(
            self.settlement.as_ref(),
            settlement_latest,
            self.config.settlement_max_finality_secs,
            "settlement",
            &self.events,
        )
        .await;
        let settlement_tag = if settlement_degraded {
            BlockTag::Latest
        } else {
            BlockTag::Finalized
        };

        let outbox_latest = self.outbox.block(BlockTag::Latest).await?;
        let (outbox, outbox_degraded) = trusted_block(
            self.outbox.as_ref(),
            outbox_latest,
            self.config.outbox_max_finality_secs,
            "outbox",
            &self.events,
        )
        .await;

        let inbox_latest = self.inbox.block(BlockTag::Latest).await?;
        let (inbox, inbox_degraded) = match self.batches.clone() {
            Some(batches) => {
                self.rollup_trusted(batches.as_ref(), inbox_latest, settlement_tag)
                    .await?
            }
            None => {
                trusted_block(
                    self.inbox.as_ref(),
                    inbox_latest,
                    self.config.inbox_max_finality_secs,
                    "inbox",
                    &self.events,
                )
                .await
            }
        };

        let drift = inbox_latest.timestamp.abs_diff(settlement_latest.timestamp);
        if drift > self.config.clock_drift_secs {
            self.events.emit(WatcherEvent::ClockDrift {
                drift_secs: drift,
                threshold_secs: self.config.clock_drift_secs,
            });
        }

        let period = self.config.epoch_period;
        Ok(FinalityView {
            outbox,
            outbox_latest,
            inbox,
            inbox_latest,
            degraded: settlement_degraded || outbox_degraded || inbox_degraded,
            claimable_epoch: claimable_epoch(outbox.timestamp, period),
            finalized_epoch: finalized_epoch(outbox.timestamp, period),
            inbox_finalized_epoch: claimable_epoch(inbox.timestamp, period),
        })
    }

    /// Highest rollup block whose batch is posted as of `settlement`
    async fn rollup_trusted(
        &mut self,
        batches: &dyn BatchIndex,
        latest: BlockInfo,
        settlement: BlockTag,
    ) -> Result<(BlockInfo, bool)> {
        let batch_count = batches.finalized_batch_count(settlement).await?;

        if is_provable(batches, latest.number, batch_count).await {
            self.last_provable = Some(latest.number);
            return Ok((latest, false));
        }

        // a hint taken under the latest settlement tag can sit above the finalized frontier
        let low = match self.last_provable {
            Some(block)
                if block <= latest.number && is_provable(batches, block, batch_count).await =>
            {
                block
            }
            _ => 0,
        };
        let provable = highest_provable(batches, low, latest.number, batch_count)
            .await
            .ok_or_else(|| eyre!("no rollup block up to {} is batched", latest.number))?;

        self.last_provable = Some(provable);
        self.events.emit(WatcherEvent::RollupBatchFallback {
            latest_block: latest.number,
            provable_block: provable,
        });

        let block = self.inbox.block(BlockTag::Number(provable)).await?;
        Ok((block, true))
    }
}

/// Finalized block when the chain is finalizing on schedule, latest otherwise
async fn trusted_block(
    source: &dyn BlockSource,
    latest: BlockInfo,
    max_finality_secs: u64,
    chain: &str,
    events: &EventSink,
) -> (BlockInfo, bool) {
    match source.block(BlockTag::Finalized).await {
        Ok(finalized) => {
            let lag = latest.timestamp.saturating_sub(finalized.timestamp);
            if lag > max_finality_secs {
                events.emit(WatcherEvent::FinalityDegraded {
                    chain: chain.to_string(),
                    lag_secs: lag,
                });
                (latest, true)
            } else {
                (finalized, false)
            }
        }
        Err(_) => {
            events.emit(WatcherEvent::FinalityDegraded {
                chain: chain.to_string(),
                lag_secs: 0,
            });
            (latest, true)
        }
    }
}

async fn is_provable(batches: &dyn BatchIndex, block: u64, batch_count: u64) -> bool {
    matches!(batches.batch_containing(block).await, Ok(Some(batch)) if batch < batch_count)
}

/// Binary search for the highest provable block in `[low, high]`.
/// Provability is monotonic in the block number.
pub async fn highest_provable(
    batches: &dyn BatchIndex,
    low: u64,
    high: u64,
    batch_count: u64,
) -> Option<u64> {
    let mut low = low;
    let mut high = high;
    let mut best = None;

    while low <= high {
        let mid = low + (high - low) / 2;
        if is_provable(batches, mid, batch_count).await {
            best = Some(mid);
            low = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryBatches, MemoryChain};

    const PERIOD: u64 = 3600;
    const NOW: u64 = PERIOD * 1000 + 120;

    fn config() -> FinalityConfig {
        FinalityConfig {
            epoch_period: PERIOD,
            settlement_max_finality_secs: 1068,
            outbox_max_finality_secs: 1068,
            inbox_max_finality_secs: 1068,
            clock_drift_secs: DEFAULT_CLOCK_DRIFT_SECS,
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<WatcherEvent>) -> Vec<WatcherEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_healthy_chains_use_finalized_blocks() {
        let l1 = Arc::new(MemoryChain::new(1000, NOW, 12));
        l1.set_finalized_lag(64);
        let l2 = Arc::new(MemoryChain::new(50_000, NOW, 1));
        let batches = Arc::new(MemoryBatches::new(100, 50_000, 1_000));
        let (events, mut rx) = EventSink::channel(16);

        let mut oracle = FinalityOracle::new(
            l1.clone(),
            l2.clone(),
            l1.clone(),
            Some(batches),
            config(),
            events,
        );
        let view = oracle.refresh().await.unwrap();

        assert!(!view.degraded);
        assert_eq!(view.outbox.number, 1000 - 64);
        assert_eq!(view.outbox.timestamp, NOW - 64 * 12);
        assert_eq!(view.inbox, view.inbox_latest);
        assert_eq!(view.claimable_epoch, 998);
        assert_eq!(view.finalized_epoch, 997);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_stalled_finality_falls_back_to_latest() {
        let l1 = Arc::new(MemoryChain::new(1000, NOW, 12));
        // 200 blocks * 12s = 2400s > 1068s
        l1.set_finalized_lag(200);
        let l2 = Arc::new(MemoryChain::new(50_000, NOW, 1));
        l2.set_finalized_lag(10);
        let (events, mut rx) = EventSink::channel(16);

        let mut oracle =
            FinalityOracle::new(l1.clone(), l2.clone(), l1.clone(), None, config(), events);
        let view = oracle.refresh().await.unwrap();

        assert!(view.degraded);
        assert_eq!(view.outbox, view.outbox_latest);
        assert_eq!(view.claimable_epoch, 999);
        assert_eq!(view.inbox.number, 50_000 - 10);

        let events = drain(&mut rx);
        assert!(events.contains(&WatcherEvent::FinalityDegraded {
            chain: "outbox".to_string(),
            lag_secs: 2400,
        }));
    }

    #[tokio::test]
    async fn test_unbatched_rollup_head_uses_binary_search() {
        let l1 = Arc::new(MemoryChain::new(1000, NOW, 12));
        l1.set_finalized_lag(64);
        let l2 = Arc::new(MemoryChain::new(50_000, NOW, 1));
        // blocks up to 48_765 are batched, 100 blocks per batch, 488 batches finalized
        let batches = Arc::new(MemoryBatches::new(100, 48_765, 488));
        let (events, mut rx) = EventSink::channel(16);

        let mut oracle = FinalityOracle::new(
            l1.clone(),
            l2.clone(),
            l1.clone(),
            Some(batches),
            config(),
            events,
        );
        let view = oracle.refresh().await.unwrap();

        assert!(view.degraded);
        assert_eq!(view.inbox.number, 48_765);
        assert_eq!(view.inbox.timestamp, NOW - (50_000 - 48_765));
        assert!(drain(&mut rx).contains(&WatcherEvent::RollupBatchFallback {
            latest_block: 50_000,
            provable_block: 48_765,
        }));
    }

    #[tokio::test]
    async fn test_degraded_settlement_uses_latest_batch_count() {
        let l1 = Arc::new(MemoryChain::new(1000, NOW, 12));
        l1.set_finalized_lag(200);
        let l2 = Arc::new(MemoryChain::new(50_000, NOW, 1));
        // 400 batches finalized on the settlement chain, 501 at its head
        let batches = Arc::new(MemoryBatches::new(100, 50_000, 400));
        batches.set_latest_batch_count(501);
        let (events, mut rx) = EventSink::channel(16);

        let mut oracle = FinalityOracle::new(
            l1.clone(),
            l2.clone(),
            l1.clone(),
            Some(batches.clone()),
            config(),
            events,
        );
        let view = oracle.refresh().await.unwrap();

        assert!(view.degraded);
        assert_eq!(view.inbox, view.inbox_latest);
        assert_eq!(view.inbox.number, 50_000);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, WatcherEvent::RollupBatchFallback { .. })));

        // settlement finalizing again: only the finalized batches count
        l1.set_finalized_lag(64);
        let view = oracle.refresh().await.unwrap();
        assert_eq!(view.inbox.number, 39_999);
        assert!(drain(&mut rx).contains(&WatcherEvent::RollupBatchFallback {
            latest_block: 50_000,
            provable_block: 39_999,
        }));
    }

    #[tokio::test]
    async fn test_highest_provable_respects_finalized_batch_count() {
        // blocks batched through 9_999, but only batches 0..50 finalized
        let batches = MemoryBatches::new(100, 9_999, 50);
        assert_eq!(highest_provable(&batches, 0, 9_999, 50).await, Some(4_999));
        assert_eq!(highest_provable(&batches, 0, 9_999, 0).await, None);
    }

    #[tokio::test]
    async fn test_clock_drift_warning() {
        let l1 = Arc::new(MemoryChain::new(1000, NOW, 12));
        l1.set_finalized_lag(64);
        let l2 = Arc::new(MemoryChain::new(50_000, NOW + 1801, 1));
        l2.set_finalized_lag(1);
        let (events, mut rx) = EventSink::channel(16);

        let mut oracle =
            FinalityOracle::new(l1.clone(), l2.clone(), l1.clone(), None, config(), events);
        oracle.refresh().await.unwrap();

        assert!(drain(&mut rx).contains(&WatcherEvent::ClockDrift {
            drift_secs: 1801,
            threshold_secs: 1800,
        }));

        l2.set_latest(50_000, NOW + 1800);
        oracle.refresh().await.unwrap();
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, WatcherEvent::ClockDrift { .. })));
    }
}
