//! Epoch arithmetic and the sliding window of epochs under management

use std::collections::BTreeSet;

use crate::errors::WatcherError;

/// `floor(timestamp / epoch_period)`
pub fn epoch_of(timestamp: u64, epoch_period: u64) -> u64 {
    timestamp / epoch_period.max(1)
}

/// Only fully elapsed epochs may be claimed
pub fn claimable_epoch(timestamp: u64, epoch_period: u64) -> u64 {
    epoch_of(timestamp, epoch_period).saturating_sub(1)
}

/// Epochs at or before this one can no longer receive a claim
pub fn finalized_epoch(timestamp: u64, epoch_period: u64) -> u64 {
    epoch_of(timestamp, epoch_period).saturating_sub(2)
}

/// Number of epochs to look back on a cold start.
///
/// Covers the cold-start margin plus the maximum L2 desync
/// (`sequencer_delay_limit + epoch_period`).
pub fn backlog_epochs(epoch_period: u64, sequencer_delay_limit: u64, cold_start_secs: u64) -> u64 {
    let period = epoch_period.max(1);
    let secs = cold_start_secs + sequencer_delay_limit + period;
    secs.div_ceil(period)
}

/// Ordered set of epochs under active management
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochWindow {
    epochs: BTreeSet<u64>,
    latest_claimable: u64,
}

impl EpochWindow {
    /// Build the initial window `[start, claimable]`.
    ///
    /// `start` defaults to `claimable - backlog`; an explicit start past the
    /// claimable epoch is rejected.
    pub fn initialize(
        claimable: u64,
        backlog: u64,
        explicit_start: Option<u64>,
    ) -> Result<Self, WatcherError> {
        let start = match explicit_start {
            Some(start) if start > claimable => {
                return Err(WatcherError::InvalidStartEpoch { start, claimable })
            }
            Some(start) => start,
            None => claimable.saturating_sub(backlog),
        };

        Ok(Self {
            epochs: (start..=claimable).collect(),
            latest_claimable: claimable,
        })
    }

    /// Append every epoch that became claimable since the last call.
    /// Returns the newly added epochs.
    pub fn advance(&mut self, claimable: u64) -> Vec<u64> {
        if claimable <= self.latest_claimable {
            return Vec::new();
        }

        let added: Vec<u64> = (self.latest_claimable + 1..=claimable).collect();
        self.epochs.extend(added.iter().copied());
        self.latest_claimable = claimable;
        added
    }

    /// Remove a settled or unclaimable epoch
    pub fn drop_epoch(&mut self, epoch: u64) -> bool {
        self.epochs.remove(&epoch)
    }

    /// Epochs oldest first
    pub fn epochs(&self) -> Vec<u64> {
        self.epochs.iter().copied().collect()
    }

    pub fn contains(&self, epoch: u64) -> bool {
        self.epochs.contains(&epoch)
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn latest_claimable(&self) -> u64 {
        self.latest_claimable
    }
}
