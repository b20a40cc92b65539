//! Typed watcher errors
//!
//! Functions return `eyre::Result`; these variants travel inside the report
//! and are recovered with `downcast_ref` where a caller has to branch on them.

use thiserror::Error;

use crate::types::TxKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatcherError {
    /// A claim hash is stored on-chain but no matching claim could be rebuilt
    /// from logs. Usually a race with a state change; retried next tick.
    #[error("claim not found for epoch {epoch}")]
    ClaimNotFound { epoch: u64 },

    /// A claim-dependent action was requested before a claim was supplied
    #[error("claim not set for epoch {epoch} ({action})")]
    ClaimNotSet { epoch: u64, action: TxKind },

    #[error("invalid start epoch {start}: latest claimable epoch is {claimable}")]
    InvalidStartEpoch { start: u64, claimable: u64 },

    #[error("invalid bot path '{0}', expected one of: claimer, challenger, both")]
    InvalidBotPath(String),

    #[error("unsupported outbox chain id {0}")]
    UnsupportedChain(u64),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// Gas estimation or broadcast failed; the slot is left untouched
    #[error("{kind} submission failed for epoch {epoch}: {reason}")]
    Submission {
        epoch: u64,
        kind: TxKind,
        reason: String,
    },
}

impl WatcherError {
    /// Whether the error only affects the current tick for one epoch
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WatcherError::ClaimNotFound { .. }
                | WatcherError::ClaimNotSet { .. }
                | WatcherError::RetriesExhausted { .. }
                | WatcherError::Submission { .. }
        )
    }
}
