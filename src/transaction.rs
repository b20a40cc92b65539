//! Per-epoch transaction submission and tracking
//!
//! Each epoch gets one [`TransactionHandler`] that owns a pending slot per
//! [`TxKind`]. A new transaction is only broadcast when the slot is empty or its
//! previous transaction expired unmined; repeated calls while a transaction is in
//! flight do nothing.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{B256, U256};
use eyre::Result;

use crate::chain::TransactionSender;
use crate::errors::WatcherError;
use crate::events::{EventSink, WatcherEvent};
use crate::retry::{classify_error, ErrorClass};
use crate::types::{Claim, Clock, SnapshotSent, TxCall, TxKind};

/// Default confirmation depth before a transaction is considered final
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 10;

/// Default time after which an unmined transaction may be replaced
pub const DEFAULT_TX_EXPIRY_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxConfig {
    pub required_confirmations: u64,
    pub expiry_secs: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            required_confirmations: DEFAULT_REQUIRED_CONFIRMATIONS,
            expiry_secs: DEFAULT_TX_EXPIRY_SECS,
        }
    }
}

/// A broadcast transaction awaiting finality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransaction {
    pub hash: B256,
    pub broadcast_at: u64,
    pub nonce: u64,
    /// 0 for the first broadcast, incremented on each replacement
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No transaction in the slot
    NotMade,
    /// Broadcast, no receipt yet
    Pending,
    /// Mined with fewer confirmations than required
    NotFinal { confirmations: u64 },
    Final,
    /// Unmined past the expiry; may be replaced
    Expired,
}

impl TransactionStatus {
    /// Only an empty or expired slot accepts a new submission
    pub fn allows_submission(&self) -> bool {
        matches!(self, TransactionStatus::NotMade | TransactionStatus::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(B256),
    /// A transaction for this action is already in flight or final
    Skipped(TransactionStatus),
}

pub struct TransactionHandler<S> {
    epoch: u64,
    sender: Arc<S>,
    clock: Arc<dyn Clock>,
    config: TxConfig,
    events: EventSink,
    claim: Option<Claim>,
    pending: HashMap<TxKind, PendingTransaction>,
}

impl<S: TransactionSender> TransactionHandler<S> {
    pub fn new(
        epoch: u64,
        sender: Arc<S>,
        clock: Arc<dyn Clock>,
        config: TxConfig,
        events: EventSink,
    ) -> Self {
        Self {
            epoch,
            sender,
            clock,
            config,
            events,
            claim: None,
            pending: HashMap::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Supply the authenticated claim used by claim-dependent actions
    pub fn set_claim(&mut self, claim: Option<Claim>) {
        self.claim = claim;
    }

    pub fn claim(&self) -> Option<&Claim> {
        self.claim.as_ref()
    }

    pub fn pending(&self, kind: TxKind) -> Option<&PendingTransaction> {
        self.pending.get(&kind)
    }

    /// Current status of the slot for `kind`.
    ///
    /// A reverted receipt clears the slot so the action can be re-evaluated.
    pub async fn check_status(&mut self, kind: TxKind) -> Result<TransactionStatus> {
        let Some(pending) = self.pending.get(&kind).copied() else {
            return Ok(TransactionStatus::NotMade);
        };

        let chain = kind.chain();
        let Some(receipt) = self.sender.receipt(chain, pending.hash).await? else {
            let age = self.clock.now().saturating_sub(pending.broadcast_at);
            if age >= self.config.expiry_secs {
                self.emit(WatcherEvent::TransactionExpired {
                    epoch: self.epoch,
                    kind,
                    hash: pending.hash,
                });
                return Ok(TransactionStatus::Expired);
            }
            self.emit(WatcherEvent::TransactionPending {
                epoch: self.epoch,
                kind,
                hash: pending.hash,
            });
            return Ok(TransactionStatus::Pending);
        };

        if !receipt.success {
            self.pending.remove(&kind);
            self.emit(WatcherEvent::TransactionReverted {
                epoch: self.epoch,
                kind,
                hash: pending.hash,
            });
            return Ok(TransactionStatus::NotMade);
        }

        let head = self.sender.block_number(chain).await?;
        let confirmations = head.saturating_sub(receipt.block_number);
        if confirmations >= self.config.required_confirmations {
            self.emit(WatcherEvent::TransactionFinal {
                epoch: self.epoch,
                kind,
                hash: pending.hash,
            });
            return Ok(TransactionStatus::Final);
        }

        self.emit(WatcherEvent::TransactionNotFinal {
            epoch: self.epoch,
            kind,
            hash: pending.hash,
            confirmations,
        });
        Ok(TransactionStatus::NotFinal { confirmations })
    }

    /// Submit `call` unless its slot already holds a live transaction.
    ///
    /// An expired transaction is replaced using its nonce. A failed estimate or
    /// broadcast leaves the slot as it was, except for a rejected replacement
    /// whose nonce is taken or whose fee was too low.
    pub async fn submit(&mut self, call: TxCall) -> Result<SubmitOutcome> {
        let kind = call.kind();
        let status = self.check_status(kind).await?;
        if !status.allows_submission() {
            return Ok(SubmitOutcome::Skipped(status));
        }

        let (attempt, replace_nonce) = match (status, self.pending.get(&kind)) {
            (TransactionStatus::Expired, Some(previous)) => {
                (previous.attempt + 1, Some(previous.nonce))
            }
            _ => (0, None),
        };

        let broadcast = match self.sender.submit(&call, attempt, replace_nonce).await {
            Ok(broadcast) => broadcast,
            Err(err) => {
                let reason = format!("{:#}", err);
                if replace_nonce.is_some() {
                    if let Some(status) = self.replacement_failed(kind, attempt, &reason).await? {
                        return Ok(SubmitOutcome::Skipped(status));
                    }
                }
                self.emit(WatcherEvent::SubmissionFailed {
                    epoch: self.epoch,
                    kind,
                    reason: reason.clone(),
                });
                return Err(WatcherError::Submission {
                    epoch: self.epoch,
                    kind,
                    reason,
                }
                .into());
            }
        };

        self.pending.insert(
            kind,
            PendingTransaction {
                hash: broadcast.hash,
                broadcast_at: self.clock.now(),
                nonce: broadcast.nonce,
                attempt,
            },
        );
        self.emit(WatcherEvent::TransactionSubmitted {
            epoch: self.epoch,
            kind,
            hash: broadcast.hash,
            attempt,
        });
        Ok(SubmitOutcome::Submitted(broadcast.hash))
    }

    pub async fn submit_claim(&mut self, state_root: B256) -> Result<SubmitOutcome> {
        let epoch = self.epoch;
        self.submit(TxCall::Claim { epoch, state_root }).await
    }

    pub async fn submit_start_verification(&mut self) -> Result<SubmitOutcome> {
        let (epoch, claim) = self.require_claim(TxKind::StartVerification)?;
        self.submit(TxCall::StartVerification { epoch, claim }).await
    }

    pub async fn submit_verify(&mut self) -> Result<SubmitOutcome> {
        let (epoch, claim) = self.require_claim(TxKind::VerifySnapshot)?;
        self.submit(TxCall::VerifySnapshot { epoch, claim }).await
    }

    pub async fn submit_withdraw(&mut self) -> Result<SubmitOutcome> {
        let (epoch, claim) = self.require_claim(TxKind::WithdrawClaimDeposit)?;
        self.submit(TxCall::WithdrawClaimDeposit { epoch, claim }).await
    }

    pub async fn submit_challenge(&mut self) -> Result<SubmitOutcome> {
        let (epoch, claim) = self.require_claim(TxKind::Challenge)?;
        self.submit(TxCall::Challenge { epoch, claim }).await
    }

    pub async fn submit_withdraw_challenge_deposit(&mut self) -> Result<SubmitOutcome> {
        let (epoch, claim) = self.require_claim(TxKind::WithdrawChallengeDeposit)?;
        self.submit(TxCall::WithdrawChallengeDeposit { epoch, claim })
            .await
    }

    pub async fn submit_send_snapshot(&mut self) -> Result<SubmitOutcome> {
        let (epoch, claim) = self.require_claim(TxKind::SendSnapshot)?;
        self.submit(TxCall::SendSnapshot { epoch, claim }).await
    }

    pub async fn submit_resolve_dispute(
        &mut self,
        sent: SnapshotSent,
        send_count: u64,
    ) -> Result<SubmitOutcome> {
        let epoch = self.epoch;
        self.submit(TxCall::ResolveDispute {
            epoch,
            sent,
            send_count,
        })
        .await
    }

    pub async fn submit_save_snapshot(&mut self) -> Result<SubmitOutcome> {
        let epoch = self.epoch;
        self.submit(TxCall::SaveSnapshot { epoch }).await
    }

    /// Reconcile the slot after a replacement broadcast was rejected.
    ///
    /// `nonce too low` means the nonce is taken. If our expired transaction is
    /// the one that took it, the slot stays and its status is returned.
    /// Otherwise the slot is cleared so the next submission uses a fresh nonce.
    /// An underpriced replacement keeps the slot expired with its attempt
    /// raised, so the next one bumps further.
    async fn replacement_failed(
        &mut self,
        kind: TxKind,
        attempt: u32,
        reason: &str,
    ) -> Result<Option<TransactionStatus>> {
        let Some(previous) = self.pending.get(&kind).copied() else {
            return Ok(None);
        };

        match classify_error(reason) {
            ErrorClass::NonceTooLow => {
                if self
                    .sender
                    .receipt(kind.chain(), previous.hash)
                    .await?
                    .is_some()
                {
                    return self.check_status(kind).await.map(Some);
                }
                self.pending.remove(&kind);
            }
            ErrorClass::Underpriced => {
                self.pending
                    .insert(kind, PendingTransaction { attempt, ..previous });
            }
            _ => {}
        }
        Ok(None)
    }

    fn require_claim(&self, action: TxKind) -> Result<(u64, Claim), WatcherError> {
        self.claim
            .map(|claim| (self.epoch, claim))
            .ok_or(WatcherError::ClaimNotSet {
                epoch: self.epoch,
                action,
            })
    }

    fn emit(&self, event: WatcherEvent) {
        self.events.emit(event);
    }
}

/// Highest fee per gas that keeps `gas_estimate * fee` within `deposit / divisor`
pub fn capped_fee_per_gas(deposit: U256, gas_estimate: u64, divisor: u64) -> u128 {
    if gas_estimate == 0 || divisor == 0 {
        return 0;
    }
    let cap = deposit / U256::from(gas_estimate) / U256::from(divisor);
    u128::try_from(cap).unwrap_or(u128::MAX)
}
