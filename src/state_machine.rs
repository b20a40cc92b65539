//! Per-epoch claim lifecycle
//!
//! The next action for an epoch is decided fresh each tick from on-chain reads,
//! so a restarted watcher picks up exactly where the chain is:
//!
//! ```text
//! NoSnapshot -> (nothing to claim, dropped)
//! Unclaimed -> Claimed -> VerificationPending -> Verified -> Withdrawn
//! Claimed -> Challenged -> SnapshotSent -> DisputeExecuted -> Resolved
//! ```
//!
//! A claim is only trusted when the struct rebuilt from logs hashes to the
//! stored `claimHashes[epoch]`.

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use eyre::Result;
use serde::Serialize;

use crate::chain::BridgeReader;
use crate::errors::WatcherError;
use crate::finality::FinalityView;
use crate::hash::{hash_claim, is_zero_hash};
use crate::types::{BotPath, Claim, MessageStatus, Party, SnapshotSent};

#[derive(Debug, Clone)]
pub struct StateMachineConfig {
    pub epoch_period: u64,
    pub min_challenge_period: u64,
    pub sequencer_delay_limit: u64,
    /// Delay before an L2 -> L1 message can be confirmed on the settlement chain
    pub settlement_challenge_period: u64,
    pub bot_path: BotPath,
    /// Our signing account
    pub account: Address,
}

/// Chain-derived inputs for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochContext {
    /// Outbox chain time (latest block)
    pub now: u64,
    pub claimable_epoch: u64,
    pub inbox_finalized_epoch: u64,
    /// Trusted inbox block time
    pub inbox_timestamp: u64,
}

impl From<&FinalityView> for EpochContext {
    fn from(view: &FinalityView) -> Self {
        Self {
            now: view.outbox_latest.timestamp,
            claimable_epoch: view.claimable_epoch,
            inbox_finalized_epoch: view.inbox_finalized_epoch,
            inbox_timestamp: view.inbox.timestamp,
        }
    }
}

/// Protocol action to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Claim { state_root: B256 },
    StartVerification,
    VerifySnapshot,
    WithdrawClaimDeposit,
    Challenge { inbox_snapshot: B256 },
    WithdrawChallengeDeposit,
    SendSnapshot,
    ResolveDispute { sent: SnapshotSent, send_count: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WaitReason {
    /// Challenger watching an open claim window
    ClaimWindow,
    /// Inbox snapshot for the epoch is not final yet
    SnapshotNotFinal,
    /// `timestampClaimed + epochPeriod + sequencerDelayLimit` not reached
    VerificationStart,
    /// `timestampVerification + minChallengePeriod` not reached
    ChallengePeriod,
    /// L2 -> L1 message not confirmed on the settlement chain
    MessageConfirmation,
    /// Message executed, waiting for the outbox to record the result
    DisputeRelay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// No new snapshot to claim
    NothingToClaim,
    /// No claim and the claim window is closed
    Unclaimable,
    /// Claim matches the inbox snapshot, nothing to challenge
    ValidClaim,
    /// Claim belongs to someone else and is not disputed by us
    NotOurs,
    /// Resolved and nothing is owed to this watcher
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Submit(Action),
    Wait {
        reason: WaitReason,
        remaining_secs: u64,
    },
    Drop(DropReason),
}

/// Decision plus the authenticated claim it was based on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub claim: Option<Claim>,
}

impl Verdict {
    fn new(decision: Decision, claim: Option<Claim>) -> Self {
        Self { decision, claim }
    }
}

fn wait(reason: WaitReason, remaining_secs: u64) -> Decision {
    Decision::Wait {
        reason,
        remaining_secs,
    }
}

pub struct ClaimStateMachine<R> {
    reader: Arc<R>,
    config: StateMachineConfig,
}

impl<R: BridgeReader> ClaimStateMachine<R> {
    pub fn new(reader: Arc<R>, config: StateMachineConfig) -> Self {
        Self { reader, config }
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    /// Decide the next step for `epoch`
    pub async fn decide(&self, epoch: u64, ctx: &EpochContext) -> Result<Verdict> {
        let hash = self.reader.claim_hash(epoch).await?;

        if is_zero_hash(&hash) {
            return self.decide_unclaimed(epoch, ctx).await;
        }

        let claim = self.reconstruct_claim(epoch, hash).await?;
        let decision = self.decide_claimed(epoch, &claim, ctx).await?;
        Ok(Verdict::new(decision, Some(claim)))
    }

    async fn decide_unclaimed(&self, epoch: u64, ctx: &EpochContext) -> Result<Verdict> {
        if epoch < ctx.claimable_epoch {
            return Ok(Verdict::new(Decision::Drop(DropReason::Unclaimable), None));
        }

        if self.config.bot_path.claims() {
            if let Some(action) = self.check_and_claim(epoch).await? {
                return Ok(Verdict::new(Decision::Submit(action), None));
            }
            if !self.config.bot_path.challenges() {
                return Ok(Verdict::new(Decision::Drop(DropReason::NothingToClaim), None));
            }
        }

        // a claim for E can land while the outbox is in epoch E + 1
        let window_end = (epoch + 2) * self.config.epoch_period;
        Ok(Verdict::new(
            wait(WaitReason::ClaimWindow, window_end.saturating_sub(ctx.now)),
            None,
        ))
    }

    /// Claim the epoch if its inbox snapshot carries messages not yet claimed.
    ///
    /// Returns `None` when the snapshot is zero or was already claimed unchallenged.
    pub async fn check_and_claim(&self, epoch: u64) -> Result<Option<Action>> {
        let snapshot = self.reader.inbox_snapshot(epoch).await?;
        if snapshot == B256::ZERO {
            return Ok(None);
        }

        let (reference_root, challenged) = match self.reader.latest_claim().await? {
            Some(latest) => (latest.state_root, latest.challenged),
            None => (self.reader.verified_state_root().await?, false),
        };

        if snapshot != reference_root || challenged {
            return Ok(Some(Action::Claim {
                state_root: snapshot,
            }));
        }
        Ok(None)
    }

    /// Rebuild the claim from logs and authenticate it against the stored hash.
    ///
    /// The honest party is not logged, so every value is tried.
    pub async fn reconstruct_claim(&self, epoch: u64, hash: B256) -> Result<Claim> {
        let events = self
            .reader
            .claim_events(epoch)
            .await?
            .ok_or(WatcherError::ClaimNotFound { epoch })?;

        let (timestamp_verification, blocknumber_verification) =
            events.verification.unwrap_or((0, 0));
        let mut claim = Claim {
            state_root: events.state_root,
            claimer: events.claimer,
            timestamp_claimed: events.timestamp_claimed,
            timestamp_verification,
            blocknumber_verification,
            honest: Party::None,
            challenger: events.challenger.unwrap_or(Address::ZERO),
        };

        for party in Party::ALL {
            claim.honest = party;
            if hash_claim(&claim) == hash {
                return Ok(claim);
            }
        }

        Err(WatcherError::ClaimNotFound { epoch }.into())
    }

    async fn decide_claimed(
        &self,
        epoch: u64,
        claim: &Claim,
        ctx: &EpochContext,
    ) -> Result<Decision> {
        let path = self.config.bot_path;
        let ours = claim.claimer == self.config.account;
        let our_challenge = claim.challenger == self.config.account;

        match claim.honest {
            Party::Claimer if path.claims() && ours => {
                return Ok(Decision::Submit(Action::WithdrawClaimDeposit))
            }
            Party::Challenger if path.challenges() && our_challenge => {
                return Ok(Decision::Submit(Action::WithdrawChallengeDeposit))
            }
            Party::Claimer | Party::Challenger => return Ok(Decision::Drop(DropReason::Settled)),
            Party::None => {}
        }

        if claim.is_challenged() {
            if path.challenges() || ours {
                return self.progress_dispute(epoch, ctx).await;
            }
            return Ok(Decision::Drop(DropReason::NotOurs));
        }

        if path.challenges() {
            if epoch > ctx.inbox_finalized_epoch {
                let final_at = (epoch + 1) * self.config.epoch_period;
                return Ok(wait(
                    WaitReason::SnapshotNotFinal,
                    final_at.saturating_sub(ctx.inbox_timestamp),
                ));
            }

            let snapshot = self.reader.inbox_snapshot(epoch).await?;
            if snapshot != claim.state_root {
                return Ok(Decision::Submit(Action::Challenge {
                    inbox_snapshot: snapshot,
                }));
            }
            if !path.claims() {
                return Ok(Decision::Drop(DropReason::ValidClaim));
            }
        } else if !ours {
            return Ok(Decision::Drop(DropReason::NotOurs));
        }

        Ok(self.progress_verification(claim, ctx))
    }

    /// startVerification, then verifySnapshot once the challenge period passed
    fn progress_verification(&self, claim: &Claim, ctx: &EpochContext) -> Decision {
        let startable_at = self.verification_startable_at(claim);

        if !claim.verification_started() {
            if ctx.now >= startable_at {
                return Decision::Submit(Action::StartVerification);
            }
            return wait(WaitReason::VerificationStart, startable_at - ctx.now);
        }

        let verifiable_at = (claim.timestamp_verification as u64).max(startable_at)
            + self.config.min_challenge_period;
        if ctx.now >= verifiable_at {
            Decision::Submit(Action::VerifySnapshot)
        } else {
            wait(WaitReason::ChallengePeriod, verifiable_at - ctx.now)
        }
    }

    /// `timestampClaimed + epochPeriod + sequencerDelayLimit`
    pub fn verification_startable_at(&self, claim: &Claim) -> u64 {
        claim.timestamp_claimed as u64 + self.config.epoch_period + self.config.sequencer_delay_limit
    }

    async fn progress_dispute(&self, epoch: u64, ctx: &EpochContext) -> Result<Decision> {
        let Some(sent) = self.reader.snapshot_sent(epoch).await? else {
            return Ok(Decision::Submit(Action::SendSnapshot));
        };

        let decision = match self.reader.message_status(&sent).await? {
            MessageStatus::Unconfirmed => {
                let ready_at = sent.l2_timestamp + self.config.settlement_challenge_period;
                wait(
                    WaitReason::MessageConfirmation,
                    ready_at.saturating_sub(ctx.now),
                )
            }
            MessageStatus::Confirmed { send_count } => {
                Decision::Submit(Action::ResolveDispute { sent, send_count })
            }
            MessageStatus::Executed => wait(WaitReason::DisputeRelay, 0),
        };
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBridge;
    use crate::types::LatestClaim;

    const PERIOD: u64 = 3600;
    const SEQ_DELAY: u64 = 86400;
    const MIN_CHALLENGE: u64 = 10800;
    const EPOCH: u64 = 480_000;
    const T0: u32 = (EPOCH as u32 + 1) * 3600 + 60;

    fn me() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn someone() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn machine(bridge: &Arc<MemoryBridge>, path: BotPath) -> ClaimStateMachine<MemoryBridge> {
        ClaimStateMachine::new(
            bridge.clone(),
            StateMachineConfig {
                epoch_period: PERIOD,
                min_challenge_period: MIN_CHALLENGE,
                sequencer_delay_limit: SEQ_DELAY,
                settlement_challenge_period: 604800,
                bot_path: path,
                account: me(),
            },
        )
    }

    fn ctx(now: u64) -> EpochContext {
        EpochContext {
            now,
            claimable_epoch: EPOCH,
            inbox_finalized_epoch: EPOCH,
            inbox_timestamp: now,
        }
    }

    fn root(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    fn claim_by(claimer: Address, state_root: B256) -> Claim {
        Claim {
            state_root,
            claimer,
            timestamp_claimed: T0,
            ..Default::default()
        }
    }

    mod unclaimed {
        use super::*;

        #[tokio::test]
        async fn test_zero_snapshot_means_no_action() {
            let bridge = Arc::new(MemoryBridge::new());
            let sm = machine(&bridge, BotPath::Claimer);

            assert_eq!(sm.check_and_claim(EPOCH).await.unwrap(), None);
            let verdict = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Drop(DropReason::NothingToClaim));
        }

        #[tokio::test]
        async fn test_new_snapshot_is_claimed() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_snapshot(EPOCH, root(1));
            bridge.set_verified_root(root(9));
            let sm = machine(&bridge, BotPath::Claimer);

            let verdict = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Submit(Action::Claim {
                    state_root: root(1)
                })
            );
        }

        #[tokio::test]
        async fn test_already_claimed_root_is_not_reclaimed() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_snapshot(EPOCH, root(1));
            bridge.set_latest_claim(Some(LatestClaim {
                epoch: EPOCH - 3,
                state_root: root(1),
                challenged: false,
            }));
            let sm = machine(&bridge, BotPath::Claimer);

            assert_eq!(sm.check_and_claim(EPOCH).await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_challenged_previous_claim_triggers_new_claim() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_snapshot(EPOCH, root(2));
            bridge.set_latest_claim(Some(LatestClaim {
                epoch: EPOCH - 1,
                state_root: root(1),
                challenged: true,
            }));
            let sm = machine(&bridge, BotPath::Claimer);

            assert_eq!(
                sm.check_and_claim(EPOCH).await.unwrap(),
                Some(Action::Claim {
                    state_root: root(2)
                })
            );

            // same root, but the previous claim of it was challenged
            bridge.set_snapshot(EPOCH, root(1));
            assert_eq!(
                sm.check_and_claim(EPOCH).await.unwrap(),
                Some(Action::Claim {
                    state_root: root(1)
                })
            );
        }

        #[tokio::test]
        async fn test_past_claim_window_is_dropped() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_snapshot(EPOCH - 1, root(1));
            let sm = machine(&bridge, BotPath::Both);

            let verdict = sm.decide(EPOCH - 1, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Drop(DropReason::Unclaimable));
        }

        #[tokio::test]
        async fn test_challenger_waits_for_claim_window() {
            let bridge = Arc::new(MemoryBridge::new());
            let sm = machine(&bridge, BotPath::Challenger);

            let now = T0 as u64;
            let verdict = sm.decide(EPOCH, &ctx(now)).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Wait {
                    reason: WaitReason::ClaimWindow,
                    remaining_secs: (EPOCH + 2) * PERIOD - now,
                }
            );
        }
    }

    mod verification {
        use super::*;

        #[tokio::test]
        async fn test_start_verification_boundary() {
            let bridge = Arc::new(MemoryBridge::new());
            let claim = claim_by(me(), root(1));
            bridge.set_claim(EPOCH, &claim);
            bridge.set_snapshot(EPOCH, root(1));
            let sm = machine(&bridge, BotPath::Both);

            let due = T0 as u64 + SEQ_DELAY + PERIOD;

            let early = sm.decide(EPOCH, &ctx(due - 1)).await.unwrap();
            assert_eq!(
                early.decision,
                Decision::Wait {
                    reason: WaitReason::VerificationStart,
                    remaining_secs: 1,
                }
            );
            assert_eq!(early.claim, Some(claim));

            let on_time = sm.decide(EPOCH, &ctx(due)).await.unwrap();
            assert_eq!(on_time.decision, Decision::Submit(Action::StartVerification));
        }

        #[tokio::test]
        async fn test_verify_after_min_challenge_period() {
            let bridge = Arc::new(MemoryBridge::new());
            let started = T0 + (SEQ_DELAY + PERIOD) as u32;
            let claim = Claim {
                timestamp_verification: started,
                blocknumber_verification: 6_000_000,
                ..claim_by(me(), root(1))
            };
            bridge.set_claim(EPOCH, &claim);
            bridge.set_snapshot(EPOCH, root(1));
            let sm = machine(&bridge, BotPath::Claimer);

            let due = started as u64 + MIN_CHALLENGE;
            let early = sm.decide(EPOCH, &ctx(due - 10)).await.unwrap();
            assert_eq!(
                early.decision,
                Decision::Wait {
                    reason: WaitReason::ChallengePeriod,
                    remaining_secs: 10,
                }
            );

            let on_time = sm.decide(EPOCH, &ctx(due)).await.unwrap();
            assert_eq!(on_time.decision, Decision::Submit(Action::VerifySnapshot));
        }

        #[tokio::test]
        async fn test_verify_never_precedes_composed_delay() {
            // a verification timestamp earlier than allowed must not shorten the wait
            let bridge = Arc::new(MemoryBridge::new());
            let claim = Claim {
                timestamp_verification: T0 + 1,
                blocknumber_verification: 1,
                ..claim_by(me(), root(1))
            };
            bridge.set_claim(EPOCH, &claim);
            let sm = machine(&bridge, BotPath::Claimer);

            let floor = T0 as u64 + PERIOD + SEQ_DELAY + MIN_CHALLENGE;
            for now in [T0 as u64 + MIN_CHALLENGE + 1, floor - 1] {
                let verdict = sm.decide(EPOCH, &ctx(now)).await.unwrap();
                assert!(matches!(verdict.decision, Decision::Wait { .. }));
            }
            let verdict = sm.decide(EPOCH, &ctx(floor)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Submit(Action::VerifySnapshot));
        }

        #[tokio::test]
        async fn test_verified_claim_is_withdrawn_by_claimer() {
            let bridge = Arc::new(MemoryBridge::new());
            let claim = Claim {
                timestamp_verification: T0 + 90_000,
                blocknumber_verification: 7,
                honest: Party::Claimer,
                ..claim_by(me(), root(1))
            };
            bridge.set_claim(EPOCH, &claim);
            let sm = machine(&bridge, BotPath::Claimer);

            let verdict = sm.decide(EPOCH, &ctx(T0 as u64 + 200_000)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Submit(Action::WithdrawClaimDeposit));
            assert_eq!(verdict.claim.map(|c| c.honest), Some(Party::Claimer));
        }

        #[tokio::test]
        async fn test_claimer_only_ignores_foreign_claims() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_claim(EPOCH, &claim_by(someone(), root(1)));
            let sm = machine(&bridge, BotPath::Claimer);

            let verdict = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Drop(DropReason::NotOurs));
        }
    }

    mod challenges {
        use super::*;
        use crate::types::SnapshotSent;

        #[tokio::test]
        async fn test_wrong_root_is_challenged() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_claim(EPOCH, &claim_by(someone(), root(6)));
            bridge.set_snapshot(EPOCH, root(1));
            let sm = machine(&bridge, BotPath::Challenger);

            let verdict = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Submit(Action::Challenge {
                    inbox_snapshot: root(1)
                })
            );
        }

        #[tokio::test]
        async fn test_challenge_waits_for_inbox_finality() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_claim(EPOCH, &claim_by(someone(), root(6)));
            bridge.set_snapshot(EPOCH, root(1));
            let sm = machine(&bridge, BotPath::Challenger);

            let mut context = ctx(T0 as u64);
            context.inbox_finalized_epoch = EPOCH - 1;
            context.inbox_timestamp = (EPOCH + 1) * PERIOD - 30;

            let verdict = sm.decide(EPOCH, &context).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Wait {
                    reason: WaitReason::SnapshotNotFinal,
                    remaining_secs: 30,
                }
            );
        }

        #[tokio::test]
        async fn test_valid_claim_dropped_by_challenger() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_claim(EPOCH, &claim_by(someone(), root(1)));
            bridge.set_snapshot(EPOCH, root(1));
            let sm = machine(&bridge, BotPath::Challenger);

            let verdict = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Drop(DropReason::ValidClaim));
        }

        #[tokio::test]
        async fn test_dispute_progression() {
            let bridge = Arc::new(MemoryBridge::new());
            let claim = Claim {
                challenger: me(),
                ..claim_by(someone(), root(6))
            };
            bridge.set_claim(EPOCH, &claim);
            bridge.set_snapshot(EPOCH, root(1));
            let sm = machine(&bridge, BotPath::Challenger);
            let now = T0 as u64 + 100;

            let verdict = sm.decide(EPOCH, &ctx(now)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Submit(Action::SendSnapshot));

            let sent = SnapshotSent {
                epoch: EPOCH,
                l2_timestamp: now,
                ..Default::default()
            };
            bridge.set_snapshot_sent(sent.clone(), MessageStatus::Unconfirmed);
            let verdict = sm.decide(EPOCH, &ctx(now + 4_000)).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Wait {
                    reason: WaitReason::MessageConfirmation,
                    remaining_secs: 604800 - 4_000,
                }
            );

            bridge.set_snapshot_sent(sent.clone(), MessageStatus::Confirmed { send_count: 77 });
            let verdict = sm.decide(EPOCH, &ctx(now + 604_800)).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Submit(Action::ResolveDispute {
                    sent: sent.clone(),
                    send_count: 77
                })
            );

            bridge.set_snapshot_sent(sent, MessageStatus::Executed);
            let verdict = sm.decide(EPOCH, &ctx(now + 604_900)).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Wait {
                    reason: WaitReason::DisputeRelay,
                    remaining_secs: 0,
                }
            );
        }

        #[tokio::test]
        async fn test_resolved_dispute_outcomes() {
            let bridge = Arc::new(MemoryBridge::new());
            let won = Claim {
                challenger: me(),
                honest: Party::Challenger,
                ..claim_by(someone(), root(6))
            };
            bridge.set_claim(EPOCH, &won);
            let sm = machine(&bridge, BotPath::Challenger);

            let verdict = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(
                verdict.decision,
                Decision::Submit(Action::WithdrawChallengeDeposit)
            );

            // another watcher won the challenge
            let theirs = Claim {
                challenger: someone(),
                ..won
            };
            bridge.set_claim(EPOCH, &theirs);
            let verdict = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap();
            assert_eq!(verdict.decision, Decision::Drop(DropReason::Settled));
        }
    }

    mod authentication {
        use super::*;

        #[tokio::test]
        async fn test_hash_mismatch_is_claim_not_found() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_claim(EPOCH, &claim_by(me(), root(1)));
            bridge.set_claim_hash(EPOCH, root(0xee));
            let sm = machine(&bridge, BotPath::Both);

            let err = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap_err();
            assert_eq!(
                err.downcast_ref::<WatcherError>(),
                Some(&WatcherError::ClaimNotFound { epoch: EPOCH })
            );
        }

        #[tokio::test]
        async fn test_missing_logs_is_claim_not_found() {
            let bridge = Arc::new(MemoryBridge::new());
            bridge.set_claim_hash(EPOCH, root(0xee));
            let sm = machine(&bridge, BotPath::Both);

            let err = sm.decide(EPOCH, &ctx(T0 as u64)).await.unwrap_err();
            assert_eq!(
                err.downcast_ref::<WatcherError>(),
                Some(&WatcherError::ClaimNotFound { epoch: EPOCH })
            );
        }

        #[tokio::test]
        async fn test_honest_party_recovered_from_hash() {
            let bridge = Arc::new(MemoryBridge::new());
            let claim = Claim {
                honest: Party::Challenger,
                challenger: someone(),
                ..claim_by(me(), root(3))
            };
            bridge.set_claim(EPOCH, &claim);
            let sm = machine(&bridge, BotPath::Both);

            let rebuilt = sm
                .reconstruct_claim(EPOCH, hash_claim(&claim))
                .await
                .unwrap();
            assert_eq!(rebuilt, claim);
        }
    }
}
