//! Top-level watch loop
//!
//! Each tick refreshes finality, sweeps the epoch window oldest-first through the
//! state machine, dispatches the chosen action to that epoch's transaction
//! handler, then appends newly claimable epochs. Shutdown is checked between
//! ticks only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::chain::{BridgeReader, TransactionSender};
use crate::epoch::{epoch_of, EpochWindow};
use crate::errors::WatcherError;
use crate::events::{EventSink, WatcherEvent};
use crate::finality::{FinalityOracle, FinalityView};
use crate::state_machine::{
    Action, ClaimStateMachine, Decision, EpochContext, StateMachineConfig,
};
use crate::transaction::{SubmitOutcome, TransactionHandler, TxConfig};
use crate::types::{Claim, Clock};

/// Default time left in an inbox epoch below which the snapshot is saved
pub const DEFAULT_SNAPSHOT_SAVE_WINDOW_SECS: u64 = 600;

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    /// Epochs to look back on a cold start
    pub backlog: u64,
    /// Explicit first epoch, overrides the backlog
    pub start_epoch: Option<u64>,
    /// Save the inbox snapshot once this little of its epoch remains
    pub snapshot_save_window_secs: u64,
    /// Route name reported in the started event
    pub route: String,
}

pub struct WatchLoop<R, S> {
    reader: Arc<R>,
    sender: Arc<S>,
    oracle: FinalityOracle,
    machine: ClaimStateMachine<R>,
    window: Option<EpochWindow>,
    handlers: HashMap<u64, TransactionHandler<S>>,
    /// Handler for the current inbox epoch's saveSnapshot
    save_handler: Option<TransactionHandler<S>>,
    tx_config: TxConfig,
    settings: WatcherSettings,
    clock: Arc<dyn Clock>,
    events: EventSink,
}

impl<R: BridgeReader, S: TransactionSender> WatchLoop<R, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: Arc<R>,
        sender: Arc<S>,
        oracle: FinalityOracle,
        machine_config: StateMachineConfig,
        tx_config: TxConfig,
        settings: WatcherSettings,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Self {
        let machine = ClaimStateMachine::new(reader.clone(), machine_config);
        Self {
            reader,
            sender,
            oracle,
            machine,
            window: None,
            handlers: HashMap::new(),
            save_handler: None,
            tx_config,
            settings,
            clock,
            events,
        }
    }

    /// Epochs under management, empty before the first tick
    pub fn epochs(&self) -> Vec<u64> {
        self.window
            .as_ref()
            .map(|window| window.epochs())
            .unwrap_or_default()
    }

    pub fn handler(&self, epoch: u64) -> Option<&TransactionHandler<S>> {
        self.handlers.get(&epoch)
    }

    /// Run until a shutdown signal arrives.
    ///
    /// Tick failures are reported and retried next tick. Only an invalid
    /// start epoch stops the loop.
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let poll_secs = self.settings.poll_interval.as_secs();

        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            if let Err(err) = self.tick().await {
                if let Some(WatcherError::InvalidStartEpoch { .. }) = err.downcast_ref() {
                    return Err(err);
                }
                self.events.emit(WatcherEvent::TickFailed {
                    error: format!("{:#}", err),
                });
            }

            self.events.emit(WatcherEvent::Sleeping { secs: poll_secs });
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.events.emit(WatcherEvent::ShuttingDown);
        Ok(())
    }

    /// One sweep over the window
    pub async fn tick(&mut self) -> Result<()> {
        let view = self.oracle.refresh().await?;
        let ctx = EpochContext::from(&view);

        if self.window.is_none() {
            let window = EpochWindow::initialize(
                view.claimable_epoch,
                self.settings.backlog,
                self.settings.start_epoch,
            )?;
            let epochs = window.epochs();
            self.events.emit(WatcherEvent::Started {
                path: self.machine.config().bot_path,
                route: self.settings.route.clone(),
                first_epoch: epochs.first().copied().unwrap_or(view.claimable_epoch),
                last_epoch: window.latest_claimable(),
            });
            self.window = Some(window);
        }

        for epoch in self.epochs() {
            self.process_epoch(epoch, &ctx).await;
        }

        if let Err(err) = self.maybe_save_snapshot(&view).await {
            self.report_failure(epoch_of(view.inbox_latest.timestamp, self.epoch_period()), err);
        }

        let mut added = Vec::new();
        if let Some(window) = self.window.as_mut() {
            added = window.advance(view.claimable_epoch);
        }
        for epoch in added {
            self.events.emit(WatcherEvent::EpochAdded { epoch });
        }

        self.events.emit(WatcherEvent::TickCompleted {
            watched_epochs: self.window.as_ref().map_or(0, |w| w.len()),
            claimable_epoch: view.claimable_epoch,
            timestamp: self.clock.now(),
        });
        Ok(())
    }

    async fn process_epoch(&mut self, epoch: u64, ctx: &EpochContext) {
        let verdict = match self.machine.decide(epoch, ctx).await {
            Ok(verdict) => verdict,
            Err(err) => {
                self.report_failure(epoch, err);
                return;
            }
        };

        match verdict.decision {
            Decision::Drop(reason) => {
                if let Some(window) = self.window.as_mut() {
                    window.drop_epoch(epoch);
                }
                self.handlers.remove(&epoch);
                self.events
                    .emit(WatcherEvent::EpochDropped { epoch, reason });
            }
            Decision::Wait {
                reason,
                remaining_secs,
            } => {
                self.events.emit(WatcherEvent::Waiting {
                    epoch,
                    reason,
                    remaining_secs,
                });
            }
            Decision::Submit(action) => {
                if let Err(err) = self.dispatch(epoch, action, verdict.claim).await {
                    self.report_failure(epoch, err);
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        epoch: u64,
        action: Action,
        claim: Option<Claim>,
    ) -> Result<SubmitOutcome> {
        if let (Action::Challenge { inbox_snapshot }, Some(claim)) = (&action, &claim) {
            self.events.emit(WatcherEvent::ClaimChallengeable {
                epoch,
                claimed: claim.state_root,
                snapshot: *inbox_snapshot,
            });
        }

        let handler = self.epoch_handler(epoch);
        handler.set_claim(claim);

        match action {
            Action::Claim { state_root } => handler.submit_claim(state_root).await,
            Action::StartVerification => handler.submit_start_verification().await,
            Action::VerifySnapshot => handler.submit_verify().await,
            Action::WithdrawClaimDeposit => handler.submit_withdraw().await,
            Action::Challenge { .. } => handler.submit_challenge().await,
            Action::WithdrawChallengeDeposit => handler.submit_withdraw_challenge_deposit().await,
            Action::SendSnapshot => handler.submit_send_snapshot().await,
            Action::ResolveDispute { sent, send_count } => {
                handler.submit_resolve_dispute(sent, send_count).await
            }
        }
    }

    /// Save the inbox snapshot near the end of its epoch when new messages arrived
    async fn maybe_save_snapshot(&mut self, view: &FinalityView) -> Result<()> {
        if !self.machine.config().bot_path.claims() {
            return Ok(());
        }

        let period = self.epoch_period();
        let now = view.inbox_latest.timestamp;
        let remaining = period - now % period.max(1);
        if remaining > self.settings.snapshot_save_window_secs {
            return Ok(());
        }

        let count = self.reader.inbox_message_count().await?;
        let saved = self.reader.last_saved_snapshot_count().await?;
        if count == 0 || saved == Some(count) {
            return Ok(());
        }

        let inbox_epoch = epoch_of(now, period);
        let stale = self
            .save_handler
            .as_ref()
            .map_or(true, |handler| handler.epoch() != inbox_epoch);
        if stale {
            self.save_handler = Some(TransactionHandler::new(
                inbox_epoch,
                self.sender.clone(),
                self.clock.clone(),
                self.tx_config,
                self.events.clone(),
            ));
        }

        if let Some(handler) = self.save_handler.as_mut() {
            handler.submit_save_snapshot().await?;
        }
        Ok(())
    }

    fn epoch_handler(&mut self, epoch: u64) -> &mut TransactionHandler<S> {
        let sender = &self.sender;
        let clock = &self.clock;
        let events = &self.events;
        let tx_config = self.tx_config;
        self.handlers.entry(epoch).or_insert_with(|| {
            TransactionHandler::new(epoch, sender.clone(), clock.clone(), tx_config, events.clone())
        })
    }

    fn report_failure(&self, epoch: u64, err: eyre::Report) {
        match err.downcast_ref::<WatcherError>() {
            Some(WatcherError::ClaimNotFound { epoch }) => {
                self.events
                    .emit(WatcherEvent::ClaimNotFound { epoch: *epoch });
            }
            // already reported by the handler
            Some(WatcherError::Submission { .. }) => {}
            _ => self.events.emit(WatcherEvent::EpochFailed {
                epoch,
                error: format!("{:#}", err),
            }),
        }
    }

    fn epoch_period(&self) -> u64 {
        self.machine.config().epoch_period
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finality::FinalityConfig;
    use crate::state_machine::DropReason;
    use crate::testing::{MemoryBridge, MemoryChain, RecordingSender};
    use crate::types::{BotPath, ManualClock, TxCall};
    use alloy::primitives::{Address, B256};

    const PERIOD: u64 = 3600;
    const NOW: u64 = PERIOD * 1000 + 120;

    struct Harness {
        watcher: WatchLoop<MemoryBridge, RecordingSender>,
        bridge: Arc<MemoryBridge>,
        sender: Arc<RecordingSender>,
        inbox: Arc<MemoryChain>,
        rx: mpsc::Receiver<WatcherEvent>,
    }

    fn chain(number: u64, block_time: u64) -> Arc<MemoryChain> {
        let chain = Arc::new(MemoryChain::new(number, NOW, block_time));
        chain.set_finalized_lag(2);
        chain
    }

    fn harness(path: BotPath, start_epoch: Option<u64>) -> Harness {
        let bridge = Arc::new(MemoryBridge::new());
        let me = Address::repeat_byte(0xaa);
        let sender = Arc::new(RecordingSender::new(me));
        let (events, rx) = EventSink::channel(256);
        let inbox = chain(50_000_000, 1);

        let oracle = FinalityOracle::new(
            chain(20_000_000, 12),
            inbox.clone(),
            chain(20_000_000, 12),
            None,
            FinalityConfig {
                epoch_period: PERIOD,
                settlement_max_finality_secs: 1068,
                outbox_max_finality_secs: 1068,
                inbox_max_finality_secs: 1068,
                clock_drift_secs: 1800,
            },
            events.clone(),
        );
        let watcher = WatchLoop::new(
            bridge.clone(),
            sender.clone(),
            oracle,
            StateMachineConfig {
                epoch_period: PERIOD,
                min_challenge_period: 10800,
                sequencer_delay_limit: 86400,
                settlement_challenge_period: 604800,
                bot_path: path,
                account: me,
            },
            TxConfig::default(),
            WatcherSettings {
                poll_interval: Duration::from_millis(10),
                backlog: 2,
                start_epoch,
                snapshot_save_window_secs: DEFAULT_SNAPSHOT_SAVE_WINDOW_SECS,
                route: "sepolia".to_string(),
            },
            Arc::new(ManualClock::new(NOW)),
            events,
        );

        Harness {
            watcher,
            bridge,
            sender,
            inbox,
            rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<WatcherEvent>) -> Vec<WatcherEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_first_tick_prunes_unclaimable_and_claims() {
        let mut h = harness(BotPath::Claimer, None);
        h.bridge.set_snapshot(999, B256::repeat_byte(1));

        h.watcher.tick().await.unwrap();

        assert_eq!(h.watcher.epochs(), vec![999]);
        let sent = h.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].call,
            TxCall::Claim {
                epoch: 999,
                state_root: B256::repeat_byte(1)
            }
        );

        let events = drain(&mut h.rx);
        assert!(matches!(
            events.first(),
            Some(WatcherEvent::Started {
                first_epoch: 997,
                last_epoch: 999,
                ..
            })
        ));
        assert!(events.contains(&WatcherEvent::EpochDropped {
            epoch: 997,
            reason: DropReason::Unclaimable
        }));
    }

    #[tokio::test]
    async fn test_repeated_ticks_do_not_resubmit() {
        let mut h = harness(BotPath::Claimer, None);
        h.bridge.set_snapshot(999, B256::repeat_byte(1));

        h.watcher.tick().await.unwrap();
        h.watcher.tick().await.unwrap();
        h.watcher.tick().await.unwrap();

        assert_eq!(h.sender.sent().len(), 1);
        assert!(h.watcher.handler(999).is_some());
    }

    #[tokio::test]
    async fn test_read_failures_are_scoped_to_epoch() {
        let mut h = harness(BotPath::Challenger, Some(999));
        h.bridge.set_fail_reads(true);

        h.watcher.tick().await.unwrap();

        let events = drain(&mut h.rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, WatcherEvent::EpochFailed { epoch: 999, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, WatcherEvent::TickCompleted { .. })));
        assert_eq!(h.watcher.epochs(), vec![999]);
    }

    #[tokio::test]
    async fn test_future_start_epoch_stops_run() {
        let mut h = harness(BotPath::Both, Some(5_000));
        let (_tx, shutdown) = mpsc::channel(1);

        let err = h.watcher.run(shutdown).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WatcherError>(),
            Some(WatcherError::InvalidStartEpoch {
                start: 5_000,
                claimable: 999
            })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let mut h = harness(BotPath::Both, None);
        let (tx, shutdown) = mpsc::channel(1);
        tx.send(()).await.unwrap();

        h.watcher.run(shutdown).await.unwrap();

        let events = drain(&mut h.rx);
        assert_eq!(events, vec![WatcherEvent::ShuttingDown]);
        assert!(h.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_saved_near_epoch_end() {
        let mut h = harness(BotPath::Claimer, Some(999));
        h.bridge.set_message_counts(12, Some(10));
        h.inbox.set_latest(50_000_000, (1001 * PERIOD) - 300);

        h.watcher.tick().await.unwrap();
        h.watcher.tick().await.unwrap();

        let saves: Vec<_> = h
            .sender
            .sent()
            .into_iter()
            .filter(|s| matches!(s.call, TxCall::SaveSnapshot { .. }))
            .collect();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].call, TxCall::SaveSnapshot { epoch: 1000 });
    }

    #[tokio::test]
    async fn test_no_save_when_snapshot_current() {
        let mut h = harness(BotPath::Claimer, Some(999));
        h.bridge.set_message_counts(12, Some(12));
        h.inbox.set_latest(50_000_000, (1001 * PERIOD) - 300);

        h.watcher.tick().await.unwrap();

        assert!(h.sender.sent().is_empty());
    }
}
