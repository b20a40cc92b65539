//! In-memory chain fakes
//!
//! Used by unit tests and `tests/` to drive the state machine, transaction
//! handler, finality oracle and watch loop without a node.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};

use crate::chain::{BatchIndex, BlockSource, BridgeReader, TransactionSender};
use crate::hash::hash_claim;
use crate::types::{
    BlockInfo, BlockTag, Broadcast, ChainSide, Claim, ClaimEvents, LatestClaim, MessageStatus,
    ReceiptInfo, SnapshotSent, TxCall,
};

// ============================================================================
// Blocks
// ============================================================================

#[derive(Debug)]
struct ChainState {
    latest_number: u64,
    latest_timestamp: u64,
    block_time: u64,
    finalized_lag: Option<u64>,
}

/// Chain with a regular block time and a configurable finalized lag
#[derive(Debug)]
pub struct MemoryChain {
    state: Mutex<ChainState>,
}

impl MemoryChain {
    pub fn new(latest_number: u64, latest_timestamp: u64, block_time: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                latest_number,
                latest_timestamp,
                block_time,
                finalized_lag: None,
            }),
        }
    }

    /// Finalized head trails latest by `blocks`
    pub fn set_finalized_lag(&self, blocks: u64) {
        self.state.lock().unwrap().finalized_lag = Some(blocks);
    }

    pub fn set_latest(&self, number: u64, timestamp: u64) {
        let mut state = self.state.lock().unwrap();
        state.latest_number = number;
        state.latest_timestamp = timestamp;
    }

    /// Advance the head by `secs` worth of blocks
    pub fn advance(&self, secs: u64) {
        let mut state = self.state.lock().unwrap();
        state.latest_number += secs / state.block_time.max(1);
        state.latest_timestamp += secs;
    }

    fn block_at(state: &ChainState, number: u64) -> BlockInfo {
        let behind = state.latest_number.saturating_sub(number);
        BlockInfo {
            number,
            timestamp: state.latest_timestamp - behind * state.block_time,
        }
    }
}

#[async_trait]
impl BlockSource for MemoryChain {
    async fn block(&self, tag: BlockTag) -> Result<BlockInfo> {
        let state = self.state.lock().unwrap();
        match tag {
            BlockTag::Latest => Ok(Self::block_at(&state, state.latest_number)),
            BlockTag::Finalized => {
                let lag = state
                    .finalized_lag
                    .ok_or_else(|| eyre!("finalized tag not supported"))?;
                Ok(Self::block_at(&state, state.latest_number.saturating_sub(lag)))
            }
            BlockTag::Number(n) if n <= state.latest_number => Ok(Self::block_at(&state, n)),
            BlockTag::Number(n) => Err(eyre!("block {} not found", n)),
        }
    }
}

/// Fixed-size batches posted up to a given rollup block
#[derive(Debug)]
pub struct MemoryBatches {
    batch_size: u64,
    posted_through: Mutex<u64>,
    batch_count: Mutex<u64>,
    latest_batch_count: Mutex<Option<u64>>,
}

impl MemoryBatches {
    pub fn new(batch_size: u64, posted_through: u64, batch_count: u64) -> Self {
        Self {
            batch_size,
            posted_through: Mutex::new(posted_through),
            batch_count: Mutex::new(batch_count),
            latest_batch_count: Mutex::new(None),
        }
    }

    /// Batch count seen at the settlement chain's head, ahead of its finalized count
    pub fn set_latest_batch_count(&self, count: u64) {
        *self.latest_batch_count.lock().unwrap() = Some(count);
    }

    pub fn set_posted(&self, posted_through: u64, batch_count: u64) {
        *self.posted_through.lock().unwrap() = posted_through;
        *self.batch_count.lock().unwrap() = batch_count;
    }
}

#[async_trait]
impl BatchIndex for MemoryBatches {
    async fn batch_containing(&self, l2_block: u64) -> Result<Option<u64>> {
        if l2_block > *self.posted_through.lock().unwrap() {
            return Err(eyre!("execution reverted: block not yet batched"));
        }
        Ok(Some(l2_block / self.batch_size))
    }

    async fn finalized_batch_count(&self, settlement: BlockTag) -> Result<u64> {
        let finalized = *self.batch_count.lock().unwrap();
        match settlement {
            BlockTag::Latest => Ok(self.latest_batch_count.lock().unwrap().unwrap_or(finalized)),
            _ => Ok(finalized),
        }
    }
}

// ============================================================================
// Bridge contracts
// ============================================================================

#[derive(Debug, Default)]
struct BridgeState {
    claim_hashes: HashMap<u64, B256>,
    claim_events: HashMap<u64, ClaimEvents>,
    snapshots: HashMap<u64, B256>,
    latest_claim: Option<LatestClaim>,
    verified_root: B256,
    sent: HashMap<u64, SnapshotSent>,
    statuses: HashMap<u64, MessageStatus>,
    message_count: u64,
    saved_count: Option<u64>,
    fail_reads: bool,
}

/// Bridge contracts on both chains, held in memory
#[derive(Debug, Default)]
pub struct MemoryBridge {
    state: Mutex<BridgeState>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a claim as the outbox would: hash in `claimHashes`, fields in logs
    pub fn set_claim(&self, epoch: u64, claim: &Claim) {
        let mut state = self.state.lock().unwrap();
        state.claim_hashes.insert(epoch, hash_claim(claim));
        let verification = if claim.timestamp_verification != 0 {
            Some((claim.timestamp_verification, claim.blocknumber_verification))
        } else {
            None
        };
        let challenger = if claim.challenger != Address::ZERO {
            Some(claim.challenger)
        } else {
            None
        };
        state.claim_events.insert(
            epoch,
            ClaimEvents {
                state_root: claim.state_root,
                claimer: claim.claimer,
                timestamp_claimed: claim.timestamp_claimed,
                verification,
                challenger,
            },
        );
    }

    /// Overwrite only the stored hash, leaving the logs untouched
    pub fn set_claim_hash(&self, epoch: u64, hash: B256) {
        self.state.lock().unwrap().claim_hashes.insert(epoch, hash);
    }

    /// Remove the claim hash, as a withdrawal does
    pub fn clear_claim(&self, epoch: u64) {
        self.state.lock().unwrap().claim_hashes.remove(&epoch);
    }

    pub fn set_snapshot(&self, epoch: u64, root: B256) {
        self.state.lock().unwrap().snapshots.insert(epoch, root);
    }

    pub fn set_latest_claim(&self, latest: Option<LatestClaim>) {
        self.state.lock().unwrap().latest_claim = latest;
    }

    pub fn set_verified_root(&self, root: B256) {
        self.state.lock().unwrap().verified_root = root;
    }

    pub fn set_snapshot_sent(&self, sent: SnapshotSent, status: MessageStatus) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(sent.epoch, status);
        state.sent.insert(sent.epoch, sent);
    }

    pub fn set_message_counts(&self, count: u64, saved: Option<u64>) {
        let mut state = self.state.lock().unwrap();
        state.message_count = count;
        state.saved_count = saved;
    }

    /// Make every read fail as an unreachable RPC would
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    fn check(&self) -> Result<()> {
        if self.state.lock().unwrap().fail_reads {
            return Err(eyre!("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl BridgeReader for MemoryBridge {
    async fn claim_hash(&self, epoch: u64) -> Result<B256> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.claim_hashes.get(&epoch).copied().unwrap_or_default())
    }

    async fn claim_events(&self, epoch: u64) -> Result<Option<ClaimEvents>> {
        self.check()?;
        Ok(self.state.lock().unwrap().claim_events.get(&epoch).cloned())
    }

    async fn inbox_snapshot(&self, epoch: u64) -> Result<B256> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.snapshots.get(&epoch).copied().unwrap_or_default())
    }

    async fn latest_claim(&self) -> Result<Option<LatestClaim>> {
        self.check()?;
        Ok(self.state.lock().unwrap().latest_claim.clone())
    }

    async fn verified_state_root(&self) -> Result<B256> {
        self.check()?;
        Ok(self.state.lock().unwrap().verified_root)
    }

    async fn snapshot_sent(&self, epoch: u64) -> Result<Option<SnapshotSent>> {
        self.check()?;
        Ok(self.state.lock().unwrap().sent.get(&epoch).cloned())
    }

    async fn message_status(&self, sent: &SnapshotSent) -> Result<MessageStatus> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .statuses
            .get(&sent.epoch)
            .copied()
            .unwrap_or(MessageStatus::Unconfirmed))
    }

    async fn inbox_message_count(&self) -> Result<u64> {
        self.check()?;
        Ok(self.state.lock().unwrap().message_count)
    }

    async fn last_saved_snapshot_count(&self) -> Result<Option<u64>> {
        self.check()?;
        Ok(self.state.lock().unwrap().saved_count)
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// One recorded broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub call: TxCall,
    pub attempt: u32,
    pub replace_nonce: Option<u64>,
    pub hash: B256,
}

#[derive(Debug, Default)]
struct SenderState {
    sent: Vec<SentCall>,
    receipts: HashMap<B256, ReceiptInfo>,
    block_numbers: HashMap<ChainSide, u64>,
    next_nonce: u64,
    fail_with: Option<String>,
    /// Receipt recorded when the next failure fires
    mined_on_failure: Option<(B256, u64)>,
}

/// Records submissions; receipts are set by the test
#[derive(Debug)]
pub struct RecordingSender {
    account: Address,
    state: Mutex<SenderState>,
}

impl RecordingSender {
    pub fn new(account: Address) -> Self {
        Self {
            account,
            state: Mutex::new(SenderState::default()),
        }
    }

    pub fn sent(&self) -> Vec<SentCall> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn last_hash(&self) -> Option<B256> {
        self.state.lock().unwrap().sent.last().map(|s| s.hash)
    }

    pub fn set_receipt(&self, hash: B256, block_number: u64, success: bool) {
        self.state.lock().unwrap().receipts.insert(
            hash,
            ReceiptInfo {
                block_number,
                success,
            },
        );
    }

    pub fn set_block_number(&self, chain: ChainSide, number: u64) {
        self.state.lock().unwrap().block_numbers.insert(chain, number);
    }

    /// Make the next submission fail at estimation
    pub fn fail_next(&self, reason: &str) {
        self.state.lock().unwrap().fail_with = Some(reason.to_string());
    }

    /// Make the next submission fail after `hash` was mined at `block_number`,
    /// as when an expired transaction lands while its replacement is built
    pub fn fail_next_after_mining(&self, reason: &str, hash: B256, block_number: u64) {
        let mut state = self.state.lock().unwrap();
        state.fail_with = Some(reason.to_string());
        state.mined_on_failure = Some((hash, block_number));
    }
}

#[async_trait]
impl TransactionSender for RecordingSender {
    fn account(&self) -> Address {
        self.account
    }

    async fn submit(
        &self,
        call: &TxCall,
        attempt: u32,
        replace_nonce: Option<u64>,
    ) -> Result<Broadcast> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.fail_with.take() {
            if let Some((hash, block_number)) = state.mined_on_failure.take() {
                state.receipts.insert(
                    hash,
                    ReceiptInfo {
                        block_number,
                        success: true,
                    },
                );
            }
            return Err(eyre!(reason));
        }

        let nonce = match replace_nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = state.next_nonce;
                state.next_nonce += 1;
                nonce
            }
        };
        let hash = B256::from(U256::from(state.sent.len() as u64 + 1));
        state.sent.push(SentCall {
            call: call.clone(),
            attempt,
            replace_nonce,
            hash,
        });
        Ok(Broadcast { hash, nonce })
    }

    async fn receipt(&self, _chain: ChainSide, hash: B256) -> Result<Option<ReceiptInfo>> {
        Ok(self.state.lock().unwrap().receipts.get(&hash).copied())
    }

    async fn block_number(&self, chain: ChainSide) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .block_numbers
            .get(&chain)
            .copied()
            .unwrap_or_default())
    }
}
