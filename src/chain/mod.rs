//! Chain collaborators
//!
//! The state machine, transaction handler and finality oracle only see these
//! traits. [`evm`] implements them over alloy providers for every supported
//! route; tests implement them in memory.

pub mod arbitrum;
pub mod contracts;
pub mod evm;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use eyre::Result;

use crate::types::{
    BlockInfo, BlockTag, Broadcast, ChainSide, ClaimEvents, LatestClaim, MessageStatus,
    ReceiptInfo, SnapshotSent, TxCall,
};

/// Read-only view of the bridge contracts on both chains
#[async_trait]
pub trait BridgeReader: Send + Sync {
    /// `claimHashes(epoch)` on the outbox, zero when unclaimed
    async fn claim_hash(&self, epoch: u64) -> Result<B256>;

    /// Claimed / VerificationStarted / Challenged logs for the epoch
    async fn claim_events(&self, epoch: u64) -> Result<Option<ClaimEvents>>;

    /// `snapshots(epoch)` on the inbox
    async fn inbox_snapshot(&self, epoch: u64) -> Result<B256>;

    /// Most recent claim on the outbox, if any
    async fn latest_claim(&self) -> Result<Option<LatestClaim>>;

    /// Latest verified state root on the outbox
    async fn verified_state_root(&self) -> Result<B256>;

    /// SnapshotSent for the epoch and the L2 -> L1 message it produced
    async fn snapshot_sent(&self, epoch: u64) -> Result<Option<SnapshotSent>>;

    async fn message_status(&self, sent: &SnapshotSent) -> Result<MessageStatus>;

    /// Number of messages sent through the inbox
    async fn inbox_message_count(&self) -> Result<u64>;

    /// Message count of the most recent SnapshotSaved, if one is in range
    async fn last_saved_snapshot_count(&self) -> Result<Option<u64>>;
}

/// Signs and broadcasts calls, and reports on their receipts
#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Signing account
    fn account(&self) -> Address;

    /// Estimate then broadcast. A reverted estimate is an error and nothing is sent.
    /// `replace_nonce` reuses the nonce of an expired transaction.
    async fn submit(&self, call: &TxCall, attempt: u32, replace_nonce: Option<u64>)
        -> Result<Broadcast>;

    async fn receipt(&self, chain: ChainSide, hash: B256) -> Result<Option<ReceiptInfo>>;

    async fn block_number(&self, chain: ChainSide) -> Result<u64>;
}

/// Block headers by tag
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block(&self, tag: BlockTag) -> Result<BlockInfo>;
}

/// Settlement-layer batch index for a rollup inbox chain
#[async_trait]
pub trait BatchIndex: Send + Sync {
    /// Batch that contains the rollup block, `None` if it is not batched yet
    async fn batch_containing(&self, l2_block: u64) -> Result<Option<u64>>;

    /// Number of batches posted as of the given settlement block
    async fn finalized_batch_count(&self, settlement: BlockTag) -> Result<u64>;
}
