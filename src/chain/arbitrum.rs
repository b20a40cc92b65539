//! Arbitrum settlement helpers
//!
//! An L2 -> L1 message becomes executable once the rollup outbox on the
//! settlement chain has a send root covering its position. The send count
//! of a confirmed root lives in the first 8 bytes of the mixHash of the L2
//! block it was taken at.

use std::sync::Arc;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::{Filter, TransactionReceipt};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use eyre::{eyre, Result};

use crate::chain::contracts::{
    IArbSys, INodeInterface, IOutbox, ISequencerInbox, ARB_SYS_ADDRESS, NODE_INTERFACE_ADDRESS,
};
use crate::chain::evm::{block_id, is_revert, EvmChain};
use crate::chain::BatchIndex;
use crate::types::{BlockTag, L2ToL1Message, MessageStatus, SnapshotSent};

/// How far back the settlement chain is searched for the latest SendRootUpdated
pub const SEND_ROOT_LOOKBACK_SECS: u64 = 24 * 3600;

/// Number of L2 -> L1 messages sent up to and including the block
pub fn send_count_from_mix_hash(mix_hash: B256) -> u64 {
    let mut count = [0u8; 8];
    count.copy_from_slice(&mix_hash[..8]);
    u64::from_be_bytes(count)
}

/// The ArbSys L2ToL1Tx emitted in a transaction, if any
pub fn l2_to_l1_message(receipt: &TransactionReceipt) -> Option<L2ToL1Message> {
    receipt
        .inner
        .logs()
        .iter()
        .filter(|log| log.address() == ARB_SYS_ADDRESS)
        .find_map(|log| log.log_decode::<IArbSys::L2ToL1Tx>().ok())
        .map(|log| {
            let tx = log.inner.data;
            L2ToL1Message {
                caller: tx.caller,
                destination: tx.destination,
                arb_block_num: tx.arbBlockNum,
                eth_block_num: tx.ethBlockNum,
                timestamp: tx.timestamp,
                callvalue: tx.callvalue,
                data: tx.data,
                position: tx.position,
            }
        })
}

/// Settlement status of the message carried by a SnapshotSent
pub async fn message_status(
    inbox: &EvmChain,
    settlement: &EvmChain,
    rollup_outbox: Address,
    sent: &SnapshotSent,
) -> Result<MessageStatus> {
    let outbox = IOutbox::new(rollup_outbox, settlement.provider());
    let position = sent.message.position;

    let spent = {
        let outbox = &outbox;
        settlement
            .read("isSpent", || async move { Ok(outbox.isSpent(position).call().await?._0) })
            .await?
    };
    if spent {
        return Ok(MessageStatus::Executed);
    }

    let Some(send_count) = confirmed_send_count(inbox, settlement, rollup_outbox).await? else {
        return Ok(MessageStatus::Unconfirmed);
    };

    if position < U256::from(send_count) {
        Ok(MessageStatus::Confirmed { send_count })
    } else {
        Ok(MessageStatus::Unconfirmed)
    }
}

/// Send count of the most recent confirmed send root
async fn confirmed_send_count(
    inbox: &EvmChain,
    settlement: &EvmChain,
    rollup_outbox: Address,
) -> Result<Option<u64>> {
    let latest = settlement.block_info(BlockNumberOrTag::Latest).await?;
    let from = settlement.estimate_block_at(
        latest,
        latest.timestamp.saturating_sub(SEND_ROOT_LOOKBACK_SECS),
    );

    let filter = Filter::new()
        .address(rollup_outbox)
        .event_signature(IOutbox::SendRootUpdated::SIGNATURE_HASH);
    let logs = settlement.logs(&filter, from, latest.number).await?;

    let Some(log) = logs.last() else {
        return Ok(None);
    };
    let update = log.log_decode::<IOutbox::SendRootUpdated>()?.inner.data;

    let block = inbox.block_by_hash(update.l2BlockHash).await?;
    Ok(Some(send_count_from_mix_hash(block.header.mix_hash)))
}

/// Merkle proof of the message at `position` against a tree of `send_count` leaves
pub async fn outbox_proof(inbox: &EvmChain, send_count: u64, position: U256) -> Result<Vec<B256>> {
    let leaf: u64 = position
        .try_into()
        .map_err(|_| eyre!("message position {} out of range", position))?;
    let node = INodeInterface::new(NODE_INTERFACE_ADDRESS, inbox.provider());
    let node = &node;

    inbox
        .read("constructOutboxProof", || async move {
            Ok(node.constructOutboxProof(send_count, leaf).call().await?.proof)
        })
        .await
}

/// Batch lookups for an Arbitrum inbox chain
pub struct ArbitrumBatches {
    inbox: Arc<EvmChain>,
    settlement: Arc<EvmChain>,
    sequencer_inbox: Address,
}

impl ArbitrumBatches {
    pub fn new(inbox: Arc<EvmChain>, settlement: Arc<EvmChain>, sequencer_inbox: Address) -> Self {
        Self {
            inbox,
            settlement,
            sequencer_inbox,
        }
    }
}

#[async_trait]
impl BatchIndex for ArbitrumBatches {
    async fn batch_containing(&self, l2_block: u64) -> Result<Option<u64>> {
        let node = INodeInterface::new(NODE_INTERFACE_ADDRESS, self.inbox.provider());
        let node = &node;

        // NodeInterface reverts for blocks that are not in a posted batch yet
        self.inbox
            .read("findBatchContainingBlock", || async move {
                match node.findBatchContainingBlock(l2_block).call().await {
                    Ok(found) => Ok(Some(found.batch)),
                    Err(e) if is_revert(&e.to_string()) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    async fn finalized_batch_count(&self, settlement: BlockTag) -> Result<u64> {
        let sequencer = ISequencerInbox::new(self.sequencer_inbox, self.settlement.provider());
        let sequencer = &sequencer;
        let block: BlockId = block_id(settlement);

        let count = self
            .settlement
            .read("batchCount", || async move {
                Ok(sequencer.batchCount().block(block).call().await?._0)
            })
            .await?;
        Ok(count.saturating_to::<u64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{b256, Bytes};

    #[test]
    fn test_send_count_from_mix_hash() {
        let mix_hash = b256!("0000000000012f4a00000000013c1c8b0000000000000012000000000000000a");
        assert_eq!(send_count_from_mix_hash(mix_hash), 0x12f4a);
        assert_eq!(send_count_from_mix_hash(B256::ZERO), 0);
    }

    #[test]
    fn test_send_count_uses_big_endian_prefix() {
        let mut raw = [0xffu8; 32];
        raw[..8].copy_from_slice(&7u64.to_be_bytes());
        assert_eq!(send_count_from_mix_hash(B256::from(raw)), 7);
    }

    #[test]
    fn test_l2_to_l1_event_topics() {
        let event = IArbSys::L2ToL1Tx {
            caller: Address::repeat_byte(1),
            destination: Address::repeat_byte(2),
            hash: U256::from(3),
            position: U256::from(41),
            arbBlockNum: U256::from(100),
            ethBlockNum: U256::from(20),
            timestamp: U256::from(1_730_000_000u64),
            callvalue: U256::ZERO,
            data: Bytes::from(vec![0xde, 0xad]),
        };
        let data = event.encode_log_data();
        assert_eq!(data.topics()[0], IArbSys::L2ToL1Tx::SIGNATURE_HASH);
        assert_eq!(data.topics()[3], B256::from(U256::from(41)));
    }
}
