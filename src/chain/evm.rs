//! EVM chain access for every supported route
//!
//! [`EvmChain`] wraps one signing provider with retried reads and chunked log
//! queries. [`EvmBridge`] binds the inbox, outbox and settlement chains of a
//! route and implements [`BridgeReader`] and [`TransactionSender`] over them.
//!
//! # Transaction Building
//!
//! Providers carry only a wallet filler. Nonce, gas limit and EIP-1559 fees are
//! set explicitly so that an expired transaction can be replaced with the same
//! nonce and a bumped fee.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::fillers::{FillProvider, JoinFill, WalletFiller};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{
    Block, BlockTransactionsKind, Filter, Log, TransactionReceipt, TransactionRequest,
};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolEvent};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::{StreamExt, TryStreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bridges::{BridgeConfig, OnchainParams, RouteKind};
use crate::chain::arbitrum::{self, ArbitrumBatches};
use crate::chain::contracts::{
    IOutbox, IVeaInbox, IVeaInboxArbToEth, IVeaInboxArbToGnosis, IVeaOutbox, IVeaOutboxArbToEth,
    IVeaOutboxArbToGnosis, IWETH,
};
use crate::chain::{BatchIndex, BlockSource, BridgeReader, TransactionSender};
use crate::config::Config;
use crate::retry::{classify_error, with_retry, ErrorClass, FeeBumpConfig, RetryPolicy};
use crate::transaction::capped_fee_per_gas;
use crate::types::{
    BlockInfo, BlockTag, Broadcast, ChainSide, ClaimEvents, LatestClaim, MessageStatus,
    ReceiptInfo, SnapshotSent, TxCall, TxKind,
};

/// Provider with a local wallet attached and no other fillers
pub type SignerProvider = FillProvider<
    JoinFill<Identity, WalletFiller<EthereumWallet>>,
    RootProvider<Http<Client>>,
    Http<Client>,
    Ethereum,
>;

/// Block range per eth_getLogs call on the outbox and settlement chains
pub const OUTBOX_LOG_CHUNK: u64 = 5_000;

/// Block range per eth_getLogs call on the inbox (Arbitrum blocks are cheap)
pub const INBOX_LOG_CHUNK: u64 = 100_000;

/// Concurrent eth_getLogs calls per query
const LOG_QUERY_CONCURRENCY: usize = 4;

const ETHEREUM_BLOCK_MILLIS: u64 = 12_000;

/// Gas forwarded by the router to the AMB when relaying a snapshot to Gnosis
pub const DEFAULT_AMB_GAS_LIMIT: u64 = 2_000_000;

pub fn block_id(tag: BlockTag) -> BlockId {
    match tag {
        BlockTag::Latest => BlockId::latest(),
        BlockTag::Finalized => BlockId::finalized(),
        BlockTag::Number(number) => BlockId::number(number),
    }
}

fn block_number_or_tag(tag: BlockTag) -> BlockNumberOrTag {
    match tag {
        BlockTag::Latest => BlockNumberOrTag::Latest,
        BlockTag::Finalized => BlockNumberOrTag::Finalized,
        BlockTag::Number(number) => BlockNumberOrTag::Number(number),
    }
}

/// Whether an RPC error is a contract revert
pub fn is_revert(error: &str) -> bool {
    classify_error(error) == ErrorClass::Permanent
}

/// Indexed uint256 epoch as a log topic
fn epoch_topic(epoch: u64) -> B256 {
    B256::from(U256::from(epoch))
}

/// Block number a little before `timestamp`, from the average block time.
/// Errs on the early side so a log search starting there does not miss anything.
pub fn estimate_block_at(latest: BlockInfo, timestamp: u64, block_millis: u64) -> u64 {
    if timestamp >= latest.timestamp {
        return latest.number;
    }
    let elapsed_ms = (latest.timestamp - timestamp).saturating_mul(1000);
    let blocks = elapsed_ms / block_millis.max(1);
    let margin = blocks / 10 + 10;
    latest.number.saturating_sub(blocks + margin)
}

// ============================================================================
// Single chain
// ============================================================================

/// One chain of a route
#[derive(Clone)]
pub struct EvmChain {
    side: ChainSide,
    chain_id: u64,
    provider: SignerProvider,
    retry: RetryPolicy,
    log_chunk: u64,
    block_millis: u64,
}

impl EvmChain {
    pub async fn connect(
        side: ChainSide,
        rpc_url: &str,
        signer: &PrivateKeySigner,
        retry: RetryPolicy,
        log_chunk: u64,
        block_millis: u64,
    ) -> Result<Self> {
        let wallet = EthereumWallet::from(signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .on_http(rpc_url.parse().wrap_err("Invalid RPC URL")?);

        let chain_id = {
            let provider = &provider;
            with_retry(&retry, "eth_chainId", || async move {
                Ok(provider.get_chain_id().await?)
            })
            .await
            .wrap_err_with(|| format!("Failed to connect to {} RPC", side))?
        };

        info!(chain = %side, chain_id, "Connected to chain");

        Ok(Self {
            side,
            chain_id,
            provider,
            retry,
            log_chunk,
            block_millis,
        })
    }

    pub fn side(&self) -> ChainSide {
        self.side
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn provider(&self) -> &SignerProvider {
        &self.provider
    }

    /// Run a read with the chain's retry policy
    pub async fn read<T, F, Fut>(&self, name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = format!("{} {}", self.side, name);
        with_retry(&self.retry, &name, operation).await
    }

    pub async fn block_info(&self, tag: BlockNumberOrTag) -> Result<BlockInfo> {
        let block = self.block_by_number(tag).await?;
        Ok(BlockInfo {
            number: block.header.number,
            timestamp: block.header.timestamp,
        })
    }

    pub async fn block_by_number(&self, tag: BlockNumberOrTag) -> Result<Block> {
        let provider = &self.provider;
        self.read("eth_getBlockByNumber", || async move {
            provider
                .get_block_by_number(tag, BlockTransactionsKind::Hashes)
                .await?
                .ok_or_else(|| eyre!("block {} not found", tag))
        })
        .await
    }

    pub async fn block_by_hash(&self, hash: B256) -> Result<Block> {
        let provider = &self.provider;
        self.read("eth_getBlockByHash", || async move {
            provider
                .get_block_by_hash(hash, BlockTransactionsKind::Hashes)
                .await?
                .ok_or_else(|| eyre!("block {} not found", hash))
        })
        .await
    }

    pub async fn block_timestamp(&self, number: u64) -> Result<u64> {
        Ok(self
            .block_info(BlockNumberOrTag::Number(number))
            .await?
            .timestamp)
    }

    pub fn estimate_block_at(&self, latest: BlockInfo, timestamp: u64) -> u64 {
        estimate_block_at(latest, timestamp, self.block_millis)
    }

    /// Logs matching `filter` in `[from, to]`, queried in chunks
    pub async fn logs(&self, filter: &Filter, from: u64, to: u64) -> Result<Vec<Log>> {
        if from > to {
            return Ok(Vec::new());
        }

        let chunk = self.log_chunk.max(1);
        let ranges: Vec<(u64, u64)> = (from..=to)
            .step_by(chunk as usize)
            .map(|start| (start, (start + chunk - 1).min(to)))
            .collect();

        let chunks: Vec<Vec<Log>> = futures::stream::iter(ranges)
            .map(|(start, end)| {
                let filter = filter.clone().from_block(start).to_block(end);
                async move {
                    let filter = &filter;
                    let provider = &self.provider;
                    self.read("eth_getLogs", || async move {
                        Ok(provider.get_logs(filter).await?)
                    })
                    .await
                    .wrap_err_with(|| format!("Failed to get logs from block {} to {}", start, end))
                }
            })
            .buffered(LOG_QUERY_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(chunks.into_iter().flatten().collect())
    }

    pub async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let provider = &self.provider;
        self.read("eth_getTransactionReceipt", || async move {
            Ok(provider.get_transaction_receipt(hash).await?)
        })
        .await
    }

    pub async fn block_number(&self) -> Result<u64> {
        let provider = &self.provider;
        self.read("eth_blockNumber", || async move {
            Ok(provider.get_block_number().await?)
        })
        .await
    }

    pub async fn balance(&self, account: Address) -> Result<U256> {
        let provider = &self.provider;
        self.read("eth_getBalance", || async move {
            Ok(provider.get_balance(account).await?)
        })
        .await
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64> {
        let provider = &self.provider;
        self.read("eth_getTransactionCount", || async move {
            Ok(provider
                .get_transaction_count(account)
                .block_id(BlockId::pending())
                .await?)
        })
        .await
    }
}

#[async_trait]
impl BlockSource for EvmChain {
    async fn block(&self, tag: BlockTag) -> Result<BlockInfo> {
        self.block_info(block_number_or_tag(tag)).await
    }
}

// ============================================================================
// Route
// ============================================================================

/// Contract addresses of a route
#[derive(Debug, Clone, Copy)]
pub struct BridgeAddresses {
    pub inbox: Address,
    pub outbox: Address,
    pub router: Option<Address>,
    pub weth: Option<Address>,
    /// Arbitrum rollup outbox on the settlement chain
    pub rollup_outbox: Address,
    pub sequencer_inbox: Address,
}

impl BridgeAddresses {
    pub fn from_config(config: &Config) -> Self {
        Self {
            inbox: config.inbox_address,
            outbox: config.outbox_address,
            router: config.router_address,
            weth: config.weth_address,
            rollup_outbox: config.arb_outbox_address,
            sequencer_inbox: config.sequencer_inbox_address,
        }
    }
}

/// Inbox, outbox and settlement chains of one route
pub struct EvmBridge {
    route: RouteKind,
    account: Address,
    inbox: Arc<EvmChain>,
    outbox: Arc<EvmChain>,
    settlement: Arc<EvmChain>,
    addresses: BridgeAddresses,
    deposit: U256,
    epoch_period: u64,
    claim_lookback_secs: u64,
    fee_bump: FeeBumpConfig,
    challenge_fee_divisor: u64,
    amb_gas_limit: u64,
    /// Next nonce per chain id, shared by chains with the same id
    nonces: Mutex<HashMap<u64, u64>>,
}

impl EvmBridge {
    pub async fn connect(config: &Config, bridge: &BridgeConfig) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .map_err(|e| eyre!("Invalid private key: {}", e))?;
        let retry = config.retry_policy();

        let outbox_rpc = match bridge.route {
            RouteKind::ArbToEth => config.rpc_eth.clone(),
            RouteKind::ArbToGnosis => config
                .rpc_gnosis
                .clone()
                .ok_or_else(|| eyre!("RPC_GNOSIS required for the {} route", bridge.name))?,
        };
        if bridge.route.uses_weth() && config.weth_address.is_none() {
            return Err(eyre!("WETH_ADDRESS required for the {} route", bridge.name));
        }

        let inbox = EvmChain::connect(
            ChainSide::Inbox,
            &config.rpc_arb,
            &signer,
            retry.clone(),
            INBOX_LOG_CHUNK,
            bridge.inbox_block_millis,
        )
        .await?;
        let outbox = EvmChain::connect(
            ChainSide::Outbox,
            &outbox_rpc,
            &signer,
            retry.clone(),
            OUTBOX_LOG_CHUNK,
            bridge.outbox_block_millis,
        )
        .await?;
        let settlement = EvmChain::connect(
            ChainSide::Settlement,
            &config.rpc_eth,
            &signer,
            retry,
            OUTBOX_LOG_CHUNK,
            ETHEREUM_BLOCK_MILLIS,
        )
        .await?;

        info!(
            route = bridge.name,
            account = %signer.address(),
            inbox = %config.inbox_address,
            outbox = %config.outbox_address,
            "EVM bridge initialized"
        );

        Ok(Self {
            route: bridge.route,
            account: signer.address(),
            inbox: Arc::new(inbox),
            outbox: Arc::new(outbox),
            settlement: Arc::new(settlement),
            addresses: BridgeAddresses::from_config(config),
            deposit: bridge.deposit,
            epoch_period: bridge.epoch_period,
            claim_lookback_secs: claim_lookback_secs(bridge),
            fee_bump: FeeBumpConfig::default(),
            challenge_fee_divisor: config.challenge_fee_divisor,
            amb_gas_limit: DEFAULT_AMB_GAS_LIMIT,
            nonces: Mutex::new(HashMap::new()),
        })
    }

    /// Adopt parameters reconciled against the outbox
    pub fn apply_params(&mut self, bridge: &BridgeConfig) {
        self.deposit = bridge.deposit;
        self.epoch_period = bridge.epoch_period;
        self.claim_lookback_secs = claim_lookback_secs(bridge);
    }

    pub fn route(&self) -> RouteKind {
        self.route
    }

    pub fn addresses(&self) -> &BridgeAddresses {
        &self.addresses
    }

    pub fn chain(&self, side: ChainSide) -> &Arc<EvmChain> {
        match side {
            ChainSide::Inbox => &self.inbox,
            ChainSide::Outbox => &self.outbox,
            ChainSide::Settlement => &self.settlement,
        }
    }

    pub fn blocks(&self, side: ChainSide) -> Arc<dyn BlockSource> {
        self.chain(side).clone()
    }

    /// Batch index of the Arbitrum inbox against the settlement chain
    pub fn batches(&self) -> Arc<dyn BatchIndex> {
        Arc::new(ArbitrumBatches::new(
            self.inbox.clone(),
            self.settlement.clone(),
            self.addresses.sequencer_inbox,
        ))
    }

    pub async fn balance(&self, side: ChainSide) -> Result<U256> {
        self.chain(side).balance(self.account).await
    }

    /// Protocol parameters as reported by the outbox
    pub async fn onchain_params(&self) -> Result<OnchainParams> {
        let outbox = IVeaOutbox::new(self.addresses.outbox, self.outbox.provider());
        let outbox = &outbox;

        let epoch_period = self
            .outbox
            .read("epochPeriod", || async move { Ok(outbox.epochPeriod().call().await?._0) })
            .await?;
        let deposit = self
            .outbox
            .read("deposit", || async move { Ok(outbox.deposit().call().await?._0) })
            .await?;
        let min_challenge_period = self
            .outbox
            .read("minChallengePeriod", || async move {
                Ok(outbox.minChallengePeriod().call().await?._0)
            })
            .await?;
        let sequencer_delay_limit = self
            .outbox
            .read("sequencerDelayLimit", || async move {
                Ok(outbox.sequencerDelayLimit().call().await?._0)
            })
            .await?;

        Ok(OnchainParams {
            epoch_period: epoch_period.saturating_to(),
            deposit,
            min_challenge_period: min_challenge_period.saturating_to(),
            sequencer_delay_limit: sequencer_delay_limit.saturating_to(),
        })
    }

    /// Epoch period as reported by the inbox
    pub async fn inbox_epoch_period(&self) -> Result<u64> {
        let inbox = IVeaInbox::new(self.addresses.inbox, self.inbox.provider());
        let inbox = &inbox;
        let period = self
            .inbox
            .read("epochPeriod", || async move { Ok(inbox.epochPeriod().call().await?._0) })
            .await?;
        Ok(period.saturating_to())
    }

    fn weth(&self) -> Result<Address> {
        self.addresses
            .weth
            .ok_or_else(|| eyre!("route has no WETH address"))
    }

    /// WETH the outbox may pull from our account
    pub async fn weth_allowance(&self) -> Result<U256> {
        let weth = IWETH::new(self.weth()?, self.outbox.provider());
        let weth = &weth;
        let (owner, spender) = (self.account, self.addresses.outbox);
        self.outbox
            .read("allowance", || async move {
                Ok(weth.allowance(owner, spender).call().await?._0)
            })
            .await
    }

    pub async fn weth_balance(&self) -> Result<U256> {
        let weth = IWETH::new(self.weth()?, self.outbox.provider());
        let weth = &weth;
        let owner = self.account;
        self.outbox
            .read("balanceOf", || async move { Ok(weth.balanceOf(owner).call().await?._0) })
            .await
    }

    /// Approve the outbox to pull `amount` WETH
    pub async fn approve_weth(&self, amount: U256) -> Result<B256> {
        let input = IWETH::approveCall {
            spender: self.addresses.outbox,
            amount,
        }
        .abi_encode();
        let request = TransactionRequest::default()
            .with_from(self.account)
            .with_to(self.weth()?)
            .with_input(Bytes::from(input));

        let broadcast = self
            .broadcast(&self.outbox, request, "approve", 0, None, None)
            .await?;
        Ok(broadcast.hash)
    }

    /// Deposit sent as msg.value, zero on WETH routes
    fn native_deposit(&self) -> U256 {
        if self.route.uses_weth() {
            U256::ZERO
        } else {
            self.deposit
        }
    }

    /// Target, calldata and value for a call
    async fn encode_call(&self, call: &TxCall) -> Result<(Address, Vec<u8>, U256)> {
        let outbox = self.addresses.outbox;
        let inbox = self.addresses.inbox;

        let encoded = match call {
            TxCall::Claim { epoch, state_root } => (
                outbox,
                IVeaOutbox::claimCall {
                    epoch: U256::from(*epoch),
                    stateRoot: *state_root,
                }
                .abi_encode(),
                self.native_deposit(),
            ),
            TxCall::StartVerification { epoch, claim } => (
                outbox,
                IVeaOutbox::startVerificationCall {
                    epoch: U256::from(*epoch),
                    claim: claim.into(),
                }
                .abi_encode(),
                U256::ZERO,
            ),
            TxCall::VerifySnapshot { epoch, claim } => (
                outbox,
                IVeaOutbox::verifySnapshotCall {
                    epoch: U256::from(*epoch),
                    claim: claim.into(),
                }
                .abi_encode(),
                U256::ZERO,
            ),
            TxCall::WithdrawClaimDeposit { epoch, claim } => (
                outbox,
                IVeaOutbox::withdrawClaimDepositCall {
                    epoch: U256::from(*epoch),
                    claim: claim.into(),
                }
                .abi_encode(),
                U256::ZERO,
            ),
            TxCall::Challenge { epoch, claim } => match self.route {
                RouteKind::ArbToEth => (
                    outbox,
                    IVeaOutboxArbToEth::challengeCall {
                        epoch: U256::from(*epoch),
                        claim: claim.into(),
                        withdrawalAddress: self.account,
                    }
                    .abi_encode(),
                    self.deposit,
                ),
                RouteKind::ArbToGnosis => (
                    outbox,
                    IVeaOutboxArbToGnosis::challengeCall {
                        epoch: U256::from(*epoch),
                        claim: claim.into(),
                    }
                    .abi_encode(),
                    U256::ZERO,
                ),
            },
            TxCall::WithdrawChallengeDeposit { epoch, claim } => (
                outbox,
                IVeaOutbox::withdrawChallengeDepositCall {
                    epoch: U256::from(*epoch),
                    claim: claim.into(),
                }
                .abi_encode(),
                U256::ZERO,
            ),
            TxCall::SendSnapshot { epoch, claim } => match self.route {
                RouteKind::ArbToEth => (
                    inbox,
                    IVeaInboxArbToEth::sendSnapshotCall {
                        epoch: U256::from(*epoch),
                        claim: claim.into(),
                    }
                    .abi_encode(),
                    U256::ZERO,
                ),
                RouteKind::ArbToGnosis => (
                    inbox,
                    IVeaInboxArbToGnosis::sendSnapshotCall {
                        epoch: U256::from(*epoch),
                        gasLimit: U256::from(self.amb_gas_limit),
                        claim: claim.into(),
                    }
                    .abi_encode(),
                    U256::ZERO,
                ),
            },
            TxCall::ResolveDispute {
                sent, send_count, ..
            } => {
                let message = &sent.message;
                let proof = arbitrum::outbox_proof(&self.inbox, *send_count, message.position)
                    .await
                    .wrap_err("Failed to construct outbox proof")?;
                (
                    self.addresses.rollup_outbox,
                    IOutbox::executeTransactionCall {
                        proof,
                        index: message.position,
                        l2Sender: message.caller,
                        to: message.destination,
                        l2Block: message.arb_block_num,
                        l1Block: message.eth_block_num,
                        l2Timestamp: message.timestamp,
                        value: message.callvalue,
                        data: message.data.clone(),
                    }
                    .abi_encode(),
                    U256::ZERO,
                )
            }
            TxCall::SaveSnapshot { .. } => {
                (inbox, IVeaInbox::saveSnapshotCall {}.abi_encode(), U256::ZERO)
            }
        };
        Ok(encoded)
    }

    /// Estimate, price, sign and broadcast a request on one chain
    async fn broadcast(
        &self,
        chain: &EvmChain,
        request: TransactionRequest,
        label: &str,
        attempt: u32,
        replace_nonce: Option<u64>,
        fee_cap_divisor: Option<u64>,
    ) -> Result<Broadcast> {
        let provider = chain.provider();

        // A reverting call fails estimation and is never broadcast
        let gas_estimate = provider
            .estimate_gas(&request)
            .await
            .wrap_err_with(|| format!("{} gas estimation failed", label))?;

        let fees = chain
            .read("eth_feeHistory", || async move {
                Ok(provider.estimate_eip1559_fees(None).await?)
            })
            .await?;

        let mut max_fee = self.fee_bump.fee_for_attempt(fees.max_fee_per_gas, attempt);
        let mut priority_fee = self
            .fee_bump
            .fee_for_attempt(fees.max_priority_fee_per_gas, attempt);
        if let Some(divisor) = fee_cap_divisor {
            max_fee = max_fee.min(capped_fee_per_gas(self.deposit, gas_estimate, divisor));
            priority_fee = priority_fee.min(max_fee);
        }

        let mut nonces = self.nonces.lock().await;
        let nonce = match replace_nonce {
            Some(nonce) => nonce,
            None => {
                let pending = chain.pending_nonce(self.account).await?;
                let tracked = nonces.get(&chain.chain_id()).copied().unwrap_or(0);
                pending.max(tracked)
            }
        };

        let request = request
            .with_gas_limit(gas_estimate.saturating_mul(6) / 5)
            .with_max_fee_per_gas(max_fee)
            .with_max_priority_fee_per_gas(priority_fee)
            .with_nonce(nonce)
            .with_chain_id(chain.chain_id());

        let pending = provider
            .send_transaction(request)
            .await
            .wrap_err_with(|| format!("Failed to send {} tx", label))?;
        let hash = *pending.tx_hash();

        if replace_nonce.is_none() {
            nonces.insert(chain.chain_id(), nonce + 1);
        }

        debug!(
            chain = %chain.side(),
            kind = label,
            tx_hash = %hash,
            nonce,
            attempt,
            gas_estimate,
            max_fee,
            "Transaction broadcast"
        );

        Ok(Broadcast { hash, nonce })
    }
}

fn claim_lookback_secs(bridge: &BridgeConfig) -> u64 {
    bridge.sequencer_delay_limit + 2 * bridge.epoch_period
}

#[async_trait]
impl BridgeReader for EvmBridge {
    async fn claim_hash(&self, epoch: u64) -> Result<B256> {
        let outbox = IVeaOutbox::new(self.addresses.outbox, self.outbox.provider());
        let outbox = &outbox;
        self.outbox
            .read("claimHashes", || async move {
                Ok(outbox.claimHashes(U256::from(epoch)).call().await?._0)
            })
            .await
    }

    async fn claim_events(&self, epoch: u64) -> Result<Option<ClaimEvents>> {
        let outbox = &self.outbox;
        let latest = outbox.block_info(BlockNumberOrTag::Latest).await?;
        let from = outbox.estimate_block_at(latest, (epoch + 1) * self.epoch_period);

        let filter = Filter::new()
            .address(self.addresses.outbox)
            .event_signature(IVeaOutbox::Claimed::SIGNATURE_HASH)
            .topic2(epoch_topic(epoch));
        let logs = outbox.logs(&filter, from, latest.number).await?;
        let Some(log) = logs.first() else {
            return Ok(None);
        };

        let claimed = log.log_decode::<IVeaOutbox::Claimed>()?.inner.data;
        let claim_block = log
            .block_number
            .ok_or_else(|| eyre!("Claimed log for epoch {} has no block number", epoch))?;

        let mut events = ClaimEvents {
            state_root: claimed.stateRoot,
            claimer: claimed.claimer,
            timestamp_claimed: outbox.block_timestamp(claim_block).await? as u32,
            verification: None,
            challenger: None,
        };

        let filter = Filter::new()
            .address(self.addresses.outbox)
            .event_signature(vec![
                IVeaOutbox::VerificationStarted::SIGNATURE_HASH,
                IVeaOutbox::Challenged::SIGNATURE_HASH,
            ])
            .topic1(epoch_topic(epoch));

        for log in outbox.logs(&filter, claim_block, latest.number).await? {
            let Some(&signature) = log.topics().first() else {
                continue;
            };
            if signature == IVeaOutbox::VerificationStarted::SIGNATURE_HASH {
                let block = log
                    .block_number
                    .ok_or_else(|| eyre!("VerificationStarted log has no block number"))?;
                let timestamp = outbox.block_timestamp(block).await?;
                events.verification = Some((timestamp as u32, block as u32));
            } else if signature == IVeaOutbox::Challenged::SIGNATURE_HASH {
                let challenged = log.log_decode::<IVeaOutbox::Challenged>()?.inner.data;
                events.challenger = Some(challenged.challenger);
            }
        }

        Ok(Some(events))
    }

    async fn inbox_snapshot(&self, epoch: u64) -> Result<B256> {
        let inbox = IVeaInbox::new(self.addresses.inbox, self.inbox.provider());
        let inbox = &inbox;
        self.inbox
            .read("snapshots", || async move {
                Ok(inbox.snapshots(U256::from(epoch)).call().await?._0)
            })
            .await
    }

    async fn latest_claim(&self) -> Result<Option<LatestClaim>> {
        let outbox = &self.outbox;
        let latest = outbox.block_info(BlockNumberOrTag::Latest).await?;
        let from = outbox.estimate_block_at(
            latest,
            latest.timestamp.saturating_sub(self.claim_lookback_secs),
        );

        let filter = Filter::new()
            .address(self.addresses.outbox)
            .event_signature(IVeaOutbox::Claimed::SIGNATURE_HASH);
        let logs = outbox.logs(&filter, from, latest.number).await?;
        let Some(log) = logs.last() else {
            return Ok(None);
        };
        let claimed = log.log_decode::<IVeaOutbox::Claimed>()?.inner.data;
        let epoch = claimed.epoch.saturating_to::<u64>();
        let claim_block = log.block_number.unwrap_or(from);

        let filter = Filter::new()
            .address(self.addresses.outbox)
            .event_signature(IVeaOutbox::Challenged::SIGNATURE_HASH)
            .topic1(epoch_topic(epoch));
        let challenged = !outbox.logs(&filter, claim_block, latest.number).await?.is_empty();

        Ok(Some(LatestClaim {
            epoch,
            state_root: claimed.stateRoot,
            challenged,
        }))
    }

    async fn verified_state_root(&self) -> Result<B256> {
        let outbox = IVeaOutbox::new(self.addresses.outbox, self.outbox.provider());
        let outbox = &outbox;
        self.outbox
            .read("stateRoot", || async move { Ok(outbox.stateRoot().call().await?._0) })
            .await
    }

    async fn snapshot_sent(&self, epoch: u64) -> Result<Option<SnapshotSent>> {
        let inbox = &self.inbox;
        let latest = inbox.block_info(BlockNumberOrTag::Latest).await?;
        let from = inbox.estimate_block_at(latest, epoch * self.epoch_period);

        let filter = Filter::new()
            .address(self.addresses.inbox)
            .event_signature(IVeaInbox::SnapshotSent::SIGNATURE_HASH)
            .topic1(epoch_topic(epoch));
        let logs = inbox.logs(&filter, from, latest.number).await?;
        let Some(log) = logs.last() else {
            return Ok(None);
        };

        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| eyre!("SnapshotSent log for epoch {} has no tx hash", epoch))?;
        let receipt = inbox
            .receipt(tx_hash)
            .await?
            .ok_or_else(|| eyre!("receipt for sendSnapshot {} not found", tx_hash))?;
        let message = arbitrum::l2_to_l1_message(&receipt)
            .ok_or_else(|| eyre!("sendSnapshot {} emitted no L2ToL1Tx", tx_hash))?;

        Ok(Some(SnapshotSent {
            epoch,
            tx_hash,
            l2_block: receipt.block_number.unwrap_or_default(),
            l2_timestamp: message.timestamp.saturating_to(),
            message,
        }))
    }

    async fn message_status(&self, sent: &SnapshotSent) -> Result<MessageStatus> {
        arbitrum::message_status(
            &self.inbox,
            &self.settlement,
            self.addresses.rollup_outbox,
            sent,
        )
        .await
    }

    async fn inbox_message_count(&self) -> Result<u64> {
        let inbox = IVeaInbox::new(self.addresses.inbox, self.inbox.provider());
        let inbox = &inbox;
        self.inbox
            .read("count", || async move { Ok(inbox.count().call().await?._0) })
            .await
    }

    async fn last_saved_snapshot_count(&self) -> Result<Option<u64>> {
        let inbox = &self.inbox;
        let latest = inbox.block_info(BlockNumberOrTag::Latest).await?;
        let from = inbox.estimate_block_at(
            latest,
            latest.timestamp.saturating_sub(2 * self.epoch_period),
        );

        let filter = Filter::new()
            .address(self.addresses.inbox)
            .event_signature(IVeaInbox::SnapshotSaved::SIGNATURE_HASH);
        let logs = inbox.logs(&filter, from, latest.number).await?;

        match logs.last() {
            Some(log) => Ok(Some(
                log.log_decode::<IVeaInbox::SnapshotSaved>()?.inner.data.count,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TransactionSender for EvmBridge {
    fn account(&self) -> Address {
        self.account
    }

    async fn submit(
        &self,
        call: &TxCall,
        attempt: u32,
        replace_nonce: Option<u64>,
    ) -> Result<Broadcast> {
        let kind = call.kind();
        let chain = self.chain(kind.chain()).clone();
        let (to, input, value) = self.encode_call(call).await?;

        let request = TransactionRequest::default()
            .with_from(self.account)
            .with_to(to)
            .with_input(Bytes::from(input))
            .with_value(value);

        // Challenge gas must stay well below the deposit it wins
        let fee_cap = (kind == TxKind::Challenge).then_some(self.challenge_fee_divisor);

        self.broadcast(&chain, request, kind.as_str(), attempt, replace_nonce, fee_cap)
            .await
    }

    async fn receipt(&self, chain: ChainSide, hash: B256) -> Result<Option<ReceiptInfo>> {
        let receipt = self.chain(chain).receipt(hash).await?;
        Ok(receipt.and_then(|receipt| {
            receipt.block_number.map(|block_number| ReceiptInfo {
                block_number,
                success: receipt.status(),
            })
        }))
    }

    async fn block_number(&self, chain: ChainSide) -> Result<u64> {
        self.chain(chain).block_number().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_block_at_biases_early() {
        let latest = BlockInfo {
            number: 1_000_000,
            timestamp: 1_730_000_000,
        };
        // One hour of 12s blocks is 300 blocks, plus a 10% + 10 margin
        assert_eq!(
            estimate_block_at(latest, latest.timestamp - 3600, 12_000),
            1_000_000 - 300 - 40
        );
        assert_eq!(estimate_block_at(latest, latest.timestamp + 5, 12_000), 1_000_000);
        assert_eq!(estimate_block_at(latest, 0, 12_000), 0);
    }

    #[test]
    fn test_estimate_block_at_sub_second_blocks() {
        let latest = BlockInfo {
            number: 50_000_000,
            timestamp: 1_730_000_000,
        };
        // 250ms Arbitrum blocks: 4 per second
        let block = estimate_block_at(latest, latest.timestamp - 1000, 250);
        assert_eq!(block, 50_000_000 - 4000 - 410);
    }

    #[test]
    fn test_epoch_topic() {
        let topic = epoch_topic(0x1234);
        assert_eq!(&topic[30..], &[0x12, 0x34]);
        assert!(topic[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_block_tags() {
        assert_eq!(block_id(BlockTag::Number(7)), BlockId::number(7));
        assert_eq!(block_number_or_tag(BlockTag::Finalized), BlockNumberOrTag::Finalized);
        assert_eq!(block_number_or_tag(BlockTag::Latest), BlockNumberOrTag::Latest);
    }

    #[test]
    fn test_is_revert() {
        assert!(is_revert("server returned an error response: execution reverted"));
        assert!(!is_revert("connection refused"));
    }
}
