//! Startup checks run once before the watch loop
//!
//! Verifies that the RPC endpoints serve the chains the route expects, adopts
//! the protocol parameters the outbox reports, warns about balances that
//! cannot cover a deposit and sets the WETH allowance on WETH routes.

use std::time::Duration;

use alloy::primitives::U256;
use eyre::{eyre, Result};
use tracing::{info, warn};

use crate::bridges::{BridgeConfig, RouteKind};
use crate::chain::evm::EvmBridge;
use crate::config::Config;
use crate::types::ChainSide;

const APPROVAL_POLL_INTERVAL: Duration = Duration::from_secs(5);
const APPROVAL_POLL_ATTEMPTS: u32 = 60;

/// Ethereum mainnet and Sepolia, the only settlement chains in use
const SETTLEMENT_CHAIN_IDS: [u64; 2] = [1, 11155111];

/// Run every startup check, mutating `bridge` to the on-chain parameters
pub async fn prepare(config: &Config, bridge: &mut BridgeConfig, evm: &mut EvmBridge) -> Result<()> {
    check_chain_ids(
        bridge,
        evm.chain(ChainSide::Outbox).chain_id(),
        evm.chain(ChainSide::Settlement).chain_id(),
    )?;

    reconcile_params(bridge, evm).await?;
    evm.apply_params(bridge);

    check_balances(config, bridge, evm).await?;

    if bridge.route.uses_weth() {
        ensure_weth_approval(bridge, evm).await?;
    }

    info!(
        route = bridge.name,
        epoch_period = bridge.epoch_period,
        deposit = %bridge.deposit,
        "Startup checks passed"
    );
    Ok(())
}

/// Endpoints must serve the chains the route is configured for
pub fn check_chain_ids(bridge: &BridgeConfig, outbox_id: u64, settlement_id: u64) -> Result<()> {
    if outbox_id != bridge.outbox_chain_id {
        return Err(eyre!(
            "outbox RPC serves chain {}, expected {} for the {} route",
            outbox_id,
            bridge.outbox_chain_id,
            bridge.name
        ));
    }

    let settlement_ok = match bridge.route {
        RouteKind::ArbToEth => settlement_id == bridge.outbox_chain_id,
        RouteKind::ArbToGnosis => SETTLEMENT_CHAIN_IDS.contains(&settlement_id),
    };
    if !settlement_ok {
        return Err(eyre!(
            "RPC_ETH serves chain {}, which cannot settle the {} route",
            settlement_id,
            bridge.name
        ));
    }
    Ok(())
}

async fn reconcile_params(bridge: &mut BridgeConfig, evm: &EvmBridge) -> Result<()> {
    let onchain = evm.onchain_params().await?;
    let inbox_period = evm.inbox_epoch_period().await?;
    if inbox_period != onchain.epoch_period {
        return Err(eyre!(
            "inbox epoch period {} does not match outbox epoch period {}",
            inbox_period,
            onchain.epoch_period
        ));
    }

    for field in bridge.reconcile(&onchain) {
        warn!(
            route = bridge.name,
            field,
            onchain = ?onchain,
            "Bridge parameter differs from on-chain value, using on-chain value"
        );
    }
    Ok(())
}

async fn check_balances(config: &Config, bridge: &BridgeConfig, evm: &EvmBridge) -> Result<()> {
    let outbox_balance = evm.balance(ChainSide::Outbox).await?;

    match bridge.route {
        RouteKind::ArbToEth => {
            if outbox_balance < bridge.deposit {
                warn!(
                    balance = %outbox_balance,
                    deposit = %bridge.deposit,
                    "Outbox balance cannot cover a deposit, claims and challenges will fail"
                );
            }
        }
        RouteKind::ArbToGnosis => {
            let weth_balance = evm.weth_balance().await?;
            if weth_balance < bridge.deposit {
                warn!(
                    balance = %weth_balance,
                    deposit = %bridge.deposit,
                    "WETH balance cannot cover a deposit, claims and challenges will fail"
                );
            }
            if outbox_balance.is_zero() {
                warn!("No native balance on the outbox chain for gas");
            }
        }
    }

    let inbox_balance = evm.balance(ChainSide::Inbox).await?;
    if inbox_balance.is_zero() {
        let calls = if config.bot_path.claims() {
            "saveSnapshot and sendSnapshot"
        } else {
            "sendSnapshot"
        };
        warn!("No balance on the inbox chain, {} will fail", calls);
    }

    info!(outbox_balance = %outbox_balance, "Balance check done");
    Ok(())
}

async fn ensure_weth_approval(bridge: &BridgeConfig, evm: &EvmBridge) -> Result<()> {
    let allowance = evm.weth_allowance().await?;
    if allowance >= bridge.deposit {
        info!(allowance = %allowance, "WETH approval already exists");
        return Ok(());
    }

    warn!(allowance = %allowance, "WETH allowance below deposit, setting max approval");
    let hash = evm.approve_weth(U256::MAX).await?;

    for _ in 0..APPROVAL_POLL_ATTEMPTS {
        tokio::time::sleep(APPROVAL_POLL_INTERVAL).await;
        if let Some(receipt) = evm.chain(ChainSide::Outbox).receipt(hash).await? {
            if !receipt.status() {
                return Err(eyre!("WETH approval {} reverted", hash));
            }
            info!(tx_hash = %hash, "WETH max approval set");
            return Ok(());
        }
    }

    Err(eyre!("WETH approval {} not mined in time", hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridges::bridge_config;

    #[test]
    fn test_chain_ids_arb_to_eth() {
        let sepolia = bridge_config(11155111).unwrap();
        assert!(check_chain_ids(&sepolia, 11155111, 11155111).is_ok());
        assert!(check_chain_ids(&sepolia, 1, 11155111).is_err());
        assert!(check_chain_ids(&sepolia, 11155111, 1).is_err());
    }

    #[test]
    fn test_chain_ids_arb_to_gnosis() {
        let chiado = bridge_config(10200).unwrap();
        assert!(check_chain_ids(&chiado, 10200, 11155111).is_ok());
        assert!(check_chain_ids(&chiado, 10200, 1).is_ok());
        assert!(check_chain_ids(&chiado, 10200, 10200).is_err());

        let err = check_chain_ids(&chiado, 100, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "outbox RPC serves chain 100, expected 10200 for the chiado route"
        );
    }
}
