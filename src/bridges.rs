//! Static per-route bridge parameters
//!
//! A route is selected once at startup from the outbox chain id. The table
//! values are the deployment defaults; [`BridgeConfig::reconcile`] replaces
//! them with whatever the outbox contract reports.

use alloy::primitives::U256;
use serde::Serialize;

use crate::errors::WatcherError;

/// Supported chain-pair families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RouteKind {
    /// Arbitrum inbox, Ethereum outbox. Disputes settle on the outbox chain itself.
    ArbToEth,
    /// Arbitrum inbox, Gnosis outbox. Snapshots travel Arbitrum -> Ethereum router -> AMB -> Gnosis,
    /// deposits are paid in WETH.
    ArbToGnosis,
}

impl RouteKind {
    /// Whether deposits are paid through an ERC20 allowance instead of `msg.value`
    pub fn uses_weth(&self) -> bool {
        matches!(self, RouteKind::ArbToGnosis)
    }
}

/// Finality profile of a PoS chain: finalization is expected within
/// `slots * slot_secs + buffer_secs` of the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinalityProfile {
    pub slots: u64,
    pub slot_secs: u64,
    pub buffer_secs: u64,
}

impl FinalityProfile {
    pub const ETHEREUM: FinalityProfile = FinalityProfile {
        slots: 64,
        slot_secs: 12,
        buffer_secs: 300,
    };

    pub const GNOSIS: FinalityProfile = FinalityProfile {
        slots: 32,
        slot_secs: 5,
        buffer_secs: 300,
    };

    pub fn max_finality_secs(&self) -> u64 {
        self.slots * self.slot_secs + self.buffer_secs
    }
}

/// Per-route protocol parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeConfig {
    pub name: &'static str,
    pub outbox_chain_id: u64,
    pub route: RouteKind,
    /// Epoch length in seconds
    pub epoch_period: u64,
    /// Claim and challenge deposit in wei
    pub deposit: U256,
    pub min_challenge_period: u64,
    pub sequencer_delay_limit: u64,
    /// Finality profile of the settlement chain (Ethereum for every current route)
    pub settlement_finality: FinalityProfile,
    /// Finality profile of the outbox chain
    pub outbox_finality: FinalityProfile,
    /// Average outbox block time, used to size log lookbacks
    pub outbox_block_millis: u64,
    /// Average inbox block time
    pub inbox_block_millis: u64,
}

const ONE_ETHER: u64 = 1_000_000_000_000_000_000;

/// Look up the bridge parameters for an outbox chain id
pub fn bridge_config(outbox_chain_id: u64) -> Result<BridgeConfig, WatcherError> {
    let config = match outbox_chain_id {
        1 => BridgeConfig {
            name: "ethereum",
            outbox_chain_id,
            route: RouteKind::ArbToEth,
            epoch_period: 3600,
            deposit: U256::from(ONE_ETHER),
            min_challenge_period: 10800,
            sequencer_delay_limit: 86400,
            settlement_finality: FinalityProfile::ETHEREUM,
            outbox_finality: FinalityProfile::ETHEREUM,
            outbox_block_millis: 12_000,
            inbox_block_millis: 250,
        },
        11155111 => BridgeConfig {
            name: "sepolia",
            outbox_chain_id,
            route: RouteKind::ArbToEth,
            epoch_period: 7200,
            deposit: U256::from(ONE_ETHER),
            min_challenge_period: 10800,
            sequencer_delay_limit: 86400,
            settlement_finality: FinalityProfile::ETHEREUM,
            outbox_finality: FinalityProfile::ETHEREUM,
            outbox_block_millis: 12_000,
            inbox_block_millis: 250,
        },
        100 => BridgeConfig {
            name: "gnosis",
            outbox_chain_id,
            route: RouteKind::ArbToGnosis,
            epoch_period: 3600,
            deposit: U256::from(ONE_ETHER),
            min_challenge_period: 10800,
            sequencer_delay_limit: 86400,
            settlement_finality: FinalityProfile::ETHEREUM,
            outbox_finality: FinalityProfile::GNOSIS,
            outbox_block_millis: 5_000,
            inbox_block_millis: 250,
        },
        10200 => BridgeConfig {
            name: "chiado",
            outbox_chain_id,
            route: RouteKind::ArbToGnosis,
            epoch_period: 3600,
            deposit: U256::from(ONE_ETHER),
            min_challenge_period: 10800,
            sequencer_delay_limit: 86400,
            settlement_finality: FinalityProfile::ETHEREUM,
            outbox_finality: FinalityProfile::GNOSIS,
            outbox_block_millis: 5_000,
            inbox_block_millis: 250,
        },
        other => return Err(WatcherError::UnsupportedChain(other)),
    };
    Ok(config)
}

/// Parameters as reported by the outbox contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnchainParams {
    pub epoch_period: u64,
    pub deposit: U256,
    pub min_challenge_period: u64,
    pub sequencer_delay_limit: u64,
}

impl BridgeConfig {
    /// Adopt on-chain values, returning the names of fields that differed
    pub fn reconcile(&mut self, onchain: &OnchainParams) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.epoch_period != onchain.epoch_period {
            self.epoch_period = onchain.epoch_period;
            changed.push("epoch_period");
        }
        if self.deposit != onchain.deposit {
            self.deposit = onchain.deposit;
            changed.push("deposit");
        }
        if self.min_challenge_period != onchain.min_challenge_period {
            self.min_challenge_period = onchain.min_challenge_period;
            changed.push("min_challenge_period");
        }
        if self.sequencer_delay_limit != onchain.sequencer_delay_limit {
            self.sequencer_delay_limit = onchain.sequencer_delay_limit;
            changed.push("sequencer_delay_limit");
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_routes() {
        let sepolia = bridge_config(11155111).unwrap();
        assert_eq!(sepolia.route, RouteKind::ArbToEth);
        assert_eq!(sepolia.epoch_period, 7200);

        let chiado = bridge_config(10200).unwrap();
        assert_eq!(chiado.route, RouteKind::ArbToGnosis);
        assert!(chiado.route.uses_weth());
        assert_eq!(chiado.sequencer_delay_limit, 86400);

        assert_eq!(bridge_config(1).unwrap().name, "ethereum");
        assert_eq!(bridge_config(100).unwrap().name, "gnosis");
    }

    #[test]
    fn test_unsupported_chain() {
        assert_eq!(bridge_config(42), Err(WatcherError::UnsupportedChain(42)));
    }

    #[test]
    fn test_max_finality() {
        assert_eq!(FinalityProfile::ETHEREUM.max_finality_secs(), 64 * 12 + 300);
        assert_eq!(FinalityProfile::GNOSIS.max_finality_secs(), 32 * 5 + 300);
    }

    #[test]
    fn test_reconcile_adopts_onchain_values() {
        let mut config = bridge_config(11155111).unwrap();
        let changed = config.reconcile(&OnchainParams {
            epoch_period: 7200,
            deposit: U256::from(2u64) * U256::from(ONE_ETHER),
            min_challenge_period: 10800,
            sequencer_delay_limit: 43200,
        });

        assert_eq!(changed, vec!["deposit", "sequencer_delay_limit"]);
        assert_eq!(config.sequencer_delay_limit, 43200);
        assert_eq!(config.deposit, U256::from(2u64) * U256::from(ONE_ETHER));
    }
}
