//! Watcher configuration

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::finality::DEFAULT_CLOCK_DRIFT_SECS;
use crate::retry::RetryPolicy;
use crate::transaction::{TxConfig, DEFAULT_REQUIRED_CONFIRMATIONS, DEFAULT_TX_EXPIRY_SECS};
use crate::types::BotPath;
use crate::watcher::DEFAULT_SNAPSHOT_SAVE_WINDOW_SECS;

/// Watcher configuration
#[derive(Clone)]
pub struct Config {
    /// Instance ID reported on the health endpoint
    pub watcher_id: String,

    /// Signing key for every chain
    pub private_key: String,
    /// Outbox chain id, selects the bridge route
    pub outbox_chain_id: u64,

    /// Arbitrum (inbox) RPC URL
    pub rpc_arb: String,
    /// Ethereum RPC URL (outbox for ArbToEth, settlement for every route)
    pub rpc_eth: String,
    /// Gnosis RPC URL, required for ArbToGnosis
    pub rpc_gnosis: Option<String>,

    pub inbox_address: Address,
    pub outbox_address: Address,
    /// Ethereum router relaying ArbToGnosis snapshots
    pub router_address: Option<Address>,
    /// WETH used for ArbToGnosis deposits
    pub weth_address: Option<Address>,
    /// Arbitrum rollup outbox on Ethereum
    pub arb_outbox_address: Address,
    /// Arbitrum sequencer inbox on Ethereum
    pub sequencer_inbox_address: Address,

    pub bot_path: BotPath,
    pub start_epoch: Option<u64>,

    pub poll_interval_secs: u64,
    pub tx_expiry_secs: u64,
    pub tx_confirmations: u64,
    pub clock_drift_secs: u64,
    /// Look-back on a cold start, on top of the sequencer delay margin
    pub cold_start_backlog_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Challenge gas may cost at most `deposit / divisor`
    pub challenge_fee_divisor: u64,
    /// Arbitrum rollup challenge period before an L2 -> L1 message is executable
    pub arb_challenge_period_secs: u64,
    pub snapshot_save_window_secs: u64,
    pub event_channel_capacity: usize,

    pub health_bind_address: String,
    /// Health server port (default 9099)
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded .env from {:?}", path);
        }

        let default_id = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| format!("vea-watcher-{}", std::process::id()));

        let bot_path = match env::var("BOT_PATH") {
            Ok(value) => value.parse::<BotPath>()?,
            Err(_) => BotPath::Both,
        };

        Ok(Self {
            watcher_id: env::var("WATCHER_ID").unwrap_or(default_id),

            private_key: env::var("PRIVATE_KEY").map_err(|_| eyre!("PRIVATE_KEY required"))?,
            outbox_chain_id: env::var("VEAOUTBOX_CHAIN_ID")
                .map_err(|_| eyre!("VEAOUTBOX_CHAIN_ID required"))?
                .trim()
                .parse()
                .map_err(|_| eyre!("Invalid VEAOUTBOX_CHAIN_ID"))?,

            rpc_arb: env::var("RPC_ARB").map_err(|_| eyre!("RPC_ARB required"))?,
            rpc_eth: env::var("RPC_ETH").map_err(|_| eyre!("RPC_ETH required"))?,
            rpc_gnosis: env::var("RPC_GNOSIS").ok(),

            inbox_address: required_address("VEAINBOX_ADDRESS")?,
            outbox_address: required_address("VEAOUTBOX_ADDRESS")?,
            router_address: optional_address("VEAROUTER_ADDRESS")?,
            weth_address: optional_address("WETH_ADDRESS")?,
            arb_outbox_address: required_address("ARB_OUTBOX_ADDRESS")?,
            sequencer_inbox_address: required_address("SEQUENCER_INBOX_ADDRESS")?,

            bot_path,
            start_epoch: match env::var("START_EPOCH") {
                Ok(value) => Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| eyre!("Invalid START_EPOCH"))?,
                ),
                Err(_) => None,
            },

            poll_interval_secs: env_or("POLL_INTERVAL_SECS", 10),
            tx_expiry_secs: env_or("TX_EXPIRY_SECS", DEFAULT_TX_EXPIRY_SECS),
            tx_confirmations: env_or("TX_CONFIRMATIONS", DEFAULT_REQUIRED_CONFIRMATIONS),
            clock_drift_secs: env_or("CLOCK_DRIFT_SECS", DEFAULT_CLOCK_DRIFT_SECS),
            cold_start_backlog_secs: env_or("COLD_START_BACKLOG_SECS", 7 * 24 * 3600),
            retry_attempts: env_or("RETRY_ATTEMPTS", 10),
            retry_delay_ms: env_or("RETRY_DELAY_MS", 1000),
            challenge_fee_divisor: env_or("CHALLENGE_FEE_DIVISOR", 6),
            arb_challenge_period_secs: env_or("ARB_CHALLENGE_PERIOD_SECS", 7 * 24 * 3600),
            snapshot_save_window_secs: env_or(
                "SNAPSHOT_SAVE_WINDOW_SECS",
                DEFAULT_SNAPSHOT_SAVE_WINDOW_SECS,
            ),
            event_channel_capacity: env_or("EVENT_CHANNEL_CAPACITY", DEFAULT_EVENT_CAPACITY),

            health_bind_address: env::var("HEALTH_BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            health_port: env_or("HEALTH_PORT", 9099),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn tx_config(&self) -> TxConfig {
        TxConfig {
            required_confirmations: self.tx_confirmations,
            expiry_secs: self.tx_expiry_secs,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("watcher_id", &self.watcher_id)
            .field("private_key", &"<redacted>")
            .field("outbox_chain_id", &self.outbox_chain_id)
            .field("rpc_arb", &self.rpc_arb)
            .field("rpc_eth", &self.rpc_eth)
            .field("rpc_gnosis", &self.rpc_gnosis)
            .field("inbox_address", &self.inbox_address)
            .field("outbox_address", &self.outbox_address)
            .field("bot_path", &self.bot_path)
            .field("start_epoch", &self.start_epoch)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish_non_exhaustive()
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn required_address(name: &str) -> Result<Address> {
    let value = env::var(name).map_err(|_| eyre!("{} required", name))?;
    Address::from_str(value.trim()).wrap_err_with(|| format!("Invalid {}", name))
}

fn optional_address(name: &str) -> Result<Option<Address>> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Address::from_str(value.trim())
            .map(Some)
            .wrap_err_with(|| format!("Invalid {}", name)),
        _ => Ok(None),
    }
}
