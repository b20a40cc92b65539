//! Vea Watcher Node
//!
//! Watches one Vea bridge route and acts as claimer, challenger or both.
//!
//! # Claim Lifecycle
//!
//! 1. Claimer posts the inbox snapshot of a finished epoch to the outbox with a deposit
//! 2. After the sequencer delay, verification starts
//! 3. After the minimum challenge period, the claim is verified and the deposit returned
//! 4. A challenger disputing a claim sends the true snapshot through the native
//!    Arbitrum bridge and executes it on the settlement chain once confirmed
//!
//! Every epoch is driven by a stateless decision over chain data, so a restart
//! picks up where the previous run stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use vea_watcher::bridges::bridge_config;
use vea_watcher::chain::evm::EvmBridge;
use vea_watcher::chain::TransactionSender;
use vea_watcher::config::Config;
use vea_watcher::epoch::backlog_epochs;
use vea_watcher::events::{run_event_logger, EventSink};
use vea_watcher::finality::{FinalityConfig, FinalityOracle};
use vea_watcher::server::{start_server, SharedStats, WatcherStats};
use vea_watcher::startup;
use vea_watcher::state_machine::StateMachineConfig;
use vea_watcher::types::{ChainSide, SystemClock};
use vea_watcher::watcher::{WatchLoop, WatcherSettings};

const LOGGER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting Vea Watcher");

    let config = Config::load()?;
    let mut bridge = bridge_config(config.outbox_chain_id)?;
    info!(
        watcher_id = %config.watcher_id,
        route = bridge.name,
        bot_path = %config.bot_path,
        rpc_arb = %config.rpc_arb,
        rpc_eth = %config.rpc_eth,
        "Configuration loaded"
    );

    let mut evm = EvmBridge::connect(&config, &bridge).await?;
    startup::prepare(&config, &mut bridge, &mut evm).await?;
    let evm = Arc::new(evm);

    let stats: SharedStats = Arc::new(RwLock::new(WatcherStats {
        watcher_id: config.watcher_id.clone(),
        bot_path: config.bot_path.to_string(),
        route: bridge.name.to_string(),
        ..Default::default()
    }));

    let (events, event_rx) = EventSink::channel(config.event_channel_capacity);
    let logger = tokio::spawn(run_event_logger(event_rx, stats.clone()));

    let server_stats = stats.clone();
    let bind_address = config.health_bind_address.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(&bind_address, health_port, server_stats).await {
            error!(error = %e, "Health server failed");
        }
    });

    let oracle = FinalityOracle::new(
        evm.blocks(ChainSide::Outbox),
        evm.blocks(ChainSide::Inbox),
        evm.blocks(ChainSide::Settlement),
        Some(evm.batches()),
        FinalityConfig {
            epoch_period: bridge.epoch_period,
            settlement_max_finality_secs: bridge.settlement_finality.max_finality_secs(),
            outbox_max_finality_secs: bridge.outbox_finality.max_finality_secs(),
            inbox_max_finality_secs: bridge.settlement_finality.max_finality_secs(),
            clock_drift_secs: config.clock_drift_secs,
        },
        events.clone(),
    );

    let machine_config = StateMachineConfig {
        epoch_period: bridge.epoch_period,
        min_challenge_period: bridge.min_challenge_period,
        sequencer_delay_limit: bridge.sequencer_delay_limit,
        settlement_challenge_period: config.arb_challenge_period_secs,
        bot_path: config.bot_path,
        account: evm.account(),
    };

    let settings = WatcherSettings {
        poll_interval: config.poll_interval(),
        backlog: backlog_epochs(
            bridge.epoch_period,
            bridge.sequencer_delay_limit,
            config.cold_start_backlog_secs,
        ),
        start_epoch: config.start_epoch,
        snapshot_save_window_secs: config.snapshot_save_window_secs,
        route: bridge.name.to_string(),
    };

    let mut watcher = WatchLoop::new(
        evm.clone(),
        evm,
        oracle,
        machine_config,
        config.tx_config(),
        settings,
        Arc::new(SystemClock),
        events.clone(),
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Handle signals
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let result = watcher.run(shutdown_rx).await;

    // The logger exits once every sink is dropped
    let dropped = events.dropped();
    drop(watcher);
    drop(events);
    if tokio::time::timeout(LOGGER_DRAIN_TIMEOUT, logger).await.is_err() {
        warn!("Event logger did not drain in time");
    }
    if dropped > 0 {
        warn!(dropped, "Events dropped on a full channel during this run");
    }

    result?;
    info!("Vea Watcher stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vea_watcher=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
