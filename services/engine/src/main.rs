use arb_strategy::ConstantPredictor;
use chain_gateway::{ChainGateway, RpcGateway, TransactionSigner};
use clap::Parser;
use config::EngineConfig;
use cqt_engine::engine::Engine;
use cqt_engine::signing::{LocalWalletSigner, ObservationOnlySigner};
use execution_engine::bridge::BridgeAdapter;
use ledger::Ledger;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use types::NetworkId;

/// Exit codes promised to operators.
const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_LEDGER: i32 = 2;
const EXIT_ALL_DEGRADED: i32 = 3;

#[derive(Parser)]
#[command(name = "cqt_engine", about = "CQT cross-chain arbitrage engine")]
struct Cli {
    /// Path to the engine configuration file.
    #[arg(long, default_value = "config/engine.toml")]
    config: PathBuf,

    /// Replay the ledger, print the reconstructed state, and exit.
    #[arg(long)]
    replay_only: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match EngineConfig::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "configuration error");
            return EXIT_CONFIG;
        }
    };

    let (ledger, replay) = match Ledger::open(&config.engine.ledger_path) {
        Ok(opened) => opened,
        Err(e) => {
            error!(error = %e, "ledger unusable");
            return EXIT_LEDGER;
        }
    };
    let ledger = Arc::new(ledger);
    info!(
        events = replay.last_seq,
        open_executions = replay.open_executions.len(),
        open_transfers = replay.open_transfers.len(),
        reclaim = replay.reclaim_transfers.len(),
        "ledger replayed"
    );

    if cli.replay_only {
        for (pool, balance) in &replay.reserve_balances {
            info!(%pool, %balance, "replayed reserve balance");
        }
        for (pool, ts_ns) in &replay.last_injection_ns {
            let when = chrono::DateTime::from_timestamp(
                (ts_ns / 1_000_000_000) as i64,
                (ts_ns % 1_000_000_000) as u32,
            )
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| ts_ns.to_string());
            info!(%pool, %when, "last reserve injection");
        }
        for execution in replay.open_executions.values() {
            info!(
                execution = %execution.execution_id,
                pair = %execution.pair,
                legs = execution.submitted_legs.len(),
                "open execution pending reconciliation"
            );
        }
        info!(emergency_stopped = replay.emergency_stopped, "replay complete");
        return EXIT_OK;
    }

    // Gateways, one per configured network. The signing key is injected by
    // the deployment; without one the engine observes but cannot trade.
    let key = std::env::var("CQT_SIGNER_KEY").ok();
    if key.is_none() {
        warn!("CQT_SIGNER_KEY not set; running in observation-only mode");
    }

    let mut gateways: HashMap<NetworkId, Arc<dyn ChainGateway>> = HashMap::new();
    for (id, network_config) in &config.networks {
        let network = NetworkId::new(id.clone());
        let signer: Arc<dyn TransactionSigner> = match &key {
            Some(key) => match LocalWalletSigner::new(key, network_config.chain_id) {
                Ok(signer) => Arc::new(signer),
                Err(e) => {
                    error!(error = %e, "invalid signing key");
                    return EXIT_CONFIG;
                }
            },
            None => Arc::new(ObservationOnlySigner),
        };
        let gateway = match RpcGateway::new(
            network.clone(),
            network_config,
            &config.pools,
            signer,
            config.engine.rpc_timeout_secs,
            config.engine.leg_confirmation_timeout_secs,
        ) {
            Ok(gateway) => gateway,
            Err(e) => {
                error!(network = %network, error = %e, "gateway construction failed");
                return EXIT_CONFIG;
            }
        };
        gateways.insert(network, Arc::new(gateway));
    }

    // Startup liveness: if no network answers at all, there is nothing to do.
    let mut any_healthy = false;
    for (network, gateway) in &gateways {
        match gateway.block_number().await {
            Ok(block) => {
                info!(%network, block, "network reachable");
                any_healthy = true;
            }
            Err(e) => warn!(%network, error = %e, "network unreachable at startup"),
        }
    }
    if !any_healthy {
        error!("all networks degraded at startup");
        return EXIT_ALL_DEGRADED;
    }

    // Per-bridge adapters are deployment plugins; none are wired by default.
    let adapters: HashMap<NetworkId, Arc<dyn BridgeAdapter>> = HashMap::new();
    if config.networks.len() > 1 && adapters.is_empty() {
        warn!("no bridge adapters wired; cross-network executions will fail closed");
    }

    let engine = Engine::new(
        config,
        ledger,
        replay,
        gateways,
        adapters,
        Arc::new(ConstantPredictor::default()),
    );
    let handle = match engine.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "engine start failed");
            return EXIT_LEDGER;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
    }
    handle.shutdown().await;
    EXIT_OK
}
