//! xCall Tracker - cross-chain transfer submission and tracking
//!
//! Scans the configured chains for xCall events, correlates them with
//! submitted transfers and follows every transfer to its final outcome.

use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use xcall_tracker::api::{self, AppState};
use xcall_tracker::chain::evm::LocalEvmWallet;
use xcall_tracker::chain::{ChainId, ChainKind, ChainManager, ChainRegistry, RetryPolicy, Signer};
use xcall_tracker::config::Settings;
use xcall_tracker::fee::FeeQuoter;
use xcall_tracker::metrics::{self, MetricsServer};
use xcall_tracker::orchestrator::TransferOrchestrator;
use xcall_tracker::scanner::EventScanner;
use xcall_tracker::state::StateManager;
use xcall_tracker::transfer::TransferRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting xCall Tracker v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let cancel = CancellationToken::new();

    // Transfer store
    let state_manager = Arc::new(StateManager::new(&settings.database).await?);
    state_manager.run_migrations().await?;
    info!("Database ready");

    let registry = Arc::new(TransferRegistry::with_store(state_manager.clone()));
    let loaded = registry.load().await?;
    info!("Loaded {} stored transfers", loaded);

    // Chain adapters
    let chain_registry = Arc::new(ChainRegistry::from_settings(&settings));
    let signers = load_signers(&settings)?;
    let chain_manager = Arc::new(ChainManager::new(
        chain_registry,
        signers,
        RetryPolicy::from(&settings.tracker),
        cancel.clone(),
    )?);
    info!("Chain connections initialized");

    let fees = Arc::new(FeeQuoter::new(
        chain_manager.clone(),
        Duration::from_secs(settings.fees.cache_ttl_secs),
    ));
    let scanner = Arc::new(EventScanner::new(chain_manager.clone(), settings.scanner.clone()));

    let orchestrator = Arc::new(TransferOrchestrator::new(
        chain_manager.clone(),
        fees,
        scanner.clone(),
        registry,
        settings.tracker.clone(),
        cancel.clone(),
    ));
    orchestrator.resume().await?;

    let scanner_handle = tokio::spawn(scanner.clone().run(cancel.clone()));

    let orchestrator_handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        async move {
            if let Err(e) = orchestrator.run(cancel).await {
                error!("Orchestrator error: {}", e);
            }
        }
    });

    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState::new(orchestrator.clone(), Some(state_manager.clone()));
        let cancel = cancel.clone();
        async move {
            if let Err(e) = api::run_server(config, state, cancel).await {
                error!("API server error: {}", e);
            }
        }
    });

    let metrics_handle = settings.metrics.enabled.then(|| {
        let server = MetricsServer::new(settings.metrics.port);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(cancel).await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Store health; chain health is checked by the orchestrator loop
    let health_handle = tokio::spawn({
        let state_manager = state_manager.clone();
        let interval = settings.tracker.health_check_interval_secs.max(1);
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                }
                if let Err(e) = state_manager.health_check().await {
                    warn!("Database health check failed: {}", e);
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("xCall Tracker is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    cancel.cancel();

    let _ = tokio::join!(scanner_handle, orchestrator_handle, api_handle, health_handle);
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    info!("xCall Tracker stopped");
    Ok(())
}

/// Signing clients for chains the tracker submits on. Only EVM keys are
/// loaded from the environment; other chains are tracking only.
fn load_signers(settings: &Settings) -> Result<HashMap<ChainId, Signer>> {
    let mut signers = HashMap::new();
    let Some(var) = &settings.wallet.evm_private_key_env else {
        return Ok(signers);
    };
    let key = match std::env::var(var) {
        Ok(key) => key,
        Err(_) => {
            warn!("{} is not set - EVM chains are tracking only", var);
            return Ok(signers);
        }
    };

    let wallet: LocalWallet = key
        .trim_start_matches("0x")
        .parse()
        .with_context(|| format!("Invalid EVM private key in {}", var))?;

    for (_, chain) in settings.enabled_chains() {
        if chain.kind != ChainKind::Evm {
            continue;
        }
        let network_id: u64 = chain
            .network_id
            .parse()
            .with_context(|| format!("Chain {} has a non-numeric network id", chain.id))?;
        let rpc_url = chain
            .rpc_urls
            .first()
            .with_context(|| format!("Chain {} has no RPC URL", chain.id))?;

        let signer = LocalEvmWallet::new(chain.id.clone(), rpc_url, wallet.clone(), network_id)?;
        info!("EVM signer {:?} loaded for {}", signer.address(), chain.id);
        signers.insert(chain.id.clone(), Signer::Evm(Arc::new(signer)));
    }

    Ok(signers)
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,xcall_tracker=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
