use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_ledger::server::{run_block_producer, SharedLedger};
use bridge_ledger::{ChainParams, Ledger, LedgerConfig as KeeperConfig};
use bridge_operator::api::{self, ApiState};
use bridge_operator::compliance::Compliance;
use bridge_operator::config::{Config, LedgerConfig};
use bridge_operator::orchestrator::{build_registry, run_block_watcher};
use bridge_operator::{
    db, HttpLedgerClient, LedgerClient, LocalLedgerClient, Orchestrator, OrchestratorDeps,
    PipelineSettings,
};
use eyre::{eyre, WrapErr};
use multichain_rs::{LocalTssSigner, TssSigner};
use tokio::sync::{watch, RwLock};

/// Block time of the in-process devnet ledger
const LOCAL_BLOCK_TIME: Duration = Duration::from_secs(1);

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    tracing::info!("Starting bridge operator");

    let config = Config::load()?;
    tracing::info!(
        operator = %config.operator.address,
        chains = config.enabled_chains().count(),
        ledger = ?config.ledger,
        "Configuration loaded"
    );

    let db = db::create_pool(&config.database.url).await?;
    db::run_migrations(&db).await?;
    tracing::info!("Database ready");

    let tss: Arc<dyn TssSigner> = Arc::new(
        LocalTssSigner::from_hex(&config.tss.private_key)
            .map_err(|e| eyre!("Invalid TSS key: {}", e))?,
    );
    tracing::info!(tss_address = %tss.address(), "TSS signer loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let ledger: Arc<dyn LedgerClient> = match &config.ledger {
        LedgerConfig::Remote { url, auth_token } => Arc::new(HttpLedgerClient::new(
            url,
            &config.operator.address,
            auth_token.clone(),
        )?),
        LedgerConfig::Local => {
            let shared = local_ledger(&config)?;
            tokio::spawn(run_block_producer(
                shared.clone(),
                LOCAL_BLOCK_TIME,
                shutdown_rx.clone(),
            ));
            tracing::warn!("Running against an in-process single-validator ledger");
            Arc::new(LocalLedgerClient::new(shared, &config.operator.address))
        }
    };

    let registry = build_registry(&config)?;
    let compliance = Arc::new(Compliance::new(&config.operator.restricted_addresses));
    tracing::info!(
        adapters = registry.len(),
        restricted = compliance.len(),
        "Adapters initialized"
    );

    let api_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.operator.api_port));
    let api_state = ApiState {
        operator: config.operator.address.clone(),
        db: db.clone(),
        started: Instant::now(),
    };
    let api_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, api_state, api_shutdown).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    let (blocks_tx, blocks_rx) = watch::channel(0u64);
    tokio::spawn(run_block_watcher(
        Arc::clone(&ledger),
        blocks_tx,
        shutdown_rx.clone(),
    ));

    let orchestrator = Orchestrator::new(
        OrchestratorDeps {
            ledger,
            registry,
            tss,
            compliance,
            db,
            settings: PipelineSettings {
                max_items_per_scan: config.operator.max_items_per_scan,
                outbound_tx_timeout: config.operator.outbound_tx_timeout(),
                ..PipelineSettings::default()
            },
            start_cursors: config.operator.start_cursors.clone(),
        },
        blocks_rx,
    );

    if let Err(e) = orchestrator.run(shutdown_rx).await {
        tracing::error!(error = %e, "Orchestrator error");
    }

    tracing::info!("Bridge operator stopped");
    Ok(())
}

/// Single-validator ledger seeded with default params for every enabled chain
fn local_ledger(config: &Config) -> eyre::Result<SharedLedger> {
    let operator = config.operator.address.as_str();
    let keeper_config =
        KeeperConfig::new(1, &[operator], &[operator]).map_err(|e| eyre!(e))?;
    let params = config
        .enabled_chains()
        .map(|c| ChainParams::default_for(c.chain_id, c.family, &c.gateway))
        .collect();
    let ledger = Ledger::new(keeper_config)
        .with_chain_params(params)
        .wrap_err("Invalid default chain params")?;
    Ok(Arc::new(RwLock::new(ledger)))
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_operator=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

/// Wait for SIGINT/SIGTERM
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
