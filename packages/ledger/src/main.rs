//! Devnet ledger daemon
//!
//! Hosts a single [`Ledger`] behind the HTTP façade and advances its height
//! on a fixed block time.

use std::sync::Arc;
use std::time::Duration;

use bridge_ledger::config::DaemonConfig;
use bridge_ledger::server::{self, AppState, Metrics};
use bridge_ledger::Ledger;
use eyre::{eyre, WrapErr};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting bridge ledger");

    let config = DaemonConfig::load()?;
    info!(
        bind = %config.bind,
        threshold = config.threshold,
        observers = config.observers.len(),
        chains = config.chain_params.len(),
        "Configuration loaded"
    );

    let ledger = Ledger::new(config.ledger_config()?)
        .with_chain_params(config.chain_params.clone())
        .map_err(|e| eyre!(e))
        .wrap_err("Invalid genesis chain params")?;
    let ledger = Arc::new(RwLock::new(ledger));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let producer = tokio::spawn(server::run_block_producer(
        ledger.clone(),
        Duration::from_millis(config.block_time_ms),
        shutdown_rx.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.bind))?;
    if config.api_tokens.is_empty() {
        warn!("LEDGER_API_TOKENS is empty, /execute accepts any sender");
    }
    let state = AppState {
        ledger,
        metrics: Arc::new(Metrics::new()),
        api_tokens: Arc::new(config.api_tokens.clone()),
    };
    if let Err(e) = server::serve(listener, state, shutdown_rx).await {
        error!(error = %e, "Ledger server error");
    }

    let _ = producer.await;
    info!("Bridge ledger stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_ledger=debug"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
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
            Ok(mut sig) => {
                sig.recv().await;
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
