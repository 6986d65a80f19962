//! Orchestrator: one worker group per supported chain
//!
//! Each group owns named [`Ticker`] tasks (inbound scan, inbound trackers,
//! gas price, RPC health, outbound trackers) plus a scheduler task driven by
//! new host-chain blocks. Groups have their own stop channel so a chain can
//! be stopped without touching the others; [`Orchestrator::sync_workers`]
//! starts and stops groups to match the ledger's chain params.
//!
//! Outbound in-flight markers live here, keyed by chain, so a restarted
//! group never re-signs a nonce its predecessor is still watching.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bridge_ledger::ChainParams;
use eyre::{eyre, Result, WrapErr};
use futures::future::join_all;
use multichain_rs::bitcoin::BitcoinAdapter;
use multichain_rs::evm::EvmAdapter;
use multichain_rs::solana::SolanaAdapter;
use multichain_rs::{AdapterRegistry, ChainAdapter, ChainFamily, ChainId, TssSigner};
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainContext, PipelineSettings};
use crate::compliance::Compliance;
use crate::config::{Config, StartCursor};
use crate::in_flight::OutboundMarkers;
use crate::ledger_client::LedgerClient;
use crate::metrics;
use crate::observer::Observer;
use crate::scheduler::Scheduler;
use crate::signer::Signer;
use crate::ticker::Ticker;
use crate::tracker_reporter::TrackerReporter;

const RPC_STATUS_INTERVAL: Duration = Duration::from_secs(60);
const SYNC_INTERVAL: Duration = Duration::from_secs(60);
const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// One adapter per enabled chain, picked by chain family
pub fn build_registry(config: &Config) -> Result<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    for chain in config.enabled_chains() {
        let adapter: Arc<dyn ChainAdapter> = match chain.family {
            ChainFamily::Evm => Arc::new(EvmAdapter::new(&chain.rpc_url, chain.chain_id)?),
            ChainFamily::Bitcoin => Arc::new(
                BitcoinAdapter::new(
                    &chain.rpc_url,
                    config.bitcoin.rpc_user.as_deref().unwrap_or_default(),
                    config.bitcoin.rpc_password.as_deref().unwrap_or_default(),
                    chain.chain_id,
                    &chain.gateway,
                )
                .wrap_err_with(|| format!("Failed to create Bitcoin adapter for chain {}", chain.chain_id))?,
            ),
            ChainFamily::Solana => {
                let fee_payer = config
                    .solana
                    .fee_payer_key
                    .as_deref()
                    .ok_or_else(|| eyre!("SOLANA_FEE_PAYER_KEY is required for chain {}", chain.chain_id))?;
                Arc::new(
                    SolanaAdapter::new(&chain.rpc_url, chain.chain_id, &chain.gateway, fee_payer)
                        .wrap_err_with(|| format!("Failed to create Solana adapter for chain {}", chain.chain_id))?,
                )
            }
        };
        if registry.register(adapter).is_some() {
            return Err(eyre!("Duplicate adapter for chain {}", chain.chain_id));
        }
    }
    Ok(registry)
}

/// Shared dependencies handed to every worker group
pub struct OrchestratorDeps {
    pub ledger: Arc<dyn LedgerClient>,
    pub registry: AdapterRegistry,
    pub tss: Arc<dyn TssSigner>,
    pub compliance: Arc<Compliance>,
    pub db: SqlitePool,
    pub settings: PipelineSettings,
    pub start_cursors: HashMap<ChainId, StartCursor>,
}

struct ChainWorker {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
    blocks: watch::Receiver<u64>,
    workers: HashMap<ChainId, ChainWorker>,
    markers: HashMap<ChainId, OutboundMarkers>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, blocks: watch::Receiver<u64>) -> Self {
        Self {
            deps,
            blocks,
            workers: HashMap::new(),
            markers: HashMap::new(),
        }
    }

    pub fn running_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<_> = self.workers.keys().copied().collect();
        chains.sort();
        chains
    }

    /// Run until `shutdown` flips, re-syncing workers periodically
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(chains = ?self.deps.registry.chain_ids(), "Orchestrator started");
        let mut interval = tokio::time::interval(SYNC_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sync_workers().await {
                        warn!(error = %e, "Worker sync failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Orchestrator stopping workers");
        let chains: Vec<_> = self.workers.keys().copied().collect();
        for chain_id in chains {
            self.stop_worker(chain_id).await;
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Start groups for supported chains with an adapter; stop the rest
    pub async fn sync_workers(&mut self) -> Result<()> {
        let params = self.deps.ledger.list_chain_params().await?;
        let wanted: HashMap<ChainId, ChainParams> = params
            .into_iter()
            .filter(|p| p.is_supported && self.deps.registry.contains(p.chain_id))
            .map(|p| (p.chain_id, p))
            .collect();

        let stale: Vec<ChainId> = self
            .workers
            .keys()
            .filter(|id| !wanted.contains_key(id))
            .copied()
            .collect();
        for chain_id in stale {
            info!(chain_id = %chain_id, "Chain no longer supported, stopping worker");
            self.stop_worker(chain_id).await;
        }

        let running: HashSet<ChainId> = self.workers.keys().copied().collect();
        for (chain_id, params) in wanted {
            if !running.contains(&chain_id) {
                self.start_worker(params);
            }
        }
        Ok(())
    }

    fn start_worker(&mut self, params: ChainParams) {
        let chain_id = params.chain_id;
        let Some(adapter) = self.deps.registry.get(chain_id) else {
            return;
        };
        let settings = PipelineSettings {
            start_cursor: self.deps.start_cursors.get(&chain_id).cloned(),
            ..self.deps.settings.clone()
        };
        let ctx = Arc::new(ChainContext::new(
            adapter,
            Arc::clone(&self.deps.ledger),
            Arc::clone(&self.deps.tss),
            Arc::clone(&self.deps.compliance),
            self.deps.db.clone(),
            settings,
            params,
        ));
        let (stop, stop_rx) = watch::channel(false);
        let markers = self.markers.entry(chain_id).or_default().clone();
        let observer = Arc::new(Observer::new(Arc::clone(&ctx)));
        let reporter = TrackerReporter::new(Arc::clone(&ctx))
            .with_markers(markers.reporting)
            .with_shutdown(stop_rx.clone());
        let signer = Arc::new(
            Signer::new(Arc::clone(&ctx), reporter)
                .with_markers(markers.signing)
                .with_shutdown(stop_rx.clone()),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&ctx),
            Arc::clone(&observer),
            signer,
        ));

        let mut handles = Vec::new();

        let o = Arc::clone(&observer);
        handles.push(tokio::spawn(async move {
            if let Err(e) = o.sync_nonce().await {
                warn!(chain_id = %o.context().chain_id, error = %e, "Initial nonce sync failed");
            }
        }));

        let o = Arc::clone(&observer);
        let ticker = Ticker::new(
            format!("inbound:{}", chain_id),
            ctx.ticker_interval(|p| p.inbound_ticker),
            stop_rx.clone(),
        );
        handles.push(tokio::spawn(ticker.run(move || {
            let o = Arc::clone(&o);
            async move { o.observe_inbound().await.map(|_| ()) }
        })));

        let o = Arc::clone(&observer);
        let ticker = Ticker::new(
            format!("inbound_trackers:{}", chain_id),
            ctx.ticker_interval(|p| p.inbound_ticker),
            stop_rx.clone(),
        );
        handles.push(tokio::spawn(ticker.run(move || {
            let o = Arc::clone(&o);
            async move { o.process_inbound_trackers().await.map(|_| ()) }
        })));

        let o = Arc::clone(&observer);
        let ticker = Ticker::new(
            format!("gas_price:{}", chain_id),
            ctx.ticker_interval(|p| p.gas_price_ticker),
            stop_rx.clone(),
        );
        handles.push(tokio::spawn(ticker.run(move || {
            let o = Arc::clone(&o);
            async move { o.post_gas_price().await.map(|_| ()) }
        })));

        let o = Arc::clone(&observer);
        let ticker = Ticker::every(format!("rpc_status:{}", chain_id), RPC_STATUS_INTERVAL, stop_rx.clone());
        handles.push(tokio::spawn(ticker.run(move || {
            let o = Arc::clone(&o);
            async move { o.check_rpc_status().await.map(|_| ()) }
        })));

        let o = Arc::clone(&observer);
        let ticker = Ticker::new(
            format!("outbound:{}", chain_id),
            ctx.ticker_interval(|p| p.outbound_ticker),
            stop_rx.clone(),
        );
        handles.push(tokio::spawn(ticker.run(move || {
            let o = Arc::clone(&o);
            async move { o.process_outbound_trackers().await.map(|_| ()) }
        })));

        handles.push(tokio::spawn(run_scheduler(
            chain_id,
            scheduler,
            self.blocks.clone(),
            stop_rx,
        )));

        info!(chain_id = %chain_id, tasks = handles.len(), "Chain worker started");
        self.workers.insert(chain_id, ChainWorker { stop, handles });
    }

    async fn stop_worker(&mut self, chain_id: ChainId) {
        let Some(worker) = self.workers.remove(&chain_id) else {
            return;
        };
        let _ = worker.stop.send(true);
        match tokio::time::timeout(WORKER_STOP_TIMEOUT, join_all(worker.handles)).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(|r| r.err()) {
                    error!(chain_id = %chain_id, error = %e, "Worker task ended abnormally");
                }
            }
            Err(_) => warn!(chain_id = %chain_id, "Worker tasks did not stop in time"),
        }
        let signing = self.markers.get(&chain_id).map_or(0, |m| m.signing.len());
        metrics::set_in_flight(chain_id, signing);
        info!(chain_id = %chain_id, signing, "Chain worker stopped");
    }
}

/// Schedule outbounds once per new host block
async fn run_scheduler(
    chain_id: ChainId,
    scheduler: Arc<Scheduler>,
    mut blocks: watch::Receiver<u64>,
    mut stop: watch::Receiver<bool>,
) {
    info!(chain_id = %chain_id, "Scheduler started");
    loop {
        tokio::select! {
            changed = blocks.changed() => {
                if changed.is_err() {
                    break;
                }
                let height = *blocks.borrow_and_update();
                match scheduler.schedule_cctx(height).await {
                    Ok(report) => debug!(chain_id = %chain_id, height, ?report, "Schedule round"),
                    Err(e) => error!(chain_id = %chain_id, height, error = %e, "Schedule round failed"),
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    info!(chain_id = %chain_id, "Scheduler stopped");
}

/// Publish the ledger height on `blocks` whenever it advances
pub async fn run_block_watcher(
    ledger: Arc<dyn LedgerClient>,
    blocks: watch::Sender<u64>,
    shutdown: watch::Receiver<bool>,
) {
    let blocks = Arc::new(blocks);
    let ticker = Ticker::every("block_watcher", BLOCK_POLL_INTERVAL, shutdown);
    ticker
        .run(move || {
            let ledger = Arc::clone(&ledger);
            let blocks = Arc::clone(&blocks);
            async move {
                let height = ledger.get_block_height().await?;
                blocks.send_if_modified(|current| {
                    if height > *current {
                        *current = height;
                        true
                    } else {
                        false
                    }
                });
                Ok(())
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fixtures;
    use crate::ledger_client::LocalLedgerClient;
    use bridge_ledger::ExecuteMsg;
    use multichain_rs::testing::MockChainAdapter;
    use multichain_rs::{ChainFamily, LocalTssSigner};

    async fn orchestrator(ledger: &LocalLedgerClient) -> Orchestrator {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockChainAdapter::new(1, ChainFamily::Evm)));
        registry.register(Arc::new(MockChainAdapter::new(2, ChainFamily::Evm)));
        let db = crate::db::create_pool("sqlite::memory:").await.unwrap();
        crate::db::run_migrations(&db).await.unwrap();
        let (_blocks_tx, blocks_rx) = watch::channel(0);
        Orchestrator::new(
            OrchestratorDeps {
                ledger: Arc::new(ledger.clone()),
                registry,
                tss: Arc::new(LocalTssSigner::from_hex(fixtures::TSS_KEY).unwrap()),
                compliance: Arc::new(Compliance::default()),
                db,
                settings: PipelineSettings::default(),
                start_cursors: HashMap::new(),
            },
            blocks_rx,
        )
    }

    #[tokio::test]
    async fn test_sync_follows_supported_flag() {
        let ledger = fixtures::ledger();
        let mut orch = orchestrator(&ledger).await;

        orch.sync_workers().await.unwrap();
        assert_eq!(orch.running_chains(), vec![ChainId(1), ChainId(2)]);

        let mut params = ledger.get_chain_params(ChainId(2)).await.unwrap().unwrap();
        params.is_supported = false;
        ledger
            .execute(ExecuteMsg::UpdateChainParams {
                admin: "alice".to_string(),
                params,
            })
            .await
            .unwrap();

        orch.sync_workers().await.unwrap();
        assert_eq!(orch.running_chains(), vec![ChainId(1)]);

        orch.stop_worker(ChainId(1)).await;
        assert!(orch.running_chains().is_empty());
    }

    #[tokio::test]
    async fn test_restarted_worker_keeps_outbound_markers() {
        let ledger = fixtures::ledger();
        let mut orch = orchestrator(&ledger).await;
        orch.sync_workers().await.unwrap();

        let _watching = orch.markers[&ChainId(2)].reporting.try_acquire(4).unwrap();
        orch.stop_worker(ChainId(2)).await;
        assert_eq!(orch.running_chains(), vec![ChainId(1)]);

        orch.sync_workers().await.unwrap();
        assert_eq!(orch.running_chains(), vec![ChainId(1), ChainId(2)]);
        assert!(orch.markers[&ChainId(2)].reporting.contains(&4));
        assert!(orch.markers[&ChainId(2)].reporting.try_acquire(4).is_none());
    }

    #[tokio::test]
    async fn test_block_watcher_publishes_height() {
        let ledger = fixtures::ledger();
        let (tx, mut rx) = watch::channel(0u64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_block_watcher(Arc::new(ledger.clone()), tx, stop_rx));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
