//! Per-chain handles shared by the observer, signer and scheduler

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bridge_ledger::ChainParams;
use multichain_rs::{ChainAdapter, ChainId, TssSigner};
use sqlx::SqlitePool;
use tracing::info;

use crate::compliance::Compliance;
use crate::config::StartCursor;
use crate::ledger_client::{LedgerClient, LedgerClientResult};

/// Knobs that come from operator config rather than ledger chain params
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_items_per_scan: usize,
    /// A broadcast tx is abandoned once this elapses without inclusion
    pub outbound_tx_timeout: Duration,
    pub tracker_poll_interval: Duration,
    pub start_cursor: Option<StartCursor>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_items_per_scan: 100,
            outbound_tx_timeout: Duration::from_secs(120),
            tracker_poll_interval: Duration::from_secs(10),
            start_cursor: None,
        }
    }
}

pub struct ChainContext {
    pub chain_id: ChainId,
    pub adapter: Arc<dyn ChainAdapter>,
    pub ledger: Arc<dyn LedgerClient>,
    pub tss: Arc<dyn TssSigner>,
    pub compliance: Arc<Compliance>,
    pub db: SqlitePool,
    pub settings: PipelineSettings,
    params: RwLock<ChainParams>,
}

impl ChainContext {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        ledger: Arc<dyn LedgerClient>,
        tss: Arc<dyn TssSigner>,
        compliance: Arc<Compliance>,
        db: SqlitePool,
        settings: PipelineSettings,
        params: ChainParams,
    ) -> Self {
        Self {
            chain_id: adapter.chain_id(),
            adapter,
            ledger,
            tss,
            compliance,
            db,
            settings,
            params: RwLock::new(params),
        }
    }

    /// Snapshot of the last known chain params
    pub fn params(&self) -> ChainParams {
        self.params
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_params(&self, params: ChainParams) {
        let mut current = self.params.write().unwrap_or_else(|e| e.into_inner());
        if *current != params {
            info!(chain_id = %self.chain_id, "Chain params updated");
            *current = params;
        }
    }

    /// Re-read chain params from the ledger; `None` if the chain is gone
    pub async fn refresh_params(&self) -> LedgerClientResult<Option<ChainParams>> {
        let params = self.ledger.get_chain_params(self.chain_id).await?;
        if let Some(p) = &params {
            self.set_params(p.clone());
        }
        Ok(params)
    }

    /// Interval closure over a ticker field of the live params, in seconds
    pub fn ticker_interval(
        self: &Arc<Self>,
        pick: fn(&ChainParams) -> u64,
    ) -> impl Fn() -> Duration + Send + Sync + 'static {
        let ctx = Arc::clone(self);
        move || Duration::from_secs(pick(&ctx.params()).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_client::LocalLedgerClient;
    use bridge_ledger::{Ledger, LedgerConfig};
    use multichain_rs::testing::MockChainAdapter;
    use multichain_rs::{ChainFamily, LocalTssSigner};

    #[tokio::test]
    async fn test_ticker_interval_follows_params() {
        let params = ChainParams::default_for(ChainId(1), ChainFamily::Evm, "0xgw");
        let ledger = Ledger::new(LedgerConfig::new(1, &["alice"], &["alice"]).unwrap())
            .with_chain_params(vec![params.clone()])
            .unwrap();
        let pool = crate::db::create_pool("sqlite::memory:").await.unwrap();
        let ctx = Arc::new(ChainContext::new(
            Arc::new(MockChainAdapter::new(1, ChainFamily::Evm)),
            Arc::new(LocalLedgerClient::from_ledger(ledger, "alice")),
            Arc::new(
                LocalTssSigner::from_hex(
                    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
                )
                .unwrap(),
            ),
            Arc::new(Compliance::default()),
            pool,
            PipelineSettings::default(),
            params.clone(),
        ));

        let inbound = ctx.ticker_interval(|p| p.inbound_ticker);
        assert_eq!(inbound(), Duration::from_secs(6));

        let mut updated = params;
        updated.inbound_ticker = 12;
        ctx.set_params(updated);
        assert_eq!(inbound(), Duration::from_secs(12));

        // ledger still holds the old value
        let refreshed = ctx.refresh_params().await.unwrap().unwrap();
        assert_eq!(refreshed.inbound_ticker, 6);
        assert_eq!(inbound(), Duration::from_secs(6));
    }
}
