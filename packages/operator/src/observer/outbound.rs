use bridge_ledger::{CrossChainTx, OutboundTracker};
use eyre::{Result, WrapErr};
use multichain_rs::TxStatus;
use tracing::{debug, info, warn};

use super::Observer;
use crate::ledger_client::LedgerClient;
use crate::metrics;

impl Observer {
    /// Vote the outcome of the current outbound of `cctx` if one of its
    /// tracked hashes is included with enough confirmations. Returns whether
    /// a confirmed transaction was found.
    pub async fn vote_outbound_if_confirmed(
        &self,
        cctx: &CrossChainTx,
        tracker: Option<&OutboundTracker>,
    ) -> Result<bool> {
        let chain_id = self.ctx.chain_id;
        let Some(outbound) = cctx.current_outbound() else {
            return Ok(false);
        };
        let Some(tracker) = tracker.filter(|t| t.nonce == outbound.nonce) else {
            debug!(chain_id = %chain_id, nonce = outbound.nonce, "No tracked hash to confirm");
            return Ok(false);
        };
        let confirmations_needed = self.ctx.params().confirmation_count;

        for tracked in &tracker.hashes {
            let status = self.ctx.adapter.get_tx_status(&tracked.hash).await?;
            let TxStatus::Included {
                block_number,
                confirmations,
                success,
            } = status
            else {
                continue;
            };
            if confirmations < confirmations_needed {
                debug!(
                    chain_id = %chain_id,
                    nonce = outbound.nonce,
                    hash = %tracked.hash,
                    confirmations,
                    needed = confirmations_needed,
                    "Outbound not yet confirmed"
                );
                return Ok(false);
            }

            let result = self
                .ctx
                .ledger
                .vote_outbound(
                    &cctx.index,
                    chain_id,
                    outbound.nonce,
                    &tracked.hash,
                    block_number,
                    success,
                )
                .await;
            metrics::record_vote(chain_id, "vote_outbound", result.is_ok());
            let resp = result.wrap_err("Failed to vote outbound")?;
            info!(
                chain_id = %chain_id,
                nonce = outbound.nonce,
                hash = %tracked.hash,
                success,
                finalized = resp.finalized,
                "Outbound voted"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Walk the ledger's outbound trackers for this chain and vote every
    /// confirmed one
    pub async fn process_outbound_trackers(&self) -> Result<usize> {
        let chain_id = self.ctx.chain_id;
        let trackers = self.ctx.ledger.get_outbound_trackers(chain_id).await?;

        let mut voted = 0;
        for tracker in trackers {
            let Some(cctx) = self
                .ctx
                .ledger
                .get_cctx_by_nonce(chain_id, tracker.nonce)
                .await?
            else {
                continue;
            };
            match self.vote_outbound_if_confirmed(&cctx, Some(&tracker)).await {
                Ok(true) => voted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(chain_id = %chain_id, nonce = tracker.nonce, error = %e, "Outbound confirmation check failed")
                }
            }
        }
        Ok(voted)
    }

    /// Vote the chain's on-chain outbound nonce, if the chain tracks one
    pub async fn sync_nonce(&self) -> Result<Option<u64>> {
        let chain_id = self.ctx.chain_id;
        let address = self.ctx.tss.address();
        let Some(nonce) = self.ctx.adapter.get_outbound_nonce(&address).await? else {
            return Ok(None);
        };

        let result = self.ctx.ledger.vote_nonce(chain_id, nonce).await;
        metrics::record_vote(chain_id, "vote_nonce", result.is_ok());
        result.wrap_err("Failed to vote nonce")?;
        info!(chain_id = %chain_id, nonce, "On-chain nonce voted");
        Ok(Some(nonce))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::fixtures;
    use crate::compliance::Compliance;
    use bridge_ledger::CctxStatus;
    use multichain_rs::testing::{MockChainAdapter, MockDepositBuilder};
    use multichain_rs::{ChainFamily, ChainId};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_vote_waits_for_confirmations_then_confirms() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter.clone(), Compliance::default()).await;
        let mut params = ctx.params();
        params.confirmation_count = 3;
        ctx.set_params(params);
        let observer = Observer::new(ctx);

        let cctx = fixtures::pending_cctx(&ledger, MockDepositBuilder::new()).await;
        ledger.vote_outbound_tracker(ChainId(2), 0, "0xout").await.unwrap();
        let tracker = ledger.get_outbound_trackers(ChainId(2)).await.unwrap().remove(0);

        // no tracker, nothing to check
        assert!(!observer.vote_outbound_if_confirmed(&cctx, None).await.unwrap());

        adapter.set_status(
            "0xout",
            TxStatus::Included {
                block_number: 90,
                confirmations: 2,
                success: true,
            },
        );
        assert!(!observer
            .vote_outbound_if_confirmed(&cctx, Some(&tracker))
            .await
            .unwrap());

        adapter.set_status(
            "0xout",
            TxStatus::Included {
                block_number: 90,
                confirmations: 3,
                success: true,
            },
        );
        assert_eq!(observer.process_outbound_trackers().await.unwrap(), 1);

        let cctx = ledger.get_cctx(&cctx.index).await.unwrap().unwrap();
        assert_eq!(cctx.status, CctxStatus::Confirmed);
        let outbound = cctx.current_outbound().unwrap();
        assert_eq!(outbound.hash, "0xout");
        assert_eq!(outbound.observed_height, 90);
        // tracker removed once the outbound finalizes
        assert!(ledger.get_outbound_trackers(ChainId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_outbound_starts_revert() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter.clone(), Compliance::default()).await;
        let observer = Observer::new(ctx);

        let cctx = fixtures::pending_cctx(&ledger, MockDepositBuilder::new()).await;
        ledger.vote_outbound_tracker(ChainId(2), 0, "0xrev").await.unwrap();
        adapter.set_status(
            "0xrev",
            TxStatus::Included {
                block_number: 12,
                confirmations: 5,
                success: false,
            },
        );
        assert_eq!(observer.process_outbound_trackers().await.unwrap(), 1);

        let cctx = ledger.get_cctx(&cctx.index).await.unwrap().unwrap();
        assert_eq!(cctx.status, CctxStatus::PendingRevert);
        assert_eq!(cctx.current_outbound().unwrap().receiver_chain_id, ChainId(1));
    }

    #[tokio::test]
    async fn test_sync_nonce() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter.clone(), Compliance::default()).await;
        let observer = Observer::new(ctx);

        assert_eq!(observer.sync_nonce().await.unwrap(), None);

        adapter.set_outbound_nonce(Some(7));
        assert_eq!(observer.sync_nonce().await.unwrap(), Some(7));
        let resp = ledger
            .query(bridge_ledger::QueryMsg::GetChainNonce { chain_id: ChainId(2) })
            .await
            .unwrap();
        assert!(matches!(
            resp,
            bridge_ledger::QueryResponse::ChainNonce(Some(ref n)) if n.next_nonce == 7
        ));
    }
}
