//! Outbound tracker reporter
//!
//! After a broadcast, polls the destination chain until the transaction is
//! included and then records its hash on the ledger with
//! `VoteOutboundTracker`, whatever the receipt status: a reverted transaction
//! still consumed its nonce, and the observer votes the failure. One report
//! per nonce runs at a time; a transaction that is still not included when
//! the timeout elapses is abandoned.
//!
//! When the worker group stops, a running report hands its hash to the
//! ledger if the chain already knows the transaction, so the next group
//! finds it instead of signing the nonce again.

use std::sync::Arc;

use eyre::eyre;
use multichain_rs::{OutboundKind, TxStatus};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::chain::ChainContext;
use crate::in_flight::InFlight;
use crate::ledger_client::LedgerClient;
use crate::metrics;
use crate::retry::{with_retry, RetryConfig};
use crate::ticker::stop_signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Hash recorded, or the ledger already holds it
    Reported,
    /// Not included before the timeout
    TimedOut,
    /// Worker stopped before the chain knew the transaction
    Cancelled,
    /// Ledger kept rejecting the report
    Rejected,
}

#[derive(Clone)]
pub struct TrackerReporter {
    ctx: Arc<ChainContext>,
    reporting: InFlight<u64>,
    retry: RetryConfig,
    stop: Option<watch::Receiver<bool>>,
}

impl TrackerReporter {
    pub fn new(ctx: Arc<ChainContext>) -> Self {
        Self {
            ctx,
            reporting: InFlight::new(),
            retry: RetryConfig::default(),
            stop: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Share "being reported" markers with other reporters of this chain
    pub fn with_markers(mut self, reporting: InFlight<u64>) -> Self {
        self.reporting = reporting;
        self
    }

    /// Stop running reports when `stop` flips to true
    pub fn with_shutdown(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn is_reporting(&self, nonce: u64) -> bool {
        self.reporting.contains(&nonce)
    }

    /// Start watching `hash` in the background; false if `nonce` is
    /// already being reported
    pub fn spawn_report(
        &self,
        cctx_index: String,
        nonce: u64,
        hash: String,
        kind: OutboundKind,
    ) -> bool {
        let Some(guard) = self.reporting.try_acquire(nonce) else {
            debug!(chain_id = %self.ctx.chain_id, nonce, "Already reporting this nonce");
            return false;
        };
        let reporter = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = tokio::select! {
                outcome = reporter.report(&cctx_index, nonce, &hash, kind) => outcome,
                _ = stop_signal(reporter.stop.clone()) => reporter.hand_off(&cctx_index, nonce, &hash).await,
            };
            debug!(chain_id = %reporter.ctx.chain_id, nonce, tx_hash = %hash, ?outcome, "Report finished");
        });
        true
    }

    /// Poll until included or timed out, then report
    pub async fn report(
        &self,
        cctx_index: &str,
        nonce: u64,
        hash: &str,
        kind: OutboundKind,
    ) -> ReportOutcome {
        let chain_id = self.ctx.chain_id;
        let deadline = Instant::now() + self.ctx.settings.outbound_tx_timeout;

        loop {
            match self.ctx.adapter.get_tx_status(hash).await {
                Ok(TxStatus::Included {
                    block_number,
                    success,
                    ..
                }) => {
                    if !success && kind == OutboundKind::Withdraw {
                        warn!(
                            chain_id = %chain_id,
                            nonce,
                            tx_hash = %hash,
                            block = block_number,
                            cctx_index = %cctx_index,
                            "Outbound included but failed, reporting for the failure vote"
                        );
                    }
                    return self.submit(cctx_index, nonce, hash).await;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(chain_id = %chain_id, nonce, tx_hash = %hash, error = %e, "Status poll failed");
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    chain_id = %chain_id,
                    nonce,
                    tx_hash = %hash,
                    "Outbound not included before timeout, abandoning"
                );
                metrics::record_outbound(chain_id, "timed_out");
                return ReportOutcome::TimedOut;
            }
            tokio::time::sleep_until(
                (Instant::now() + self.ctx.settings.tracker_poll_interval).min(deadline),
            )
            .await;
        }
    }

    /// Last check on worker stop: record the hash if the chain knows it
    async fn hand_off(&self, cctx_index: &str, nonce: u64, hash: &str) -> ReportOutcome {
        let chain_id = self.ctx.chain_id;
        match self.ctx.adapter.get_tx_status(hash).await {
            Ok(TxStatus::Pending) | Ok(TxStatus::Included { .. }) => {
                info!(chain_id = %chain_id, nonce, tx_hash = %hash, "Worker stopping, handing outbound to the ledger");
                self.submit(cctx_index, nonce, hash).await
            }
            status => {
                info!(chain_id = %chain_id, nonce, tx_hash = %hash, ?status, "Worker stopping, outbound report cancelled");
                metrics::record_outbound(chain_id, "cancelled");
                ReportOutcome::Cancelled
            }
        }
    }

    async fn submit(&self, cctx_index: &str, nonce: u64, hash: &str) -> ReportOutcome {
        let chain_id = self.ctx.chain_id;
        let ledger = Arc::clone(&self.ctx.ledger);
        let result = with_retry(&self.retry, |_| {
            let ledger = Arc::clone(&ledger);
            async move {
                ledger
                    .vote_outbound_tracker(chain_id, nonce, hash)
                    .await
                    .map_err(|e| eyre!(e))
            }
        })
        .await;

        match result {
            Ok(resp) => {
                info!(
                    chain_id = %chain_id,
                    nonce,
                    tx_hash = %hash,
                    cctx_index = %cctx_index,
                    duplicate = resp.duplicate,
                    "Outbound tracker reported"
                );
                metrics::record_vote(chain_id, "vote_outbound_tracker", true);
                metrics::record_tracker_report(chain_id, true);
                ReportOutcome::Reported
            }
            Err(e) => {
                warn!(chain_id = %chain_id, nonce, tx_hash = %hash, error = %e, "Outbound tracker report failed");
                metrics::record_vote(chain_id, "vote_outbound_tracker", false);
                metrics::record_tracker_report(chain_id, false);
                ReportOutcome::Rejected
            }
        }
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
    use std::time::Duration;

    use crate::observer::Observer;

    async fn wait_until(done: impl Fn() -> bool) {
        for _ in 0..100 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_included_outbound_is_reported() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter.clone(), Compliance::default()).await;
        let cctx = fixtures::pending_cctx(&ledger, MockDepositBuilder::new()).await;
        adapter.set_status(
            "0xbeef",
            TxStatus::Included {
                block_number: 7,
                confirmations: 1,
                success: true,
            },
        );

        let reporter = TrackerReporter::new(ctx);
        let outcome = reporter
            .report(&cctx.index, 0, "0xbeef", OutboundKind::Withdraw)
            .await;
        assert_eq!(outcome, ReportOutcome::Reported);

        let trackers = ledger.get_outbound_trackers(ChainId(2)).await.unwrap();
        assert!(trackers[0].contains("0xbeef"));
        let cctx = ledger.get_cctx(&cctx.index).await.unwrap().unwrap();
        assert_eq!(cctx.status, CctxStatus::OutboundMined);

        // reporting the same hash again is settled, not an error
        let again = reporter
            .report(&cctx.index, 0, "0xbeef", OutboundKind::Withdraw)
            .await;
        assert_eq!(again, ReportOutcome::Reported);
    }

    #[tokio::test]
    async fn test_reverted_withdraw_is_reported_and_reverts() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter.clone(), Compliance::default()).await;
        let cctx = fixtures::pending_cctx(&ledger, MockDepositBuilder::new()).await;
        let included_failed = TxStatus::Included {
            block_number: 7,
            confirmations: 1,
            success: false,
        };
        adapter.set_status("0xdead", included_failed);

        let reporter = TrackerReporter::new(ctx.clone());
        let outcome = reporter
            .report(&cctx.index, 0, "0xdead", OutboundKind::Withdraw)
            .await;
        assert_eq!(outcome, ReportOutcome::Reported);
        let trackers = ledger.get_outbound_trackers(ChainId(2)).await.unwrap();
        assert!(trackers[0].contains("0xdead"));

        // the observer votes the failure instead of leaving the cctx stuck
        let observer = Observer::new(ctx);
        assert_eq!(observer.process_outbound_trackers().await.unwrap(), 1);
        let cctx = ledger.get_cctx(&cctx.index).await.unwrap().unwrap();
        assert_eq!(cctx.status, CctxStatus::PendingRevert);
    }

    #[tokio::test]
    async fn test_stop_hands_known_hash_to_ledger() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter.clone(), Compliance::default()).await;
        let cctx = fixtures::pending_cctx(&ledger, MockDepositBuilder::new()).await;
        adapter.set_status("0xslow", TxStatus::Pending);

        let (stop, stop_rx) = watch::channel(false);
        let reporting = InFlight::new();
        let reporter = TrackerReporter::new(ctx)
            .with_markers(reporting.clone())
            .with_shutdown(stop_rx);
        assert!(reporter.spawn_report(cctx.index.clone(), 0, "0xslow".to_string(), OutboundKind::Withdraw));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reporting.contains(&0));
        assert!(ledger.get_outbound_trackers(ChainId(2)).await.unwrap().is_empty());

        stop.send(true).unwrap();
        wait_until(|| !reporting.contains(&0)).await;
        let trackers = ledger.get_outbound_trackers(ChainId(2)).await.unwrap();
        assert!(trackers[0].contains("0xslow"));
    }

    #[tokio::test]
    async fn test_stop_cancels_unknown_hash() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter, Compliance::default()).await;

        let (stop, stop_rx) = watch::channel(false);
        let reporter = TrackerReporter::new(ctx).with_shutdown(stop_rx);
        assert!(reporter.spawn_report("idx".to_string(), 5, "0xlost".to_string(), OutboundKind::Withdraw));
        drop(stop);

        wait_until(|| !reporter.is_reporting(5)).await;
        assert!(ledger.get_outbound_trackers(ChainId(2)).await.unwrap().is_empty());
        assert_eq!(
            reporter.hand_off("idx", 5, "0xlost").await,
            ReportOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn test_unincluded_outbound_times_out() {
        let ledger = fixtures::ledger();
        let adapter = Arc::new(MockChainAdapter::new(2, ChainFamily::Evm));
        let ctx = fixtures::context(&ledger, adapter, Compliance::default()).await;
        let reporter = TrackerReporter::new(ctx);

        assert!(reporter.spawn_report("idx".to_string(), 3, "0xnone".to_string(), OutboundKind::Withdraw));
        assert!(reporter.is_reporting(3));
        assert!(!reporter.spawn_report("idx".to_string(), 3, "0xnone".to_string(), OutboundKind::Withdraw));

        let outcome = reporter
            .report("idx", 4, "0xnone", OutboundKind::Withdraw)
            .await;
        assert_eq!(outcome, ReportOutcome::TimedOut);
    }
}
