//! Per-block outbound scheduling
//!
//! On every new host-chain block the scheduler walks the chain's pending
//! CCTXs in nonce order and decides which ones get a signing attempt this
//! round. Work is paced round-robin by `nonce % interval == height % interval`,
//! except that the oldest pending CCTX is signed immediately when it was
//! created in the block just processed.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::{eyre, Result};
use tracing::{debug, error, warn};

use crate::chain::ChainContext;
use crate::ledger_client::LedgerClient;
use crate::metrics;
use crate::observer::Observer;
use crate::signer::Signer;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub considered: usize,
    pub signed: usize,
    pub confirmed: usize,
    pub skipped: usize,
}

/// Whether `height` is this nonce's turn
pub fn is_scheduled(
    position: usize,
    nonce: u64,
    created_height: u64,
    height: u64,
    interval: u64,
) -> bool {
    let fresh = position == 0 && created_height + 1 >= height;
    let interval = interval.max(1);
    fresh || nonce % interval == height % interval
}

pub struct Scheduler {
    ctx: Arc<ChainContext>,
    observer: Arc<Observer>,
    signer: Arc<Signer>,
}

impl Scheduler {
    pub fn new(ctx: Arc<ChainContext>, observer: Arc<Observer>, signer: Arc<Signer>) -> Self {
        Self {
            ctx,
            observer,
            signer,
        }
    }

    /// One scheduling round at host height `height`
    pub async fn schedule_cctx(&self, height: u64) -> Result<ScheduleReport> {
        let chain_id = self.ctx.chain_id;
        let result = self.schedule(height).await;
        let label = match &result {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        metrics::record_scheduler_iteration(chain_id, label);
        metrics::set_in_flight(chain_id, self.signer.in_flight_count());
        result
    }

    async fn schedule(&self, height: u64) -> Result<ScheduleReport> {
        let chain_id = self.ctx.chain_id;
        let mut report = ScheduleReport::default();

        let Some(params) = self.ctx.refresh_params().await? else {
            debug!(chain_id = %chain_id, "No chain params, skipping schedule");
            return Ok(report);
        };
        if !params.is_supported {
            return Ok(report);
        }

        let lookahead = params.outbound_schedule_lookahead as usize;
        let (cctxs, total_pending) = self.ctx.ledger.get_pending_cctxs(chain_id, lookahead).await?;
        if cctxs.is_empty() {
            return Ok(report);
        }
        let trackers: HashMap<u64, _> = self
            .ctx
            .ledger
            .get_outbound_trackers(chain_id)
            .await?
            .into_iter()
            .map(|t| (t.nonce, t))
            .collect();

        let first_nonce = cctxs
            .first()
            .and_then(|c| c.current_outbound())
            .map(|o| o.nonce)
            .unwrap_or_default();
        let lookback = params.outbound_schedule_lookback();
        let interval = params.outbound_schedule_interval;

        for (position, cctx) in cctxs.iter().enumerate() {
            let Some(outbound) = cctx.current_outbound() else {
                continue;
            };
            let nonce = outbound.nonce;
            report.considered += 1;

            if outbound.receiver_chain_id != chain_id {
                warn!(
                    chain_id = %chain_id,
                    nonce,
                    receiver_chain = %outbound.receiver_chain_id,
                    cctx_index = %cctx.index,
                    "Pending CCTX targets another chain"
                );
                report.skipped += 1;
                continue;
            }

            if nonce > first_nonce + lookback {
                metrics::record_scheduler_iteration(chain_id, "fatal");
                error!(
                    chain_id = %chain_id,
                    nonce,
                    first_nonce,
                    lookback,
                    total_pending,
                    "Nonce gap exceeds lookback"
                );
                return Err(eyre!(
                    "chain {}: nonce {} is more than {} past earliest pending nonce {}",
                    chain_id,
                    nonce,
                    lookback,
                    first_nonce
                ));
            }

            if self.signer.is_in_flight(nonce) || self.signer.reporter().is_reporting(nonce) {
                report.skipped += 1;
                continue;
            }

            if let Some(tracker) = trackers.get(&nonce) {
                match self.observer.vote_outbound_if_confirmed(cctx, Some(tracker)).await {
                    Ok(true) => {
                        report.confirmed += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(chain_id = %chain_id, nonce, error = %e, "Confirmation check failed");
                        report.skipped += 1;
                        continue;
                    }
                }
            }

            if !is_scheduled(position, nonce, cctx.created_height, height, interval) {
                continue;
            }
            if self.signer.spawn(cctx.clone(), height) {
                debug!(chain_id = %chain_id, nonce, height, "Signing outbound");
                report.signed += 1;
            }
        }

        Ok(report)
    }
}
