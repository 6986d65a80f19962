//! Signer: builds, TSS-signs and broadcasts the outbound transaction for a
//! pending CCTX, then hands the hash to the tracker reporter
//!
//! At most one attempt per `(chain, nonce)` runs at a time. A rejected
//! broadcast is classified by [`fallback::classify_failure`]; fallback-worthy
//! rejections are replaced by an increment-nonce transaction for the same
//! nonce so a misbehaving receiver cannot wedge the chain's nonce sequence.
//!
//! Attempts are dropped when the worker group stops. The in-flight markers
//! can be shared with a later signer for the same chain, which then skips
//! nonces whose broadcast is still being watched.

pub mod fallback;

use std::sync::Arc;

use bridge_ledger::CrossChainTx;
use eyre::{eyre, Result, WrapErr};
use multichain_rs::{AdapterError, ChainId, OutboundKind, OutboundRequest, SignedTx, TxStatus};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::chain::ChainContext;
use crate::in_flight::InFlight;
use crate::ledger_client::LedgerClient;
use crate::metrics;
use crate::ticker::stop_signal;
use crate::tracker_reporter::TrackerReporter;
use fallback::{classify_failure, FailureAction};

/// Result of one signing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Broadcast {
        hash: String,
        kind: OutboundKind,
        fallback: bool,
    },
    /// Already broadcast or being watched; nothing sent
    Skipped(&'static str),
    /// Rejected in a way the next round should retry unchanged
    Deferred,
}

pub struct Signer {
    ctx: Arc<ChainContext>,
    in_flight: InFlight<(ChainId, u64)>,
    reporter: TrackerReporter,
    stop: Option<watch::Receiver<bool>>,
}

impl Signer {
    pub fn new(ctx: Arc<ChainContext>, reporter: TrackerReporter) -> Self {
        Self {
            ctx,
            in_flight: InFlight::new(),
            reporter,
            stop: None,
        }
    }

    /// Share signing markers with other signers of this chain
    pub fn with_markers(mut self, signing: InFlight<(ChainId, u64)>) -> Self {
        self.in_flight = signing;
        self
    }

    /// Drop running attempts when `stop` flips to true
    pub fn with_shutdown(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn is_in_flight(&self, nonce: u64) -> bool {
        self.in_flight.contains(&(self.ctx.chain_id, nonce))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn reporter(&self) -> &TrackerReporter {
        &self.reporter
    }

    /// Launch a signing attempt in the background. Returns false if this
    /// nonce already has an attempt running.
    pub fn spawn(self: &Arc<Self>, cctx: CrossChainTx, height: u64) -> bool {
        let chain_id = self.ctx.chain_id;
        let Some(nonce) = cctx.current_outbound().map(|o| o.nonce) else {
            return false;
        };
        let Some(guard) = self.in_flight.try_acquire((chain_id, nonce)) else {
            return false;
        };
        metrics::set_in_flight(chain_id, self.in_flight.len());

        let signer = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            let result = tokio::select! {
                biased;
                _ = stop_signal(signer.stop.clone()) => {
                    info!(chain_id = %chain_id, nonce, cctx_index = %cctx.index, "Worker stopping, signing attempt dropped");
                    return;
                }
                result = signer.try_process_outbound(&cctx, height) => result,
            };
            match result {
                Ok(outcome) => debug!(chain_id = %chain_id, nonce, ?outcome, "Signing attempt finished"),
                Err(e) => {
                    warn!(chain_id = %chain_id, nonce, cctx_index = %cctx.index, error = %e, "Signing attempt failed");
                    metrics::record_outbound(chain_id, "failed");
                }
            }
        });

        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(chain_id = %chain_id, nonce, "Signer task panicked");
                    metrics::record_error(chain_id, "signer_panic");
                }
            }
            metrics::set_in_flight(chain_id, in_flight.len());
        });
        true
    }

    /// Sign and broadcast the current outbound of `cctx`
    pub async fn try_process_outbound(&self, cctx: &CrossChainTx, height: u64) -> Result<SignOutcome> {
        let chain_id = self.ctx.chain_id;
        let outbound = cctx
            .current_outbound()
            .ok_or_else(|| eyre!("CCTX {} has no outbound", cctx.index))?;
        let nonce = outbound.nonce;

        if let Some(reason) = self.already_broadcast(nonce).await? {
            debug!(chain_id = %chain_id, nonce, reason, "Skipping outbound");
            return Ok(SignOutcome::Skipped(reason));
        }

        let cancel = cctx.is_cancelled()
            || self
                .ctx
                .compliance
                .check_outbound(&cctx.index, nonce, &outbound.receiver);
        let request = self.build_request(cctx, height, cancel).await?;

        let (signed, fallback) = match self.sign_and_broadcast(&request).await {
            Ok(signed) => (signed, false),
            Err(e) => match classify_failure(&e, &request.gateway) {
                FailureAction::Fallback { reason } if !request.is_nonce_only() => {
                    warn!(
                        chain_id = %chain_id,
                        nonce,
                        cctx_index = %cctx.index,
                        reason = %reason,
                        "Outbound rejected, falling back to increment nonce"
                    );
                    metrics::record_outbound(chain_id, "fallback");
                    let signed = self
                        .sign_and_broadcast(&increment_nonce(&request))
                        .await
                        .wrap_err("Increment nonce fallback failed")?;
                    (signed, true)
                }
                FailureAction::RetryOriginal => {
                    info!(chain_id = %chain_id, nonce, error = %e, "Outbound rejected by nonce race, retrying next round");
                    return Ok(SignOutcome::Deferred);
                }
                _ => return Err(eyre!(e).wrap_err(format!("Outbound for nonce {} failed", nonce))),
            },
        };

        info!(
            chain_id = %chain_id,
            nonce,
            cctx_index = %cctx.index,
            tx_hash = %signed.hash,
            kind = ?signed.kind,
            fallback,
            "Outbound broadcast"
        );
        self.reporter
            .spawn_report(cctx.index.clone(), nonce, signed.hash.clone(), signed.kind);

        Ok(SignOutcome::Broadcast {
            hash: signed.hash,
            kind: signed.kind,
            fallback,
        })
    }

    /// Why a nonce must not be broadcast again, if it must not
    async fn already_broadcast(&self, nonce: u64) -> Result<Option<&'static str>> {
        if self.reporter.is_reporting(nonce) {
            return Ok(Some("tracker report in progress"));
        }
        let trackers = self
            .ctx
            .ledger
            .get_outbound_trackers(self.ctx.chain_id)
            .await?;
        let Some(tracker) = trackers.into_iter().find(|t| t.nonce == nonce) else {
            return Ok(None);
        };
        for tracked in &tracker.hashes {
            if self.ctx.adapter.get_tx_status(&tracked.hash).await? != TxStatus::NotFound {
                return Ok(Some("tracked hash known to chain"));
            }
        }
        Ok(None)
    }

    async fn build_request(&self, cctx: &CrossChainTx, height: u64, cancel: bool) -> Result<OutboundRequest> {
        let outbound = cctx
            .current_outbound()
            .ok_or_else(|| eyre!("CCTX {} has no outbound", cctx.index))?;
        let params = self.ctx.params();

        let (gas_price, priority_fee) = if outbound.gas_price == 0 {
            let fee = self.ctx.adapter.suggest_fee_rate().await?;
            (fee.price, fee.priority_fee)
        } else {
            (outbound.gas_price, outbound.priority_fee)
        };
        let gas_limit = if outbound.gas_limit == 0 {
            params.default_gas_limit
        } else {
            outbound.gas_limit
        };

        let request = OutboundRequest {
            cctx_index: cctx.index.clone(),
            chain_id: self.ctx.chain_id,
            nonce: outbound.nonce,
            receiver: outbound.receiver.clone(),
            amount: outbound.amount,
            asset: outbound.asset.clone(),
            coin_type: outbound.coin_type,
            gas_price,
            priority_fee,
            gas_limit,
            gateway: params.gateway_address,
            height,
            kind: OutboundKind::Withdraw,
        };
        if cancel {
            info!(chain_id = %self.ctx.chain_id, nonce = outbound.nonce, cctx_index = %cctx.index, "Cancelling outbound, burning nonce");
            metrics::record_outbound(self.ctx.chain_id, "cancelled");
            return Ok(increment_nonce(&request));
        }
        Ok(request)
    }

    async fn sign_and_broadcast(&self, request: &OutboundRequest) -> Result<SignedTx, AdapterError> {
        let chain_id = self.ctx.chain_id;
        let signed = self
            .ctx
            .adapter
            .build_outbound(request, self.ctx.tss.as_ref())
            .await?;
        metrics::record_outbound(chain_id, "signed");

        let hash = self.ctx.adapter.send_raw_transaction(&signed).await?;
        metrics::record_outbound(chain_id, "broadcast");
        if hash != signed.hash {
            debug!(chain_id = %chain_id, nonce = signed.nonce, expected = %signed.hash, got = %hash, "Node returned a different hash");
        }
        Ok(SignedTx { hash, ..signed })
    }
}

/// Same nonce, nothing delivered
fn increment_nonce(request: &OutboundRequest) -> OutboundRequest {
    OutboundRequest {
        amount: 0,
        kind: OutboundKind::IncrementNonce,
        ..request.clone()
    }
}
