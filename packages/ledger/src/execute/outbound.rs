//! Outbound votes, outbound trackers and revert legs

use multichain_rs::ChainId;
use tracing::{info, warn};

use crate::ballot::{ballot_digest, ObservationType, VoteOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::keeper::Ledger;
use crate::msg::ExecuteResponse;
use crate::state::{CctxStatus, OutboundTracker, TrackerHash};

pub fn outbound_ballot_index(cctx_index: &str, nonce: u64, hash: &str, success: bool) -> String {
    ballot_digest(
        ObservationType::OutboundTx,
        &[
            cctx_index.as_bytes(),
            &nonce.to_be_bytes(),
            hash.as_bytes(),
            &[success as u8],
        ],
    )
}

impl Ledger {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn vote_outbound(
        &mut self,
        voter: &str,
        cctx_index: &str,
        chain_id: ChainId,
        nonce: u64,
        outbound_hash: &str,
        observed_height: u64,
        success: bool,
    ) -> LedgerResult<ExecuteResponse> {
        self.ensure_observer(voter)?;
        let index = outbound_ballot_index(cctx_index, nonce, outbound_hash, success);

        // late votes on a finalized ballot are bookkeeping only
        if let Some(ballot) = self.ballots.get_mut(&index) {
            if ballot.is_finalized() {
                let outcome = ballot.add_vote(voter);
                return Ok(ExecuteResponse {
                    ballot_index: Some(index),
                    duplicate: outcome == VoteOutcome::Duplicate,
                    finalized: false,
                    cctx_index: Some(cctx_index.to_string()),
                });
            }
        }

        let cctx = self
            .cctxs
            .get(cctx_index)
            .ok_or_else(|| LedgerError::CctxNotFound(cctx_index.to_string()))?;
        let outbound = cctx
            .current_outbound()
            .ok_or_else(|| LedgerError::OutboundMismatch {
                index: cctx_index.to_string(),
                reason: "cctx has no outbound".to_string(),
            })?;
        if outbound.receiver_chain_id != chain_id || outbound.nonce != nonce {
            return Err(LedgerError::OutboundMismatch {
                index: cctx_index.to_string(),
                reason: format!(
                    "expected nonce {} on chain {}, got nonce {} on chain {}",
                    outbound.nonce, outbound.receiver_chain_id, nonce, chain_id
                ),
            });
        }
        let cancel_pending = cctx.status == CctxStatus::Aborted && !outbound.nonce_consumed;
        if !cctx.status.awaits_outbound() && !cancel_pending {
            return Err(LedgerError::InvalidStatus {
                index: cctx_index.to_string(),
                status: cctx.status.to_string(),
                action: "outbound vote".to_string(),
            });
        }

        let (outcome, finalized) =
            self.cast_vote(&index, ObservationType::OutboundTx, chain_id, voter);
        let response = ExecuteResponse {
            ballot_index: Some(index.clone()),
            duplicate: outcome == VoteOutcome::Duplicate,
            finalized,
            cctx_index: Some(cctx_index.to_string()),
        };
        if finalized {
            self.finalize_outbound(cctx_index, &index, outbound_hash, observed_height, success);
        }
        Ok(response)
    }

    fn finalize_outbound(
        &mut self,
        cctx_index: &str,
        ballot_index: &str,
        outbound_hash: &str,
        observed_height: u64,
        success: bool,
    ) {
        let height = self.height;
        let Some(cctx) = self.cctxs.get_mut(cctx_index) else {
            return;
        };
        let previous = cctx.status;
        let Some(outbound) = cctx.current_outbound_mut() else {
            return;
        };
        outbound.hash = outbound_hash.to_string();
        outbound.observed_height = observed_height;
        outbound.ballot_index = ballot_index.to_string();
        outbound.nonce_consumed = true;
        let (chain_id, nonce) = (outbound.receiver_chain_id, outbound.nonce);

        let mut revert_leg = None;
        match (previous, success) {
            (CctxStatus::Aborted, _) => {}
            (CctxStatus::PendingOutbound | CctxStatus::OutboundMined, true) => {
                cctx.set_status(CctxStatus::Confirmed, "outbound confirmed", height);
            }
            (CctxStatus::PendingRevert, true) => {
                cctx.set_status(CctxStatus::Reverted, "revert confirmed", height);
            }
            (CctxStatus::PendingOutbound | CctxStatus::OutboundMined, false) => {
                let receiver = cctx
                    .inbound
                    .revert_options
                    .as_ref()
                    .map(|r| r.revert_address.clone())
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| cctx.inbound.sender.clone());
                revert_leg = Some((
                    cctx.inbound.sender_chain_id,
                    receiver,
                    cctx.inbound.amount,
                    cctx.inbound.asset.clone(),
                    cctx.inbound.coin_type,
                ));
            }
            (CctxStatus::PendingRevert, false) => {
                cctx.set_status(CctxStatus::Aborted, "revert failed", height);
            }
            (status, _) => {
                warn!(cctx = %cctx_index, status = %status, "Outbound finalized in unexpected status");
            }
        }

        self.consume_nonce(chain_id, nonce);

        if let Some((revert_chain, receiver, amount, asset, coin_type)) = revert_leg {
            let supported = self.ensure_supported(revert_chain).map(|_| ());
            let leg = match supported {
                Ok(()) => Some(self.new_outbound_leg(
                    cctx_index,
                    revert_chain,
                    &receiver,
                    amount,
                    &asset,
                    coin_type,
                )),
                Err(_) => None,
            };
            if let Some(cctx) = self.cctxs.get_mut(cctx_index) {
                match leg {
                    Some(leg) => {
                        cctx.outbound.push(leg);
                        cctx.set_status(CctxStatus::PendingRevert, "outbound failed", height);
                    }
                    None => cctx.set_status(
                        CctxStatus::Aborted,
                        "outbound failed and sender chain is not supported",
                        height,
                    ),
                }
            }
        }

        if let Some(cctx) = self.cctxs.get(cctx_index) {
            info!(
                cctx = %cctx_index,
                chain_id = %chain_id,
                nonce,
                success,
                from = %previous,
                to = %cctx.status,
                "Outbound finalized"
            );
        }
    }

    pub(crate) fn vote_outbound_tracker(
        &mut self,
        reporter: &str,
        chain_id: ChainId,
        nonce: u64,
        hash: &str,
    ) -> LedgerResult<ExecuteResponse> {
        if self.ensure_observer(reporter).is_err() {
            self.ensure_admin(reporter)?;
        }
        if hash.trim().is_empty() {
            return Err(LedgerError::InvalidMsg("empty outbound hash".to_string()));
        }
        if !self.is_nonce_pending(chain_id, nonce) {
            return Err(LedgerError::CctxNotPending { chain_id, nonce });
        }
        let cctx_index = self
            .nonce_to_cctx
            .get(&(chain_id, nonce))
            .cloned()
            .ok_or(LedgerError::CctxNotPending { chain_id, nonce })?;

        let tracker = self
            .outbound_trackers
            .entry((chain_id, nonce))
            .or_insert_with(|| OutboundTracker {
                chain_id,
                nonce,
                cctx_index: cctx_index.clone(),
                hashes: Vec::new(),
            });
        if tracker.contains(hash) {
            return Err(LedgerError::TrackerHashExists {
                chain_id,
                nonce,
                hash: hash.to_string(),
            });
        }
        if tracker.hashes.len() >= OutboundTracker::MAX_HASHES {
            return Err(LedgerError::TrackerFull { chain_id, nonce });
        }
        tracker.hashes.push(TrackerHash {
            hash: hash.to_string(),
            reporter: reporter.to_string(),
        });

        let height = self.height;
        if let Some(cctx) = self.cctxs.get_mut(&cctx_index) {
            if cctx.status == CctxStatus::PendingOutbound {
                if let Some(outbound) = cctx.current_outbound_mut() {
                    outbound.hash = hash.to_string();
                }
                cctx.set_status(CctxStatus::OutboundMined, "outbound reported", height);
            }
        }

        info!(chain_id = %chain_id, nonce, hash = %hash, reporter = %reporter, "Outbound tracker updated");
        Ok(ExecuteResponse {
            cctx_index: Some(cctx_index),
            ..Default::default()
        })
    }
}
