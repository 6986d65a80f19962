//! Inbound votes and CCTX creation

use multichain_rs::{CoinType, InboundEvent};
use tracing::info;

use crate::ballot::{ballot_digest, ObservationType, VoteOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::keeper::Ledger;
use crate::msg::ExecuteResponse;
use crate::state::{CctxStatus, CrossChainTx, InboundParams, InboundTracker, OutboundParams};

/// Ballot index of an inbound event; covers every field observers must agree on
pub fn inbound_ballot_index(event: &InboundEvent) -> String {
    let amount = event.amount.to_string();
    let event_index = event.event_index.to_be_bytes();
    let sender_chain = event.sender_chain_id.to_be_bytes();
    let receiver_chain = event.receiver_chain_id.to_be_bytes();
    ballot_digest(
        ObservationType::InboundTx,
        &[
            &sender_chain,
            event.tx_hash.as_bytes(),
            &event_index,
            event.sender.as_bytes(),
            &receiver_chain,
            event.receiver.as_bytes(),
            amount.as_bytes(),
            event.asset.as_bytes(),
            event.coin_type.as_str().as_bytes(),
            &event.memo,
        ],
    )
}

impl Ledger {
    pub(crate) fn vote_inbound(
        &mut self,
        voter: &str,
        event: InboundEvent,
    ) -> LedgerResult<ExecuteResponse> {
        self.ensure_observer(voter)?;
        self.ensure_supported(event.sender_chain_id)?;

        let key = (
            event.sender_chain_id,
            event.tx_hash.clone(),
            event.event_index,
        );
        if self.finalized_inbounds.contains(&key) {
            return Err(LedgerError::InboundAlreadyFinalized {
                chain_id: event.sender_chain_id,
                tx_hash: event.tx_hash,
                event_index: event.event_index,
            });
        }

        let index = inbound_ballot_index(&event);
        let (outcome, finalized) =
            self.cast_vote(&index, ObservationType::InboundTx, event.sender_chain_id, voter);

        let mut response = ExecuteResponse {
            ballot_index: Some(index.clone()),
            duplicate: outcome == VoteOutcome::Duplicate,
            finalized,
            cctx_index: None,
        };
        if !finalized {
            return Ok(response);
        }

        self.finalized_inbounds.insert(key);
        self.inbound_trackers
            .remove(&(event.sender_chain_id, event.tx_hash.clone()));
        self.create_cctx(&index, event);
        response.cctx_index = Some(index);
        Ok(response)
    }

    /// Create the CCTX for a finalized inbound and advance it to outbound
    fn create_cctx(&mut self, index: &str, event: InboundEvent) {
        let height = self.height;
        let inbound = InboundParams {
            sender: event.sender.clone(),
            sender_chain_id: event.sender_chain_id,
            tx_hash: event.tx_hash.clone(),
            event_index: event.event_index,
            amount: event.amount,
            asset: event.asset.clone(),
            coin_type: event.coin_type,
            memo: event.memo.clone(),
            observed_height: event.block_number,
            finalized_height: height,
            ballot_index: index.to_string(),
            is_cross_chain_call: event.is_cross_chain_call,
            revert_options: event.revert_options.clone(),
        };
        let mut cctx = CrossChainTx {
            index: index.to_string(),
            status: CctxStatus::PendingInbound,
            status_message: String::new(),
            inbound,
            outbound: Vec::new(),
            created_height: height,
            last_update_height: height,
        };

        let receiver_supported = self.ensure_supported(event.receiver_chain_id).map(|_| ());
        if event.coin_type.carries_value() && event.amount == 0 {
            cctx.set_status(CctxStatus::Aborted, "zero amount", height);
        } else if let Err(e) = receiver_supported {
            cctx.set_status(CctxStatus::Aborted, e.to_string(), height);
        } else {
            let leg = self.new_outbound_leg(
                index,
                event.receiver_chain_id,
                &event.receiver,
                event.amount,
                &event.asset,
                event.coin_type,
            );
            cctx.outbound.push(leg);
            cctx.set_status(CctxStatus::PendingOutbound, "inbound finalized", height);
        }

        info!(
            cctx = %index,
            status = %cctx.status,
            sender_chain = %event.sender_chain_id,
            receiver_chain = %event.receiver_chain_id,
            nonce = ?cctx.current_outbound().map(|o| o.nonce),
            "CCTX created"
        );
        self.cctxs.insert(index.to_string(), cctx);
    }

    /// Outbound leg on `chain_id` with a freshly assigned nonce and the
    /// chain's current median gas price
    pub(crate) fn new_outbound_leg(
        &mut self,
        cctx_index: &str,
        chain_id: multichain_rs::ChainId,
        receiver: &str,
        amount: u128,
        asset: &str,
        coin_type: CoinType,
    ) -> OutboundParams {
        let gas_limit = self
            .chain_params
            .get(&chain_id)
            .map(|p| p.default_gas_limit)
            .unwrap_or_default();
        let (gas_price, priority_fee) = self
            .gas_prices
            .get(&chain_id)
            .map(|g| (g.median_price(), g.median_priority_fee()))
            .unwrap_or_default();
        let nonce = self.assign_nonce(chain_id, cctx_index);
        OutboundParams {
            receiver: receiver.to_string(),
            receiver_chain_id: chain_id,
            amount,
            asset: asset.to_string(),
            coin_type,
            nonce,
            gas_price,
            priority_fee,
            gas_limit,
            hash: String::new(),
            observed_height: 0,
            ballot_index: String::new(),
            nonce_consumed: false,
        }
    }

    pub(crate) fn add_inbound_tracker(
        &mut self,
        sender: &str,
        chain_id: multichain_rs::ChainId,
        tx_hash: &str,
        coin_type: CoinType,
    ) -> LedgerResult<ExecuteResponse> {
        if self.ensure_observer(sender).is_err() {
            self.ensure_admin(sender)?;
        }
        self.ensure_supported(chain_id)?;

        let already_finalized = self
            .finalized_inbounds
            .iter()
            .any(|(c, h, _)| *c == chain_id && h == tx_hash);
        if already_finalized {
            return Err(LedgerError::InboundAlreadyFinalized {
                chain_id,
                tx_hash: tx_hash.to_string(),
                event_index: 0,
            });
        }

        self.inbound_trackers
            .entry((chain_id, tx_hash.to_string()))
            .or_insert_with(|| InboundTracker {
                chain_id,
                tx_hash: tx_hash.to_string(),
                coin_type,
                reporter: sender.to_string(),
            });
        Ok(ExecuteResponse::default())
    }
}
