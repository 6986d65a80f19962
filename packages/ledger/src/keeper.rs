//! The ledger: authoritative store of ballots, CCTXs and per-chain facts
//!
//! All mutation goes through [`Ledger::execute`]; all reads through
//! [`Ledger::query`]. State lives in ordered maps so iteration is
//! deterministic and replicas applying the same messages agree.

use multichain_rs::ChainId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::ballot::{Ballot, ObservationType, VoteOutcome};
use crate::error::{LedgerError, LedgerResult};
use crate::msg::{ExecuteMsg, ExecuteResponse, QueryMsg, QueryResponse};
use crate::state::{
    ChainNonce, ChainParams, CrossChainTx, GasPrice, InboundTracker, OutboundTracker,
};

/// Default quorum for small deployments
pub const DEFAULT_THRESHOLD: usize = 2;

/// Voter set and quorum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub threshold: usize,
    pub observers: BTreeSet<String>,
    pub admins: BTreeSet<String>,
}

impl LedgerConfig {
    pub fn new(threshold: usize, observers: &[&str], admins: &[&str]) -> LedgerResult<Self> {
        let config = Self {
            threshold,
            observers: observers.iter().map(|s| s.to_string()).collect(),
            admins: admins.iter().map(|s| s.to_string()).collect(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.threshold == 0 || self.threshold > self.observers.len() {
            return Err(LedgerError::InvalidMsg(format!(
                "threshold {} must be in 1..={}",
                self.threshold,
                self.observers.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pub(crate) config: LedgerConfig,
    pub(crate) height: u64,
    pub(crate) ballots: BTreeMap<String, Ballot>,
    pub(crate) cctxs: BTreeMap<String, CrossChainTx>,
    /// (sender chain, tx hash, event index) of finalized inbounds
    pub(crate) finalized_inbounds: BTreeSet<(ChainId, String, u32)>,
    /// (chain, nonce) -> cctx index, for every assigned nonce
    pub(crate) nonce_to_cctx: BTreeMap<(ChainId, u64), String>,
    /// Assigned but not yet consumed nonces per chain
    pub(crate) pending_nonces: BTreeMap<ChainId, BTreeSet<u64>>,
    pub(crate) chain_nonces: BTreeMap<ChainId, ChainNonce>,
    pub(crate) gas_prices: BTreeMap<ChainId, GasPrice>,
    pub(crate) chain_params: BTreeMap<ChainId, ChainParams>,
    pub(crate) inbound_trackers: BTreeMap<(ChainId, String), InboundTracker>,
    pub(crate) outbound_trackers: BTreeMap<(ChainId, u64), OutboundTracker>,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            height: 1,
            ballots: BTreeMap::new(),
            cctxs: BTreeMap::new(),
            finalized_inbounds: BTreeSet::new(),
            nonce_to_cctx: BTreeMap::new(),
            pending_nonces: BTreeMap::new(),
            chain_nonces: BTreeMap::new(),
            gas_prices: BTreeMap::new(),
            chain_params: BTreeMap::new(),
            inbound_trackers: BTreeMap::new(),
            outbound_trackers: BTreeMap::new(),
        }
    }

    /// Seed chain params at genesis
    pub fn with_chain_params(mut self, params: Vec<ChainParams>) -> LedgerResult<Self> {
        for p in params {
            p.validate()?;
            self.chain_params.insert(p.chain_id, p);
        }
        Ok(self)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    /// Advance the host chain by one block
    pub fn begin_block(&mut self) -> u64 {
        self.height += 1;
        self.height
    }

    pub fn execute(&mut self, msg: ExecuteMsg) -> LedgerResult<ExecuteResponse> {
        let kind = msg.kind();
        let result = match msg {
            ExecuteMsg::VoteInbound { voter, event } => self.vote_inbound(&voter, event),
            ExecuteMsg::VoteOutbound {
                voter,
                cctx_index,
                chain_id,
                nonce,
                outbound_hash,
                observed_height,
                success,
            } => self.vote_outbound(
                &voter,
                &cctx_index,
                chain_id,
                nonce,
                &outbound_hash,
                observed_height,
                success,
            ),
            ExecuteMsg::VoteGasPrice {
                voter,
                chain_id,
                price,
                priority_fee,
                block_number,
            } => self.vote_gas_price(&voter, chain_id, price, priority_fee, block_number),
            ExecuteMsg::VoteNonce {
                voter,
                chain_id,
                nonce,
            } => self.vote_nonce(&voter, chain_id, nonce),
            ExecuteMsg::VoteOutboundTracker {
                reporter,
                chain_id,
                nonce,
                hash,
            } => self.vote_outbound_tracker(&reporter, chain_id, nonce, &hash),
            ExecuteMsg::AddInboundTracker {
                sender,
                chain_id,
                tx_hash,
                coin_type,
            } => self.add_inbound_tracker(&sender, chain_id, &tx_hash, coin_type),
            ExecuteMsg::AbortCctx {
                admin,
                index,
                reason,
            } => self.abort_cctx(&admin, &index, &reason),
            ExecuteMsg::UpdateChainParams { admin, params } => {
                self.update_chain_params(&admin, params)
            }
        };

        match &result {
            Ok(resp) => debug!(
                msg = kind,
                height = self.height,
                finalized = resp.finalized,
                duplicate = resp.duplicate,
                "Executed ledger message"
            ),
            Err(e) => debug!(msg = kind, height = self.height, error = %e, "Ledger message rejected"),
        }
        result
    }

    pub fn query(&self, msg: &QueryMsg) -> LedgerResult<QueryResponse> {
        crate::query::handle(self, msg)
    }

    // ========================================================================
    // Shared helpers for the execute handlers
    // ========================================================================

    pub(crate) fn ensure_observer(&self, who: &str) -> LedgerResult<()> {
        if self.config.observers.contains(who) {
            Ok(())
        } else {
            Err(LedgerError::NotObserver(who.to_string()))
        }
    }

    pub(crate) fn ensure_admin(&self, who: &str) -> LedgerResult<()> {
        if self.config.admins.contains(who) {
            Ok(())
        } else {
            Err(LedgerError::NotAdmin(who.to_string()))
        }
    }

    pub(crate) fn ensure_supported(&self, chain_id: ChainId) -> LedgerResult<&ChainParams> {
        match self.chain_params.get(&chain_id) {
            Some(p) if p.is_supported => Ok(p),
            _ => Err(LedgerError::ChainNotSupported(chain_id)),
        }
    }

    /// Add a vote to the ballot for `index`, creating it if absent, and
    /// finalize on quorum. Returns the vote outcome and whether this vote
    /// finalized the ballot.
    pub(crate) fn cast_vote(
        &mut self,
        index: &str,
        observation_type: ObservationType,
        chain_id: ChainId,
        voter: &str,
    ) -> (VoteOutcome, bool) {
        let height = self.height;
        let threshold = self.config.threshold;
        let ballot = self
            .ballots
            .entry(index.to_string())
            .or_insert_with(|| Ballot::new(index.to_string(), observation_type, chain_id, height));
        let outcome = ballot.add_vote(voter);
        let finalized = ballot.try_finalize(threshold, height);
        if outcome == VoteOutcome::Duplicate {
            debug!(ballot = %index, voter = %voter, "Duplicate vote ignored");
        }
        (outcome, finalized)
    }

    /// Take the next nonce on `chain_id` for `cctx_index`
    pub(crate) fn assign_nonce(&mut self, chain_id: ChainId, cctx_index: &str) -> u64 {
        let height = self.height;
        let entry = self.chain_nonces.entry(chain_id).or_insert(ChainNonce {
            chain_id,
            next_nonce: 0,
            finalized_height: height,
        });
        let nonce = entry.next_nonce;
        entry.next_nonce += 1;

        if let Some(previous) = self
            .nonce_to_cctx
            .insert((chain_id, nonce), cctx_index.to_string())
        {
            warn!(chain_id = %chain_id, nonce, previous = %previous, "Nonce reassigned");
        }
        self.pending_nonces
            .entry(chain_id)
            .or_default()
            .insert(nonce);
        nonce
    }

    /// Mark a nonce as used on-chain
    pub(crate) fn consume_nonce(&mut self, chain_id: ChainId, nonce: u64) {
        if let Some(set) = self.pending_nonces.get_mut(&chain_id) {
            set.remove(&nonce);
        }
        self.outbound_trackers.remove(&(chain_id, nonce));
    }

    pub(crate) fn is_nonce_pending(&self, chain_id: ChainId, nonce: u64) -> bool {
        self.pending_nonces
            .get(&chain_id)
            .is_some_and(|set| set.contains(&nonce))
    }
}
