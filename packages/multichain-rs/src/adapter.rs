//! Chain adapter capability and the per-chain registry
//!
//! Each external chain family implements [`ChainAdapter`]. Business logic never
//! branches on the chain name; it looks the adapter up by chain id in an
//! [`AdapterRegistry`] built once at startup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::tss::{TssError, TssSigner};
use crate::types::{
    ChainFamily, ChainId, FeeRate, ObservedTx, OutboundRequest, ScanBatch, ScanCursor, SignedTx,
    TxStatus,
};

/// Errors surfaced by chain adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// RPC unreachable, timed out or returned a transport-level error
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Response could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The node rejected a broadcast; carries the reason and any execution logs
    #[error("broadcast rejected: {reason}")]
    BroadcastRejected { reason: String, logs: Vec<String> },

    /// Transaction exceeds the chain's size limit before it is even sent
    #[error("transaction too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("signing failed: {0}")]
    Signing(#[from] TssError),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// Transport failures are retried on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Rpc(_))
    }

    /// Execution logs attached to a rejected broadcast
    pub fn logs(&self) -> &[String] {
        match self {
            AdapterError::BroadcastRejected { logs, .. } => logs,
            _ => &[],
        }
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Capability exposed by every external chain
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> ChainId;

    fn family(&self) -> ChainFamily;

    /// Current head height (block number or slot)
    async fn get_block_height(&self) -> AdapterResult<u64>;

    /// Fetch one transaction and decode its gateway events; `None` if unknown
    async fn get_transaction(&self, gateway: &str, hash: &str) -> AdapterResult<Option<ObservedTx>>;

    /// Scan gateway activity after `from` up to `to_height`, returning at most
    /// `limit` units of work (blocks or signatures) in ascending chain order
    async fn filter_events(
        &self,
        gateway: &str,
        from: &ScanCursor,
        to_height: u64,
        limit: usize,
    ) -> AdapterResult<ScanBatch>;

    /// Broadcast a signed transaction, returning the chain's hash for it
    async fn send_raw_transaction(&self, tx: &SignedTx) -> AdapterResult<String>;

    /// Sample the chain's current fee metric
    async fn suggest_fee_rate(&self) -> AdapterResult<FeeRate>;

    /// Inclusion state of a previously broadcast transaction
    async fn get_tx_status(&self, hash: &str) -> AdapterResult<TxStatus>;

    /// Build the chain-specific outbound transaction and have the TSS sign it
    async fn build_outbound(
        &self,
        request: &OutboundRequest,
        tss: &dyn TssSigner,
    ) -> AdapterResult<SignedTx>;

    /// Next outbound nonce as recorded on-chain for `tss_address`, if the
    /// chain tracks one
    async fn get_outbound_nonce(&self, _tss_address: &str) -> AdapterResult<Option<u64>> {
        Ok(None)
    }
}

/// Adapters keyed by chain id
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter; replaces any previous adapter for the same chain
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) -> Option<Arc<dyn ChainAdapter>> {
        let chain_id = adapter.chain_id();
        let previous = self.adapters.insert(chain_id, adapter);
        if previous.is_some() {
            tracing::warn!(chain_id = %chain_id, "Replaced existing chain adapter");
        }
        previous
    }

    pub fn get(&self, chain_id: ChainId) -> Option<Arc<dyn ChainAdapter>> {
        self.adapters.get(&chain_id).cloned()
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.adapters.contains_key(&chain_id)
    }

    /// Registered chain ids in ascending order
    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self.adapters.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
