//! Ledger error types
//!
//! Errors are serializable so the HTTP façade can hand them to remote
//! clients unchanged.

use multichain_rs::ChainId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum LedgerError {
    // ========================================================================
    // Authorization
    // ========================================================================
    #[error("{0} is not in the observer set")]
    NotObserver(String),

    #[error("{0} is not an admin")]
    NotAdmin(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    // ========================================================================
    // Chains
    // ========================================================================
    #[error("chain {0} is not supported")]
    ChainNotSupported(ChainId),

    #[error("invalid chain params: {0}")]
    InvalidChainParams(String),

    // ========================================================================
    // Inbound
    // ========================================================================
    #[error("inbound {tx_hash}#{event_index} on chain {chain_id} is already finalized")]
    InboundAlreadyFinalized {
        chain_id: ChainId,
        tx_hash: String,
        event_index: u32,
    },

    // ========================================================================
    // Outbound
    // ========================================================================
    #[error("cctx {0} not found")]
    CctxNotFound(String),

    #[error("no pending cctx for nonce {nonce} on chain {chain_id}")]
    CctxNotPending { chain_id: ChainId, nonce: u64 },

    #[error("cctx {index} cannot accept {action} in status {status}")]
    InvalidStatus {
        index: String,
        status: String,
        action: String,
    },

    #[error("outbound mismatch for cctx {index}: {reason}")]
    OutboundMismatch { index: String, reason: String },

    #[error("hash {hash} already tracked for nonce {nonce} on chain {chain_id}")]
    TrackerHashExists {
        chain_id: ChainId,
        nonce: u64,
        hash: String,
    },

    #[error("outbound tracker for nonce {nonce} on chain {chain_id} is full")]
    TrackerFull { chain_id: ChainId, nonce: u64 },

    // ========================================================================
    // Generic
    // ========================================================================
    #[error("invalid message: {0}")]
    InvalidMsg(String),
}

impl LedgerError {
    /// Whether retrying the same message can never succeed
    pub fn is_terminal_for_vote(&self) -> bool {
        matches!(
            self,
            LedgerError::InboundAlreadyFinalized { .. }
                | LedgerError::CctxNotPending { .. }
                | LedgerError::TrackerHashExists { .. }
        )
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_round_trip() {
        let err = LedgerError::CctxNotPending {
            chain_id: ChainId(5),
            nonce: 9,
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("cctx_not_pending"));
        let back: LedgerError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
        assert!(back.is_terminal_for_vote());
        assert!(!LedgerError::NotObserver("x".into()).is_terminal_for_vote());
    }
}
