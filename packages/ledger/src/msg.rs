//! Messages accepted by the ledger and their responses

use multichain_rs::{ChainId, CoinType, InboundEvent};
use serde::{Deserialize, Serialize};

use crate::ballot::Ballot;
use crate::state::{
    ChainNonce, ChainParams, CrossChainTx, GasPrice, InboundTracker, OutboundTracker,
};

/// State-changing messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteMsg {
    VoteInbound {
        voter: String,
        event: InboundEvent,
    },
    VoteOutbound {
        voter: String,
        cctx_index: String,
        chain_id: ChainId,
        nonce: u64,
        outbound_hash: String,
        observed_height: u64,
        /// Delivered; false for reverted and nonce-only transactions
        success: bool,
    },
    VoteGasPrice {
        voter: String,
        chain_id: ChainId,
        price: u64,
        priority_fee: u64,
        block_number: u64,
    },
    VoteNonce {
        voter: String,
        chain_id: ChainId,
        nonce: u64,
    },
    VoteOutboundTracker {
        reporter: String,
        chain_id: ChainId,
        nonce: u64,
        hash: String,
    },
    AddInboundTracker {
        sender: String,
        chain_id: ChainId,
        tx_hash: String,
        coin_type: CoinType,
    },
    AbortCctx {
        admin: String,
        index: String,
        reason: String,
    },
    UpdateChainParams {
        admin: String,
        params: ChainParams,
    },
}

impl ExecuteMsg {
    /// Label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ExecuteMsg::VoteInbound { .. } => "vote_inbound",
            ExecuteMsg::VoteOutbound { .. } => "vote_outbound",
            ExecuteMsg::VoteGasPrice { .. } => "vote_gas_price",
            ExecuteMsg::VoteNonce { .. } => "vote_nonce",
            ExecuteMsg::VoteOutboundTracker { .. } => "vote_outbound_tracker",
            ExecuteMsg::AddInboundTracker { .. } => "add_inbound_tracker",
            ExecuteMsg::AbortCctx { .. } => "abort_cctx",
            ExecuteMsg::UpdateChainParams { .. } => "update_chain_params",
        }
    }

    /// Identity the message acts as
    pub fn sender(&self) -> &str {
        match self {
            ExecuteMsg::VoteInbound { voter, .. }
            | ExecuteMsg::VoteOutbound { voter, .. }
            | ExecuteMsg::VoteGasPrice { voter, .. }
            | ExecuteMsg::VoteNonce { voter, .. } => voter,
            ExecuteMsg::VoteOutboundTracker { reporter, .. } => reporter,
            ExecuteMsg::AddInboundTracker { sender, .. } => sender,
            ExecuteMsg::AbortCctx { admin, .. } | ExecuteMsg::UpdateChainParams { admin, .. } => {
                admin
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Ballot the vote landed on, if the message is a ballot vote
    pub ballot_index: Option<String>,
    /// The voter had already voted on this ballot
    pub duplicate: bool,
    /// This message finalized the ballot
    pub finalized: bool,
    pub cctx_index: Option<String>,
}

/// Read-only queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMsg {
    GetBlockHeight,
    GetPendingCctxs { chain_id: ChainId, limit: usize },
    GetCctxByNonce { chain_id: ChainId, nonce: u64 },
    GetCctx { index: String },
    GetBallotById { id: String },
    GetOutboundTrackers { chain_id: ChainId },
    GetInboundTrackers { chain_id: ChainId },
    GetChainParams { chain_id: ChainId },
    ListChainParams,
    GetGasPrice { chain_id: ChainId },
    GetChainNonce { chain_id: ChainId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum QueryResponse {
    BlockHeight(u64),
    PendingCctxs {
        cctxs: Vec<CrossChainTx>,
        total_pending: usize,
    },
    Cctx(Option<CrossChainTx>),
    Ballot(Option<Ballot>),
    OutboundTrackers(Vec<OutboundTracker>),
    InboundTrackers(Vec<InboundTracker>),
    ChainParams(Option<ChainParams>),
    ChainParamsList(Vec<ChainParams>),
    GasPrice(Option<GasPrice>),
    ChainNonce(Option<ChainNonce>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_msg_json_shape() {
        let msg = ExecuteMsg::VoteNonce {
            voter: "alice".to_string(),
            chain_id: ChainId(5),
            nonce: 3,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["vote_nonce"]["chain_id"], 5);
        assert_eq!(msg.kind(), "vote_nonce");
        assert_eq!(msg.sender(), "alice");
    }

    #[test]
    fn test_query_response_json_shape() {
        let json = serde_json::to_value(QueryResponse::BlockHeight(7)).unwrap();
        assert_eq!(json["type"], "block_height");
        assert_eq!(json["data"], 7);
        let back: QueryResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, QueryResponse::BlockHeight(7));
    }
}
