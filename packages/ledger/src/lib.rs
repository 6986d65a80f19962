//! Bridge ledger
//!
//! Ballot engine and cross-chain transaction store shared by the observer
//! set. State transitions are synchronous and deterministic; the `server`
//! module exposes them over HTTP for devnets.

pub mod ballot;
pub mod config;
pub mod error;
pub mod execute;
pub mod keeper;
pub mod msg;
mod query;
pub mod server;
pub mod state;

pub use ballot::{median_index, Ballot, ObservationType, VoteOutcome};
pub use error::{LedgerError, LedgerResult};
pub use execute::{inbound_ballot_index, nonce_ballot_index, outbound_ballot_index};
pub use keeper::{Ledger, LedgerConfig, DEFAULT_THRESHOLD};
pub use msg::{ExecuteMsg, ExecuteResponse, QueryMsg, QueryResponse};
pub use state::{
    CctxStatus, ChainNonce, ChainParams, CrossChainTx, GasPrice, InboundParams, InboundTracker,
    OutboundParams, OutboundTracker, TrackerHash,
};
