//! Bridge operator
//!
//! Watches external chains for gateway deposits, votes them into the ledger,
//! and signs, broadcasts and tracks the outbound transactions the ledger
//! assigns to each chain.

pub mod api;
pub mod chain;
pub mod compliance;
pub mod config;
pub mod db;
pub mod in_flight;
pub mod ledger_client;
pub mod metrics;
pub mod observer;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod signer;
pub mod ticker;
pub mod tracker_reporter;

pub use chain::{ChainContext, PipelineSettings};
pub use config::Config;
pub use ledger_client::{HttpLedgerClient, LedgerClient, LocalLedgerClient};
pub use observer::Observer;
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use scheduler::Scheduler;
pub use signer::Signer;
pub use tracker_reporter::TrackerReporter;
