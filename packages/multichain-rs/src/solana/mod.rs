//! Solana Chain Support Module
//!
//! - `client` - [`SolanaAdapter`] over the nonblocking RPC client
//! - `inbound` - Deposit extraction from gateway transactions
//! - `instructions` - Gateway instruction layouts and signed messages

pub mod client;
pub mod inbound;
pub mod instructions;

pub use client::{SolanaAdapter, MAX_SIGNATURES_PER_TICKER};
pub use inbound::{parse_inbound, ParsedSolanaTx, ResolvedInstruction};
pub use instructions::GatewayInstruction;
