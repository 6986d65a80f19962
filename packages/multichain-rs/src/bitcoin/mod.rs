//! Bitcoin Chain Support Module
//!
//! - `adapter` - [`BitcoinAdapter`] over Bitcoin Core RPC
//! - `merkle` - Merkle proofs for observed deposits
//! - `rpc` - JSON-RPC client
//! - `script` - Segwit addresses, OP_RETURN and memo layout
//! - `tx` - Segwit v0 outbound construction and BIP143 signing

pub mod adapter;
pub mod merkle;
pub mod rpc;
pub mod script;
pub mod tx;

pub use adapter::BitcoinAdapter;
pub use script::InboundMemo;
