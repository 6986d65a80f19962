//! EVM Chain Support Module
//!
//! ## Submodules
//!
//! - `client` - [`EvmAdapter`], the alloy-backed chain adapter
//! - `contracts` - Gateway ABI bindings (`sol!`)
//! - `events` - Gateway log decoding
//! - `tx` - Legacy EIP-155 outbound construction and signing

pub mod client;
pub mod contracts;
pub mod events;
pub mod tx;

pub use client::EvmAdapter;
pub use contracts::Gateway;
pub use events::{decode_gateway_log, group_logs, RawLog};
pub use tx::{build_signed_outbound, outbound_tx};
