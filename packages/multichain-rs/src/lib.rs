//! Multichain-RS: Chain Adapters for the Bridge Validator
//!
//! This crate provides what the ledger and the operator share:
//!
//! - **Types** - Chain ids, inbound events, scan cursors, outbound requests
//! - **Adapter** - The [`ChainAdapter`] capability and the per-chain [`AdapterRegistry`]
//! - **TSS** - The [`TssSigner`] capability and a local single-key stand-in
//! - **Hash** - keccak256 / sha256 helpers matching gateway contract logic
//! - **EVM Module** - alloy-backed adapter, gateway log decoding, legacy tx signing
//! - **Bitcoin Module** - Bitcoin Core RPC adapter, segwit v0 outbounds
//! - **Solana Module** - Gateway program adapter, Anchor instruction layouts
//! - **Testing Module** - In-memory adapter and inbound event builders
//!
//! ## Feature Flags
//!
//! - `evm` - Enable EVM chain support (default)
//! - `bitcoin` - Enable Bitcoin support (default)
//! - `solana` - Enable Solana support (default)
//! - `testing` - Enable testing utilities
//! - `full` - Enable all features

// Core modules (always available)
pub mod adapter;
pub mod hash;
pub mod tss;
pub mod types;

// Chain-specific modules (feature-gated)
#[cfg(feature = "evm")]
pub mod evm;

#[cfg(feature = "bitcoin")]
pub mod bitcoin;

#[cfg(feature = "solana")]
pub mod solana;

// Testing utilities (feature-gated)
#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used items at the crate root
pub use adapter::{AdapterError, AdapterRegistry, AdapterResult, ChainAdapter};
pub use hash::{bytes32_to_hex, keccak256, sha256};
pub use tss::{LocalTssSigner, RoundMetadata, TssError, TssSignature, TssSigner};
pub use types::{
    format_receiver, ChainFamily, ChainId, CoinType, FeeRate, InboundEvent, ObservedTx,
    OutboundKind, OutboundRequest, RevertOptions, ScanBatch, ScanCursor, SignedTx, TxStatus,
    DONATION_MESSAGE,
};
