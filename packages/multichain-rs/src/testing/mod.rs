//! Testing Utilities Module
//!
//! In-memory chain adapter and inbound event builders for operator tests.
//!
//! ## Submodules
//!
//! - `mock_adapter` - Scriptable [`MockChainAdapter`]
//! - `mock_deposits` - Inbound event builders

pub mod mock_adapter;
pub mod mock_deposits;

pub use mock_adapter::*;
pub use mock_deposits::*;
