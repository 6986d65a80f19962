//! Execute handlers, one file per message family

pub mod admin;
pub mod gas_price;
pub mod inbound;
pub mod nonce;
pub mod outbound;

pub use inbound::inbound_ballot_index;
pub use nonce::nonce_ballot_index;
pub use outbound::outbound_ballot_index;
