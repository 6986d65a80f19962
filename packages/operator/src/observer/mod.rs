//! Observer: inbound scanning, gas price sampling, RPC health and outbound
//! confirmation for one external chain

mod gas_price;
mod inbound;
mod outbound;
mod rpc_status;

use std::sync::Arc;
use std::time::Instant;

use multichain_rs::{InboundEvent, ScanCursor, DONATION_MESSAGE};
use tracing::info;

use crate::chain::ChainContext;
use crate::compliance::Compliance;

pub use inbound::ScanReport;

/// How an inbound event is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Processable,
    /// Memo is the donation marker; accepted on-chain, never relayed
    Donation,
    /// Sender, receiver or revert address is on the denylist
    Restricted,
}

impl EventClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Processable => "voted",
            EventClass::Donation => "donation",
            EventClass::Restricted => "restricted",
        }
    }
}

pub fn classify_event(event: &InboundEvent, compliance: &Compliance) -> EventClass {
    if event.memo == DONATION_MESSAGE.as_bytes() {
        info!(
            chain_id = %event.sender_chain_id,
            tx_hash = %event.tx_hash,
            sender = %event.sender,
            amount = %event.amount,
            "Donation received, not relaying"
        );
        return EventClass::Donation;
    }
    if compliance.check_inbound(event) {
        return EventClass::Restricted;
    }
    EventClass::Processable
}

#[derive(Debug, Clone, Copy)]
struct HeadSample {
    height: u64,
    moved_at: Instant,
}

pub struct Observer {
    ctx: Arc<ChainContext>,
    /// Loaded once from the override or the cursor store, then kept in sync
    cursor: tokio::sync::Mutex<Option<ScanCursor>>,
    head: std::sync::Mutex<Option<HeadSample>>,
}

impl Observer {
    pub fn new(ctx: Arc<ChainContext>) -> Self {
        Self {
            ctx,
            cursor: tokio::sync::Mutex::new(None),
            head: std::sync::Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<ChainContext> {
        &self.ctx
    }
}
