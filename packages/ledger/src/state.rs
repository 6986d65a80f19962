//! Records stored by the ledger

use multichain_rs::{ChainFamily, ChainId, CoinType, RevertOptions};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ballot::median_index;
use crate::error::{LedgerError, LedgerResult};

// ============================================================================
// Cross-chain transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CctxStatus {
    PendingInbound,
    PendingOutbound,
    OutboundMined,
    Confirmed,
    PendingRevert,
    Reverted,
    Aborted,
}

impl CctxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CctxStatus::PendingInbound => "pending_inbound",
            CctxStatus::PendingOutbound => "pending_outbound",
            CctxStatus::OutboundMined => "outbound_mined",
            CctxStatus::Confirmed => "confirmed",
            CctxStatus::PendingRevert => "pending_revert",
            CctxStatus::Reverted => "reverted",
            CctxStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CctxStatus::Confirmed | CctxStatus::Reverted | CctxStatus::Aborted
        )
    }

    /// Whether an outbound leg is expected to be signed in this status
    pub fn awaits_outbound(&self) -> bool {
        matches!(
            self,
            CctxStatus::PendingOutbound | CctxStatus::OutboundMined | CctxStatus::PendingRevert
        )
    }
}

impl fmt::Display for CctxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundParams {
    pub sender: String,
    pub sender_chain_id: ChainId,
    pub tx_hash: String,
    pub event_index: u32,
    pub amount: u128,
    pub asset: String,
    pub coin_type: CoinType,
    #[serde(with = "multichain_rs::types::hex_bytes")]
    pub memo: Vec<u8>,
    /// External block the event was observed at
    pub observed_height: u64,
    /// Host height the inbound ballot finalized at
    pub finalized_height: u64,
    pub ballot_index: String,
    pub is_cross_chain_call: bool,
    pub revert_options: Option<RevertOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundParams {
    pub receiver: String,
    pub receiver_chain_id: ChainId,
    pub amount: u128,
    pub asset: String,
    pub coin_type: CoinType,
    pub nonce: u64,
    pub gas_price: u64,
    pub priority_fee: u64,
    pub gas_limit: u64,
    /// Hash of the broadcast transaction, first reported or finally voted
    pub hash: String,
    /// External block the outbound was confirmed at
    pub observed_height: u64,
    pub ballot_index: String,
    /// Nonce used on-chain (by delivery or by a cancel transaction)
    pub nonce_consumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainTx {
    /// Digest of the inbound ballot
    pub index: String,
    pub status: CctxStatus,
    pub status_message: String,
    pub inbound: InboundParams,
    /// Outbound legs; the last one is current (a revert appends a leg)
    pub outbound: Vec<OutboundParams>,
    pub created_height: u64,
    pub last_update_height: u64,
}

impl CrossChainTx {
    pub fn current_outbound(&self) -> Option<&OutboundParams> {
        self.outbound.last()
    }

    pub fn current_outbound_mut(&mut self) -> Option<&mut OutboundParams> {
        self.outbound.last_mut()
    }

    /// Whether the current outbound should deliver nothing and only burn its nonce
    pub fn is_cancelled(&self) -> bool {
        self.status == CctxStatus::Aborted
    }

    pub fn set_status(&mut self, status: CctxStatus, message: impl Into<String>, height: u64) {
        self.status = status;
        self.status_message = message.into();
        self.last_update_height = height;
    }
}

// ============================================================================
// Per-chain facts
// ============================================================================

/// Next outbound nonce to assign on a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainNonce {
    pub chain_id: ChainId,
    pub next_nonce: u64,
    pub finalized_height: u64,
}

/// Gas price samples per voter; the median is recomputed on every vote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasPrice {
    pub chain_id: ChainId,
    pub signers: Vec<String>,
    pub prices: Vec<u64>,
    pub priority_fees: Vec<u64>,
    pub block_nums: Vec<u64>,
    pub median_index: usize,
}

impl GasPrice {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            signers: Vec::new(),
            prices: Vec::new(),
            priority_fees: Vec::new(),
            block_nums: Vec::new(),
            median_index: 0,
        }
    }

    /// Insert or replace the voter's sample, then recompute the median
    pub fn vote(&mut self, signer: &str, price: u64, priority_fee: u64, block_number: u64) {
        match self.signers.iter().position(|s| s == signer) {
            Some(i) => {
                self.prices[i] = price;
                self.priority_fees[i] = priority_fee;
                self.block_nums[i] = block_number;
            }
            None => {
                self.signers.push(signer.to_string());
                self.prices.push(price);
                self.priority_fees.push(priority_fee);
                self.block_nums.push(block_number);
            }
        }
        self.median_index = median_index(&self.prices).unwrap_or(0);
    }

    pub fn median_price(&self) -> u64 {
        self.prices.get(self.median_index).copied().unwrap_or(0)
    }

    /// Block reported by the voter that contributed the median price
    pub fn median_block(&self) -> u64 {
        self.block_nums.get(self.median_index).copied().unwrap_or(0)
    }

    /// Median over priority fees on their own
    pub fn median_priority_fee(&self) -> u64 {
        median_index(&self.priority_fees)
            .map(|i| self.priority_fees[i])
            .unwrap_or(0)
    }
}

// ============================================================================
// Chain params
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub chain_id: ChainId,
    pub family: ChainFamily,
    pub confirmation_count: u64,
    /// Seconds
    pub gas_price_ticker: u64,
    pub inbound_ticker: u64,
    pub outbound_ticker: u64,
    pub watch_utxo_ticker: u64,
    /// Host blocks between scheduling turns of the same nonce
    pub outbound_schedule_interval: u64,
    /// Pending CCTXs considered per scheduling round
    pub outbound_schedule_lookahead: u64,
    /// Gateway contract / program; TSS address on Bitcoin
    pub gateway_address: String,
    pub default_gas_limit: u64,
    pub is_supported: bool,
}

impl ChainParams {
    /// Defaults for a devnet chain of the given family
    pub fn default_for(chain_id: ChainId, family: ChainFamily, gateway_address: &str) -> Self {
        let (confirmation_count, default_gas_limit) = match family {
            ChainFamily::Evm => (2, 100_000),
            ChainFamily::Bitcoin => (1, 0),
            ChainFamily::Solana => (1, 0),
        };
        Self {
            chain_id,
            family,
            confirmation_count,
            gas_price_ticker: 30,
            inbound_ticker: 6,
            outbound_ticker: 6,
            watch_utxo_ticker: if family == ChainFamily::Bitcoin { 30 } else { 0 },
            outbound_schedule_interval: 1,
            outbound_schedule_lookahead: 50,
            gateway_address: gateway_address.to_string(),
            default_gas_limit,
            is_supported: true,
        }
    }

    /// Maximum nonce distance from the earliest pending nonce: ceil(lookahead * 1.1)
    pub fn outbound_schedule_lookback(&self) -> u64 {
        (self.outbound_schedule_lookahead * 11).div_ceil(10)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        let invalid = |msg: String| Err(LedgerError::InvalidChainParams(msg));

        if self.confirmation_count == 0 {
            return invalid("confirmation_count must be greater than 0".to_string());
        }
        for (name, value) in [
            ("gas_price_ticker", self.gas_price_ticker),
            ("inbound_ticker", self.inbound_ticker),
            ("outbound_ticker", self.outbound_ticker),
        ] {
            if !(1..=300).contains(&value) {
                return invalid(format!("{} must be in 1..=300, got {}", name, value));
            }
        }
        if self.watch_utxo_ticker > 300 {
            return invalid(format!(
                "watch_utxo_ticker must be at most 300, got {}",
                self.watch_utxo_ticker
            ));
        }
        if !(1..=100).contains(&self.outbound_schedule_interval) {
            return invalid(format!(
                "outbound_schedule_interval must be in 1..=100, got {}",
                self.outbound_schedule_interval
            ));
        }
        if !(1..=500).contains(&self.outbound_schedule_lookahead) {
            return invalid(format!(
                "outbound_schedule_lookahead must be in 1..=500, got {}",
                self.outbound_schedule_lookahead
            ));
        }
        if self.gateway_address.trim().is_empty() {
            return invalid("gateway_address cannot be empty".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Trackers
// ============================================================================

/// Inbound hash flagged for re-observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTracker {
    pub chain_id: ChainId,
    pub tx_hash: String,
    pub coin_type: CoinType,
    pub reporter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerHash {
    pub hash: String,
    pub reporter: String,
}

/// Broadcast hashes reported for one outbound nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundTracker {
    pub chain_id: ChainId,
    pub nonce: u64,
    pub cctx_index: String,
    pub hashes: Vec<TrackerHash>,
}

impl OutboundTracker {
    pub const MAX_HASHES: usize = 5;

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.iter().any(|h| h.hash == hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gas_price_median_tracks_block() {
        let mut gas = GasPrice::new(ChainId(1));
        gas.vote("a", 5, 1, 100);
        gas.vote("b", 9, 2, 101);
        gas.vote("c", 1, 3, 102);
        assert_eq!(gas.median_price(), 5);
        assert_eq!(gas.median_block(), 100);
        assert_eq!(gas.median_priority_fee(), 2);

        // resubmission replaces the voter's sample
        gas.vote("a", 20, 1, 110);
        assert_eq!(gas.signers.len(), 3);
        assert_eq!(gas.median_price(), 9);
        assert_eq!(gas.median_block(), 101);
    }

    #[test]
    fn test_gas_price_even_takes_lower_middle() {
        let mut gas = GasPrice::new(ChainId(1));
        gas.vote("a", 5, 0, 100);
        gas.vote("b", 9, 0, 200);
        assert_eq!(gas.median_price(), 5);
        assert_eq!(gas.median_block(), 100);
    }

    #[test]
    fn test_chain_params_validation() {
        let mut params = ChainParams::default_for(ChainId(1), ChainFamily::Evm, "0xgateway");
        assert!(params.validate().is_ok());
        assert_eq!(params.outbound_schedule_lookback(), 55);

        params.outbound_schedule_lookahead = 1;
        assert_eq!(params.outbound_schedule_lookback(), 2);

        params.confirmation_count = 0;
        assert!(params.validate().is_err());
        params.confirmation_count = 1;

        params.inbound_ticker = 301;
        assert!(params.validate().is_err());
        params.inbound_ticker = 6;

        params.outbound_schedule_interval = 0;
        assert!(params.validate().is_err());
        params.outbound_schedule_interval = 1;

        params.gateway_address = " ".to_string();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_status_flags() {
        assert!(CctxStatus::Aborted.is_terminal());
        assert!(!CctxStatus::PendingRevert.is_terminal());
        assert!(CctxStatus::OutboundMined.awaits_outbound());
        assert_eq!(CctxStatus::PendingOutbound.to_string(), "pending_outbound");
    }
}
