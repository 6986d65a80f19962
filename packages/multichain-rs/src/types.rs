//! Common types for cross-chain observation and signing
//!
//! These types are shared by the ledger (which stores what was agreed) and the
//! operator (which observes and signs).

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Chain identity
// ============================================================================

/// Numeric chain identifier (EIP-155 style for EVM chains, registry-assigned
/// for Bitcoin and Solana networks).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const fn new(id: u64) -> Self {
        ChainId(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Big-endian encoding used inside signed messages
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        ChainId(id)
    }
}

impl FromStr for ChainId {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(ChainId)
            .map_err(|e| eyre!("invalid chain id '{}': {}", s, e))
    }
}

/// Family of an external chain; selects the adapter implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Bitcoin,
    Solana,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Bitcoin => "bitcoin",
            ChainFamily::Solana => "solana",
        }
    }

    /// Whether the chain scans by transaction signature rather than block range
    pub fn is_signature_indexed(&self) -> bool {
        matches!(self, ChainFamily::Solana)
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainFamily {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "evm" => Ok(ChainFamily::Evm),
            "bitcoin" | "btc" => Ok(ChainFamily::Bitcoin),
            "solana" | "sol" => Ok(ChainFamily::Solana),
            other => Err(eyre!("unknown chain family: {}", other)),
        }
    }
}

// ============================================================================
// Inbound events
// ============================================================================

/// What an inbound event moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinType {
    /// Native gas token of the source chain
    Gas,
    /// Fungible token (ERC20 / SPL)
    FungibleToken,
    /// Contract call only, no value attached
    NoAssetCall,
}

impl CoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoinType::Gas => "gas",
            CoinType::FungibleToken => "fungible_token",
            CoinType::NoAssetCall => "no_asset_call",
        }
    }

    /// Whether a zero amount makes the transfer malformed
    pub fn carries_value(&self) -> bool {
        !matches!(self, CoinType::NoAssetCall)
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revert handling requested by the depositor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertOptions {
    /// Where funds go back to if the destination leg fails (empty = sender)
    pub revert_address: String,
    pub call_on_revert: bool,
    #[serde(with = "hex_bytes")]
    pub revert_message: Vec<u8>,
    pub revert_gas_limit: u64,
}

/// One observed deposit or call on an external chain.
///
/// Uniquely identified by `(sender_chain_id, tx_hash, event_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub sender_chain_id: ChainId,
    pub sender: String,
    pub receiver_chain_id: ChainId,
    pub receiver: String,
    pub amount: u128,
    /// Token address or mint; empty for the native gas token
    pub asset: String,
    #[serde(with = "hex_bytes")]
    pub memo: Vec<u8>,
    pub coin_type: CoinType,
    pub block_number: u64,
    pub tx_hash: String,
    pub event_index: u32,
    #[serde(default)]
    pub is_cross_chain_call: bool,
    #[serde(default)]
    pub revert_options: Option<RevertOptions>,
}

impl InboundEvent {
    /// Stable identity of the event across observers
    pub fn key(&self) -> (ChainId, &str, u32) {
        (self.sender_chain_id, self.tx_hash.as_str(), self.event_index)
    }
}

// ============================================================================
// Scanning
// ============================================================================

/// Position of the inbound scan on an external chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScanCursor {
    /// Nothing scanned yet; the adapter decides where to begin
    Unset,
    /// Last fully scanned block (block-indexed chains)
    Block(u64),
    /// Last fully scanned transaction signature (signature-indexed chains)
    Signature(String),
}

impl ScanCursor {
    /// Encode for the local cursor store
    pub fn encode(&self) -> String {
        match self {
            ScanCursor::Unset => String::new(),
            ScanCursor::Block(n) => n.to_string(),
            ScanCursor::Signature(sig) => sig.clone(),
        }
    }

    /// Decode a stored cursor; digits are block numbers, anything else a signature
    pub fn decode(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            ScanCursor::Unset
        } else if let Ok(n) = raw.parse::<u64>() {
            ScanCursor::Block(n)
        } else {
            ScanCursor::Signature(raw.to_string())
        }
    }

    pub fn block(&self) -> Option<u64> {
        match self {
            ScanCursor::Block(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanCursor::Unset => f.write_str("<unset>"),
            ScanCursor::Block(n) => write!(f, "block {}", n),
            ScanCursor::Signature(s) => write!(f, "sig {}", s),
        }
    }
}

/// A candidate transaction found while scanning, with its decoded events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTx {
    pub hash: String,
    pub block_number: u64,
    /// Cursor to persist once this transaction is fully voted
    pub cursor: ScanCursor,
    /// On-chain execution failed; skipped entirely
    pub failed: bool,
    /// Events in on-chain order
    pub events: Vec<InboundEvent>,
    /// Decoding problems and duplicate events of the same kind
    pub anomalies: Vec<String>,
}

/// Result of one `filter_events` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBatch {
    pub txs: Vec<ObservedTx>,
    /// Cursor after the whole window, including transactions with no events
    pub end_cursor: ScanCursor,
}

impl ScanBatch {
    pub fn empty(cursor: ScanCursor) -> Self {
        Self {
            txs: Vec::new(),
            end_cursor: cursor,
        }
    }
}

// ============================================================================
// Fees and outbound
// ============================================================================

/// Fee sample reported by a chain adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    /// Gas price in wei, sat/vB or lamports per signature
    pub price: u64,
    /// Priority fee (EIP-1559 tip, Solana compute-unit price), zero if n/a
    pub priority_fee: u64,
    /// Block or slot the sample was taken at
    pub block_number: u64,
}

/// Inclusion state of a broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    NotFound,
    /// Known to the node but not yet in a block
    Pending,
    Included {
        block_number: u64,
        confirmations: u64,
        /// Executed and delivered; false for reverted and nonce-only transactions
        success: bool,
    },
}

impl TxStatus {
    pub fn is_included(&self) -> bool {
        matches!(self, TxStatus::Included { .. })
    }
}

/// What an outbound transaction does with the nonce it consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    /// Deliver funds (and payload) to the receiver
    Withdraw,
    /// Consume the nonce without delivering anything
    IncrementNonce,
}

/// Everything a chain adapter needs to build an outbound transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub cctx_index: String,
    pub chain_id: ChainId,
    pub nonce: u64,
    pub receiver: String,
    pub amount: u128,
    pub asset: String,
    pub coin_type: CoinType,
    pub gas_price: u64,
    pub priority_fee: u64,
    pub gas_limit: u64,
    /// Gateway contract / program, or the TSS address on Bitcoin
    pub gateway: String,
    /// Host chain height, recorded in the signing round metadata
    pub height: u64,
    pub kind: OutboundKind,
}

impl OutboundRequest {
    /// Whether the transaction only consumes the nonce
    pub fn is_nonce_only(&self) -> bool {
        self.kind == OutboundKind::IncrementNonce || self.amount == 0
    }
}

/// A signed, broadcast-ready outbound transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub chain_id: ChainId,
    pub nonce: u64,
    pub kind: OutboundKind,
    /// Hash / txid / signature the chain will know the transaction by
    pub hash: String,
    pub raw: Vec<u8>,
}

/// Receiver bytes as a chain-native string: 20 bytes are an EVM address,
/// 32 bytes a Solana pubkey, anything else is taken as UTF-8 (Bitcoin)
pub fn format_receiver(bytes: &[u8]) -> String {
    match bytes.len() {
        20 => format!("0x{}", hex::encode(bytes)),
        32 => bs58::encode(bytes).into_string(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Donation marker: inbound memos equal to this are accepted on-chain but never relayed
pub const DONATION_MESSAGE: &str = "I am rich!";

/// Serde helper for byte vectors as hex strings
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_family_parse() {
        assert_eq!("evm".parse::<ChainFamily>().unwrap(), ChainFamily::Evm);
        assert_eq!("BTC".parse::<ChainFamily>().unwrap(), ChainFamily::Bitcoin);
        assert_eq!("solana".parse::<ChainFamily>().unwrap(), ChainFamily::Solana);
        assert!("cosmos".parse::<ChainFamily>().is_err());
        assert!(ChainFamily::Solana.is_signature_indexed());
        assert!(!ChainFamily::Evm.is_signature_indexed());
    }

    #[test]
    fn test_scan_cursor_encoding() {
        assert_eq!(ScanCursor::decode(""), ScanCursor::Unset);
        assert_eq!(ScanCursor::decode("1200"), ScanCursor::Block(1200));
        assert_eq!(
            ScanCursor::decode("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb"),
            ScanCursor::Signature("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb".to_string())
        );
        assert_eq!(ScanCursor::Block(7).encode(), "7");
        assert_eq!(ScanCursor::Unset.encode(), "");
    }

    #[test]
    fn test_inbound_event_json_uses_hex_memo() {
        let event = InboundEvent {
            sender_chain_id: ChainId(1),
            sender: "0xabc".to_string(),
            receiver_chain_id: ChainId(2),
            receiver: "0xdef".to_string(),
            amount: 1000,
            asset: String::new(),
            memo: b"hi".to_vec(),
            coin_type: CoinType::Gas,
            block_number: 100,
            tx_hash: "0x01".to_string(),
            event_index: 0,
            is_cross_chain_call: false,
            revert_options: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["memo"], "6869");
        assert_eq!(json["coin_type"], "gas");
        let back: InboundEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_nonce_only_request() {
        let mut request = OutboundRequest {
            cctx_index: "0x01".to_string(),
            chain_id: ChainId(1),
            nonce: 3,
            receiver: "0xdef".to_string(),
            amount: 10,
            asset: String::new(),
            coin_type: CoinType::Gas,
            gas_price: 1,
            priority_fee: 0,
            gas_limit: 21_000,
            gateway: String::new(),
            height: 9,
            kind: OutboundKind::Withdraw,
        };
        assert!(!request.is_nonce_only());
        request.amount = 0;
        assert!(request.is_nonce_only());
        request.amount = 10;
        request.kind = OutboundKind::IncrementNonce;
        assert!(request.is_nonce_only());
    }
}
