//! Mock Deposit Helpers
//!
//! Builders for inbound events and the observed transactions that carry them.

use crate::types::{ChainId, CoinType, InboundEvent, ObservedTx, ScanCursor};

/// Builder for creating mock inbound events
#[derive(Debug, Clone)]
pub struct MockDepositBuilder {
    sender_chain: u64,
    receiver_chain: u64,
    sender: String,
    receiver: String,
    amount: u128,
    asset: String,
    memo: Vec<u8>,
    coin_type: CoinType,
    block_number: u64,
    tx_hash: String,
    event_index: u32,
}

impl Default for MockDepositBuilder {
    fn default() -> Self {
        Self {
            sender_chain: 1,
            receiver_chain: 2,
            sender: "0x1111111111111111111111111111111111111111".to_string(),
            receiver: "0x2222222222222222222222222222222222222222".to_string(),
            amount: 1_000_000,
            asset: String::new(),
            memo: Vec::new(),
            coin_type: CoinType::Gas,
            block_number: 100,
            tx_hash: format!("0x{}", "ab".repeat(32)),
            event_index: 0,
        }
    }
}

impl MockDepositBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender_chain(mut self, id: u64) -> Self {
        self.sender_chain = id;
        self
    }

    pub fn receiver_chain(mut self, id: u64) -> Self {
        self.receiver_chain = id;
        self
    }

    pub fn sender(mut self, sender: &str) -> Self {
        self.sender = sender.to_string();
        self
    }

    pub fn receiver(mut self, receiver: &str) -> Self {
        self.receiver = receiver.to_string();
        self
    }

    pub fn amount(mut self, amount: u128) -> Self {
        self.amount = amount;
        self
    }

    /// Token deposit of `asset`
    pub fn token(mut self, asset: &str) -> Self {
        self.asset = asset.to_string();
        self.coin_type = CoinType::FungibleToken;
        self
    }

    pub fn coin_type(mut self, coin_type: CoinType) -> Self {
        self.coin_type = coin_type;
        self
    }

    pub fn memo(mut self, memo: &[u8]) -> Self {
        self.memo = memo.to_vec();
        self
    }

    pub fn block(mut self, block_number: u64) -> Self {
        self.block_number = block_number;
        self
    }

    pub fn tx_hash(mut self, tx_hash: &str) -> Self {
        self.tx_hash = tx_hash.to_string();
        self
    }

    pub fn event_index(mut self, index: u32) -> Self {
        self.event_index = index;
        self
    }

    pub fn build(self) -> InboundEvent {
        InboundEvent {
            sender_chain_id: ChainId(self.sender_chain),
            sender: self.sender,
            receiver_chain_id: ChainId(self.receiver_chain),
            receiver: self.receiver,
            amount: self.amount,
            asset: self.asset,
            is_cross_chain_call: !self.memo.is_empty(),
            memo: self.memo,
            coin_type: self.coin_type,
            block_number: self.block_number,
            tx_hash: self.tx_hash,
            event_index: self.event_index,
            revert_options: None,
        }
    }
}

/// Wrap events of one transaction as scanned at a block-indexed chain
pub fn observed_tx(events: Vec<InboundEvent>) -> ObservedTx {
    let first = events.first();
    let hash = first.map(|e| e.tx_hash.clone()).unwrap_or_default();
    let block_number = first.map(|e| e.block_number).unwrap_or_default();
    ObservedTx {
        hash,
        block_number,
        cursor: ScanCursor::Block(block_number.saturating_sub(1)),
        failed: false,
        events,
        anomalies: Vec::new(),
    }
}

/// Generate `count` single-deposit transactions in consecutive blocks
pub fn generate_mock_deposits(
    sender_chain: u64,
    receiver_chain: u64,
    count: u64,
    base_amount: u128,
) -> Vec<ObservedTx> {
    (1..=count)
        .map(|i| {
            observed_tx(vec![MockDepositBuilder::new()
                .sender_chain(sender_chain)
                .receiver_chain(receiver_chain)
                .amount(base_amount * i as u128)
                .block(100 + i)
                .tx_hash(&format!("0x{:064x}", i))
                .build()])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let event = MockDepositBuilder::new().memo(b"call").build();
        assert_eq!(event.sender_chain_id, ChainId(1));
        assert_eq!(event.coin_type, CoinType::Gas);
        assert!(event.is_cross_chain_call);
    }

    #[test]
    fn test_generate_mock_deposits() {
        let txs = generate_mock_deposits(1, 2, 3, 100);
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[2].events[0].amount, 300);
        assert_eq!(txs[2].block_number, 103);
        assert_eq!(txs[2].cursor, ScanCursor::Block(102));
        assert_ne!(txs[0].hash, txs[1].hash);
    }
}
