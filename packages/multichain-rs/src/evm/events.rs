//! Gateway event decoding
//!
//! Gateway events:
//! - `Deposited(address indexed sender, uint64 indexed destChainId, address asset, uint256 amount, bytes receiver, bytes payload)`
//! - `Called(address indexed sender, uint64 indexed destChainId, bytes receiver, bytes payload)`
//!
//! A transaction yields at most one event per kind (native deposit, token
//! deposit, call). Extra events of a kind are reported as anomalies.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolEvent;

use super::contracts::Gateway;
use crate::types::{format_receiver, ChainId, CoinType, InboundEvent, ObservedTx, ScanCursor};

pub fn deposited_topic() -> [u8; 32] {
    Gateway::Deposited::SIGNATURE_HASH.0
}

pub fn called_topic() -> [u8; 32] {
    Gateway::Called::SIGNATURE_HASH.0
}

/// Log fields the decoder needs, detached from the RPC types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

/// Fields shared by both gateway events once decoded
struct GatewayEvent {
    sender: Address,
    dest_chain_id: u64,
    asset: Address,
    amount: U256,
    receiver: Bytes,
    payload: Bytes,
    coin_type: CoinType,
}

fn decode_event(log: &RawLog, is_deposit: bool) -> Result<GatewayEvent, String> {
    let topics = log.topics.iter().copied();
    if is_deposit {
        let event = Gateway::Deposited::decode_raw_log(topics, &log.data, true)
            .map_err(|e| format!("malformed Deposited log: {}", e))?;
        let coin_type = if event.asset.is_zero() {
            CoinType::Gas
        } else {
            CoinType::FungibleToken
        };
        Ok(GatewayEvent {
            sender: event.sender,
            dest_chain_id: event.destChainId,
            asset: event.asset,
            amount: event.amount,
            receiver: event.receiver,
            payload: event.payload,
            coin_type,
        })
    } else {
        let event = Gateway::Called::decode_raw_log(topics, &log.data, true)
            .map_err(|e| format!("malformed Called log: {}", e))?;
        Ok(GatewayEvent {
            sender: event.sender,
            dest_chain_id: event.destChainId,
            asset: Address::ZERO,
            amount: U256::ZERO,
            receiver: event.receiver,
            payload: event.payload,
            coin_type: CoinType::NoAssetCall,
        })
    }
}

/// Decode one gateway log; `Ok(None)` for logs that are not gateway events
pub fn decode_gateway_log(
    sender_chain_id: ChainId,
    log: &RawLog,
) -> Result<Option<InboundEvent>, String> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let is_deposit = *topic0 == deposited_topic();
    if !is_deposit && *topic0 != called_topic() {
        return Ok(None);
    }

    let event = decode_event(log, is_deposit)?;
    let amount = u128::try_from(event.amount).map_err(|_| "amount exceeds u128".to_string())?;
    let event_index = u32::try_from(log.log_index)
        .map_err(|_| format!("log index {} exceeds u32", log.log_index))?;
    let asset = match event.coin_type {
        CoinType::FungibleToken => format!("{:#x}", event.asset),
        _ => String::new(),
    };
    let is_cross_chain_call = event.coin_type == CoinType::NoAssetCall || !event.payload.is_empty();

    Ok(Some(InboundEvent {
        sender_chain_id,
        sender: format!("{:#x}", event.sender),
        receiver_chain_id: ChainId(event.dest_chain_id),
        receiver: format_receiver(&event.receiver),
        amount,
        asset,
        memo: event.payload.to_vec(),
        coin_type: event.coin_type,
        block_number: log.block_number,
        tx_hash: log.tx_hash.clone(),
        event_index,
        is_cross_chain_call,
        revert_options: None,
    }))
}

/// Group decoded logs of one block range into per-transaction observations,
/// in (block, log index) order
pub fn group_logs(sender_chain_id: ChainId, logs: &[RawLog]) -> Vec<ObservedTx> {
    let mut sorted: Vec<&RawLog> = logs.iter().collect();
    sorted.sort_by_key(|l| (l.block_number, l.log_index));

    let mut txs: Vec<ObservedTx> = Vec::new();
    for log in sorted {
        let position = txs.iter().position(|t| t.hash == log.tx_hash);
        let tx = match position {
            Some(i) => &mut txs[i],
            None => {
                txs.push(ObservedTx {
                    hash: log.tx_hash.clone(),
                    block_number: log.block_number,
                    cursor: ScanCursor::Block(log.block_number.saturating_sub(1)),
                    failed: false,
                    events: Vec::new(),
                    anomalies: Vec::new(),
                });
                let last = txs.len() - 1;
                &mut txs[last]
            }
        };

        match decode_gateway_log(sender_chain_id, log) {
            Ok(Some(event)) => {
                if tx.events.iter().any(|e| e.coin_type == event.coin_type) {
                    tx.anomalies.push(format!(
                        "extra {} event at log index {} ignored",
                        event.coin_type, log.log_index
                    ));
                } else {
                    tx.events.push(event);
                }
            }
            Ok(None) => {}
            Err(e) => tx
                .anomalies
                .push(format!("log index {}: {}", log.log_index, e)),
        }
    }

    txs.retain(|t| !t.events.is_empty() || !t.anomalies.is_empty());
    txs
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::LogData;

    const SENDER: [u8; 20] = [0xaa; 20];

    fn raw_log(data: LogData, tx: &str, block_number: u64, log_index: u64) -> RawLog {
        RawLog {
            topics: data.topics().iter().map(|t| t.0).collect(),
            data: data.data.to_vec(),
            block_number,
            tx_hash: tx.to_string(),
            log_index,
        }
    }

    fn deposit_log(tx: &str, index: u64, asset: [u8; 20], amount: u128, payload: &[u8]) -> RawLog {
        let event = Gateway::Deposited {
            sender: Address::from(SENDER),
            destChainId: 7000,
            asset: Address::from(asset),
            amount: U256::from(amount),
            receiver: Bytes::from(vec![0xbb; 20]),
            payload: Bytes::copy_from_slice(payload),
        };
        raw_log(event.encode_log_data(), tx, 100, index)
    }

    #[test]
    fn test_decode_native_deposit() {
        let log = deposit_log("0x01", 3, [0u8; 20], 5_000, b"");
        let event = decode_gateway_log(ChainId(1), &log).unwrap().unwrap();
        assert_eq!(event.coin_type, CoinType::Gas);
        assert_eq!(event.amount, 5_000);
        assert_eq!(event.sender, format!("0x{}", hex::encode(SENDER)));
        assert_eq!(event.receiver, format!("0x{}", hex::encode([0xbb; 20])));
        assert_eq!(event.receiver_chain_id, ChainId(7000));
        assert_eq!(event.event_index, 3);
        assert!(!event.is_cross_chain_call);
        assert!(event.asset.is_empty());
    }

    #[test]
    fn test_decode_token_deposit_with_payload() {
        let log = deposit_log("0x01", 0, [0x11; 20], 42, b"hello world");
        let event = decode_gateway_log(ChainId(1), &log).unwrap().unwrap();
        assert_eq!(event.coin_type, CoinType::FungibleToken);
        assert_eq!(event.asset, format!("0x{}", hex::encode([0x11; 20])));
        assert_eq!(event.memo, b"hello world".to_vec());
        assert!(event.is_cross_chain_call);
    }

    #[test]
    fn test_decode_call() {
        let event = Gateway::Called {
            sender: Address::from(SENDER),
            destChainId: 2,
            receiver: Bytes::from(vec![0x01; 32]),
            payload: Bytes::from_static(b"data"),
        };
        let log = raw_log(event.encode_log_data(), "0x02", 5, 1);
        let event = decode_gateway_log(ChainId(1), &log).unwrap().unwrap();
        assert_eq!(event.coin_type, CoinType::NoAssetCall);
        assert_eq!(event.amount, 0);
        assert_eq!(event.receiver, bs58::encode([0x01; 32]).into_string());
    }

    #[test]
    fn test_unrelated_log_ignored() {
        let log = RawLog {
            topics: vec![crate::hash::keccak256(b"Transfer(address,address,uint256)")],
            data: vec![],
            block_number: 1,
            tx_hash: "0x03".to_string(),
            log_index: 0,
        };
        assert_eq!(decode_gateway_log(ChainId(1), &log).unwrap(), None);
    }

    #[test]
    fn test_truncated_data_is_error() {
        let mut log = deposit_log("0x01", 0, [0u8; 20], 1, b"");
        log.data.truncate(40);
        assert!(decode_gateway_log(ChainId(1), &log).is_err());

        let mut log = deposit_log("0x01", 0, [0u8; 20], 1, b"");
        log.topics.truncate(2);
        assert!(decode_gateway_log(ChainId(1), &log).is_err());
    }

    #[test]
    fn test_hostile_offsets_are_errors() {
        // receiver offset (word 2) and payload length pointing past any buffer
        for (word, value) in [(2usize, u64::MAX), (2, u64::MAX - 31), (3, 1 << 40)] {
            let mut log = deposit_log("0x01", 0, [0u8; 20], 1, b"abc");
            log.data[word * 32 + 24..word * 32 + 32].copy_from_slice(&value.to_be_bytes());
            assert!(decode_gateway_log(ChainId(1), &log).is_err());
        }

        let mut log = deposit_log("0x01", 0, [0u8; 20], 1, b"");
        log.data[2 * 32..3 * 32].fill(0xff);
        assert!(decode_gateway_log(ChainId(1), &log).is_err());
    }

    #[test]
    fn test_oversized_values_become_anomalies() {
        let mut huge_amount = deposit_log("0x01", 0, [0u8; 20], 1, b"");
        huge_amount.data[32..48].fill(0x01);
        assert!(decode_gateway_log(ChainId(1), &huge_amount)
            .unwrap_err()
            .contains("u128"));

        let wide_index = deposit_log("0x02", u64::from(u32::MAX) + 1, [0u8; 20], 1, b"");
        assert!(decode_gateway_log(ChainId(1), &wide_index)
            .unwrap_err()
            .contains("exceeds u32"));

        let txs = group_logs(ChainId(1), &[huge_amount, wide_index]);
        assert_eq!(txs.len(), 2);
        assert!(txs.iter().all(|t| t.events.is_empty() && t.anomalies.len() == 1));
    }

    #[test]
    fn test_group_keeps_first_event_per_kind() {
        let mut later = deposit_log("0x02", 0, [0u8; 20], 40, b"");
        later.block_number = 101;
        let logs = vec![
            later,
            deposit_log("0x01", 4, [0u8; 20], 20, b""),
            deposit_log("0x01", 2, [0u8; 20], 10, b""),
            deposit_log("0x01", 5, [0x11; 20], 30, b""),
        ];
        let txs = group_logs(ChainId(1), &logs);
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].hash, "0x01");
        assert_eq!(txs[0].events.len(), 2);
        assert_eq!(txs[0].events[0].amount, 10);
        assert_eq!(txs[0].events[1].coin_type, CoinType::FungibleToken);
        assert_eq!(txs[0].anomalies.len(), 1);
        assert_eq!(txs[0].cursor, ScanCursor::Block(99));
    }

    #[test]
    fn test_format_receiver() {
        assert_eq!(format_receiver(b"bc1qexample"), "bc1qexample");
        assert!(format_receiver(&[1u8; 20]).starts_with("0x"));
    }
}
