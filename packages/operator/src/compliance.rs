//! Restricted address screening
//!
//! Hits are logged under the `compliance` tracing target so they can be
//! routed to their own sink.

use multichain_rs::InboundEvent;
use std::collections::HashSet;
use tracing::warn;

/// Log target for compliance events
pub const COMPLIANCE_TARGET: &str = "compliance";

/// Case-insensitive for hex and bech32 addresses, exact for base58
fn normalize(address: &str) -> String {
    let trimmed = address.trim();
    let lower = trimmed.to_lowercase();
    if lower.starts_with("0x")
        || lower.starts_with("bc1")
        || lower.starts_with("tb1")
        || lower.starts_with("bcrt1")
    {
        lower
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Compliance {
    restricted: HashSet<String>,
}

impl Compliance {
    pub fn new<S: AsRef<str>>(addresses: &[S]) -> Self {
        Self {
            restricted: addresses
                .iter()
                .map(|a| normalize(a.as_ref()))
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn is_restricted(&self, address: &str) -> bool {
        !address.is_empty() && self.restricted.contains(&normalize(address))
    }

    /// Screen an inbound event; logs and returns true on a hit
    pub fn check_inbound(&self, event: &InboundEvent) -> bool {
        let revert_address = event
            .revert_options
            .as_ref()
            .map(|r| r.revert_address.as_str())
            .unwrap_or("");
        let hit = [event.sender.as_str(), event.receiver.as_str(), revert_address]
            .into_iter()
            .find(|a| self.is_restricted(a));

        if let Some(address) = hit {
            warn!(
                target: COMPLIANCE_TARGET,
                chain_id = %event.sender_chain_id,
                tx_hash = %event.tx_hash,
                event_index = event.event_index,
                sender = %event.sender,
                receiver = %event.receiver,
                restricted = %address,
                amount = %event.amount,
                "Restricted address detected in inbound"
            );
            return true;
        }
        false
    }

    /// Screen an outbound receiver; logs and returns true on a hit
    pub fn check_outbound(&self, cctx_index: &str, nonce: u64, receiver: &str) -> bool {
        if self.is_restricted(receiver) {
            warn!(
                target: COMPLIANCE_TARGET,
                cctx_index = %cctx_index,
                nonce,
                receiver = %receiver,
                "Restricted receiver in outbound, cancelling"
            );
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.restricted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.restricted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multichain_rs::RevertOptions;

    fn event(sender: &str, receiver: &str) -> InboundEvent {
        InboundEvent {
            sender_chain_id: multichain_rs::ChainId(1),
            sender: sender.to_string(),
            receiver_chain_id: multichain_rs::ChainId(2),
            receiver: receiver.to_string(),
            amount: 1,
            asset: String::new(),
            memo: Vec::new(),
            coin_type: multichain_rs::CoinType::Gas,
            block_number: 1,
            tx_hash: "0x01".to_string(),
            event_index: 0,
            is_cross_chain_call: false,
            revert_options: None,
        }
    }

    #[test]
    fn test_normalization() {
        let compliance = Compliance::new(&[
            "0xDEADbeef00000000000000000000000000000000",
            "BC1QXY2KGDYGJRSQTZQ2N0YRF2493P83KKFJHX0WLH",
            "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM",
            " ",
        ]);
        assert_eq!(compliance.len(), 3);
        assert!(compliance.is_restricted("0xdeadbeef00000000000000000000000000000000"));
        assert!(compliance.is_restricted("bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh"));
        assert!(compliance.is_restricted("9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM"));
        assert!(!compliance.is_restricted("9wzdxwbbmkg8ztbnmquxvqrayrzzdsgydlvl9zytawwm"));
        assert!(!compliance.is_restricted(""));
    }

    #[test]
    fn test_check_inbound() {
        let compliance = Compliance::new(&["0xbad"]);
        assert!(compliance.check_inbound(&event("0xBAD", "0xok")));
        assert!(compliance.check_inbound(&event("0xok", "0xbad")));
        assert!(!compliance.check_inbound(&event("0xok", "0xfine")));

        let mut with_revert = event("0xok", "0xfine");
        with_revert.revert_options = Some(RevertOptions {
            revert_address: "0xbad".to_string(),
            ..RevertOptions::default()
        });
        assert!(compliance.check_inbound(&with_revert));
    }
}
