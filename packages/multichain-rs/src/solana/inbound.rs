//! Inbound event extraction from gateway transactions
//!
//! Top-level instructions are scanned first, then inner (CPI) instructions,
//! both in execution order. Only the first `deposit` and the first
//! `deposit_spl` of a transaction are reported; further deposits are
//! recorded as anomalies.

use super::instructions::GatewayInstruction;
use crate::types::{format_receiver, ChainId, CoinType, InboundEvent, ObservedTx, ScanCursor};

/// Compiled instruction with account indexes already resolved to pubkeys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstruction {
    pub program_id: String,
    pub accounts: Vec<String>,
    pub data: Vec<u8>,
}

/// The parts of a fetched transaction the observer needs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedSolanaTx {
    pub signature: String,
    pub slot: u64,
    pub instructions: Vec<ResolvedInstruction>,
    pub inner_instructions: Vec<ResolvedInstruction>,
    pub failed: bool,
    pub logs: Vec<String>,
}

impl ParsedSolanaTx {
    /// Gateway instructions in execution order
    pub fn gateway_instructions<'a>(
        &'a self,
        gateway: &'a str,
    ) -> impl Iterator<Item = (&'a ResolvedInstruction, GatewayInstruction)> + 'a {
        self.instructions
            .iter()
            .chain(self.inner_instructions.iter())
            .filter(move |ix| ix.program_id == gateway)
            .filter_map(|ix| GatewayInstruction::decode(&ix.data).map(|decoded| (ix, decoded)))
    }

    /// Whether this is a nonce-only outbound (increment_nonce on the gateway)
    pub fn is_increment_nonce(&self, gateway: &str) -> bool {
        self.gateway_instructions(gateway)
            .any(|(_, ix)| matches!(ix, GatewayInstruction::IncrementNonce(_)))
    }
}

/// Extract inbound events from one transaction
pub fn parse_inbound(chain_id: ChainId, gateway: &str, tx: &ParsedSolanaTx) -> ObservedTx {
    let mut observed = ObservedTx {
        hash: tx.signature.clone(),
        block_number: tx.slot,
        cursor: ScanCursor::Signature(tx.signature.clone()),
        failed: tx.failed,
        events: Vec::new(),
        anomalies: Vec::new(),
    };
    if tx.failed {
        return observed;
    }

    let mut seen_deposit = false;
    let mut seen_deposit_spl = false;

    for (position, (ix, decoded)) in tx.gateway_instructions(gateway).enumerate() {
        let (params, coin_type, asset) = match decoded {
            GatewayInstruction::Deposit(params) => {
                if seen_deposit {
                    observed
                        .anomalies
                        .push(format!("multiple deposits, instruction {} ignored", position));
                    continue;
                }
                seen_deposit = true;
                (params, CoinType::Gas, String::new())
            }
            GatewayInstruction::DepositSpl(params) => {
                if seen_deposit_spl {
                    observed.anomalies.push(format!(
                        "multiple SPL deposits, instruction {} ignored",
                        position
                    ));
                    continue;
                }
                seen_deposit_spl = true;
                // accounts: [signer, pda, mint, token_program, from, to]
                let Some(mint) = ix.accounts.get(2) else {
                    observed
                        .anomalies
                        .push(format!("deposit_spl {} missing mint account", position));
                    continue;
                };
                (params, CoinType::FungibleToken, mint.clone())
            }
            GatewayInstruction::Withdraw(_) | GatewayInstruction::IncrementNonce(_) => continue,
        };

        let Some(sender) = ix.accounts.first() else {
            observed
                .anomalies
                .push(format!("instruction {} has no signer account", position));
            continue;
        };

        observed.events.push(InboundEvent {
            sender_chain_id: chain_id,
            sender: sender.clone(),
            receiver_chain_id: ChainId(params.receiver_chain_id),
            receiver: format_receiver(&params.receiver),
            amount: params.amount as u128,
            asset,
            is_cross_chain_call: !params.memo.is_empty(),
            memo: params.memo,
            coin_type,
            block_number: tx.slot,
            tx_hash: tx.signature.clone(),
            event_index: observed.events.len() as u32,
            revert_options: None,
        });
    }

    observed
}
