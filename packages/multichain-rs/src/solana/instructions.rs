//! Gateway program instruction layouts (Borsh, Anchor discriminators)
//!
//! Inbound instructions are decoded from transactions touching the gateway;
//! outbound instructions carry a TSS signature over a keccak256 message:
//! - withdraw: `chain_id || nonce || amount || to` (u64s big-endian, `to` 32 bytes)
//! - increment_nonce: `"increment_nonce" || chain_id || nonce || amount`

use borsh::{BorshDeserialize, BorshSerialize};

use crate::hash::{anchor_discriminator, keccak256};
use crate::types::ChainId;

/// PDA seed of the gateway state account
pub const PDA_SEED: &[u8] = b"meta";

pub fn discriminator_deposit() -> [u8; 8] {
    anchor_discriminator("deposit")
}

pub fn discriminator_deposit_spl() -> [u8; 8] {
    anchor_discriminator("deposit_spl")
}

pub fn discriminator_withdraw() -> [u8; 8] {
    anchor_discriminator("withdraw")
}

pub fn discriminator_increment_nonce() -> [u8; 8] {
    anchor_discriminator("increment_nonce")
}

/// `deposit` / `deposit_spl` arguments
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DepositParams {
    pub discriminator: [u8; 8],
    /// Lamports, or token base units for SPL deposits
    pub amount: u64,
    pub receiver_chain_id: u64,
    pub receiver: Vec<u8>,
    pub memo: Vec<u8>,
}

/// `withdraw` / `increment_nonce` arguments
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedOutboundParams {
    pub discriminator: [u8; 8],
    pub amount: u64,
    pub signature: [u8; 64],
    pub recovery_id: u8,
    pub message_hash: [u8; 32],
    pub nonce: u64,
}

/// Gateway instruction recognized by the observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayInstruction {
    Deposit(DepositParams),
    DepositSpl(DepositParams),
    Withdraw(SignedOutboundParams),
    IncrementNonce(SignedOutboundParams),
}

impl GatewayInstruction {
    /// Decode by discriminator; trailing bytes are tolerated
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let mut tag = [0u8; 8];
        tag.copy_from_slice(&data[..8]);
        let mut reader = data;
        if tag == discriminator_deposit() {
            DepositParams::deserialize(&mut reader).ok().map(Self::Deposit)
        } else if tag == discriminator_deposit_spl() {
            DepositParams::deserialize(&mut reader)
                .ok()
                .map(Self::DepositSpl)
        } else if tag == discriminator_withdraw() {
            SignedOutboundParams::deserialize(&mut reader)
                .ok()
                .map(Self::Withdraw)
        } else if tag == discriminator_increment_nonce() {
            SignedOutboundParams::deserialize(&mut reader)
                .ok()
                .map(Self::IncrementNonce)
        } else {
            None
        }
    }
}

pub fn withdraw_message(chain_id: ChainId, nonce: u64, amount: u64, to: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(56);
    message.extend_from_slice(&chain_id.to_be_bytes());
    message.extend_from_slice(&nonce.to_be_bytes());
    message.extend_from_slice(&amount.to_be_bytes());
    message.extend_from_slice(to);
    message
}

pub fn increment_nonce_message(chain_id: ChainId, nonce: u64, amount: u64) -> Vec<u8> {
    let mut message = b"increment_nonce".to_vec();
    message.extend_from_slice(&chain_id.to_be_bytes());
    message.extend_from_slice(&nonce.to_be_bytes());
    message.extend_from_slice(&amount.to_be_bytes());
    message
}

pub fn message_hash(message: &[u8]) -> [u8; 32] {
    keccak256(message)
}
