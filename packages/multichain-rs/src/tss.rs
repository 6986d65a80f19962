//! Threshold signature capability
//!
//! The TSS protocol itself runs outside this process; signers only see
//! [`TssSigner`]. [`LocalTssSigner`] is a single-key stand-in used on devnets
//! and in tests; it never leaves the process and is redacted from `Debug`.

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::hash::{evm_address_from_uncompressed, keccak256};
use crate::types::ChainId;

/// Errors from a signing round
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TssError {
    #[error("keysign failed for chain {chain_id} nonce {nonce}: {reason}")]
    KeysignFailed {
        chain_id: ChainId,
        nonce: u64,
        reason: String,
    },

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Bookkeeping attached to each signing round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundMetadata {
    /// Host chain height the round was started at
    pub height: u64,
    pub nonce: u64,
    pub chain_id: ChainId,
}

/// ECDSA signature split into `(R, S, V)`; `v` is the recovery id (0 or 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TssSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl TssSignature {
    /// 65-byte `R || S || V` form
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// 64-byte `R || S` form
    pub fn rs(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.r);
        out[32..].copy_from_slice(&self.s);
        out
    }

    /// Recover the EVM address that produced this signature over `digest`
    pub fn recover_address(&self, digest: &[u8; 32]) -> Result<[u8; 20], TssError> {
        let signature = Signature::from_slice(&self.rs())
            .map_err(|e| TssError::InvalidKey(format!("bad signature: {}", e)))?;
        let recovery_id = RecoveryId::from_byte(self.v)
            .ok_or_else(|| TssError::InvalidKey(format!("bad recovery id {}", self.v)))?;
        let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
            .map_err(|e| TssError::InvalidKey(format!("recovery failed: {}", e)))?;
        let uncompressed = key.to_encoded_point(false);
        evm_address_from_uncompressed(uncompressed.as_bytes())
            .ok_or_else(|| TssError::InvalidKey("unexpected public key encoding".to_string()))
    }
}

/// Signs digests on behalf of the validator set without exposing a key
#[async_trait]
pub trait TssSigner: Send + Sync {
    /// Sign a 32-byte digest. Signatures are low-S normalized.
    async fn sign(&self, digest: &[u8; 32], round: &RoundMetadata)
        -> Result<TssSignature, TssError>;

    /// Compressed SEC1 public key (33 bytes)
    fn pubkey(&self) -> Vec<u8>;

    /// EVM-style address of the TSS key
    fn evm_address(&self) -> [u8; 20];

    /// 0x-prefixed hex EVM address
    fn address(&self) -> String {
        format!("0x{}", hex::encode(self.evm_address()))
    }
}

/// Single-key signer standing in for a TSS party set
pub struct LocalTssSigner {
    key: SigningKey,
}

impl LocalTssSigner {
    /// Build from a 32-byte hex secret (with or without 0x)
    pub fn from_hex(secret: &str) -> Result<Self, TssError> {
        let bytes = hex::decode(secret.trim().trim_start_matches("0x"))
            .map_err(|e| TssError::InvalidKey(format!("not hex: {}", e)))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|e| TssError::InvalidKey(format!("not a secp256k1 scalar: {}", e)))?;
        Ok(Self { key })
    }

    fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }
}

impl fmt::Debug for LocalTssSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTssSigner")
            .field("address", &self.address())
            .field("key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TssSigner for LocalTssSigner {
    async fn sign(
        &self,
        digest: &[u8; 32],
        round: &RoundMetadata,
    ) -> Result<TssSignature, TssError> {
        let (signature, recovery_id) =
            self.key
                .sign_prehash_recoverable(digest)
                .map_err(|e| TssError::KeysignFailed {
                    chain_id: round.chain_id,
                    nonce: round.nonce,
                    reason: e.to_string(),
                })?;

        let (signature, recovery_id) = match signature.normalize_s() {
            Some(normalized) => (
                normalized,
                RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced()),
            ),
            None => (signature, recovery_id),
        };

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        tracing::debug!(
            chain_id = %round.chain_id,
            nonce = round.nonce,
            height = round.height,
            digest = %hex::encode(digest),
            "Local keysign complete"
        );

        Ok(TssSignature {
            r,
            s,
            v: recovery_id.to_byte(),
        })
    }

    fn pubkey(&self) -> Vec<u8> {
        self.verifying_key().to_encoded_point(true).as_bytes().to_vec()
    }

    fn evm_address(&self) -> [u8; 20] {
        let uncompressed = self.verifying_key().to_encoded_point(false);
        evm_address_from_uncompressed(uncompressed.as_bytes()).unwrap_or([0u8; 20])
    }
}

/// keccak256 of a message, the digest TSS signs for gateway messages
pub fn message_digest(message: &[u8]) -> [u8; 32] {
    keccak256(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anvil's first dev account
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    #[test]
    fn test_address_from_key() {
        let signer = LocalTssSigner::from_hex(DEV_KEY).unwrap();
        assert_eq!(signer.address(), DEV_ADDRESS);
        assert_eq!(signer.pubkey().len(), 33);
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(LocalTssSigner::from_hex("zz").is_err());
        assert!(LocalTssSigner::from_hex("00").is_err());
    }

    #[tokio::test]
    async fn test_sign_and_recover() {
        let signer = LocalTssSigner::from_hex(DEV_KEY).unwrap();
        let digest = message_digest(b"withdraw 1000");
        let round = RoundMetadata {
            height: 10,
            nonce: 4,
            chain_id: ChainId(1),
        };
        let sig = signer.sign(&digest, &round).await.unwrap();
        assert!(sig.v <= 1);
        assert_eq!(sig.recover_address(&digest).unwrap(), signer.evm_address());

        let other = message_digest(b"withdraw 1001");
        assert_ne!(sig.recover_address(&other).unwrap(), signer.evm_address());
    }

    #[test]
    fn test_debug_redacts_key() {
        let signer = LocalTssSigner::from_hex(DEV_KEY).unwrap();
        let debug = format!("{:?}", signer);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(DEV_KEY));
    }
}
