//! Hash helpers shared by ballots, signers and chain codecs
//!
//! - keccak256 for ballot digests, EVM addresses and Solana gateway messages
//! - double SHA-256 for Bitcoin txids and merkle trees
//! - Anchor instruction discriminators for the Solana gateway

use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// keccak256 over several byte slices without concatenating them first
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Single SHA-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&digest);
    output
}

/// SHA-256 applied twice (Bitcoin txids, merkle nodes, sighashes)
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// First 8 bytes of `sha256("global:<name>")`, the Anchor instruction tag
pub fn anchor_discriminator(instruction: &str) -> [u8; 8] {
    let digest = sha256(format!("global:{}", instruction).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Convert 32 bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 0x-prefixed (or bare) 32-byte hex string
pub fn hex_to_bytes32(s: &str) -> Option<[u8; 32]> {
    let raw = hex::decode(s.trim_start_matches("0x")).ok()?;
    raw.try_into().ok()
}

/// EVM address of an uncompressed secp256k1 public key (65 bytes, 0x04 prefix)
pub fn evm_address_from_uncompressed(pubkey: &[u8]) -> Option<[u8; 20]> {
    if pubkey.len() != 65 || pubkey[0] != 0x04 {
        return None;
    }
    let hash = keccak256(&pubkey[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Some(out)
}
