//! Bitcoin block merkle proofs
//!
//! Hashes are in internal byte order (the reverse of the hex txids RPC
//! returns). A proof is the concatenation of sibling hashes from leaf to root;
//! odd levels pair the last node with itself.

use crate::hash::sha256d;

fn parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| parent(&pair[0], pair.get(1).unwrap_or(&pair[0])))
        .collect()
}

/// Merkle root of a block's transactions
pub fn merkle_root(txids: &[[u8; 32]]) -> Option<[u8; 32]> {
    if txids.is_empty() {
        return None;
    }
    let mut level = txids.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    Some(level[0])
}

/// Sibling path for the transaction at `index`
pub fn build_proof(txids: &[[u8; 32]], index: usize) -> Option<Vec<u8>> {
    if index >= txids.len() {
        return None;
    }
    let mut path = Vec::new();
    let mut level = txids.to_vec();
    let mut position = index;
    while level.len() > 1 {
        let sibling = if position % 2 == 0 {
            level.get(position + 1).unwrap_or(&level[position])
        } else {
            &level[position - 1]
        };
        path.extend_from_slice(sibling);
        level = next_level(&level);
        position /= 2;
    }
    Some(path)
}

/// Check that `tx_hash` sits at `index` under `root`
pub fn prove(tx_hash: &[u8; 32], root: &[u8; 32], path: &[u8], index: usize) -> bool {
    if path.len() % 32 != 0 {
        return false;
    }
    let mut current = *tx_hash;
    let mut position = index;
    for chunk in path.chunks(32) {
        let mut sibling = [0u8; 32];
        sibling.copy_from_slice(chunk);
        current = if position % 2 == 0 {
            parent(&current, &sibling)
        } else {
            parent(&sibling, &current)
        };
        position /= 2;
    }
    position == 0 && current == *root
}

/// Internal-order hash from an RPC hex txid
pub fn txid_to_internal(txid: &str) -> Option<[u8; 32]> {
    let mut bytes: [u8; 32] = hex::decode(txid).ok()?.try_into().ok()?;
    bytes.reverse();
    Some(bytes)
}

/// RPC hex txid from an internal-order hash
pub fn internal_to_txid(hash: &[u8; 32]) -> String {
    let mut bytes = *hash;
    bytes.reverse();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<[u8; 32]> {
        (0..n).map(|i| sha256d(&[i])).collect()
    }

    #[test]
    fn test_single_tx_root_is_txid() {
        let txs = leaves(1);
        assert_eq!(merkle_root(&txs), Some(txs[0]));
        assert_eq!(build_proof(&txs, 0), Some(Vec::new()));
        assert!(prove(&txs[0], &txs[0], &[], 0));
    }

    #[test]
    fn test_proofs_for_every_position() {
        for n in [2u8, 3, 5, 8] {
            let txs = leaves(n);
            let root = merkle_root(&txs).unwrap();
            for (i, tx) in txs.iter().enumerate() {
                let path = build_proof(&txs, i).unwrap();
                assert!(prove(tx, &root, &path, i), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_wrong_index_or_tx_fails() {
        let txs = leaves(4);
        let root = merkle_root(&txs).unwrap();
        let path = build_proof(&txs, 1).unwrap();
        assert!(!prove(&txs[1], &root, &path, 2));
        assert!(!prove(&txs[2], &root, &path, 1));
        assert!(!prove(&txs[1], &root, &path[..40], 1));
        assert_eq!(build_proof(&txs, 4), None);
    }

    #[test]
    fn test_any_flipped_path_bit_fails() {
        for n in [2u8, 3, 5, 7] {
            let txs = leaves(n);
            let root = merkle_root(&txs).unwrap();
            for (i, tx) in txs.iter().enumerate() {
                let path = build_proof(&txs, i).unwrap();
                for bit in 0..path.len() * 8 {
                    let mut tampered = path.clone();
                    tampered[bit / 8] ^= 1 << (bit % 8);
                    assert!(!prove(tx, &root, &tampered, i), "n={} i={} bit={}", n, i, bit);
                }
            }
        }
    }

    #[test]
    fn test_txid_byte_order() {
        let txid = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        let internal = txid_to_internal(txid).unwrap();
        assert_eq!(internal[0], 0x3b);
        assert_eq!(internal_to_txid(&internal), txid);
    }
}
