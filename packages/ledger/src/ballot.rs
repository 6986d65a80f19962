//! Ballots: threshold aggregation of observer votes
//!
//! A ballot is keyed by a digest of the fact it votes on, so observers that
//! independently see the same fact land on the same ballot. Finalization is
//! one-shot: once `finalized_height` is set it never changes.

use multichain_rs::{keccak256, ChainId};
use serde::{Deserialize, Serialize};

/// Fact a ballot aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    InboundTx,
    OutboundTx,
    ChainNonce,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::InboundTx => "inbound_tx",
            ObservationType::OutboundTx => "outbound_tx",
            ObservationType::ChainNonce => "chain_nonce",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote from this voter
    Added,
    /// Voter had already voted; nothing changed
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub index: String,
    pub observation_type: ObservationType,
    pub chain_id: ChainId,
    pub voters: Vec<String>,
    pub created_height: u64,
    /// Host height at which quorum was reached; 0 while open
    pub finalized_height: u64,
}

impl Ballot {
    pub fn new(
        index: String,
        observation_type: ObservationType,
        chain_id: ChainId,
        height: u64,
    ) -> Self {
        Self {
            index,
            observation_type,
            chain_id,
            voters: Vec::new(),
            created_height: height,
            finalized_height: 0,
        }
    }

    pub fn has_voted(&self, voter: &str) -> bool {
        self.voters.iter().any(|v| v == voter)
    }

    /// Record a vote; a voter never counts twice
    pub fn add_vote(&mut self, voter: &str) -> VoteOutcome {
        if self.has_voted(voter) {
            return VoteOutcome::Duplicate;
        }
        self.voters.push(voter.to_string());
        VoteOutcome::Added
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized_height > 0
    }

    /// Finalize if quorum is reached for the first time. Returns true only on
    /// the call that finalizes.
    pub fn try_finalize(&mut self, threshold: usize, height: u64) -> bool {
        if self.is_finalized() || self.voters.len() < threshold {
            return false;
        }
        self.finalized_height = height.max(1);
        true
    }
}

/// Content digest of a fact: keccak256 over length-prefixed fields
pub fn ballot_digest(observation_type: ObservationType, fields: &[&[u8]]) -> String {
    let mut buf = Vec::new();
    buf.extend_from_slice(observation_type.as_str().as_bytes());
    for field in fields {
        buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
        buf.extend_from_slice(field);
    }
    format!("0x{}", hex::encode(keccak256(&buf)))
}

/// Index of the median value. Even lengths take the lower-middle element;
/// equal values keep submission order.
pub fn median_index(values: &[u64]) -> Option<usize> {
    if values.is_empty() {
        return None;
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by_key(|&i| (values[i], i));
    Some(order[(values.len() - 1) / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ballot() -> Ballot {
        Ballot::new("0x01".to_string(), ObservationType::InboundTx, ChainId(1), 10)
    }

    #[test]
    fn test_duplicate_vote_not_counted() {
        let mut b = ballot();
        assert_eq!(b.add_vote("alice"), VoteOutcome::Added);
        assert_eq!(b.add_vote("alice"), VoteOutcome::Duplicate);
        assert_eq!(b.voters.len(), 1);
        assert!(!b.try_finalize(2, 11));
        assert!(!b.is_finalized());
    }

    #[test]
    fn test_finalizes_once() {
        let mut b = ballot();
        b.add_vote("alice");
        b.add_vote("bob");
        assert!(b.try_finalize(2, 11));
        assert_eq!(b.finalized_height, 11);

        b.add_vote("carol");
        assert!(!b.try_finalize(2, 12));
        assert_eq!(b.finalized_height, 11);
        assert_eq!(b.voters.len(), 3);
    }

    #[test]
    fn test_threshold_one() {
        let mut b = ballot();
        b.add_vote("alice");
        assert!(b.try_finalize(1, 0));
        assert!(b.is_finalized());
    }

    #[test]
    fn test_median_index() {
        assert_eq!(median_index(&[]), None);
        assert_eq!(median_index(&[5, 9, 1]), Some(0));
        assert_eq!(median_index(&[5, 9]), Some(0));
        assert_eq!(median_index(&[9, 5]), Some(1));
        assert_eq!(median_index(&[7, 7, 7, 7]), Some(1));
        assert_eq!(median_index(&[4, 1, 3, 2]), Some(3));
    }

    #[test]
    fn test_digest_is_field_separated() {
        let a = ballot_digest(ObservationType::InboundTx, &[b"ab", b"c"]);
        let b = ballot_digest(ObservationType::InboundTx, &[b"a", b"bc"]);
        let c = ballot_digest(ObservationType::OutboundTx, &[b"ab", b"c"]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, ballot_digest(ObservationType::InboundTx, &[b"ab", b"c"]));
        assert_eq!(a.len(), 66);
    }
}
