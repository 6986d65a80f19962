//! Chain nonce votes

use multichain_rs::ChainId;
use tracing::info;

use crate::ballot::{ballot_digest, ObservationType, VoteOutcome};
use crate::error::LedgerResult;
use crate::keeper::Ledger;
use crate::msg::ExecuteResponse;
use crate::state::ChainNonce;

pub fn nonce_ballot_index(chain_id: ChainId, nonce: u64) -> String {
    ballot_digest(
        ObservationType::ChainNonce,
        &[&chain_id.to_be_bytes(), &nonce.to_be_bytes()],
    )
}

impl Ledger {
    /// Agree on the next nonce observed on-chain. The counter only moves forward.
    pub(crate) fn vote_nonce(
        &mut self,
        voter: &str,
        chain_id: ChainId,
        nonce: u64,
    ) -> LedgerResult<ExecuteResponse> {
        self.ensure_observer(voter)?;
        self.ensure_supported(chain_id)?;

        let index = nonce_ballot_index(chain_id, nonce);
        let (outcome, finalized) =
            self.cast_vote(&index, ObservationType::ChainNonce, chain_id, voter);

        if finalized {
            let height = self.height;
            let entry = self.chain_nonces.entry(chain_id).or_insert(ChainNonce {
                chain_id,
                next_nonce: 0,
                finalized_height: height,
            });
            if nonce > entry.next_nonce {
                entry.next_nonce = nonce;
            }
            entry.finalized_height = height;
            info!(chain_id = %chain_id, next_nonce = entry.next_nonce, "Chain nonce finalized");
        }

        Ok(ExecuteResponse {
            ballot_index: Some(index),
            duplicate: outcome == VoteOutcome::Duplicate,
            finalized,
            cctx_index: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::LedgerConfig;
    use crate::state::ChainParams;
    use multichain_rs::ChainFamily;

    fn ledger() -> Ledger {
        Ledger::new(LedgerConfig::new(2, &["a", "b"], &[]).unwrap())
            .with_chain_params(vec![ChainParams::default_for(
                ChainId(1),
                ChainFamily::Evm,
                "0xgw",
            )])
            .unwrap()
    }

    #[test]
    fn test_nonce_vote_moves_counter_forward() {
        let mut ledger = ledger();
        assert!(!ledger.vote_nonce("a", ChainId(1), 7).unwrap().finalized);
        assert!(ledger.vote_nonce("b", ChainId(1), 7).unwrap().finalized);
        assert_eq!(ledger.chain_nonces[&ChainId(1)].next_nonce, 7);
        assert_eq!(ledger.assign_nonce(ChainId(1), "x"), 7);

        // a lower agreed value never moves the counter back
        ledger.vote_nonce("a", ChainId(1), 3).unwrap();
        ledger.vote_nonce("b", ChainId(1), 3).unwrap();
        assert_eq!(ledger.chain_nonces[&ChainId(1)].next_nonce, 8);
    }
}
