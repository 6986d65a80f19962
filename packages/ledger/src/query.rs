//! Read-only query handlers

use multichain_rs::ChainId;

use crate::error::LedgerResult;
use crate::keeper::Ledger;
use crate::msg::{QueryMsg, QueryResponse};
use crate::state::CrossChainTx;

pub(crate) fn handle(ledger: &Ledger, msg: &QueryMsg) -> LedgerResult<QueryResponse> {
    Ok(match msg {
        QueryMsg::GetBlockHeight => QueryResponse::BlockHeight(ledger.height),
        QueryMsg::GetPendingCctxs { chain_id, limit } => {
            let (cctxs, total_pending) = pending_cctxs(ledger, *chain_id, *limit);
            QueryResponse::PendingCctxs {
                cctxs,
                total_pending,
            }
        }
        QueryMsg::GetCctxByNonce { chain_id, nonce } => QueryResponse::Cctx(
            ledger
                .nonce_to_cctx
                .get(&(*chain_id, *nonce))
                .and_then(|index| ledger.cctxs.get(index))
                .cloned(),
        ),
        QueryMsg::GetCctx { index } => QueryResponse::Cctx(ledger.cctxs.get(index).cloned()),
        QueryMsg::GetBallotById { id } => QueryResponse::Ballot(ledger.ballots.get(id).cloned()),
        QueryMsg::GetOutboundTrackers { chain_id } => QueryResponse::OutboundTrackers(
            ledger
                .outbound_trackers
                .range((*chain_id, 0)..=(*chain_id, u64::MAX))
                .map(|(_, t)| t.clone())
                .collect(),
        ),
        QueryMsg::GetInboundTrackers { chain_id } => QueryResponse::InboundTrackers(
            ledger
                .inbound_trackers
                .values()
                .filter(|t| t.chain_id == *chain_id)
                .cloned()
                .collect(),
        ),
        QueryMsg::GetChainParams { chain_id } => {
            QueryResponse::ChainParams(ledger.chain_params.get(chain_id).cloned())
        }
        QueryMsg::ListChainParams => {
            QueryResponse::ChainParamsList(ledger.chain_params.values().cloned().collect())
        }
        QueryMsg::GetGasPrice { chain_id } => {
            QueryResponse::GasPrice(ledger.gas_prices.get(chain_id).cloned())
        }
        QueryMsg::GetChainNonce { chain_id } => {
            QueryResponse::ChainNonce(ledger.chain_nonces.get(chain_id).copied())
        }
    })
}

/// CCTXs holding an unconsumed nonce on `chain_id`, ascending by nonce
fn pending_cctxs(ledger: &Ledger, chain_id: ChainId, limit: usize) -> (Vec<CrossChainTx>, usize) {
    let Some(nonces) = ledger.pending_nonces.get(&chain_id) else {
        return (Vec::new(), 0);
    };
    let cctxs = nonces
        .iter()
        .filter_map(|nonce| ledger.nonce_to_cctx.get(&(chain_id, *nonce)))
        .filter_map(|index| ledger.cctxs.get(index))
        .take(limit)
        .cloned()
        .collect();
    (cctxs, nonces.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::LedgerConfig;
    use crate::msg::ExecuteMsg;
    use crate::state::{CctxStatus, ChainParams};
    use multichain_rs::{ChainFamily, CoinType, InboundEvent};

    fn event(tx: &str) -> InboundEvent {
        InboundEvent {
            sender_chain_id: ChainId(1),
            sender: "S".to_string(),
            receiver_chain_id: ChainId(2),
            receiver: "R".to_string(),
            amount: 10,
            asset: String::new(),
            memo: Vec::new(),
            coin_type: CoinType::Gas,
            block_number: 100,
            tx_hash: tx.to_string(),
            event_index: 0,
            is_cross_chain_call: false,
            revert_options: None,
        }
    }

    #[test]
    fn test_pending_cctxs_sorted_by_nonce() {
        let mut ledger = Ledger::new(LedgerConfig::new(1, &["a"], &["admin"]).unwrap())
            .with_chain_params(vec![
                ChainParams::default_for(ChainId(1), ChainFamily::Evm, "0xgw"),
                ChainParams::default_for(ChainId(2), ChainFamily::Evm, "0xgw2"),
            ])
            .unwrap();
        for tx in ["0x03", "0x01", "0x02"] {
            ledger
                .execute(ExecuteMsg::VoteInbound {
                    voter: "a".to_string(),
                    event: event(tx),
                })
                .unwrap();
        }

        let QueryResponse::PendingCctxs {
            cctxs,
            total_pending,
        } = ledger
            .query(&QueryMsg::GetPendingCctxs {
                chain_id: ChainId(2),
                limit: 2,
            })
            .unwrap()
        else {
            panic!("unexpected response");
        };
        assert_eq!(total_pending, 3);
        assert_eq!(cctxs.len(), 2);
        assert_eq!(cctxs[0].inbound.tx_hash, "0x03");
        assert_eq!(cctxs[0].current_outbound().unwrap().nonce, 0);
        assert_eq!(cctxs[1].current_outbound().unwrap().nonce, 1);

        // aborted with an unconsumed nonce stays schedulable
        let index = cctxs[0].index.clone();
        ledger
            .execute(ExecuteMsg::AbortCctx {
                admin: "admin".to_string(),
                index: index.clone(),
                reason: "compliance".to_string(),
            })
            .unwrap();
        let QueryResponse::Cctx(Some(cctx)) = ledger
            .query(&QueryMsg::GetCctxByNonce {
                chain_id: ChainId(2),
                nonce: 0,
            })
            .unwrap()
        else {
            panic!("unexpected response");
        };
        assert_eq!(cctx.status, CctxStatus::Aborted);
        assert!(cctx.is_cancelled());
        let QueryResponse::PendingCctxs { total_pending, .. } = ledger
            .query(&QueryMsg::GetPendingCctxs {
                chain_id: ChainId(2),
                limit: 10,
            })
            .unwrap()
        else {
            panic!("unexpected response");
        };
        assert_eq!(total_pending, 3);
    }

    #[test]
    fn test_block_height_and_missing_records() {
        let ledger = Ledger::new(LedgerConfig::new(1, &["a"], &[]).unwrap());
        assert_eq!(
            ledger.query(&QueryMsg::GetBlockHeight).unwrap(),
            QueryResponse::BlockHeight(1)
        );
        assert_eq!(
            ledger
                .query(&QueryMsg::GetCctx {
                    index: "0x00".to_string()
                })
                .unwrap(),
            QueryResponse::Cctx(None)
        );
        assert_eq!(
            ledger
                .query(&QueryMsg::GetPendingCctxs {
                    chain_id: ChainId(9),
                    limit: 5
                })
                .unwrap(),
            QueryResponse::PendingCctxs {
                cctxs: Vec::new(),
                total_pending: 0
            }
        );
    }
}
