//! End-to-end flows through the ledger keeper and its HTTP façade

use std::collections::HashMap;
use std::sync::Arc;

use bridge_ledger::server::{self, AppState, Metrics};
use bridge_ledger::{
    CctxStatus, ChainParams, CrossChainTx, ExecuteMsg, ExecuteResponse, Ledger, LedgerConfig,
    LedgerError, QueryMsg, QueryResponse,
};
use multichain_rs::{ChainFamily, ChainId, CoinType, InboundEvent, RevertOptions};
use tokio::sync::{watch, RwLock};

const EVM_A: ChainId = ChainId(1);
const EVM_B: ChainId = ChainId(2);
const OBSERVERS: [&str; 3] = ["alice", "bob", "carol"];

fn ledger() -> Ledger {
    Ledger::new(LedgerConfig::new(2, &OBSERVERS, &["admin"]).unwrap())
        .with_chain_params(vec![
            ChainParams::default_for(EVM_A, ChainFamily::Evm, "0xgatewaya"),
            ChainParams::default_for(EVM_B, ChainFamily::Evm, "0xgatewayb"),
        ])
        .unwrap()
}

fn deposit(tx_hash: &str, amount: u128) -> InboundEvent {
    InboundEvent {
        sender_chain_id: EVM_A,
        sender: "0xsender".to_string(),
        receiver_chain_id: EVM_B,
        receiver: "0xreceiver".to_string(),
        amount,
        asset: String::new(),
        memo: Vec::new(),
        coin_type: CoinType::Gas,
        block_number: 500,
        tx_hash: tx_hash.to_string(),
        event_index: 0,
        is_cross_chain_call: false,
        revert_options: None,
    }
}

fn vote_inbound(ledger: &mut Ledger, voter: &str, event: &InboundEvent) -> ExecuteResponse {
    ledger
        .execute(ExecuteMsg::VoteInbound {
            voter: voter.to_string(),
            event: event.clone(),
        })
        .unwrap()
}

fn finalize_inbound(ledger: &mut Ledger, event: &InboundEvent) -> String {
    vote_inbound(ledger, "alice", event);
    vote_inbound(ledger, "bob", event).cctx_index.unwrap()
}

fn vote_outbound(
    ledger: &mut Ledger,
    voter: &str,
    cctx: &CrossChainTx,
    hash: &str,
    success: bool,
) -> Result<ExecuteResponse, LedgerError> {
    let outbound = cctx.current_outbound().unwrap();
    ledger.execute(ExecuteMsg::VoteOutbound {
        voter: voter.to_string(),
        cctx_index: cctx.index.clone(),
        chain_id: outbound.receiver_chain_id,
        nonce: outbound.nonce,
        outbound_hash: hash.to_string(),
        observed_height: 900,
        success,
    })
}

fn cctx(ledger: &Ledger, index: &str) -> CrossChainTx {
    match ledger
        .query(&QueryMsg::GetCctx {
            index: index.to_string(),
        })
        .unwrap()
    {
        QueryResponse::Cctx(Some(cctx)) => cctx,
        other => panic!("unexpected response {:?}", other),
    }
}

fn pending(ledger: &Ledger, chain_id: ChainId) -> Vec<CrossChainTx> {
    match ledger
        .query(&QueryMsg::GetPendingCctxs {
            chain_id,
            limit: 100,
        })
        .unwrap()
    {
        QueryResponse::PendingCctxs { cctxs, .. } => cctxs,
        other => panic!("unexpected response {:?}", other),
    }
}

#[test]
fn test_deposit_to_confirmed() {
    let mut ledger = ledger();
    for (voter, price) in [("alice", 30), ("bob", 10), ("carol", 20)] {
        ledger
            .execute(ExecuteMsg::VoteGasPrice {
                voter: voter.to_string(),
                chain_id: EVM_B,
                price,
                priority_fee: 1,
                block_number: 77,
            })
            .unwrap();
    }

    let index = finalize_inbound(&mut ledger, &deposit("0xd1", 1_000));
    let created = cctx(&ledger, &index);
    assert_eq!(created.status, CctxStatus::PendingOutbound);
    let outbound = created.current_outbound().unwrap();
    assert_eq!(outbound.nonce, 0);
    assert_eq!(outbound.gas_price, 20);
    assert_eq!(pending(&ledger, EVM_B).len(), 1);

    ledger
        .execute(ExecuteMsg::VoteOutboundTracker {
            reporter: "carol".to_string(),
            chain_id: EVM_B,
            nonce: 0,
            hash: "0xout".to_string(),
        })
        .unwrap();
    let mined = cctx(&ledger, &index);
    assert_eq!(mined.status, CctxStatus::OutboundMined);
    assert_eq!(mined.current_outbound().unwrap().hash, "0xout");

    assert!(!vote_outbound(&mut ledger, "alice", &mined, "0xout", true)
        .unwrap()
        .finalized);
    assert!(vote_outbound(&mut ledger, "bob", &mined, "0xout", true)
        .unwrap()
        .finalized);

    let confirmed = cctx(&ledger, &index);
    assert_eq!(confirmed.status, CctxStatus::Confirmed);
    assert!(confirmed.current_outbound().unwrap().nonce_consumed);
    assert!(pending(&ledger, EVM_B).is_empty());
    assert_eq!(
        ledger
            .query(&QueryMsg::GetOutboundTrackers { chain_id: EVM_B })
            .unwrap(),
        QueryResponse::OutboundTrackers(Vec::new())
    );

    // the third observer's late vote is accepted without side effects
    let late = vote_outbound(&mut ledger, "carol", &mined, "0xout", true).unwrap();
    assert!(!late.finalized);
    assert_eq!(cctx(&ledger, &index).status, CctxStatus::Confirmed);
}

#[test]
fn test_nonces_are_gapless_per_chain() {
    let mut ledger = ledger();
    let nonces: Vec<u64> = (0..5)
        .map(|i| {
            let index = finalize_inbound(&mut ledger, &deposit(&format!("0xd{}", i), 10));
            cctx(&ledger, &index).current_outbound().unwrap().nonce
        })
        .collect();
    assert_eq!(nonces, vec![0, 1, 2, 3, 4]);

    let pending_nonces: Vec<u64> = pending(&ledger, EVM_B)
        .iter()
        .map(|c| c.current_outbound().unwrap().nonce)
        .collect();
    assert_eq!(pending_nonces, nonces);
}

#[test]
fn test_failed_outbound_reverts_to_sender() {
    let mut ledger = ledger();
    let mut event = deposit("0xd2", 5_000);
    event.revert_options = Some(RevertOptions {
        revert_address: "0xrefund".to_string(),
        ..Default::default()
    });
    let index = finalize_inbound(&mut ledger, &event);
    let created = cctx(&ledger, &index);

    vote_outbound(&mut ledger, "alice", &created, "0xfail", false).unwrap();
    vote_outbound(&mut ledger, "carol", &created, "0xfail", false).unwrap();

    let reverting = cctx(&ledger, &index);
    assert_eq!(reverting.status, CctxStatus::PendingRevert);
    assert_eq!(reverting.outbound.len(), 2);
    let revert = reverting.current_outbound().unwrap();
    assert_eq!(revert.receiver_chain_id, EVM_A);
    assert_eq!(revert.receiver, "0xrefund");
    assert_eq!(revert.amount, 5_000);
    assert_eq!(revert.nonce, 0);
    assert_eq!(pending(&ledger, EVM_A).len(), 1);
    assert!(pending(&ledger, EVM_B).is_empty());

    vote_outbound(&mut ledger, "alice", &reverting, "0xrevert", true).unwrap();
    vote_outbound(&mut ledger, "bob", &reverting, "0xrevert", true).unwrap();
    assert_eq!(cctx(&ledger, &index).status, CctxStatus::Reverted);
    assert!(pending(&ledger, EVM_A).is_empty());
}

#[test]
fn test_failed_revert_aborts() {
    let mut ledger = ledger();
    let index = finalize_inbound(&mut ledger, &deposit("0xd3", 1));
    let created = cctx(&ledger, &index);
    vote_outbound(&mut ledger, "alice", &created, "0x1", false).unwrap();
    vote_outbound(&mut ledger, "bob", &created, "0x1", false).unwrap();

    let reverting = cctx(&ledger, &index);
    vote_outbound(&mut ledger, "alice", &reverting, "0x2", false).unwrap();
    vote_outbound(&mut ledger, "bob", &reverting, "0x2", false).unwrap();
    assert_eq!(cctx(&ledger, &index).status, CctxStatus::Aborted);
}

#[test]
fn test_aborted_cctx_keeps_nonce_until_cancelled() {
    let mut ledger = ledger();
    let index = finalize_inbound(&mut ledger, &deposit("0xd4", 1));
    ledger
        .execute(ExecuteMsg::AbortCctx {
            admin: "admin".to_string(),
            index: index.clone(),
            reason: "restricted receiver".to_string(),
        })
        .unwrap();

    let aborted = cctx(&ledger, &index);
    assert_eq!(aborted.status, CctxStatus::Aborted);
    assert!(aborted.is_cancelled());
    assert_eq!(pending(&ledger, EVM_B).len(), 1);

    // the cancel transaction burns the nonce; the status stays aborted
    vote_outbound(&mut ledger, "alice", &aborted, "0xcancel", false).unwrap();
    vote_outbound(&mut ledger, "bob", &aborted, "0xcancel", false).unwrap();
    let burned = cctx(&ledger, &index);
    assert_eq!(burned.status, CctxStatus::Aborted);
    assert!(burned.current_outbound().unwrap().nonce_consumed);
    assert!(pending(&ledger, EVM_B).is_empty());
}

#[test]
fn test_nonce_votes_only_move_forward() {
    let mut ledger = ledger();
    for voter in ["alice", "bob"] {
        ledger
            .execute(ExecuteMsg::VoteNonce {
                voter: voter.to_string(),
                chain_id: EVM_B,
                nonce: 12,
            })
            .unwrap();
    }
    let index = finalize_inbound(&mut ledger, &deposit("0xd5", 1));
    assert_eq!(cctx(&ledger, &index).current_outbound().unwrap().nonce, 12);

    for voter in ["alice", "bob"] {
        ledger
            .execute(ExecuteMsg::VoteNonce {
                voter: voter.to_string(),
                chain_id: EVM_B,
                nonce: 3,
            })
            .unwrap();
    }
    match ledger
        .query(&QueryMsg::GetChainNonce { chain_id: EVM_B })
        .unwrap()
    {
        QueryResponse::ChainNonce(Some(n)) => assert_eq!(n.next_nonce, 13),
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test]
async fn test_http_facade() {
    let shared = Arc::new(RwLock::new(ledger()));
    let state = AppState {
        ledger: shared.clone(),
        metrics: Arc::new(Metrics::new()),
        api_tokens: Arc::default(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(server::serve(listener, state, shutdown_rx));

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);
    let event = deposit("0xhttp", 42);

    for voter in ["alice", "bob"] {
        let resp = client
            .post(format!("{}/execute", base))
            .json(&ExecuteMsg::VoteInbound {
                voter: voter.to_string(),
                event: event.clone(),
            })
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }

    let rejected = client
        .post(format!("{}/execute", base))
        .json(&ExecuteMsg::VoteInbound {
            voter: "mallory".to_string(),
            event: event.clone(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);
    let err: LedgerError = rejected.json().await.unwrap();
    assert_eq!(err, LedgerError::NotObserver("mallory".to_string()));

    let resp: QueryResponse = client
        .post(format!("{}/query", base))
        .json(&QueryMsg::GetPendingCctxs {
            chain_id: EVM_B,
            limit: 10,
        })
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    match resp {
        QueryResponse::PendingCctxs {
            cctxs,
            total_pending,
        } => {
            assert_eq!(total_pending, 1);
            assert_eq!(cctxs[0].inbound.amount, 42);
        }
        other => panic!("unexpected response {:?}", other),
    }

    let metrics = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("ledger_messages_total"));

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_http_execute_requires_matching_token() {
    let shared = Arc::new(RwLock::new(ledger()));
    let tokens = HashMap::from([
        ("alice-token".to_string(), "alice".to_string()),
        ("bob-token".to_string(), "bob".to_string()),
    ]);
    let state = AppState {
        ledger: shared.clone(),
        metrics: Arc::new(Metrics::new()),
        api_tokens: Arc::new(tokens),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(server::serve(listener, state, shutdown_rx));

    let client = reqwest::Client::new();
    let url = format!("http://{}/execute", addr);
    let vote = |voter: &str| ExecuteMsg::VoteInbound {
        voter: voter.to_string(),
        event: deposit("0xauth", 7),
    };

    let anonymous = client.post(&url).json(&vote("alice")).send().await.unwrap();
    assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);

    // bob's token cannot cast alice's vote
    let spoofed = client
        .post(&url)
        .bearer_auth("bob-token")
        .json(&vote("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(spoofed.status(), reqwest::StatusCode::FORBIDDEN);
    let err: LedgerError = spoofed.json().await.unwrap();
    assert!(matches!(err, LedgerError::Unauthorized(_)));

    for (token, voter) in [("alice-token", "alice"), ("bob-token", "bob")] {
        let resp = client
            .post(&url)
            .bearer_auth(token)
            .json(&vote(voter))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }
    let pending = shared
        .read()
        .await
        .query(&QueryMsg::GetPendingCctxs {
            chain_id: EVM_B,
            limit: 10,
        })
        .unwrap();
    match pending {
        QueryResponse::PendingCctxs { total_pending, .. } => assert_eq!(total_pending, 1),
        other => panic!("unexpected response {:?}", other),
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
