//! Ledger client: vote submission and read queries
//!
//! [`HttpLedgerClient`] talks to a `bridge-ledgerd` process;
//! [`LocalLedgerClient`] drives an in-process [`Ledger`] for devnets and tests.
//! Both speak the same [`ExecuteMsg`] / [`QueryMsg`] messages, so the typed
//! helpers on [`LedgerClient`] work for either.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_ledger::server::SharedLedger;
use bridge_ledger::{
    Ballot, ChainParams, CrossChainTx, ExecuteMsg, ExecuteResponse, GasPrice, InboundTracker,
    Ledger, LedgerError, OutboundTracker, QueryMsg, QueryResponse,
};
use multichain_rs::{ChainId, InboundEvent};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerClientError {
    /// Ledger unreachable or replied with something other than a message result
    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("ledger rejected message: {0}")]
    Rejected(LedgerError),

    #[error("unexpected ledger response to {0}")]
    UnexpectedResponse(&'static str),
}

impl LedgerClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerClientError::Transport(_))
    }
}

pub type LedgerClientResult<T> = std::result::Result<T, LedgerClientError>;

/// Read/write access to the ledger on behalf of one operator
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Voter identity used on every message
    fn operator(&self) -> &str;

    async fn execute(&self, msg: ExecuteMsg) -> LedgerClientResult<ExecuteResponse>;

    async fn query(&self, msg: QueryMsg) -> LedgerClientResult<QueryResponse>;

    // ========================================================================
    // Votes
    // ========================================================================

    /// Submit a vote; rejections that retrying can never fix (already
    /// finalized, no longer pending, hash already tracked) count as done
    async fn submit_vote(&self, msg: ExecuteMsg) -> LedgerClientResult<ExecuteResponse> {
        let kind = msg.kind();
        match self.execute(msg).await {
            Ok(resp) => Ok(resp),
            Err(LedgerClientError::Rejected(e)) if e.is_terminal_for_vote() => {
                debug!(kind, reason = %e, "Vote already settled");
                Ok(ExecuteResponse {
                    duplicate: true,
                    ..ExecuteResponse::default()
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn vote_inbound(&self, event: InboundEvent) -> LedgerClientResult<ExecuteResponse> {
        self.submit_vote(ExecuteMsg::VoteInbound {
            voter: self.operator().to_string(),
            event,
        })
        .await
    }

    async fn vote_outbound(
        &self,
        cctx_index: &str,
        chain_id: ChainId,
        nonce: u64,
        outbound_hash: &str,
        observed_height: u64,
        success: bool,
    ) -> LedgerClientResult<ExecuteResponse> {
        self.submit_vote(ExecuteMsg::VoteOutbound {
            voter: self.operator().to_string(),
            cctx_index: cctx_index.to_string(),
            chain_id,
            nonce,
            outbound_hash: outbound_hash.to_string(),
            observed_height,
            success,
        })
        .await
    }

    async fn vote_gas_price(
        &self,
        chain_id: ChainId,
        price: u64,
        priority_fee: u64,
        block_number: u64,
    ) -> LedgerClientResult<ExecuteResponse> {
        self.submit_vote(ExecuteMsg::VoteGasPrice {
            voter: self.operator().to_string(),
            chain_id,
            price,
            priority_fee,
            block_number,
        })
        .await
    }

    async fn vote_nonce(&self, chain_id: ChainId, nonce: u64) -> LedgerClientResult<ExecuteResponse> {
        self.submit_vote(ExecuteMsg::VoteNonce {
            voter: self.operator().to_string(),
            chain_id,
            nonce,
        })
        .await
    }

    async fn vote_outbound_tracker(
        &self,
        chain_id: ChainId,
        nonce: u64,
        hash: &str,
    ) -> LedgerClientResult<ExecuteResponse> {
        self.submit_vote(ExecuteMsg::VoteOutboundTracker {
            reporter: self.operator().to_string(),
            chain_id,
            nonce,
            hash: hash.to_string(),
        })
        .await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    async fn get_block_height(&self) -> LedgerClientResult<u64> {
        match self.query(QueryMsg::GetBlockHeight).await? {
            QueryResponse::BlockHeight(height) => Ok(height),
            _ => Err(LedgerClientError::UnexpectedResponse("get_block_height")),
        }
    }

    /// Pending CCTXs ascending by nonce, plus the total pending count
    async fn get_pending_cctxs(
        &self,
        chain_id: ChainId,
        limit: usize,
    ) -> LedgerClientResult<(Vec<CrossChainTx>, usize)> {
        match self
            .query(QueryMsg::GetPendingCctxs { chain_id, limit })
            .await?
        {
            QueryResponse::PendingCctxs {
                cctxs,
                total_pending,
            } => Ok((cctxs, total_pending)),
            _ => Err(LedgerClientError::UnexpectedResponse("get_pending_cctxs")),
        }
    }

    async fn get_cctx_by_nonce(
        &self,
        chain_id: ChainId,
        nonce: u64,
    ) -> LedgerClientResult<Option<CrossChainTx>> {
        match self
            .query(QueryMsg::GetCctxByNonce { chain_id, nonce })
            .await?
        {
            QueryResponse::Cctx(cctx) => Ok(cctx),
            _ => Err(LedgerClientError::UnexpectedResponse("get_cctx_by_nonce")),
        }
    }

    async fn get_cctx(&self, index: &str) -> LedgerClientResult<Option<CrossChainTx>> {
        match self
            .query(QueryMsg::GetCctx {
                index: index.to_string(),
            })
            .await?
        {
            QueryResponse::Cctx(cctx) => Ok(cctx),
            _ => Err(LedgerClientError::UnexpectedResponse("get_cctx")),
        }
    }

    async fn get_ballot(&self, id: &str) -> LedgerClientResult<Option<Ballot>> {
        match self
            .query(QueryMsg::GetBallotById { id: id.to_string() })
            .await?
        {
            QueryResponse::Ballot(ballot) => Ok(ballot),
            _ => Err(LedgerClientError::UnexpectedResponse("get_ballot_by_id")),
        }
    }

    async fn get_outbound_trackers(
        &self,
        chain_id: ChainId,
    ) -> LedgerClientResult<Vec<OutboundTracker>> {
        match self.query(QueryMsg::GetOutboundTrackers { chain_id }).await? {
            QueryResponse::OutboundTrackers(trackers) => Ok(trackers),
            _ => Err(LedgerClientError::UnexpectedResponse("get_outbound_trackers")),
        }
    }

    async fn get_inbound_trackers(
        &self,
        chain_id: ChainId,
    ) -> LedgerClientResult<Vec<InboundTracker>> {
        match self.query(QueryMsg::GetInboundTrackers { chain_id }).await? {
            QueryResponse::InboundTrackers(trackers) => Ok(trackers),
            _ => Err(LedgerClientError::UnexpectedResponse("get_inbound_trackers")),
        }
    }

    async fn get_chain_params(&self, chain_id: ChainId) -> LedgerClientResult<Option<ChainParams>> {
        match self.query(QueryMsg::GetChainParams { chain_id }).await? {
            QueryResponse::ChainParams(params) => Ok(params),
            _ => Err(LedgerClientError::UnexpectedResponse("get_chain_params")),
        }
    }

    async fn list_chain_params(&self) -> LedgerClientResult<Vec<ChainParams>> {
        match self.query(QueryMsg::ListChainParams).await? {
            QueryResponse::ChainParamsList(params) => Ok(params),
            _ => Err(LedgerClientError::UnexpectedResponse("list_chain_params")),
        }
    }

    async fn get_gas_price(&self, chain_id: ChainId) -> LedgerClientResult<Option<GasPrice>> {
        match self.query(QueryMsg::GetGasPrice { chain_id }).await? {
            QueryResponse::GasPrice(gas) => Ok(gas),
            _ => Err(LedgerClientError::UnexpectedResponse("get_gas_price")),
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Client for a remote `bridge-ledgerd`
pub struct HttpLedgerClient {
    base_url: String,
    operator: String,
    auth_token: Option<String>,
    client: Client,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, operator: &str, auth_token: Option<String>) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| eyre::eyre!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            operator: operator.to_string(),
            auth_token,
            client,
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> LedgerClientResult<Resp>
    where
        Req: serde::Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LedgerClientError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Resp>()
                .await
                .map_err(|e| LedgerClientError::Transport(format!("bad response body: {}", e))),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let err = response
                    .json::<LedgerError>()
                    .await
                    .map_err(|e| LedgerClientError::Transport(format!("bad error body: {}", e)))?;
                Err(LedgerClientError::Rejected(err))
            }
            status => Err(LedgerClientError::Transport(format!(
                "ledger returned HTTP {}",
                status
            ))),
        }
    }
}

impl std::fmt::Debug for HttpLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLedgerClient")
            .field("base_url", &self.base_url)
            .field("operator", &self.operator)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn operator(&self) -> &str {
        &self.operator
    }

    async fn execute(&self, msg: ExecuteMsg) -> LedgerClientResult<ExecuteResponse> {
        self.post("/execute", &msg).await
    }

    async fn query(&self, msg: QueryMsg) -> LedgerClientResult<QueryResponse> {
        self.post("/query", &msg).await
    }
}

// ============================================================================
// In-process
// ============================================================================

/// Client over a shared in-process ledger
#[derive(Clone)]
pub struct LocalLedgerClient {
    ledger: SharedLedger,
    operator: String,
}

impl LocalLedgerClient {
    pub fn new(ledger: SharedLedger, operator: &str) -> Self {
        Self {
            ledger,
            operator: operator.to_string(),
        }
    }

    /// Wrap a fresh ledger
    pub fn from_ledger(ledger: Ledger, operator: &str) -> Self {
        Self::new(Arc::new(RwLock::new(ledger)), operator)
    }

    pub fn shared(&self) -> SharedLedger {
        self.ledger.clone()
    }

    /// Same ledger, different voter identity
    pub fn as_operator(&self, operator: &str) -> Self {
        Self::new(self.ledger.clone(), operator)
    }
}

#[async_trait]
impl LedgerClient for LocalLedgerClient {
    fn operator(&self) -> &str {
        &self.operator
    }

    async fn execute(&self, msg: ExecuteMsg) -> LedgerClientResult<ExecuteResponse> {
        self.ledger
            .write()
            .await
            .execute(msg)
            .map_err(LedgerClientError::Rejected)
    }

    async fn query(&self, msg: QueryMsg) -> LedgerClientResult<QueryResponse> {
        self.ledger
            .read()
            .await
            .query(&msg)
            .map_err(LedgerClientError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_ledger::LedgerConfig;
    use multichain_rs::{ChainFamily, CoinType};

    fn local() -> LocalLedgerClient {
        let ledger = Ledger::new(LedgerConfig::new(1, &["alice"], &["alice"]).unwrap())
            .with_chain_params(vec![
                ChainParams::default_for(ChainId(1), ChainFamily::Evm, "0xgw1"),
                ChainParams::default_for(ChainId(2), ChainFamily::Evm, "0xgw2"),
            ])
            .unwrap();
        LocalLedgerClient::from_ledger(ledger, "alice")
    }

    fn event() -> InboundEvent {
        InboundEvent {
            sender_chain_id: ChainId(1),
            sender: "0xs".to_string(),
            receiver_chain_id: ChainId(2),
            receiver: "0xr".to_string(),
            amount: 100,
            asset: String::new(),
            memo: Vec::new(),
            coin_type: CoinType::Gas,
            block_number: 10,
            tx_hash: "0xaa".to_string(),
            event_index: 0,
            is_cross_chain_call: false,
            revert_options: None,
        }
    }

    #[tokio::test]
    async fn test_local_vote_and_query() {
        let client = local();
        let resp = client.vote_inbound(event()).await.unwrap();
        assert!(resp.finalized);

        // a finalized inbound is settled, not an error
        let again = client.vote_inbound(event()).await.unwrap();
        assert!(again.duplicate);

        let (cctxs, total) = client.get_pending_cctxs(ChainId(2), 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(cctxs[0].inbound.tx_hash, "0xaa");

        let by_nonce = client.get_cctx_by_nonce(ChainId(2), 0).await.unwrap();
        assert_eq!(by_nonce.map(|c| c.index), Some(cctxs[0].index.clone()));
        assert_eq!(client.get_block_height().await.unwrap(), 1);
        assert_eq!(client.list_chain_params().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_observer_rejected() {
        let client = local().as_operator("mallory");
        let err = client
            .vote_gas_price(ChainId(1), 10, 0, 5)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerClientError::Rejected(LedgerError::NotObserver("mallory".to_string()))
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_http_unreachable_is_transient() {
        let client = HttpLedgerClient::new("http://127.0.0.1:1", "alice", None).unwrap();
        let err = client.get_block_height().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_http_token_must_match_operator() {
        use bridge_ledger::server::{self, AppState, Metrics};
        use std::collections::HashMap;
        use tokio::sync::{watch, RwLock};

        let ledger = Ledger::new(LedgerConfig::new(1, &["alice", "bob"], &[]).unwrap())
            .with_chain_params(vec![ChainParams::default_for(ChainId(1), ChainFamily::Evm, "0xgw1")])
            .unwrap();
        let state = AppState {
            ledger: Arc::new(RwLock::new(ledger)),
            metrics: Arc::new(Metrics::new()),
            api_tokens: Arc::new(HashMap::from([("alice-token".to_string(), "alice".to_string())])),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(server::serve(listener, state, stop_rx));

        let alice = HttpLedgerClient::new(&base, "alice", Some("alice-token".to_string())).unwrap();
        alice.vote_gas_price(ChainId(1), 10, 0, 5).await.unwrap();

        let bob = HttpLedgerClient::new(&base, "bob", Some("alice-token".to_string())).unwrap();
        let err = bob.vote_gas_price(ChainId(1), 10, 0, 5).await.unwrap_err();
        assert!(matches!(err, LedgerClientError::Rejected(LedgerError::Unauthorized(_))));
        assert!(!err.is_transient());

        stop.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
