//! In-memory chain adapter
//!
//! Scans a scripted list of transactions, records broadcasts and answers
//! status queries from a table the test controls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::adapter::{AdapterError, AdapterResult, ChainAdapter};
use crate::hash::keccak256;
use crate::tss::{RoundMetadata, TssSigner};
use crate::types::{
    ChainFamily, ChainId, FeeRate, ObservedTx, OutboundKind, OutboundRequest, ScanBatch,
    ScanCursor, SignedTx, TxStatus,
};

#[derive(Debug, Default)]
struct MockState {
    height: u64,
    rpc_down: bool,
    txs: Vec<ObservedTx>,
    statuses: HashMap<String, TxStatus>,
    fee: Option<FeeRate>,
    build_errors: VecDeque<AdapterError>,
    broadcast_errors: VecDeque<AdapterError>,
    builds: Vec<OutboundRequest>,
    broadcasts: Vec<SignedTx>,
    include_on_broadcast: bool,
    outbound_nonce: Option<u64>,
}

/// Scriptable [`ChainAdapter`]
#[derive(Debug)]
pub struct MockChainAdapter {
    chain_id: ChainId,
    family: ChainFamily,
    state: Mutex<MockState>,
}

impl MockChainAdapter {
    pub fn new(chain_id: u64, family: ChainFamily) -> Self {
        Self {
            chain_id: ChainId(chain_id),
            family,
            state: Mutex::new(MockState::default()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn set_height(&self, height: u64) {
        self.with_state(|s| s.height = height);
    }

    /// Make every call fail with a transport error
    pub fn set_rpc_down(&self, down: bool) {
        self.with_state(|s| s.rpc_down = down);
    }

    /// Append a transaction; keep pushes in chain order
    pub fn push_tx(&self, tx: ObservedTx) {
        self.with_state(|s| s.txs.push(tx));
    }

    pub fn set_status(&self, hash: &str, status: TxStatus) {
        self.with_state(|s| {
            s.statuses.insert(hash.to_string(), status);
        });
    }

    pub fn set_fee_rate(&self, fee: FeeRate) {
        self.with_state(|s| s.fee = Some(fee));
    }

    /// Queue an error for the next `build_outbound`
    pub fn fail_next_build(&self, error: AdapterError) {
        self.with_state(|s| s.build_errors.push_back(error));
    }

    /// Queue an error for the next `send_raw_transaction`
    pub fn fail_next_broadcast(&self, error: AdapterError) {
        self.with_state(|s| s.broadcast_errors.push_back(error));
    }

    /// Broadcast transactions are included at the current height right away
    pub fn include_on_broadcast(&self, enabled: bool) {
        self.with_state(|s| s.include_on_broadcast = enabled);
    }

    /// Nonce reported by `get_outbound_nonce`
    pub fn set_outbound_nonce(&self, nonce: Option<u64>) {
        self.with_state(|s| s.outbound_nonce = nonce);
    }

    pub fn builds(&self) -> Vec<OutboundRequest> {
        self.with_state(|s| s.builds.clone())
    }

    pub fn broadcasts(&self) -> Vec<SignedTx> {
        self.with_state(|s| s.broadcasts.clone())
    }

    fn check_rpc(&self) -> AdapterResult<()> {
        if self.with_state(|s| s.rpc_down) {
            return Err(AdapterError::Rpc("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        self.family
    }

    async fn get_block_height(&self) -> AdapterResult<u64> {
        self.check_rpc()?;
        Ok(self.with_state(|s| s.height))
    }

    async fn get_transaction(&self, _gateway: &str, hash: &str) -> AdapterResult<Option<ObservedTx>> {
        self.check_rpc()?;
        Ok(self.with_state(|s| s.txs.iter().find(|t| t.hash == hash).cloned()))
    }

    async fn filter_events(
        &self,
        _gateway: &str,
        from: &ScanCursor,
        to_height: u64,
        limit: usize,
    ) -> AdapterResult<ScanBatch> {
        self.check_rpc()?;
        let limit = limit.max(1);
        let signature_indexed = self.family.is_signature_indexed();

        self.with_state(|s| match from {
            ScanCursor::Unset if signature_indexed => Ok(ScanBatch::empty(
                s.txs
                    .last()
                    .map(|t| ScanCursor::Signature(t.hash.clone()))
                    .unwrap_or(ScanCursor::Unset),
            )),
            ScanCursor::Unset => Ok(ScanBatch::empty(ScanCursor::Block(to_height))),
            ScanCursor::Block(last) => {
                if *last >= to_height {
                    return Ok(ScanBatch::empty(from.clone()));
                }
                let end = to_height.min(last + limit as u64);
                let txs = s
                    .txs
                    .iter()
                    .filter(|t| t.block_number > *last && t.block_number <= end)
                    .cloned()
                    .collect();
                Ok(ScanBatch {
                    txs,
                    end_cursor: ScanCursor::Block(end),
                })
            }
            ScanCursor::Signature(sig) => {
                let start = s
                    .txs
                    .iter()
                    .position(|t| &t.hash == sig)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                let txs: Vec<ObservedTx> = s.txs[start..]
                    .iter()
                    .take_while(|t| t.block_number <= to_height)
                    .take(limit)
                    .map(|t| ObservedTx {
                        cursor: ScanCursor::Signature(t.hash.clone()),
                        ..t.clone()
                    })
                    .collect();
                let end_cursor = txs
                    .last()
                    .map(|t| t.cursor.clone())
                    .unwrap_or_else(|| from.clone());
                Ok(ScanBatch { txs, end_cursor })
            }
        })
    }

    async fn send_raw_transaction(&self, tx: &SignedTx) -> AdapterResult<String> {
        self.check_rpc()?;
        self.with_state(|s| {
            if let Some(error) = s.broadcast_errors.pop_front() {
                return Err(error);
            }
            s.broadcasts.push(tx.clone());
            let status = if s.include_on_broadcast {
                TxStatus::Included {
                    block_number: s.height,
                    confirmations: 1,
                    success: tx.kind == OutboundKind::Withdraw,
                }
            } else {
                TxStatus::Pending
            };
            s.statuses.entry(tx.hash.clone()).or_insert(status);
            Ok(tx.hash.clone())
        })
    }

    async fn suggest_fee_rate(&self) -> AdapterResult<FeeRate> {
        self.check_rpc()?;
        Ok(self.with_state(|s| {
            s.fee.unwrap_or(FeeRate {
                price: 1,
                priority_fee: 0,
                block_number: s.height,
            })
        }))
    }

    async fn get_tx_status(&self, hash: &str) -> AdapterResult<TxStatus> {
        self.check_rpc()?;
        Ok(self.with_state(|s| s.statuses.get(hash).copied().unwrap_or(TxStatus::NotFound)))
    }

    async fn build_outbound(
        &self,
        request: &OutboundRequest,
        tss: &dyn TssSigner,
    ) -> AdapterResult<SignedTx> {
        self.with_state(|s| {
            s.builds.push(request.clone());
            match s.build_errors.pop_front() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })?;

        let kind = if request.is_nonce_only() {
            OutboundKind::IncrementNonce
        } else {
            OutboundKind::Withdraw
        };
        let digest = keccak256(
            format!(
                "{}:{}:{:?}:{}:{}",
                request.chain_id, request.nonce, kind, request.receiver, request.amount
            )
            .as_bytes(),
        );
        let round = RoundMetadata {
            height: request.height,
            nonce: request.nonce,
            chain_id: request.chain_id,
        };
        let signature = tss.sign(&digest, &round).await?;

        Ok(SignedTx {
            chain_id: request.chain_id,
            nonce: request.nonce,
            kind,
            hash: format!("0x{}", hex::encode(digest)),
            raw: signature.to_bytes().to_vec(),
        })
    }

    async fn get_outbound_nonce(&self, _tss_address: &str) -> AdapterResult<Option<u64>> {
        self.check_rpc()?;
        Ok(self.with_state(|s| s.outbound_nonce))
    }
}
