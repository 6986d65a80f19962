//! EVM chain adapter
//!
//! Wraps an alloy HTTP provider. Inbound scanning reads gateway logs over a
//! block window; outbounds are raw legacy transactions built in [`super::tx`].

use alloy::{
    primitives::{Address, B256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log},
    transports::{
        http::{Client, Http},
        RpcError, TransportErrorKind,
    },
};
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::str::FromStr;
use tracing::{debug, info};

use super::events::{group_logs, RawLog};
use super::tx::build_signed_outbound;
use crate::adapter::{AdapterError, AdapterResult, ChainAdapter};
use crate::tss::TssSigner;
use crate::types::{
    ChainFamily, ChainId, FeeRate, ObservedTx, OutboundRequest, ScanBatch, ScanCursor, SignedTx,
    TxStatus,
};

/// Adapter for one EVM chain
pub struct EvmAdapter {
    provider: RootProvider<Http<Client>>,
    chain_id: ChainId,
}

impl EvmAdapter {
    pub fn new(rpc_url: &str, chain_id: ChainId) -> Result<Self> {
        let provider = ProviderBuilder::new().on_http(
            rpc_url
                .parse()
                .map_err(|e| eyre!("Invalid RPC URL: {}", e))?,
        );

        info!(rpc_url = %rpc_url, chain_id = %chain_id, "Created EVM adapter");

        Ok(Self { provider, chain_id })
    }
}

fn rpc_err(e: RpcError<TransportErrorKind>) -> AdapterError {
    match e.as_error_resp() {
        Some(payload) => AdapterError::BroadcastRejected {
            reason: payload.message.to_string(),
            logs: Vec::new(),
        },
        None => AdapterError::Rpc(e.to_string()),
    }
}

fn read_err(e: RpcError<TransportErrorKind>) -> AdapterError {
    AdapterError::Rpc(e.to_string())
}

fn parse_gateway(gateway: &str) -> AdapterResult<Address> {
    Address::from_str(gateway).map_err(|_| AdapterError::InvalidAddress(gateway.to_string()))
}

fn parse_hash(hash: &str) -> AdapterResult<B256> {
    B256::from_str(hash).map_err(|_| AdapterError::Decode(format!("invalid tx hash {}", hash)))
}

fn to_raw_log(log: &Log) -> Option<RawLog> {
    Some(RawLog {
        topics: log.topics().iter().map(|t| t.0).collect(),
        data: log.data().data.to_vec(),
        block_number: log.block_number?,
        tx_hash: format!("{:#x}", log.transaction_hash?),
        log_index: log.log_index?,
    })
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    async fn get_block_height(&self) -> AdapterResult<u64> {
        self.provider.get_block_number().await.map_err(read_err)
    }

    async fn get_transaction(&self, gateway: &str, hash: &str) -> AdapterResult<Option<ObservedTx>> {
        let gateway = parse_gateway(gateway)?;
        let tx_hash = parse_hash(hash)?;
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(read_err)?
        else {
            return Ok(None);
        };

        let block_number = receipt.block_number.unwrap_or_default();
        let logs: Vec<RawLog> = receipt
            .inner
            .logs()
            .iter()
            .filter(|l| l.address() == gateway)
            .filter_map(to_raw_log)
            .collect();

        let mut tx = group_logs(self.chain_id, &logs)
            .into_iter()
            .next()
            .unwrap_or_else(|| ObservedTx {
                hash: format!("{:#x}", tx_hash),
                block_number,
                cursor: ScanCursor::Block(block_number.saturating_sub(1)),
                failed: false,
                events: Vec::new(),
                anomalies: Vec::new(),
            });
        tx.failed = !receipt.status();
        Ok(Some(tx))
    }

    async fn filter_events(
        &self,
        gateway: &str,
        from: &ScanCursor,
        to_height: u64,
        limit: usize,
    ) -> AdapterResult<ScanBatch> {
        let start = match from {
            ScanCursor::Block(n) => n + 1,
            ScanCursor::Unset => return Ok(ScanBatch::empty(ScanCursor::Block(to_height))),
            ScanCursor::Signature(s) => {
                return Err(AdapterError::Decode(format!(
                    "signature cursor {} on a block-indexed chain",
                    s
                )))
            }
        };
        if start > to_height {
            return Ok(ScanBatch::empty(from.clone()));
        }
        let end = to_height.min(start + limit.max(1) as u64 - 1);

        let filter = Filter::new()
            .address(parse_gateway(gateway)?)
            .from_block(start)
            .to_block(end);
        let logs = self.provider.get_logs(&filter).await.map_err(read_err)?;
        let raw: Vec<RawLog> = logs.iter().filter_map(to_raw_log).collect();
        let txs = group_logs(self.chain_id, &raw);

        debug!(
            chain_id = %self.chain_id,
            from = start,
            to = end,
            logs = raw.len(),
            txs = txs.len(),
            "Scanned gateway logs"
        );

        Ok(ScanBatch {
            txs,
            end_cursor: ScanCursor::Block(end),
        })
    }

    async fn send_raw_transaction(&self, tx: &SignedTx) -> AdapterResult<String> {
        let pending = self
            .provider
            .send_raw_transaction(&tx.raw)
            .await
            .map_err(rpc_err)?;
        Ok(format!("{:#x}", pending.tx_hash()))
    }

    async fn suggest_fee_rate(&self) -> AdapterResult<FeeRate> {
        let gas_price = self.provider.get_gas_price().await.map_err(read_err)?;
        // Not every chain serves eth_maxPriorityFeePerGas
        let priority_fee = self
            .provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or_default();
        let block_number = self.provider.get_block_number().await.map_err(read_err)?;

        Ok(FeeRate {
            price: u64::try_from(gas_price).unwrap_or(u64::MAX),
            priority_fee: u64::try_from(priority_fee).unwrap_or(u64::MAX),
            block_number,
        })
    }

    async fn get_tx_status(&self, hash: &str) -> AdapterResult<TxStatus> {
        let tx_hash = parse_hash(hash)?;
        if let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(read_err)?
        {
            let block_number = receipt.block_number.unwrap_or_default();
            let head = self.provider.get_block_number().await.map_err(read_err)?;
            // nonce-only outbounds are TSS self-transfers
            let self_transfer = receipt.to == Some(receipt.from);
            return Ok(TxStatus::Included {
                block_number,
                confirmations: head.saturating_sub(block_number) + 1,
                success: receipt.status() && !self_transfer,
            });
        }

        let known = self
            .provider
            .get_transaction_by_hash(tx_hash)
            .await
            .map_err(read_err)?;
        Ok(if known.is_some() {
            TxStatus::Pending
        } else {
            TxStatus::NotFound
        })
    }

    async fn build_outbound(
        &self,
        request: &OutboundRequest,
        tss: &dyn TssSigner,
    ) -> AdapterResult<SignedTx> {
        if request.chain_id != self.chain_id {
            return Err(AdapterError::Unsupported(format!(
                "outbound for chain {} sent to adapter for chain {}",
                request.chain_id, self.chain_id
            )));
        }
        if request.gas_price > 0 {
            return build_signed_outbound(request, tss).await;
        }

        let fee = self.suggest_fee_rate().await?;
        let mut priced = request.clone();
        priced.gas_price = fee.price.saturating_add(fee.priority_fee);
        build_signed_outbound(&priced, tss).await
    }

    async fn get_outbound_nonce(&self, tss_address: &str) -> AdapterResult<Option<u64>> {
        let address = Address::from_str(tss_address)
            .map_err(|_| AdapterError::InvalidAddress(tss_address.to_string()))?;
        let count = self
            .provider
            .get_transaction_count(address)
            .await
            .map_err(read_err)?;
        Ok(Some(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_creation() {
        let adapter = EvmAdapter::new("http://localhost:8545", ChainId(31337)).unwrap();
        assert_eq!(adapter.chain_id(), ChainId(31337));
        assert_eq!(adapter.family(), ChainFamily::Evm);
        assert!(EvmAdapter::new("not a url", ChainId(1)).is_err());
    }

    #[test]
    fn test_parse_hash() {
        assert!(parse_hash("0x1234").is_err());
        assert!(parse_hash(&format!("0x{}", "ab".repeat(32))).is_ok());
    }
}
