//! Bitcoin chain adapter
//!
//! A deposit pays the TSS P2WPKH address in vout[0] and carries the inbound
//! memo as OP_RETURN in vout[1]. Every deposit found in a block is checked
//! against the block's merkle root before it is reported.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::merkle::{build_proof, prove, txid_to_internal};
use super::rpc::{btc_to_sats, BitcoinRpc, RawTx};
use super::script::{address_hrp, address_to_script, decode_op_return, script_to_address, InboundMemo};
use super::tx::{build_unsigned, sign_outbound, Utxo};
use crate::adapter::{AdapterError, AdapterResult, ChainAdapter};
use crate::tss::TssSigner;
use crate::types::{
    format_receiver, ChainFamily, ChainId, CoinType, FeeRate, InboundEvent, ObservedTx,
    OutboundRequest, ScanBatch, ScanCursor, SignedTx, TxStatus,
};

/// vB a depositor pays for so the deposited UTXO can be spent later
pub const DEPOSITOR_VBYTES: u64 = 68;
pub const DEFAULT_DEPOSITOR_FEE_RATE: u64 = 20;
/// Used when `estimatesmartfee` has no data (regtest, fresh testnets)
pub const DEFAULT_FEE_RATE: u64 = 10;

pub fn depositor_fee(sat_per_vb: u64) -> u64 {
    sat_per_vb * DEPOSITOR_VBYTES
}

/// Deposit fields readable from the transaction alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositOutput {
    pub amount: u64,
    pub memo: InboundMemo,
}

/// Match `tx` against the deposit layout. `Ok(None)` if it does not pay the
/// TSS address or pays less than the depositor fee; `Err` for a malformed memo.
pub fn parse_deposit(
    tx: &RawTx,
    tss_script_hex: &str,
    depositor_fee: u64,
) -> Result<Option<DepositOutput>, String> {
    if tx.vout.len() < 2 {
        return Ok(None);
    }
    let vout0 = &tx.vout[0];
    if !vout0.script_pub_key.hex.eq_ignore_ascii_case(tss_script_hex) {
        return Ok(None);
    }
    let value = btc_to_sats(vout0.value);
    if value < depositor_fee {
        info!(
            txid = %tx.txid,
            value = value,
            depositor_fee = depositor_fee,
            "Deposit below depositor fee, ignoring"
        );
        return Ok(None);
    }

    let script = hex::decode(&tx.vout[1].script_pub_key.hex)
        .map_err(|e| format!("vout[1] script not hex: {}", e))?;
    let memo = decode_op_return(&script)?
        .ok_or_else(|| "vout[1] is not an OP_RETURN memo".to_string())?;

    Ok(Some(DepositOutput {
        amount: value - depositor_fee,
        memo: InboundMemo::decode(&memo)?,
    }))
}

/// Adapter for one Bitcoin network; `gateway` arguments are the TSS address
pub struct BitcoinAdapter {
    rpc: BitcoinRpc,
    chain_id: ChainId,
    tss_address: String,
    tss_script: Vec<u8>,
    hrp: String,
}

impl BitcoinAdapter {
    pub fn new(
        rpc_url: &str,
        rpc_user: &str,
        rpc_password: &str,
        chain_id: ChainId,
        tss_address: &str,
    ) -> AdapterResult<Self> {
        let tss_script = address_to_script(tss_address)?;
        let hrp = address_hrp(tss_address)?;
        info!(rpc_url = %rpc_url, chain_id = %chain_id, tss = %tss_address, "Created Bitcoin adapter");
        Ok(Self {
            rpc: BitcoinRpc::new(rpc_url, rpc_user, rpc_password)?,
            chain_id,
            tss_address: tss_address.to_string(),
            tss_script,
            hrp,
        })
    }

    fn tss_script_hex(&self) -> String {
        hex::encode(&self.tss_script)
    }

    /// Address that funded input 0, `None` for non-segwit senders
    async fn resolve_sender(&self, tx: &RawTx) -> AdapterResult<Option<String>> {
        let Some(vin) = tx.vin.first() else {
            return Ok(None);
        };
        let (Some(prev_txid), Some(prev_vout)) = (vin.txid.as_deref(), vin.vout) else {
            return Ok(None);
        };
        let Some(prev) = self.rpc.get_raw_transaction(prev_txid).await? else {
            return Err(AdapterError::Rpc(format!(
                "previous transaction {} not found (is txindex enabled?)",
                prev_txid
            )));
        };
        let Some(output) = prev.vout.iter().find(|o| o.n == prev_vout) else {
            return Ok(None);
        };
        let script = hex::decode(&output.script_pub_key.hex)
            .map_err(|e| AdapterError::Decode(e.to_string()))?;
        Ok(script_to_address(&self.hrp, &script))
    }

    /// Build the observation for one transaction already known to sit at
    /// `index` in a block whose merkle root is `root`
    async fn observe_tx(
        &self,
        tx: &RawTx,
        block_number: u64,
        txids: &[[u8; 32]],
        index: usize,
        root: &[u8; 32],
    ) -> AdapterResult<Option<ObservedTx>> {
        let deposit = match parse_deposit(tx, &self.tss_script_hex(), depositor_fee(DEFAULT_DEPOSITOR_FEE_RATE)) {
            Ok(Some(deposit)) => deposit,
            Ok(None) => return Ok(None),
            Err(reason) => {
                return Ok(Some(ObservedTx {
                    hash: tx.txid.clone(),
                    block_number,
                    cursor: ScanCursor::Block(block_number.saturating_sub(1)),
                    failed: false,
                    events: Vec::new(),
                    anomalies: vec![reason],
                }))
            }
        };

        let mut observed = ObservedTx {
            hash: tx.txid.clone(),
            block_number,
            cursor: ScanCursor::Block(block_number.saturating_sub(1)),
            failed: false,
            events: Vec::new(),
            anomalies: Vec::new(),
        };

        let proven = txid_to_internal(&tx.txid)
            .zip(build_proof(txids, index))
            .map(|(hash, path)| prove(&hash, root, &path, index))
            .unwrap_or(false);
        if !proven {
            observed
                .anomalies
                .push("merkle proof does not match block root".to_string());
            return Ok(Some(observed));
        }

        let Some(sender) = self.resolve_sender(tx).await? else {
            observed
                .anomalies
                .push("sender script is not segwit, cannot refund".to_string());
            return Ok(Some(observed));
        };

        let payload = deposit.memo.payload;
        observed.events.push(InboundEvent {
            sender_chain_id: self.chain_id,
            sender,
            receiver_chain_id: deposit.memo.receiver_chain_id,
            receiver: format_receiver(&deposit.memo.receiver),
            amount: deposit.amount as u128,
            asset: String::new(),
            is_cross_chain_call: !payload.is_empty(),
            memo: payload,
            coin_type: CoinType::Gas,
            block_number,
            tx_hash: tx.txid.clone(),
            event_index: 0,
            revert_options: None,
        });
        Ok(Some(observed))
    }

    async fn scan_block(&self, height: u64) -> AdapterResult<Vec<ObservedTx>> {
        let hash = self.rpc.get_block_hash(height).await?;
        let block = self.rpc.get_block_verbose(&hash).await?;
        let root = txid_to_internal(&block.merkleroot)
            .ok_or_else(|| AdapterError::Decode(format!("bad merkle root in block {}", height)))?;
        let txids = block
            .tx
            .iter()
            .map(|t| {
                txid_to_internal(&t.txid)
                    .ok_or_else(|| AdapterError::Decode(format!("bad txid {}", t.txid)))
            })
            .collect::<AdapterResult<Vec<_>>>()?;

        let mut observed = Vec::new();
        // coinbase never pays the TSS
        for (index, tx) in block.tx.iter().enumerate().skip(1) {
            if let Some(obs) = self.observe_tx(tx, height, &txids, index, &root).await? {
                observed.push(obs);
            }
        }
        debug!(
            chain_id = %self.chain_id,
            height = height,
            txs = block.tx.len(),
            deposits = observed.len(),
            "Scanned bitcoin block"
        );
        Ok(observed)
    }
}

#[async_trait]
impl ChainAdapter for BitcoinAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Bitcoin
    }

    async fn get_block_height(&self) -> AdapterResult<u64> {
        let height = self.rpc.get_block_count().await?;
        if height == 0 {
            return Err(AdapterError::Rpc("node reports height 0, not synced".to_string()));
        }
        Ok(height)
    }

    async fn get_transaction(&self, _gateway: &str, hash: &str) -> AdapterResult<Option<ObservedTx>> {
        let Some(tx) = self.rpc.get_raw_transaction(hash).await? else {
            return Ok(None);
        };
        let Some(block_hash) = tx.blockhash.as_deref() else {
            return Ok(None);
        };
        let block = self.rpc.get_block_verbose(block_hash).await?;
        let root = txid_to_internal(&block.merkleroot)
            .ok_or_else(|| AdapterError::Decode("bad merkle root".to_string()))?;
        let txids: Vec<[u8; 32]> = block
            .tx
            .iter()
            .filter_map(|t| txid_to_internal(&t.txid))
            .collect();
        let Some(index) = block.tx.iter().position(|t| t.txid == tx.txid) else {
            return Ok(None);
        };
        self.observe_tx(&tx, block.height, &txids, index, &root).await
    }

    async fn filter_events(
        &self,
        _gateway: &str,
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

        let mut txs = Vec::new();
        for height in start..=end {
            txs.extend(self.scan_block(height).await?);
        }
        Ok(ScanBatch {
            txs,
            end_cursor: ScanCursor::Block(end),
        })
    }

    async fn send_raw_transaction(&self, tx: &SignedTx) -> AdapterResult<String> {
        self.rpc.send_raw_transaction(&hex::encode(&tx.raw)).await
    }

    async fn suggest_fee_rate(&self) -> AdapterResult<FeeRate> {
        let rate = match self.rpc.estimate_smart_fee(2).await? {
            Some(rate) => rate,
            None => {
                warn!(chain_id = %self.chain_id, "No fee estimate available, using default");
                DEFAULT_FEE_RATE
            }
        };
        Ok(FeeRate {
            price: rate,
            priority_fee: 0,
            block_number: self.rpc.get_block_count().await?,
        })
    }

    async fn get_tx_status(&self, hash: &str) -> AdapterResult<TxStatus> {
        let Some(tx) = self.rpc.get_raw_transaction(hash).await? else {
            return Ok(TxStatus::NotFound);
        };
        match tx.confirmations {
            Some(confirmations) if confirmations > 0 => {
                let head = self.rpc.get_block_count().await?;
                // nonce-only outbounds pay nothing but the TSS itself
                let tss_hex = self.tss_script_hex();
                let delivered = tx
                    .vout
                    .iter()
                    .any(|o| !o.script_pub_key.hex.eq_ignore_ascii_case(&tss_hex));
                Ok(TxStatus::Included {
                    block_number: (head + 1).saturating_sub(confirmations),
                    confirmations,
                    success: delivered,
                })
            }
            _ => Ok(TxStatus::Pending),
        }
    }

    async fn build_outbound(
        &self,
        request: &OutboundRequest,
        tss: &dyn TssSigner,
    ) -> AdapterResult<SignedTx> {
        let fee_rate = if request.gas_price > 0 {
            request.gas_price
        } else {
            self.suggest_fee_rate().await?.price
        };

        let utxos: Vec<Utxo> = self
            .rpc
            .list_unspent(&self.tss_address)
            .await?
            .into_iter()
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                amount: btc_to_sats(u.amount),
            })
            .collect();

        let unsigned = build_unsigned(request, &self.tss_script, &utxos, fee_rate)?;
        let signed = sign_outbound(unsigned, request, &self.tss_script, tss).await?;
        info!(
            chain_id = %self.chain_id,
            nonce = request.nonce,
            txid = %signed.hash,
            fee_rate = fee_rate,
            "Signed bitcoin outbound"
        );
        Ok(signed)
    }
}
