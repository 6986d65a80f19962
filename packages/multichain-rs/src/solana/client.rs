//! Solana chain adapter
//!
//! Inbound scanning walks gateway signatures oldest to newest after the
//! cursor signature. Outbounds are single-instruction transactions paid for by
//! a relayer fee payer and authorized on-chain by the TSS signature in the
//! instruction data.

use async_trait::async_trait;
use borsh::BorshSerialize;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{RpcSendTransactionConfig, RpcTransactionConfig},
    rpc_request::{RpcError, RpcResponseErrorData},
};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    instruction::{AccountMeta, Instruction},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use solana_transaction_status::{
    option_serializer::OptionSerializer, EncodedConfirmedTransactionWithStatusMeta, UiInstruction,
    UiTransactionEncoding,
};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::inbound::{parse_inbound, ParsedSolanaTx, ResolvedInstruction};
use super::instructions::{
    discriminator_increment_nonce, discriminator_withdraw, increment_nonce_message, message_hash,
    withdraw_message, SignedOutboundParams, PDA_SEED,
};
use crate::adapter::{AdapterError, AdapterResult, ChainAdapter};
use crate::tss::{RoundMetadata, TssSigner};
use crate::types::{
    ChainFamily, ChainId, CoinType, FeeRate, ObservedTx, OutboundKind, OutboundRequest, ScanBatch,
    ScanCursor, SignedTx, TxStatus,
};

/// Signatures processed per scan at most
pub const MAX_SIGNATURES_PER_TICKER: usize = 100;
const SIGNATURE_PAGE_LIMIT: usize = 1000;
/// Base fee per signature in lamports
const LAMPORTS_PER_SIGNATURE: u64 = 5000;
/// Reported for rooted transactions, whose confirmation count RPC omits
const ROOTED_CONFIRMATIONS: u64 = 32;

fn client_err(e: ClientError) -> AdapterError {
    AdapterError::Rpc(e.to_string())
}

/// Map a send error, keeping the simulation logs of a failed preflight
fn send_err(e: ClientError) -> AdapterError {
    match e.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { message, data, .. }) => {
            let logs = match data {
                RpcResponseErrorData::SendTransactionPreflightFailure(sim) => {
                    sim.logs.clone().unwrap_or_default()
                }
                _ => Vec::new(),
            };
            AdapterError::BroadcastRejected {
                reason: message.clone(),
                logs,
            }
        }
        _ => AdapterError::Rpc(e.to_string()),
    }
}

fn parse_pubkey(s: &str) -> AdapterResult<Pubkey> {
    Pubkey::from_str(s).map_err(|_| AdapterError::InvalidAddress(s.to_string()))
}

fn parse_signature(s: &str) -> AdapterResult<Signature> {
    Signature::from_str(s).map_err(|_| AdapterError::Decode(format!("invalid signature {}", s)))
}

/// Median of recent prioritization fees, zero if none were reported
pub fn median_priority_fee(mut fees: Vec<u64>) -> u64 {
    if fees.is_empty() {
        return 0;
    }
    fees.sort_unstable();
    fees[(fees.len() - 1) / 2]
}

/// Resolve account indexes of a fetched transaction
fn to_parsed(
    signature: &str,
    fetched: EncodedConfirmedTransactionWithStatusMeta,
) -> AdapterResult<ParsedSolanaTx> {
    let meta = fetched.transaction.meta;
    let versioned = fetched
        .transaction
        .transaction
        .decode()
        .ok_or_else(|| AdapterError::Decode(format!("cannot decode transaction {}", signature)))?;

    let mut keys: Vec<String> = versioned
        .message
        .static_account_keys()
        .iter()
        .map(|k| k.to_string())
        .collect();
    if let Some(OptionSerializer::Some(loaded)) = meta.as_ref().map(|m| &m.loaded_addresses) {
        keys.extend(loaded.writable.iter().cloned());
        keys.extend(loaded.readonly.iter().cloned());
    }

    let resolve = |program: u8, accounts: &[u8], data: Vec<u8>| ResolvedInstruction {
        program_id: keys.get(program as usize).cloned().unwrap_or_default(),
        accounts: accounts
            .iter()
            .map(|i| keys.get(*i as usize).cloned().unwrap_or_default())
            .collect(),
        data,
    };

    let instructions = versioned
        .message
        .instructions()
        .iter()
        .map(|ix| resolve(ix.program_id_index, &ix.accounts, ix.data.clone()))
        .collect();

    let mut inner_instructions = Vec::new();
    let mut failed = false;
    let mut logs = Vec::new();
    if let Some(meta) = meta {
        failed = meta.err.is_some();
        if let OptionSerializer::Some(messages) = meta.log_messages {
            logs = messages;
        }
        if let OptionSerializer::Some(mut groups) = meta.inner_instructions {
            groups.sort_by_key(|g| g.index);
            for group in groups {
                for ui in group.instructions {
                    if let UiInstruction::Compiled(compiled) = ui {
                        let data = bs58::decode(&compiled.data).into_vec().map_err(|e| {
                            AdapterError::Decode(format!("inner instruction data: {}", e))
                        })?;
                        inner_instructions.push(resolve(
                            compiled.program_id_index,
                            &compiled.accounts,
                            data,
                        ));
                    }
                }
            }
        }
    }

    Ok(ParsedSolanaTx {
        signature: signature.to_string(),
        slot: fetched.slot,
        instructions,
        inner_instructions,
        failed,
        logs,
    })
}

/// Adapter for one Solana cluster
pub struct SolanaAdapter {
    client: RpcClient,
    chain_id: ChainId,
    gateway: Pubkey,
    fee_payer: Keypair,
}

impl fmt::Debug for SolanaAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaAdapter")
            .field("chain_id", &self.chain_id)
            .field("gateway", &self.gateway)
            .field("fee_payer", &self.fee_payer.pubkey())
            .finish()
    }
}

impl SolanaAdapter {
    /// `fee_payer_key` is the base58 64-byte keypair
    pub fn new(
        rpc_url: &str,
        chain_id: ChainId,
        gateway: &str,
        fee_payer_key: &str,
    ) -> AdapterResult<Self> {
        let gateway = parse_pubkey(gateway)?;
        let bytes = bs58::decode(fee_payer_key.trim())
            .into_vec()
            .map_err(|_| AdapterError::InvalidAddress("fee payer key is not base58".to_string()))?;
        let fee_payer = Keypair::from_bytes(&bytes)
            .map_err(|_| AdapterError::InvalidAddress("fee payer key is not a keypair".to_string()))?;
        let client = RpcClient::new_with_commitment(rpc_url.to_string(), CommitmentConfig::confirmed());

        info!(
            rpc_url = %rpc_url,
            chain_id = %chain_id,
            gateway = %gateway,
            fee_payer = %fee_payer.pubkey(),
            "Created Solana adapter"
        );

        Ok(Self {
            client,
            chain_id,
            gateway,
            fee_payer,
        })
    }

    pub fn pda(&self) -> Pubkey {
        Pubkey::find_program_address(&[PDA_SEED], &self.gateway).0
    }

    async fn fetch(&self, signature: &str) -> AdapterResult<Option<ParsedSolanaTx>> {
        let sig = parse_signature(signature)?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        match self.client.get_transaction_with_config(&sig, config).await {
            Ok(fetched) => to_parsed(signature, fetched).map(Some),
            // RPC answers unknown signatures with a null result
            Err(e) if e.to_string().contains("invalid type: null") => Ok(None),
            Err(e) => Err(client_err(e)),
        }
    }

    /// Gateway signatures after `until`, oldest first
    async fn signatures_after(
        &self,
        until: Signature,
    ) -> AdapterResult<Vec<(String, u64, bool)>> {
        let mut newest_first = Vec::new();
        let mut before = None;
        loop {
            let config = GetConfirmedSignaturesForAddress2Config {
                before,
                until: Some(until),
                limit: Some(SIGNATURE_PAGE_LIMIT),
                commitment: Some(CommitmentConfig::confirmed()),
            };
            let page = self
                .client
                .get_signatures_for_address_with_config(&self.gateway, config)
                .await
                .map_err(client_err)?;
            let full = page.len() == SIGNATURE_PAGE_LIMIT;
            before = match page.last() {
                Some(last) => Some(parse_signature(&last.signature)?),
                None => None,
            };
            newest_first.extend(
                page.into_iter()
                    .map(|s| (s.signature, s.slot, s.err.is_some())),
            );
            if !full {
                break;
            }
        }
        newest_first.reverse();
        Ok(newest_first)
    }

    fn signed_params(
        &self,
        request: &OutboundRequest,
        kind: OutboundKind,
        amount: u64,
        to: Option<&Pubkey>,
    ) -> (Vec<u8>, [u8; 8]) {
        match (kind, to) {
            (OutboundKind::Withdraw, Some(to)) => (
                withdraw_message(self.chain_id, request.nonce, amount, &to.to_bytes()),
                discriminator_withdraw(),
            ),
            _ => (
                increment_nonce_message(self.chain_id, request.nonce, amount),
                discriminator_increment_nonce(),
            ),
        }
    }
}

#[async_trait]
impl ChainAdapter for SolanaAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Solana
    }

    async fn get_block_height(&self) -> AdapterResult<u64> {
        self.client.get_slot().await.map_err(client_err)
    }

    async fn get_transaction(&self, gateway: &str, hash: &str) -> AdapterResult<Option<ObservedTx>> {
        Ok(self
            .fetch(hash)
            .await?
            .map(|tx| parse_inbound(self.chain_id, gateway, &tx)))
    }

    async fn filter_events(
        &self,
        gateway: &str,
        from: &ScanCursor,
        to_height: u64,
        limit: usize,
    ) -> AdapterResult<ScanBatch> {
        let until = match from {
            ScanCursor::Signature(s) => parse_signature(s)?,
            ScanCursor::Unset => {
                let config = GetConfirmedSignaturesForAddress2Config {
                    before: None,
                    until: None,
                    limit: Some(1),
                    commitment: Some(CommitmentConfig::confirmed()),
                };
                let newest = self
                    .client
                    .get_signatures_for_address_with_config(&self.gateway, config)
                    .await
                    .map_err(client_err)?;
                let cursor = newest
                    .into_iter()
                    .next()
                    .map(|s| ScanCursor::Signature(s.signature))
                    .unwrap_or(ScanCursor::Unset);
                return Ok(ScanBatch::empty(cursor));
            }
            ScanCursor::Block(n) => {
                return Err(AdapterError::Decode(format!(
                    "block cursor {} on a signature-indexed chain",
                    n
                )))
            }
        };

        let signatures = self.signatures_after(until).await?;
        let cap = limit.clamp(1, MAX_SIGNATURES_PER_TICKER);
        let mut txs = Vec::new();
        let mut end_cursor = from.clone();

        for (signature, slot, failed) in signatures
            .into_iter()
            .take_while(|(_, slot, _)| *slot <= to_height)
            .take(cap)
        {
            let observed = if failed {
                ObservedTx {
                    hash: signature.clone(),
                    block_number: slot,
                    cursor: ScanCursor::Signature(signature.clone()),
                    failed: true,
                    events: Vec::new(),
                    anomalies: Vec::new(),
                }
            } else {
                let Some(tx) = self.fetch(&signature).await? else {
                    // listed but not yet served; retry from here next tick
                    break;
                };
                parse_inbound(self.chain_id, gateway, &tx)
            };
            end_cursor = ScanCursor::Signature(signature);
            txs.push(observed);
        }

        debug!(chain_id = %self.chain_id, scanned = txs.len(), "Scanned gateway signatures");

        Ok(ScanBatch { txs, end_cursor })
    }

    async fn send_raw_transaction(&self, tx: &SignedTx) -> AdapterResult<String> {
        let transaction: Transaction = bincode::deserialize(&tx.raw)
            .map_err(|e| AdapterError::Decode(format!("raw transaction: {}", e)))?;
        let config = RpcSendTransactionConfig {
            preflight_commitment: Some(CommitmentLevel::Confirmed),
            ..Default::default()
        };
        let signature = self
            .client
            .send_transaction_with_config(&transaction, config)
            .await
            .map_err(send_err)?;
        Ok(signature.to_string())
    }

    async fn suggest_fee_rate(&self) -> AdapterResult<FeeRate> {
        let fees = self
            .client
            .get_recent_prioritization_fees(&[self.gateway])
            .await
            .map_err(client_err)?;
        let slot = self.client.get_slot().await.map_err(client_err)?;
        Ok(FeeRate {
            price: LAMPORTS_PER_SIGNATURE,
            priority_fee: median_priority_fee(fees.into_iter().map(|f| f.prioritization_fee).collect()),
            block_number: slot,
        })
    }

    async fn get_tx_status(&self, hash: &str) -> AdapterResult<TxStatus> {
        let sig = parse_signature(hash)?;
        let statuses = self
            .client
            .get_signature_statuses(&[sig])
            .await
            .map_err(client_err)?;
        let Some(Some(status)) = statuses.value.into_iter().next() else {
            return Ok(TxStatus::NotFound);
        };

        let nonce_only = match self.fetch(hash).await? {
            Some(tx) => tx.is_increment_nonce(&self.gateway.to_string()),
            None => return Ok(TxStatus::Pending),
        };
        Ok(TxStatus::Included {
            block_number: status.slot,
            confirmations: status
                .confirmations
                .map(|c| c as u64)
                .unwrap_or(ROOTED_CONFIRMATIONS),
            success: status.err.is_none() && !nonce_only,
        })
    }

    async fn build_outbound(
        &self,
        request: &OutboundRequest,
        tss: &dyn TssSigner,
    ) -> AdapterResult<SignedTx> {
        let amount = u64::try_from(request.amount)
            .map_err(|_| AdapterError::Unsupported(format!("amount {} overflows u64", request.amount)))?;

        let (kind, to) = if request.is_nonce_only() {
            (OutboundKind::IncrementNonce, None)
        } else {
            if request.coin_type != CoinType::Gas {
                return Err(AdapterError::Unsupported(format!(
                    "{} withdraw on Solana",
                    request.coin_type
                )));
            }
            (OutboundKind::Withdraw, Some(parse_pubkey(&request.receiver)?))
        };

        let (message, discriminator) = self.signed_params(request, kind, amount, to.as_ref());
        let hash = message_hash(&message);
        let round = RoundMetadata {
            height: request.height,
            nonce: request.nonce,
            chain_id: request.chain_id,
        };
        let signature = tss.sign(&hash, &round).await?;

        let params = SignedOutboundParams {
            discriminator,
            amount,
            signature: signature.rs(),
            recovery_id: signature.v,
            message_hash: hash,
            nonce: request.nonce,
        };
        let data = params
            .try_to_vec()
            .map_err(|e| AdapterError::Decode(format!("borsh: {}", e)))?;

        let mut accounts = vec![
            AccountMeta::new(self.fee_payer.pubkey(), true),
            AccountMeta::new(self.pda(), false),
        ];
        if let Some(to) = to {
            accounts.push(AccountMeta::new(to, false));
        }
        accounts.push(AccountMeta::new_readonly(self.gateway, false));
        let instruction = Instruction::new_with_bytes(self.gateway, &data, accounts);

        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(client_err)?;
        let tx = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&self.fee_payer.pubkey()),
            &[&self.fee_payer],
            blockhash,
        );
        let raw = bincode::serialize(&tx)
            .map_err(|e| AdapterError::Decode(format!("bincode: {}", e)))?;
        if raw.len() > PACKET_DATA_SIZE {
            return Err(AdapterError::TooLarge {
                size: raw.len(),
                max: PACKET_DATA_SIZE,
            });
        }

        let tx_signature = tx
            .signatures
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| AdapterError::Decode("unsigned transaction".to_string()))?;

        info!(
            chain_id = %self.chain_id,
            nonce = request.nonce,
            signature = %tx_signature,
            kind = ?kind,
            "Signed Solana outbound"
        );

        Ok(SignedTx {
            chain_id: request.chain_id,
            nonce: request.nonce,
            kind,
            hash: tx_signature,
            raw,
        })
    }

    /// The gateway PDA stores the next nonce right after the account discriminator
    async fn get_outbound_nonce(&self, _tss_address: &str) -> AdapterResult<Option<u64>> {
        let data = self
            .client
            .get_account_data(&self.pda())
            .await
            .map_err(client_err)?;
        pda_nonce(&data).map(Some)
    }
}

fn pda_nonce(data: &[u8]) -> AdapterResult<u64> {
    data.get(8..16)
        .and_then(|b| <[u8; 8]>::try_from(b).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| AdapterError::Decode(format!("gateway PDA too short: {} bytes", data.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pda_nonce() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&42u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 52]);
        assert_eq!(pda_nonce(&data).unwrap(), 42);
        assert!(pda_nonce(&data[..12]).is_err());
    }

    #[test]
    fn test_median_priority_fee() {
        assert_eq!(median_priority_fee(vec![]), 0);
        assert_eq!(median_priority_fee(vec![5, 1, 9]), 5);
        assert_eq!(median_priority_fee(vec![9, 5]), 5);
    }

    #[test]
    fn test_adapter_rejects_bad_keys() {
        let gateway = Pubkey::new_unique().to_string();
        assert!(SolanaAdapter::new("http://localhost:8899", ChainId(902), &gateway, "not-base58!").is_err());
        assert!(SolanaAdapter::new("http://localhost:8899", ChainId(902), "bad", "").is_err());

        let payer = Keypair::new();
        let adapter = SolanaAdapter::new(
            "http://localhost:8899",
            ChainId(902),
            &gateway,
            &payer.to_base58_string(),
        )
        .unwrap();
        assert_eq!(adapter.family(), ChainFamily::Solana);
        let (expected, _) = Pubkey::find_program_address(&[PDA_SEED], &adapter.gateway);
        assert_eq!(adapter.pda(), expected);
        assert!(!format!("{:?}", adapter).contains(&payer.to_base58_string()));
    }
}
