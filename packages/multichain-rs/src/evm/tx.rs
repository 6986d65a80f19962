//! EVM outbound transaction construction
//!
//! Outbounds are legacy EIP-155 transactions sent from the TSS address with
//! the CCTX nonce as the account nonce:
//! - gas token: plain value transfer to the receiver
//! - fungible token: `withdraw(address,address,uint256)` on the gateway
//! - nonce-only (cancel / fallback): zero-value transfer to the TSS address itself

use std::str::FromStr;

use alloy::consensus::{SignableTransaction, TxLegacy};
use alloy::primitives::{Address, Bytes, PrimitiveSignature, TxKind, B256, U256};
use alloy::sol_types::SolCall;

use super::contracts::Gateway;
use crate::adapter::{AdapterError, AdapterResult};
use crate::tss::{RoundMetadata, TssSigner};
use crate::types::{CoinType, OutboundRequest, SignedTx};

/// Gas used by a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Parse a 0x-prefixed 20-byte address
pub fn parse_address(s: &str) -> AdapterResult<Address> {
    Address::from_str(s.trim()).map_err(|_| AdapterError::InvalidAddress(s.to_string()))
}

/// Calldata for `withdraw(address to, address asset, uint256 amount)`
pub fn encode_gateway_withdraw(to: Address, asset: Address, amount: u128) -> Vec<u8> {
    Gateway::withdrawCall {
        to,
        asset,
        amount: U256::from(amount),
    }
    .abi_encode()
}

fn legacy(request: &OutboundRequest, to: Address, value: u128, gas_limit: u64, input: Vec<u8>) -> TxLegacy {
    TxLegacy {
        chain_id: Some(request.chain_id.as_u64()),
        nonce: request.nonce,
        gas_price: u128::from(request.gas_price),
        gas_limit,
        to: TxKind::Call(to),
        value: U256::from(value),
        input: Bytes::from(input),
    }
}

/// Assemble the unsigned transaction for an outbound request
pub fn outbound_tx(request: &OutboundRequest, tss_address: Address) -> AdapterResult<TxLegacy> {
    if request.is_nonce_only() {
        return Ok(legacy(request, tss_address, 0, TRANSFER_GAS_LIMIT, Vec::new()));
    }

    let receiver = parse_address(&request.receiver)?;
    match request.coin_type {
        CoinType::Gas => Ok(legacy(
            request,
            receiver,
            request.amount,
            request.gas_limit.max(TRANSFER_GAS_LIMIT),
            Vec::new(),
        )),
        CoinType::FungibleToken => {
            let gateway = parse_address(&request.gateway)?;
            let asset = parse_address(&request.asset)?;
            Ok(legacy(
                request,
                gateway,
                0,
                request.gas_limit,
                encode_gateway_withdraw(receiver, asset, request.amount),
            ))
        }
        CoinType::NoAssetCall => Err(AdapterError::Unsupported(
            "contract-call-only outbound on EVM".to_string(),
        )),
    }
}

/// Build the transaction, have the TSS sign its hash and encode it for broadcast
pub async fn build_signed_outbound(
    request: &OutboundRequest,
    tss: &dyn TssSigner,
) -> AdapterResult<SignedTx> {
    let tx = outbound_tx(request, Address::from(tss.evm_address()))?;
    let digest = tx.signature_hash();
    let round = RoundMetadata {
        height: request.height,
        nonce: request.nonce,
        chain_id: request.chain_id,
    };
    let signature = tss.sign(&digest.0, &round).await?;
    let signature = PrimitiveSignature::from_scalars_and_parity(
        B256::from(signature.r),
        B256::from(signature.s),
        signature.v == 1,
    );
    let signed = tx.into_signed(signature);
    let mut raw = Vec::with_capacity(signed.rlp_encoded_length());
    signed.rlp_encode(&mut raw);
    let hash = format!("{:#x}", signed.hash());

    tracing::info!(
        chain_id = %request.chain_id,
        nonce = request.nonce,
        tx_hash = %hash,
        nonce_only = request.is_nonce_only(),
        "Signed EVM outbound"
    );

    Ok(SignedTx {
        chain_id: request.chain_id,
        nonce: request.nonce,
        kind: request.kind,
        hash,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::keccak256;
    use crate::tss::LocalTssSigner;
    use crate::types::{ChainId, OutboundKind};
    use alloy::consensus::Signed;

    const TSS: [u8; 20] = [9u8; 20];

    fn request(coin_type: CoinType, amount: u128) -> OutboundRequest {
        OutboundRequest {
            cctx_index: "0xabc".to_string(),
            chain_id: ChainId(1337),
            nonce: 5,
            receiver: "0x3535353535353535353535353535353535353535".to_string(),
            amount,
            asset: "0x1111111111111111111111111111111111111111".to_string(),
            coin_type,
            gas_price: 2_000_000_000,
            priority_fee: 0,
            gas_limit: 100_000,
            gateway: "0x2222222222222222222222222222222222222222".to_string(),
            height: 42,
            kind: OutboundKind::Withdraw,
        }
    }

    #[test]
    fn test_eip155_signature_hash() {
        let tx = TxLegacy {
            chain_id: Some(1),
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: TxKind::Call(Address::from([0x35; 20])),
            value: U256::from(1_000_000_000_000_000_000u128),
            input: Bytes::new(),
        };
        assert_eq!(
            hex::encode(tx.signature_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_gas_outbound_is_value_transfer() {
        let tx = outbound_tx(&request(CoinType::Gas, 1000), Address::from(TSS)).unwrap();
        assert_eq!(tx.to, TxKind::Call(Address::from([0x35; 20])));
        assert_eq!(tx.value, U256::from(1000));
        assert_eq!(tx.nonce, 5);
        assert_eq!(tx.chain_id, Some(1337));
        assert!(tx.input.is_empty());
    }

    #[test]
    fn test_token_outbound_calls_gateway() {
        let tx = outbound_tx(&request(CoinType::FungibleToken, 1000), Address::from(TSS)).unwrap();
        assert_eq!(tx.to, TxKind::Call(Address::from([0x22; 20])));
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.input.len(), 100);
        assert_eq!(&tx.input[..4], &keccak256(b"withdraw(address,address,uint256)")[..4]);

        let call = Gateway::withdrawCall::abi_decode(&tx.input, true).unwrap();
        assert_eq!(call.to, Address::from([0x35; 20]));
        assert_eq!(call.asset, Address::from([0x11; 20]));
        assert_eq!(call.amount, U256::from(1000));
    }

    #[test]
    fn test_nonce_only_outbound_targets_tss() {
        let mut req = request(CoinType::FungibleToken, 0);
        req.receiver = "not-an-address".to_string();
        let tx = outbound_tx(&req, Address::from(TSS)).unwrap();
        assert_eq!(tx.to, TxKind::Call(Address::from(TSS)));
        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.gas_limit, TRANSFER_GAS_LIMIT);
        assert_eq!(tx.nonce, 5);
    }

    #[test]
    fn test_invalid_receiver_rejected() {
        let mut req = request(CoinType::Gas, 10);
        req.receiver = "0x1234".to_string();
        assert!(matches!(
            outbound_tx(&req, Address::from(TSS)),
            Err(AdapterError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_outbound_recovers_to_tss() {
        let tss = LocalTssSigner::from_hex(
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        let req = request(CoinType::Gas, 1000);
        let signed = build_signed_outbound(&req, &tss).await.unwrap();
        assert_eq!(signed.nonce, 5);
        assert_eq!(signed.hash, format!("0x{}", hex::encode(keccak256(&signed.raw))));

        let decoded = Signed::<TxLegacy>::rlp_decode(&mut signed.raw.as_slice()).unwrap();
        assert_eq!(decoded.tx().nonce, 5);
        assert_eq!(decoded.tx().chain_id, Some(1337));
        assert_eq!(format!("{:#x}", decoded.hash()), signed.hash);

        let digest = decoded.signature_hash();
        let sig = tss
            .sign(
                &digest.0,
                &RoundMetadata {
                    height: 42,
                    nonce: 5,
                    chain_id: ChainId(1337),
                },
            )
            .await
            .unwrap();
        assert_eq!(sig.recover_address(&digest.0).unwrap(), tss.evm_address());
    }
}
