//! Segwit v0 outbound transactions spent from the TSS P2WPKH address
//!
//! Output layout:
//! - vout[0]: nonce mark to the TSS address, `NONCE_MARK_BASE + nonce` sats
//! - vout[1]: payment to the receiver (absent for nonce-only outbounds)
//! - vout[2]: change to the TSS address, if above dust

use k256::ecdsa::Signature;

use super::merkle::{internal_to_txid, txid_to_internal};
use super::script::{address_to_script, p2wpkh_program};
use crate::adapter::{AdapterError, AdapterResult};
use crate::hash::sha256d;
use crate::tss::{RoundMetadata, TssSigner};
use crate::types::{OutboundRequest, SignedTx};

pub const NONCE_MARK_BASE: u64 = 2000;
pub const DUST_LIMIT: u64 = 546;
const SIGHASH_ALL: u32 = 1;

// vsize constants
const BYTES_PER_INPUT: u64 = 41;
const BYTES_PER_OUTPUT_P2WPKH: u64 = 31;
const BYTES_1ST_WITNESS: u64 = 110;
const BYTES_PER_WITNESS: u64 = 108;

pub fn nonce_mark_amount(nonce: u64) -> u64 {
    NONCE_MARK_BASE + nonce
}

/// Spendable output owned by the TSS address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Previous txid in internal byte order
    pub prev_hash: [u8; 32],
    pub prev_index: u32,
    pub sequence: u32,
    pub amount: u64,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcTx {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

fn write_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn serialize_outputs(outputs: &[TxOut]) -> Vec<u8> {
    let mut out = Vec::new();
    for output in outputs {
        out.extend_from_slice(&output.value.to_le_bytes());
        write_bytes(&mut out, &output.script);
    }
    out
}

/// scriptCode of a P2WPKH input
pub fn p2wpkh_script_code(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut code = vec![0x76, 0xa9, 0x14];
    code.extend_from_slice(pubkey_hash);
    code.extend_from_slice(&[0x88, 0xac]);
    code
}

impl BtcTx {
    fn serialize(&self, with_witness: bool) -> Vec<u8> {
        let with_witness = with_witness && self.inputs.iter().any(|i| !i.witness.is_empty());
        let mut out = self.version.to_le_bytes().to_vec();
        if with_witness {
            out.extend_from_slice(&[0x00, 0x01]);
        }
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prev_hash);
            out.extend_from_slice(&input.prev_index.to_le_bytes());
            write_varint(&mut out, 0);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        out.extend_from_slice(&serialize_outputs(&self.outputs));
        if with_witness {
            for input in &self.inputs {
                write_varint(&mut out, input.witness.len() as u64);
                for item in &input.witness {
                    write_bytes(&mut out, item);
                }
            }
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Network serialization including witnesses
    pub fn to_bytes(&self) -> Vec<u8> {
        self.serialize(true)
    }

    /// Hex txid (witness data excluded)
    pub fn txid(&self) -> String {
        internal_to_txid(&sha256d(&self.serialize(false)))
    }

    /// BIP143 SIGHASH_ALL digest for input `index`
    pub fn segwit_sighash(&self, index: usize, script_code: &[u8]) -> Option<[u8; 32]> {
        let input = self.inputs.get(index)?;

        let mut prevouts = Vec::with_capacity(self.inputs.len() * 36);
        let mut sequences = Vec::with_capacity(self.inputs.len() * 4);
        for i in &self.inputs {
            prevouts.extend_from_slice(&i.prev_hash);
            prevouts.extend_from_slice(&i.prev_index.to_le_bytes());
            sequences.extend_from_slice(&i.sequence.to_le_bytes());
        }

        let mut preimage = self.version.to_le_bytes().to_vec();
        preimage.extend_from_slice(&sha256d(&prevouts));
        preimage.extend_from_slice(&sha256d(&sequences));
        preimage.extend_from_slice(&input.prev_hash);
        preimage.extend_from_slice(&input.prev_index.to_le_bytes());
        write_bytes(&mut preimage, script_code);
        preimage.extend_from_slice(&input.amount.to_le_bytes());
        preimage.extend_from_slice(&input.sequence.to_le_bytes());
        preimage.extend_from_slice(&sha256d(&serialize_outputs(&self.outputs)));
        preimage.extend_from_slice(&self.lock_time.to_le_bytes());
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        Some(sha256d(&preimage))
    }
}

/// Estimated virtual size of a TSS spend
pub fn estimate_vsize(num_inputs: u64, payee_script_len: Option<usize>) -> u64 {
    // version + locktime + input/output count varints
    let base = 8 + 1 + 1;
    let inputs = num_inputs * BYTES_PER_INPUT;
    // nonce mark and change
    let mut outputs = 2 * BYTES_PER_OUTPUT_P2WPKH;
    if let Some(len) = payee_script_len {
        outputs += 9 + len as u64;
    }
    let witness = BYTES_1ST_WITNESS + num_inputs.saturating_sub(1) * BYTES_PER_WITNESS;
    base + inputs + outputs + witness / 4
}

/// Pick inputs: the previous nonce mark first if present, then largest first
pub fn select_utxos(utxos: &[Utxo], nonce: u64, target: u64) -> Option<Vec<Utxo>> {
    let mut candidates = utxos.to_vec();
    candidates.sort_by(|a, b| b.amount.cmp(&a.amount));
    if nonce > 0 {
        let mark = nonce_mark_amount(nonce - 1);
        if let Some(pos) = candidates.iter().position(|u| u.vout == 0 && u.amount == mark) {
            let prev_mark = candidates.remove(pos);
            candidates.insert(0, prev_mark);
        }
    }

    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in candidates {
        if total >= target {
            break;
        }
        total += utxo.amount;
        selected.push(utxo);
    }
    (total >= target).then_some(selected)
}

/// Build the unsigned outbound spending TSS UTXOs at `fee_rate` sat/vB
pub fn build_unsigned(
    request: &OutboundRequest,
    tss_script: &[u8],
    utxos: &[Utxo],
    fee_rate: u64,
) -> AdapterResult<BtcTx> {
    let payee = if request.is_nonce_only() {
        None
    } else {
        let script = address_to_script(&request.receiver)?;
        let amount = u64::try_from(request.amount)
            .map_err(|_| AdapterError::Unsupported(format!("amount {} overflows", request.amount)))?;
        if amount < DUST_LIMIT {
            return Err(AdapterError::Unsupported(format!(
                "amount {} below dust limit",
                amount
            )));
        }
        Some((script, amount))
    };

    let mark = nonce_mark_amount(request.nonce);
    let pay_amount = payee.as_ref().map(|(_, a)| *a).unwrap_or(0);
    let payee_len = payee.as_ref().map(|(s, _)| s.len());

    // Fee depends on input count; grow the estimate until selection settles
    let mut num_inputs = 1u64;
    let (selected, fee) = loop {
        let fee = fee_rate.max(1) * estimate_vsize(num_inputs, payee_len);
        let target = mark + pay_amount + fee;
        let selected = select_utxos(utxos, request.nonce, target).ok_or_else(|| {
            AdapterError::InsufficientFunds(format!(
                "need {} sats for nonce {}",
                target, request.nonce
            ))
        })?;
        if selected.len() as u64 <= num_inputs {
            break (selected, fee);
        }
        num_inputs = selected.len() as u64;
    };

    let total: u64 = selected.iter().map(|u| u.amount).sum();
    let change = total - mark - pay_amount - fee;

    let mut outputs = vec![TxOut {
        value: mark,
        script: tss_script.to_vec(),
    }];
    if let Some((script, amount)) = payee {
        outputs.push(TxOut {
            value: amount,
            script,
        });
    }
    if change >= DUST_LIMIT {
        outputs.push(TxOut {
            value: change,
            script: tss_script.to_vec(),
        });
    }

    let inputs = selected
        .iter()
        .map(|u| {
            Ok(TxIn {
                prev_hash: txid_to_internal(&u.txid)
                    .ok_or_else(|| AdapterError::Decode(format!("bad utxo txid {}", u.txid)))?,
                prev_index: u.vout,
                sequence: 0xffff_ffff,
                amount: u.amount,
                witness: Vec::new(),
            })
        })
        .collect::<AdapterResult<Vec<_>>>()?;

    Ok(BtcTx {
        version: 2,
        inputs,
        outputs,
        lock_time: 0,
    })
}

/// Sign every input with the TSS key and return the broadcast-ready transaction
pub async fn sign_outbound(
    mut tx: BtcTx,
    request: &OutboundRequest,
    tss_script: &[u8],
    tss: &dyn TssSigner,
) -> AdapterResult<SignedTx> {
    let pubkey_hash = p2wpkh_program(tss_script).ok_or_else(|| {
        AdapterError::InvalidAddress("TSS address is not P2WPKH".to_string())
    })?;
    let script_code = p2wpkh_script_code(&pubkey_hash);
    let pubkey = tss.pubkey();
    let round = RoundMetadata {
        height: request.height,
        nonce: request.nonce,
        chain_id: request.chain_id,
    };

    for index in 0..tx.inputs.len() {
        let digest = tx
            .segwit_sighash(index, &script_code)
            .ok_or_else(|| AdapterError::Decode(format!("no input {}", index)))?;
        let signature = tss.sign(&digest, &round).await?;
        let der = Signature::from_slice(&signature.rs())
            .map_err(|e| AdapterError::Decode(format!("bad signature: {}", e)))?
            .to_der();
        let mut sig_bytes = der.as_bytes().to_vec();
        sig_bytes.push(SIGHASH_ALL as u8);
        tx.inputs[index].witness = vec![sig_bytes, pubkey.clone()];
    }

    Ok(SignedTx {
        chain_id: request.chain_id,
        nonce: request.nonce,
        kind: request.kind,
        hash: tx.txid(),
        raw: tx.to_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tss::LocalTssSigner;
    use crate::types::{ChainId, CoinType, OutboundKind};

    const TSS_SCRIPT_HEX: &str = "0014751e76e8199196d454941c45d1b3a323f1433bd6";

    fn tss_script() -> Vec<u8> {
        hex::decode(TSS_SCRIPT_HEX).unwrap()
    }

    fn request(amount: u128, nonce: u64) -> OutboundRequest {
        OutboundRequest {
            cctx_index: "0x01".to_string(),
            chain_id: ChainId(18444),
            nonce,
            receiver: "bcrt1qqqqsyqcyq5rqwzqfpg9scrgwpugpzysnard0ew".to_string(),
            amount,
            asset: String::new(),
            coin_type: CoinType::Gas,
            gas_price: 10,
            priority_fee: 0,
            gas_limit: 0,
            gateway: String::new(),
            height: 1,
            kind: OutboundKind::Withdraw,
        }
    }

    fn utxo(byte: u8, vout: u32, amount: u64) -> Utxo {
        Utxo {
            txid: hex::encode([byte; 32]),
            vout,
            amount,
        }
    }

    #[test]
    fn test_bip143_p2wpkh_sighash() {
        // Native P2WPKH example from BIP143
        let tx = BtcTx {
            version: 1,
            inputs: vec![
                TxIn {
                    prev_hash: hex::decode(
                        "fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f",
                    )
                    .unwrap()
                    .try_into()
                    .unwrap(),
                    prev_index: 0,
                    sequence: 0xffff_ffee,
                    amount: 625_000_000,
                    witness: Vec::new(),
                },
                TxIn {
                    prev_hash: hex::decode(
                        "ef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a",
                    )
                    .unwrap()
                    .try_into()
                    .unwrap(),
                    prev_index: 1,
                    sequence: 0xffff_ffff,
                    amount: 600_000_000,
                    witness: Vec::new(),
                },
            ],
            outputs: vec![
                TxOut {
                    value: 112_340_000,
                    script: hex::decode("76a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac")
                        .unwrap(),
                },
                TxOut {
                    value: 223_450_000,
                    script: hex::decode("76a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac")
                        .unwrap(),
                },
            ],
            lock_time: 0x11,
        };

        let pkh: [u8; 20] = hex::decode("1d0f172a0ecb48aee1be1f2687d2963ae33f71a1")
            .unwrap()
            .try_into()
            .unwrap();
        let digest = tx.segwit_sighash(1, &p2wpkh_script_code(&pkh)).unwrap();
        assert_eq!(
            hex::encode(digest),
            "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
        );
    }

    #[test]
    fn test_select_prefers_previous_nonce_mark() {
        let utxos = vec![
            utxo(1, 1, 1_000_000),
            utxo(2, 0, nonce_mark_amount(4)),
            utxo(3, 2, 50_000),
        ];
        let selected = select_utxos(&utxos, 5, 500_000).unwrap();
        assert_eq!(selected[0].amount, nonce_mark_amount(4));
        assert_eq!(selected[1].amount, 1_000_000);
        assert!(select_utxos(&utxos, 5, 10_000_000).is_none());
    }

    #[test]
    fn test_build_withdraw_outputs() {
        let utxos = vec![utxo(1, 1, 1_000_000)];
        let tx = build_unsigned(&request(100_000, 3), &tss_script(), &utxos, 10).unwrap();
        assert_eq!(tx.outputs.len(), 3);
        assert_eq!(tx.outputs[0].value, nonce_mark_amount(3));
        assert_eq!(tx.outputs[0].script, tss_script());
        assert_eq!(tx.outputs[1].value, 100_000);
        let fee = 10 * estimate_vsize(1, Some(22));
        assert_eq!(
            tx.outputs[2].value,
            1_000_000 - 100_000 - nonce_mark_amount(3) - fee
        );
    }

    #[test]
    fn test_nonce_only_has_no_payee() {
        let utxos = vec![utxo(1, 1, 1_000_000)];
        let mut req = request(0, 3);
        req.receiver = "garbage".to_string();
        let tx = build_unsigned(&req, &tss_script(), &utxos, 10).unwrap();
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, nonce_mark_amount(3));
    }

    #[test]
    fn test_insufficient_funds_and_dust() {
        let utxos = vec![utxo(1, 1, 3_000)];
        assert!(matches!(
            build_unsigned(&request(100_000, 0), &tss_script(), &utxos, 10),
            Err(AdapterError::InsufficientFunds(_))
        ));
        assert!(matches!(
            build_unsigned(&request(100, 0), &tss_script(), &utxos, 10),
            Err(AdapterError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_outbound_sets_witnesses() {
        let tss = LocalTssSigner::from_hex(
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        )
        .unwrap();
        let utxos = vec![utxo(1, 1, 1_000_000)];
        let req = request(100_000, 3);
        let unsigned = build_unsigned(&req, &tss_script(), &utxos, 10).unwrap();
        let txid = unsigned.txid();
        let signed = sign_outbound(unsigned, &req, &tss_script(), &tss)
            .await
            .unwrap();
        // witness data does not change the txid
        assert_eq!(signed.hash, txid);
        assert_eq!(&signed.raw[4..6], &[0x00, 0x01]);
        assert_eq!(signed.nonce, 3);
    }
}
