//! Segwit address codec, OP_RETURN memos and the inbound memo layout
//!
//! Inbound memo (carried in vout[1] as OP_RETURN):
//! `dest_chain_id (u64 BE) || receiver_len (u8) || receiver || payload`

use bech32::{FromBase32, ToBase32, Variant};

use crate::adapter::{AdapterError, AdapterResult};
use crate::types::ChainId;

const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;

/// scriptPubKey for a bech32 / bech32m segwit address
pub fn address_to_script(address: &str) -> AdapterResult<Vec<u8>> {
    let invalid = || AdapterError::InvalidAddress(address.to_string());
    let (_hrp, data, variant) = bech32::decode(address).map_err(|_| invalid())?;
    let (version, program) = data.split_first().ok_or_else(invalid)?;
    let version = version.to_u8();
    let program = Vec::<u8>::from_base32(program).map_err(|_| invalid())?;

    match (version, variant) {
        (0, Variant::Bech32) if program.len() == 20 || program.len() == 32 => {}
        (1..=16, Variant::Bech32m) if (2..=40).contains(&program.len()) => {}
        _ => return Err(invalid()),
    }

    let mut script = Vec::with_capacity(program.len() + 2);
    script.push(if version == 0 { OP_0 } else { OP_1 + version - 1 });
    script.push(program.len() as u8);
    script.extend_from_slice(&program);
    Ok(script)
}

/// Segwit address for a scriptPubKey, `None` for non-witness scripts
pub fn script_to_address(hrp: &str, script: &[u8]) -> Option<String> {
    if script.len() < 4 || script[1] as usize != script.len() - 2 {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0u8,
        op if (OP_1..OP_1 + 16).contains(&op) => op - OP_1 + 1,
        _ => return None,
    };
    let variant = if version == 0 {
        Variant::Bech32
    } else {
        Variant::Bech32m
    };
    let mut data = vec![bech32::u5::try_from_u8(version).ok()?];
    data.extend((&script[2..]).to_base32());
    bech32::encode(hrp, data, variant).ok()
}

/// Human-readable part of a bech32 address
pub fn address_hrp(address: &str) -> AdapterResult<String> {
    bech32::decode(address)
        .map(|(hrp, _, _)| hrp)
        .map_err(|_| AdapterError::InvalidAddress(address.to_string()))
}

/// 20-byte witness program of a P2WPKH script
pub fn p2wpkh_program(script: &[u8]) -> Option<[u8; 20]> {
    if script.len() == 22 && script[0] == OP_0 && script[1] == 20 {
        script[2..].try_into().ok()
    } else {
        None
    }
}

/// Extract OP_RETURN data; `Ok(None)` for other scripts
pub fn decode_op_return(script: &[u8]) -> Result<Option<Vec<u8>>, String> {
    if script.len() < 2 || script[0] != OP_RETURN {
        return Ok(None);
    }
    let size = script[1];
    let data = if size < OP_PUSHDATA1 {
        if size as usize != script.len() - 2 {
            return Err(format!(
                "memo size mismatch: {} != {}",
                size,
                script.len() - 2
            ));
        }
        &script[2..]
    } else if size == OP_PUSHDATA1 {
        if script.len() < 3 {
            return Err("script too short".to_string());
        }
        let size = script[2] as usize;
        if size != script.len() - 3 {
            return Err(format!("memo size mismatch: {} != {}", size, script.len() - 3));
        }
        &script[3..]
    } else {
        return Err(format!("unsupported push opcode {:#x}", size));
    };
    Ok(Some(data.to_vec()))
}

/// OP_RETURN script carrying `data`
pub fn encode_op_return(data: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_RETURN];
    if data.len() < OP_PUSHDATA1 as usize {
        script.push(data.len() as u8);
    } else {
        script.push(OP_PUSHDATA1);
        script.push(data.len() as u8);
    }
    script.extend_from_slice(data);
    script
}

/// Decoded inbound memo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMemo {
    pub receiver_chain_id: ChainId,
    pub receiver: Vec<u8>,
    pub payload: Vec<u8>,
}

impl InboundMemo {
    pub fn decode(memo: &[u8]) -> Result<Self, String> {
        if memo.len() < 9 {
            return Err(format!("memo too short: {} bytes", memo.len()));
        }
        let mut chain = [0u8; 8];
        chain.copy_from_slice(&memo[..8]);
        let receiver_len = memo[8] as usize;
        let receiver = memo
            .get(9..9 + receiver_len)
            .ok_or_else(|| "receiver length out of range".to_string())?;
        Ok(Self {
            receiver_chain_id: ChainId(u64::from_be_bytes(chain)),
            receiver: receiver.to_vec(),
            payload: memo[9 + receiver_len..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.receiver_chain_id.to_be_bytes().to_vec();
        out.push(self.receiver.len() as u8);
        out.extend_from_slice(&self.receiver);
        out.extend_from_slice(&self.payload);
        out
    }
}
