//! Bitcoin Core JSON-RPC client
//!
//! Requires a node with `txindex=1` so sender addresses can be resolved from
//! previous outputs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::adapter::{AdapterError, AdapterResult};

/// `RPC_INVALID_ADDRESS_OR_KEY`, returned for unknown transactions
pub const RPC_NOT_FOUND: i64 = -5;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPubKey {
    pub hex: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vin {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Vout {
    /// BTC
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTx {
    pub txid: String,
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub confirmations: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockVerbose {
    pub hash: String,
    pub height: u64,
    pub merkleroot: String,
    pub tx: Vec<RawTx>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub height: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    /// BTC
    pub amount: f64,
    #[serde(default)]
    pub confirmations: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct SmartFee {
    /// BTC per kvB
    #[serde(default)]
    feerate: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

/// Convert a BTC amount from RPC into satoshis
pub fn btc_to_sats(value: f64) -> u64 {
    (value * 100_000_000.0).round() as u64
}

/// Bitcoin Core RPC over HTTP basic auth
pub struct BitcoinRpc {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl BitcoinRpc {
    pub fn new(url: &str, user: &str, password: &str) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::Rpc(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> AdapterResult<T> {
        match self.call_raw(method, params).await? {
            Ok(result) => Ok(result),
            Err(body) => Err(AdapterError::Rpc(format!(
                "{} failed ({}): {}",
                method, body.code, body.message
            ))),
        }
    }

    /// Call returning the node's error object instead of folding it into an error
    async fn call_raw<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> AdapterResult<Result<T, RpcErrorBody>> {
        let request = RpcRequest {
            jsonrpc: "1.0",
            id: 1,
            method,
            params,
        };
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| AdapterError::Rpc(format!("{}: {}", method, e)))?;

        // bitcoind answers RPC errors with HTTP 500 and a JSON body
        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| AdapterError::Decode(format!("{}: {}", method, e)))?;

        match (body.result, body.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Err(AdapterError::Decode(format!("{}: empty result", method))),
        }
    }

    pub async fn get_block_count(&self) -> AdapterResult<u64> {
        self.call("getblockcount", json!([])).await
    }

    pub async fn get_block_hash(&self, height: u64) -> AdapterResult<String> {
        self.call("getblockhash", json!([height])).await
    }

    pub async fn get_block_verbose(&self, hash: &str) -> AdapterResult<BlockVerbose> {
        self.call("getblock", json!([hash, 2])).await
    }

    pub async fn get_block_header(&self, hash: &str) -> AdapterResult<BlockHeader> {
        self.call("getblockheader", json!([hash, true])).await
    }

    /// Verbose transaction, `None` if the node does not know it
    pub async fn get_raw_transaction(&self, txid: &str) -> AdapterResult<Option<RawTx>> {
        match self
            .call_raw::<RawTx>("getrawtransaction", json!([txid, true]))
            .await?
        {
            Ok(tx) => Ok(Some(tx)),
            Err(e) if e.code == RPC_NOT_FOUND => Ok(None),
            Err(e) => Err(AdapterError::Rpc(format!(
                "getrawtransaction failed ({}): {}",
                e.code, e.message
            ))),
        }
    }

    /// Broadcast; node rejections are surfaced as [`AdapterError::BroadcastRejected`]
    pub async fn send_raw_transaction(&self, raw_hex: &str) -> AdapterResult<String> {
        match self
            .call_raw::<String>("sendrawtransaction", json!([raw_hex]))
            .await?
        {
            Ok(txid) => Ok(txid),
            Err(e) => Err(AdapterError::BroadcastRejected {
                reason: e.message,
                logs: Vec::new(),
            }),
        }
    }

    /// Fee estimate in sat/vB, `None` when the node has too little data
    pub async fn estimate_smart_fee(&self, conf_target: u64) -> AdapterResult<Option<u64>> {
        let fee: SmartFee = self.call("estimatesmartfee", json!([conf_target])).await?;
        Ok(fee
            .feerate
            .filter(|rate| *rate > 0.0)
            .map(|rate| ((rate * 100_000_000.0) / 1000.0).ceil() as u64))
    }

    pub async fn list_unspent(&self, address: &str) -> AdapterResult<Vec<UnspentOutput>> {
        self.call("listunspent", json!([0, 9_999_999, [address]]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btc_to_sats() {
        assert_eq!(btc_to_sats(0.00012345), 12_345);
        assert_eq!(btc_to_sats(1.0), 100_000_000);
        assert_eq!(btc_to_sats(0.1 + 0.2), 30_000_000);
    }

    #[test]
    fn test_block_deserialization() {
        let block: BlockVerbose = serde_json::from_value(json!({
            "hash": "00ab",
            "height": 101,
            "merkleroot": "ff00",
            "tx": [{
                "txid": "aa",
                "vin": [{"coinbase": "0401"}],
                "vout": [{"value": 50.0, "n": 0, "scriptPubKey": {"hex": "0014"}}]
            }]
        }))
        .unwrap();
        assert_eq!(block.height, 101);
        assert!(block.tx[0].vin[0].coinbase.is_some());
        assert_eq!(block.tx[0].vout[0].script_pub_key.hex, "0014");
    }

    #[test]
    fn test_error_response_deserialization() {
        let resp: RpcResponse<String> = serde_json::from_value(json!({
            "result": null,
            "error": {"code": -26, "message": "txn-mempool-conflict"},
            "id": 1
        }))
        .unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -26);
    }
}
