//! A [`ChainRpc`] implementation for EVM nodes speaking JSON-RPC.

use std::borrow::Cow;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::primitives::Bytes;
use alloy::primitives::B256;
use alloy::primitives::U256;
use alloy::sol_types::SolCall as _;
use ledger::chain::Chain;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use url::Url;

use super::router::IERC20;
use super::Block;
use super::CallRequest;
use super::ChainRpc;
use super::Log;
use super::Receipt;
use super::RpcTransaction;
use crate::error::Error;
use crate::error::RpcError;
use crate::error::RpcErrorKind;

/// Reads are retried for at most this many request timeouts.
const READ_RETRY_TIMEOUTS: u32 = 3;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    hash: String,
    from: String,
    #[serde(default)]
    to: Option<String>,
    value: String,
    input: String,
    nonce: String,
    gas: String,
    #[serde(default)]
    gas_price: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlock {
    number: String,
    hash: String,
    parent_hash: String,
    #[serde(default)]
    transactions: Vec<WireTransaction>,
}

#[derive(Debug, Deserialize)]
struct WireLog {
    address: String,
    topics: Vec<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
    gas_used: String,
    #[serde(default)]
    effective_gas_price: Option<String>,
    #[serde(default)]
    logs: Vec<WireLog>,
    block_number: String,
}

fn unexpected(what: &str, value: &str) -> Error {
    Error::UnexpectedChainRpcResponse(Cow::Owned(format!("invalid {what}: {value:?}")))
}

fn strip_hex_prefix(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

fn parse_u64(value: &str) -> Result<u64, Error> {
    u64::from_str_radix(strip_hex_prefix(value), 16).map_err(|_| unexpected("quantity", value))
}

fn parse_u128(value: &str) -> Result<u128, Error> {
    u128::from_str_radix(strip_hex_prefix(value), 16).map_err(|_| unexpected("quantity", value))
}

fn parse_u256(value: &str) -> Result<U256, Error> {
    U256::from_str_radix(strip_hex_prefix(value), 16).map_err(|_| unexpected("quantity", value))
}

fn parse_hash(value: &str) -> Result<B256, Error> {
    value.parse().map_err(|_| unexpected("hash", value))
}

fn parse_address(value: &str) -> Result<Address, Error> {
    value.parse().map_err(|_| unexpected("address", value))
}

fn parse_bytes(value: &str) -> Result<Bytes, Error> {
    hex::decode(strip_hex_prefix(value))
        .map(Bytes::from)
        .map_err(|_| unexpected("data", value))
}

fn block_tag(height: Option<u64>) -> String {
    match height {
        Some(height) => format!("0x{height:x}"),
        None => "latest".to_string(),
    }
}

impl TryFrom<WireTransaction> for RpcTransaction {
    type Error = Error;

    fn try_from(value: WireTransaction) -> Result<Self, Self::Error> {
        Ok(RpcTransaction {
            hash: parse_hash(&value.hash)?,
            from: parse_address(&value.from)?,
            to: value.to.as_deref().map(parse_address).transpose()?,
            value: parse_u256(&value.value)?,
            input: parse_bytes(&value.input)?,
            nonce: parse_u64(&value.nonce)?,
            gas: parse_u64(&value.gas)?,
            gas_price: value.gas_price.as_deref().map(parse_u128).transpose()?.unwrap_or(0),
            block_number: value.block_number.as_deref().map(parse_u64).transpose()?,
        })
    }
}

impl TryFrom<WireBlock> for Block {
    type Error = Error;

    fn try_from(value: WireBlock) -> Result<Self, Self::Error> {
        Ok(Block {
            number: parse_u64(&value.number)?,
            hash: parse_hash(&value.hash)?,
            parent_hash: parse_hash(&value.parent_hash)?,
            transactions: value
                .transactions
                .into_iter()
                .map(RpcTransaction::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl TryFrom<WireLog> for Log {
    type Error = Error;

    fn try_from(value: WireLog) -> Result<Self, Self::Error> {
        Ok(Log {
            address: parse_address(&value.address)?,
            topics: value
                .topics
                .iter()
                .map(|topic| parse_hash(topic))
                .collect::<Result<_, _>>()?,
            data: parse_bytes(&value.data)?,
        })
    }
}

impl TryFrom<WireReceipt> for Receipt {
    type Error = Error;

    fn try_from(value: WireReceipt) -> Result<Self, Self::Error> {
        // Pre-byzantium receipts carry no status, they are treated as
        // successful.
        let status = match value.status.as_deref() {
            Some(status) => parse_u64(status)? == 1,
            None => true,
        };
        Ok(Receipt {
            transaction_hash: parse_hash(&value.transaction_hash)?,
            status,
            gas_used: parse_u64(&value.gas_used)?,
            effective_gas_price: value
                .effective_gas_price
                .as_deref()
                .map(parse_u128)
                .transpose()?
                .unwrap_or(0),
            logs: value
                .logs
                .into_iter()
                .map(Log::try_from)
                .collect::<Result<_, _>>()?,
            block_number: parse_u64(&value.block_number)?,
        })
    }
}

/// A JSON-RPC client for one EVM node.
#[derive(Debug, Clone)]
pub struct EvmRpcClient {
    chain: Chain,
    endpoint: Url,
    client: reqwest::Client,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl EvmRpcClient {
    /// Create a client for the node at `endpoint`.
    pub fn new(chain: Chain, endpoint: Url, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self {
            chain,
            endpoint,
            client,
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// The endpoint of the node.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one request. A `null` result is returned as `None`.
    async fn request<T>(&self, method: &str, params: Value) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(Error::ChainRpcRequest)?
            .error_for_status()
            .map_err(Error::ChainRpcRequest)?
            .json::<JsonRpcResponse>()
            .await
            .map_err(Error::ChainRpcRequest)?;

        if let Some(error) = response.error {
            return Err(Error::ChainRpc(self.chain, RpcError::new(error.message)));
        }

        match response.result {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| Error::UnexpectedChainRpcResponse(Cow::Owned(err.to_string()))),
        }
    }

    /// Send an idempotent request, retrying transient failures with an
    /// exponential backoff.
    async fn read<T>(&self, method: &'static str, params: Value) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(self.timeout * READ_RETRY_TIMEOUTS),
            ..Default::default()
        };

        let attempt = || async {
            self.request(method, params.clone())
                .await
                .map_err(|error| match &error {
                    Error::ChainRpcRequest(_) => backoff::Error::transient(error),
                    Error::ChainRpc(_, rpc) if rpc.kind == RpcErrorKind::Timeout => {
                        backoff::Error::transient(error)
                    }
                    _ => backoff::Error::permanent(error),
                })
        };

        backoff::future::retry_notify(backoff, attempt, |error, duration: Duration| {
            tracing::debug!(
                %error,
                chain = %self.chain,
                method,
                "chain rpc read failed, retrying in {}ms",
                duration.as_millis(),
            )
        })
        .await
    }

    fn not_found(&self, what: String) -> Error {
        Error::ChainRpc(self.chain, RpcError::with_kind(RpcErrorKind::NotFound, what))
    }
}

impl ChainRpc for EvmRpcClient {
    async fn get_height(&self) -> Result<u64, Error> {
        let height: Option<String> = self.read("eth_blockNumber", json!([])).await?;
        let height = height.ok_or_else(|| self.not_found("block number".to_string()))?;
        parse_u64(&height)
    }

    async fn get_block(&self, height: u64) -> Result<Block, Error> {
        let block: Option<WireBlock> = self
            .read("eth_getBlockByNumber", json!([block_tag(Some(height)), true]))
            .await?;
        block
            .ok_or_else(|| self.not_found(format!("block {height}")))?
            .try_into()
    }

    async fn get_receipt(&self, hash: B256) -> Result<Option<Receipt>, Error> {
        let receipt: Option<WireReceipt> = self
            .read("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        receipt.map(Receipt::try_from).transpose()
    }

    async fn get_transaction(&self, hash: B256) -> Result<Option<RpcTransaction>, Error> {
        let tx: Option<WireTransaction> = self
            .read("eth_getTransactionByHash", json!([hash.to_string()]))
            .await?;
        tx.map(RpcTransaction::try_from).transpose()
    }

    async fn get_nonce(&self, address: Address) -> Result<u64, Error> {
        let nonce: Option<String> = self
            .read("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        let nonce = nonce.ok_or_else(|| self.not_found(format!("nonce of {address}")))?;
        parse_u64(&nonce)
    }

    async fn get_balance(
        &self,
        address: Address,
        token: Option<Address>,
        height: Option<u64>,
    ) -> Result<U256, Error> {
        let tag = block_tag(height);
        let Some(token) = token else {
            let balance: Option<String> = self
                .read("eth_getBalance", json!([address.to_string(), tag]))
                .await?;
            return balance.as_deref().map(parse_u256).unwrap_or(Ok(U256::ZERO));
        };

        let data = IERC20::balanceOfCall { account: address }.abi_encode();
        let call = json!({
            "to": token.to_string(),
            "data": format!("0x{}", hex::encode(data)),
        });
        let result: Option<String> = self.read("eth_call", json!([call, tag])).await?;
        let bytes = parse_bytes(result.as_deref().unwrap_or("0x"))?;
        if bytes.len() < 32 {
            return Err(unexpected("balanceOf result", &bytes.to_string()));
        }
        Ok(U256::from_be_slice(&bytes[..32]))
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, Error> {
        let params = json!([{
            "from": call.from.to_string(),
            "to": call.to.to_string(),
            "value": format!("{:#x}", call.value),
            "data": format!("0x{}", hex::encode(&call.data)),
        }]);
        // Estimation failures are usually reverts, so they are not retried.
        let gas: Option<String> = self.request("eth_estimateGas", params).await?;
        let gas = gas.ok_or_else(|| self.not_found("gas estimate".to_string()))?;
        parse_u64(&gas)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, Error> {
        let params = json!([format!("0x{}", hex::encode(raw))]);
        let hash: Option<String> = self.request("eth_sendRawTransaction", params).await?;
        let hash = hash.ok_or_else(|| unexpected("transaction hash", "null"))?;
        parse_hash(&hash)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use mockito::Matcher;

    use super::*;

    fn client(server: &mockito::Server) -> EvmRpcClient {
        let url = Url::parse(&server.url()).unwrap();
        EvmRpcClient::new(Chain::Eth, url, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn blocks_are_decoded() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "number": "0x10",
                "hash": format!("0x{}", "11".repeat(32)),
                "parentHash": format!("0x{}", "22".repeat(32)),
                "transactions": [{
                    "hash": format!("0x{}", "33".repeat(32)),
                    "from": "0x9f5f8e1f7ad7c1f4c52af0bbce5c5e9e0c5e4d21",
                    "to": "0x1f9840a85d5af5bf1d1762f925bdaddc4201f984",
                    "value": "0xde0b6b3a7640000",
                    "input": "0x3d3a4554482e455448",
                    "nonce": "0x1",
                    "gas": "0x5208",
                    "gasPrice": "0x3b9aca00",
                    "blockNumber": "0x10"
                }]
            }
        });
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({"method": "eth_getBlockByNumber"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let block = client(&server).get_block(16).await.unwrap();
        mock.assert_async().await;

        assert_eq!(block.number, 16);
        assert_eq!(block.transactions.len(), 1);
        let tx = &block.transactions[0];
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(tx.gas_price, 1_000_000_000);
        assert_eq!(tx.input.as_ref(), b"=:ETH.ETH");
        assert_eq!(
            tx.to,
            Some(Address::from_str("0x1f9840a85d5af5bf1d1762f925bdaddc4201f984").unwrap())
        );
    }

    #[tokio::test]
    async fn node_errors_carry_their_kind() {
        let mut server = mockito::Server::new_async().await;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "nonce too low" }
        });
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .expect(1)
            .create_async()
            .await;

        let err = client(&server).send_raw_transaction(&[0xf8]).await.unwrap_err();
        mock.assert_async().await;

        match err {
            Error::ChainRpc(Chain::Eth, rpc) => assert_eq!(rpc.kind, RpcErrorKind::NonceTooLow),
            err => panic!("unexpected error {err}"),
        }
    }

    #[tokio::test]
    async fn missing_receipts_are_none() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": null}).to_string())
            .create_async()
            .await;

        let receipt = client(&server).get_receipt(B256::repeat_byte(1)).await.unwrap();
        mock.assert_async().await;
        assert!(receipt.is_none());
    }

    #[test]
    fn failed_receipts_are_flagged() {
        let wire = WireReceipt {
            transaction_hash: format!("0x{}", "44".repeat(32)),
            status: Some("0x0".to_string()),
            gas_used: "0x5208".to_string(),
            effective_gas_price: Some("0x2".to_string()),
            logs: Vec::new(),
            block_number: "0x1".to_string(),
        };
        let receipt = Receipt::try_from(wire).unwrap();
        assert!(!receipt.status);
        assert_eq!(receipt.fee(), 42_000);
    }
}
