//! JSON-RPC chain client
//!
//! Reads go through `eth_getCode`, `eth_getBalance` and `eth_call` with
//! transient-error retry inside the caller's timeout. Writes are relayed with
//! `eth_sendTransaction` from a configured account and never retried.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{ChainConfig, RelayerConfig};
use crate::error::{Error, Result};

use super::{ChainReader, ChainWriter, OutboundCall};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client for every configured chain
pub struct RpcChainClient {
    client: Client,
    endpoints: HashMap<u64, String>,
    relayer: RelayerConfig,
}

impl RpcChainClient {
    pub fn new(chains: &[ChainConfig], relayer: RelayerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let endpoints = chains
            .iter()
            .map(|c| (c.chain_id, c.rpc_url.clone()))
            .collect::<HashMap<_, _>>();

        info!("RPC client initialized for {} chains", endpoints.len());

        Ok(Self {
            client,
            endpoints,
            relayer,
        })
    }

    fn endpoint(&self, chain_id: u64) -> Result<&str> {
        self.endpoints
            .get(&chain_id)
            .map(String::as_str)
            .ok_or(Error::UnsupportedChain(chain_id))
    }

    /// Latest block number, used by health checks
    pub async fn block_number(&self, chain_id: u64, timeout: Duration) -> Result<u64> {
        let value = self.request(chain_id, "eth_blockNumber", json!([]), timeout).await?;
        let number = parse_quantity(chain_id, &value)?;
        u64::try_from(number).map_err(|_| Error::Rpc {
            chain_id,
            message: format!("block number out of range: {}", number),
        })
    }

    /// One request with retry on transport failures, bounded by `timeout`
    async fn request(&self, chain_id: u64, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let url = self.endpoint(chain_id)?.to_string();
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.relayer.retry_base_delay_ms),
            max_interval: Duration::from_millis(self.relayer.retry_base_delay_ms * 4),
            max_elapsed_time: Some(timeout),
            ..Default::default()
        };

        let attempt = retry(backoff, || async {
            match self.send_once(chain_id, &url, &body).await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(chain_id, method, "Retryable RPC error: {}", e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        });

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::RpcTimeout {
                chain_id,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Single attempt; JSON-RPC errors are permanent, transport errors retryable
    async fn send_once(&self, chain_id: u64, url: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Rpc {
                chain_id,
                message: format!("request failed: {}", e.without_url()),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rpc {
                chain_id,
                message: format!("HTTP {}", status),
            });
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse RPC response: {}", e)))?;

        into_result(chain_id, parsed)
    }
}

/// Unwrap a JSON-RPC response; an error object is a permanent rejection
fn into_result(chain_id: u64, parsed: RpcResponse) -> Result<Value> {
    if let Some(error) = parsed.error {
        return Err(Error::RpcRejected {
            chain_id,
            message: format!("{} ({})", error.message, error.code),
        });
    }

    parsed
        .result
        .ok_or_else(|| Error::Serialization("RPC response without result".to_string()))
}

fn as_str(chain_id: u64, value: &Value) -> Result<&str> {
    value.as_str().ok_or_else(|| Error::Rpc {
        chain_id,
        message: format!("expected hex string, got {}", value),
    })
}

fn parse_quantity(chain_id: u64, value: &Value) -> Result<U256> {
    U256::from_str(as_str(chain_id, value)?).map_err(|e| Error::Rpc {
        chain_id,
        message: format!("bad quantity: {}", e),
    })
}

fn parse_bytes(chain_id: u64, value: &Value) -> Result<Bytes> {
    Bytes::from_str(as_str(chain_id, value)?).map_err(|e| Error::Rpc {
        chain_id,
        message: format!("bad data: {}", e),
    })
}

#[async_trait]
impl ChainReader for RpcChainClient {
    fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.endpoints.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    async fn get_code(&self, chain_id: u64, address: Address, timeout: Duration) -> Result<Bytes> {
        debug!(chain_id, address = %address, "eth_getCode");
        let value = self
            .request(chain_id, "eth_getCode", json!([address, "latest"]), timeout)
            .await?;
        parse_bytes(chain_id, &value)
    }

    async fn get_balance(&self, chain_id: u64, address: Address, timeout: Duration) -> Result<U256> {
        let value = self
            .request(chain_id, "eth_getBalance", json!([address, "latest"]), timeout)
            .await?;
        parse_quantity(chain_id, &value)
    }

    async fn call(&self, chain_id: u64, to: Address, data: Bytes, timeout: Duration) -> Result<Bytes> {
        let value = self
            .request(
                chain_id,
                "eth_call",
                json!([{ "to": to, "data": data }, "latest"]),
                timeout,
            )
            .await?;
        parse_bytes(chain_id, &value)
    }
}

#[async_trait]
impl ChainWriter for RpcChainClient {
    async fn broadcast(&self, chain_id: u64, call: &OutboundCall) -> Result<B256> {
        let from = self
            .relayer
            .from
            .ok_or_else(|| Error::Config("relayer.from is not configured".to_string()))?;
        let url = self.endpoint(chain_id)?.to_string();

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendTransaction",
            "params": [{
                "from": from,
                "to": call.to(),
                "value": call.value(),
                "data": call.data(),
            }],
        });

        let timeout = Duration::from_millis(self.relayer.broadcast_timeout_ms);
        let value = match tokio::time::timeout(timeout, self.send_once(chain_id, &url, &body)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                return Err(Error::Broadcast {
                    chain_id,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::Broadcast {
                    chain_id,
                    message: format!(
                        "no response within {}ms; the transaction may have been submitted",
                        timeout.as_millis()
                    ),
                })
            }
        };

        let hash = B256::from_str(as_str(chain_id, &value)?).map_err(|e| Error::Broadcast {
            chain_id,
            message: format!("bad transaction hash: {}", e),
        })?;

        info!(chain_id, to = %call.to(), tx = %hash, "Broadcast transaction");
        Ok(hash)
    }
}
