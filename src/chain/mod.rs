//! Chain collaborators
//!
//! Read-only access (code, balance, calls) and a write path that accepts
//! only threshold-satisfied transactions or factory deployments.

pub mod rpc;

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;

use crate::error::Result;
use crate::signing::SignedTransaction;

pub use rpc::RpcChainClient;

/// Per-chain read access
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Chains this reader can reach
    fn chain_ids(&self) -> Vec<u64>;

    /// Deployed bytecode at `address` (empty if none)
    async fn get_code(&self, chain_id: u64, address: Address, timeout: Duration) -> Result<Bytes>;

    /// Native balance of `address`
    async fn get_balance(&self, chain_id: u64, address: Address, timeout: Duration) -> Result<U256>;

    /// Read-only call
    async fn call(&self, chain_id: u64, to: Address, data: Bytes, timeout: Duration) -> Result<Bytes>;
}

/// Sends fully prepared calls
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Submit `call` on `chain_id`, returning the transaction hash
    async fn broadcast(&self, chain_id: u64, call: &OutboundCall) -> Result<B256>;
}

/// A call ready for submission
///
/// Built only from a [`SignedTransaction`] or by crate code preparing a
/// factory deployment, so the writer never sees an under-signed wallet call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCall {
    to: Address,
    value: U256,
    data: Bytes,
}

impl OutboundCall {
    pub(crate) fn new(to: Address, value: U256, data: Bytes) -> Self {
        Self { to, value, data }
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

impl From<&SignedTransaction> for OutboundCall {
    fn from(signed: &SignedTransaction) -> Self {
        Self::new(signed.vault_id, U256::ZERO, signed.calldata.clone())
    }
}
