//! Recovery of funds sent to legacy vault addresses
//!
//! Before the module was part of every vault, addresses were derived with the
//! v1 formula in [`crate::address::legacy`]. This path finds balances left at
//! those addresses, deploys the legacy wallet where needed and sweeps the
//! funds to the vault's current address.
//!
//! Signatures are collected for the sweep before anything is broadcast, so a
//! cancelled prompt never leaves a paid-for deployment behind.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::address::abi::{self, Token};
use crate::address::legacy::LegacyDeriver;
use crate::chain::{ChainReader, ChainWriter, OutboundCall};
use crate::error::{Error, Result};
use crate::ledger::Vault;
use crate::signing::transaction::{nonce_calldata, INITIAL_WALLET_NONCE};
use crate::signing::{SafeTransaction, SignatureCollector, VaultSigner};

const CREATE_PROXY_SIGNATURE: &str = "createProxyWithNonce(address,bytes,uint256)";

/// A vault's legacy address as seen on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyVaultRecord {
    pub vault_id: Address,
    pub legacy_address: Address,
    pub chain_id: u64,
    pub deployed: bool,
    pub balance: U256,
}

/// Per-chain result of a discovery scan
#[derive(Debug)]
pub struct LegacyScan {
    pub chain_id: u64,
    pub result: Result<LegacyVaultRecord>,
}

/// Everything needed to move one chain's legacy balance
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    pub record: LegacyVaultRecord,
    /// Factory call deploying the legacy wallet, if it has no code yet
    pub deployment: Option<OutboundCall>,
    /// Legacy wallet transaction sending the balance to the current vault
    pub sweep: SafeTransaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReceipt {
    pub deployment_tx: Option<B256>,
    pub sweep_tx: B256,
}

pub struct LegacyRecovery {
    deriver: LegacyDeriver,
    reader: Arc<dyn ChainReader>,
    writer: Arc<dyn ChainWriter>,
    collector: SignatureCollector,
    read_timeout: Duration,
}

impl LegacyRecovery {
    pub fn new(
        deriver: LegacyDeriver,
        reader: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            deriver,
            reader,
            writer,
            collector: SignatureCollector::new(),
            read_timeout,
        }
    }

    /// Legacy address for the vault's owner set
    pub fn legacy_address(&self, vault: &Vault) -> Result<Address> {
        self.deriver
            .derive(&vault.signer_ids(), vault.threshold, vault.salt_nonce)
    }

    async fn inspect(&self, vault: &Vault, legacy_address: Address, chain_id: u64) -> Result<LegacyVaultRecord> {
        let code = self
            .reader
            .get_code(chain_id, legacy_address, self.read_timeout)
            .await?;
        let balance = self
            .reader
            .get_balance(chain_id, legacy_address, self.read_timeout)
            .await?;

        Ok(LegacyVaultRecord {
            vault_id: vault.vault_id,
            legacy_address,
            chain_id,
            deployed: !code.is_empty(),
            balance,
        })
    }

    /// Check every chain for code and balance at the legacy address
    pub async fn discover(&self, vault: &Vault) -> Result<Vec<LegacyScan>> {
        let legacy_address = self.legacy_address(vault)?;
        let scans = self.reader.chain_ids().into_iter().map(|chain_id| async move {
            LegacyScan {
                chain_id,
                result: self.inspect(vault, legacy_address, chain_id).await,
            }
        });
        let scans = join_all(scans).await;

        for scan in &scans {
            match &scan.result {
                Ok(record) if !record.balance.is_zero() => info!(
                    vault = %vault.vault_id,
                    legacy = %legacy_address,
                    chain_id = scan.chain_id,
                    balance = %record.balance,
                    "Found funds at legacy address"
                ),
                Ok(_) => {}
                Err(e) => warn!(chain_id = scan.chain_id, "Legacy scan failed: {}", e),
            }
        }

        Ok(scans)
    }

    /// Current nonce of a deployed legacy wallet
    async fn wallet_nonce(&self, chain_id: u64, wallet: Address) -> Result<U256> {
        let raw = self
            .reader
            .call(chain_id, wallet, Bytes::from(nonce_calldata()), self.read_timeout)
            .await?;
        if raw.len() != 32 {
            return Err(Error::Rpc {
                chain_id,
                message: format!("nonce() returned {} bytes", raw.len()),
            });
        }
        Ok(U256::from_be_slice(&raw))
    }

    fn deployment_call(&self, vault: &Vault) -> Result<OutboundCall> {
        let owners = crate::address::canonicalize(&vault.signer_ids())?;
        let initializer = self.deriver.initializer(&owners, vault.threshold);
        let params = self.deriver.params();
        let data = abi::encode_call(
            CREATE_PROXY_SIGNATURE,
            &[
                Token::Address(params.singleton),
                Token::Bytes(initializer),
                Token::Uint(vault.salt_nonce),
            ],
        );
        Ok(OutboundCall::new(params.proxy_factory, U256::ZERO, Bytes::from(data)))
    }

    /// Prepare the deployment (if needed) and sweep for one chain
    #[instrument(skip(self, vault), fields(vault = %vault.vault_id))]
    pub async fn plan(&self, vault: &Vault, chain_id: u64) -> Result<RecoveryPlan> {
        let legacy_address = self.legacy_address(vault)?;
        let record = self.inspect(vault, legacy_address, chain_id).await?;

        if record.balance.is_zero() {
            return Err(Error::NothingToRecover(format!(
                "{} holds no funds on chain {}",
                legacy_address, chain_id
            )));
        }

        let (deployment, nonce) = if record.deployed {
            (None, self.wallet_nonce(chain_id, legacy_address).await?)
        } else {
            (Some(self.deployment_call(vault)?), INITIAL_WALLET_NONCE)
        };

        let sweep = SafeTransaction::transfer(vault.vault_id, record.balance, nonce);

        info!(
            legacy = %legacy_address,
            balance = %record.balance,
            needs_deployment = deployment.is_some(),
            %nonce,
            "Planned legacy recovery"
        );

        Ok(RecoveryPlan {
            record,
            deployment,
            sweep,
        })
    }

    /// Collect threshold signatures, then deploy and sweep
    pub async fn execute(
        &self,
        vault: &Vault,
        plan: &RecoveryPlan,
        signers: &[VaultSigner],
        cancel: &CancellationToken,
    ) -> Result<RecoveryReceipt> {
        let chain_id = plan.record.chain_id;

        // The sweep is signed against the legacy wallet, not the current one
        let mut legacy_vault = vault.clone();
        legacy_vault.vault_id = plan.record.legacy_address;

        let signed = self
            .collector
            .collect(&legacy_vault, chain_id, plan.sweep.clone(), signers, cancel)
            .await?;

        let deployment_tx = match &plan.deployment {
            Some(call) => {
                let hash = self.writer.broadcast(chain_id, call).await?;
                info!(chain_id, legacy = %plan.record.legacy_address, tx = %hash, "Legacy wallet deployment sent");
                Some(hash)
            }
            None => None,
        };

        let sweep_tx = self
            .writer
            .broadcast(chain_id, &OutboundCall::from(&signed))
            .await?;
        info!(
            chain_id,
            from = %plan.record.legacy_address,
            to = %vault.vault_id,
            amount = %plan.record.balance,
            tx = %sweep_tx,
            "Legacy sweep sent"
        );

        Ok(RecoveryReceipt {
            deployment_tx,
            sweep_tx,
        })
    }
}
