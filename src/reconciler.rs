//! Deployment reconciliation
//!
//! Checks whether each vault's address holds code on every configured chain
//! and raises the stored `is_deployed` flag when it does. The flag is never
//! lowered: missing code may just be a lagging or failing RPC node.
//!
//! Chain reads run concurrently, each under its own timeout, and the whole
//! fan-out is bounded by an overall budget. A slow chain only costs its own
//! outcome.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::ChainReader;
use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::ledger::{MembershipLedger, Vault};

/// What one chain said about a vault address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Deployed,
    NotDeployed,
    Failed(String),
    TimedOut,
}

impl ChainOutcome {
    /// Whether the chain gave a definite answer
    pub fn is_conclusive(&self) -> bool {
        matches!(self, ChainOutcome::Deployed | ChainOutcome::NotDeployed)
    }
}

impl std::fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainOutcome::Deployed => write!(f, "deployed"),
            ChainOutcome::NotDeployed => write!(f, "not deployed"),
            ChainOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            ChainOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub chain_id: u64,
    pub outcome: ChainOutcome,
}

/// Result of reconciling one vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatus {
    pub vault_id: Address,
    /// Stored flag after reconciliation
    pub is_deployed: bool,
    /// Whether this call raised the flag
    pub changed: bool,
    pub chains: Vec<ChainReport>,
}

impl DeploymentStatus {
    pub fn deployed_on(&self) -> Vec<u64> {
        self.chains
            .iter()
            .filter(|c| c.outcome == ChainOutcome::Deployed)
            .map(|c| c.chain_id)
            .collect()
    }

    pub fn inconclusive(&self) -> usize {
        self.chains.iter().filter(|c| !c.outcome.is_conclusive()).count()
    }
}

/// Totals from one sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub checked: usize,
    pub newly_deployed: usize,
    /// Vaults whose reconciliation failed outright (store errors)
    pub errors: usize,
    /// (vault, chain) reads without a definite answer
    pub inconclusive: usize,
}

pub struct DeploymentReconciler {
    ledger: Arc<MembershipLedger>,
    reader: Arc<dyn ChainReader>,
    config: ReconcilerConfig,
}

impl DeploymentReconciler {
    pub fn new(ledger: Arc<MembershipLedger>, reader: Arc<dyn ChainReader>, config: ReconcilerConfig) -> Self {
        Self {
            ledger,
            reader,
            config,
        }
    }

    async fn probe(&self, chain_id: u64, address: Address, deadline: Instant) -> ChainReport {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout = remaining.min(self.config.per_chain_timeout());

        let outcome = if timeout.is_zero() {
            ChainOutcome::TimedOut
        } else {
            match tokio::time::timeout(timeout, self.reader.get_code(chain_id, address, timeout)).await {
                Ok(Ok(code)) if !code.is_empty() => ChainOutcome::Deployed,
                Ok(Ok(_)) => ChainOutcome::NotDeployed,
                Ok(Err(Error::RpcTimeout { .. })) | Err(_) => ChainOutcome::TimedOut,
                Ok(Err(e)) => ChainOutcome::Failed(e.to_string()),
            }
        };

        debug!(chain_id, address = %address, outcome = %outcome, "Probed chain");
        ChainReport { chain_id, outcome }
    }

    /// Reconcile one vault against every chain
    ///
    /// Idempotent: repeated calls with no on-chain change leave the stored
    /// state as it was after the first.
    pub async fn reconcile(&self, vault: &Vault) -> Result<DeploymentStatus> {
        let deadline = Instant::now() + self.config.overall_budget();
        let probes = self
            .reader
            .chain_ids()
            .into_iter()
            .map(|chain_id| self.probe(chain_id, vault.vault_id, deadline));
        let chains = join_all(probes).await;

        for report in chains.iter().filter(|r| !r.outcome.is_conclusive()) {
            warn!(
                vault = %vault.vault_id,
                chain_id = report.chain_id,
                outcome = %report.outcome,
                "No deployment information from chain"
            );
        }

        let observed = chains.iter().any(|r| r.outcome == ChainOutcome::Deployed);
        let changed = if observed && !vault.is_deployed {
            self.ledger.confirm_deployment(&vault.vault_id).await?
        } else {
            false
        };

        Ok(DeploymentStatus {
            vault_id: vault.vault_id,
            is_deployed: vault.is_deployed || observed,
            changed,
            chains,
        })
    }

    /// On-demand reconciliation by identifier
    pub async fn reconcile_by_id(&self, vault_id: &Address) -> Result<DeploymentStatus> {
        let vault = self.ledger.get_vault(vault_id).await?;
        self.reconcile(&vault).await
    }

    /// Reconcile every vault not yet marked deployed
    pub async fn sweep(&self) -> Result<SweepReport> {
        let vaults = self.ledger.list_undeployed().await?;
        let mut report = SweepReport {
            checked: vaults.len(),
            ..Default::default()
        };

        let results: Vec<(Address, Result<DeploymentStatus>)> = stream::iter(vaults)
            .map(|vault| async move {
                let id = vault.vault_id;
                (id, self.reconcile(&vault).await)
            })
            .buffer_unordered(self.config.max_concurrent_vaults.max(1))
            .collect()
            .await;

        for (vault_id, result) in results {
            match result {
                Ok(status) => {
                    if status.changed {
                        report.newly_deployed += 1;
                    }
                    report.inconclusive += status.inconclusive();
                }
                Err(e) => {
                    error!(vault = %vault_id, "Reconciliation failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            newly_deployed = report.newly_deployed,
            inconclusive = report.inconclusive,
            errors = report.errors,
            "Deployment sweep complete"
        );
        Ok(report)
    }

    /// Sweep every `interval` until `cancel` fires
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Deployment reconciler started (every {:?})", interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Deployment sweep failed: {}", e);
                    }
                }
            }
        }
        info!("Deployment reconciler stopped");
    }
}
