//! Configuration loading and validation

use alloy_primitives::{address, Address, B256};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::address::{DerivationParams, LegacyParams};
use crate::keys::derivation::{DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub derivation: DerivationConfig,
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub passkey: PasskeyConfig,
    #[serde(default)]
    pub key_derivation: KeyDerivationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
}

/// Wallet deployment parameters; identical on every chain
#[derive(Debug, Clone, Deserialize)]
pub struct DerivationConfig {
    #[serde(default = "default_proxy_factory")]
    pub proxy_factory: Address,
    /// Must be set explicitly; the zero hash is rejected
    #[serde(default)]
    pub proxy_init_code_hash: B256,
    #[serde(default = "default_module")]
    pub module: Address,
    #[serde(default = "default_module_setup")]
    pub module_setup: Address,
    #[serde(default)]
    pub legacy: LegacyDerivationConfig,
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            proxy_factory: default_proxy_factory(),
            proxy_init_code_hash: B256::ZERO,
            module: default_module(),
            module_setup: default_module_setup(),
            legacy: LegacyDerivationConfig::default(),
        }
    }
}

/// Parameters of the superseded derivation
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyDerivationConfig {
    #[serde(default = "default_legacy_proxy_factory")]
    pub proxy_factory: Address,
    #[serde(default = "default_legacy_singleton")]
    pub singleton: Address,
    #[serde(default)]
    pub proxy_init_code_hash: B256,
    #[serde(default = "default_legacy_fallback_handler")]
    pub fallback_handler: Address,
}

impl Default for LegacyDerivationConfig {
    fn default() -> Self {
        Self {
            proxy_factory: default_legacy_proxy_factory(),
            singleton: default_legacy_singleton(),
            proxy_init_code_hash: B256::ZERO,
            fallback_handler: default_legacy_fallback_handler(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_per_chain_timeout_ms")]
    pub per_chain_timeout_ms: u64,
    #[serde(default = "default_overall_budget_ms")]
    pub overall_budget_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_concurrent_vaults")]
    pub max_concurrent_vaults: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            per_chain_timeout_ms: default_per_chain_timeout_ms(),
            overall_budget_ms: default_overall_budget_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_concurrent_vaults: default_max_concurrent_vaults(),
        }
    }
}

impl ReconcilerConfig {
    pub fn per_chain_timeout(&self) -> Duration {
        Duration::from_millis(self.per_chain_timeout_ms)
    }

    pub fn overall_budget(&self) -> Duration {
        Duration::from_millis(self.overall_budget_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasskeyConfig {
    #[serde(default = "default_assertion_timeout_secs")]
    pub assertion_timeout_secs: u64,
}

impl Default for PasskeyConfig {
    fn default() -> Self {
        Self {
            assertion_timeout_secs: default_assertion_timeout_secs(),
        }
    }
}

impl PasskeyConfig {
    pub fn assertion_timeout(&self) -> Duration {
        Duration::from_secs(self.assertion_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyDerivationConfig {
    #[serde(default = "default_kdf_iterations")]
    pub iterations: u32,
    /// Where the sealed local secret is kept
    #[serde(default = "default_secret_path")]
    pub secret_path: String,
}

impl Default for KeyDerivationConfig {
    fn default() -> Self {
        Self {
            iterations: default_kdf_iterations(),
            secret_path: default_secret_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON registry of vaults, members and signers
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Account that submits prepared calls via `eth_sendTransaction`
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            from: None,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
        }
    }
}

// Safe v1.4.1 deployments
fn default_proxy_factory() -> Address {
    address!("4e1dcf7ad4e460cfd30791ccc4f9c8a4f820ec67")
}

fn default_module_setup() -> Address {
    address!("2dd68b007b46fbe91b9a7c3eda5a7a1063cb5b47")
}

fn default_module() -> Address {
    address!("75cf11467937ce3f2f357ce24ffc3dbf8fd5c226")
}

// Safe v1.3.0 deployments
fn default_legacy_proxy_factory() -> Address {
    address!("a6b71e26c5e0845f74c812102ca7114b6a896ab2")
}

fn default_legacy_singleton() -> Address {
    address!("d9db270c1b5e3bd161e8c8503c55ceabee709552")
}

fn default_legacy_fallback_handler() -> Address {
    address!("f48f2b2d2a534e402487b3ee7c18c33aec0fe5e4")
}

fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            chain_id: 1,
            name: "ethereum".to_string(),
            rpc_url: "https://eth.llamarpc.com".to_string(),
        },
        ChainConfig {
            chain_id: 8453,
            name: "base".to_string(),
            rpc_url: "https://mainnet.base.org".to_string(),
        },
    ]
}

fn default_per_chain_timeout_ms() -> u64 {
    8_000
}

fn default_overall_budget_ms() -> u64 {
    30_000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_max_concurrent_vaults() -> usize {
    8
}

fn default_assertion_timeout_secs() -> u64 {
    90
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn default_secret_path() -> String {
    "vault-secret.json".to_string()
}

fn default_store_path() -> String {
    "vaults.json".to_string()
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_broadcast_timeout_ms() -> u64 {
    15_000
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix VAULT_)
            .add_source(
                config::Environment::with_prefix("VAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.derivation.proxy_init_code_hash == B256::ZERO {
            anyhow::bail!("derivation.proxy_init_code_hash must be set");
        }

        if self.chains.is_empty() {
            anyhow::bail!("At least one chain must be configured");
        }

        let mut seen = std::collections::HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Duplicate chain_id {}", chain.chain_id);
            }
            url::Url::parse(&chain.rpc_url)
                .with_context(|| format!("Invalid rpc_url for chain {}", chain.chain_id))?;
        }

        if self.reconciler.per_chain_timeout_ms == 0 {
            anyhow::bail!("reconciler.per_chain_timeout_ms must be positive");
        }

        if self.reconciler.overall_budget_ms < self.reconciler.per_chain_timeout_ms {
            anyhow::bail!("reconciler.overall_budget_ms cannot be below per_chain_timeout_ms");
        }

        if self.reconciler.max_concurrent_vaults == 0 {
            anyhow::bail!("reconciler.max_concurrent_vaults must be positive");
        }

        if !(10..=300).contains(&self.passkey.assertion_timeout_secs) {
            anyhow::bail!(
                "passkey.assertion_timeout_secs must be between 10 and 300, got {}",
                self.passkey.assertion_timeout_secs
            );
        }

        if self.key_derivation.iterations < MIN_KDF_ITERATIONS {
            anyhow::bail!(
                "key_derivation.iterations must be at least {}",
                MIN_KDF_ITERATIONS
            );
        }

        if self.derivation.legacy.proxy_init_code_hash == B256::ZERO {
            tracing::warn!("Legacy init code hash not set - legacy recovery is disabled");
        }

        Ok(())
    }

    pub fn derivation_params(&self) -> DerivationParams {
        DerivationParams {
            proxy_factory: self.derivation.proxy_factory,
            proxy_init_code_hash: self.derivation.proxy_init_code_hash,
            module: self.derivation.module,
            module_setup: self.derivation.module_setup,
        }
    }

    /// Legacy parameters, if recovery is configured
    pub fn legacy_params(&self) -> Option<LegacyParams> {
        let legacy = &self.derivation.legacy;
        if legacy.proxy_init_code_hash == B256::ZERO {
            return None;
        }
        Some(LegacyParams {
            proxy_factory: legacy.proxy_factory,
            singleton: legacy.singleton,
            proxy_init_code_hash: legacy.proxy_init_code_hash,
            fallback_handler: legacy.fallback_handler,
        })
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let chains = self
            .chains
            .iter()
            .map(|c| format!("    {} ({}): {}", c.name, c.chain_id, mask_url(&c.rpc_url)))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Configuration:
  Derivation:
    proxy_factory: {}
    proxy_init_code_hash: {}
    module: {}
    module_setup: {}
    legacy_factory: {}
    legacy_recovery: {}
  Chains:
{}
  Reconciler:
    per_chain_timeout: {}ms
    overall_budget: {}ms
    sweep_interval: {}s
    max_concurrent_vaults: {}
  Passkey:
    assertion_timeout: {}s
  Key derivation:
    iterations: {}
    secret_path: {}
  Store:
    path: {}
  Relayer:
    from: {}
"#,
            self.derivation.proxy_factory,
            self.derivation.proxy_init_code_hash,
            self.derivation.module,
            self.derivation.module_setup,
            self.derivation.legacy.proxy_factory,
            if self.legacy_params().is_some() {
                "enabled"
            } else {
                "disabled"
            },
            chains,
            self.reconciler.per_chain_timeout_ms,
            self.reconciler.overall_budget_ms,
            self.reconciler.sweep_interval_secs,
            self.reconciler.max_concurrent_vaults,
            self.passkey.assertion_timeout_secs,
            self.key_derivation.iterations,
            self.key_derivation.secret_path,
            self.store.path,
            self.relayer
                .from
                .map(|a| a.to_string())
                .unwrap_or_else(|| "(not set)".to_string()),
        )
    }
}

/// Mask URL for display (hide API keys in path or query)
fn mask_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let has_secret = parsed.query().is_some() || parsed.path().len() > 1;
            if has_secret {
                format!("{}://{}/***", parsed.scheme(), host)
            } else {
                format!("{}://{}", parsed.scheme(), host)
            }
        }
        Err(_) => "***".to_string(),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            derivation: DerivationConfig::default(),
            chains: default_chains(),
            reconciler: ReconcilerConfig::default(),
            passkey: PasskeyConfig::default(),
            key_derivation: KeyDerivationConfig::default(),
            store: StoreConfig::default(),
            relayer: RelayerConfig::default(),
        }
    }
}
