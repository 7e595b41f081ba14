//! CLI command implementations

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::{Address, B256, U256};
use anyhow::{anyhow, bail, Result};
use dialoguer::{Confirm, Input, Password};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::address::{AddressDeriver, LegacyDeriver};
use crate::chain::{ChainReader, RpcChainClient};
use crate::config::Config;
use crate::keys::{FileKvStore, KeyDerivation, LocalSecretStore, Pin, RecoveryPhrase, WordChallenge};
use crate::ledger::{MemoryStore, MembershipLedger, PasskeyPublicKey, Vault};
use crate::reconciler::DeploymentReconciler;
use crate::recovery::LegacyRecovery;
use crate::signing::RawKeySigner;

fn open_ledger(config: &Config) -> Result<Arc<MembershipLedger>> {
    let store = MemoryStore::open(Path::new(&config.store.path))?;
    Ok(Arc::new(MembershipLedger::new(
        Arc::new(store),
        AddressDeriver::new(config.derivation_params()),
    )))
}

fn rpc_client(config: &Config) -> Result<Arc<RpcChainClient>> {
    Ok(Arc::new(RpcChainClient::new(
        &config.chains,
        config.relayer.clone(),
    )?))
}

fn open_secret_store(config: &Config) -> Result<LocalSecretStore<FileKvStore>> {
    let kv = FileKvStore::open(Path::new(&config.key_derivation.secret_path))?;
    let mut store = LocalSecretStore::new(kv, KeyDerivation::new(config.key_derivation.iterations)?);
    store.initialize()?;
    Ok(store)
}

fn print_vault(vault: &Vault) {
    println!("Vault:      {}", vault.vault_id);
    println!("Chain:      {}", vault.chain_id);
    println!("Threshold:  {} of {}", vault.threshold, vault.signers.len());
    println!("Deployed:   {}", if vault.is_deployed { "yes" } else { "no" });
    println!("Salt nonce: {}", vault.salt_nonce);
    println!("Created:    {} by {}", vault.created_at.format("%Y-%m-%d %H:%M:%S"), vault.created_by);
    println!("Signers:");
    for signer in &vault.signers {
        println!("  {}  {:<8}  {}", signer.signer_id, signer.credential, signer.owner_user_id);
    }
}

/// Compute a vault address without touching the registry
pub fn derive(config: &Config, owners: &[Address], threshold: u32, salt_nonce: U256) -> Result<()> {
    let deriver = AddressDeriver::new(config.derivation_params());
    let address = deriver.derive(owners, threshold, salt_nonce)?;

    println!("Vault address:  {}", address);
    match config.legacy_params() {
        Some(params) => {
            let legacy = LegacyDeriver::new(params).derive(owners, threshold, salt_nonce)?;
            println!("Legacy address: {}", legacy);
        }
        None => println!("Legacy address: (legacy derivation not configured)"),
    }
    Ok(())
}

/// Register a secp256k1 signer
pub async fn signer_add_key(config: &Config, signer_id: Address, user: &str, legacy: bool) -> Result<()> {
    let ledger = open_ledger(config)?;
    let signer = ledger.register_key_signer(signer_id, user, legacy).await?;
    println!("Registered {} signer {}", signer.credential, signer.signer_id);
    Ok(())
}

/// Register a passkey signer from its P-256 coordinates
pub async fn signer_add_passkey(
    config: &Config,
    signer_id: Address,
    user: &str,
    credential_id: &str,
    x: B256,
    y: B256,
    counter: u32,
) -> Result<()> {
    let ledger = open_ledger(config)?;
    let credential = ledger
        .register_passkey(signer_id, user, credential_id, PasskeyPublicKey { x, y }, counter)
        .await?;
    println!(
        "Registered passkey {} for signer {}",
        credential.credential_id, credential.signer_id
    );
    Ok(())
}

/// Create a vault
pub async fn vault_create(
    config: &Config,
    requester: Address,
    signers: &[Address],
    threshold: u32,
    chain_id: u64,
) -> Result<()> {
    if config.chain(chain_id).is_none() {
        bail!("Chain {} is not configured", chain_id);
    }

    let ledger = open_ledger(config)?;
    let vault = ledger
        .create_vault(signers, threshold, requester, chain_id)
        .await
        .map_err(|e| anyhow!("{}", e.user_message()))?;

    println!("\n=== VAULT CREATED ===\n");
    print_vault(&vault);
    println!("\nThe vault is not deployed yet. Funds can be sent to its address on any configured chain.");
    Ok(())
}

pub async fn vault_show(config: &Config, vault_id: Address) -> Result<()> {
    let ledger = open_ledger(config)?;
    let vault = ledger.get_vault(&vault_id).await?;
    println!();
    print_vault(&vault);
    Ok(())
}

pub async fn vault_list(config: &Config) -> Result<()> {
    let ledger = open_ledger(config)?;
    let vaults = ledger.list_vaults().await?;

    if vaults.is_empty() {
        println!("No vaults registered.");
        return Ok(());
    }

    println!("\n=== VAULTS ===\n");
    println!("{:<44} {:<8} {:<10} {:<9} {}", "ADDRESS", "CHAIN", "THRESHOLD", "DEPLOYED", "CREATED");
    println!("{}", "-".repeat(96));
    for vault in &vaults {
        println!(
            "{:<44} {:<8} {:<10} {:<9} {}",
            vault.vault_id.to_string(),
            vault.chain_id,
            format!("{}/{}", vault.threshold, vault.signers.len()),
            if vault.is_deployed { "yes" } else { "no" },
            vault.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    Ok(())
}

/// Soft-delete an undeployed vault
pub async fn vault_delete(config: &Config, vault_id: Address, force: bool) -> Result<()> {
    let ledger = open_ledger(config)?;
    let vault = ledger.get_vault(&vault_id).await?;

    if !force {
        print_vault(&vault);
        let confirmed = Confirm::new()
            .with_prompt("Delete this vault from the registry?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    ledger.soft_delete(&vault_id).await?;
    println!("Vault {} deleted.", vault_id);
    Ok(())
}

/// Reconcile one vault, sweep all undeployed vaults, or keep sweeping
pub async fn reconcile(config: &Config, vault_id: Option<Address>, watch: bool) -> Result<()> {
    let ledger = open_ledger(config)?;
    let reader: Arc<dyn ChainReader> = rpc_client(config)?;
    let reconciler = DeploymentReconciler::new(ledger, reader, config.reconciler.clone());

    if let Some(vault_id) = vault_id {
        let status = reconciler.reconcile_by_id(&vault_id).await?;
        println!("\nVault {}", status.vault_id);
        for chain in &status.chains {
            let name = config
                .chain(chain.chain_id)
                .map(|c| c.name.as_str())
                .unwrap_or("unknown");
            println!("  {:<12} ({:>6}): {}", name, chain.chain_id, chain.outcome);
        }
        println!(
            "Deployed: {}{}",
            if status.is_deployed { "yes" } else { "no" },
            if status.changed { " (updated)" } else { "" }
        );
        return Ok(());
    }

    if watch {
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                shutdown.cancel();
            }
        });
        reconciler.run(config.reconciler.sweep_interval(), cancel).await;
        return Ok(());
    }

    let report = reconciler.sweep().await?;
    println!(
        "Checked {} vaults: {} newly deployed, {} inconclusive chain reads, {} errors",
        report.checked, report.newly_deployed, report.inconclusive, report.errors
    );
    Ok(())
}

fn legacy_recovery(config: &Config) -> Result<LegacyRecovery> {
    let params = config
        .legacy_params()
        .ok_or_else(|| anyhow!("Legacy derivation is not configured (derivation.legacy)"))?;
    let client = rpc_client(config)?;
    Ok(LegacyRecovery::new(
        LegacyDeriver::new(params),
        client.clone(),
        client,
        config.reconciler.per_chain_timeout(),
    ))
}

/// Look for funds at a vault's legacy address on every chain
pub async fn recover_scan(config: &Config, vault_id: Address) -> Result<()> {
    let ledger = open_ledger(config)?;
    let vault = ledger.get_vault(&vault_id).await?;
    let recovery = legacy_recovery(config)?;

    let scans = recovery.discover(&vault).await?;
    println!("\nLegacy address: {}\n", recovery.legacy_address(&vault)?);
    println!("{:<8} {:<9} {}", "CHAIN", "DEPLOYED", "BALANCE (wei)");
    println!("{}", "-".repeat(48));
    for scan in &scans {
        match &scan.result {
            Ok(record) => println!(
                "{:<8} {:<9} {}",
                scan.chain_id,
                if record.deployed { "yes" } else { "no" },
                record.balance
            ),
            Err(e) => println!("{:<8} FAILED: {}", scan.chain_id, e),
        }
    }
    println!();
    Ok(())
}

/// Show what recovering a legacy balance on one chain would send
pub async fn recover_plan(config: &Config, vault_id: Address, chain_id: u64) -> Result<()> {
    let ledger = open_ledger(config)?;
    let vault = ledger.get_vault(&vault_id).await?;
    let recovery = legacy_recovery(config)?;

    let plan = recovery.plan(&vault, chain_id).await?;
    println!("\n=== LEGACY RECOVERY PLAN ===\n");
    println!("From:    {}", plan.record.legacy_address);
    println!("To:      {}", vault.vault_id);
    println!("Chain:   {}", chain_id);
    println!("Amount:  {} wei", plan.record.balance);
    match &plan.deployment {
        Some(call) => println!("Step 1:  deploy legacy wallet via factory {}", call.to()),
        None => println!("Step 1:  legacy wallet already deployed"),
    }
    println!("Step 2:  sweep with wallet nonce {}", plan.sweep.nonce);
    println!(
        "Signing hash: {}",
        plan.sweep.signing_hash(chain_id, plan.record.legacy_address)
    );
    println!("\n{} of {} signatures are required.", vault.threshold, vault.signers.len());
    Ok(())
}

fn prompt_pin(confirm: bool) -> Result<Pin> {
    let mut prompt = Password::new().with_prompt("PIN (6 digits)");
    if confirm {
        prompt = prompt.with_confirmation("Confirm PIN", "PINs do not match");
    }
    Ok(Pin::parse(&prompt.interact()?)?)
}

fn prompt_phrase() -> Result<RecoveryPhrase> {
    let input: String = Input::new().with_prompt("Recovery phrase").interact_text()?;
    Ok(RecoveryPhrase::parse(&input)?)
}

fn seal_signing_key(
    store: &LocalSecretStore<FileKvStore>,
    phrase: &RecoveryPhrase,
    pin: &Pin,
    key: RawKeySigner,
) -> Result<()> {
    if store.has_secret()? {
        let replace = Confirm::new()
            .with_prompt("A sealed key already exists. Replace it?")
            .default(false)
            .interact()?;
        if !replace {
            bail!("Existing sealed key kept");
        }
    }
    store.store(phrase, pin, &key.secret_bytes())?;
    println!("Sealed signing key for {}", key.address());
    Ok(())
}

/// Generate a recovery phrase and seal a fresh signing key with it
pub fn phrase_new(config: &Config) -> Result<()> {
    let store = open_secret_store(config)?;
    let phrase = RecoveryPhrase::generate();

    println!("\n=== RECOVERY PHRASE ===\n");
    for (i, word) in phrase.words().iter().enumerate() {
        println!("  {:>2}. {}", i + 1, word);
    }
    println!("\nWrite these words down. They are never shown again.\n");

    let challenge = WordChallenge::random();
    let mut answers = Vec::new();
    for position in challenge.positions() {
        let answer: String = Input::new()
            .with_prompt(format!("Word #{}", position))
            .interact_text()?;
        answers.push(answer);
    }
    let answers: Vec<&str> = answers.iter().map(String::as_str).collect();
    if !challenge.verify(&phrase, &answers) {
        bail!("Words do not match; nothing was stored");
    }

    let pin = prompt_pin(true)?;
    seal_signing_key(&store, &phrase, &pin, RawKeySigner::random())?;
    store.confirm_backup()?;
    Ok(())
}

/// Seal an existing or fresh signing key under a known phrase
pub fn phrase_seal(config: &Config, key_hex: Option<&str>) -> Result<()> {
    let store = open_secret_store(config)?;
    let key = match key_hex {
        Some(hex) => RawKeySigner::from_hex(hex)?,
        None => RawKeySigner::random(),
    };
    let phrase = prompt_phrase()?;
    let pin = prompt_pin(true)?;
    seal_signing_key(&store, &phrase, &pin, key)
}

/// Decrypt the sealed key and show the address it controls
pub fn phrase_open(config: &Config) -> Result<()> {
    let store = open_secret_store(config)?;
    if !store.has_secret()? {
        bail!("No sealed key at {}", config.key_derivation.secret_path);
    }
    if !store.backup_confirmed()? {
        warn!("Phrase backup was never confirmed");
    }

    let phrase = prompt_phrase()?;
    let pin = prompt_pin(false)?;
    let secret = store.load(&phrase, &pin).map_err(|e| anyhow!("{}", e.user_message()))?;
    let key = RawKeySigner::from_bytes(&secret)?;
    println!("Unlocked signing key for {}", key.address());
    Ok(())
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check RPC endpoints and the registry
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;
    let client = rpc_client(config)?;
    let timeout = config.reconciler.per_chain_timeout();

    for chain in &config.chains {
        print!("{} ({})... ", chain.name, chain.chain_id);
        let started = Instant::now();
        match client.block_number(chain.chain_id, timeout).await {
            Ok(block) => println!("OK (block {}, {}ms)", block, started.elapsed().as_millis()),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    }

    print!("Vault registry... ");
    match open_ledger(config) {
        Ok(ledger) => match ledger.list_vaults().await {
            Ok(vaults) => println!("OK ({} vaults)", vaults.len()),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        },
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Relayer... ");
    match config.relayer.from {
        Some(from) => println!("{}", from),
        None => println!("NOT CONFIGURED (recovery cannot broadcast)"),
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }
    Ok(())
}
