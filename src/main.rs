//! vaultctl - operator tool for multi-party vault custody
//!
//! # WARNING
//! - Vault addresses hold real funds before any contract exists there.
//! - Never change derivation parameters for a registry that already has vaults.

use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use vault_custody::address::parse_signer_id;
use vault_custody::cli::commands;
use vault_custody::config::Config;

/// Multi-party vault custody
#[derive(Parser)]
#[command(name = "vaultctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "vaultctl.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute a vault address from its owners
    Derive {
        /// Owner addresses (any order)
        #[arg(long = "owner", required = true, value_parser = parse_signer_id)]
        owners: Vec<Address>,

        #[arg(long)]
        threshold: u32,

        /// Salt nonce (decimal or 0x-hex)
        #[arg(long)]
        nonce: U256,
    },

    /// Vault registry
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Signer registration
    Signer {
        #[command(subcommand)]
        action: SignerAction,
    },

    /// Confirm on-chain deployment of undeployed vaults
    Reconcile {
        /// Reconcile only this vault
        #[arg(long, value_parser = parse_signer_id)]
        vault: Option<Address>,

        /// Keep sweeping until interrupted
        #[arg(long, conflicts_with = "vault")]
        watch: bool,
    },

    /// Funds at legacy vault addresses
    Recover {
        #[command(subcommand)]
        action: RecoverAction,
    },

    /// Local signing key sealed with a recovery phrase and PIN
    Phrase {
        #[command(subcommand)]
        action: PhraseAction,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC endpoints and the registry
    Health,
}

#[derive(Subcommand)]
enum VaultAction {
    /// Create a vault; the requester is always a member
    Create {
        #[arg(long, value_parser = parse_signer_id)]
        requester: Address,

        /// Additional signers
        #[arg(long = "signer", value_parser = parse_signer_id)]
        signers: Vec<Address>,

        #[arg(long)]
        threshold: u32,

        /// Chain the vault is created for
        #[arg(long, default_value = "1")]
        chain: u64,
    },

    /// Show one vault
    Show {
        #[arg(value_parser = parse_signer_id)]
        vault: Address,
    },

    /// List all vaults
    List,

    /// Remove an undeployed vault from the registry
    Delete {
        #[arg(value_parser = parse_signer_id)]
        vault: Address,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum SignerAction {
    /// Register a secp256k1 key signer
    AddKey {
        #[arg(value_parser = parse_signer_id)]
        address: Address,

        /// Owning user id
        #[arg(long)]
        user: String,

        /// Signs with the eth_sign prefix
        #[arg(long)]
        legacy: bool,
    },

    /// Register a passkey signer
    AddPasskey {
        /// On-chain verifier address for this key
        #[arg(value_parser = parse_signer_id)]
        address: Address,

        #[arg(long)]
        user: String,

        /// Base64url credential id
        #[arg(long)]
        credential_id: String,

        /// Public key x coordinate (0x-hex)
        #[arg(long)]
        x: B256,

        /// Public key y coordinate (0x-hex)
        #[arg(long)]
        y: B256,

        /// Last seen authenticator counter
        #[arg(long, default_value = "0")]
        counter: u32,
    },
}

#[derive(Subcommand)]
enum RecoverAction {
    /// Check every chain for funds at the vault's legacy address
    Scan {
        #[arg(value_parser = parse_signer_id)]
        vault: Address,
    },

    /// Show the deployment and sweep needed on one chain
    Plan {
        #[arg(value_parser = parse_signer_id)]
        vault: Address,

        #[arg(long)]
        chain: u64,
    },
}

#[derive(Subcommand)]
enum PhraseAction {
    /// Generate a phrase and seal a new signing key
    New,

    /// Seal a signing key under an existing phrase
    Seal {
        /// Hex private key to import (default: generate)
        #[arg(long, env = "VAULT_SIGNING_KEY", hide_env_values = true)]
        key: Option<String>,
    },

    /// Unlock the sealed key
    Open,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vault_custody=info".parse()?),
        )
        .with_target(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Loaded configuration from {}", cli.config);

    let result = match cli.command {
        Commands::Derive {
            owners,
            threshold,
            nonce,
        } => commands::derive(&config, &owners, threshold, nonce),
        Commands::Vault { action } => match action {
            VaultAction::Create {
                requester,
                signers,
                threshold,
                chain,
            } => commands::vault_create(&config, requester, &signers, threshold, chain).await,
            VaultAction::Show { vault } => commands::vault_show(&config, vault).await,
            VaultAction::List => commands::vault_list(&config).await,
            VaultAction::Delete { vault, force } => commands::vault_delete(&config, vault, force).await,
        },
        Commands::Signer { action } => match action {
            SignerAction::AddKey { address, user, legacy } => {
                commands::signer_add_key(&config, address, &user, legacy).await
            }
            SignerAction::AddPasskey {
                address,
                user,
                credential_id,
                x,
                y,
                counter,
            } => commands::signer_add_passkey(&config, address, &user, &credential_id, x, y, counter).await,
        },
        Commands::Reconcile { vault, watch } => commands::reconcile(&config, vault, watch).await,
        Commands::Recover { action } => match action {
            RecoverAction::Scan { vault } => commands::recover_scan(&config, vault).await,
            RecoverAction::Plan { vault, chain } => commands::recover_plan(&config, vault, chain).await,
        },
        Commands::Phrase { action } => match action {
            PhraseAction::New => commands::phrase_new(&config),
            PhraseAction::Seal { key } => commands::phrase_seal(&config, key.as_deref()),
            PhraseAction::Open => commands::phrase_open(&config),
        },
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
