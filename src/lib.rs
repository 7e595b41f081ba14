//! Vault Custody Library
//!
//! Non-custodial multi-party vaults: counterfactual addresses, threshold
//! signing with raw keys or passkeys, deployment reconciliation across
//! chains, legacy-address recovery and phrase+PIN protection of local keys.

pub mod address;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod reconciler;
pub mod recovery;
pub mod signing;

// Re-export commonly used types
pub use address::{AddressDeriver, LegacyDeriver};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::{MembershipLedger, Vault};
pub use reconciler::DeploymentReconciler;
pub use recovery::LegacyRecovery;
pub use signing::{PasskeySigner, SignatureCollector, VaultSigner};
