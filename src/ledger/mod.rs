//! Vault membership ledger
//!
//! - [`types`]: signers, passkey credentials, vaults and their stored rows
//! - [`store`]: the store collaborator and its in-process implementation
//! - [`membership`]: creation rules, threshold lookups, deployment flag

pub mod membership;
pub mod store;
pub mod types;

pub use membership::{MembershipLedger, NonceSource, TimestampNonce};
pub use store::{MemoryStore, VaultStore};
pub use types::{CredentialRef, PasskeyCredential, PasskeyPublicKey, Signer, Vault};
