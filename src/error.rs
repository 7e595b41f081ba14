//! Error types for vault custody

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error classes, used to decide retry and user-facing behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any side effect (bad threshold, unknown signer, bad address)
    Validation,
    /// Challenge mismatch, bad assertion, failed decryption
    Cryptographic,
    /// Chain RPC, WebAuthn collaborator, store I/O
    ExternalDependency,
    /// Data corruption or programming bug; never auto-repaired
    Invariant,
    /// The user backed out; not an error from their point of view
    Cancelled,
}

/// Main error type for vault custody
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Validation errors
    #[error("Invalid signer: {0}")]
    InvalidSigner(String),

    #[error("Unverifiable signer: {0}")]
    UnverifiableSigner(String),

    #[error("Duplicate signer: {0}")]
    DuplicateSigner(String),

    #[error("Invalid threshold {threshold} for {signers} signers")]
    InvalidThreshold { threshold: u32, signers: usize },

    #[error("Vault not found: {0}")]
    VaultNotFound(String),

    #[error("Vault already deployed: {0}")]
    VaultDeployed(String),

    #[error("Signer {signer} is not a member of vault {vault}")]
    NotAMember { signer: String, vault: String },

    #[error("Threshold not met: {collected} of {threshold} signatures")]
    ThresholdNotMet { collected: usize, threshold: u32 },

    #[error("Invalid phrase: {0}")]
    InvalidPhrase(String),

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Nothing to recover: {0}")]
    NothingToRecover(String),

    // Passkey ceremony errors
    #[error("User cancelled the passkey prompt")]
    UserCancelled,

    #[error("Authenticator unavailable: {0}")]
    AuthenticatorUnavailable(String),

    #[error("Challenge mismatch: assertion is bound to a different request")]
    ChallengeMismatch,

    #[error("Invalid assertion: {0}")]
    InvalidAssertion(String),

    #[error("Signature encoding error: {0}")]
    Encoding(String),

    // Key derivation errors
    #[error("Cannot decrypt local secret")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Local secret store not initialized")]
    StoreNotInitialized,

    // Chain errors
    #[error("RPC error on chain {chain_id}: {message}")]
    Rpc { chain_id: u64, message: String },

    #[error("RPC request rejected on chain {chain_id}: {message}")]
    RpcRejected { chain_id: u64, message: String },

    #[error("RPC timeout on chain {chain_id} after {timeout_ms}ms")]
    RpcTimeout { chain_id: u64, timeout_ms: u64 },

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(u64),

    #[error("Broadcast failed on chain {chain_id}: {message}")]
    Broadcast { chain_id: u64, message: String },

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Duplicate vault identifier: {0}")]
    DuplicateVault(String),

    #[error("Partial vault write observed: {0}")]
    PartialWrite(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_)
            | Error::InvalidSigner(_)
            | Error::UnverifiableSigner(_)
            | Error::DuplicateSigner(_)
            | Error::InvalidThreshold { .. }
            | Error::VaultNotFound(_)
            | Error::VaultDeployed(_)
            | Error::NotAMember { .. }
            | Error::ThresholdNotMet { .. }
            | Error::InvalidPhrase(_)
            | Error::InvalidPin(_)
            | Error::NothingToRecover(_)
            | Error::UnsupportedChain(_) => ErrorKind::Validation,

            Error::ChallengeMismatch
            | Error::InvalidAssertion(_)
            | Error::DecryptionFailed
            | Error::Encryption(_) => ErrorKind::Cryptographic,

            Error::AuthenticatorUnavailable(_)
            | Error::Rpc { .. }
            | Error::RpcRejected { .. }
            | Error::RpcTimeout { .. }
            | Error::Broadcast { .. }
            | Error::Store(_)
            | Error::Io(_)
            | Error::StoreNotInitialized => ErrorKind::ExternalDependency,

            Error::UserCancelled => ErrorKind::Cancelled,

            Error::Encoding(_)
            | Error::DuplicateVault(_)
            | Error::PartialWrite(_)
            | Error::Serialization(_)
            | Error::Internal(_)
            | Error::Anyhow(_) => ErrorKind::Invariant,
        }
    }

    /// Check if this error is retryable (transient)
    ///
    /// A cancelled passkey prompt is not retryable: a new attempt needs new
    /// user intent. A failed broadcast is not retryable either, since the
    /// transaction may already have been submitted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Rpc { .. } | Error::RpcTimeout { .. } | Error::AuthenticatorUnavailable(_)
        )
    }

    /// Message safe to show an end user; never includes identifiers
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation => self.validation_message().to_string(),
            ErrorKind::Cancelled => {
                "The passkey prompt was closed. Try again when you are ready.".to_string()
            }
            ErrorKind::ExternalDependency => {
                "A network service did not respond. Please try again shortly.".to_string()
            }
            ErrorKind::Cryptographic | ErrorKind::Invariant => {
                "Something went wrong. Please contact support.".to_string()
            }
        }
    }

    fn validation_message(&self) -> &'static str {
        match self {
            Error::Config(_) => "The configuration is invalid. Check the settings file.",
            Error::InvalidSigner(_) => "One of the signers is not a valid address.",
            Error::UnverifiableSigner(_) => "One of the signers is not registered.",
            Error::DuplicateSigner(_) => "A signer was listed or has signed more than once.",
            Error::InvalidThreshold { .. } => {
                "The threshold must be at least 1 and at most the number of signers."
            }
            Error::VaultNotFound(_) => "That vault does not exist.",
            Error::VaultDeployed(_) => "That vault is already deployed and cannot be changed.",
            Error::NotAMember { .. } => "This signer is not a member of the vault.",
            Error::ThresholdNotMet { .. } => "More signatures are needed before this can be sent.",
            Error::InvalidPhrase(_) => "The recovery phrase is not valid.",
            Error::InvalidPin(_) => "The PIN is not valid.",
            Error::NothingToRecover(_) => "There are no funds to recover.",
            Error::UnsupportedChain(_) => "That chain is not configured.",
            _ => "The request is invalid.",
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
