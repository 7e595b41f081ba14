//! Signer capability
//!
//! Raw keys, passkeys and legacy keys all converge on one operation,
//! [`VaultSigner::produce_signature`].

use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::SigningKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

use super::passkey::{Ceremony, PasskeySigner, SignatureAssembled, SigningRequest};
use super::signature::AssembledSignature;

/// Prefix applied by `eth_sign`
const ETH_SIGN_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Offset added to `v` for `eth_sign` entries so the wallet applies the prefix
const ETH_SIGN_V_OFFSET: u8 = 4;

/// Result of asking a signer to approve a request
#[derive(Debug)]
pub enum SignatureOutcome {
    /// ECDSA entry from a raw or legacy key
    Signed(AssembledSignature),
    /// Completed passkey ceremony, still carrying its assertion
    Assembled(Box<Ceremony<SignatureAssembled>>),
    /// The user declined; not an error
    Cancelled,
}

/// Address controlled by a secp256k1 key
pub fn key_address(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    Address::from_slice(&keccak256(&point.as_bytes()[1..])[12..])
}

fn sign_ecdsa(key: &SigningKey, hash: &B256, v_offset: u8) -> Result<Vec<u8>> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash.as_slice())
        .map_err(|e| Error::Encoding(format!("ECDSA signing failed: {}", e)))?;

    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(27 + v_offset + recovery_id.to_byte());
    Ok(bytes)
}

/// Plain secp256k1 owner key
#[derive(Clone)]
pub struct RawKeySigner {
    key: SigningKey,
    address: Address,
}

impl RawKeySigner {
    pub fn from_bytes(secret: &[u8]) -> Result<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|_| Error::InvalidSigner("not a valid secp256k1 secret".to_string()))?;
        let address = key_address(&key);
        Ok(Self { key, address })
    }

    /// Parse a `0x`-prefixed (or bare) hex secret
    pub fn from_hex(secret: &str) -> Result<Self> {
        let trimmed = secret.trim();
        let bytes = Zeroizing::new(
            hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
                .map_err(|_| Error::InvalidSigner("secret is not hex".to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let address = key_address(&key);
        Self { key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Secret bytes, for sealing into the local store
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.key.to_bytes().to_vec())
    }

    pub fn sign(&self, challenge: &B256) -> Result<AssembledSignature> {
        Ok(AssembledSignature::Ecdsa {
            signer: self.address,
            bytes: sign_ecdsa(&self.key, challenge, 0)?,
        })
    }
}

impl std::fmt::Debug for RawKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawKeySigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Pre-passkey owner key signing through `eth_sign`
#[derive(Clone)]
pub struct LegacySigner {
    inner: RawKeySigner,
}

impl LegacySigner {
    pub fn new(inner: RawKeySigner) -> Self {
        Self { inner }
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// `keccak256("\x19Ethereum Signed Message:\n32" ‖ challenge)`
    pub fn prefixed_hash(challenge: &B256) -> B256 {
        let mut message = Vec::with_capacity(ETH_SIGN_PREFIX.len() + 32);
        message.extend_from_slice(ETH_SIGN_PREFIX);
        message.extend_from_slice(challenge.as_slice());
        keccak256(message)
    }

    pub fn sign(&self, challenge: &B256) -> Result<AssembledSignature> {
        let hash = Self::prefixed_hash(challenge);
        Ok(AssembledSignature::Ecdsa {
            signer: self.inner.address,
            bytes: sign_ecdsa(&self.inner.key, &hash, ETH_SIGN_V_OFFSET)?,
        })
    }
}

impl std::fmt::Debug for LegacySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacySigner")
            .field("address", &self.inner.address)
            .finish_non_exhaustive()
    }
}

/// Any signer that can approve a vault transaction
#[derive(Debug, Clone)]
pub enum VaultSigner {
    RawKey(RawKeySigner),
    Passkey(PasskeySigner),
    Legacy(LegacySigner),
}

impl VaultSigner {
    pub fn signer_id(&self) -> Address {
        match self {
            VaultSigner::RawKey(s) => s.address(),
            VaultSigner::Passkey(s) => s.signer_id(),
            VaultSigner::Legacy(s) => s.address(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VaultSigner::RawKey(_) => "raw-key",
            VaultSigner::Passkey(_) => "passkey",
            VaultSigner::Legacy(_) => "legacy",
        }
    }

    /// Approve `request`
    ///
    /// A passkey prompt the user dismisses (or `cancel` fires) yields
    /// [`SignatureOutcome::Cancelled`]. Nothing is retried.
    pub async fn produce_signature(
        &self,
        request: &SigningRequest,
        cancel: &CancellationToken,
    ) -> Result<SignatureOutcome> {
        let challenge = request.challenge();
        debug!(signer = %self.signer_id(), kind = self.kind(), challenge = %challenge, "Producing signature");

        match self {
            VaultSigner::RawKey(s) => Ok(SignatureOutcome::Signed(s.sign(&challenge)?)),
            VaultSigner::Legacy(s) => Ok(SignatureOutcome::Signed(s.sign(&challenge)?)),
            VaultSigner::Passkey(s) => match s.sign(request, cancel).await {
                Ok(ceremony) => Ok(SignatureOutcome::Assembled(Box::new(ceremony))),
                Err(Error::UserCancelled) => {
                    info!(signer = %s.signer_id(), "Passkey signature cancelled by user");
                    Ok(SignatureOutcome::Cancelled)
                }
                Err(e) => Err(e),
            },
        }
    }
}
