//! Core types for vault membership
//!
//! Defines signers, passkey credentials and vaults.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use p256::ecdsa::VerifyingKey;
use p256::{EncodedPoint, FieldBytes};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a signer produces signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialRef {
    /// secp256k1 key; the signer id is the key's address
    RawKey,

    /// WebAuthn credential; the signer id is its on-chain verifier contract
    Passkey {
        /// Base64url credential id handed to the authenticator
        credential_id: String,
    },

    /// Pre-passkey key that signs with the `eth_sign` prefix
    Legacy,
}

impl CredentialRef {
    pub fn is_passkey(&self) -> bool {
        matches!(self, CredentialRef::Passkey { .. })
    }
}

impl std::fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialRef::RawKey => write!(f, "raw-key"),
            CredentialRef::Passkey { .. } => write!(f, "passkey"),
            CredentialRef::Legacy => write!(f, "legacy"),
        }
    }
}

/// A cryptographic identity contributing one threshold signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    /// 20-byte chain address
    pub signer_id: Address,

    /// Human controller of this signer
    pub owner_user_id: String,

    /// Signing mechanism
    pub credential: CredentialRef,
}

/// Uncompressed P-256 public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasskeyPublicKey {
    pub x: B256,
    pub y: B256,
}

impl PasskeyPublicKey {
    /// Parse into a verifying key, rejecting points not on the curve
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(self.x.as_slice()),
            FieldBytes::from_slice(self.y.as_slice()),
            false,
        );
        VerifyingKey::from_encoded_point(&point)
            .map_err(|e| Error::InvalidAssertion(format!("bad passkey public key: {}", e)))
    }

    /// Extract coordinates from a verifying key
    pub fn from_verifying_key(key: &VerifyingKey) -> Result<Self> {
        let point = key.to_encoded_point(false);
        match (point.x(), point.y()) {
            (Some(x), Some(y)) => Ok(Self {
                x: B256::from_slice(x),
                y: B256::from_slice(y),
            }),
            _ => Err(Error::Internal("identity point has no coordinates".to_string())),
        }
    }
}

/// Binds a signer to a WebAuthn public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasskeyCredential {
    /// Base64url credential id
    pub credential_id: String,

    /// Signer this credential acts for
    pub signer_id: Address,

    /// P-256 public key
    pub public_key: PasskeyPublicKey,

    /// Last authenticator signature counter seen (enforced by the authenticator)
    pub counter: u32,

    /// When the credential was registered
    pub created_at: DateTime<Utc>,
}

/// A multi-party account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    /// Derived counterfactual address
    pub vault_id: Address,

    /// Chain the vault was requested on
    pub chain_id: u64,

    /// Signatures required per transaction
    pub threshold: u32,

    /// Members, sorted ascending by signer id
    pub signers: Vec<Signer>,

    /// Contract code observed on chain; never reverts to false
    pub is_deployed: bool,

    /// One-time derivation nonce
    pub salt_nonce: U256,

    /// Signer that requested creation; immutable
    pub created_by: Address,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

impl Vault {
    /// Signer ids in canonical order
    pub fn signer_ids(&self) -> Vec<Address> {
        self.signers.iter().map(|s| s.signer_id).collect()
    }

    pub fn is_member(&self, signer_id: &Address) -> bool {
        self.signers.iter().any(|s| s.signer_id == *signer_id)
    }

    pub fn signer(&self, signer_id: &Address) -> Option<&Signer> {
        self.signers.iter().find(|s| s.signer_id == *signer_id)
    }
}

/// Vault row as persisted by a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRow {
    pub vault_id: Address,
    pub chain_id: u64,
    pub threshold: u32,
    pub salt_nonce: U256,
    pub is_deployed: bool,
    pub created_by: Address,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Vault membership row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMemberRow {
    pub vault_id: Address,
    pub signer_id: Address,
    /// Index in canonical signer order
    pub position: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_public_key_round_trip() {
        let signing = SigningKey::random(&mut OsRng);
        let verifying = *signing.verifying_key();
        let public = PasskeyPublicKey::from_verifying_key(&verifying).unwrap();
        assert_eq!(public.verifying_key().unwrap(), verifying);
    }

    #[test]
    fn test_public_key_rejects_off_curve_point() {
        let bogus = PasskeyPublicKey {
            x: B256::repeat_byte(1),
            y: B256::repeat_byte(2),
        };
        assert!(bogus.verifying_key().is_err());
    }

    #[test]
    fn test_credential_ref_json() {
        let json = serde_json::to_string(&CredentialRef::Passkey {
            credential_id: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"passkey","credential_id":"abc"}"#);

        let raw: CredentialRef = serde_json::from_str(r#"{"kind":"raw_key"}"#).unwrap();
        assert_eq!(raw, CredentialRef::RawKey);
    }
}
