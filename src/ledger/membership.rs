//! Vault membership and threshold rules
//!
//! Membership is fixed at creation. There is no add or remove operation: the
//! vault identifier is derived from the signer set, so editing members would
//! silently orphan funds at the old address. A different signer set means a
//! new vault.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::address::{canonicalize, AddressDeriver};
use crate::error::{Error, Result};

use super::store::VaultStore;
use super::types::{CredentialRef, PasskeyCredential, PasskeyPublicKey, Signer, Vault};

/// Source of one-time derivation nonces
pub trait NonceSource: Send + Sync {
    fn next_nonce(&self) -> U256;
}

/// `unix_millis * 10^6 + random(0..10^6)`
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampNonce;

impl NonceSource for TimestampNonce {
    fn next_nonce(&self) -> U256 {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let jitter: u64 = rand::thread_rng().gen_range(0..1_000_000);
        U256::from(millis) * U256::from(1_000_000u64) + U256::from(jitter)
    }
}

/// Vault, member and signer bookkeeping on top of a [`VaultStore`]
pub struct MembershipLedger {
    store: Arc<dyn VaultStore>,
    deriver: AddressDeriver,
    nonces: Arc<dyn NonceSource>,
}

impl MembershipLedger {
    pub fn new(store: Arc<dyn VaultStore>, deriver: AddressDeriver) -> Self {
        Self::with_nonce_source(store, deriver, Arc::new(TimestampNonce))
    }

    pub fn with_nonce_source(
        store: Arc<dyn VaultStore>,
        deriver: AddressDeriver,
        nonces: Arc<dyn NonceSource>,
    ) -> Self {
        Self {
            store,
            deriver,
            nonces,
        }
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn store(&self) -> &Arc<dyn VaultStore> {
        &self.store
    }

    /// Register a secp256k1 key signer (raw or legacy)
    pub async fn register_key_signer(
        &self,
        signer_id: Address,
        owner_user_id: &str,
        legacy: bool,
    ) -> Result<Signer> {
        canonicalize(&[signer_id])?;
        let signer = Signer {
            signer_id,
            owner_user_id: owner_user_id.to_string(),
            credential: if legacy {
                CredentialRef::Legacy
            } else {
                CredentialRef::RawKey
            },
        };
        self.store.register_signer(signer.clone()).await?;
        info!(signer = %signer_id, kind = %signer.credential, "Registered signer");
        Ok(signer)
    }

    /// Register a passkey credential acting through `signer_id`
    ///
    /// `signer_id` is the address of the on-chain verifier for this key.
    /// The public key must be a valid P-256 point.
    pub async fn register_passkey(
        &self,
        signer_id: Address,
        owner_user_id: &str,
        credential_id: &str,
        public_key: PasskeyPublicKey,
        counter: u32,
    ) -> Result<PasskeyCredential> {
        canonicalize(&[signer_id])?;
        if credential_id.is_empty() {
            return Err(Error::UnverifiableSigner("empty credential id".to_string()));
        }
        public_key
            .verifying_key()
            .map_err(|_| Error::UnverifiableSigner(format!("{} has an invalid public key", signer_id)))?;

        let signer = Signer {
            signer_id,
            owner_user_id: owner_user_id.to_string(),
            credential: CredentialRef::Passkey {
                credential_id: credential_id.to_string(),
            },
        };
        let credential = PasskeyCredential {
            credential_id: credential_id.to_string(),
            signer_id,
            public_key,
            counter,
            created_at: Utc::now(),
        };

        self.store.register_passkey(signer, credential.clone()).await?;
        info!(signer = %signer_id, "Registered passkey signer");
        Ok(credential)
    }

    /// Record a newer authenticator counter
    pub async fn record_passkey_counter(&self, credential_id: &str, counter: u32) -> Result<()> {
        self.store.update_passkey_counter(credential_id, counter).await
    }

    /// Resolve a signer to a usable signing mechanism
    async fn resolve_signer(&self, signer_id: &Address) -> Result<Signer> {
        let signer = self
            .store
            .find_signer(signer_id)
            .await?
            .ok_or_else(|| Error::UnverifiableSigner(signer_id.to_string()))?;

        if let CredentialRef::Passkey { credential_id } = &signer.credential {
            match self.store.find_passkey(credential_id).await? {
                Some(c) if c.signer_id == *signer_id => {}
                _ => {
                    warn!(signer = %signer_id, "Passkey signer without a matching credential");
                    return Err(Error::UnverifiableSigner(signer_id.to_string()));
                }
            }
        }

        Ok(signer)
    }

    /// Create a vault for `candidates` plus the requester
    ///
    /// The requester is always a member, so the threshold may be up to
    /// `candidates.len() + 1`. Every member must already be registered.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn create_vault(
        &self,
        candidates: &[Address],
        threshold: u32,
        requester: Address,
        chain_id: u64,
    ) -> Result<Vault> {
        let mut members = Vec::with_capacity(candidates.len() + 1);
        members.push(requester);
        members.extend_from_slice(candidates);

        // Rejects reserved addresses and duplicates, including the requester
        // appearing in the candidate list
        let owners = canonicalize(&members)?;

        if threshold == 0 || threshold as usize > owners.len() {
            return Err(Error::InvalidThreshold {
                threshold,
                signers: owners.len(),
            });
        }

        let mut signers = Vec::with_capacity(owners.len());
        for owner in &owners {
            signers.push(self.resolve_signer(owner).await?);
        }

        let salt_nonce = self.nonces.next_nonce();
        let vault_id = self.deriver.derive(&owners, threshold, salt_nonce)?;

        let vault = Vault {
            vault_id,
            chain_id,
            threshold,
            signers,
            is_deployed: false,
            salt_nonce,
            created_by: requester,
            created_at: Utc::now(),
            deployed_at: None,
        };

        self.store.insert_vault(&vault).await?;

        info!(
            vault = %vault_id,
            chain_id,
            threshold,
            signers = owners.len(),
            "Created vault"
        );
        Ok(vault)
    }

    pub async fn get_vault(&self, vault_id: &Address) -> Result<Vault> {
        self.store
            .get_vault(vault_id)
            .await?
            .ok_or_else(|| Error::VaultNotFound(vault_id.to_string()))
    }

    pub async fn list_vaults(&self) -> Result<Vec<Vault>> {
        self.store.list_vaults().await
    }

    /// Vaults still waiting for on-chain code
    pub async fn list_undeployed(&self) -> Result<Vec<Vault>> {
        self.store.list_undeployed().await
    }

    /// Signatures needed before a transaction for `vault_id` can be broadcast
    pub async fn get_threshold_requirement(&self, vault_id: &Address) -> Result<u32> {
        Ok(self.get_vault(vault_id).await?.threshold)
    }

    /// Mark a vault deployed after an observed on-chain transaction
    ///
    /// Returns whether the stored flag changed.
    pub async fn confirm_deployment(&self, vault_id: &Address) -> Result<bool> {
        let changed = self.store.mark_deployed(vault_id).await?;
        if changed {
            info!(vault = %vault_id, "Vault deployment confirmed");
        } else {
            debug!(vault = %vault_id, "Vault already marked deployed");
        }
        Ok(changed)
    }

    /// Soft-delete a vault that has never been deployed
    pub async fn soft_delete(&self, vault_id: &Address) -> Result<()> {
        self.store.soft_delete(vault_id).await?;
        info!(vault = %vault_id, "Vault deleted");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::address::deriver::tests::test_params;
    use crate::ledger::store::MemoryStore;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    pub(crate) struct FixedNonce(pub U256);

    impl NonceSource for FixedNonce {
        fn next_nonce(&self) -> U256 {
            self.0
        }
    }

    const A: Address = Address::repeat_byte(0xa1);
    const B: Address = Address::repeat_byte(0xb2);
    const C: Address = Address::repeat_byte(0xc3);

    pub(crate) async fn ledger_with_signers(ids: &[Address]) -> MembershipLedger {
        let ledger = MembershipLedger::with_nonce_source(
            Arc::new(MemoryStore::new()),
            AddressDeriver::new(test_params()),
            Arc::new(FixedNonce(U256::from(7u64))),
        );
        for id in ids {
            ledger.register_key_signer(*id, "user", false).await.unwrap();
        }
        ledger
    }

    #[test]
    fn test_timestamp_nonce_layout() {
        let before = U256::from(Utc::now().timestamp_millis() as u64) * U256::from(1_000_000u64);
        let nonce = TimestampNonce.next_nonce();
        let after = U256::from(Utc::now().timestamp_millis() as u64 + 1) * U256::from(1_000_000u64);
        assert!(nonce >= before && nonce < after);
    }

    #[tokio::test]
    async fn test_create_vault_includes_requester() {
        let ledger = ledger_with_signers(&[A, B, C]).await;
        let vault = ledger.create_vault(&[C, B], 2, A, 1).await.unwrap();

        assert_eq!(vault.signer_ids(), vec![A, B, C]);
        assert_eq!(vault.created_by, A);
        assert!(!vault.is_deployed);

        let expected = ledger.deriver().derive(&[A, B, C], 2, U256::from(7u64)).unwrap();
        assert_eq!(vault.vault_id, expected);
        assert_eq!(ledger.get_threshold_requirement(&vault.vault_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_threshold_bounds() {
        let ledger = ledger_with_signers(&[A, B, C]).await;
        assert!(matches!(
            ledger.create_vault(&[B, C], 0, A, 1).await,
            Err(Error::InvalidThreshold { threshold: 0, .. })
        ));
        assert!(matches!(
            ledger.create_vault(&[B, C], 4, A, 1).await,
            Err(Error::InvalidThreshold { threshold: 4, signers: 3 })
        ));
        // requester alone may sign
        assert!(ledger.create_vault(&[], 1, A, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_candidates_rejected() {
        let ledger = ledger_with_signers(&[A, B]).await;
        assert!(matches!(
            ledger.create_vault(&[B, B], 1, A, 1).await,
            Err(Error::DuplicateSigner(_))
        ));
        assert!(matches!(
            ledger.create_vault(&[A, B], 1, A, 1).await,
            Err(Error::DuplicateSigner(_))
        ));
    }

    #[tokio::test]
    async fn test_unverifiable_signer_rejected() {
        let ledger = ledger_with_signers(&[A]).await;
        assert!(matches!(
            ledger.create_vault(&[B], 1, A, 1).await,
            Err(Error::UnverifiableSigner(_))
        ));
        assert!(ledger.list_vaults().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_nonce_collision_rejected() {
        let ledger = ledger_with_signers(&[A, B]).await;
        ledger.create_vault(&[B], 1, A, 1).await.unwrap();
        assert!(matches!(
            ledger.create_vault(&[B], 1, A, 1).await,
            Err(Error::DuplicateVault(_))
        ));
    }

    #[tokio::test]
    async fn test_passkey_signer_is_verifiable() {
        let ledger = ledger_with_signers(&[A]).await;
        let key = SigningKey::random(&mut OsRng);
        let public = PasskeyPublicKey::from_verifying_key(key.verifying_key()).unwrap();

        ledger
            .register_passkey(B, "user-b", "cred-b", public, 0)
            .await
            .unwrap();
        let vault = ledger.create_vault(&[B], 2, A, 8453).await.unwrap();
        assert!(vault.signer(&B).unwrap().credential.is_passkey());
    }

    #[tokio::test]
    async fn test_register_passkey_rejects_bad_key() {
        let ledger = ledger_with_signers(&[]).await;
        let bogus = PasskeyPublicKey {
            x: alloy_primitives::B256::repeat_byte(1),
            y: alloy_primitives::B256::repeat_byte(2),
        };
        assert!(matches!(
            ledger.register_passkey(B, "user-b", "cred-b", bogus, 0).await,
            Err(Error::UnverifiableSigner(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_deployment_and_delete() {
        let ledger = ledger_with_signers(&[A, B]).await;
        let vault = ledger.create_vault(&[B], 1, A, 1).await.unwrap();

        assert!(ledger.confirm_deployment(&vault.vault_id).await.unwrap());
        assert!(!ledger.confirm_deployment(&vault.vault_id).await.unwrap());
        assert!(matches!(
            ledger.soft_delete(&vault.vault_id).await,
            Err(Error::VaultDeployed(_))
        ));
        assert!(ledger.get_vault(&vault.vault_id).await.unwrap().is_deployed);
    }
}
