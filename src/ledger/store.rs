//! Store collaborator for vault, member, signer and passkey rows
//!
//! [`VaultStore`] is the seam to the relational store. [`MemoryStore`] keeps
//! rows in process and can persist them to a JSON registry file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

use super::types::{PasskeyCredential, Signer, Vault, VaultMemberRow, VaultRow};

/// Row-level access to custody data
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Register a raw-key or legacy signer
    async fn register_signer(&self, signer: Signer) -> Result<()>;

    /// Register a passkey credential together with its signer row
    async fn register_passkey(&self, signer: Signer, credential: PasskeyCredential) -> Result<()>;

    async fn find_signer(&self, signer_id: &Address) -> Result<Option<Signer>>;

    async fn find_passkey(&self, credential_id: &str) -> Result<Option<PasskeyCredential>>;

    /// Store a newer authenticator counter
    ///
    /// A zero counter means the authenticator does not count and is ignored.
    /// A non-zero counter at or below a non-zero stored value is a replayed or
    /// cloned authenticator and fails with [`Error::InvalidAssertion`].
    async fn update_passkey_counter(&self, credential_id: &str, counter: u32) -> Result<()>;

    /// Insert a vault and all of its member rows as one unit
    ///
    /// Fails with [`Error::DuplicateVault`] if the identifier already exists.
    async fn insert_vault(&self, vault: &Vault) -> Result<()>;

    async fn get_vault(&self, vault_id: &Address) -> Result<Option<Vault>>;

    /// All live (not soft-deleted) vaults
    async fn list_vaults(&self) -> Result<Vec<Vault>>;

    /// Live vaults with `is_deployed = false`
    async fn list_undeployed(&self) -> Result<Vec<Vault>>;

    /// Flip `is_deployed` to true; returns whether the row changed
    async fn mark_deployed(&self, vault_id: &Address) -> Result<bool>;

    /// Soft-delete an undeployed vault
    async fn soft_delete(&self, vault_id: &Address) -> Result<()>;
}

/// Serialized form of the registry file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    signers: Vec<Signer>,
    #[serde(default)]
    passkeys: Vec<PasskeyCredential>,
    #[serde(default)]
    vaults: Vec<VaultRow>,
    #[serde(default)]
    members: Vec<VaultMemberRow>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Default)]
struct Tables {
    signers: HashMap<Address, Signer>,
    passkeys: HashMap<String, PasskeyCredential>,
    vaults: HashMap<Address, VaultRow>,
    members: HashMap<Address, Vec<VaultMemberRow>>,
}

impl Tables {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut tables = Tables::default();
        for s in snapshot.signers {
            tables.signers.insert(s.signer_id, s);
        }
        for p in snapshot.passkeys {
            tables.passkeys.insert(p.credential_id.clone(), p);
        }
        for v in snapshot.vaults {
            tables.vaults.insert(v.vault_id, v);
        }
        for m in snapshot.members {
            tables.members.entry(m.vault_id).or_default().push(m);
        }
        for rows in tables.members.values_mut() {
            rows.sort_by_key(|m| m.position);
        }
        tables
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            version: default_version(),
            signers: self.signers.values().cloned().collect(),
            passkeys: self.passkeys.values().cloned().collect(),
            vaults: self.vaults.values().cloned().collect(),
            members: self.members.values().flatten().cloned().collect(),
        };
        // Stable file contents
        snapshot.signers.sort_by_key(|s| s.signer_id);
        snapshot.passkeys.sort_by(|a, b| a.credential_id.cmp(&b.credential_id));
        snapshot.vaults.sort_by_key(|v| v.vault_id);
        snapshot.members.sort_by_key(|m| (m.vault_id, m.position));
        snapshot
    }

    /// Join a vault row with its members
    fn assemble(&self, row: &VaultRow) -> Result<Vault> {
        let members = self.members.get(&row.vault_id).ok_or_else(|| {
            error!(vault = %row.vault_id, "Vault row without member rows");
            Error::PartialWrite(format!("vault {} has no members", row.vault_id))
        })?;

        let signers = members
            .iter()
            .map(|m| {
                self.signers.get(&m.signer_id).cloned().ok_or_else(|| {
                    error!(vault = %row.vault_id, signer = %m.signer_id, "Member row without signer row");
                    Error::PartialWrite(format!(
                        "vault {} references missing signer {}",
                        row.vault_id, m.signer_id
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Vault {
            vault_id: row.vault_id,
            chain_id: row.chain_id,
            threshold: row.threshold,
            signers,
            is_deployed: row.is_deployed,
            salt_nonce: row.salt_nonce,
            created_by: row.created_by,
            created_at: row.created_at,
            deployed_at: row.deployed_at,
        })
    }

    fn live_rows(&self) -> impl Iterator<Item = &VaultRow> {
        self.vaults.values().filter(|v| v.deleted_at.is_none())
    }
}

/// In-process store with optional JSON persistence
pub struct MemoryStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store without persistence
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            path: None,
        }
    }

    /// Load from (or create) a registry file
    pub fn open(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Store(format!("Failed to read {}: {}", path.display(), e)))?;
            serde_json::from_str::<Snapshot>(&content)
                .map_err(|e| Error::Store(format!("Failed to parse {}: {}", path.display(), e)))?
        } else {
            warn!("{} not found, creating empty registry", path.display());
            Snapshot::default()
        };

        info!(
            vaults = snapshot.vaults.len(),
            signers = snapshot.signers.len(),
            "Loaded vault registry"
        );

        Ok(Self {
            tables: RwLock::new(Tables::from_snapshot(snapshot)),
            path: Some(path.to_path_buf()),
        })
    }

    fn persist(&self, tables: &Tables) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(&tables.to_snapshot())
            .map_err(|e| Error::Store(format!("Failed to serialize registry: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Store(format!("Failed to create {}: {}", parent.display(), e)))?;
            }
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| Error::Store(format!("Failed to write {}: {}", path.display(), e)))?;

        debug!("Saved vault registry");
        Ok(())
    }
}

#[async_trait]
impl VaultStore for MemoryStore {
    async fn register_signer(&self, signer: Signer) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.signers.contains_key(&signer.signer_id) {
            return Err(Error::DuplicateSigner(signer.signer_id.to_string()));
        }

        let id = signer.signer_id;
        tables.signers.insert(id, signer);
        if let Err(e) = self.persist(&tables) {
            tables.signers.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    async fn register_passkey(&self, signer: Signer, credential: PasskeyCredential) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.signers.contains_key(&signer.signer_id) {
            return Err(Error::DuplicateSigner(signer.signer_id.to_string()));
        }
        if tables.passkeys.contains_key(&credential.credential_id) {
            return Err(Error::Store(format!(
                "Credential already registered: {}",
                credential.credential_id
            )));
        }

        let id = signer.signer_id;
        let credential_id = credential.credential_id.clone();
        tables.signers.insert(id, signer);
        tables.passkeys.insert(credential_id.clone(), credential);

        if let Err(e) = self.persist(&tables) {
            tables.signers.remove(&id);
            tables.passkeys.remove(&credential_id);
            return Err(e);
        }
        Ok(())
    }

    async fn find_signer(&self, signer_id: &Address) -> Result<Option<Signer>> {
        Ok(self.tables.read().await.signers.get(signer_id).cloned())
    }

    async fn find_passkey(&self, credential_id: &str) -> Result<Option<PasskeyCredential>> {
        Ok(self.tables.read().await.passkeys.get(credential_id).cloned())
    }

    async fn update_passkey_counter(&self, credential_id: &str, counter: u32) -> Result<()> {
        let mut tables = self.tables.write().await;
        let credential = tables
            .passkeys
            .get_mut(credential_id)
            .ok_or_else(|| Error::Store(format!("Unknown credential: {}", credential_id)))?;

        if counter == 0 {
            return Ok(());
        }
        if credential.counter != 0 && counter <= credential.counter {
            warn!(
                credential = credential_id,
                stored = credential.counter,
                reported = counter,
                "Passkey counter did not advance"
            );
            return Err(Error::InvalidAssertion(format!(
                "authenticator counter went from {} to {}",
                credential.counter, counter
            )));
        }
        let previous = credential.counter;
        credential.counter = counter;

        if let Err(e) = self.persist(&tables) {
            if let Some(c) = tables.passkeys.get_mut(credential_id) {
                c.counter = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn insert_vault(&self, vault: &Vault) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables.vaults.contains_key(&vault.vault_id) {
            error!(vault = %vault.vault_id, "Derived identifier already exists");
            return Err(Error::DuplicateVault(vault.vault_id.to_string()));
        }

        for signer in &vault.signers {
            if !tables.signers.contains_key(&signer.signer_id) {
                return Err(Error::UnverifiableSigner(signer.signer_id.to_string()));
            }
        }

        let row = VaultRow {
            vault_id: vault.vault_id,
            chain_id: vault.chain_id,
            threshold: vault.threshold,
            salt_nonce: vault.salt_nonce,
            is_deployed: vault.is_deployed,
            created_by: vault.created_by,
            created_at: vault.created_at,
            deployed_at: vault.deployed_at,
            deleted_at: None,
        };
        let members: Vec<VaultMemberRow> = vault
            .signers
            .iter()
            .enumerate()
            .map(|(i, s)| VaultMemberRow {
                vault_id: vault.vault_id,
                signer_id: s.signer_id,
                position: i as u32,
            })
            .collect();

        tables.vaults.insert(vault.vault_id, row);
        tables.members.insert(vault.vault_id, members);

        if let Err(e) = self.persist(&tables) {
            // Roll back both rows so no half-written vault is ever visible
            tables.vaults.remove(&vault.vault_id);
            tables.members.remove(&vault.vault_id);
            warn!(vault = %vault.vault_id, "Vault insert rolled back: {}", e);
            return Err(e);
        }

        Ok(())
    }

    async fn get_vault(&self, vault_id: &Address) -> Result<Option<Vault>> {
        let tables = self.tables.read().await;
        match tables.vaults.get(vault_id) {
            Some(row) if row.deleted_at.is_none() => tables.assemble(row).map(Some),
            _ => Ok(None),
        }
    }

    async fn list_vaults(&self) -> Result<Vec<Vault>> {
        let tables = self.tables.read().await;
        let mut vaults = tables
            .live_rows()
            .map(|row| tables.assemble(row))
            .collect::<Result<Vec<_>>>()?;
        vaults.sort_by_key(|v| v.created_at);
        Ok(vaults)
    }

    async fn list_undeployed(&self) -> Result<Vec<Vault>> {
        let tables = self.tables.read().await;
        tables
            .live_rows()
            .filter(|row| !row.is_deployed)
            .map(|row| tables.assemble(row))
            .collect()
    }

    async fn mark_deployed(&self, vault_id: &Address) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let row = tables
            .vaults
            .get_mut(vault_id)
            .ok_or_else(|| Error::VaultNotFound(vault_id.to_string()))?;

        if row.is_deployed {
            return Ok(false);
        }
        row.is_deployed = true;
        row.deployed_at = Some(Utc::now());

        if let Err(e) = self.persist(&tables) {
            if let Some(row) = tables.vaults.get_mut(vault_id) {
                row.is_deployed = false;
                row.deployed_at = None;
            }
            return Err(e);
        }
        Ok(true)
    }

    async fn soft_delete(&self, vault_id: &Address) -> Result<()> {
        let mut tables = self.tables.write().await;
        let row = tables
            .vaults
            .get_mut(vault_id)
            .filter(|r| r.deleted_at.is_none())
            .ok_or_else(|| Error::VaultNotFound(vault_id.to_string()))?;

        if row.is_deployed {
            return Err(Error::VaultDeployed(vault_id.to_string()));
        }
        row.deleted_at = Some(Utc::now());

        if let Err(e) = self.persist(&tables) {
            if let Some(row) = tables.vaults.get_mut(vault_id) {
                row.deleted_at = None;
            }
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::types::CredentialRef;
    use alloy_primitives::U256;
    use tempfile::tempdir;

    pub(crate) fn raw_signer(byte: u8) -> Signer {
        Signer {
            signer_id: Address::repeat_byte(byte),
            owner_user_id: format!("user-{}", byte),
            credential: CredentialRef::RawKey,
        }
    }

    fn vault_with(signers: Vec<Signer>, id: u8) -> Vault {
        Vault {
            vault_id: Address::repeat_byte(id),
            chain_id: 8453,
            threshold: 1,
            created_by: signers[0].signer_id,
            signers,
            is_deployed: false,
            salt_nonce: U256::from(1u64),
            created_at: Utc::now(),
            deployed_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_vault() {
        let store = MemoryStore::new();
        store.register_signer(raw_signer(0x11)).await.unwrap();
        store.register_signer(raw_signer(0x22)).await.unwrap();

        let vault = vault_with(vec![raw_signer(0x11), raw_signer(0x22)], 0xaa);
        store.insert_vault(&vault).await.unwrap();

        let loaded = store.get_vault(&vault.vault_id).await.unwrap().unwrap();
        assert_eq!(loaded, vault);
        assert_eq!(store.list_undeployed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_vault_rejected() {
        let store = MemoryStore::new();
        store.register_signer(raw_signer(0x11)).await.unwrap();

        let vault = vault_with(vec![raw_signer(0x11)], 0xaa);
        store.insert_vault(&vault).await.unwrap();
        assert!(matches!(
            store.insert_vault(&vault).await,
            Err(Error::DuplicateVault(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_requires_registered_signers() {
        let store = MemoryStore::new();
        let vault = vault_with(vec![raw_signer(0x11)], 0xaa);
        assert!(matches!(
            store.insert_vault(&vault).await,
            Err(Error::UnverifiableSigner(_))
        ));
        assert!(store.get_vault(&vault.vault_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_deployed_is_one_way() {
        let store = MemoryStore::new();
        store.register_signer(raw_signer(0x11)).await.unwrap();
        let vault = vault_with(vec![raw_signer(0x11)], 0xaa);
        store.insert_vault(&vault).await.unwrap();

        assert!(store.mark_deployed(&vault.vault_id).await.unwrap());
        assert!(!store.mark_deployed(&vault.vault_id).await.unwrap());

        let loaded = store.get_vault(&vault.vault_id).await.unwrap().unwrap();
        assert!(loaded.is_deployed);
        assert!(store.list_undeployed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_only_before_deployment() {
        let store = MemoryStore::new();
        store.register_signer(raw_signer(0x11)).await.unwrap();

        let a = vault_with(vec![raw_signer(0x11)], 0xaa);
        let b = vault_with(vec![raw_signer(0x11)], 0xbb);
        store.insert_vault(&a).await.unwrap();
        store.insert_vault(&b).await.unwrap();

        store.soft_delete(&a.vault_id).await.unwrap();
        assert!(store.get_vault(&a.vault_id).await.unwrap().is_none());

        store.mark_deployed(&b.vault_id).await.unwrap();
        assert!(matches!(
            store.soft_delete(&b.vault_id).await,
            Err(Error::VaultDeployed(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vaults.json");

        let vault = vault_with(vec![raw_signer(0x11), raw_signer(0x22)], 0xaa);
        {
            let store = MemoryStore::open(&path).unwrap();
            store.register_signer(raw_signer(0x11)).await.unwrap();
            store.register_signer(raw_signer(0x22)).await.unwrap();
            store.insert_vault(&vault).await.unwrap();
        }

        let reopened = MemoryStore::open(&path).unwrap();
        let loaded = reopened.get_vault(&vault.vault_id).await.unwrap().unwrap();
        assert_eq!(loaded.signer_ids(), vault.signer_ids());
        assert_eq!(loaded.salt_nonce, vault.salt_nonce);
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back_insert() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vaults.json");
        let store = MemoryStore::open(&path).unwrap();
        store.register_signer(raw_signer(0x11)).await.unwrap();

        // A directory where the temp file should go makes the write fail
        std::fs::create_dir(path.with_extension("tmp")).unwrap();

        let vault = vault_with(vec![raw_signer(0x11)], 0xaa);
        assert!(matches!(store.insert_vault(&vault).await, Err(Error::Store(_))));
        assert!(store.get_vault(&vault.vault_id).await.unwrap().is_none());
        assert!(store.list_vaults().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_rows_surface_as_invariant_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vaults.json");

        // A vault row with no members, as a corrupted registry would hold
        let snapshot = serde_json::json!({
            "version": "1.0",
            "vaults": [{
                "vault_id": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "chain_id": 1,
                "threshold": 1,
                "salt_nonce": "0x1",
                "is_deployed": false,
                "created_by": "0x1111111111111111111111111111111111111111",
                "created_at": "2025-01-01T00:00:00Z"
            }]
        });
        std::fs::write(&path, snapshot.to_string()).unwrap();

        let store = MemoryStore::open(&path).unwrap();
        let id = Address::repeat_byte(0xaa);
        assert!(matches!(store.get_vault(&id).await, Err(Error::PartialWrite(_))));
    }

    #[tokio::test]
    async fn test_passkey_counter_only_moves_forward() {
        use crate::ledger::types::{PasskeyCredential, PasskeyPublicKey};
        use alloy_primitives::B256;

        let store = MemoryStore::new();
        let signer = Signer {
            signer_id: Address::repeat_byte(0x33),
            owner_user_id: "user-33".to_string(),
            credential: CredentialRef::Passkey {
                credential_id: "cred-1".to_string(),
            },
        };
        let credential = PasskeyCredential {
            credential_id: "cred-1".to_string(),
            signer_id: signer.signer_id,
            public_key: PasskeyPublicKey {
                x: B256::ZERO,
                y: B256::ZERO,
            },
            counter: 5,
            created_at: Utc::now(),
        };
        store.register_passkey(signer, credential).await.unwrap();

        store.update_passkey_counter("cred-1", 9).await.unwrap();
        assert!(matches!(
            store.update_passkey_counter("cred-1", 3).await,
            Err(Error::InvalidAssertion(_))
        ));
        assert!(matches!(
            store.update_passkey_counter("cred-1", 9).await,
            Err(Error::InvalidAssertion(_))
        ));
        // authenticators without a counter always report zero
        store.update_passkey_counter("cred-1", 0).await.unwrap();
        assert_eq!(store.find_passkey("cred-1").await.unwrap().unwrap().counter, 9);
    }
}
