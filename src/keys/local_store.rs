//! Client-side storage for the sealed local secret
//!
//! The store is a plain key-value interface. [`LocalSecretStore`] must be
//! initialized before use; every other call fails with
//! [`Error::StoreNotInitialized`] until then.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

use super::derivation::{KeyDerivation, SealedSecret};
use super::phrase::{Pin, RecoveryPhrase};

const FORMAT_KEY: &str = "format";
const FORMAT_VERSION: &str = "1";
const SEALED_KEY: &str = "sealed_secret";
const BACKUP_CONFIRMED_KEY: &str = "phrase_backup_confirmed";

/// Minimal key-value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

/// Process-local store, mainly for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, String>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON file store, readable by the owner only
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
}

impl FileKvStore {
    /// Open (or lazily create) the store at `path`
    ///
    /// Refuses an existing file readable by group or others.
    pub fn open(path: &Path) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(Error::Config(format!(
                        "Secret store {} has insecure permissions {:o}. Run 'chmod 600 {}'",
                        path.display(),
                        mode & 0o777,
                        path.display()
                    )));
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// Sealed local secret on top of a [`KeyValueStore`]
pub struct LocalSecretStore<S: KeyValueStore> {
    kv: S,
    kdf: KeyDerivation,
    initialized: bool,
}

impl<S: KeyValueStore> LocalSecretStore<S> {
    pub fn new(kv: S, kdf: KeyDerivation) -> Self {
        Self {
            kv,
            kdf,
            initialized: false,
        }
    }

    /// Check (or stamp) the storage format; required before any other call
    pub fn initialize(&mut self) -> Result<()> {
        match self.kv.get(FORMAT_KEY)? {
            Some(version) if version == FORMAT_VERSION => {}
            Some(version) => {
                return Err(Error::Config(format!(
                    "Unsupported secret store format {}",
                    version
                )));
            }
            None => {
                self.kv.set(FORMAT_KEY, FORMAT_VERSION)?;
                info!("Initialized local secret store");
            }
        }
        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::StoreNotInitialized)
        }
    }

    /// Whether a sealed secret is present
    pub fn has_secret(&self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.kv.get(SEALED_KEY)?.is_some())
    }

    /// Seal and persist a secret, replacing any previous one
    pub fn store(&self, phrase: &RecoveryPhrase, pin: &Pin, secret: &[u8]) -> Result<SealedSecret> {
        self.ensure_initialized()?;
        let sealed = self.kdf.seal(phrase, pin, secret)?;
        self.kv.set(SEALED_KEY, &serde_json::to_string(&sealed)?)?;
        self.kv.clear(BACKUP_CONFIRMED_KEY)?;
        debug!("Stored sealed secret");
        Ok(sealed)
    }

    /// Load and decrypt the secret
    pub fn load(&self, phrase: &RecoveryPhrase, pin: &Pin) -> Result<Zeroizing<Vec<u8>>> {
        self.ensure_initialized()?;
        let raw = self
            .kv
            .get(SEALED_KEY)?
            .ok_or_else(|| Error::Config("No sealed secret stored".to_string()))?;
        let sealed: SealedSecret = serde_json::from_str(&raw)?;

        KeyDerivation::open(&sealed, phrase, pin).inspect_err(|_| {
            warn!("Local secret could not be decrypted");
        })
    }

    /// Record that the user confirmed writing the phrase down
    pub fn confirm_backup(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.kv.set(BACKUP_CONFIRMED_KEY, "true")
    }

    pub fn backup_confirmed(&self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.kv.get(BACKUP_CONFIRMED_KEY)?.as_deref() == Some("true"))
    }

    /// Remove the secret and its flags
    pub fn clear(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.kv.clear(SEALED_KEY)?;
        self.kv.clear(BACKUP_CONFIRMED_KEY)?;
        info!("Cleared local secret");
        Ok(())
    }
}
