//! Phrase + PIN key stretching and local secret encryption
//!
//! ```text
//! key        = PBKDF2-HMAC-SHA256(phrase ‖ ":" ‖ pin, salt, iterations) -> 32 bytes
//! ciphertext = nonce(12) ‖ AES-256-GCM(key, nonce, payload) ‖ tag(16)
//! ```
//!
//! The PIN alone has 10^6 values, so the iteration count is what makes an
//! offline search over a stolen ciphertext expensive. Never lower it below
//! [`MIN_KDF_ITERATIONS`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

use super::phrase::{Pin, RecoveryPhrase};

/// Lowest accepted PBKDF2 iteration count
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Default PBKDF2 iteration count
pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Derived key length in bytes
pub const KEY_LEN: usize = 32;

/// AES-GCM tag length in bytes
const TAG_LEN: usize = 16;

/// Current [`SealedSecret`] format version
pub const SEALED_SECRET_VERSION: u8 = 1;

/// 256-bit symmetric key, wiped on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKey(***)")
    }
}

/// Client-side persisted form of an encrypted local secret
///
/// The salt is not sensitive; the ciphertext is useless without phrase and PIN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub version: u8,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Key stretching with a fixed iteration count
#[derive(Debug, Clone, Copy)]
pub struct KeyDerivation {
    iterations: u32,
}

impl Default for KeyDerivation {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl KeyDerivation {
    /// Create with an explicit iteration count (at least [`MIN_KDF_ITERATIONS`])
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(Error::Config(format!(
                "KDF iterations {} below minimum {}",
                iterations, MIN_KDF_ITERATIONS
            )));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Fresh random salt
    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    /// Derive the 256-bit key for a phrase, PIN and salt
    pub fn derive(&self, phrase: &RecoveryPhrase, pin: &Pin, salt: &[u8]) -> DerivedKey {
        derive_with_iterations(phrase, pin, salt, self.iterations)
    }

    /// Encrypt a payload under a freshly salted key
    pub fn seal(&self, phrase: &RecoveryPhrase, pin: &Pin, payload: &[u8]) -> Result<SealedSecret> {
        let salt = Self::generate_salt();
        let key = self.derive(phrase, pin, &salt);
        let ciphertext = encrypt(payload, &key)?;

        debug!(iterations = self.iterations, len = payload.len(), "Sealed local secret");

        Ok(SealedSecret {
            version: SEALED_SECRET_VERSION,
            salt: salt.to_vec(),
            iterations: self.iterations,
            ciphertext,
        })
    }

    /// Decrypt a sealed secret using the iteration count recorded in it
    pub fn open(sealed: &SealedSecret, phrase: &RecoveryPhrase, pin: &Pin) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.version != SEALED_SECRET_VERSION {
            return Err(Error::Serialization(format!(
                "unsupported sealed secret version {}",
                sealed.version
            )));
        }
        if sealed.iterations < MIN_KDF_ITERATIONS {
            warn!(iterations = sealed.iterations, "Refusing weakly stretched secret");
            return Err(Error::DecryptionFailed);
        }

        let key = derive_with_iterations(phrase, pin, &sealed.salt, sealed.iterations);
        decrypt(&sealed.ciphertext, &key)
    }
}

fn derive_with_iterations(
    phrase: &RecoveryPhrase,
    pin: &Pin,
    salt: &[u8],
    iterations: u32,
) -> DerivedKey {
    let normalized = phrase.normalized();
    let mut password = Zeroizing::new(Vec::with_capacity(normalized.len() + 1 + pin.as_str().len()));
    password.extend_from_slice(normalized.as_bytes());
    password.push(b':');
    password.extend_from_slice(pin.as_str().as_bytes());

    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(&password, salt, iterations, &mut key);
    let derived = DerivedKey(key);
    key.zeroize();
    derived
}

/// Authenticated encryption with a fresh random nonce per call
pub fn encrypt(payload: &[u8], key: &DerivedKey) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), payload)
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Inverse of [`encrypt`]; fails closed on any tag mismatch
pub fn decrypt(blob: &[u8], key: &DerivedKey) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::DecryptionFailed);
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| Error::DecryptionFailed)?;
    let (nonce, body) = blob.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map(Zeroizing::new)
        .map_err(|_| Error::DecryptionFailed)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
