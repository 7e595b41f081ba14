//! Local secret protection
//!
//! Derives a symmetric key from a human-memorable recovery phrase plus a PIN
//! and uses it to seal a local signing secret.
//!
//! ```text
//! RecoveryPhrase + Pin + salt → KeyDerivation → DerivedKey → SealedSecret
//!                                                                 ↓
//!                                                       LocalSecretStore → KeyValueStore
//! ```

pub mod derivation;
pub mod local_store;
pub mod phrase;
pub mod wordlist;

pub use derivation::{decrypt, encrypt, DerivedKey, KeyDerivation, SealedSecret};
pub use local_store::{FileKvStore, KeyValueStore, LocalSecretStore, MemoryKvStore};
pub use phrase::{Pin, RecoveryPhrase, WordChallenge};
