//! Transaction signing
//!
//! ```text
//! SafeTransaction → challenge (EIP-712) → VaultSigner::produce_signature
//!                                               │
//!                RawKey / Legacy: ECDSA    Passkey: Ceremony state machine
//!                                               ↓
//!                SignatureCollector → SignedTransaction (threshold met)
//! ```

pub mod collector;
pub mod passkey;
pub mod signature;
pub mod signer;
pub mod transaction;
pub mod webauthn;

pub use collector::{PendingTransaction, SignatureCollector, SignedTransaction};
pub use passkey::{Ceremony, CeremonyState, PasskeySigner, SigningRequest, WebAuthnAuthenticator};
pub use signature::{encode_signatures, AssembledSignature};
pub use signer::{LegacySigner, RawKeySigner, SignatureOutcome, VaultSigner};
pub use transaction::{Operation, SafeTransaction};
pub use webauthn::Assertion;
