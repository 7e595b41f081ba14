//! Vault address derivation
//!
//! Computes the counterfactual identifier of a vault from its owner set,
//! threshold and salt nonce, with no dependency on chain state.
//!
//! - [`deriver`]: the current formula (module enabled at setup)
//! - [`legacy`]: the frozen pre-module formula, used only for fund recovery
//! - [`abi`]: the Solidity ABI encoding both formulas rely on

pub mod abi;
pub mod deriver;
pub mod legacy;

pub use deriver::{canonicalize, parse_signer_id, AddressDeriver, DerivationParams};
pub use legacy::{LegacyDeriver, LegacyParams};
