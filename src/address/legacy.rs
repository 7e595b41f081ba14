//! Legacy (v1) vault address derivation
//!
//! Vaults created before the account-abstraction module was introduced were
//! derived without it: no module setup delegatecall and the plain fallback
//! handler. Funds may still sit at those addresses, so this encoding is a
//! frozen wire format. Do not refactor it to share code or constants with
//! the current formula in [`super::deriver`].

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::abi::{self, Token};
use super::deriver::canonicalize;

const LEGACY_SETUP_SIGNATURE: &str =
    "setup(address[],uint256,address,bytes,address,address,uint256,address)";

/// Deployment parameters of the legacy contracts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyParams {
    /// Legacy proxy factory
    pub proxy_factory: Address,
    /// Legacy wallet singleton (implementation)
    pub singleton: Address,
    /// keccak256 of the legacy proxy creation code with the singleton appended
    pub proxy_init_code_hash: B256,
    /// Fallback handler installed by legacy setup
    pub fallback_handler: Address,
}

/// Re-derives addresses under the superseded formula
#[derive(Debug, Clone)]
pub struct LegacyDeriver {
    params: LegacyParams,
}

impl LegacyDeriver {
    pub fn new(params: LegacyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &LegacyParams {
        &self.params
    }

    /// Legacy setup calldata for an already-canonical owner list
    pub fn initializer(&self, owners: &[Address], threshold: u32) -> Vec<u8> {
        abi::encode_call(
            LEGACY_SETUP_SIGNATURE,
            &[
                Token::AddressArray(owners.to_vec()),
                Token::Uint(U256::from(threshold)),
                Token::Address(Address::ZERO),
                Token::Bytes(Vec::new()),
                Token::Address(self.params.fallback_handler),
                Token::Address(Address::ZERO),
                Token::Uint(U256::ZERO),
                Token::Address(Address::ZERO),
            ],
        )
    }

    /// Derive the legacy address for the same logical owner set
    pub fn derive(&self, signers: &[Address], threshold: u32, salt_nonce: U256) -> Result<Address> {
        let owners = canonicalize(signers)?;
        let initializer = self.initializer(&owners, threshold);

        let mut preimage = Vec::with_capacity(64);
        preimage.extend_from_slice(keccak256(&initializer).as_slice());
        preimage.extend_from_slice(&abi::uint_word(salt_nonce));
        let salt = keccak256(preimage);

        let mut create2 = Vec::with_capacity(85);
        create2.push(0xff);
        create2.extend_from_slice(self.params.proxy_factory.as_slice());
        create2.extend_from_slice(salt.as_slice());
        create2.extend_from_slice(self.params.proxy_init_code_hash.as_slice());

        Ok(Address::from_slice(&keccak256(create2)[12..]))
    }
}
