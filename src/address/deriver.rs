//! Counterfactual vault address derivation
//!
//! The vault identifier is the CREATE2 address the proxy factory will deploy to:
//!
//! ```text
//! initializer = setup(owners, threshold, moduleSetup, enableModules([module]), module, 0, 0, 0)
//! salt        = keccak256(keccak256(initializer) ‖ uint256(saltNonce))
//! vaultId     = keccak256(0xff ‖ factory ‖ salt ‖ proxyInitCodeHash)[12..32]
//! ```
//!
//! Owners are sorted ascending by address before encoding, so every caller
//! derives the same identifier from the same set.
//!
//! The salt nonce is chosen once when the vault is created and stored with it.
//! Deriving with any other nonce gives an unrelated address; never "repair" a
//! mismatch by re-deriving with a fresh nonce.

use alloy_primitives::{address, keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::abi::{self, Token};

/// `setup` on the wallet singleton
pub const SETUP_SIGNATURE: &str =
    "setup(address[],uint256,address,bytes,address,address,uint256,address)";

/// `enableModules` on the module setup helper (delegatecalled from `setup`)
pub const ENABLE_MODULES_SIGNATURE: &str = "enableModules(address[])";

/// Head of the wallet's owner linked list; never a valid owner
pub const SENTINEL_OWNER: Address = address!("0000000000000000000000000000000000000001");

/// Deployment parameters that fix the derivation, identical on every chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationParams {
    /// Proxy factory performing the CREATE2
    pub proxy_factory: Address,
    /// keccak256 of the proxy creation code with the singleton appended
    pub proxy_init_code_hash: B256,
    /// Account-abstraction module enabled at setup, also the fallback handler
    pub module: Address,
    /// Helper contract delegatecalled during setup to enable the module
    pub module_setup: Address,
}

/// Parse a signer identifier (`0x` + 40 hex characters, any case)
pub fn parse_signer_id(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| Error::InvalidSigner(format!("missing 0x prefix: {}", trimmed)))?;

    if hex_part.len() != 40 {
        return Err(Error::InvalidSigner(format!(
            "expected 40 hex characters, got {}",
            hex_part.len()
        )));
    }

    let bytes = hex::decode(hex_part)
        .map_err(|e| Error::InvalidSigner(format!("not hex: {}", e)))?;

    let signer = Address::from_slice(&bytes);
    check_signer(&signer)?;
    Ok(signer)
}

fn check_signer(signer: &Address) -> Result<()> {
    if *signer == Address::ZERO || *signer == SENTINEL_OWNER {
        return Err(Error::InvalidSigner(format!("reserved address {}", signer)));
    }
    Ok(())
}

/// Sort signers canonically, rejecting empty, reserved and duplicate entries
///
/// Lowercase hex order and byte order coincide, so sorting the raw bytes gives
/// the case-insensitive lexicographic order.
pub fn canonicalize(signers: &[Address]) -> Result<Vec<Address>> {
    if signers.is_empty() {
        return Err(Error::InvalidSigner("signer set is empty".to_string()));
    }

    let mut sorted = signers.to_vec();
    for signer in &sorted {
        check_signer(signer)?;
    }
    sorted.sort();

    if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(Error::DuplicateSigner(pair[0].to_string()));
    }

    Ok(sorted)
}

/// CREATE2 salt used by the proxy factory
pub fn create2_salt(initializer: &[u8], salt_nonce: U256) -> B256 {
    let mut preimage = Vec::with_capacity(64);
    preimage.extend_from_slice(keccak256(initializer).as_slice());
    preimage.extend_from_slice(&abi::uint_word(salt_nonce));
    keccak256(preimage)
}

/// Deterministic vault address derivation (current formula)
#[derive(Debug, Clone)]
pub struct AddressDeriver {
    params: DerivationParams,
}

impl AddressDeriver {
    /// Create a deriver for the given deployment parameters
    pub fn new(params: DerivationParams) -> Self {
        Self { params }
    }

    /// Deployment parameters in use
    pub fn params(&self) -> &DerivationParams {
        &self.params
    }

    /// Setup calldata for an already-canonical owner list
    pub fn initializer(&self, owners: &[Address], threshold: u32) -> Vec<u8> {
        let enable_modules = abi::encode_call(
            ENABLE_MODULES_SIGNATURE,
            &[Token::AddressArray(vec![self.params.module])],
        );

        abi::encode_call(
            SETUP_SIGNATURE,
            &[
                Token::AddressArray(owners.to_vec()),
                Token::Uint(U256::from(threshold)),
                Token::Address(self.params.module_setup),
                Token::Bytes(enable_modules),
                Token::Address(self.params.module),
                Token::Address(Address::ZERO),
                Token::Uint(U256::ZERO),
                Token::Address(Address::ZERO),
            ],
        )
    }

    /// Derive the vault identifier
    ///
    /// Input order of `signers` does not matter.
    pub fn derive(&self, signers: &[Address], threshold: u32, salt_nonce: U256) -> Result<Address> {
        let owners = canonicalize(signers)?;
        let initializer = self.initializer(&owners, threshold);
        let salt = create2_salt(&initializer, salt_nonce);

        Ok(self
            .params
            .proxy_factory
            .create2(salt.0, self.params.proxy_init_code_hash.0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_params() -> DerivationParams {
        DerivationParams {
            proxy_factory: Address::repeat_byte(0xfa),
            proxy_init_code_hash: B256::repeat_byte(0x42),
            module: Address::repeat_byte(0x4d),
            module_setup: Address::repeat_byte(0x5e),
        }
    }

    fn signers() -> Vec<Address> {
        vec![
            Address::repeat_byte(0xa1),
            Address::repeat_byte(0xb2),
            Address::repeat_byte(0xc3),
        ]
    }

    #[test]
    fn test_parse_signer_id_any_case() {
        let lower = parse_signer_id("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd").unwrap();
        let upper = parse_signer_id("0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_parse_signer_id_rejects_malformed() {
        assert!(matches!(parse_signer_id("abcd"), Err(Error::InvalidSigner(_))));
        assert!(matches!(parse_signer_id("0x1234"), Err(Error::InvalidSigner(_))));
        assert!(matches!(
            parse_signer_id("0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(Error::InvalidSigner(_))
        ));
        assert!(matches!(
            parse_signer_id("0x0000000000000000000000000000000000000000"),
            Err(Error::InvalidSigner(_))
        ));
        assert!(matches!(
            parse_signer_id("0x0000000000000000000000000000000000000001"),
            Err(Error::InvalidSigner(_))
        ));
    }

    #[test]
    fn test_canonicalize_sorts_and_rejects_duplicates() {
        let mut reversed = signers();
        reversed.reverse();
        assert_eq!(canonicalize(&reversed).unwrap(), signers());

        let dup = vec![Address::repeat_byte(0xa1), Address::repeat_byte(0xa1)];
        assert!(matches!(canonicalize(&dup), Err(Error::DuplicateSigner(_))));
        assert!(matches!(canonicalize(&[]), Err(Error::InvalidSigner(_))));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let nonce = U256::from(1_700_000_000_000_000u64);
        let a = AddressDeriver::new(test_params())
            .derive(&signers(), 2, nonce)
            .unwrap();
        let b = AddressDeriver::new(test_params())
            .derive(&signers(), 2, nonce)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_ignores_input_order() {
        let deriver = AddressDeriver::new(test_params());
        let nonce = U256::from(9u64);
        let mut shuffled = signers();
        shuffled.swap(0, 2);
        assert_eq!(
            deriver.derive(&signers(), 2, nonce).unwrap(),
            deriver.derive(&shuffled, 2, nonce).unwrap()
        );
    }

    #[test]
    fn test_threshold_change_changes_address() {
        let deriver = AddressDeriver::new(test_params());
        let nonce = U256::from(77u64);
        let two = deriver.derive(&signers(), 2, nonce).unwrap();
        let three = deriver.derive(&signers(), 3, nonce).unwrap();
        assert_ne!(two, three);
    }

    #[test]
    fn test_single_element_mutations_change_address() {
        let deriver = AddressDeriver::new(test_params());
        let nonce = U256::from(1234u64);
        let base = deriver.derive(&signers(), 2, nonce).unwrap();

        let mut seen = vec![base];

        for i in 0..signers().len() {
            let mut mutated = signers();
            mutated[i] = Address::repeat_byte(0xd0 + i as u8);
            seen.push(deriver.derive(&mutated, 2, nonce).unwrap());
        }

        seen.push(deriver.derive(&signers(), 1, nonce).unwrap());
        seen.push(deriver.derive(&signers(), 3, nonce).unwrap());
        seen.push(deriver.derive(&signers(), 2, nonce + U256::from(1u64)).unwrap());
        seen.push(deriver.derive(&signers()[..2], 2, nonce).unwrap());

        for i in 0..seen.len() {
            for j in (i + 1)..seen.len() {
                assert_ne!(seen[i], seen[j], "collision between mutation {} and {}", i, j);
            }
        }
    }

    #[test]
    fn test_params_change_address() {
        let nonce = U256::from(5u64);
        let base = AddressDeriver::new(test_params())
            .derive(&signers(), 2, nonce)
            .unwrap();

        let mut other = test_params();
        other.module = Address::repeat_byte(0x4e);
        let moved = AddressDeriver::new(other)
            .derive(&signers(), 2, nonce)
            .unwrap();
        assert_ne!(base, moved);
    }

    #[test]
    fn test_initializer_embeds_owners_and_module() {
        let deriver = AddressDeriver::new(test_params());
        let owners = canonicalize(&signers()).unwrap();
        let init = deriver.initializer(&owners, 2);

        assert_eq!(&init[..4], &abi::selector(SETUP_SIGNATURE));
        // threshold is the second head word
        assert_eq!(init[4 + 63], 2);
        // `to` is the module setup helper
        assert_eq!(&init[4 + 64 + 12..4 + 96], test_params().module_setup.as_slice());
        // fallback handler is the module
        assert_eq!(&init[4 + 128 + 12..4 + 160], test_params().module.as_slice());
    }
}
