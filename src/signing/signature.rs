//! Signature entries and the packed blob the wallet verifies
//!
//! Entries are packed in ascending signer order. Each entry has a 65-byte
//! static slot; contract (passkey) entries point from their slot into a
//! dynamic section appended after all slots:
//!
//! ```text
//! ECDSA slot:    r(32) ‖ s(32) ‖ v(1)              v ∈ {27, 28}, eth_sign: {31, 32}
//! contract slot: uint256(signer) ‖ uint256(offset) ‖ 0x00
//! dynamic:       uint256(len) ‖ abi.encode(authenticatorData, clientDataFields, r, s)
//! ```

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::address::abi;
use crate::error::{Error, Result};

/// Length of one static signature slot
pub const SIGNATURE_SLOT_LEN: usize = 65;

/// One signer's contribution to a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssembledSignature {
    /// secp256k1 signature, `r ‖ s ‖ v`
    Ecdsa { signer: Address, bytes: Vec<u8> },

    /// Signature checked by the signer's verifier contract
    Contract { signer: Address, data: Vec<u8> },
}

impl AssembledSignature {
    pub fn signer(&self) -> Address {
        match self {
            AssembledSignature::Ecdsa { signer, .. } | AssembledSignature::Contract { signer, .. } => {
                *signer
            }
        }
    }

    pub fn is_contract(&self) -> bool {
        matches!(self, AssembledSignature::Contract { .. })
    }
}

/// Pack entries into the wallet's signature blob
///
/// Entries must come from distinct signers; they are sorted here.
pub fn encode_signatures(entries: &[AssembledSignature]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&AssembledSignature> = entries.iter().collect();
    sorted.sort_by_key(|e| e.signer());
    if let Some(pair) = sorted.windows(2).find(|w| w[0].signer() == w[1].signer()) {
        return Err(Error::DuplicateSigner(pair[0].signer().to_string()));
    }

    let mut slots = Vec::with_capacity(sorted.len() * SIGNATURE_SLOT_LEN);
    let mut dynamic = Vec::new();
    let static_len = sorted.len() * SIGNATURE_SLOT_LEN;

    for entry in sorted {
        match entry {
            AssembledSignature::Ecdsa { signer, bytes } => {
                if bytes.len() != SIGNATURE_SLOT_LEN {
                    return Err(Error::Encoding(format!(
                        "ECDSA signature for {} is {} bytes",
                        signer,
                        bytes.len()
                    )));
                }
                slots.extend_from_slice(bytes);
            }
            AssembledSignature::Contract { signer, data } => {
                let offset = static_len + dynamic.len();
                slots.extend_from_slice(&abi::address_word(*signer));
                slots.extend_from_slice(&abi::uint_word(U256::from(offset)));
                slots.push(0);

                dynamic.extend_from_slice(&abi::uint_word(U256::from(data.len())));
                dynamic.extend_from_slice(data);
            }
        }
    }

    slots.extend_from_slice(&dynamic);
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::webauthn::{encode_passkey_data, tests::authenticator_data, tests::ORIGIN_FIELDS};

    const GOLDEN_PASSKEY_BLOB: &str = concat!(
        "0000000000000000000000001111111111111111111111111111111111111111",
        "0000000000000000000000000000000000000000000000000000000000000041",
        "00",
        "0000000000000000000000000000000000000000000000000000000000000140",
        "0000000000000000000000000000000000000000000000000000000000000080",
        "00000000000000000000000000000000000000000000000000000000000000e0",
        "0101010101010101010101010101010101010101010101010101010101010101",
        "0202020202020202020202020202020202020202020202020202020202020202",
        "0000000000000000000000000000000000000000000000000000000000000025",
        "4949494949494949494949494949494949494949494949494949494949494949",
        "0500000001000000000000000000000000000000000000000000000000000000",
        "0000000000000000000000000000000000000000000000000000000000000034",
        "226f726967696e223a2268747470733a2f2f7661756c742e6578616d706c6522",
        "2c2263726f73734f726967696e223a66616c7365000000000000000000000000",
    );

    #[test]
    fn test_golden_passkey_layout() {
        let data = encode_passkey_data(
            &authenticator_data(1),
            ORIGIN_FIELDS,
            U256::from_be_bytes([0x01; 32]),
            U256::from_be_bytes([0x02; 32]),
        );
        let blob = encode_signatures(&[AssembledSignature::Contract {
            signer: Address::repeat_byte(0x11),
            data,
        }])
        .unwrap();

        assert_eq!(hex::encode(&blob), GOLDEN_PASSKEY_BLOB);
    }

    #[test]
    fn test_mixed_entries_sorted_with_offsets() {
        let ecdsa = AssembledSignature::Ecdsa {
            signer: Address::repeat_byte(0xee),
            bytes: vec![0xab; 65],
        };
        let contract = AssembledSignature::Contract {
            signer: Address::repeat_byte(0x22),
            data: vec![0xcd; 64],
        };

        let blob = encode_signatures(&[ecdsa, contract]).unwrap();
        assert_eq!(blob.len(), 65 * 2 + 32 + 64);

        // contract signer sorts first
        assert_eq!(&blob[12..32], Address::repeat_byte(0x22).as_slice());
        assert_eq!(blob[63], 130);
        assert_eq!(blob[64], 0);
        assert_eq!(&blob[65..130], &[0xab; 65][..]);
        assert_eq!(blob[130 + 31], 64);
    }

    #[test]
    fn test_rejects_duplicate_and_malformed() {
        let a = AssembledSignature::Ecdsa {
            signer: Address::repeat_byte(0x01),
            bytes: vec![0; 65],
        };
        assert!(matches!(
            encode_signatures(&[a.clone(), a]),
            Err(Error::DuplicateSigner(_))
        ));

        let short = AssembledSignature::Ecdsa {
            signer: Address::repeat_byte(0x01),
            bytes: vec![0; 64],
        };
        assert!(matches!(encode_signatures(&[short]), Err(Error::Encoding(_))));
    }
}
