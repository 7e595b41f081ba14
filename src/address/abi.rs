//! Minimal Solidity ABI encoding
//!
//! Only the shapes the wallet contracts need: addresses, uint256, bytes32, dynamic
//! bytes/strings and address arrays. Output must match `abi.encode` exactly.

use alloy_primitives::{keccak256, Address, B256, U256};

/// A single ABI value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    /// `bytes32`
    Word(B256),
    /// `bytes` or `string`
    Bytes(Vec<u8>),
    /// `address[]`
    AddressArray(Vec<Address>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        matches!(self, Token::Bytes(_) | Token::AddressArray(_))
    }
}

/// Four-byte function selector for a canonical signature such as `transfer(address,uint256)`
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Left-pad an address to a 32-byte word
pub fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// Big-endian uint256 word
pub fn uint_word(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

/// Round up to the next multiple of 32
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(32) * 32
}

/// `abi.encode(tokens...)`
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_size = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_size);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word(U256::from(head_size + tail.len())));
            encode_dynamic(token, &mut tail);
        } else {
            encode_static(token, &mut head);
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// `abi.encodeWithSignature(signature, tokens...)`
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&encode(tokens));
    out
}

fn encode_static(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Address(a) => out.extend_from_slice(&address_word(*a)),
        Token::Uint(v) => out.extend_from_slice(&uint_word(*v)),
        Token::Word(w) => out.extend_from_slice(w.as_slice()),
        Token::Bytes(_) | Token::AddressArray(_) => unreachable!("dynamic token in static slot"),
    }
}

fn encode_dynamic(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::Bytes(data) => {
            out.extend_from_slice(&uint_word(U256::from(data.len())));
            out.extend_from_slice(data);
            out.resize(out.len() + padded_len(data.len()) - data.len(), 0);
        }
        Token::AddressArray(items) => {
            out.extend_from_slice(&uint_word(U256::from(items.len())));
            for a in items {
                out.extend_from_slice(&address_word(*a));
            }
        }
        Token::Address(_) | Token::Uint(_) | Token::Word(_) => {
            unreachable!("static token in dynamic slot")
        }
    }
}
