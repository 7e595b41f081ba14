//! Wallet transactions and their signing hash
//!
//! The challenge every signer authenticates is the EIP-712 hash of the
//! transaction, bound to the chain and to the vault address:
//!
//! ```text
//! domainSeparator = keccak256(abi.encode(DOMAIN_TYPEHASH, chainId, vault))
//! structHash      = keccak256(abi.encode(SAFE_TX_TYPEHASH, to, value, keccak256(data), ...))
//! challenge       = keccak256(0x19 ‖ 0x01 ‖ domainSeparator ‖ structHash)
//! ```

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::address::abi::{self, Token};

/// `EIP712Domain(uint256 chainId,address verifyingContract)`
pub const DOMAIN_TYPE: &str = "EIP712Domain(uint256 chainId,address verifyingContract)";

pub const SAFE_TX_TYPE: &str = "SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)";

pub const EXEC_TRANSACTION_SIGNATURE: &str =
    "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)";

/// Read-only `nonce()` on the wallet
pub const NONCE_SIGNATURE: &str = "nonce()";

/// Nonce of a freshly deployed wallet
pub const INITIAL_WALLET_NONCE: U256 = U256::ZERO;

/// Call type executed by the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Call,
    DelegateCall,
}

impl Operation {
    pub fn as_u8(self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

/// A transaction executed by a vault once enough members have signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeTransaction {
    pub to: Address,
    pub value: U256,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub safe_tx_gas: U256,
    #[serde(default)]
    pub base_gas: U256,
    #[serde(default)]
    pub gas_price: U256,
    #[serde(default)]
    pub gas_token: Address,
    #[serde(default)]
    pub refund_receiver: Address,
    pub nonce: U256,
}

impl SafeTransaction {
    /// Plain value transfer with no refund logic
    pub fn transfer(to: Address, value: U256, nonce: U256) -> Self {
        Self::call(to, value, Bytes::new(), nonce)
    }

    /// Contract call with no refund logic
    pub fn call(to: Address, value: U256, data: Bytes, nonce: U256) -> Self {
        Self {
            to,
            value,
            data,
            operation: Operation::Call,
            safe_tx_gas: U256::ZERO,
            base_gas: U256::ZERO,
            gas_price: U256::ZERO,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    pub fn struct_hash(&self) -> B256 {
        keccak256(abi::encode(&[
            Token::Word(keccak256(SAFE_TX_TYPE.as_bytes())),
            Token::Address(self.to),
            Token::Uint(self.value),
            Token::Word(keccak256(&self.data)),
            Token::Uint(U256::from(self.operation.as_u8())),
            Token::Uint(self.safe_tx_gas),
            Token::Uint(self.base_gas),
            Token::Uint(self.gas_price),
            Token::Address(self.gas_token),
            Token::Address(self.refund_receiver),
            Token::Uint(self.nonce),
        ]))
    }

    /// The exact 32 bytes each signer must authenticate
    pub fn signing_hash(&self, chain_id: u64, vault: Address) -> B256 {
        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(domain_separator(chain_id, vault).as_slice());
        preimage.extend_from_slice(self.struct_hash().as_slice());
        keccak256(preimage)
    }

    /// `execTransaction` calldata carrying the packed signatures
    pub fn exec_calldata(&self, signatures: &[u8]) -> Vec<u8> {
        abi::encode_call(
            EXEC_TRANSACTION_SIGNATURE,
            &[
                Token::Address(self.to),
                Token::Uint(self.value),
                Token::Bytes(self.data.to_vec()),
                Token::Uint(U256::from(self.operation.as_u8())),
                Token::Uint(self.safe_tx_gas),
                Token::Uint(self.base_gas),
                Token::Uint(self.gas_price),
                Token::Address(self.gas_token),
                Token::Address(self.refund_receiver),
                Token::Bytes(signatures.to_vec()),
            ],
        )
    }
}

pub fn domain_separator(chain_id: u64, vault: Address) -> B256 {
    keccak256(abi::encode(&[
        Token::Word(keccak256(DOMAIN_TYPE.as_bytes())),
        Token::Uint(U256::from(chain_id)),
        Token::Address(vault),
    ]))
}

/// Calldata for the wallet's `nonce()` getter
pub fn nonce_calldata() -> Vec<u8> {
    abi::selector(NONCE_SIGNATURE).to_vec()
}
