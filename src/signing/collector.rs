//! Threshold signature collection
//!
//! A [`PendingTransaction`] accumulates signatures until the vault threshold
//! is met. Only then does it yield a [`SignedTransaction`], the one type the
//! chain writer accepts. Members may sign at different times and from
//! different processes; a single-signer vault just completes on the first
//! signature.
//!
//! Every entry is checked against the member's registered credential kind:
//! ECDSA entries must recover to the member, passkey entries are accepted
//! only as an assertion that verifies against this transaction's challenge.

use std::collections::BTreeMap;

use alloy_primitives::{keccak256, Address, Bytes, B256};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::ledger::{CredentialRef, PasskeyCredential, Vault};

use super::passkey::{Ceremony, SignatureAssembled, SigningRequest};
use super::signature::{encode_signatures, AssembledSignature};
use super::signer::{LegacySigner, SignatureOutcome, VaultSigner};
use super::transaction::SafeTransaction;
use super::webauthn::{self, Assertion};

/// A vault transaction waiting for signatures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: Uuid,
    pub vault_id: Address,
    pub chain_id: u64,
    pub threshold: u32,
    pub members: Vec<Address>,
    /// How each member signs
    pub credentials: BTreeMap<Address, CredentialRef>,
    pub transaction: SafeTransaction,
    pub challenge: B256,
    pub signatures: BTreeMap<Address, AssembledSignature>,
    pub created_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(vault: &Vault, chain_id: u64, transaction: SafeTransaction) -> Self {
        let request = SigningRequest::new(vault.vault_id, chain_id, transaction);
        Self {
            id: Uuid::new_v4(),
            vault_id: vault.vault_id,
            chain_id,
            threshold: vault.threshold,
            members: vault.signer_ids(),
            credentials: vault
                .signers
                .iter()
                .map(|s| (s.signer_id, s.credential.clone()))
                .collect(),
            challenge: request.challenge(),
            transaction: request.transaction,
            signatures: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn request(&self) -> SigningRequest {
        SigningRequest::new(self.vault_id, self.chain_id, self.transaction.clone())
    }

    pub fn collected(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.collected() >= self.threshold as usize
    }

    /// Members who have not signed yet
    pub fn outstanding(&self) -> Vec<Address> {
        self.members
            .iter()
            .filter(|m| !self.signatures.contains_key(*m))
            .copied()
            .collect()
    }

    /// Credential of a member that has not signed yet
    fn unsigned_member(&self, signer: Address) -> Result<&CredentialRef> {
        let credential = self.credentials.get(&signer).ok_or_else(|| Error::NotAMember {
            signer: signer.to_string(),
            vault: self.vault_id.to_string(),
        })?;
        if self.signatures.contains_key(&signer) {
            return Err(Error::DuplicateSigner(signer.to_string()));
        }
        Ok(credential)
    }

    /// Accept one key member's ECDSA signature; returns how many are now collected
    ///
    /// Passkey members go through [`add_assertion`](Self::add_assertion).
    pub fn add_signature(&mut self, signature: AssembledSignature) -> Result<usize> {
        let signer = signature.signer();
        let credential = self.unsigned_member(signer)?;

        match (&signature, credential) {
            (AssembledSignature::Ecdsa { bytes, .. }, CredentialRef::RawKey | CredentialRef::Legacy) => {
                check_ecdsa_signer(&self.challenge, signer, bytes)?;
            }
            (AssembledSignature::Ecdsa { .. }, CredentialRef::Passkey { .. }) => {
                return Err(Error::InvalidAssertion(format!(
                    "{} signs with a passkey, not an ECDSA key",
                    signer
                )));
            }
            (AssembledSignature::Contract { .. }, _) => {
                return Err(Error::InvalidAssertion(format!(
                    "contract signature for {} without a verified assertion",
                    signer
                )));
            }
        }

        self.signatures.insert(signer, signature);
        Ok(self.collected())
    }

    /// Verify a passkey assertion against this transaction and accept it
    ///
    /// `credential` must be the registered credential of a passkey member.
    /// The assertion must embed this transaction's challenge and verify
    /// against the credential's public key.
    pub fn add_assertion(&mut self, credential: &PasskeyCredential, assertion: &Assertion) -> Result<usize> {
        let signer = credential.signer_id;
        match self.unsigned_member(signer)? {
            CredentialRef::Passkey { credential_id }
                if *credential_id == credential.credential_id
                    && assertion.credential_id == credential.credential_id => {}
            _ => {
                return Err(Error::InvalidAssertion(format!(
                    "{} is not registered with credential {}",
                    signer, assertion.credential_id
                )))
            }
        }

        let data = webauthn::assemble(signer, assertion, &self.challenge, &credential.public_key)?;
        self.signatures
            .insert(signer, AssembledSignature::Contract { signer, data });
        Ok(self.collected())
    }

    /// Accept the output of a completed passkey ceremony
    pub fn add_ceremony(&mut self, ceremony: &Ceremony<SignatureAssembled>) -> Result<usize> {
        self.add_assertion(ceremony.credential(), ceremony.assertion()?)
    }

    /// Pack signatures once the threshold is met
    pub fn finalize(&self) -> Result<SignedTransaction> {
        if !self.is_complete() {
            return Err(Error::ThresholdNotMet {
                collected: self.collected(),
                threshold: self.threshold,
            });
        }

        let entries: Vec<AssembledSignature> = self.signatures.values().cloned().collect();
        let signatures = encode_signatures(&entries)?;
        let calldata = self.transaction.exec_calldata(&signatures);

        Ok(SignedTransaction {
            vault_id: self.vault_id,
            chain_id: self.chain_id,
            challenge: self.challenge,
            transaction: self.transaction.clone(),
            signatures: Bytes::from(signatures),
            calldata: Bytes::from(calldata),
        })
    }
}

/// Recover an ECDSA entry and make sure it belongs to `signer`
fn check_ecdsa_signer(challenge: &B256, signer: Address, bytes: &[u8]) -> Result<()> {
    let invalid = || Error::InvalidAssertion(format!("ECDSA signature does not belong to {}", signer));
    if bytes.len() != 65 {
        return Err(Error::Encoding(format!("ECDSA signature is {} bytes", bytes.len())));
    }

    let (hash, v) = match bytes[64] {
        27 | 28 => (*challenge, bytes[64] - 27),
        31 | 32 => (LegacySigner::prefixed_hash(challenge), bytes[64] - 31),
        other => return Err(Error::Encoding(format!("unsupported v value {}", other))),
    };

    let signature = Signature::from_slice(&bytes[..64]).map_err(|_| invalid())?;
    let recovery_id = RecoveryId::from_byte(v).ok_or_else(invalid)?;
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
        .map_err(|_| invalid())?;
    let point = key.to_encoded_point(false);
    let recovered = Address::from_slice(&keccak256(&point.as_bytes()[1..])[12..]);

    if recovered != signer {
        error!(signer = %signer, recovered = %recovered, "Signature recovered to a different address");
        return Err(invalid());
    }
    Ok(())
}

/// A transaction carrying enough signatures to execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub vault_id: Address,
    pub chain_id: u64,
    pub challenge: B256,
    pub transaction: SafeTransaction,
    pub signatures: Bytes,
    /// `execTransaction` calldata, sent to the vault address
    pub calldata: Bytes,
}

/// In-flight transactions keyed by challenge
#[derive(Debug, Default)]
pub struct SignatureCollector {
    pending: DashMap<B256, PendingTransaction>,
}

impl SignatureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting for `transaction`; reopening returns the same challenge
    pub fn open(&self, vault: &Vault, chain_id: u64, transaction: SafeTransaction) -> B256 {
        let pending = PendingTransaction::new(vault, chain_id, transaction);
        let challenge = pending.challenge;
        self.pending.entry(challenge).or_insert_with(|| {
            info!(
                vault = %vault.vault_id,
                chain_id,
                threshold = vault.threshold,
                challenge = %challenge,
                "Opened pending transaction"
            );
            pending
        });
        challenge
    }

    pub fn get(&self, challenge: &B256) -> Option<PendingTransaction> {
        self.pending.get(challenge).map(|p| p.value().clone())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn update<F>(&self, challenge: &B256, add: F) -> Result<usize>
    where
        F: FnOnce(&mut PendingTransaction) -> Result<usize>,
    {
        let mut pending = self
            .pending
            .get_mut(challenge)
            .ok_or_else(|| Error::Internal(format!("no pending transaction {}", challenge)))?;
        let collected = add(pending.value_mut())?;
        info!(
            challenge = %challenge,
            collected,
            threshold = pending.threshold,
            "Signature collected"
        );
        Ok(collected)
    }

    /// Add a key member's signature; returns how many are now collected
    pub fn add_signature(&self, challenge: &B256, signature: AssembledSignature) -> Result<usize> {
        self.update(challenge, |p| p.add_signature(signature))
    }

    /// Add a passkey member's assertion, verified against the pending challenge
    pub fn add_assertion(
        &self,
        challenge: &B256,
        credential: &PasskeyCredential,
        assertion: &Assertion,
    ) -> Result<usize> {
        self.update(challenge, |p| p.add_assertion(credential, assertion))
    }

    pub fn add_ceremony(&self, challenge: &B256, ceremony: &Ceremony<SignatureAssembled>) -> Result<usize> {
        self.update(challenge, |p| p.add_ceremony(ceremony))
    }

    /// Remove a completed transaction and return it ready to broadcast
    pub fn take_ready(&self, challenge: &B256) -> Result<SignedTransaction> {
        let signed = self
            .pending
            .get(challenge)
            .ok_or_else(|| Error::Internal(format!("no pending transaction {}", challenge)))?
            .finalize()?;
        self.pending.remove(challenge);
        Ok(signed)
    }

    pub fn discard(&self, challenge: &B256) -> bool {
        self.pending.remove(challenge).is_some()
    }

    /// Ask each available signer in turn until the threshold is met
    ///
    /// Signers that are not vault members are skipped. A cancelled passkey
    /// prompt stops collection with [`Error::UserCancelled`]. Whenever
    /// collection fails the pending transaction is discarded, so a new
    /// attempt starts from scratch.
    pub async fn collect(
        &self,
        vault: &Vault,
        chain_id: u64,
        transaction: SafeTransaction,
        signers: &[VaultSigner],
        cancel: &CancellationToken,
    ) -> Result<SignedTransaction> {
        let challenge = self.open(vault, chain_id, transaction);
        let result = match self.gather(&challenge, vault, signers, cancel).await {
            Ok(()) => self.take_ready(&challenge),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if self.discard(&challenge) {
                warn!(challenge = %challenge, vault = %vault.vault_id, "Discarded pending transaction: {}", e);
            }
        }
        result
    }

    async fn gather(
        &self,
        challenge: &B256,
        vault: &Vault,
        signers: &[VaultSigner],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let challenge = *challenge;
        let request = self
            .get(&challenge)
            .map(|p| p.request())
            .ok_or_else(|| Error::Internal("pending transaction vanished".to_string()))?;

        for signer in signers {
            let pending = self
                .get(&challenge)
                .ok_or_else(|| Error::Internal("pending transaction vanished".to_string()))?;
            if pending.is_complete() {
                break;
            }

            let id = signer.signer_id();
            if !vault.is_member(&id) {
                warn!(signer = %id, vault = %vault.vault_id, "Skipping non-member signer");
                continue;
            }
            if pending.signatures.contains_key(&id) {
                continue;
            }

            match signer.produce_signature(&request, cancel).await? {
                SignatureOutcome::Signed(signature) => {
                    self.add_signature(&challenge, signature)?;
                }
                SignatureOutcome::Assembled(ceremony) => {
                    self.add_ceremony(&challenge, &ceremony)?;
                }
                SignatureOutcome::Cancelled => return Err(Error::UserCancelled),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CredentialRef, Signer};
    use crate::signing::passkey::tests::{Behaviour, MockAuthenticator};
    use crate::signing::passkey::PasskeySigner;
    use crate::signing::signer::RawKeySigner;
    use crate::signing::transaction::INITIAL_WALLET_NONCE;
    use crate::signing::webauthn::tests::sign_assertion;
    use std::sync::Arc;
    use alloy_primitives::U256;
    use std::time::Duration;

    fn vault_for(ids: &[Address], threshold: u32) -> Vault {
        let mut ids = ids.to_vec();
        ids.sort();
        Vault {
            vault_id: Address::repeat_byte(0x11),
            chain_id: 1,
            threshold,
            signers: ids
                .iter()
                .map(|id| Signer {
                    signer_id: *id,
                    owner_user_id: "user".to_string(),
                    credential: CredentialRef::RawKey,
                })
                .collect(),
            is_deployed: true,
            salt_nonce: U256::from(1u64),
            created_by: ids[0],
            created_at: Utc::now(),
            deployed_at: None,
        }
    }

    const PASSKEY_MEMBER: Address = Address::repeat_byte(0x33);

    /// Vault where `PASSKEY_MEMBER` signs with the mock authenticator's credential
    fn vault_with_passkey(keys: &[Address], threshold: u32) -> Vault {
        let mut ids = keys.to_vec();
        ids.push(PASSKEY_MEMBER);
        let mut vault = vault_for(&ids, threshold);
        for signer in vault.signers.iter_mut().filter(|s| s.signer_id == PASSKEY_MEMBER) {
            signer.credential = CredentialRef::Passkey {
                credential_id: "cred-1".to_string(),
            };
        }
        vault
    }

    fn transfer() -> SafeTransaction {
        SafeTransaction::transfer(Address::repeat_byte(0x22), U256::from(10u64), INITIAL_WALLET_NONCE)
    }

    #[test]
    fn test_threshold_gates_finalize() {
        let a = RawKeySigner::random();
        let b = RawKeySigner::random();
        let vault = vault_for(&[a.address(), b.address()], 2);
        let mut pending = PendingTransaction::new(&vault, 1, transfer());

        pending.add_signature(a.sign(&pending.challenge).unwrap()).unwrap();
        assert!(matches!(
            pending.finalize(),
            Err(Error::ThresholdNotMet { collected: 1, threshold: 2 })
        ));
        assert_eq!(pending.outstanding(), vec![b.address()]);

        pending.add_signature(b.sign(&pending.challenge).unwrap()).unwrap();
        let signed = pending.finalize().unwrap();
        assert_eq!(signed.signatures.len(), 130);
        assert_eq!(&signed.calldata[..4], &crate::address::abi::selector(
            crate::signing::transaction::EXEC_TRANSACTION_SIGNATURE
        ));
    }

    #[test]
    fn test_rejects_non_member_and_double_signing() {
        let a = RawKeySigner::random();
        let outsider = RawKeySigner::random();
        let vault = vault_for(&[a.address()], 1);
        let mut pending = PendingTransaction::new(&vault, 1, transfer());

        assert!(matches!(
            pending.add_signature(outsider.sign(&pending.challenge).unwrap()),
            Err(Error::NotAMember { .. })
        ));

        pending.add_signature(a.sign(&pending.challenge).unwrap()).unwrap();
        assert!(matches!(
            pending.add_signature(a.sign(&pending.challenge).unwrap()),
            Err(Error::DuplicateSigner(_))
        ));
    }

    #[test]
    fn test_rejects_signature_over_other_transaction() {
        let a = RawKeySigner::random();
        let vault = vault_for(&[a.address()], 1);
        let mut pending = PendingTransaction::new(&vault, 1, transfer());

        let wrong = a.sign(&B256::repeat_byte(0x77)).unwrap();
        assert!(matches!(
            pending.add_signature(wrong),
            Err(Error::InvalidAssertion(_))
        ));
    }

    #[test]
    fn test_passkey_assertion_verified_against_challenge() {
        let auth = MockAuthenticator::new(Behaviour::Sign);
        let credential = auth.credential(PASSKEY_MEMBER);
        let vault = vault_with_passkey(&[], 1);
        let mut pending = PendingTransaction::new(&vault, 1, transfer());

        let stale = sign_assertion(&auth.key, "cred-1", &B256::repeat_byte(0x77));
        assert!(matches!(
            pending.add_assertion(&credential, &stale),
            Err(Error::ChallengeMismatch)
        ));
        assert_eq!(pending.collected(), 0);

        let fresh = sign_assertion(&auth.key, "cred-1", &pending.challenge);
        assert_eq!(pending.add_assertion(&credential, &fresh).unwrap(), 1);
        assert!(pending.signatures[&PASSKEY_MEMBER].is_contract());
        assert!(pending.finalize().is_ok());
    }

    #[test]
    fn test_rejects_unverified_contract_entry() {
        let vault = vault_with_passkey(&[], 1);
        let mut pending = PendingTransaction::new(&vault, 1, transfer());

        let forged = AssembledSignature::Contract {
            signer: PASSKEY_MEMBER,
            data: vec![0u8; 10],
        };
        assert!(matches!(
            pending.add_signature(forged),
            Err(Error::InvalidAssertion(_))
        ));
        assert!(pending.signatures.is_empty());
    }

    #[test]
    fn test_rejects_passkey_entry_for_key_member() {
        let a = RawKeySigner::random();
        let vault = vault_for(&[a.address()], 1);
        let mut pending = PendingTransaction::new(&vault, 1, transfer());

        // a valid assertion, but the member is registered as a raw key
        let auth = MockAuthenticator::new(Behaviour::Sign);
        let credential = auth.credential(a.address());
        let assertion = sign_assertion(&auth.key, "cred-1", &pending.challenge);
        assert!(matches!(
            pending.add_assertion(&credential, &assertion),
            Err(Error::InvalidAssertion(_))
        ));

        let contract = AssembledSignature::Contract {
            signer: a.address(),
            data: vec![1u8; 64],
        };
        assert!(matches!(
            pending.add_signature(contract),
            Err(Error::InvalidAssertion(_))
        ));
        assert!(pending.signatures.is_empty());
    }

    #[test]
    fn test_collector_open_is_idempotent() {
        let a = RawKeySigner::random();
        let vault = vault_for(&[a.address()], 1);
        let collector = SignatureCollector::new();

        let first = collector.open(&vault, 1, transfer());
        collector.add_signature(&first, a.sign(&first).unwrap()).unwrap();
        let second = collector.open(&vault, 1, transfer());

        assert_eq!(first, second);
        assert_eq!(collector.len(), 1);
        assert_eq!(collector.get(&first).unwrap().collected(), 1);

        collector.take_ready(&first).unwrap();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_collect_mixed_signers() {
        let raw = RawKeySigner::random();
        let auth = Arc::new(MockAuthenticator::new(Behaviour::Sign));
        let passkey = PasskeySigner::new(auth.credential(PASSKEY_MEMBER), auth.clone(), Duration::from_secs(30));

        let vault = vault_with_passkey(&[raw.address()], 2);
        let collector = SignatureCollector::new();
        let signers = vec![VaultSigner::RawKey(raw.clone()), VaultSigner::Passkey(passkey)];

        let signed = collector
            .collect(&vault, 1, transfer(), &signers, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(signed.vault_id, vault.vault_id);
        assert!(signed.signatures.len() > 130);
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_collection_is_discarded() {
        let raw = RawKeySigner::random();
        let auth = Arc::new(MockAuthenticator::new(Behaviour::Dismiss));
        let passkey = PasskeySigner::new(auth.credential(PASSKEY_MEMBER), auth.clone(), Duration::from_secs(30));

        let vault = vault_with_passkey(&[raw.address()], 2);
        let collector = SignatureCollector::new();
        let signers = vec![VaultSigner::RawKey(raw), VaultSigner::Passkey(passkey)];

        let result = collector
            .collect(&vault, 1, transfer(), &signers, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::UserCancelled)));
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_short_collection_is_discarded() {
        let a = RawKeySigner::random();
        let b = RawKeySigner::random();
        let vault = vault_for(&[a.address(), b.address()], 2);
        let collector = SignatureCollector::new();

        let result = collector
            .collect(&vault, 1, transfer(), &[VaultSigner::RawKey(a)], &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(Error::ThresholdNotMet { collected: 1, threshold: 2 })
        ));
        assert!(collector.is_empty());
    }
}
