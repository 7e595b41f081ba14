//! Passkey signing ceremony
//!
//! One signing attempt is a typed state machine:
//!
//! ```text
//! Idle → ChallengeIssued → AssertionRequested → AssertionReceived → SignatureAssembled → Broadcast
//!                                  │                    │                    │
//!                                  └────────────────────┴──► Aborted ◄───────┘
//! ```
//!
//! Every transition consumes the ceremony. An aborted attempt cannot be
//! resumed or retried; a new prompt needs a new [`Ceremony`] and therefore
//! an explicit new request from the user.
//!
//! The authenticator counter from each assertion is checked against the
//! registered value, and [`PasskeySigner`] records it in the ledger when one
//! is attached.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::{ChainWriter, OutboundCall};
use crate::error::{Error, Result};
use crate::ledger::{MembershipLedger, PasskeyCredential, Vault};

use super::collector::{PendingTransaction, SignedTransaction};
use super::signature::AssembledSignature;
use super::transaction::SafeTransaction;
use super::webauthn::{self, Assertion};

/// Lower bound on the authenticator prompt timeout
pub const MIN_ASSERTION_TIMEOUT: Duration = Duration::from_secs(10);

/// The WebAuthn prompt, outside this crate
#[async_trait]
pub trait WebAuthnAuthenticator: Send + Sync {
    /// Prompt the user to sign `challenge` with one of `allowed_credentials`
    ///
    /// `Ok(None)` means the user dismissed the prompt; `Err` means no
    /// authenticator could be reached.
    async fn request_assertion(
        &self,
        challenge: B256,
        allowed_credentials: &[String],
        timeout: Duration,
    ) -> Result<Option<Assertion>>;
}

/// A transaction a vault member is asked to approve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub vault: Address,
    pub chain_id: u64,
    pub transaction: SafeTransaction,
}

impl SigningRequest {
    pub fn new(vault: Address, chain_id: u64, transaction: SafeTransaction) -> Self {
        Self {
            vault,
            chain_id,
            transaction,
        }
    }

    /// The bytes the signer must authenticate
    pub fn challenge(&self) -> B256 {
        self.transaction.signing_hash(self.chain_id, self.vault)
    }
}

/// Observable ceremony states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    Idle,
    ChallengeIssued,
    AssertionRequested,
    AssertionReceived,
    SignatureAssembled,
    Broadcast,
    Aborted,
}

impl std::fmt::Display for CeremonyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CeremonyState::Idle => "idle",
            CeremonyState::ChallengeIssued => "challenge_issued",
            CeremonyState::AssertionRequested => "assertion_requested",
            CeremonyState::AssertionReceived => "assertion_received",
            CeremonyState::SignatureAssembled => "signature_assembled",
            CeremonyState::Broadcast => "broadcast",
            CeremonyState::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

pub trait Stage: sealed::Sealed {
    const STATE: CeremonyState;
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! stage {
    ($name:ident, $state:ident) => {
        #[derive(Debug)]
        pub struct $name;
        impl sealed::Sealed for $name {}
        impl Stage for $name {
            const STATE: CeremonyState = CeremonyState::$state;
        }
    };
}

stage!(Idle, Idle);
stage!(ChallengeIssued, ChallengeIssued);
stage!(AssertionRequested, AssertionRequested);
stage!(AssertionReceived, AssertionReceived);
stage!(SignatureAssembled, SignatureAssembled);
stage!(Broadcast, Broadcast);
stage!(Aborted, Aborted);

/// One signing attempt for one passkey credential
#[derive(Debug)]
pub struct Ceremony<S: Stage> {
    id: Uuid,
    request: SigningRequest,
    credential: PasskeyCredential,
    challenge: Option<B256>,
    assertion: Option<Assertion>,
    signature: Option<AssembledSignature>,
    tx_hash: Option<B256>,
    _stage: PhantomData<S>,
}

impl<S: Stage> Ceremony<S> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CeremonyState {
        S::STATE
    }

    pub fn request(&self) -> &SigningRequest {
        &self.request
    }

    pub fn credential(&self) -> &PasskeyCredential {
        &self.credential
    }

    fn advance<T: Stage>(self) -> Ceremony<T> {
        debug!(ceremony = %self.id, from = %S::STATE, to = %T::STATE, "Passkey ceremony transition");
        Ceremony {
            id: self.id,
            request: self.request,
            credential: self.credential,
            challenge: self.challenge,
            assertion: self.assertion,
            signature: self.signature,
            tx_hash: self.tx_hash,
            _stage: PhantomData,
        }
    }

    /// Terminal failure; the ceremony is dropped in the `Aborted` state
    fn abort(self, error: Error) -> Error {
        let from = S::STATE;
        let aborted: Ceremony<Aborted> = self.advance();
        warn!(
            ceremony = %aborted.id,
            from = %from,
            state = %aborted.state(),
            "Passkey ceremony aborted: {}",
            error
        );
        error
    }

    fn issued_challenge(&self) -> Result<B256> {
        self.challenge
            .ok_or_else(|| Error::Internal("ceremony has no challenge".to_string()))
    }
}

impl Ceremony<Idle> {
    pub fn new(request: SigningRequest, credential: PasskeyCredential) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            credential,
            challenge: None,
            assertion: None,
            signature: None,
            tx_hash: None,
            _stage: PhantomData,
        }
    }

    /// Compute the challenge from the transaction
    pub fn issue_challenge(mut self) -> Ceremony<ChallengeIssued> {
        self.challenge = Some(self.request.challenge());
        self.advance()
    }
}

impl Ceremony<ChallengeIssued> {
    pub fn challenge(&self) -> Result<B256> {
        self.issued_challenge()
    }

    /// Hand the challenge to the authenticator
    pub fn request_assertion(self) -> Ceremony<AssertionRequested> {
        info!(
            ceremony = %self.id,
            vault = %self.request.vault,
            signer = %self.credential.signer_id,
            "Requesting passkey assertion"
        );
        self.advance()
    }
}

impl Ceremony<AssertionRequested> {
    /// Wait for the user, bounded by `timeout` and `cancel`
    ///
    /// A dismissed prompt or a cancelled token is [`Error::UserCancelled`];
    /// an unreachable authenticator or an expired timeout is
    /// [`Error::AuthenticatorUnavailable`]. Neither is retried here.
    pub async fn await_assertion(
        mut self,
        authenticator: &dyn WebAuthnAuthenticator,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Ceremony<AssertionReceived>> {
        let challenge = self.issued_challenge()?;
        let allowed = vec![self.credential.credential_id.clone()];

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(self.abort(Error::UserCancelled)),
            outcome = tokio::time::timeout(
                timeout,
                authenticator.request_assertion(challenge, &allowed, timeout),
            ) => outcome,
        };

        let assertion = match outcome {
            Err(_) => {
                return Err(self.abort(Error::AuthenticatorUnavailable(format!(
                    "no response within {}s",
                    timeout.as_secs()
                ))))
            }
            Ok(Err(e)) => {
                let error = match e {
                    Error::UserCancelled => Error::UserCancelled,
                    other => Error::AuthenticatorUnavailable(other.to_string()),
                };
                return Err(self.abort(error));
            }
            Ok(Ok(None)) => return Err(self.abort(Error::UserCancelled)),
            Ok(Ok(Some(assertion))) => assertion,
        };

        if assertion.credential_id != self.credential.credential_id {
            let error = Error::InvalidAssertion(format!(
                "assertion from unexpected credential {}",
                assertion.credential_id
            ));
            return Err(self.abort(error));
        }

        self.assertion = Some(assertion);
        Ok(self.advance())
    }
}

impl Ceremony<AssertionReceived> {
    /// Check the challenge binding, verify and encode
    pub fn assemble(mut self) -> Result<Ceremony<SignatureAssembled>> {
        let challenge = self.issued_challenge()?;
        let Some(assertion) = self.assertion.as_ref() else {
            return Err(Error::Internal("ceremony has no assertion".to_string()));
        };

        let signer = self.credential.signer_id;
        let assembled = webauthn::assemble(signer, assertion, &challenge, &self.credential.public_key)
            .and_then(|data| {
                check_counter(self.credential.counter, assertion.sign_count())?;
                Ok(data)
            });
        match assembled {
            Ok(data) => {
                self.signature = Some(AssembledSignature::Contract { signer, data });
                Ok(self.advance())
            }
            Err(e) => Err(self.abort(e)),
        }
    }
}

/// A counting authenticator must report more than the registered counter
fn check_counter(registered: u32, reported: Option<u32>) -> Result<()> {
    match reported {
        Some(count) if count != 0 && registered != 0 && count <= registered => {
            Err(Error::InvalidAssertion(format!(
                "authenticator counter went from {} to {}",
                registered, count
            )))
        }
        _ => Ok(()),
    }
}

impl Ceremony<SignatureAssembled> {
    /// Authenticator counter reported with the assertion
    pub fn sign_count(&self) -> Option<u32> {
        self.assertion.as_ref().and_then(Assertion::sign_count)
    }

    pub fn challenge(&self) -> Result<B256> {
        self.issued_challenge()
    }

    /// The verified assertion this signature was assembled from
    pub fn assertion(&self) -> Result<&Assertion> {
        self.assertion
            .as_ref()
            .ok_or_else(|| Error::Internal("ceremony has no assertion".to_string()))
    }

    pub fn into_signature(self) -> Result<AssembledSignature> {
        self.signature
            .ok_or_else(|| Error::Internal("ceremony has no signature".to_string()))
    }

    /// Submit the threshold-satisfied transaction this signature belongs to
    ///
    /// `signed` must carry the challenge this ceremony signed. A writer
    /// failure aborts the ceremony.
    pub async fn broadcast(
        mut self,
        signed: &SignedTransaction,
        writer: &dyn ChainWriter,
    ) -> Result<Ceremony<Broadcast>> {
        let challenge = self.issued_challenge()?;
        if signed.challenge != challenge {
            return Err(self.abort(Error::ChallengeMismatch));
        }

        match writer.broadcast(signed.chain_id, &OutboundCall::from(signed)).await {
            Ok(hash) => {
                info!(ceremony = %self.id, chain_id = signed.chain_id, tx = %hash, "Passkey transaction broadcast");
                self.tx_hash = Some(hash);
                Ok(self.advance())
            }
            Err(e) => Err(self.abort(e)),
        }
    }
}

impl Ceremony<Broadcast> {
    pub fn tx_hash(&self) -> Result<B256> {
        self.tx_hash
            .ok_or_else(|| Error::Internal("ceremony has no transaction hash".to_string()))
    }
}

/// Runs full ceremonies for one registered passkey
#[derive(Clone)]
pub struct PasskeySigner {
    credential: PasskeyCredential,
    authenticator: Arc<dyn WebAuthnAuthenticator>,
    timeout: Duration,
    ledger: Option<Arc<MembershipLedger>>,
}

impl std::fmt::Debug for PasskeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasskeySigner")
            .field("signer_id", &self.credential.signer_id)
            .field("credential_id", &self.credential.credential_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PasskeySigner {
    pub fn new(
        credential: PasskeyCredential,
        authenticator: Arc<dyn WebAuthnAuthenticator>,
        timeout: Duration,
    ) -> Self {
        Self {
            credential,
            authenticator,
            timeout: timeout.max(MIN_ASSERTION_TIMEOUT),
            ledger: None,
        }
    }

    /// Record authenticator counters in `ledger` after each assertion
    pub fn with_ledger(mut self, ledger: Arc<MembershipLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn signer_id(&self) -> Address {
        self.credential.signer_id
    }

    pub fn credential(&self) -> &PasskeyCredential {
        &self.credential
    }

    /// Run one ceremony to completion
    pub async fn sign(
        &self,
        request: &SigningRequest,
        cancel: &CancellationToken,
    ) -> Result<Ceremony<SignatureAssembled>> {
        let ceremony = Ceremony::new(request.clone(), self.credential.clone())
            .issue_challenge()
            .request_assertion()
            .await_assertion(self.authenticator.as_ref(), self.timeout, cancel)
            .await?
            .assemble()?;

        if let (Some(ledger), Some(count)) = (&self.ledger, ceremony.sign_count()) {
            if let Err(e) = ledger
                .record_passkey_counter(&self.credential.credential_id, count)
                .await
            {
                return Err(ceremony.abort(e));
            }
            debug!(ceremony = %ceremony.id, count, "Recorded authenticator counter");
        }

        Ok(ceremony)
    }

    /// Sign and broadcast for a vault this passkey can satisfy alone
    ///
    /// Vaults needing more than one signature go through the
    /// [`SignatureCollector`](super::SignatureCollector) instead; here they
    /// abort with [`Error::ThresholdNotMet`] before anything is sent.
    pub async fn execute(
        &self,
        vault: &Vault,
        chain_id: u64,
        transaction: SafeTransaction,
        writer: &dyn ChainWriter,
        cancel: &CancellationToken,
    ) -> Result<Ceremony<Broadcast>> {
        let mut pending = PendingTransaction::new(vault, chain_id, transaction);
        let ceremony = self.sign(&pending.request(), cancel).await?;

        let signed = match pending.add_ceremony(&ceremony).and_then(|_| pending.finalize()) {
            Ok(signed) => signed,
            Err(e) => return Err(ceremony.abort(e)),
        };
        ceremony.broadcast(&signed, writer).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::tests::MockChain;
    use crate::ledger::membership::tests::ledger_with_signers;
    use crate::ledger::PasskeyPublicKey;
    use crate::signing::webauthn::tests::sign_assertion;
    use alloy_primitives::U256;
    use chrono::Utc;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) enum Behaviour {
        Sign,
        SignWrongChallenge,
        Dismiss,
        Fail,
        Hang,
    }

    /// Software authenticator holding a P-256 key
    pub(crate) struct MockAuthenticator {
        pub key: SigningKey,
        pub behaviour: Behaviour,
        pub calls: AtomicUsize,
    }

    impl MockAuthenticator {
        pub(crate) fn new(behaviour: Behaviour) -> Self {
            Self {
                key: SigningKey::random(&mut OsRng),
                behaviour,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn credential(&self, signer_id: Address) -> PasskeyCredential {
            PasskeyCredential {
                credential_id: "cred-1".to_string(),
                signer_id,
                public_key: PasskeyPublicKey::from_verifying_key(self.key.verifying_key()).unwrap(),
                counter: 0,
                created_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl WebAuthnAuthenticator for MockAuthenticator {
        async fn request_assertion(
            &self,
            challenge: B256,
            allowed_credentials: &[String],
            _timeout: Duration,
        ) -> Result<Option<Assertion>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let credential_id = &allowed_credentials[0];
            match self.behaviour {
                Behaviour::Sign => Ok(Some(sign_assertion(&self.key, credential_id, &challenge))),
                Behaviour::SignWrongChallenge => {
                    let other = B256::repeat_byte(0x99);
                    Ok(Some(sign_assertion(&self.key, credential_id, &other)))
                }
                Behaviour::Dismiss => Ok(None),
                Behaviour::Fail => Err(Error::AuthenticatorUnavailable("no device".to_string())),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(None)
                }
            }
        }
    }

    pub(crate) fn request() -> SigningRequest {
        SigningRequest::new(
            Address::repeat_byte(0x11),
            8453,
            SafeTransaction::transfer(Address::repeat_byte(0x22), U256::from(1u64), U256::ZERO),
        )
    }

    #[tokio::test]
    async fn test_ceremony_happy_path() {
        let auth = MockAuthenticator::new(Behaviour::Sign);
        let signer = Address::repeat_byte(0x33);
        let ceremony = Ceremony::new(request(), auth.credential(signer));
        assert_eq!(ceremony.state(), CeremonyState::Idle);

        let issued = ceremony.issue_challenge();
        assert_eq!(issued.challenge().unwrap(), request().challenge());

        let requested = issued.request_assertion();
        assert_eq!(requested.state(), CeremonyState::AssertionRequested);

        let received = requested
            .await_assertion(&auth, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        let assembled = received.assemble().unwrap();
        assert_eq!(assembled.state(), CeremonyState::SignatureAssembled);
        assert_eq!(assembled.sign_count(), Some(1));

        let signature = assembled.into_signature().unwrap();
        assert_eq!(signature.signer(), signer);
        assert!(signature.is_contract());
    }

    #[tokio::test]
    async fn test_dismissed_prompt_is_user_cancelled() {
        let auth = Arc::new(MockAuthenticator::new(Behaviour::Dismiss));
        let signer = PasskeySigner::new(auth.credential(Address::repeat_byte(0x33)), auth.clone(), Duration::from_secs(30));

        let result = signer.sign(&request(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::UserCancelled)));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_authenticator_error_is_unavailable() {
        let auth = Arc::new(MockAuthenticator::new(Behaviour::Fail));
        let signer = PasskeySigner::new(auth.credential(Address::repeat_byte(0x33)), auth.clone(), Duration::from_secs(30));

        let result = signer.sign(&request(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::AuthenticatorUnavailable(_))));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_does_not_hang() {
        let auth = MockAuthenticator::new(Behaviour::Hang);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Ceremony::new(request(), auth.credential(Address::repeat_byte(0x33)))
            .issue_challenge()
            .request_assertion()
            .await_assertion(&auth, Duration::from_secs(120), &cancel)
            .await;
        assert!(matches!(result, Err(Error::UserCancelled)));
    }

    #[tokio::test]
    async fn test_timeout_aborts() {
        let auth = MockAuthenticator::new(Behaviour::Hang);
        let result = Ceremony::new(request(), auth.credential(Address::repeat_byte(0x33)))
            .issue_challenge()
            .request_assertion()
            .await_assertion(&auth, Duration::from_millis(50), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::AuthenticatorUnavailable(_))));
    }

    #[tokio::test]
    async fn test_counter_recorded_and_replay_rejected() {
        let auth = Arc::new(MockAuthenticator::new(Behaviour::Sign));
        let signer_id = Address::repeat_byte(0x33);
        let ledger = Arc::new(ledger_with_signers(&[]).await);
        let credential = ledger
            .register_passkey(signer_id, "user", "cred-1", auth.credential(signer_id).public_key, 0)
            .await
            .unwrap();
        let signer = PasskeySigner::new(credential, auth.clone(), Duration::from_secs(30)).with_ledger(ledger.clone());

        signer.sign(&request(), &CancellationToken::new()).await.unwrap();
        let stored = ledger.store().find_passkey("cred-1").await.unwrap().unwrap();
        assert_eq!(stored.counter, 1);

        // the mock authenticator reports 1 again
        let replay = signer.sign(&request(), &CancellationToken::new()).await;
        assert!(matches!(replay, Err(Error::InvalidAssertion(_))));
    }

    #[tokio::test]
    async fn test_stale_counter_aborts_assembly() {
        let auth = MockAuthenticator::new(Behaviour::Sign);
        let mut credential = auth.credential(Address::repeat_byte(0x33));
        credential.counter = 5;

        let received = Ceremony::new(request(), credential)
            .issue_challenge()
            .request_assertion()
            .await_assertion(&auth, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(received.assemble(), Err(Error::InvalidAssertion(_))));
    }

    async fn passkey_vault(threshold: u32) -> (Arc<MockAuthenticator>, PasskeySigner, Vault) {
        let auth = Arc::new(MockAuthenticator::new(Behaviour::Sign));
        let signer_id = Address::repeat_byte(0x33);
        let cosigner = Address::repeat_byte(0x44);
        let ledger = ledger_with_signers(&[cosigner]).await;
        let credential = ledger
            .register_passkey(signer_id, "user", "cred-1", auth.credential(signer_id).public_key, 0)
            .await
            .unwrap();
        let candidates = if threshold > 1 { vec![cosigner] } else { vec![] };
        let vault = ledger.create_vault(&candidates, threshold, signer_id, 1).await.unwrap();
        let signer = PasskeySigner::new(credential, auth.clone(), Duration::from_secs(30));
        (auth, signer, vault)
    }

    fn vault_transfer() -> SafeTransaction {
        SafeTransaction::transfer(Address::repeat_byte(0x22), U256::from(1u64), U256::ZERO)
    }

    #[tokio::test]
    async fn test_execute_broadcasts_single_signer_vault() {
        let (_auth, signer, vault) = passkey_vault(1).await;
        let chain = MockChain::new(&[1]);

        let done = signer
            .execute(&vault, 1, vault_transfer(), &chain, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.state(), CeremonyState::Broadcast);
        assert_eq!(done.tx_hash().unwrap(), B256::with_last_byte(1));

        let sent = chain.broadcasts.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert_eq!(sent[0].1.to(), vault.vault_id);
    }

    #[tokio::test]
    async fn test_execute_below_threshold_sends_nothing() {
        let (auth, signer, vault) = passkey_vault(2).await;
        let chain = MockChain::new(&[1]);

        let result = signer
            .execute(&vault, 1, vault_transfer(), &chain, &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(Error::ThresholdNotMet { collected: 1, threshold: 2 })
        ));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        assert!(chain.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_rejects_other_transaction() {
        let (_auth, signer, vault) = passkey_vault(1).await;
        let chain = MockChain::new(&[1]);

        let mut other = PendingTransaction::new(&vault, 1, vault_transfer());
        let ceremony = signer.sign(&other.request(), &CancellationToken::new()).await.unwrap();
        other.add_ceremony(&ceremony).unwrap();
        let mut signed = other.finalize().unwrap();
        signed.challenge = B256::repeat_byte(0x99);

        let result = ceremony.broadcast(&signed, &chain).await;
        assert!(matches!(result, Err(Error::ChallengeMismatch)));
        assert!(chain.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_challenge_is_rejected() {
        let auth = Arc::new(MockAuthenticator::new(Behaviour::SignWrongChallenge));
        let signer = PasskeySigner::new(auth.credential(Address::repeat_byte(0x33)), auth.clone(), Duration::from_secs(30));

        let result = signer.sign(&request(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::ChallengeMismatch)));
    }
}
