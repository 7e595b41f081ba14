//! WebAuthn assertion checks and re-encoding
//!
//! An assertion is accepted only if its client data embeds exactly the issued
//! challenge and its P-256 signature verifies against the registered key over
//! `authenticatorData ‖ sha256(clientDataJSON)`.

use alloy_primitives::{Address, B256, U256};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::Signature;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::address::abi::{self, Token};
use crate::error::{Error, Result};
use crate::ledger::PasskeyPublicKey;

/// Minimum authenticator data: rpIdHash (32) ‖ flags (1) ‖ signCount (4)
pub const MIN_AUTHENTICATOR_DATA_LEN: usize = 37;

const ASSERTION_TYPE: &str = "webauthn.get";

/// What the authenticator hands back for a challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Base64url credential id that produced the signature
    pub credential_id: String,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: String,
    /// DER-encoded P-256 signature
    pub signature: Vec<u8>,
}

impl Assertion {
    /// Signature counter from the authenticator data
    pub fn sign_count(&self) -> Option<u32> {
        let bytes = self.authenticator_data.get(33..37)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[derive(Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    kind: String,
    challenge: String,
}

/// Base64url (no padding) form of a challenge, as browsers embed it
pub fn encode_challenge(challenge: &B256) -> String {
    URL_SAFE_NO_PAD.encode(challenge.as_slice())
}

/// Canonical client data prefix the wallet verifier reconstructs on chain
pub fn client_data_prefix(challenge: &B256) -> String {
    format!(
        r#"{{"type":"{}","challenge":"{}","#,
        ASSERTION_TYPE,
        encode_challenge(challenge)
    )
}

/// Reject client data that is not bound to `challenge`
pub fn check_challenge(client_data_json: &str, challenge: &B256) -> Result<()> {
    let client_data: ClientData = serde_json::from_str(client_data_json)
        .map_err(|e| Error::InvalidAssertion(format!("client data is not JSON: {}", e)))?;

    if client_data.kind != ASSERTION_TYPE {
        return Err(Error::InvalidAssertion(format!(
            "unexpected client data type {}",
            client_data.kind
        )));
    }

    let embedded = URL_SAFE_NO_PAD.decode(client_data.challenge.as_bytes()).ok();
    if embedded.as_deref() != Some(challenge.as_slice()) {
        error!(
            expected = %challenge,
            embedded = %client_data.challenge,
            "Assertion challenge does not match the issued challenge"
        );
        return Err(Error::ChallengeMismatch);
    }

    Ok(())
}

/// The client data tail the verifier appends after the canonical prefix
///
/// Everything after `{"type":"webauthn.get","challenge":"...",` without the
/// closing brace.
pub fn client_data_fields(client_data_json: &str, challenge: &B256) -> Result<String> {
    let prefix = client_data_prefix(challenge);
    client_data_json
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::to_string)
        .ok_or_else(|| Error::Encoding("client data is not in canonical form".to_string()))
}

/// Parse a DER signature into low-S `(r, s)`
pub fn parse_signature(der: &[u8]) -> Result<(U256, U256)> {
    let signature = Signature::from_der(der)
        .map_err(|e| Error::InvalidAssertion(format!("malformed DER signature: {}", e)))?;
    let signature = signature.normalize_s().unwrap_or(signature);
    let (r, s) = signature.split_bytes();
    Ok((
        U256::from_be_slice(r.as_slice()),
        U256::from_be_slice(s.as_slice()),
    ))
}

/// Verify the assertion signature against a registered key
pub fn verify_assertion(assertion: &Assertion, public_key: &PasskeyPublicKey) -> Result<()> {
    if assertion.authenticator_data.len() < MIN_AUTHENTICATOR_DATA_LEN {
        return Err(Error::InvalidAssertion(format!(
            "authenticator data too short: {} bytes",
            assertion.authenticator_data.len()
        )));
    }

    let key = public_key.verifying_key()?;
    let signature = Signature::from_der(&assertion.signature)
        .map_err(|e| Error::InvalidAssertion(format!("malformed DER signature: {}", e)))?;

    key.verify(&signed_message(assertion), &signature).map_err(|_| {
        error!(credential = %assertion.credential_id, "Passkey signature does not verify");
        Error::InvalidAssertion("signature does not match the registered key".to_string())
    })
}

/// `authenticatorData ‖ sha256(clientDataJSON)`; the verifier hashes it again
pub fn signed_message(assertion: &Assertion) -> Vec<u8> {
    use sha2::{Digest, Sha256};

    let mut message = assertion.authenticator_data.clone();
    message.extend_from_slice(&Sha256::digest(assertion.client_data_json.as_bytes()));
    message
}

/// Dynamic part of a passkey signature:
/// `abi.encode(bytes authenticatorData, string clientDataFields, uint256 r, uint256 s)`
pub fn encode_passkey_data(authenticator_data: &[u8], client_data_fields: &str, r: U256, s: U256) -> Vec<u8> {
    abi::encode(&[
        Token::Bytes(authenticator_data.to_vec()),
        Token::Bytes(client_data_fields.as_bytes().to_vec()),
        Token::Uint(r),
        Token::Uint(s),
    ])
}

/// Check, verify and re-encode an assertion for `signer`
pub fn assemble(
    signer: Address,
    assertion: &Assertion,
    challenge: &B256,
    public_key: &PasskeyPublicKey,
) -> Result<Vec<u8>> {
    check_challenge(&assertion.client_data_json, challenge)?;
    verify_assertion(assertion, public_key)?;

    let fields = client_data_fields(&assertion.client_data_json, challenge)?;
    let (r, s) = parse_signature(&assertion.signature)?;
    tracing::debug!(signer = %signer, "Assembled passkey signature");
    Ok(encode_passkey_data(&assertion.authenticator_data, &fields, r, s))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer as _;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    pub(crate) const ORIGIN_FIELDS: &str = r#""origin":"https://vault.example","crossOrigin":false"#;

    pub(crate) fn authenticator_data(counter: u32) -> Vec<u8> {
        let mut data = vec![0x49; 32];
        data.push(0x05);
        data.extend_from_slice(&counter.to_be_bytes());
        data
    }

    /// A software authenticator producing real assertions
    pub(crate) fn sign_assertion(key: &SigningKey, credential_id: &str, challenge: &B256) -> Assertion {
        let client_data_json = format!("{}{}}}", client_data_prefix(challenge), ORIGIN_FIELDS);
        let mut assertion = Assertion {
            credential_id: credential_id.to_string(),
            authenticator_data: authenticator_data(1),
            client_data_json,
            signature: Vec::new(),
        };
        let signature: Signature = key.sign(&signed_message(&assertion));
        assertion.signature = signature.to_der().as_bytes().to_vec();
        assertion
    }

    #[test]
    fn test_client_data_prefix() {
        let challenge = B256::repeat_byte(0xff);
        assert_eq!(
            client_data_prefix(&challenge),
            r#"{"type":"webauthn.get","challenge":"__________________________________________8","#
        );
    }

    #[test]
    fn test_valid_assertion_assembles() {
        let key = SigningKey::random(&mut OsRng);
        let public = PasskeyPublicKey::from_verifying_key(key.verifying_key()).unwrap();
        let challenge = B256::repeat_byte(0x42);
        let assertion = sign_assertion(&key, "cred", &challenge);

        assert_eq!(assertion.sign_count(), Some(1));
        let data = assemble(Address::repeat_byte(0x11), &assertion, &challenge, &public).unwrap();
        // two offsets, r, s, then authenticator data length
        assert_eq!(data[4 * 32 + 31] as usize, MIN_AUTHENTICATOR_DATA_LEN);
    }

    #[test]
    fn test_wrong_challenge_rejected_even_with_valid_signature() {
        let key = SigningKey::random(&mut OsRng);
        let public = PasskeyPublicKey::from_verifying_key(key.verifying_key()).unwrap();
        let signed_for = B256::repeat_byte(0x01);
        let issued = B256::repeat_byte(0x02);
        let assertion = sign_assertion(&key, "cred", &signed_for);

        // the signature itself is fine
        assert!(verify_assertion(&assertion, &public).is_ok());
        assert!(matches!(
            assemble(Address::repeat_byte(0x11), &assertion, &issued, &public),
            Err(Error::ChallengeMismatch)
        ));
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let key = SigningKey::random(&mut OsRng);
        let other = SigningKey::random(&mut OsRng);
        let public = PasskeyPublicKey::from_verifying_key(other.verifying_key()).unwrap();
        let challenge = B256::repeat_byte(0x42);
        let assertion = sign_assertion(&key, "cred", &challenge);

        assert!(matches!(
            assemble(Address::repeat_byte(0x11), &assertion, &challenge, &public),
            Err(Error::InvalidAssertion(_))
        ));
    }

    #[test]
    fn test_non_canonical_client_data_is_encoding_error() {
        let challenge = B256::repeat_byte(0x42);
        let reordered = format!(
            r#"{{"challenge":"{}","type":"webauthn.get","origin":"https://vault.example"}}"#,
            encode_challenge(&challenge)
        );
        assert!(check_challenge(&reordered, &challenge).is_ok());
        assert!(matches!(
            client_data_fields(&reordered, &challenge),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_wrong_client_data_type_rejected() {
        let challenge = B256::repeat_byte(0x42);
        let create = format!(
            r#"{{"type":"webauthn.create","challenge":"{}"}}"#,
            encode_challenge(&challenge)
        );
        assert!(matches!(
            check_challenge(&create, &challenge),
            Err(Error::InvalidAssertion(_))
        ));
    }

    #[test]
    fn test_parse_signature_normalizes_high_s() {
        let key = SigningKey::random(&mut OsRng);
        let signature: Signature = key.sign(b"message");
        let (r, s) = signature.split_scalars();
        let high = Signature::from_scalars(r, -*s).unwrap();

        let (_, low_s) = parse_signature(high.to_der().as_bytes()).unwrap();
        let (_, expected) = parse_signature(signature.normalize_s().unwrap_or(signature).to_der().as_bytes()).unwrap();
        assert_eq!(low_s, expected);
    }
}
