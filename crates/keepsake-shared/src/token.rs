use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

// Token signed by the identity provider, presented by clients as a bearer
// credential on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub uid: String,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

// payload = uid || expires_at (rfc3339)
fn signing_payload(uid: &str, expires_at: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(uid.as_bytes());
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

/// Sign an access token for `uid`, valid until `expires_at`.
///
/// This is what the identity provider runs; the server only ever verifies.
pub fn mint_access_token(
    uid: &str,
    expires_at: DateTime<Utc>,
    provider_signing_key: &ed25519_dalek::SigningKey,
) -> AccessToken {
    use ed25519_dalek::Signer;

    let payload = signing_payload(uid, &expires_at);
    let signature = provider_signing_key.sign(&payload);

    AccessToken {
        uid: uid.to_string(),
        expires_at,
        signature: signature.to_bytes().to_vec(),
    }
}

/// Verify a token against the identity provider's public key.
///
/// Checks expiry first, then the Ed25519 signature over the payload.
pub fn verify_access_token_with_key(
    token: &AccessToken,
    provider_pubkey: &[u8; 32],
) -> Result<(), TokenError> {
    if Utc::now() > token.expires_at {
        return Err(TokenError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(provider_pubkey).map_err(|_| TokenError::InvalidKeyBytes)?;

    let signature =
        Signature::from_slice(&token.signature).map_err(|_| TokenError::InvalidSignature)?;

    let payload = signing_payload(&token.uid, &token.expires_at);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| TokenError::InvalidSignature)
}

impl AccessToken {
    /// Encode as a URL-safe base64 string suitable for an `Authorization:
    /// Bearer` header.
    pub fn encode(&self) -> Result<String, TokenError> {
        let json = serde_json::to_vec(self).map_err(|e| TokenError::Malformed(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a bearer string back into a token. Does not verify anything.
    pub fn decode(bearer: &str) -> Result<Self, TokenError> {
        let json = URL_SAFE_NO_PAD
            .decode(bearer.trim())
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_token_valid() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let provider_pubkey = provider_key.verifying_key().to_bytes();

        let token = mint_access_token("user-42", Utc::now() + Duration::hours(1), &provider_key);

        assert!(verify_access_token_with_key(&token, &provider_pubkey).is_ok());
    }

    #[test]
    fn test_token_expired() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let provider_pubkey = provider_key.verifying_key().to_bytes();

        let token = mint_access_token("user-42", Utc::now() - Duration::hours(1), &provider_key);

        assert!(matches!(
            verify_access_token_with_key(&token, &provider_pubkey),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_token_wrong_provider_key() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let wrong_key = SigningKey::generate(&mut OsRng);
        let wrong_pubkey = wrong_key.verifying_key().to_bytes();

        let token = mint_access_token("user-42", Utc::now() + Duration::hours(1), &provider_key);

        assert!(verify_access_token_with_key(&token, &wrong_pubkey).is_err());
    }

    #[test]
    fn test_token_tampered_uid() {
        let provider_key = SigningKey::generate(&mut OsRng);
        let provider_pubkey = provider_key.verifying_key().to_bytes();

        let mut token =
            mint_access_token("user-42", Utc::now() + Duration::hours(1), &provider_key);
        token.uid = "someone-else".to_string();

        assert!(matches!(
            verify_access_token_with_key(&token, &provider_pubkey),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let provider_key = SigningKey::generate(&mut OsRng);

        let token = mint_access_token("user-42", Utc::now() + Duration::hours(1), &provider_key);
        let bearer = token.encode().unwrap();
        let decoded = AccessToken::decode(&bearer).unwrap();

        assert_eq!(decoded.uid, token.uid);
        assert_eq!(decoded.signature, token.signature);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(AccessToken::decode("not-a-token!!").is_err());
        assert!(AccessToken::decode("").is_err());
    }
}
