//! HS256 JSON Web Tokens
//!
//! Compact `header.payload.signature` form, base64url without padding.
//! Only HS256 is issued or accepted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    /// Signature was valid but `exp` has passed
    #[error("jwt expired")]
    Expired { expired_at: DateTime<Utc> },

    #[error("{0}")]
    Invalid(String),
}

impl TokenError {
    /// Error name as logged in `errorName`
    pub fn name(&self) -> &'static str {
        match self {
            TokenError::Expired { .. } => "TokenExpiredError",
            TokenError::Invalid(_) => "JsonWebTokenError",
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        TokenError::Invalid(message.into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub email: String,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expires at, unix seconds
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| TokenError::invalid(e.to_string()))
    }

    pub fn sign(&self, id: i64, email: &str, ttl: Duration) -> Result<String, TokenError> {
        self.sign_at(id, email, ttl, Utc::now())
    }

    pub fn sign_at(&self, id: i64, email: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String, TokenError> {
        let iat = now.timestamp();
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or_else(|| TokenError::invalid(format!("token lifetime out of range: {}s", ttl.as_secs())))?;
        let claims = Claims {
            id,
            email: email.to_string(),
            iat,
            exp,
        };
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        };

        let header_part = encode_part(&header)?;
        let claims_part = encode_part(&claims)?;
        let signing_input = format!("{}.{}", header_part, claims_part);

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Check signature first, then expiry; `now >= exp` is expired
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_part), Some(claims_part), Some(signature_part), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::invalid("jwt malformed"));
        };

        let header: Header = decode_part(header_part)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::invalid("invalid algorithm"));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_part)
            .map_err(|_| TokenError::invalid("invalid signature"))?;
        let mut mac = self.mac()?;
        mac.update(header_part.as_bytes());
        mac.update(b".");
        mac.update(claims_part.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::invalid("invalid signature"))?;

        let claims: Claims = decode_part(claims_part)?;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired {
                expired_at: claims.expires_at(),
            });
        }
        Ok(claims)
    }
}

fn encode_part<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let bytes = serde_json::to_vec(value).map_err(|e| TokenError::invalid(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn decode_part<T: for<'de> Deserialize<'de>>(part: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| TokenError::invalid("jwt malformed"))?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::invalid("jwt malformed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_sign_and_verify() {
        let signer = TokenSigner::new("test-secret");
        let token = signer.sign(7, "a@example.com", Duration::from_secs(60)).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.id, 7);
        assert_eq!(claims.email, "a@example.com");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_expired_at_boundary() {
        let signer = TokenSigner::new("test-secret");
        let issued = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let token = signer.sign_at(1, "a@example.com", Duration::from_secs(1), issued).unwrap();

        assert!(signer.verify_at(&token, issued).is_ok());
        let err = signer
            .verify_at(&token, issued + ChronoDuration::seconds(1))
            .unwrap_err();
        assert_eq!(
            err,
            TokenError::Expired {
                expired_at: issued + ChronoDuration::seconds(1)
            }
        );
        assert_eq!(err.to_string(), "jwt expired");
        assert_eq!(err.name(), "TokenExpiredError");
    }

    #[test]
    fn test_oversized_lifetime_rejected() {
        let signer = TokenSigner::new("test-secret");
        for ttl in [Duration::from_secs(u64::MAX), Duration::from_secs(i64::MAX as u64)] {
            let err = signer.sign(1, "a@example.com", ttl).unwrap_err();
            assert!(matches!(err, TokenError::Invalid(ref m) if m.contains("out of range")), "{:?}", err);
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = TokenSigner::new("one")
            .sign(1, "a@example.com", Duration::from_secs(60))
            .unwrap();
        let err = TokenSigner::new("two").verify(&token).unwrap_err();
        assert_eq!(err, TokenError::Invalid("invalid signature".into()));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = TokenSigner::new("test-secret");
        let token = signer.sign(1, "a@example.com", Duration::from_secs(60)).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"id":2,"email":"b@example.com","iat":0,"exp":9999999999}"#);
        parts[1] = &forged;
        assert!(matches!(signer.verify(&parts.join(".")), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_malformed_tokens() {
        let signer = TokenSigner::new("test-secret");
        for token in ["", "abc", "a.b", "a.b.c.d"] {
            assert_eq!(signer.verify(token).unwrap_err().name(), "JsonWebTokenError");
        }
    }
}

// Property-based tests with Proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_arbitrary_input_is_invalid(token in ".{0,200}") {
            // Random text never verifies and never reports an expiry
            let signer = TokenSigner::new("test-secret");
            prop_assert!(matches!(signer.verify(&token), Err(TokenError::Invalid(_))));
        }

        #[test]
        fn prop_claims_survive_signing(id in any::<i64>(), email in "[a-z]{1,12}@[a-z]{1,8}\\.com", ttl in 1u64..86_400) {
            let signer = TokenSigner::new("test-secret");
            let token = signer.sign(id, &email, Duration::from_secs(ttl)).unwrap();
            let claims = signer.verify(&token).unwrap();
            prop_assert_eq!(claims.id, id);
            prop_assert_eq!(claims.email, email);
            prop_assert_eq!(claims.exp - claims.iat, ttl as i64);
        }
    }
}
