//! Signed token pairs with per-user revocation.
//!
//! Tokens are compact JWTs (`header.payload.signature`, base64url) signed with
//! HS256. The HMAC key is `server_secret || user_salt`: rotating a user's salt
//! in the store makes every token previously issued to that user unverifiable,
//! without a blacklist and without rotating the global secret.
//!
//! # Verification flow
//!
//! Because the key depends on the subject, a caller first runs
//! [`TokenCodec::parse_unverified`] to learn which user's salt to fetch, then
//! calls [`TokenCodec::verify`] with that salt. The unverified claims must
//! never be used for anything but the salt lookup.
//!
//! [`TokenCodec::verify`] checks signature and expiry only. Token class is the
//! caller's concern so the same codec serves access and refresh call sites.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signing algorithm; fixed, never read from the token header.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Token class carried in the `typ` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    /// Short-lived credential presented on each request.
    Access,
    /// Long-lived credential accepted only by the refresh endpoint.
    Refresh,
}

impl TokenClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenClass::Access => "access",
            TokenClass::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature-covered token payload.
///
/// `perms` is a fixed-width integer so the payload stays minimal and stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// Permission bitmask snapshot taken at issuance.
    pub perms: u32,
    /// Token class.
    pub typ: TokenClass,
    /// Issued-at, seconds since the Unix epoch.
    pub iat: i64,
    /// Expires-at, seconds since the Unix epoch.
    pub exp: i64,
}

/// Access/refresh pair issued together.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime, for the `expires_in` response field.
    pub access_expires_in: Duration,
}

/// Internal token failures.
///
/// Callers outside the codec collapse all of these into one generic
/// authentication failure; the variants exist for logging and metrics.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature mismatch")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    /// Short label used as a metrics/log reason.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Malformed(_) => "malformed",
            TokenError::InvalidSignature => "bad_signature",
            TokenError::Expired => "expired",
            TokenError::Signing(_) => "signing",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

/// Issues and verifies salted token pairs.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue an access/refresh pair for `user_id`, both signed with
    /// `secret || salt` and carrying the same permission snapshot.
    pub fn issue(
        &self,
        user_id: &str,
        permissions: u32,
        salt: &[u8],
    ) -> Result<TokenPair, TokenError> {
        self.issue_at(user_id, permissions, salt, Utc::now())
    }

    /// Issue a pair as if the current time were `now`.
    pub fn issue_at(
        &self,
        user_id: &str,
        permissions: u32,
        salt: &[u8],
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let key = EncodingKey::from_secret(&self.signing_key(salt));
        let header = Header::new(ALGORITHM);
        let iat = now.timestamp();

        let sign = |typ: TokenClass, ttl: Duration| -> Result<String, TokenError> {
            let ttl_secs = i64::try_from(ttl.as_secs())
                .map_err(|_| TokenError::Signing(format!("{typ} lifetime out of range")))?;
            let claims = Claims {
                sub: user_id.to_string(),
                perms: permissions,
                typ,
                iat,
                exp: iat.saturating_add(ttl_secs),
            };
            jsonwebtoken::encode(&header, &claims, &key)
                .map_err(|e| TokenError::Signing(e.to_string()))
        };

        Ok(TokenPair {
            access_token: sign(TokenClass::Access, self.access_ttl)?,
            refresh_token: sign(TokenClass::Refresh, self.refresh_ttl)?,
            access_expires_in: self.access_ttl,
        })
    }

    /// Decode claims without checking signature or expiry.
    ///
    /// Only use the result to pick which user's salt to fetch.
    pub fn parse_unverified(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        Ok(data.claims)
    }

    /// Verify signature (with `secret || salt`) and expiry.
    pub fn verify(&self, token: &str, salt: &[u8]) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let key = DecodingKey::from_secret(&self.signing_key(salt));
        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)?;

        // `exp == now` passes the library check; the token is already dead then.
        if data.claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }

    fn signing_key(&self, salt: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.secret.len() + salt.len());
        key.extend_from_slice(&self.secret);
        key.extend_from_slice(salt);
        key
    }
}
