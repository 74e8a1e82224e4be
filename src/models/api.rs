use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;
use crate::token::TokenPair;

/// Self-service registration role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Founder,
    Investor,
}

impl Role {
    /// Permission preset granted at registration.
    pub fn permissions(&self) -> Permissions {
        match self {
            Role::Founder => Permissions::FOUNDER,
            Role::Investor => Permissions::INVESTOR,
        }
    }
}

/// Request to create an account.
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    /// `founder` or `investor`
    pub role: String,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Request to exchange credentials for a token pair.
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Issued token pair.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Always `"Bearer"`
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer",
            expires_in: pair.access_expires_in.as_secs(),
        }
    }
}

/// The caller's identity as seen by the auth layer.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: String,
    /// Bitmask snapshot carried by the presented token
    pub permissions: u32,
}

/// Administrative view of a user.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    /// Live bitmask from the store
    pub permissions: u32,
}

/// Request to replace a user's permission bitmask.
#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    pub permissions: u32,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Service version
    pub version: String,
    /// Ranges in the fetched trusted proxy set
    pub trusted_ranges: usize,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    /// Whether a trusted range set has been fetched at least once
    pub trusted_ranges_loaded: bool,
}
