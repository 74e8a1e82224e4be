//! Credential and token endpoints.
//!
//! # Endpoints
//!
//! - `POST /auth/register` - Create an account, returns a token pair (201)
//! - `POST /auth/login` - Exchange e-mail + password for a token pair
//! - `POST /auth/refresh` - Exchange a refresh token for a new pair
//! - `POST /auth/logout-all` - Rotate the caller's salt, revoking every token
//!
//! All of `/auth/*` sits behind the auth-route limiter as well as the
//! general one.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::{debug, info, instrument, warn};

use super::JsonBody;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::AuthUser;
use crate::models::{LoginRequest, RegisterRequest, TokenResponse};
use crate::password::{hash_password, verify_password};
use crate::state::AppState;
use crate::store::{NewUser, UserLookup, generate_salt};
use crate::validation::{parse_role, validate_email, validate_password};

/// Create an account with the preset permissions for its role.
///
/// # Request Body
///
/// ```json
/// { "email": "founder@example.com", "password": "...", "role": "founder" }
/// ```
///
/// # Errors
///
/// - 400 on invalid e-mail, password length or role
/// - 409 if the e-mail is taken
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    validate_email(&request.email)?;
    validate_password(&request.password)?;
    let role = parse_role(&request.role)?;

    let password_hash = hash_password(request.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            email: request.email.trim().to_string(),
            password_hash,
            permissions: role.permissions().bits(),
        })
        .await?;

    let pair = state.tokens.issue(&user.id, user.permissions, &user.salt)?;
    metrics::record_tokens_issued("register");
    info!(user_id = %user.id, role = ?role, "User registered");

    Ok((StatusCode::CREATED, Json(pair.into())))
}

/// Exchange credentials for a token pair.
///
/// Unknown e-mail and wrong password are indistinguishable to the caller.
#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let user = state
        .store
        .get_user_auth_info(UserLookup::Email(&request.email))
        .await?;

    let stored_hash = user.as_ref().map(|u| u.password_hash.clone());
    let verified = verify_password(request.password, stored_hash).await;

    let Some(user) = user.filter(|_| verified) else {
        metrics::record_auth_failure("bad_credentials");
        debug!("Login rejected");
        return Err(AppError::Unauthorized);
    };

    let pair = state.tokens.issue(&user.id, user.permissions, &user.salt)?;
    metrics::record_tokens_issued("login");
    info!(user_id = %user.id, "User logged in");

    Ok(Json(pair.into()))
}

/// Issue a fresh pair for the holder of a valid refresh token.
///
/// The new pair carries the *current* bitmask from the store, so
/// permission changes take effect at the next refresh.
#[instrument(skip(state))]
pub async fn refresh(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> AppResult<Json<TokenResponse>> {
    let Some(user) = state
        .store
        .get_user_auth_info(UserLookup::Id(&caller.user_id))
        .await?
    else {
        warn!(user_id = %caller.user_id, "Refresh for user that no longer exists");
        return Err(AppError::Unauthorized);
    };

    if user.permissions != caller.permissions {
        info!(
            user_id = %user.id,
            old = caller.permissions,
            new = user.permissions,
            "Permissions changed since last issuance"
        );
    }

    let pair = state.tokens.issue(&user.id, user.permissions, &user.salt)?;
    metrics::record_tokens_issued("refresh");

    Ok(Json(pair.into()))
}

/// Revoke every token issued to the caller by rotating their salt.
#[instrument(skip(state))]
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> AppResult<StatusCode> {
    state
        .store
        .set_salt(&caller.user_id, generate_salt())
        .await?;
    info!(user_id = %caller.user_id, "Salt rotated, all sessions revoked");

    Ok(StatusCode::NO_CONTENT)
}
