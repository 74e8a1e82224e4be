//! User endpoints.
//!
//! - `GET /users/me` - Caller identity from the verified token
//! - `GET /admin/users/{id}` - ADMIN or MANAGE_TEAM
//! - `PUT /admin/users/{id}/permissions` - ADMIN

use axum::extract::{Path, State};
use axum::{Extension, Json};
use tracing::{info, instrument};

use super::JsonBody;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::models::{MeResponse, SetPermissionsRequest, UserResponse};
use crate::state::AppState;
use crate::store::UserLookup;
use crate::validation::validate_user_id;

#[instrument(skip_all)]
pub async fn me(Extension(caller): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        id: caller.user_id,
        permissions: caller.permissions,
    })
}

async fn load_user(state: &AppState, id: &str) -> AppResult<UserResponse> {
    let user = state
        .store
        .get_user_auth_info(UserLookup::Id(id))
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(UserResponse {
        id: user.id,
        email: user.email,
        permissions: user.permissions,
    })
}

/// Fetch a user's record including the live bitmask.
#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserResponse>> {
    validate_user_id(&id)?;
    Ok(Json(load_user(&state, &id).await?))
}

/// Replace a user's permission bitmask.
///
/// Outstanding tokens keep their snapshot until they expire or are
/// refreshed.
#[instrument(skip(state, caller, request))]
pub async fn set_permissions(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<SetPermissionsRequest>,
) -> AppResult<Json<UserResponse>> {
    validate_user_id(&id)?;

    state
        .store
        .set_permissions(&id, request.permissions)
        .await?;
    info!(
        admin = %caller.user_id,
        target = %id,
        permissions = request.permissions,
        "User permissions updated"
    );

    Ok(Json(load_user(&state, &id).await?))
}
