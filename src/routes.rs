//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   API Limiter    │ ← 429 if the client is over quota or blocked
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets and propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Deadline      │ ← X-Request-Timeout into extensions
//! └────────┬─────────┘
//!          ▼
//!   Route layers: Auth Limiter (/auth/*), RequireAuth (protected)
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - Monitoring, unauthenticated
//! - `/auth/*` - Credential and token exchange, extra limiter
//! - `/users/me` - Any valid access token
//! - `/admin/users/*` - Permission-gated administration

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers;
use crate::middleware::{
    RateLimitError, RateLimitLayer, RateLimiter, RequireAuth, extract_request_deadline,
};
use crate::permissions::Permissions;
use crate::state::AppState;
use crate::token::TokenClass;

/// Build the application router with all routes and middleware configured.
///
/// Each limiter is skipped when its quota is configured as 0.
///
/// # Errors
///
/// Returns `RateLimitError` if an enabled limiter's configuration is invalid.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = state.config.clone();

    let access = RequireAuth::new(
        state.tokens.clone(),
        state.store.clone(),
        config.store_timeout,
    );

    // =========================================================================
    // Auth Routes
    // =========================================================================
    let mut auth_routes = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route(
            "/auth/refresh",
            post(handlers::refresh).route_layer(access.clone().accepting(TokenClass::Refresh)),
        )
        .route(
            "/auth/logout-all",
            post(handlers::logout_all).route_layer(access.clone()),
        );

    if let Some(limit) = config.auth_rate_limit() {
        info!(
            requests = limit.requests,
            window_secs = limit.window.as_secs(),
            block_secs = limit.block_period.as_secs(),
            max_blocks = limit.max_blocks,
            "Auth route rate limiting enabled"
        );
        let limiter = Arc::new(RateLimiter::new("auth", limit)?);
        auth_routes = auth_routes.layer(RateLimitLayer::new(
            limiter,
            state.proxies.clone(),
            &config.client_ip_header,
        ));
    } else {
        info!("Auth route rate limiting disabled (AUTH_RATE_LIMIT_REQUESTS=0)");
    }

    // =========================================================================
    // Protected Routes
    // =========================================================================
    let user_routes = Router::new()
        .route("/users/me", get(handlers::me).route_layer(access.clone()))
        .route(
            "/admin/users/{id}",
            get(handlers::get_user).route_layer(
                access
                    .clone()
                    .any_of([Permissions::ADMIN, Permissions::MANAGE_TEAM]),
            ),
        )
        .route(
            "/admin/users/{id}/permissions",
            put(handlers::set_permissions).route_layer(access.any_of([Permissions::ADMIN])),
        );

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .merge(auth_routes)
        .merge(user_routes);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Request body size limit
    info!(
        max_size_kb = config.max_request_body_size / 1024,
        "Request body size limit configured"
    );
    router = router.layer(DefaultBodyLimit::max(config.max_request_body_size));

    // 2. Client deadline
    router = router.layer(axum::middleware::from_fn(extract_request_deadline));

    // 3. CORS
    router = router.layer(build_cors_layer(&config.cors_allowed_origins));

    // 4. Tracing
    router = router.layer(TraceLayer::new_for_http());

    // 5. Request ID (set runs before propagate)
    router = router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    // 6. General rate limiting - applied last, runs first
    if let Some(limit) = config.api_rate_limit() {
        info!(
            requests = limit.requests,
            window_secs = limit.window.as_secs(),
            trusted_proxies = config.trusted_proxies.len(),
            proxy_sources = config.trusted_proxy_sources.len(),
            "Rate limiting enabled"
        );
        let limiter = Arc::new(RateLimiter::new("api", limit)?);
        router = router.layer(RateLimitLayer::new(
            limiter,
            state.proxies.clone(),
            &config.client_ip_header,
        ));
    } else {
        info!("Rate limiting disabled (API_RATE_LIMIT_REQUESTS=0)");
    }

    Ok(router.with_state(state))
}

/// Build CORS layer from configuration.
///
/// `["*"]` allows any origin; convenient for development, avoid in
/// production.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
