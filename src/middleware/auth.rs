//! Bearer token authentication and permission guard.
//!
//! # Verification Steps
//!
//! [`RequireAuth`] wraps a route and, for every request:
//!
//! 1. Reads `Authorization: Bearer <token>`.
//! 2. Parses the claims *without* verifying, only to learn the subject.
//! 3. Fetches that subject's salt from the [`UserStore`], bounded by the
//!    request deadline (or the configured store timeout).
//! 4. Verifies signature and expiry with `secret || salt`.
//! 5. Checks the token class (access vs refresh).
//! 6. If the route requires permissions, checks the signed bitmask snapshot
//!    against them (any one suffices).
//! 7. Inserts an [`AuthUser`] into request extensions.
//!
//! Steps 1-5 fail with the same generic 401; step 6 fails with 403. The
//! specific reason is logged and counted, never returned.
//!
//! # Fail Closed
//!
//! A store that errors or does not answer in time is treated as an
//! authentication failure, not as a pass.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, header};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::timeout::RequestDeadlineExt;
use crate::error::AppError;
use crate::metrics;
use crate::permissions::{Permissions, has_any_permission};
use crate::store::{UserLookup, UserStore};
use crate::token::{TokenClass, TokenCodec, TokenError};

const BEARER_SCHEME: &str = "bearer";

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    /// Bitmask snapshot from the verified token.
    pub permissions: u32,
    pub class: TokenClass,
}

impl AuthUser {
    pub fn permissions(&self) -> Permissions {
        Permissions::from_raw(self.permissions)
    }
}

/// Why a request was refused. Logged and counted, never sent to clients.
#[derive(Debug)]
pub enum AuthRejection {
    MissingCredentials,
    Token(TokenError),
    UnknownSubject,
    LookupTimeout,
    StoreFailure(String),
    WrongClass { expected: TokenClass, found: TokenClass },
    InsufficientPermissions,
}

impl AuthRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthRejection::MissingCredentials => "missing_credentials",
            AuthRejection::Token(e) => e.reason(),
            AuthRejection::UnknownSubject => "unknown_subject",
            AuthRejection::LookupTimeout => "lookup_timeout",
            AuthRejection::StoreFailure(_) => "store_failure",
            AuthRejection::WrongClass { .. } => "wrong_class",
            AuthRejection::InsufficientPermissions => "insufficient_permissions",
        }
    }
}

impl From<TokenError> for AuthRejection {
    fn from(err: TokenError) -> Self {
        AuthRejection::Token(err)
    }
}

impl From<AuthRejection> for AppError {
    fn from(rejection: AuthRejection) -> Self {
        match rejection {
            AuthRejection::InsufficientPermissions => AppError::Forbidden,
            _ => AppError::Unauthorized,
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively; an empty token is absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Token + store + policy needed to authenticate one class of route.
#[derive(Clone)]
pub struct AuthGuard {
    tokens: Arc<TokenCodec>,
    store: Arc<dyn UserStore>,
    accepts: TokenClass,
    any_of: Vec<Permissions>,
    lookup_timeout: Duration,
}

impl AuthGuard {
    /// Run the verification steps against request headers.
    ///
    /// `budget` bounds the salt lookup.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        budget: Duration,
    ) -> Result<AuthUser, AuthRejection> {
        let token = bearer_token(headers).ok_or(AuthRejection::MissingCredentials)?;

        let unverified = self.tokens.parse_unverified(token)?;

        let lookup = self
            .store
            .get_user_auth_info(UserLookup::Id(&unverified.sub));
        let info = match tokio::time::timeout(budget, lookup).await {
            Ok(Ok(Some(info))) => info,
            Ok(Ok(None)) => return Err(AuthRejection::UnknownSubject),
            Ok(Err(e)) => return Err(AuthRejection::StoreFailure(e.to_string())),
            Err(_) => return Err(AuthRejection::LookupTimeout),
        };

        let claims = self.tokens.verify(token, &info.salt)?;

        if claims.typ != self.accepts {
            return Err(AuthRejection::WrongClass {
                expected: self.accepts,
                found: claims.typ,
            });
        }

        if !self.any_of.is_empty()
            && !has_any_permission(claims.perms, self.any_of.iter().copied())
        {
            return Err(AuthRejection::InsufficientPermissions);
        }

        Ok(AuthUser {
            user_id: claims.sub,
            permissions: claims.perms,
            class: claims.typ,
        })
    }
}

/// Route layer requiring a valid bearer token.
///
/// # Example
///
/// ```rust,ignore
/// let admin = RequireAuth::new(tokens, store, Duration::from_secs(2))
///     .any_of([Permissions::ADMIN]);
/// Router::new().route("/admin/users/{id}", get(handler).route_layer(admin));
/// ```
#[derive(Clone)]
pub struct RequireAuth {
    guard: AuthGuard,
}

impl RequireAuth {
    /// Access-token guard with no permission requirement.
    pub fn new(tokens: Arc<TokenCodec>, store: Arc<dyn UserStore>, lookup_timeout: Duration) -> Self {
        Self {
            guard: AuthGuard {
                tokens,
                store,
                accepts: TokenClass::Access,
                any_of: Vec::new(),
                lookup_timeout,
            },
        }
    }

    /// Accept `class` instead of access tokens.
    pub fn accepting(mut self, class: TokenClass) -> Self {
        self.guard.accepts = class;
        self
    }

    /// Require at least one of `flags`.
    pub fn any_of(mut self, flags: impl IntoIterator<Item = Permissions>) -> Self {
        self.guard.any_of = flags.into_iter().collect();
        self
    }

    pub fn guard(&self) -> &AuthGuard {
        &self.guard
    }
}

impl<S> Layer<S> for RequireAuth {
    type Service = RequireAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireAuthService {
            inner,
            guard: Arc::new(self.guard.clone()),
        }
    }
}

/// Authentication service wrapper.
#[derive(Clone)]
pub struct RequireAuthService<S> {
    inner: S,
    guard: Arc<AuthGuard>,
}

impl<S> Service<Request<Body>> for RequireAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let guard = self.guard.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let budget = req.remaining_budget(guard.lookup_timeout);

            match guard.authenticate(req.headers(), budget).await {
                Ok(user) => {
                    debug!(user_id = %user.user_id, class = %user.class, "Authenticated request");
                    req.extensions_mut().insert(user);
                    inner.call(req).await
                }
                Err(rejection) => {
                    let path = req.uri().path();
                    match &rejection {
                        AuthRejection::InsufficientPermissions => {
                            metrics::record_forbidden();
                            warn!(path = %path, "Permission denied");
                        }
                        AuthRejection::LookupTimeout => {
                            metrics::record_auth_failure(rejection.reason());
                            warn!(
                                path = %path,
                                budget_ms = budget.as_millis() as u64,
                                "Salt lookup timed out, rejecting"
                            );
                        }
                        AuthRejection::StoreFailure(cause) => {
                            metrics::record_auth_failure(rejection.reason());
                            error!(path = %path, error = %cause, "Salt lookup failed, rejecting");
                        }
                        _ => {
                            metrics::record_auth_failure(rejection.reason());
                            debug!(path = %path, reason = rejection.reason(), "Authentication failed");
                        }
                    }
                    Ok(AppError::from(rejection).into_response())
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{InMemoryUserStore, NewUser, StoreError, UserAuthInfo, generate_salt};
    use async_trait::async_trait;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    fn codec() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::new(
            SECRET,
            Duration::from_secs(900),
            Duration::from_secs(3600),
        ))
    }

    async fn seeded(perms: Permissions) -> (Arc<InMemoryUserStore>, UserAuthInfo) {
        let store = Arc::new(InMemoryUserStore::new());
        let user = store
            .create_user(NewUser {
                email: "founder@example.com".into(),
                password_hash: "unused".into(),
                permissions: perms.bits(),
            })
            .await
            .unwrap();
        (store, user)
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn guard(store: Arc<dyn UserStore>) -> RequireAuth {
        RequireAuth::new(codec(), store, Duration::from_secs(2))
    }

    const BUDGET: Duration = Duration::from_secs(2);

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer   abc "));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_valid_access_token() {
        let (store, user) = seeded(Permissions::SUBMIT_PROJECT).await;
        let pair = codec()
            .issue(&user.id, user.permissions, &user.salt)
            .unwrap();

        let auth = guard(store)
            .guard()
            .authenticate(&bearer(&pair.access_token), BUDGET)
            .await
            .unwrap();

        assert_eq!(auth.user_id, user.id);
        assert_eq!(auth.permissions(), Permissions::SUBMIT_PROJECT);
        assert_eq!(auth.class, TokenClass::Access);
    }

    #[tokio::test]
    async fn test_missing_header() {
        let (store, _) = seeded(Permissions::COMMENT).await;
        let err = guard(store)
            .guard()
            .authenticate(&HeaderMap::new(), BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::MissingCredentials));
        assert!(matches!(AppError::from(err), AppError::Unauthorized));
    }

    #[tokio::test]
    async fn test_rotated_salt_rejected() {
        let (store, user) = seeded(Permissions::COMMENT).await;
        let pair = codec()
            .issue(&user.id, user.permissions, &user.salt)
            .unwrap();
        store.set_salt(&user.id, generate_salt()).await.unwrap();

        let err = guard(store)
            .guard()
            .authenticate(&bearer(&pair.access_token), BUDGET)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "bad_signature");
    }

    #[tokio::test]
    async fn test_refresh_token_rejected_on_access_route() {
        let (store, user) = seeded(Permissions::COMMENT).await;
        let pair = codec()
            .issue(&user.id, user.permissions, &user.salt)
            .unwrap();

        let err = guard(store.clone())
            .guard()
            .authenticate(&bearer(&pair.refresh_token), BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::WrongClass { .. }));

        let ok = guard(store)
            .accepting(TokenClass::Refresh)
            .guard()
            .authenticate(&bearer(&pair.refresh_token), BUDGET)
            .await
            .unwrap();
        assert_eq!(ok.class, TokenClass::Refresh);
    }

    #[tokio::test]
    async fn test_unknown_subject() {
        let store = Arc::new(InMemoryUserStore::new());
        let token = codec()
            .issue("ghost", 0, &generate_salt())
            .unwrap()
            .access_token;

        let err = guard(store)
            .guard()
            .authenticate(&bearer(&token), BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::UnknownSubject));
    }

    #[tokio::test]
    async fn test_permission_check() {
        let (store, user) = seeded(Permissions::SUBMIT_PROJECT).await;
        let token = codec()
            .issue(&user.id, user.permissions, &user.salt)
            .unwrap()
            .access_token;

        let err = guard(store.clone())
            .any_of([Permissions::ADMIN, Permissions::MANAGE_TEAM])
            .guard()
            .authenticate(&bearer(&token), BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::InsufficientPermissions));
        assert!(matches!(AppError::from(err), AppError::Forbidden));

        guard(store)
            .any_of([Permissions::ADMIN, Permissions::SUBMIT_PROJECT])
            .guard()
            .authenticate(&bearer(&token), BUDGET)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_used_not_live_bitmask() {
        let (store, user) = seeded(Permissions::SUBMIT_PROJECT).await;
        let token = codec()
            .issue(&user.id, user.permissions, &user.salt)
            .unwrap()
            .access_token;
        store
            .set_permissions(&user.id, Permissions::ADMIN.bits())
            .await
            .unwrap();

        let err = guard(store)
            .any_of([Permissions::ADMIN])
            .guard()
            .authenticate(&bearer(&token), BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::InsufficientPermissions));
    }

    struct FailingStore;

    #[async_trait]
    impl UserStore for FailingStore {
        async fn get_user_auth_info(
            &self,
            _lookup: UserLookup<'_>,
        ) -> Result<Option<UserAuthInfo>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn create_user(&self, _user: NewUser) -> Result<UserAuthInfo, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_salt(&self, _id: &str, _salt: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn set_permissions(&self, _id: &str, _perms: u32) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    struct StalledStore;

    #[async_trait]
    impl UserStore for StalledStore {
        async fn get_user_auth_info(
            &self,
            _lookup: UserLookup<'_>,
        ) -> Result<Option<UserAuthInfo>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
        async fn create_user(&self, _user: NewUser) -> Result<UserAuthInfo, StoreError> {
            Err(StoreError::Unavailable("stalled".into()))
        }
        async fn set_salt(&self, _id: &str, _salt: Vec<u8>) -> Result<(), StoreError> {
            Ok(())
        }
        async fn set_permissions(&self, _id: &str, _perms: u32) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let token = codec().issue("u1", 0, b"salt").unwrap().access_token;
        let err = guard(Arc::new(FailingStore))
            .guard()
            .authenticate(&bearer(&token), BUDGET)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::StoreFailure(_)));
        assert!(matches!(AppError::from(err), AppError::Unauthorized));
    }

    #[tokio::test]
    async fn test_lookup_timeout_fails_closed() {
        let token = codec().issue("u1", 0, b"salt").unwrap().access_token;
        let err = guard(Arc::new(StalledStore))
            .guard()
            .authenticate(&bearer(&token), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthRejection::LookupTimeout));
    }
}
