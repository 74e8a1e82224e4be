//! HTTP middleware for authentication, authorization and abuse control.
//!
//! - **Rate Limiting**: fixed window per client IP with progressive blocks
//! - **Client Identity**: trusted-proxy aware client IP resolution
//! - **Authentication**: salted bearer tokens verified per request
//! - **Authorization**: any-of permission bitmask checks per route
//! - **Request Deadline**: client-specified budget for store lookups
//!
//! # Architecture
//!
//! ```text
//! Request → API Limiter → Request ID → Trace → CORS → Deadline
//!              ↓                                       ↓
//!          429 Too Many               [/auth/*] → Auth Limiter → 429
//!                                                      ↓
//!                                     [protected] → RequireAuth → 401 / 403
//!                                                      ↓
//!                                                   Handler
//! ```

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod timeout;

pub use auth::{AuthGuard, AuthRejection, AuthUser, RequireAuth, bearer_token};
pub use ip::{UNKNOWN_IP, client_key};
pub use rate_limit::{Decision, RateLimitError, RateLimitLayer, RateLimiter, RateLimiterConfig};
pub use timeout::{
    MAX_REQUEST_TIMEOUT_MS, MIN_REQUEST_TIMEOUT_MS, REQUEST_TIMEOUT_HEADER, RequestDeadline,
    RequestDeadlineExt, extract_request_deadline,
};
