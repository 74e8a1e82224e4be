//! # Fundraise Gate
//!
//! Authentication, authorization and abuse control for a fundraising
//! platform REST backend, built on Axum:
//!
//! - **Tokens**: HS256 access/refresh pairs keyed by a server secret plus a
//!   per-user salt, so rotating the salt revokes every outstanding token
//! - **Permissions**: 32-bit bitmask with founder/investor presets and
//!   any-of route requirements
//! - **Abuse Control**: per-IP fixed-window limiting with progressive blocks
//!   and a tighter limiter on credential routes
//! - **Client Identity**: forwarded headers honoured only from trusted
//!   proxy ranges, refreshed from published lists
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Rate Limit → Request ID → Trace → RequireAuth) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, auth, users)                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TokenCodec │ Permissions │ TrustedProxyResolver            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UserStore (in-memory, or any async-trait backend)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fundraise_gate::{AppState, Config, InMemoryUserStore, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config, Arc::new(InMemoryUserStore::new()))?;
//!     let app = build_router(state.clone())?;
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! JWT_SECRET=$(openssl rand -hex 32) \
//! AUTH_RATE_LIMIT_REQUESTS=5 AUTH_RATE_LIMIT_WINDOW_SECS=60 \
//! cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod password;
pub mod permissions;
pub mod routes;
pub mod state;
pub mod store;
pub mod token;
pub mod trusted_proxy;
pub mod validation;

// Re-exports for convenience
pub use config::{Config, LogFormat};
pub use error::{AppError, AppResult};
pub use permissions::{Permissions, has_any_permission, has_permission};
pub use routes::build_router;
pub use state::AppState;
pub use store::{InMemoryUserStore, UserStore};
pub use token::{TokenClass, TokenCodec, TokenPair};
pub use trusted_proxy::{TrustedProxyResolver, TrustedRangeSet};
