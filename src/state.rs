//! Shared application state for Axum handlers.
//!
//! Holds the pieces every request path needs:
//!
//! - **Configuration**: runtime configuration access
//! - **User store**: salt, bitmask and credential lookups
//! - **Token codec**: issuing and verifying salted token pairs
//! - **Trusted proxy resolver**: CDN ranges used to resolve client IPs
//!
//! # Structured Concurrency
//!
//! The range refresh runs as a background task tracked by a
//! `tokio_util::task::TaskTracker` and stopped through a `CancellationToken`.
//! Call `shutdown()` to stop it before exit.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::store::UserStore;
use crate::token::TokenCodec;
use crate::trusted_proxy::{TrustedProxyConfig, TrustedProxyResolver, TrustedRangeSet};

/// Shared application state for Axum handlers.
///
/// Cloned for each request handler; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config, store)?;
/// // ... serve ...
/// state.shutdown().await;  // Wait for the refresh task to finish
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// User record access
    pub store: Arc<dyn UserStore>,
    /// Token issuing and verification
    pub tokens: Arc<TokenCodec>,
    /// Client IP resolution through trusted proxies
    pub proxies: Arc<TrustedProxyResolver>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state from configuration and a store backend.
    ///
    /// # Background Tasks
    ///
    /// When range sources are configured, spawns the refresh task, which
    /// fetches once immediately and then every
    /// `trusted_proxy_refresh_interval`.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` if the range-fetch HTTP client cannot be built.
    pub fn new(config: Config, store: Arc<dyn UserStore>) -> AppResult<Self> {
        let tokens = TokenCodec::new(
            config.jwt_secret.expose().as_bytes(),
            config.access_token_ttl,
            config.refresh_token_ttl,
        );

        let proxy_config = TrustedProxyConfig {
            sources: config.trusted_proxy_sources.clone(),
            static_ranges: config.trusted_proxies.clone(),
            refresh_interval: config.trusted_proxy_refresh_interval,
            fetch_timeout: config.trusted_proxy_fetch_timeout,
        };
        let proxies = TrustedProxyResolver::new(Arc::new(TrustedRangeSet::new()), &proxy_config)
            .map_err(|e| AppError::ConfigError(format!("Failed to build range fetcher: {e}")))?;

        let state = Self {
            config: Arc::new(config),
            store,
            tokens: Arc::new(tokens),
            proxies: Arc::new(proxies),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.proxies.has_sources() {
            state
                .proxies
                .spawn_refresh_task(&state.task_tracker, state.cancellation_token.clone());
        } else {
            info!("No trusted proxy sources configured, range refresh disabled");
        }

        Ok(state)
    }

    /// Whether the service can make correct client-IP decisions.
    ///
    /// True once a range set is loaded, or when fetching is disabled.
    pub fn is_ready(&self) -> bool {
        !self.proxies.has_sources() || self.proxies.ranges().is_loaded()
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals cancellation, closes the tracker, then waits for every task.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryUserStore;

    #[tokio::test]
    async fn test_ready_without_sources() {
        let state = AppState::new(Config::default(), Arc::new(InMemoryUserStore::new())).unwrap();
        assert!(state.is_ready());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_not_ready_until_ranges_load() {
        // Nothing listens on port 9; the fetch fails and the set stays empty.
        let config = Config {
            trusted_proxy_sources: vec!["http://127.0.0.1:9/ips-v4".to_string()],
            trusted_proxy_fetch_timeout: std::time::Duration::from_millis(200),
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(InMemoryUserStore::new())).unwrap();

        assert!(!state.is_ready());
        state.shutdown().await;
        assert!(!state.is_ready());
    }
}
