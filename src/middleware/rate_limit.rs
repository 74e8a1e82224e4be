//! Per-client rate limiting with progressive blocking.
//!
//! # Algorithm
//!
//! Each client key (see [`super::ip::client_key`]) owns a fixed window
//! counter plus a violation history:
//!
//! - Up to `requests` requests are admitted per `window`.
//! - The first request over the limit starts a block of
//!   `block_period * min(violations, max_blocks)`, so repeat offenders wait
//!   longer each time until the cap is reached.
//! - While blocked, every request is rejected without touching the counter.
//! - After the block ends, the next request opens a fresh window.
//! - Violation history is forgotten once the client has been quiet for
//!   `block_period * max_blocks` past its last block.
//!
//! Idle entries are swept lazily, at most once per window, by whichever
//! request happens to take the write lock.
//!
//! # Concurrency
//!
//! The table sits behind a `std::sync::RwLock`. A currently blocked client
//! is answered under the read lock; all state transitions take the write
//! lock and never hold it across an `.await`.
//!
//! # Response Headers
//!
//! On rejection (429):
//! - `Retry-After`: seconds until the block ends
//! - `X-RateLimit-Limit`: configured requests per window
//! - `X-RateLimit-Remaining`: always `0`

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::client_key;
use crate::error::AppError;
use crate::metrics;
use crate::trusted_proxy::TrustedProxyResolver;

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Request quota cannot be zero.
    ZeroRequests,
    /// Window cannot be zero.
    ZeroWindow,
    /// A zero block would end on the same instant it starts.
    ZeroBlockPeriod,
    /// At least one block step is required.
    ZeroMaxBlocks,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroRequests => write!(
                f,
                "request quota must be greater than 0; leave the layer off for no limiting"
            ),
            RateLimitError::ZeroWindow => write!(f, "window must be greater than 0"),
            RateLimitError::ZeroBlockPeriod => write!(f, "block period must be greater than 0"),
            RateLimitError::ZeroMaxBlocks => write!(f, "max_blocks must be at least 1"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per window.
    pub requests: u32,
    /// Counting window.
    pub window: Duration,
    /// Base block length, multiplied by the violation count.
    pub block_period: Duration,
    /// Cap on the block multiplier.
    pub max_blocks: u32,
}

impl RateLimiterConfig {
    fn validate(&self) -> Result<(), RateLimitError> {
        if self.requests == 0 {
            return Err(RateLimitError::ZeroRequests);
        }
        if self.window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        if self.block_period.is_zero() {
            return Err(RateLimitError::ZeroBlockPeriod);
        }
        if self.max_blocks == 0 {
            return Err(RateLimitError::ZeroMaxBlocks);
        }
        Ok(())
    }

    /// Block length for the `violations`-th offence.
    fn penalty(&self, violations: u32) -> Duration {
        self.block_period
            .checked_mul(violations.min(self.max_blocks))
            .unwrap_or(Duration::MAX)
    }

    /// Quiet time after a block before history is dropped.
    fn memory(&self) -> Duration {
        self.penalty(self.max_blocks)
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Blocked { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Visitor {
    window_start: Instant,
    count: u32,
    violations: u32,
    blocked_until: Option<Instant>,
    /// Violation history is dropped at or after this instant.
    forgive_at: Instant,
}

impl Visitor {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 1,
            violations: 0,
            blocked_until: None,
            forgive_at: now,
        }
    }

    fn remaining_block(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    fn restart_window(&mut self, now: Instant) {
        self.window_start = now;
        self.count = 1;
        self.blocked_until = None;
        if now >= self.forgive_at {
            self.violations = 0;
        }
    }

    fn is_stale(&self, now: Instant, window: Duration) -> bool {
        self.remaining_block(now).is_none()
            && now.saturating_duration_since(self.window_start) >= window
            && now >= self.forgive_at
    }
}

struct VisitorTable {
    visitors: HashMap<String, Visitor>,
    last_sweep: Instant,
}

/// Keyed fixed-window limiter with progressive blocking.
pub struct RateLimiter {
    name: &'static str,
    config: RateLimiterConfig,
    table: RwLock<VisitorTable>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("tracked", &self.tracked())
            .finish()
    }
}

impl RateLimiter {
    /// Create a named limiter. The name labels logs and metrics.
    ///
    /// # Errors
    ///
    /// Rejects a zero quota, zero window or zero `max_blocks`.
    pub fn new(name: &'static str, config: RateLimiterConfig) -> Result<Self, RateLimitError> {
        config.validate()?;
        Ok(Self {
            name,
            config,
            table: RwLock::new(VisitorTable {
                visitors: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .visitors
            .len()
    }

    /// Record a request from `key` and decide whether to admit it.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        {
            let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(retry_after) = table
                .visitors
                .get(key)
                .and_then(|v| v.remaining_block(now))
            {
                return Decision::Blocked { retry_after };
            }
        }

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        self.maybe_sweep(&mut table, now);

        let Some(visitor) = table.visitors.get_mut(key) else {
            table.visitors.insert(key.to_string(), Visitor::new(now));
            return Decision::Allowed;
        };

        // Re-checked: another request may have blocked this key between locks.
        if let Some(retry_after) = visitor.remaining_block(now) {
            return Decision::Blocked { retry_after };
        }

        let block_ended = visitor.blocked_until.is_some();
        let window_elapsed =
            now.saturating_duration_since(visitor.window_start) >= self.config.window;
        if block_ended || window_elapsed {
            visitor.restart_window(now);
            return Decision::Allowed;
        }

        visitor.count = visitor.count.saturating_add(1);
        if visitor.count <= self.config.requests {
            return Decision::Allowed;
        }

        visitor.violations = visitor.violations.saturating_add(1);
        let penalty = self.config.penalty(visitor.violations);
        let until = now.checked_add(penalty).unwrap_or(now + self.config.window);
        visitor.blocked_until = Some(until);
        visitor.forgive_at = until
            .checked_add(self.config.memory())
            .unwrap_or(until);

        warn!(
            limiter = self.name,
            key = %key,
            violations = visitor.violations,
            block_secs = penalty.as_secs(),
            "Client exceeded rate limit, blocking"
        );

        Decision::Blocked {
            retry_after: penalty,
        }
    }

    fn maybe_sweep(&self, table: &mut VisitorTable, now: Instant) {
        if now.saturating_duration_since(table.last_sweep) < self.config.window {
            return;
        }
        table.last_sweep = now;

        let before = table.visitors.len();
        let window = self.config.window;
        table.visitors.retain(|_, v| !v.is_stale(now, window));

        let after = table.visitors.len();
        if after < before {
            debug!(
                limiter = self.name,
                evicted = before - after,
                remaining = after,
                "Swept idle rate limit entries"
            );
        }
        metrics::set_tracked_visitors(self.name, after);
    }
}

/// Tower layer applying a [`RateLimiter`] keyed by client IP.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(RateLimiter::new("auth", config)?);
/// let app = Router::new()
///     .route("/auth/login", post(login))
///     .layer(RateLimitLayer::new(limiter, resolver, "cf-connecting-ip"));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
    resolver: Arc<TrustedProxyResolver>,
    client_ip_header: Arc<str>,
}

impl RateLimitLayer {
    pub fn new(
        limiter: Arc<RateLimiter>,
        resolver: Arc<TrustedProxyResolver>,
        client_ip_header: &str,
    ) -> Self {
        Self {
            limiter,
            resolver,
            client_ip_header: Arc::from(client_ip_header),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            resolver: self.resolver.clone(),
            client_ip_header: self.client_ip_header.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    resolver: Arc<TrustedProxyResolver>,
    client_ip_header: Arc<str>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let key = client_key(&req, &self.resolver, &self.client_ip_header);
        let decision = self.limiter.check(&key);
        let mut inner = self.inner.clone();

        match decision {
            Decision::Allowed => Box::pin(async move { inner.call(req).await }),
            Decision::Blocked { retry_after } => {
                debug!(
                    limiter = self.limiter.name(),
                    client_ip = %key,
                    path = %req.uri().path(),
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limited request rejected"
                );
                metrics::record_rate_limited(self.limiter.name());

                let response = AppError::RateLimited {
                    retry_after,
                    limit: self.limiter.config().requests,
                }
                .into_response();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}
