//! Client-supplied request deadlines.
//!
//! A client may send `X-Request-Timeout: <ms>` to say how long it is willing
//! to wait. The value is stamped with the arrival time and stored in request
//! extensions, so downstream work (the salt lookup in [`super::auth`]) can
//! ask for the budget that is *left* rather than the budget that was asked
//! for.
//!
//! Values outside `100ms..=5min` or that do not parse are ignored and the
//! server default applies. The server default is also the ceiling: a client
//! budget only ever shortens it.

use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

/// Smallest accepted client deadline.
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Largest accepted client deadline.
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// Deadline recorded when the request entered the stack.
#[derive(Debug, Clone, Copy)]
pub struct RequestDeadline {
    budget: Duration,
    expires_at: Instant,
}

impl RequestDeadline {
    /// Deadline `ms` milliseconds after `now`, or `None` if out of bounds.
    pub fn starting_at(ms: u64, now: Instant) -> Option<Self> {
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&ms) {
            return None;
        }
        let budget = Duration::from_millis(ms);
        Some(Self {
            budget,
            expires_at: now + budget,
        })
    }

    /// Budget the client asked for.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the client gives up; zero once passed.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

fn parse_header(request: &Request) -> Option<u64> {
    let raw = request.headers().get(REQUEST_TIMEOUT_HEADER)?;
    let Ok(text) = raw.to_str() else {
        debug!("Non-ASCII X-Request-Timeout header, ignoring");
        return None;
    };
    match text.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(_) => {
            debug!(value = text, "Invalid X-Request-Timeout header value, ignoring");
            None
        }
    }
}

/// Middleware storing a [`RequestDeadline`] when the header is valid.
pub async fn extract_request_deadline(mut request: Request, next: Next) -> Response {
    if let Some(ms) = parse_header(&request) {
        match RequestDeadline::starting_at(ms, Instant::now()) {
            Some(deadline) => {
                request.extensions_mut().insert(deadline);
            }
            None => debug!(
                timeout_ms = ms,
                min = MIN_REQUEST_TIMEOUT_MS,
                max = MAX_REQUEST_TIMEOUT_MS,
                "Client timeout outside allowed range, ignoring"
            ),
        }
    }

    next.run(request).await
}

/// Budget lookup on anything carrying request extensions.
pub trait RequestDeadlineExt {
    /// Remaining client budget capped at `default`, or `default` if none
    /// was given. A client can shorten the bound but never extend it.
    fn remaining_budget(&self, default: Duration) -> Duration;
}

impl<B> RequestDeadlineExt for axum::http::Request<B> {
    fn remaining_budget(&self, default: Duration) -> Duration {
        self.extensions()
            .get::<RequestDeadline>()
            .map_or(default, |d| d.remaining_at(Instant::now()).min(default))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_bounds() {
        let now = Instant::now();
        assert!(RequestDeadline::starting_at(MIN_REQUEST_TIMEOUT_MS, now).is_some());
        assert!(RequestDeadline::starting_at(MAX_REQUEST_TIMEOUT_MS, now).is_some());
        assert!(RequestDeadline::starting_at(MIN_REQUEST_TIMEOUT_MS - 1, now).is_none());
        assert!(RequestDeadline::starting_at(MAX_REQUEST_TIMEOUT_MS + 1, now).is_none());
        assert!(RequestDeadline::starting_at(0, now).is_none());
    }

    #[test]
    fn test_remaining_shrinks_and_saturates() {
        let now = Instant::now();
        let deadline = RequestDeadline::starting_at(500, now).unwrap();

        assert_eq!(deadline.budget(), Duration::from_millis(500));
        assert_eq!(deadline.remaining_at(now), Duration::from_millis(500));
        assert_eq!(
            deadline.remaining_at(now + Duration::from_millis(200)),
            Duration::from_millis(300)
        );
        assert_eq!(
            deadline.remaining_at(now + Duration::from_secs(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_remaining_budget_defaults_without_deadline() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(
            req.remaining_budget(Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_remaining_budget_uses_deadline() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(RequestDeadline::starting_at(1_000, Instant::now()).unwrap());

        let budget = req.remaining_budget(Duration::from_secs(60));
        assert!(budget <= Duration::from_millis(1_000));
        assert!(budget > Duration::from_millis(500));
    }

    #[test]
    fn test_remaining_budget_never_exceeds_default() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut().insert(
            RequestDeadline::starting_at(MAX_REQUEST_TIMEOUT_MS, Instant::now()).unwrap(),
        );

        assert_eq!(
            req.remaining_budget(Duration::from_secs(2)),
            Duration::from_secs(2)
        );
    }
}
