//! Trusted reverse-proxy ranges and client identity resolution.
//!
//! The platform sits behind a CDN/reverse-proxy fleet that reports the real
//! client address in a header (`CF-Connecting-IP` by default). Any client can
//! send that header, so it is honoured only when the TCP peer itself belongs
//! to the fleet's published address ranges.
//!
//! # Range lifecycle
//!
//! ```text
//!  start ──► refresh() ──► every interval ──► refresh() ──► ... ──► cancel
//!               │                                │
//!               ▼                                ▼
//!      swap TrustedRangeSet            fetch failed: keep previous set
//! ```
//!
//! - The set is fully replaced on success, never merged.
//! - Unparseable lines are skipped and logged; they never abort a refresh.
//! - A failed fetch keeps the last known-good set instead of emptying it.
//! - Readers take a read lock only; the network fetch happens before the
//!   write lock is taken, so readers wait at most for the pointer swap.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Context;
use ipnet::IpNet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::metrics;

/// Default published range lists of the proxy provider.
pub const DEFAULT_RANGE_SOURCES: [&str; 2] = [
    "https://www.cloudflare.com/ips-v4",
    "https://www.cloudflare.com/ips-v6",
];

/// Largest range list body accepted from a source.
pub const MAX_RANGE_LIST_BYTES: usize = 1024 * 1024;

/// Parse one range entry: CIDR notation or a bare address (host prefix).
pub fn parse_range(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    if let Ok(net) = IpNet::from_str(entry) {
        return Some(net.trunc());
    }
    entry.parse::<IpAddr>().ok().map(IpNet::from)
}

/// Parse a newline-separated range list, skipping blanks and `#` comments.
///
/// Returns the parsed ranges and the number of rejected lines.
pub fn parse_range_list(body: &str) -> (Vec<IpNet>, usize) {
    let mut ranges = Vec::new();
    let mut skipped = 0;

    for line in body.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_range(line) {
            Some(net) => ranges.push(net),
            None => {
                warn!(entry = %line, "Skipping unparseable trusted proxy range");
                skipped += 1;
            }
        }
    }

    (ranges, skipped)
}

/// Process-wide set of trusted network ranges.
///
/// Single writer (the refresh task), many readers (every request).
#[derive(Debug, Default)]
pub struct TrustedRangeSet {
    ranges: RwLock<Arc<Vec<IpNet>>>,
    generation: AtomicU64,
}

impl TrustedRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `ip` falls in any current range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let ranges = self.snapshot();
        ranges.iter().any(|net| net.contains(ip))
    }

    /// Atomically replace the whole set.
    pub fn replace(&self, ranges: Vec<IpNet>) {
        let ranges = Arc::new(ranges);
        let mut guard = self.ranges.write().unwrap_or_else(PoisonError::into_inner);
        *guard = ranges;
        drop(guard);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Current ranges, cheap to clone and safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<Vec<IpNet>> {
        self.ranges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether at least one refresh has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.generation.load(Ordering::Acquire) > 0
    }
}

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct TrustedProxyConfig {
    /// URLs serving newline-separated range lists.
    pub sources: Vec<String>,
    /// Ranges trusted regardless of what the sources publish (e.g. a local
    /// load balancer).
    pub static_ranges: Vec<String>,
    /// Interval between refreshes.
    pub refresh_interval: Duration,
    /// Per-fetch timeout, independent of any request.
    pub fetch_timeout: Duration,
}

impl Default for TrustedProxyConfig {
    fn default() -> Self {
        Self {
            sources: DEFAULT_RANGE_SOURCES.iter().map(|s| (*s).to_string()).collect(),
            static_ranges: Vec::new(),
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The set was replaced with this many ranges.
    Replaced(usize),
    /// Fetching failed; the previous set is still in place.
    KeptPrevious,
    /// No sources configured.
    Skipped,
}

/// Decides whether a forwarded client-IP header may be trusted.
pub struct TrustedProxyResolver {
    ranges: Arc<TrustedRangeSet>,
    static_ranges: Vec<IpNet>,
    sources: Vec<String>,
    refresh_interval: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for TrustedProxyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustedProxyResolver")
            .field("ranges", &self.ranges.len())
            .field("static_ranges", &self.static_ranges.len())
            .field("sources", &self.sources)
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

impl TrustedProxyResolver {
    /// Build a resolver around an owned range set.
    ///
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be constructed.
    pub fn new(
        ranges: Arc<TrustedRangeSet>,
        config: &TrustedProxyConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let static_ranges = config
            .static_ranges
            .iter()
            .filter_map(|entry| {
                let parsed = parse_range(entry);
                if parsed.is_none() {
                    warn!(entry = %entry, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Ok(Self {
            ranges,
            static_ranges,
            sources: config.sources.clone(),
            refresh_interval: config.refresh_interval,
            client,
        })
    }

    pub fn ranges(&self) -> &Arc<TrustedRangeSet> {
        &self.ranges
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    /// True iff `ip` is inside a fetched or statically configured range.
    pub fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.static_ranges.iter().any(|net| net.contains(ip)) || self.ranges.contains(ip)
    }

    /// Compute the client identity for a request.
    ///
    /// Forwarded values are used only when `remote` is a trusted proxy: the
    /// provider's client claim first, then the first `X-Forwarded-For` hop.
    /// Otherwise, or if neither parses, `remote` is returned unchanged.
    pub fn resolve_client_ip(
        &self,
        remote: IpAddr,
        forwarded_for: Option<&str>,
        forwarded_claim: Option<&str>,
    ) -> IpAddr {
        if !self.is_trusted(&remote) {
            if forwarded_claim.is_some() || forwarded_for.is_some() {
                debug!(remote = %remote, "Ignoring forwarded client IP from untrusted peer");
            }
            return remote;
        }

        let claimed = forwarded_claim
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
            .or_else(|| {
                forwarded_for
                    .and_then(|v| v.split(',').next())
                    .and_then(|v| v.trim().parse::<IpAddr>().ok())
            });

        claimed.unwrap_or(remote)
    }

    /// Fetch every source and swap the range set.
    ///
    /// Any source failing (or all sources together yielding nothing) keeps
    /// the previous set.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.sources.is_empty() {
            return RefreshOutcome::Skipped;
        }

        let mut fetched = Vec::new();
        let mut skipped = 0;

        for source in &self.sources {
            match self.fetch_source(source).await {
                Ok(body) => {
                    let (ranges, rejected) = parse_range_list(&body);
                    fetched.extend(ranges);
                    skipped += rejected;
                }
                Err(e) => {
                    warn!(
                        source = %source,
                        error = ?e,
                        kept = self.ranges.len(),
                        "Trusted proxy range fetch failed, keeping previous ranges"
                    );
                    metrics::record_proxy_refresh("failed");
                    return RefreshOutcome::KeptPrevious;
                }
            }
        }

        if fetched.is_empty() {
            warn!(
                skipped,
                "Trusted proxy sources returned no usable ranges, keeping previous ranges"
            );
            metrics::record_proxy_refresh("empty");
            return RefreshOutcome::KeptPrevious;
        }

        let count = fetched.len();
        self.ranges.replace(fetched);
        metrics::record_proxy_refresh("replaced");
        metrics::set_trusted_ranges(count);
        info!(count, skipped, "Trusted proxy ranges refreshed");

        RefreshOutcome::Replaced(count)
    }

    async fn fetch_source(&self, url: &str) -> anyhow::Result<String> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;

        if let Some(len) = response.content_length()
            && len > MAX_RANGE_LIST_BYTES as u64
        {
            anyhow::bail!("{url} announced {len} bytes, limit is {MAX_RANGE_LIST_BYTES}");
        }

        // Content-Length may be absent or wrong; count what actually arrives.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("reading body from {url} failed"))?
        {
            if body.len() + chunk.len() > MAX_RANGE_LIST_BYTES {
                anyhow::bail!("{url} body exceeds {MAX_RANGE_LIST_BYTES} bytes");
            }
            body.extend_from_slice(&chunk);
        }

        String::from_utf8(body).with_context(|| format!("{url} body is not UTF-8"))
    }

    /// Spawn the periodic refresh task.
    ///
    /// Refreshes once immediately, then every `refresh_interval` until
    /// `cancel` fires.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) {
        let resolver = Arc::clone(self);

        tracker.spawn(async move {
            resolver.refresh().await;

            let mut ticker = interval(resolver.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Trusted proxy refresh task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        resolver.refresh().await;
                    }
                }
            }

            debug!("Trusted proxy refresh task shutting down");
        });
    }
}
