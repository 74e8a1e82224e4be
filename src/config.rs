//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables (or a `.env` file)
//! with development defaults, except `JWT_SECRET`, which has no default.
//!
//! # Security Configuration
//!
//! - `JWT_SECRET`: Server half of the token signing key (at least 32 bytes)
//! - `TRUSTED_PROXIES`: Comma-separated CIDRs always trusted as proxies
//! - `TRUSTED_PROXY_SOURCES`: URLs of published CDN range lists; set to an
//!   empty string to disable fetching
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins
//!
//! # Rate Limiting
//!
//! Two limiters share one design. `API_RATE_LIMIT_*` applies to every
//! route, `AUTH_RATE_LIMIT_*` additionally to `/auth/*`. Setting
//! `*_REQUESTS=0` disables that limiter.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::ip::DEFAULT_CLIENT_IP_HEADER;
use crate::middleware::rate_limit::RateLimiterConfig;
use crate::trusted_proxy::DEFAULT_RANGE_SOURCES;

/// Shortest accepted `JWT_SECRET`, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Token signing secret; never printed.
#[derive(Clone)]
pub struct JwtSecret(String);

impl JwtSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JwtSecret(<redacted>)")
    }
}

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl LogFormat {
    /// Read `LOG_FORMAT`, falling back to text on absence or garbage.
    ///
    /// Called before [`Config::from_env`] so configuration errors are
    /// logged in the requested format.
    pub fn from_env() -> Self {
        env::var("LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 64KB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Token Configuration
    // =========================================================================
    /// Server half of the signing key (required)
    pub jwt_secret: JwtSecret,

    /// Access token lifetime (default: 15 minutes)
    pub access_token_ttl: Duration,

    /// Refresh token lifetime (default: 7 days)
    pub refresh_token_ttl: Duration,

    /// Upper bound on the salt lookup when the client sent no deadline
    /// (default: 2 seconds)
    pub store_timeout: Duration,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Limiter applied to every route (default: 300/min, 1 min block, x10)
    pub api_rate_limit: RateLimiterConfig,

    /// Limiter applied to `/auth/*` (default: 10/min, 5 min block, x12)
    pub auth_rate_limit: RateLimiterConfig,

    // =========================================================================
    // Trusted Proxy Configuration
    // =========================================================================
    /// URLs serving newline-separated CIDR lists (default: Cloudflare v4/v6)
    pub trusted_proxy_sources: Vec<String>,

    /// Interval between range refreshes (default: 24 hours)
    pub trusted_proxy_refresh_interval: Duration,

    /// Per-fetch timeout for range lists (default: 10 seconds)
    pub trusted_proxy_fetch_timeout: Duration,

    /// CIDRs trusted regardless of fetched lists, e.g. a local load balancer.
    ///
    /// Common values:
    /// - Kubernetes: "10.0.0.0/8" (pod network)
    /// - Docker: "172.17.0.0/16" (default bridge network)
    /// - Localhost: "127.0.0.0/8,::1/128"
    pub trusted_proxies: Vec<String>,

    /// Header carrying the original client IP from a trusted proxy
    /// (default: "cf-connecting-ip")
    pub client_ip_header: String,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Allowed CORS origins; "*" allows all (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if `JWT_SECRET` is missing or any value
    /// fails to parse or validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .map(JwtSecret::new)
            .ok_or_else(|| AppError::ConfigError("JWT_SECRET must be set".to_string()))?;

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 64 * 1024)?,

            // Tokens
            jwt_secret,
            access_token_ttl: Duration::from_secs(Self::parse_env("ACCESS_TOKEN_TTL_SECS", 900)?),
            refresh_token_ttl: Duration::from_secs(Self::parse_env(
                "REFRESH_TOKEN_TTL_SECS",
                7 * 24 * 60 * 60,
            )?),
            store_timeout: Duration::from_millis(Self::parse_env("STORE_TIMEOUT_MS", 2000)?),

            // Rate limiting
            api_rate_limit: Self::parse_rate_limit("API", defaults::API_RATE_LIMIT)?,
            auth_rate_limit: Self::parse_rate_limit("AUTH", defaults::AUTH_RATE_LIMIT)?,

            // Trusted proxies
            trusted_proxy_sources: Self::parse_proxy_sources(),
            trusted_proxy_refresh_interval: Duration::from_secs(Self::parse_env(
                "TRUSTED_PROXY_REFRESH_SECS",
                24 * 60 * 60,
            )?),
            trusted_proxy_fetch_timeout: Duration::from_secs(Self::parse_env(
                "TRUSTED_PROXY_FETCH_TIMEOUT_SECS",
                10,
            )?),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES"),
            client_ip_header: env::var("CLIENT_IP_HEADER")
                .map(|h| h.trim().to_ascii_lowercase())
                .ok()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_CLIENT_IP_HEADER.to_string()),

            // Security
            cors_allowed_origins: Self::parse_cors_origins(),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: LogFormat::from_env(),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.expose().len() < MIN_JWT_SECRET_LEN {
            return Err(AppError::ConfigError(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }

        if self.access_token_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "ACCESS_TOKEN_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.refresh_token_ttl < self.access_token_ttl {
            return Err(AppError::ConfigError(format!(
                "REFRESH_TOKEN_TTL_SECS ({:?}) must be >= ACCESS_TOKEN_TTL_SECS ({:?})",
                self.refresh_token_ttl, self.access_token_ttl
            )));
        }

        if self.store_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "STORE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        for (prefix, limit) in [("API", &self.api_rate_limit), ("AUTH", &self.auth_rate_limit)] {
            if limit.requests == 0 {
                continue;
            }
            if limit.window.is_zero() {
                return Err(AppError::ConfigError(format!(
                    "{prefix}_RATE_LIMIT_WINDOW_SECS must be greater than 0"
                )));
            }
            if limit.block_period.is_zero() {
                return Err(AppError::ConfigError(format!(
                    "{prefix}_RATE_LIMIT_BLOCK_SECS must be greater than 0"
                )));
            }
            if limit.max_blocks == 0 {
                return Err(AppError::ConfigError(format!(
                    "{prefix}_RATE_LIMIT_MAX_BLOCKS must be greater than 0"
                )));
            }
        }

        if self.trusted_proxy_refresh_interval.is_zero() {
            return Err(AppError::ConfigError(
                "TRUSTED_PROXY_REFRESH_SECS must be greater than 0".to_string(),
            ));
        }

        if axum::http::HeaderName::from_bytes(self.client_ip_header.as_bytes()).is_err() {
            return Err(AppError::ConfigError(format!(
                "CLIENT_IP_HEADER '{}' is not a valid header name",
                self.client_ip_header
            )));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// General limiter settings, or `None` when disabled.
    pub fn api_rate_limit(&self) -> Option<RateLimiterConfig> {
        Some(self.api_rate_limit).filter(|l| l.requests > 0)
    }

    /// Auth-route limiter settings, or `None` when disabled.
    pub fn auth_rate_limit(&self) -> Option<RateLimiterConfig> {
        Some(self.auth_rate_limit).filter(|l| l.requests > 0)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Read `{prefix}_RATE_LIMIT_{REQUESTS,WINDOW_SECS,BLOCK_SECS,MAX_BLOCKS}`.
    fn parse_rate_limit(prefix: &str, default: RateLimiterConfig) -> AppResult<RateLimiterConfig> {
        Ok(RateLimiterConfig {
            requests: Self::parse_env(&format!("{prefix}_RATE_LIMIT_REQUESTS"), default.requests)?,
            window: Duration::from_secs(Self::parse_env(
                &format!("{prefix}_RATE_LIMIT_WINDOW_SECS"),
                default.window.as_secs(),
            )?),
            block_period: Duration::from_secs(Self::parse_env(
                &format!("{prefix}_RATE_LIMIT_BLOCK_SECS"),
                default.block_period.as_secs(),
            )?),
            max_blocks: Self::parse_env(
                &format!("{prefix}_RATE_LIMIT_MAX_BLOCKS"),
                default.max_blocks,
            )?,
        })
    }

    /// Unset means the default CDN lists; an empty value disables fetching.
    fn parse_proxy_sources() -> Vec<String> {
        match env::var("TRUSTED_PROXY_SOURCES") {
            Ok(_) => Self::parse_list("TRUSTED_PROXY_SOURCES"),
            Err(_) => DEFAULT_RANGE_SOURCES.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Parse a comma-separated list, dropping blanks.
    fn parse_list(name: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

mod defaults {
    use std::time::Duration;

    use crate::middleware::rate_limit::RateLimiterConfig;

    pub const API_RATE_LIMIT: RateLimiterConfig = RateLimiterConfig {
        requests: 300,
        window: Duration::from_secs(60),
        block_period: Duration::from_secs(60),
        max_blocks: 10,
    };

    pub const AUTH_RATE_LIMIT: RateLimiterConfig = RateLimiterConfig {
        requests: 10,
        window: Duration::from_secs(60),
        block_period: Duration::from_secs(300),
        max_blocks: 12,
    };
}

/// Default configuration for testing and development.
///
/// Fetching is disabled and the secret is a fixed development value.
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 64 * 1024,
            // Tokens
            jwt_secret: JwtSecret::new("development-only-secret-change-me-0123456789"),
            access_token_ttl: Duration::from_secs(900),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            store_timeout: Duration::from_secs(2),
            // Rate limiting
            api_rate_limit: defaults::API_RATE_LIMIT,
            auth_rate_limit: defaults::AUTH_RATE_LIMIT,
            // Trusted proxies
            trusted_proxy_sources: Vec::new(),
            trusted_proxy_refresh_interval: Duration::from_secs(24 * 60 * 60),
            trusted_proxy_fetch_timeout: Duration::from_secs(10),
            trusted_proxies: Vec::new(),
            client_ip_header: DEFAULT_CLIENT_IP_HEADER.to_string(),
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 9090,
        }
    }
}
