//! Client identity extraction for rate limiting.
//!
//! The limiter key is the client IP as seen through the CDN/proxy layer:
//!
//! 1. The socket peer address comes from axum's `ConnectInfo<SocketAddr>`.
//! 2. Only if that peer is inside a trusted range are forwarded headers read:
//!    the configured client-claim header (default `CF-Connecting-IP`) first,
//!    then the first hop of `X-Forwarded-For`.
//! 3. Anything unparseable falls back to the peer address.
//!
//! # The "unknown" Fallback
//!
//! When the router is served without connect info (e.g. a bare `oneshot` in
//! a test, or a misconfigured listener) there is no peer address at all.
//! Those requests share the [`UNKNOWN_IP`] key, so they are still limited
//! collectively. Watch for high "unknown" traffic in production logs.
//!
//! # Security
//!
//! A direct client can put any value in `X-Forwarded-For`. Because headers
//! from untrusted peers are ignored, rotating spoofed values does not mint
//! new limiter keys.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::debug;

use crate::trusted_proxy::TrustedProxyResolver;

/// Fallback key when no peer address is available.
pub const UNKNOWN_IP: &str = "unknown";

/// Standard proxy chain header; first entry is the original client.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Default CDN header carrying the original client address.
pub const DEFAULT_CLIENT_IP_HEADER: &str = "cf-connecting-ip";

/// Peer address of the TCP connection, if the server recorded it.
#[inline]
pub fn remote_addr<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[inline]
fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Compute the rate-limit key for a request.
///
/// Returns `Cow::Borrowed(UNKNOWN_IP)` without allocating when there is no
/// peer address.
#[inline]
pub fn client_key<B>(
    req: &Request<B>,
    resolver: &TrustedProxyResolver,
    client_ip_header: &str,
) -> Cow<'static, str> {
    let Some(remote) = remote_addr(req) else {
        debug!("No connect info on request, using shared fallback key");
        return Cow::Borrowed(UNKNOWN_IP);
    };

    let client = resolver.resolve_client_ip(
        remote,
        header_str(req, FORWARDED_FOR_HEADER),
        header_str(req, client_ip_header),
    );

    Cow::Owned(client.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::trusted_proxy::{TrustedProxyConfig, TrustedRangeSet};
    use axum::body::Body;

    fn resolver_trusting(entries: &[&str]) -> TrustedProxyResolver {
        let config = TrustedProxyConfig {
            sources: Vec::new(),
            static_ranges: entries.iter().map(|s| s.to_string()).collect(),
            ..TrustedProxyConfig::default()
        };
        TrustedProxyResolver::new(Arc::new(TrustedRangeSet::new()), &config).unwrap()
    }

    fn request(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        req
    }

    #[test]
    fn test_no_connect_info_is_unknown_and_borrowed() {
        let resolver = resolver_trusting(&[]);
        let req = Request::builder().body(Body::empty()).unwrap();

        let key = client_key(&req, &resolver, DEFAULT_CLIENT_IP_HEADER);
        assert_eq!(key, UNKNOWN_IP);
        assert!(matches!(key, Cow::Borrowed(_)));
    }

    #[test]
    fn test_untrusted_peer_ignores_headers() {
        let resolver = resolver_trusting(&["173.245.48.0/20"]);
        let req = request(
            "198.51.100.7:5000",
            &[
                ("cf-connecting-ip", "1.2.3.4"),
                ("x-forwarded-for", "5.6.7.8"),
            ],
        );

        assert_eq!(
            client_key(&req, &resolver, DEFAULT_CLIENT_IP_HEADER),
            "198.51.100.7"
        );
    }

    #[test]
    fn test_trusted_peer_uses_client_claim() {
        let resolver = resolver_trusting(&["173.245.48.0/20"]);
        let req = request(
            "173.245.48.10:443",
            &[
                ("cf-connecting-ip", "203.0.113.50"),
                ("x-forwarded-for", "5.6.7.8"),
            ],
        );

        assert_eq!(
            client_key(&req, &resolver, DEFAULT_CLIENT_IP_HEADER),
            "203.0.113.50"
        );
    }

    #[test]
    fn test_trusted_peer_falls_back_to_first_xff_hop() {
        let resolver = resolver_trusting(&["10.0.0.0/8"]);
        let req = request(
            "10.1.2.3:8080",
            &[("x-forwarded-for", "  203.0.113.9 , 70.41.3.18, 10.1.2.3")],
        );

        assert_eq!(
            client_key(&req, &resolver, DEFAULT_CLIENT_IP_HEADER),
            "203.0.113.9"
        );
    }

    #[test]
    fn test_custom_claim_header() {
        let resolver = resolver_trusting(&["10.0.0.0/8"]);
        let req = request("10.0.0.1:1", &[("x-real-ip", "192.0.2.44")]);

        assert_eq!(client_key(&req, &resolver, "x-real-ip"), "192.0.2.44");
    }

    #[test]
    fn test_unparseable_claim_falls_back_to_peer() {
        let resolver = resolver_trusting(&["10.0.0.0/8"]);
        let req = request(
            "10.0.0.1:1",
            &[("cf-connecting-ip", "not-an-ip"), ("x-forwarded-for", "")],
        );

        assert_eq!(
            client_key(&req, &resolver, DEFAULT_CLIENT_IP_HEADER),
            "10.0.0.1"
        );
    }

    #[test]
    fn test_ipv6_peer() {
        let resolver = resolver_trusting(&[]);
        let req = request("[2001:db8::1]:443", &[]);

        assert_eq!(
            client_key(&req, &resolver, DEFAULT_CLIENT_IP_HEADER),
            "2001:db8::1"
        );
    }
}
