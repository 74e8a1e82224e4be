//! Public API tests for token issuance, verification and revocation.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chrono::Utc;
use fundraise_gate::permissions::{Permissions, has_any_permission, has_permission};
use fundraise_gate::store::generate_salt;
use fundraise_gate::token::{TokenClass, TokenCodec, TokenError};

const SECRET: &str = "integration-secret-with-enough-bytes-0000";

fn codec() -> TokenCodec {
    TokenCodec::new(
        SECRET,
        Duration::from_secs(900),
        Duration::from_secs(7 * 24 * 3600),
    )
}

#[test]
fn test_pair_shares_subject_and_snapshot() {
    let codec = codec();
    let salt = generate_salt();

    let pair = codec
        .issue("user-1", Permissions::FOUNDER.bits(), &salt)
        .unwrap();

    let access = codec.verify(&pair.access_token, &salt).unwrap();
    let refresh = codec.verify(&pair.refresh_token, &salt).unwrap();

    assert_eq!(access.sub, "user-1");
    assert_eq!(refresh.sub, "user-1");
    assert_eq!(access.perms, refresh.perms);
    assert_eq!(access.typ, TokenClass::Access);
    assert_eq!(refresh.typ, TokenClass::Refresh);
    assert!(refresh.exp > access.exp);
}

#[test]
fn test_rotated_salt_revokes_both_tokens() {
    let codec = codec();
    let old_salt = generate_salt();
    let pair = codec.issue("user-2", 0, &old_salt).unwrap();

    let new_salt = generate_salt();
    assert_ne!(old_salt, new_salt);

    for token in [&pair.access_token, &pair.refresh_token] {
        assert!(matches!(
            codec.verify(token, &new_salt),
            Err(TokenError::InvalidSignature)
        ));
    }
}

#[test]
fn test_different_server_secret_rejects() {
    let salt = generate_salt();
    let pair = codec().issue("user-3", 0, &salt).unwrap();

    let other = TokenCodec::new(
        "a-completely-different-secret-value-000",
        Duration::from_secs(900),
        Duration::from_secs(900),
    );

    assert!(other.verify(&pair.access_token, &salt).is_err());
}

#[test]
fn test_expired_token_rejected() {
    let codec = codec();
    let salt = generate_salt();
    let issued = Utc::now() - chrono::Duration::hours(1);

    let pair = codec.issue_at("user-4", 0, &salt, issued).unwrap();

    assert!(matches!(
        codec.verify(&pair.access_token, &salt),
        Err(TokenError::Expired)
    ));
    // The refresh token is still inside its lifetime
    assert!(codec.verify(&pair.refresh_token, &salt).is_ok());
}

#[test]
fn test_unverified_parse_names_the_subject_only() {
    let codec = codec();
    let pair = codec.issue("user-5", 7, &generate_salt()).unwrap();

    let claims = codec.parse_unverified(&pair.access_token).unwrap();
    assert_eq!(claims.sub, "user-5");

    assert!(matches!(
        codec.parse_unverified("definitely-not-a-token"),
        Err(TokenError::Malformed(_))
    ));
}

#[test]
fn test_snapshot_permission_checks() {
    let codec = codec();
    let salt = generate_salt();
    let bits = (Permissions::INVESTOR | Permissions::MANAGE_TEAM).bits();

    let claims = codec
        .verify(&codec.issue("user-6", bits, &salt).unwrap().access_token, &salt)
        .unwrap();

    assert!(has_permission(claims.perms, Permissions::MANAGE_TEAM));
    assert!(!has_permission(claims.perms, Permissions::ADMIN));
    assert!(has_any_permission(
        claims.perms,
        [Permissions::ADMIN, Permissions::MANAGE_TEAM]
    ));
    assert!(!has_any_permission(claims.perms, [Permissions::ADMIN]));
}
