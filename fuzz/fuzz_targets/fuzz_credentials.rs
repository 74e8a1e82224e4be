//! Fuzz testing for untrusted credential input.
//!
//! Everything here is reachable by an unauthenticated client: the bearer
//! token parsed before any salt lookup, and the registration fields. None
//! of it may panic.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_credentials -- -max_total_time=60
//! ```

#![no_main]

use std::time::Duration;

use fundraise_gate::token::TokenCodec;
use fundraise_gate::validation::{parse_role, validate_email, validate_password, validate_user_id};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let codec = TokenCodec::new(
        "fuzzing-secret-long-enough-for-hs256-keys",
        Duration::from_secs(900),
        Duration::from_secs(3600),
    );
    let _ = codec.parse_unverified(s);
    let _ = codec.verify(s, b"fuzz-salt");

    let _ = validate_email(s);
    let _ = validate_password(s);
    let _ = validate_user_id(s);
    let _ = parse_role(s);
});
