//! Argon2id password hashing.
//!
//! Hashes are stored as PHC strings (`$argon2id$v=19$...`), so parameters
//! travel with the hash. Both hashing and verification are CPU-bound and run
//! on the blocking pool.

use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tracing::error;

use crate::error::{AppError, AppResult};

/// Hash compared against when the e-mail is unknown, so a miss costs the
/// same as a wrong password.
static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();

fn hash_blocking(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())?;
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

fn verify_blocking(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!(error = %e, "Stored password hash is not a valid PHC string");
            false
        }
    }
}

/// Hash `password` into a PHC string.
///
/// # Errors
///
/// `AppError::Internal` if hashing fails or the blocking task is lost.
pub async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash_blocking(&password))
        .await
        .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Check `password` against a stored hash.
///
/// With `hash == None` a throwaway hash is verified instead and the result
/// is always `false`.
pub async fn verify_password(password: String, hash: Option<String>) -> bool {
    let outcome = tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_blocking(&password, &hash),
        None => {
            let dummy = DUMMY_HASH.get_or_init(|| hash_blocking("dummy-password").ok());
            if let Some(dummy) = dummy {
                let _ = verify_blocking(&password, dummy);
            }
            false
        }
    })
    .await;

    outcome.unwrap_or_else(|e| {
        error!(error = %e, "Password verification task failed");
        false
    })
}
