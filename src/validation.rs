use crate::error::{AppError, AppResult};
use crate::models::Role;

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum e-mail length (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length.
///
/// Bounds the Argon2 input so a huge body cannot burn CPU.
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Maximum length for user ids taken from the path.
pub const MAX_USER_ID_LENGTH: usize = 64;

/// Validate an e-mail address.
///
/// Rules:
/// - Between 3 and 254 characters after trimming
/// - Exactly one `@`, with a non-empty local part
/// - Domain contains a dot, does not start or end with one
/// - No whitespace or control characters
pub fn validate_email(email: &str) -> AppResult<()> {
    let email = email.trim();

    if email.is_empty() {
        return Err(AppError::BadRequest("Email cannot be empty".to_string()));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Email cannot exceed {MAX_EMAIL_LENGTH} characters"
        )));
    }

    if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AppError::BadRequest(
            "Email cannot contain whitespace".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(AppError::BadRequest("Email must contain '@'".to_string()));
    };

    if local.is_empty() || domain.contains('@') {
        return Err(AppError::BadRequest("Email address is invalid".to_string()));
    }

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(AppError::BadRequest(
            "Email domain is invalid".to_string(),
        ));
    }

    Ok(())
}

/// Validate a password's length.
///
/// Length is counted in characters, not bytes.
pub fn validate_password(password: &str) -> AppResult<()> {
    let len = password.chars().count();

    if len < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    if len > MAX_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Password cannot exceed {MAX_PASSWORD_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Parse a self-service registration role.
pub fn parse_role(role: &str) -> AppResult<Role> {
    match role.trim().to_ascii_lowercase().as_str() {
        "founder" => Ok(Role::Founder),
        "investor" => Ok(Role::Investor),
        other => Err(AppError::BadRequest(format!(
            "Unknown role '{other}'. Expected 'founder' or 'investor'"
        ))),
    }
}

/// Validate a user id taken from a path segment.
pub fn validate_user_id(id: &str) -> AppResult<()> {
    if id.is_empty() || id.len() > MAX_USER_ID_LENGTH {
        return Err(AppError::BadRequest(format!(
            "User id must be between 1 and {MAX_USER_ID_LENGTH} characters"
        )));
    }

    if let Some(pos) = id
        .chars()
        .position(|c| !(c.is_ascii_alphanumeric() || c == '-'))
    {
        return Err(AppError::BadRequest(format!(
            "User id contains invalid character at position {pos}"
        )));
    }

    Ok(())
}
