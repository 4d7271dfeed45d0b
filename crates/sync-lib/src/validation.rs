// ============================
// crates/sync-lib/src/validation.rs
// ============================
//! Checks applied before any request is issued.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_MESSAGE_LENGTH: usize = 2000;
const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321 SMTP limit
const MAX_PASSWORD_LENGTH: usize = 128;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
});

/// Possible validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message must have text or media")]
    EmptyMessage,

    #[error("Message exceeds {MAX_MESSAGE_LENGTH} characters")]
    MessageTooLong,

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Password is too long")]
    PasswordTooLong,
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate an outgoing message; returns the trimmed text, if any
pub fn validate_outgoing(content: Option<&str>, has_media: bool) -> ValidationResult<Option<String>> {
    let text = content.map(str::trim).filter(|t| !t.is_empty());

    if text.is_none() && !has_media {
        return Err(ValidationError::EmptyMessage);
    }

    if let Some(t) = text {
        if t.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(ValidationError::MessageTooLong);
        }
    }

    Ok(text.map(str::to_string))
}

/// Validate login credentials
pub fn validate_credentials(email: &str, password: &str) -> ValidationResult<()> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::InvalidEmail(
            "Email must not be empty".to_string(),
        ));
    }
    if email.len() > MAX_EMAIL_LENGTH || !EMAIL_REGEX.is_match(email) {
        return Err(ValidationError::InvalidEmail(email.to_string()));
    }

    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooLong);
    }

    Ok(())
}
