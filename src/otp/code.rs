//! Code generation, comparison and subject validation.

use crate::error::{Error, Result};
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

/// Digits in a verification code.
pub const CODE_LEN: usize = 6;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[1-9]\d{1,14}$").expect("phone pattern compiles")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\S+@\S+\.\S+$").expect("email pattern compiles")
});

/// Fresh code, uniform over 100000..=999999.
///
/// Drawn from the thread-local CSPRNG, which is seeded from the OS.
pub fn generate_code() -> String {
    rand::rng().random_range(100_000u32..=999_999).to_string()
}

/// Equality that inspects every byte regardless of where the first
/// difference is.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Reject anything that is not exactly six ASCII digits.
pub fn validate_code_format(code: &str) -> Result<()> {
    if code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(Error::ValidationError(format!(
            "code must be {} digits",
            CODE_LEN
        )))
    }
}

/// Trimmed E.164-style phone number.
pub fn normalize_phone(phone: &str) -> Result<String> {
    let phone = phone.trim();
    if PHONE_RE.is_match(phone) {
        Ok(phone.to_string())
    } else {
        Err(Error::ValidationError(format!(
            "invalid phone number '{}'",
            phone
        )))
    }
}

/// Trimmed, lowercased email address.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if EMAIL_RE.is_match(&email) {
        Ok(email)
    } else {
        Err(Error::ValidationError(format!("invalid email '{}'", email)))
    }
}
