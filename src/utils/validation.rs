//! Validation Utilities
//!
//! Input validation functions for user data and API requests.

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

/// Validates email address format using a comprehensive regex pattern
pub fn validate_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    regex.is_match(email)
}

/// Normalizes email address to lowercase and removes whitespace
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validates a username: letters, digits, dots, underscores and hyphens
pub fn validate_username(username: &str) -> bool {
    let trimmed = username.trim();
    if trimmed.len() < 3 || trimmed.len() > 150 {
        return false;
    }

    static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = USERNAME_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._-]+$").expect("Failed to compile username regex")
    });

    regex.is_match(trimmed)
}

/// Validates a phone number in E.164 form: leading + and 8-15 digits
pub fn validate_phone_number(phone: &str) -> bool {
    static PHONE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = PHONE_REGEX
        .get_or_init(|| Regex::new(r"^\+[1-9]\d{7,14}$").expect("Failed to compile phone regex"));

    regex.is_match(phone)
}

/// Normalizes a phone number by stripping everything except digits and a
/// leading plus sign
pub fn normalize_phone_number(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (c == '+' && i == 0) {
            normalized.push(c);
        }
    }
    normalized
}

/// Validates a display name: printable, 1-255 characters
pub fn validate_display_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.len() <= 255
}

/// Custom validator for email fields using the validator crate
pub fn email_validator(email: &str) -> Result<(), ValidationError> {
    if validate_email(email) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email"))
    }
}

/// Custom validator for username fields using the validator crate
pub fn username_validator(username: &str) -> Result<(), ValidationError> {
    if validate_username(username) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_username"))
    }
}

/// Custom validator for phone number fields using the validator crate
pub fn phone_validator(phone: &str) -> Result<(), ValidationError> {
    if validate_phone_number(phone) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_phone_number"))
    }
}

/// Custom validator for 6-digit numeric codes using the validator crate
pub fn numeric_code_validator(code: &str) -> Result<(), ValidationError> {
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_code"))
    }
}

/// Validation error messages for user-friendly responses
pub mod messages {
    pub const INVALID_EMAIL: &str = "Please enter a valid email address";
    pub const INVALID_USERNAME: &str =
        "Username must be 3-150 characters of letters, digits, dots, underscores or hyphens";
    pub const INVALID_PHONE: &str = "Phone number must be in international format, e.g. +15551234567";
    pub const INVALID_CODE: &str = "Code must be exactly 6 digits";
    pub const FIELD_REQUIRED: &str = "This field is required";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@domain.co.uk"));
        assert!(!validate_email("invalid.email"));
        assert!(!validate_email("@domain.com"));
        assert!(!validate_email("user@"));
        assert!(!validate_email(""));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  USER@EXAMPLE.COM  "), "user@example.com");
        assert_eq!(normalize_email("Test@Domain.org"), "test@domain.org");
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice"));
        assert!(validate_username("alice.b-c_d"));
        assert!(!validate_username("ab"));
        assert!(!validate_username("has spaces"));
        assert!(!validate_username(&"a".repeat(151)));
    }

    #[test]
    fn test_validate_phone_number() {
        assert!(validate_phone_number("+15551234567"));
        assert!(validate_phone_number("+442071838750"));
        assert!(!validate_phone_number("15551234567")); // missing plus
        assert!(!validate_phone_number("+0123456789")); // leading zero
        assert!(!validate_phone_number("+1555"));
        assert!(!validate_phone_number(""));
    }

    #[test]
    fn test_normalize_phone_number() {
        assert_eq!(normalize_phone_number("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(normalize_phone_number("  +44 20 7183 8750 "), "+442071838750");
    }

    #[test]
    fn test_numeric_code_validator() {
        assert!(numeric_code_validator("123456").is_ok());
        assert!(numeric_code_validator("12345").is_err());
        assert!(numeric_code_validator("12345a").is_err());
    }
}
