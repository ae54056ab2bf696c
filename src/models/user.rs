//! User Model
//!
//! Core user data structures and type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User representation for external API responses
///
/// This struct represents a user account without sensitive information like
/// the password hash. All datetime fields use UTC.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique identifier for the user
    pub id: Uuid,

    /// User's email address (unique, normalized)
    pub email: String,

    /// User's login name (unique, case-insensitive)
    pub username: String,

    /// Optional preferred display name
    pub display_name: Option<String>,

    /// Whether the account can log in
    pub is_active: bool,

    /// Whether the account has been administratively disabled
    pub is_disabled: bool,

    /// Whether the user's email address has been verified
    pub email_verified: bool,

    /// Optional phone number in E.164 format
    pub phone_number: Option<String>,

    /// Whether the phone number has been verified by SMS code
    pub phone_verified: bool,

    /// Timestamp when the user account was created
    pub created_at: DateTime<Utc>,

    /// Timestamp when the user account was last modified
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name to show in UI: the explicit display name when set, otherwise the
    /// username.
    pub fn display_label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }
}

/// Internal user representation including the password hash
///
/// Used by database operations that need the hash. Never exposed in API
/// responses.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct UserWithSecrets {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub display_name: Option<String>,

    /// bcrypt hashed password (absent for social-only accounts)
    pub password_hash: Option<String>,

    pub is_active: bool,
    pub is_disabled: bool,
    pub email_verified: bool,
    pub phone_number: Option<String>,
    pub phone_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserWithSecrets> for User {
    /// Strips the password hash so it cannot leak into API responses.
    fn from(user: UserWithSecrets) -> Self {
        User {
            id: user.id,
            email: user.email,
            username: user.username,
            display_name: user.display_name,
            is_active: user.is_active,
            is_disabled: user.is_disabled,
            email_verified: user.email_verified,
            phone_number: user.phone_number,
            phone_verified: user.phone_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user_with_secrets() -> UserWithSecrets {
        UserWithSecrets {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            username: "tester".to_string(),
            display_name: Some("Test User".to_string()),
            password_hash: Some("hashed_password".to_string()),
            is_active: true,
            is_disabled: false,
            email_verified: true,
            phone_number: None,
            phone_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_user_with_secrets_conversion() {
        let user: User = sample_user_with_secrets().into();

        assert_eq!(user.email, "test@example.com");
        assert_eq!(user.username, "tester");
        assert!(user.email_verified);
        // The serialized form must never contain a password hash field
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_display_label_fallback() {
        let mut secrets = sample_user_with_secrets();
        secrets.display_name = None;
        let user: User = secrets.into();
        assert_eq!(user.display_label(), "tester");

        let mut secrets = sample_user_with_secrets();
        secrets.display_name = Some("  ".to_string());
        let user: User = secrets.into();
        assert_eq!(user.display_label(), "tester");
    }
}
