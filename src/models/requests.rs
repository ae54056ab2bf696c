//! Request and Response Models
//!
//! Data structures for API request and response payloads with validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::user::User;
use crate::utils::validation::{
    email_validator, numeric_code_validator, phone_validator, username_validator,
};

/// Request payload for creating a new account
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    /// User's email address (must be unique and valid format)
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    /// User's login name (unique, case-insensitive)
    #[validate(custom(function = "username_validator"))]
    pub username: String,

    /// User's password (8-128 characters)
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    pub password: String,

    /// Optional preferred display name
    #[validate(length(max = 255, message = "Display name is too long"))]
    pub display_name: Option<String>,
}

/// Request payload for password login
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    /// Email address or username
    #[validate(length(min = 1, message = "Identifier cannot be empty"))]
    pub identifier: String,

    /// Account password
    #[validate(length(min = 1, message = "Password cannot be empty"))]
    pub password: String,
}

/// Request payload for completing a password login that was challenged
#[derive(Debug, Deserialize, Validate)]
pub struct LoginTwoFactorRequest {
    /// User identifier returned with the challenge
    pub user_id: Uuid,

    /// TOTP code or backup code
    #[validate(length(min = 6, max = 16, message = "Invalid code length"))]
    pub code: String,
}

/// Request payload for starting a social login
#[derive(Debug, Deserialize, Validate)]
pub struct SocialLoginRequest {
    /// Authorization code from the provider's redirect
    #[validate(length(min = 1, message = "Authorization code cannot be empty"))]
    pub code: String,
}

/// Request payload for completing a social login that was challenged
#[derive(Debug, Deserialize, Validate)]
pub struct SocialLoginTwoFactorRequest {
    /// Opaque session token returned with the challenge
    #[validate(length(min = 1, message = "Session token cannot be empty"))]
    pub session_token: String,

    /// User identifier returned with the challenge
    pub user_id: Uuid,

    /// TOTP code or backup code
    #[validate(length(min = 6, max = 16, message = "Invalid code length"))]
    pub code: String,
}

/// Request payload for refreshing access tokens
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    /// Refresh token to exchange for a new access token
    #[validate(length(min = 1, message = "Refresh token cannot be empty"))]
    pub refresh_token: String,
}

/// Request payload for logging out (revoking a refresh token)
#[derive(Debug, Deserialize, Validate)]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token cannot be empty"))]
    pub refresh_token: String,
}

/// Request payload for changing a password
#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password cannot be empty"))]
    pub current_password: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    pub new_password: String,
}

/// Request payload for email verification
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyEmailRequest {
    /// Email address to verify
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    /// 6-digit verification code
    #[validate(custom(function = "numeric_code_validator"))]
    pub verification_code: String,
}

/// Request payload for resending the verification email
#[derive(Debug, Deserialize, Validate)]
pub struct ResendVerificationRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,
}

/// Request payload for confirming two-factor setup
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmTwoFactorRequest {
    /// Pending device returned by the setup endpoint
    pub device_id: Uuid,

    /// 6-digit TOTP code from the authenticator app
    #[validate(custom(function = "numeric_code_validator"))]
    pub code: String,
}

/// Request payload for disabling two-factor auth
#[derive(Debug, Deserialize, Validate)]
pub struct DisableTwoFactorRequest {
    #[validate(length(min = 1, message = "Password cannot be empty"))]
    pub password: String,
}

/// Request payload for sending a phone verification code
#[derive(Debug, Deserialize, Validate)]
pub struct SendPhoneCodeRequest {
    /// Phone number in E.164 format
    #[validate(custom(function = "phone_validator"))]
    pub phone_number: String,
}

/// Request payload for verifying a phone code
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPhoneRequest {
    #[validate(custom(function = "phone_validator"))]
    pub phone_number: String,

    /// 6-digit code received by SMS
    #[validate(custom(function = "numeric_code_validator"))]
    pub code: String,
}

/// Request payload for updating or clearing the account phone number
#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePhoneRequest {
    /// New phone number, or null to remove the current one
    #[validate(custom(function = "phone_validator"))]
    pub phone_number: Option<String>,
}

/// Response for successful registration
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: User,
}

/// Response for a fully completed login
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

/// Response body for a two-factor challenge (HTTP 202)
#[derive(Debug, Serialize)]
pub struct TwoFactorChallengeResponse {
    pub requires_2fa: bool,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// Response for confirming two-factor setup
#[derive(Debug, Serialize)]
pub struct ConfirmTwoFactorResponse {
    pub message: String,
    /// Shown exactly once; only hashes are stored
    pub backup_codes: Vec<String>,
}

/// Response for sending a phone verification code
#[derive(Debug, Serialize)]
pub struct SendPhoneCodeResponse {
    pub message: String,
    pub expires_in: i64,
}

/// Response for token refresh operations
#[derive(Debug, Serialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Response for health check
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Simple message-only response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_validation() {
        let valid = RegisterRequest {
            email: "user@example.com".to_string(),
            username: "newuser".to_string(),
            password: "SecurePass123!".to_string(),
            display_name: None,
        };
        assert!(valid.validate().is_ok());

        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            ..valid.clone()
        };
        assert!(bad_email.validate().is_err());

        let short_password = RegisterRequest {
            password: "short".to_string(),
            ..valid
        };
        assert!(short_password.validate().is_err());
    }

    #[test]
    fn test_phone_request_validation() {
        let valid = SendPhoneCodeRequest {
            phone_number: "+15551234567".to_string(),
        };
        assert!(valid.validate().is_ok());

        let invalid = SendPhoneCodeRequest {
            phone_number: "5551234567".to_string(),
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_verify_phone_code_shape() {
        let bad_code = VerifyPhoneRequest {
            phone_number: "+15551234567".to_string(),
            code: "12345".to_string(),
        };
        assert!(bad_code.validate().is_err());
    }
}
