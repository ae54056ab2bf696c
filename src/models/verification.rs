//! Verification Models
//!
//! Email and phone verification records with row-to-domain conversion and
//! expiry/attempt accounting helpers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Raw email verification row as stored in the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailVerificationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub verification_code: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Email verification record with domain helpers
#[derive(Debug, Clone)]
pub struct EmailVerification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub verification_code: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<EmailVerificationRow> for EmailVerification {
    fn from(row: EmailVerificationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            verification_code: row.verification_code,
            attempts: row.attempts,
            expires_at: row.expires_at,
            created_at: row.created_at,
            verified_at: row.verified_at,
        }
    }
}

impl EmailVerification {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    pub fn has_exceeded_max_attempts(&self, max_attempts: i32) -> bool {
        self.attempts >= max_attempts
    }

    /// Whether the record can still be used to verify an email address
    pub fn is_usable(&self, max_attempts: i32) -> bool {
        !self.is_expired() && !self.is_verified() && !self.has_exceeded_max_attempts(max_attempts)
    }
}

/// Raw phone verification row as stored in the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PhoneVerificationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone_number: String,
    pub code: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Phone verification record with domain helpers
#[derive(Debug, Clone)]
pub struct PhoneVerification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phone_number: String,
    pub code: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl From<PhoneVerificationRow> for PhoneVerification {
    fn from(row: PhoneVerificationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            phone_number: row.phone_number,
            code: row.code,
            attempts: row.attempts,
            expires_at: row.expires_at,
            created_at: row.created_at,
            verified_at: row.verified_at,
        }
    }
}

impl PhoneVerification {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    pub fn attempts_exhausted(&self, max_attempts: i32) -> bool {
        self.attempts >= max_attempts
    }
}

/// Answer from the send-side rate limiter
#[derive(Debug, Clone, Serialize)]
pub struct SendPermit {
    /// Whether another code may be sent now
    pub allowed: bool,

    /// Seconds until the next send is allowed, when denied
    pub wait_seconds: Option<u64>,
}

impl SendPermit {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            wait_seconds: None,
        }
    }

    pub fn denied(wait_seconds: u64) -> Self {
        Self {
            allowed: false,
            wait_seconds: Some(wait_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_phone_verification(expires_in_minutes: i64, attempts: i32) -> PhoneVerification {
        PhoneVerification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            phone_number: "+15551234567".to_string(),
            code: "123456".to_string(),
            attempts,
            expires_at: Utc::now() + Duration::minutes(expires_in_minutes),
            created_at: Utc::now(),
            verified_at: None,
        }
    }

    #[test]
    fn test_phone_verification_expiry() {
        assert!(!sample_phone_verification(10, 0).is_expired());
        assert!(sample_phone_verification(-1, 0).is_expired());
    }

    #[test]
    fn test_phone_verification_attempts() {
        assert!(!sample_phone_verification(10, 4).attempts_exhausted(5));
        assert!(sample_phone_verification(10, 5).attempts_exhausted(5));
    }

    #[test]
    fn test_email_verification_usable() {
        let verification = EmailVerification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            verification_code: "123456".to_string(),
            attempts: 0,
            expires_at: Utc::now() + Duration::minutes(10),
            created_at: Utc::now(),
            verified_at: None,
        };
        assert!(verification.is_usable(3));

        let mut used = verification.clone();
        used.verified_at = Some(Utc::now());
        assert!(!used.is_usable(3));

        let mut exhausted = verification;
        exhausted.attempts = 3;
        assert!(!exhausted.is_usable(3));
    }

    #[test]
    fn test_send_permit() {
        assert!(SendPermit::allowed().allowed);
        let denied = SendPermit::denied(120);
        assert!(!denied.allowed);
        assert_eq!(denied.wait_seconds, Some(120));
    }
}
