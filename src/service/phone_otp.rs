//! Phone OTP Service
//!
//! One-time SMS codes for phone number verification. The database is the
//! source of truth for codes and rate limits; moka caches sit in front of it
//! as a fast path for hot numbers and for the per-minute verification
//! ceiling. A failed SMS dispatch rolls the pending code back so the hourly
//! quota is never charged for a message that was never sent.

use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::OtpConfig;
use crate::models::verification::{PhoneVerification, PhoneVerificationRow, SendPermit};
use crate::service::sms::SmsGateway;
use crate::utils::error::AppError;
use crate::utils::security::{constant_time_compare, generate_otp_code, mask_phone_number};
use crate::utils::validation::normalize_phone_number;

/// Custom error types for the phone OTP service
#[derive(Error, Debug)]
pub enum PhoneOtpError {
    /// Hourly send quota for this number is exhausted
    #[error("Too many codes requested for this number")]
    SendRateLimited { wait_seconds: u64 },

    /// Per-minute verification ceiling reached
    #[error("Too many verification attempts, slow down")]
    VerifyRateLimited,

    /// Phone number is already verified by another account
    #[error("Phone number already in use")]
    PhoneAlreadyClaimed,

    /// SMS provider refused or failed to deliver the message
    #[error("SMS dispatch failed: {0}")]
    SmsDispatchFailed(String),

    /// No pending code exists for this number
    #[error("No pending verification code")]
    NoPendingCode,

    /// The pending code has expired
    #[error("Verification code has expired")]
    CodeExpired,

    /// Submitted code does not match
    #[error("Invalid code, {attempts_remaining} attempts remaining")]
    InvalidCode { attempts_remaining: i32 },

    /// All guesses for the pending code are used up
    #[error("Too many attempts for this code")]
    TooManyAttempts,

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<PhoneOtpError> for AppError {
    fn from(err: PhoneOtpError) -> Self {
        match err {
            PhoneOtpError::SendRateLimited { wait_seconds } => AppError::TooManyRequests {
                message: "Too many codes requested for this number".to_string(),
                retry_after: Some(wait_seconds),
            },
            PhoneOtpError::VerifyRateLimited => AppError::TooManyRequests {
                message: "Too many verification attempts, slow down".to_string(),
                retry_after: Some(60),
            },
            PhoneOtpError::PhoneAlreadyClaimed => {
                AppError::Conflict("Phone number already in use".to_string())
            }
            PhoneOtpError::SmsDispatchFailed(msg) => {
                AppError::ExternalService(format!("SMS dispatch failed: {}", msg))
            }
            PhoneOtpError::NoPendingCode => {
                AppError::BadRequest("No pending verification code".to_string())
            }
            PhoneOtpError::CodeExpired => {
                AppError::BadRequest("Verification code has expired".to_string())
            }
            PhoneOtpError::InvalidCode { attempts_remaining } => AppError::BadRequest(format!(
                "Invalid code, {} attempts remaining",
                attempts_remaining
            )),
            PhoneOtpError::TooManyAttempts => AppError::TooManyRequests {
                message: "Too many attempts for this code".to_string(),
                retry_after: None,
            },
            PhoneOtpError::DatabaseError(e) => AppError::Database(e),
        }
    }
}

/// Result type for phone OTP operations
pub type PhoneOtpResult<T> = Result<T, PhoneOtpError>;

/// Outcome of a successful code dispatch
#[derive(Debug, Clone)]
pub struct SentCode {
    /// Seconds until the code expires
    pub expires_in: u64,
}

/// Hot-path copy of the pending code for a number
#[derive(Debug, Clone)]
struct CachedCode {
    user_id: Uuid,
    code: String,
    expires_at: DateTime<Utc>,
}

/// Send-counter snapshot for a number
#[derive(Debug, Clone)]
struct SendWindow {
    count: u32,
    window_started_at: DateTime<Utc>,
}

/// SMS one-time-code issuance and verification with layered rate limits
#[derive(Clone)]
pub struct PhoneOtpService {
    db_pool: PgPool,
    config: OtpConfig,
    sms_gateway: Arc<dyn SmsGateway>,

    /// Fast-path deny for numbers that already burned their hourly quota
    send_counters: Cache<String, SendWindow>,

    /// Pending code per number, so hot verifications skip the code lookup
    cached_codes: Cache<String, CachedCode>,

    /// Per-minute verification attempt counter per number
    verify_counters: Cache<String, u32>,
}

impl PhoneOtpService {
    pub fn new(db_pool: PgPool, config: OtpConfig, sms_gateway: Arc<dyn SmsGateway>) -> Self {
        let code_ttl = std::time::Duration::from_secs(config.code_ttl_minutes as u64 * 60);

        Self {
            db_pool,
            config,
            sms_gateway,
            send_counters: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(std::time::Duration::from_secs(3600))
                .build(),
            cached_codes: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(code_ttl)
                .build(),
            verify_counters: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(std::time::Duration::from_secs(60))
                .build(),
        }
    }

    /// Whether another code may be sent to this number right now
    ///
    /// The cached counter can deny without touching the database, but only
    /// the database window can allow: the hourly limit is a sliding window
    /// over actual stored sends, and the wait time is measured from the
    /// oldest send still inside it.
    pub async fn can_send(&self, phone_number: &str) -> PhoneOtpResult<SendPermit> {
        let phone_number = normalize_phone_number(phone_number);

        if let Some(window) = self.send_counters.get(&phone_number).await {
            let window_ends = window.window_started_at + Duration::hours(1);
            if window.count >= self.config.max_sends_per_hour && window_ends > Utc::now() {
                let wait = (window_ends - Utc::now()).num_seconds().max(1) as u64;
                return Ok(SendPermit::denied(wait));
            }
        }

        let sends_in_window = sqlx::query_scalar!(
            r#"
            SELECT created_at FROM phone_verifications
            WHERE phone_number = $1 AND created_at > NOW() - INTERVAL '1 hour'
            ORDER BY created_at ASC
            "#,
            phone_number
        )
        .fetch_all(&self.db_pool)
        .await?;

        if sends_in_window.len() >= self.config.max_sends_per_hour as usize {
            let oldest = sends_in_window[0];
            let wait = ((oldest + Duration::hours(1)) - Utc::now())
                .num_seconds()
                .max(1) as u64;
            return Ok(SendPermit::denied(wait));
        }

        Ok(SendPermit::allowed())
    }

    /// Generates, stores, and dispatches a fresh code for this number
    pub async fn send(&self, user_id: Uuid, phone_number: &str) -> PhoneOtpResult<SentCode> {
        let phone_number = normalize_phone_number(phone_number);

        if self.phone_claimed_by_other(&phone_number, user_id).await? {
            return Err(PhoneOtpError::PhoneAlreadyClaimed);
        }

        let permit = self.can_send(&phone_number).await?;
        if let Some(wait_seconds) = permit.wait_seconds {
            log::info!(
                "Send quota exhausted for {}, retry in {}s",
                mask_phone_number(&phone_number),
                wait_seconds
            );
            return Err(PhoneOtpError::SendRateLimited { wait_seconds });
        }

        let code = generate_otp_code();
        let expires_at = Utc::now() + Duration::minutes(self.config.code_ttl_minutes);

        let record_id = sqlx::query_scalar!(
            r#"
            INSERT INTO phone_verifications (user_id, phone_number, code, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
            user_id,
            phone_number,
            code,
            expires_at
        )
        .fetch_one(&self.db_pool)
        .await?;

        let body = format!(
            "Your verification code is {}. It expires in {} minutes.",
            code, self.config.code_ttl_minutes
        );

        if let Err(e) = self.sms_gateway.send(&phone_number, &body).await {
            // The message never went out, so the code and the quota charge
            // both roll back.
            sqlx::query!("DELETE FROM phone_verifications WHERE id = $1", record_id)
                .execute(&self.db_pool)
                .await?;
            self.cached_codes.invalidate(&phone_number).await;

            log::warn!(
                "SMS dispatch to {} failed, pending code rolled back: {}",
                mask_phone_number(&phone_number),
                e
            );
            return Err(PhoneOtpError::SmsDispatchFailed(e.to_string()));
        }

        self.bump_send_counter(&phone_number).await;
        self.cached_codes
            .insert(
                phone_number.clone(),
                CachedCode {
                    user_id,
                    code,
                    expires_at,
                },
            )
            .await;

        log::info!("Verification code sent to {}", mask_phone_number(&phone_number));

        Ok(SentCode {
            expires_in: (self.config.code_ttl_minutes * 60) as u64,
        })
    }

    /// Verifies a submitted code and marks the user's phone as verified
    pub async fn verify(
        &self,
        user_id: Uuid,
        phone_number: &str,
        code: &str,
    ) -> PhoneOtpResult<()> {
        let phone_number = normalize_phone_number(phone_number);
        let code = code.trim();

        let attempts_this_minute = self.bump_verify_counter(&phone_number).await;
        if attempts_this_minute > self.config.max_verify_attempts_per_minute {
            return Err(PhoneOtpError::VerifyRateLimited);
        }

        // Hot path: a cached, still-valid code that matches skips the code
        // lookup and attempt accounting entirely.
        if let Some(cached) = self.cached_codes.get(&phone_number).await {
            if cached.user_id == user_id
                && cached.expires_at > Utc::now()
                && constant_time_compare(&cached.code, code)
            {
                self.finalize(user_id, &phone_number).await?;
                return Ok(());
            }
        }

        let row = sqlx::query_as!(
            PhoneVerificationRow,
            r#"
            SELECT id, user_id, phone_number, code, attempts, expires_at, created_at, verified_at
            FROM phone_verifications
            WHERE user_id = $1 AND phone_number = $2 AND verified_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            user_id,
            phone_number
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(PhoneOtpError::NoPendingCode)?;

        let verification: PhoneVerification = row.into();

        if verification.is_expired() {
            return Err(PhoneOtpError::CodeExpired);
        }
        if verification.attempts_exhausted(self.config.max_attempts_per_code) {
            return Err(PhoneOtpError::TooManyAttempts);
        }

        // Conditional increment so concurrent guesses cannot blow past the
        // ceiling between a read and a write.
        let charged = sqlx::query_scalar!(
            r#"
            UPDATE phone_verifications
            SET attempts = attempts + 1
            WHERE id = $1 AND attempts < $2
            RETURNING attempts
            "#,
            verification.id,
            self.config.max_attempts_per_code
        )
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(attempts_used) = charged else {
            return Err(PhoneOtpError::TooManyAttempts);
        };

        if !constant_time_compare(&verification.code, code) {
            // Once the guesses are spent the hot-path copy must go too, or a
            // late correct guess could sneak past the ceiling through it.
            if attempts_used >= self.config.max_attempts_per_code {
                self.cached_codes.invalidate(&phone_number).await;
            }
            return Err(PhoneOtpError::InvalidCode {
                attempts_remaining: (self.config.max_attempts_per_code - attempts_used).max(0),
            });
        }

        self.finalize(user_id, &phone_number).await?;
        Ok(())
    }

    /// Marks the newest pending record verified and flips the user flag
    async fn finalize(&self, user_id: Uuid, phone_number: &str) -> PhoneOtpResult<()> {
        let mut tx = self.db_pool.begin().await?;

        sqlx::query!(
            r#"
            UPDATE phone_verifications
            SET verified_at = NOW()
            WHERE id = (
                SELECT id FROM phone_verifications
                WHERE user_id = $1 AND phone_number = $2 AND verified_at IS NULL
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#,
            user_id,
            phone_number
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query!(
            r#"
            UPDATE users
            SET phone_verified = TRUE, updated_at = NOW()
            WHERE id = $1 AND phone_number = $2
            "#,
            user_id,
            phone_number
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.cached_codes.invalidate(phone_number).await;
        self.verify_counters.invalidate(phone_number).await;

        log::info!("Phone {} verified", mask_phone_number(phone_number));
        Ok(())
    }

    async fn phone_claimed_by_other(
        &self,
        phone_number: &str,
        user_id: Uuid,
    ) -> PhoneOtpResult<bool> {
        let claimed = sqlx::query_scalar!(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM users
                WHERE phone_number = $1 AND phone_verified = TRUE AND id <> $2
            ) AS "claimed!"
            "#,
            phone_number,
            user_id
        )
        .fetch_one(&self.db_pool)
        .await?;

        Ok(claimed)
    }

    async fn bump_send_counter(&self, phone_number: &str) {
        self.send_counters
            .entry(phone_number.to_string())
            .and_upsert_with(|existing| {
                let next = match existing {
                    Some(entry) => {
                        let window = entry.into_value();
                        SendWindow {
                            count: window.count + 1,
                            window_started_at: window.window_started_at,
                        }
                    }
                    None => SendWindow {
                        count: 1,
                        window_started_at: Utc::now(),
                    },
                };
                std::future::ready(next)
            })
            .await;
    }

    async fn bump_verify_counter(&self, phone_number: &str) -> u32 {
        self.verify_counters
            .entry(phone_number.to_string())
            .and_upsert_with(|existing| {
                let next = match existing {
                    Some(entry) => entry.into_value() + 1,
                    None => 1,
                };
                std::future::ready(next)
            })
            .await
            .into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::sms::testing::RecordingSmsGateway;

    const PHONE: &str = "+15551234567";

    fn test_config() -> OtpConfig {
        OtpConfig {
            code_ttl_minutes: 10,
            max_sends_per_hour: 5,
            max_attempts_per_code: 5,
            max_verify_attempts_per_minute: 20,
        }
    }

    async fn create_test_user(pool: &PgPool, email: &str, username: &str) -> Uuid {
        sqlx::query_scalar!(
            r#"
            INSERT INTO users (email, username, password_hash, is_active, email_verified, phone_number)
            VALUES ($1, $2, 'unused', TRUE, TRUE, $3)
            RETURNING id
            "#,
            email,
            username,
            PHONE
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn stored_code(pool: &PgPool, user_id: Uuid) -> String {
        sqlx::query_scalar!(
            "SELECT code FROM phone_verifications WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
            user_id
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn test_send_dispatches_code(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let service = PhoneOtpService::new(pool.clone(), test_config(), gateway.clone());
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        let sent = service.send(user_id, PHONE).await.unwrap();
        assert_eq!(sent.expires_in, 600);
        assert_eq!(gateway.sent_count(), 1);

        let code = stored_code(&pool, user_id).await;
        assert!(gateway.last_body().unwrap().contains(&code));
    }

    #[sqlx::test]
    async fn test_send_quota_with_wait_time(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let service = PhoneOtpService::new(pool.clone(), test_config(), gateway);
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        for _ in 0..5 {
            service.send(user_id, PHONE).await.unwrap();
        }

        let result = service.send(user_id, PHONE).await;
        match result {
            Err(PhoneOtpError::SendRateLimited { wait_seconds }) => {
                assert!(wait_seconds > 0);
                assert!(wait_seconds <= 3600);
            }
            other => panic!("expected SendRateLimited, got {:?}", other),
        }

        let permit = service.can_send(PHONE).await.unwrap();
        assert!(!permit.allowed);
    }

    #[sqlx::test]
    async fn test_sms_failure_rolls_back_quota(pool: PgPool) {
        let failing = Arc::new(RecordingSmsGateway::failing());
        let service = PhoneOtpService::new(pool.clone(), test_config(), failing);
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        let result = service.send(user_id, PHONE).await;
        assert!(matches!(result, Err(PhoneOtpError::SmsDispatchFailed(_))));

        // No pending code row remains and the quota is untouched
        let rows = sqlx::query_scalar!(
            r#"SELECT COUNT(*) AS "count!" FROM phone_verifications WHERE user_id = $1"#,
            user_id
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(rows, 0);

        let working = Arc::new(RecordingSmsGateway::new());
        let retry_service = PhoneOtpService::new(pool.clone(), test_config(), working);
        assert!(retry_service.send(user_id, PHONE).await.is_ok());
    }

    #[sqlx::test]
    async fn test_verify_marks_phone_verified(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let service = PhoneOtpService::new(pool.clone(), test_config(), gateway);
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        service.send(user_id, PHONE).await.unwrap();
        let code = stored_code(&pool, user_id).await;

        service.verify(user_id, PHONE, &code).await.unwrap();

        let verified = sqlx::query_scalar!(
            r#"SELECT phone_verified AS "phone_verified!" FROM users WHERE id = $1"#,
            user_id
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(verified);
    }

    #[sqlx::test]
    async fn test_verify_without_pending_code(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let service = PhoneOtpService::new(pool.clone(), test_config(), gateway);
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        let result = service.verify(user_id, PHONE, "123456").await;
        assert!(matches!(result, Err(PhoneOtpError::NoPendingCode)));
    }

    #[sqlx::test]
    async fn test_verify_attempt_ceiling(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let service = PhoneOtpService::new(pool.clone(), test_config(), gateway);
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        service.send(user_id, PHONE).await.unwrap();
        let code = stored_code(&pool, user_id).await;

        // Each miss reports how many guesses are left, counting down to zero
        for expected_remaining in (0..5).rev() {
            let result = service.verify(user_id, PHONE, "000000").await;
            match result {
                Err(PhoneOtpError::InvalidCode { attempts_remaining }) => {
                    assert_eq!(attempts_remaining, expected_remaining);
                }
                other => panic!("expected InvalidCode, got {:?}", other),
            }
        }

        // Even the right code is refused once the guesses are spent
        let result = service.verify(user_id, PHONE, &code).await;
        assert!(matches!(result, Err(PhoneOtpError::TooManyAttempts)));
    }

    #[sqlx::test]
    async fn test_verify_per_minute_ceiling(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let mut config = test_config();
        config.max_verify_attempts_per_minute = 2;
        let service = PhoneOtpService::new(pool.clone(), config, gateway);
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        service.send(user_id, PHONE).await.unwrap();

        let _ = service.verify(user_id, PHONE, "000000").await;
        let _ = service.verify(user_id, PHONE, "000000").await;

        let result = service.verify(user_id, PHONE, "000000").await;
        assert!(matches!(result, Err(PhoneOtpError::VerifyRateLimited)));
    }

    #[sqlx::test]
    async fn test_verify_expired_code(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let service = PhoneOtpService::new(pool.clone(), test_config(), gateway);
        let user_id = create_test_user(&pool, "otp@example.com", "otpuser").await;

        service.send(user_id, PHONE).await.unwrap();
        let code = stored_code(&pool, user_id).await;

        sqlx::query!(
            "UPDATE phone_verifications SET expires_at = NOW() - INTERVAL '1 minute' WHERE user_id = $1",
            user_id
        )
        .execute(&pool)
        .await
        .unwrap();
        // Drop the hot-path copy so the stored expiry is consulted
        service.cached_codes.invalidate(PHONE).await;

        let result = service.verify(user_id, PHONE, &code).await;
        assert!(matches!(result, Err(PhoneOtpError::CodeExpired)));
    }

    #[sqlx::test]
    async fn test_send_rejects_claimed_number(pool: PgPool) {
        let gateway = Arc::new(RecordingSmsGateway::new());
        let service = PhoneOtpService::new(pool.clone(), test_config(), gateway);
        let owner = create_test_user(&pool, "owner@example.com", "owner").await;
        sqlx::query!("UPDATE users SET phone_verified = TRUE WHERE id = $1", owner)
            .execute(&pool)
            .await
            .unwrap();

        let other = create_test_user(&pool, "other@example.com", "other").await;
        let result = service.send(other, PHONE).await;
        assert!(matches!(result, Err(PhoneOtpError::PhoneAlreadyClaimed)));
    }
}
