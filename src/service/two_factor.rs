//! Second-Factor Registry
//!
//! TOTP device enrollment and verification plus single-use backup codes.
//! Secrets are stored base32-encoded; backup codes are stored only as
//! SHA-256 hashes and each one is consumed on first use.

use sqlx::PgPool;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::models::two_factor::{
    SecondFactorVerification, TotpDevice, TwoFactorSetup, TwoFactorStatus,
};
use crate::utils::error::AppError;
use crate::utils::security::{generate_backup_code, hash_sensitive_data, BACKUP_CODE_COUNT};

/// Issuer label shown in authenticator apps
const TOTP_ISSUER: &str = "Storefront";

/// Custom error types for the two-factor service
#[derive(Error, Debug)]
pub enum TwoFactorError {
    /// A confirmed device already exists for this account
    #[error("Two-factor authentication is already enabled")]
    AlreadyEnabled,

    /// No confirmed device exists for this account
    #[error("Two-factor authentication is not enabled")]
    NotEnabled,

    /// Pending device not found for confirmation
    #[error("Setup device not found")]
    DeviceNotFound,

    /// Submitted code did not match the TOTP window or any backup code
    #[error("Invalid authentication code")]
    InvalidCode,

    /// TOTP secret handling failed
    #[error("TOTP error: {0}")]
    Totp(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<TwoFactorError> for AppError {
    fn from(err: TwoFactorError) -> Self {
        match err {
            TwoFactorError::AlreadyEnabled => {
                AppError::Conflict("Two-factor authentication is already enabled".to_string())
            }
            TwoFactorError::NotEnabled => {
                AppError::BadRequest("Two-factor authentication is not enabled".to_string())
            }
            TwoFactorError::DeviceNotFound => {
                AppError::NotFound("Setup device not found".to_string())
            }
            TwoFactorError::InvalidCode => {
                AppError::Authentication("Invalid authentication code".to_string())
            }
            TwoFactorError::Totp(msg) => AppError::Internal(format!("TOTP error: {}", msg)),
            TwoFactorError::DatabaseError(e) => AppError::Database(e),
        }
    }
}

/// Result type for two-factor operations
pub type TwoFactorResult<T> = Result<T, TwoFactorError>;

/// Registry of second factors for each account
#[derive(Clone)]
pub struct TwoFactorService {
    db_pool: PgPool,
}

impl TwoFactorService {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    /// Starts TOTP enrollment with a fresh secret
    ///
    /// Any earlier unconfirmed device is replaced, so a user who abandons
    /// setup and starts over never faces a stale secret. Refused when a
    /// confirmed device already exists.
    pub async fn begin_setup(
        &self,
        user_id: Uuid,
        account_label: &str,
    ) -> TwoFactorResult<TwoFactorSetup> {
        if self.has_confirmed_device(user_id).await? {
            return Err(TwoFactorError::AlreadyEnabled);
        }

        let secret = Secret::generate_secret();
        let encoded = secret.to_encoded().to_string();

        let totp = build_totp(&encoded, account_label)?;
        let otpauth_url = totp.get_url();

        let mut tx = self.db_pool.begin().await?;

        sqlx::query!(
            "DELETE FROM totp_devices WHERE user_id = $1 AND confirmed = FALSE",
            user_id
        )
        .execute(&mut *tx)
        .await?;

        let device_id = sqlx::query_scalar!(
            r#"
            INSERT INTO totp_devices (user_id, secret, confirmed)
            VALUES ($1, $2, FALSE)
            RETURNING id
            "#,
            user_id,
            encoded
        )
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TwoFactorSetup {
            device_id,
            secret: encoded,
            otpauth_url,
        })
    }

    /// Confirms a pending device with a live code and issues backup codes
    ///
    /// Returns the plaintext backup codes; this is the only time they are
    /// ever visible. Any previous backup code set is replaced.
    pub async fn confirm_setup(
        &self,
        user_id: Uuid,
        device_id: Uuid,
        code: &str,
    ) -> TwoFactorResult<Vec<String>> {
        let device = sqlx::query_as!(
            TotpDevice,
            r#"
            SELECT id, user_id, secret, confirmed, created_at
            FROM totp_devices
            WHERE id = $1 AND user_id = $2 AND confirmed = FALSE
            "#,
            device_id,
            user_id
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(TwoFactorError::DeviceNotFound)?;

        if !check_totp_code(&device.secret, code)? {
            return Err(TwoFactorError::InvalidCode);
        }

        let backup_codes: Vec<String> = (0..BACKUP_CODE_COUNT)
            .map(|_| generate_backup_code())
            .collect();

        let mut tx = self.db_pool.begin().await?;

        sqlx::query!(
            "UPDATE totp_devices SET confirmed = TRUE WHERE id = $1",
            device.id
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query!("DELETE FROM backup_codes WHERE user_id = $1", user_id)
            .execute(&mut *tx)
            .await?;

        for code in &backup_codes {
            sqlx::query!(
                "INSERT INTO backup_codes (user_id, code_hash) VALUES ($1, $2)",
                user_id,
                hash_sensitive_data(code)
            )
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(backup_codes)
    }

    /// Verifies a second-factor code against the confirmed device
    ///
    /// TOTP is tried first; on a miss the code is checked against the backup
    /// set, where a match deletes the matching row so the code can never be
    /// replayed.
    pub async fn verify(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> TwoFactorResult<SecondFactorVerification> {
        let device = sqlx::query_as!(
            TotpDevice,
            r#"
            SELECT id, user_id, secret, confirmed, created_at
            FROM totp_devices
            WHERE user_id = $1 AND confirmed = TRUE
            "#,
            user_id
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(TwoFactorError::NotEnabled)?;

        if check_totp_code(&device.secret, code)? {
            return Ok(SecondFactorVerification {
                used_backup_code: false,
            });
        }

        let consumed = sqlx::query_scalar!(
            r#"
            DELETE FROM backup_codes
            WHERE user_id = $1 AND code_hash = $2
            RETURNING id
            "#,
            user_id,
            hash_sensitive_data(&code.trim().to_uppercase())
        )
        .fetch_optional(&self.db_pool)
        .await?;

        if consumed.is_some() {
            return Ok(SecondFactorVerification {
                used_backup_code: true,
            });
        }

        Err(TwoFactorError::InvalidCode)
    }

    /// Removes the confirmed device, pending devices, and all backup codes
    pub async fn disable(&self, user_id: Uuid) -> TwoFactorResult<()> {
        if !self.has_confirmed_device(user_id).await? {
            return Err(TwoFactorError::NotEnabled);
        }

        let mut tx = self.db_pool.begin().await?;

        sqlx::query!("DELETE FROM totp_devices WHERE user_id = $1", user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query!("DELETE FROM backup_codes WHERE user_id = $1", user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Whether the account has a confirmed second factor
    pub async fn has_confirmed_device(&self, user_id: Uuid) -> TwoFactorResult<bool> {
        let enabled = sqlx::query_scalar!(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM totp_devices WHERE user_id = $1 AND confirmed = TRUE
            ) AS "enabled!"
            "#,
            user_id
        )
        .fetch_one(&self.db_pool)
        .await?;

        Ok(enabled)
    }

    /// Enrollment status plus remaining backup codes
    pub async fn status(&self, user_id: Uuid) -> TwoFactorResult<TwoFactorStatus> {
        let enabled = self.has_confirmed_device(user_id).await?;

        let backup_codes_remaining = sqlx::query_scalar!(
            r#"SELECT COUNT(*) AS "count!" FROM backup_codes WHERE user_id = $1"#,
            user_id
        )
        .fetch_one(&self.db_pool)
        .await?;

        Ok(TwoFactorStatus {
            enabled,
            backup_codes_remaining,
        })
    }
}

fn build_totp(encoded_secret: &str, account_label: &str) -> TwoFactorResult<TOTP> {
    let secret_bytes = Secret::Encoded(encoded_secret.to_string())
        .to_bytes()
        .map_err(|e| TwoFactorError::Totp(format!("{:?}", e)))?;

    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret_bytes,
        Some(TOTP_ISSUER.to_string()),
        account_label.to_string(),
    )
    .map_err(|e| TwoFactorError::Totp(e.to_string()))
}

/// Checks a submitted code against the current window with one step of skew
fn check_totp_code(encoded_secret: &str, code: &str) -> TwoFactorResult<bool> {
    let totp = build_totp(encoded_secret, "verification")?;
    totp.check_current(code.trim())
        .map_err(|e| TwoFactorError::Totp(e.to_string()))
}
