//! Credential Store
//!
//! Account registration, password authentication, email verification, phone
//! number ownership, and password changes.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    requests::{ChangePasswordRequest, RegisterRequest, VerifyEmailRequest},
    user::{User, UserWithSecrets},
    verification::{EmailVerification, EmailVerificationRow},
};
use crate::service::email::EmailGateway;
use crate::service::token::TokenService;
use crate::utils::{
    error::AppError,
    security::{
        constant_time_compare, generate_otp_code, hash_password_with_cost, verify_password,
        DEFAULT_BCRYPT_COST,
    },
    validation::{normalize_email, normalize_phone_number},
};

/// Maximum wrong guesses per email verification code
const MAX_EMAIL_VERIFY_ATTEMPTS: i32 = 3;

/// Email verification code lifetime in minutes
const EMAIL_CODE_TTL_MINUTES: i64 = 10;

/// Custom error types for the user service
#[derive(Error, Debug)]
pub enum UserServiceError {
    /// User with the specified identifier was not found
    #[error("User not found")]
    UserNotFound,

    /// Attempted to create a user with an email that already exists
    #[error("Email already exists")]
    DuplicateEmail,

    /// Attempted to create a user with a username that already exists
    #[error("Username already exists")]
    DuplicateUsername,

    /// Invalid login credentials provided
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Phone number is already verified by another account
    #[error("Phone number already in use")]
    PhoneAlreadyClaimed,

    /// Email address is already verified
    #[error("Email already verified")]
    AlreadyVerified,

    /// Verification code not found or invalid
    #[error("Invalid verification code")]
    InvalidVerificationCode,

    /// Verification code has expired
    #[error("Verification code has expired")]
    VerificationCodeExpired,

    /// Too many verification attempts
    #[error("Too many verification attempts")]
    TooManyAttempts,

    /// Input validation failed with detailed error message
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Password hashing operation failed
    #[error("Password hashing error: {0}")]
    HashingError(#[from] bcrypt::BcryptError),

    /// Email delivery failed
    #[error("Email service error: {0}")]
    EmailServiceError(String),

    /// Unexpected internal server error
    #[error("Internal server error")]
    InternalError,
}

impl From<UserServiceError> for AppError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::UserNotFound => AppError::NotFound("User not found".to_string()),
            UserServiceError::DuplicateEmail => {
                AppError::Conflict("Email already exists".to_string())
            }
            UserServiceError::DuplicateUsername => {
                AppError::Conflict("Username already exists".to_string())
            }
            UserServiceError::InvalidCredentials => {
                AppError::Authentication("Invalid credentials".to_string())
            }
            UserServiceError::PhoneAlreadyClaimed => {
                AppError::Conflict("Phone number already in use".to_string())
            }
            UserServiceError::AlreadyVerified => {
                AppError::BadRequest("Email already verified".to_string())
            }
            UserServiceError::InvalidVerificationCode => {
                AppError::BadRequest("Invalid verification code".to_string())
            }
            UserServiceError::VerificationCodeExpired => {
                AppError::BadRequest("Verification code has expired".to_string())
            }
            UserServiceError::TooManyAttempts => AppError::TooManyRequests {
                message: "Too many verification attempts".to_string(),
                retry_after: None,
            },
            UserServiceError::ValidationError(msg) => AppError::Validation(msg),
            UserServiceError::DatabaseError(e) => AppError::Database(e),
            UserServiceError::HashingError(e) => AppError::HashingError(e),
            UserServiceError::EmailServiceError(msg) => {
                AppError::Internal(format!("Email service error: {}", msg))
            }
            UserServiceError::InternalError => {
                AppError::Internal("Internal server error".to_string())
            }
        }
    }
}

/// Result type for user service operations
pub type UserServiceResult<T> = Result<T, UserServiceError>;

/// Credential store providing account lifecycle and password operations
#[derive(Clone)]
pub struct UserService {
    /// Database connection pool
    db_pool: PgPool,

    /// bcrypt cost factor for password hashing
    bcrypt_cost: u32,

    /// Email gateway for verification codes
    email_gateway: Option<Arc<dyn EmailGateway>>,

    /// Token service, needed to revoke sessions on password change
    token_service: Option<Arc<TokenService>>,
}

impl UserService {
    /// Creates a new UserService instance with the provided connection pool
    pub fn new(db_pool: PgPool) -> Self {
        Self {
            db_pool,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            email_gateway: None,
            token_service: None,
        }
    }

    /// Creates a UserService wired to email delivery and session revocation
    pub fn with_gateways(
        db_pool: PgPool,
        email_gateway: Arc<dyn EmailGateway>,
        token_service: Arc<TokenService>,
    ) -> Self {
        Self {
            db_pool,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            email_gateway: Some(email_gateway),
            token_service: Some(token_service),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// Creates a new account and dispatches a verification email
    ///
    /// The account starts inactive with an unverified email; logging in is
    /// refused until the emailed code is confirmed. A failed email dispatch
    /// is logged rather than fatal because the resend endpoint recovers.
    pub async fn register(&self, request: RegisterRequest) -> UserServiceResult<User> {
        request
            .validate()
            .map_err(|e| UserServiceError::ValidationError(format!("Invalid user data: {}", e)))?;

        let normalized_email = normalize_email(&request.email);
        let password_hash = hash_password_with_cost(&request.password, self.bcrypt_cost)?;

        let user = sqlx::query_as!(
            UserWithSecrets,
            r#"
            INSERT INTO users (email, username, display_name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, username, display_name, password_hash,
                      is_active, is_disabled, email_verified, phone_number, phone_verified,
                      created_at, updated_at
            "#,
            normalized_email,
            request.username,
            request.display_name,
            password_hash
        )
        .fetch_one(&self.db_pool)
        .await
        .map_err(map_duplicate_identity)?;

        let code = generate_otp_code();
        let expires_at = Utc::now() + Duration::minutes(EMAIL_CODE_TTL_MINUTES);

        sqlx::query!(
            r#"
            INSERT INTO email_verifications (user_id, verification_code, expires_at)
            VALUES ($1, $2, $3)
            "#,
            user.id,
            code,
            expires_at
        )
        .execute(&self.db_pool)
        .await?;

        if let Some(email_gateway) = &self.email_gateway {
            if let Err(e) = email_gateway
                .send_verification_email(
                    &user.email,
                    user.display_name.as_deref().unwrap_or(&user.username),
                    &code,
                    EMAIL_CODE_TTL_MINUTES,
                )
                .await
            {
                log::warn!("Verification email for new account failed: {}", e);
            }
        }

        Ok(user.into())
    }

    /// Authenticates by email or username plus password
    ///
    /// Unknown identifiers and wrong passwords both return
    /// `InvalidCredentials`; a dummy bcrypt verification runs on the miss
    /// path so the two failures sit in the same timing class.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> UserServiceResult<User> {
        let user = self.find_by_identifier(identifier).await?;

        let Some(user) = user else {
            let _ = hash_password_with_cost(password, self.bcrypt_cost);
            return Err(UserServiceError::InvalidCredentials);
        };

        let Some(password_hash) = &user.password_hash else {
            // Social-only account with no password set
            let _ = hash_password_with_cost(password, self.bcrypt_cost);
            return Err(UserServiceError::InvalidCredentials);
        };

        if !verify_password(password, password_hash)? {
            return Err(UserServiceError::InvalidCredentials);
        }

        Ok(user.into())
    }

    /// Retrieves a user by their unique ID
    pub async fn get_user_by_id(&self, user_id: Uuid) -> UserServiceResult<User> {
        let user = sqlx::query_as!(
            UserWithSecrets,
            r#"
            SELECT id, email, username, display_name, password_hash,
                   is_active, is_disabled, email_verified, phone_number, phone_verified,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
            user_id
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(UserServiceError::UserNotFound)?;

        Ok(user.into())
    }

    /// Retrieves a user by their email address
    pub async fn get_user_by_email(&self, email: &str) -> UserServiceResult<User> {
        let normalized_email = normalize_email(email);

        let user = sqlx::query_as!(
            UserWithSecrets,
            r#"
            SELECT id, email, username, display_name, password_hash,
                   is_active, is_disabled, email_verified, phone_number, phone_verified,
                   created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
            normalized_email
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(UserServiceError::UserNotFound)?;

        Ok(user.into())
    }

    /// Verifies an email with the mailed code and activates the account
    ///
    /// Verifying an already-verified address is a no-op rather than an
    /// error, so retried requests cannot strand a user.
    pub async fn verify_email(&self, request: VerifyEmailRequest) -> UserServiceResult<User> {
        request
            .validate()
            .map_err(|e| UserServiceError::ValidationError(format!("Invalid request: {}", e)))?;

        let user = self.get_user_by_email(&request.email).await?;
        if user.email_verified {
            return Ok(user);
        }

        // The newest pending record is looked up by user alone so wrong
        // guesses still land on it and get charged against the ceiling.
        let verification_row = sqlx::query_as!(
            EmailVerificationRow,
            r#"
            SELECT id, user_id, verification_code, attempts, expires_at, created_at, verified_at
            FROM email_verifications
            WHERE user_id = $1 AND verified_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            user.id
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(UserServiceError::InvalidVerificationCode)?;

        let verification: EmailVerification = verification_row.into();

        if verification.is_expired() {
            return Err(UserServiceError::VerificationCodeExpired);
        }
        if verification.has_exceeded_max_attempts(MAX_EMAIL_VERIFY_ATTEMPTS) {
            return Err(UserServiceError::TooManyAttempts);
        }

        // Conditional increment so concurrent guesses cannot blow past the
        // ceiling between a read and a write.
        let charged = sqlx::query_scalar!(
            r#"
            UPDATE email_verifications
            SET attempts = attempts + 1
            WHERE id = $1 AND attempts < $2
            RETURNING attempts
            "#,
            verification.id,
            MAX_EMAIL_VERIFY_ATTEMPTS
        )
        .fetch_optional(&self.db_pool)
        .await?;

        if charged.is_none() {
            return Err(UserServiceError::TooManyAttempts);
        }

        if !constant_time_compare(&verification.verification_code, &request.verification_code) {
            return Err(UserServiceError::InvalidVerificationCode);
        }

        let mut tx = self.db_pool.begin().await?;

        sqlx::query!(
            r#"
            UPDATE email_verifications
            SET verified_at = NOW()
            WHERE id = $1
            "#,
            verification.id
        )
        .execute(&mut *tx)
        .await?;

        let updated_user = sqlx::query_as!(
            UserWithSecrets,
            r#"
            UPDATE users
            SET email_verified = TRUE, is_active = TRUE, updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, username, display_name, password_hash,
                      is_active, is_disabled, email_verified, phone_number, phone_verified,
                      created_at, updated_at
            "#,
            user.id
        )
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(updated_user.into())
    }

    /// Sends a fresh verification code to an unverified account
    pub async fn resend_verification_email(&self, email: &str) -> UserServiceResult<()> {
        let email_gateway =
            self.email_gateway
                .as_ref()
                .ok_or(UserServiceError::EmailServiceError(
                    "Email gateway not configured".to_string(),
                ))?;

        let user = self.get_user_by_email(email).await?;
        if user.email_verified {
            return Err(UserServiceError::AlreadyVerified);
        }

        let code = generate_otp_code();
        let expires_at = Utc::now() + Duration::minutes(EMAIL_CODE_TTL_MINUTES);

        sqlx::query!(
            r#"
            INSERT INTO email_verifications (user_id, verification_code, expires_at)
            VALUES ($1, $2, $3)
            "#,
            user.id,
            code,
            expires_at
        )
        .execute(&self.db_pool)
        .await?;

        email_gateway
            .send_verification_email(
                &user.email,
                user.display_label(),
                &code,
                EMAIL_CODE_TTL_MINUTES,
            )
            .await
            .map_err(|e| UserServiceError::EmailServiceError(e.to_string()))?;

        Ok(())
    }

    /// Verifies a user's password without authenticating a request
    pub async fn verify_user_password(
        &self,
        user_id: Uuid,
        password: &str,
    ) -> UserServiceResult<bool> {
        let row = sqlx::query!("SELECT password_hash FROM users WHERE id = $1", user_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or(UserServiceError::UserNotFound)?;

        match row.password_hash {
            Some(password_hash) => Ok(verify_password(password, &password_hash)?),
            None => Ok(false),
        }
    }

    /// Updates or clears the account phone number
    ///
    /// Any change resets `phone_verified`; a number verified by another
    /// account is refused.
    pub async fn set_phone(
        &self,
        user_id: Uuid,
        phone_number: Option<&str>,
    ) -> UserServiceResult<User> {
        let normalized = phone_number.map(normalize_phone_number);

        if let Some(number) = &normalized {
            if self.phone_claimed_by_other(number, user_id).await? {
                return Err(UserServiceError::PhoneAlreadyClaimed);
            }
        }

        let user = sqlx::query_as!(
            UserWithSecrets,
            r#"
            UPDATE users
            SET phone_number = $2, phone_verified = FALSE, updated_at = NOW()
            WHERE id = $1
            RETURNING id, email, username, display_name, password_hash,
                      is_active, is_disabled, email_verified, phone_number, phone_verified,
                      created_at, updated_at
            "#,
            user_id,
            normalized as Option<String>
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(UserServiceError::UserNotFound)?;

        Ok(user.into())
    }

    /// Whether another account has already verified this phone number
    pub async fn phone_claimed_by_other(
        &self,
        phone_number: &str,
        user_id: Uuid,
    ) -> UserServiceResult<bool> {
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

    /// Changes the account password
    ///
    /// All existing refresh sessions are revoked before the new hash is
    /// stored, so tokens issued against the old password die with it.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        request: ChangePasswordRequest,
    ) -> UserServiceResult<()> {
        request
            .validate()
            .map_err(|e| UserServiceError::ValidationError(format!("Invalid request: {}", e)))?;

        if !self
            .verify_user_password(user_id, &request.current_password)
            .await?
        {
            return Err(UserServiceError::InvalidCredentials);
        }

        if let Some(token_service) = &self.token_service {
            token_service
                .revoke_all_for_user(user_id)
                .await
                .map_err(|_| UserServiceError::InternalError)?;
        }

        let new_hash = hash_password_with_cost(&request.new_password, self.bcrypt_cost)?;

        sqlx::query!(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
            user_id,
            new_hash
        )
        .execute(&self.db_pool)
        .await?;

        Ok(())
    }

    /// Health check for the service
    pub async fn health_check(&self) -> UserServiceResult<()> {
        sqlx::query!("SELECT 1 as health_check")
            .fetch_one(&self.db_pool)
            .await
            .map_err(UserServiceError::DatabaseError)?;

        Ok(())
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> UserServiceResult<Option<UserWithSecrets>> {
        let user = if identifier.contains('@') {
            let normalized = normalize_email(identifier);
            sqlx::query_as!(
                UserWithSecrets,
                r#"
                SELECT id, email, username, display_name, password_hash,
                       is_active, is_disabled, email_verified, phone_number, phone_verified,
                       created_at, updated_at
                FROM users
                WHERE email = $1
                "#,
                normalized
            )
            .fetch_optional(&self.db_pool)
            .await?
        } else {
            sqlx::query_as!(
                UserWithSecrets,
                r#"
                SELECT id, email, username, display_name, password_hash,
                       is_active, is_disabled, email_verified, phone_number, phone_verified,
                       created_at, updated_at
                FROM users
                WHERE LOWER(username) = LOWER($1)
                "#,
                identifier
            )
            .fetch_optional(&self.db_pool)
            .await?
        };

        Ok(user)
    }
}

/// Maps unique-constraint violations onto duplicate-identity errors
fn map_duplicate_identity(e: sqlx::Error) -> UserServiceError {
    match e {
        sqlx::Error::Database(db_err) => match db_err.constraint() {
            Some("users_email_key") => UserServiceError::DuplicateEmail,
            Some("users_username_lower_key") => UserServiceError::DuplicateUsername,
            _ => UserServiceError::DatabaseError(sqlx::Error::Database(db_err)),
        },
        _ => UserServiceError::DatabaseError(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::email::testing::RecordingEmailGateway;

    // Note: sqlx::test automatically runs migrations from ./migrations

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            email: "john.doe@example.com".to_string(),
            username: "johndoe".to_string(),
            password: "SecurePass123!".to_string(),
            display_name: Some("John Doe".to_string()),
        }
    }

    fn test_service(pool: sqlx::PgPool) -> UserService {
        UserService::new(pool).with_bcrypt_cost(4)
    }

    fn test_service_with_email(
        pool: sqlx::PgPool,
        email: Arc<RecordingEmailGateway>,
    ) -> UserService {
        let token_service = Arc::new(TokenService::new(
            pool.clone(),
            "test_access_secret_key".to_string(),
            "test_refresh_secret_key".to_string(),
        ));
        UserService::with_gateways(pool, email, token_service).with_bcrypt_cost(4)
    }

    async fn mailed_code(pool: &sqlx::PgPool, user_id: Uuid) -> String {
        sqlx::query_scalar!(
            "SELECT verification_code FROM email_verifications WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
            user_id
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn test_register_starts_inactive_and_unverified(pool: sqlx::PgPool) {
        let service = test_service(pool);
        let user = service.register(register_request()).await.unwrap();

        assert_eq!(user.email, "john.doe@example.com");
        assert_eq!(user.username, "johndoe");
        assert!(!user.is_active);
        assert!(!user.email_verified);
        assert!(!user.is_disabled);
    }

    #[sqlx::test]
    async fn test_register_normalizes_email(pool: sqlx::PgPool) {
        let service = test_service(pool);
        let mut request = register_request();
        request.email = "  JOHN.DOE@EXAMPLE.COM ".to_string();

        let user = service.register(request).await.unwrap();
        assert_eq!(user.email, "john.doe@example.com");
    }

    #[sqlx::test]
    async fn test_register_duplicate_email(pool: sqlx::PgPool) {
        let service = test_service(pool);
        service.register(register_request()).await.unwrap();

        let mut request = register_request();
        request.username = "otheruser".to_string();
        request.email = "JOHN.DOE@example.com".to_string();

        let result = service.register(request).await;
        assert!(matches!(result, Err(UserServiceError::DuplicateEmail)));
    }

    #[sqlx::test]
    async fn test_register_duplicate_username_case_insensitive(pool: sqlx::PgPool) {
        let service = test_service(pool);
        service.register(register_request()).await.unwrap();

        let mut request = register_request();
        request.email = "other@example.com".to_string();
        request.username = "JohnDoe".to_string();

        let result = service.register(request).await;
        assert!(matches!(result, Err(UserServiceError::DuplicateUsername)));
    }

    #[sqlx::test]
    async fn test_register_sends_verification_email(pool: sqlx::PgPool) {
        let email = Arc::new(RecordingEmailGateway::new());
        let service = test_service_with_email(pool.clone(), email.clone());

        let user = service.register(register_request()).await.unwrap();

        assert_eq!(email.sent_count(), 1);
        let stored = mailed_code(&pool, user.id).await;
        assert_eq!(email.last_code(), Some(stored));
    }

    #[sqlx::test]
    async fn test_authenticate_by_email_and_username(pool: sqlx::PgPool) {
        let service = test_service(pool);
        let user = service.register(register_request()).await.unwrap();

        let by_email = service
            .authenticate("john.doe@example.com", "SecurePass123!")
            .await
            .unwrap();
        assert_eq!(by_email.id, user.id);

        let by_username = service
            .authenticate("JOHNDOE", "SecurePass123!")
            .await
            .unwrap();
        assert_eq!(by_username.id, user.id);
    }

    #[sqlx::test]
    async fn test_authenticate_uniform_failure(pool: sqlx::PgPool) {
        let service = test_service(pool);
        service.register(register_request()).await.unwrap();

        // Wrong password and unknown identifier surface the same error
        let wrong_password = service
            .authenticate("john.doe@example.com", "WrongPass123!")
            .await;
        assert!(matches!(
            wrong_password,
            Err(UserServiceError::InvalidCredentials)
        ));

        let unknown = service.authenticate("nobody@example.com", "whatever1").await;
        assert!(matches!(unknown, Err(UserServiceError::InvalidCredentials)));
    }

    #[sqlx::test]
    async fn test_verify_email_activates_account(pool: sqlx::PgPool) {
        let service = test_service(pool.clone());
        let user = service.register(register_request()).await.unwrap();
        let code = mailed_code(&pool, user.id).await;

        let verified = service
            .verify_email(VerifyEmailRequest {
                email: user.email.clone(),
                verification_code: code,
            })
            .await
            .unwrap();

        assert!(verified.email_verified);
        assert!(verified.is_active);
    }

    #[sqlx::test]
    async fn test_verify_email_idempotent(pool: sqlx::PgPool) {
        let service = test_service(pool.clone());
        let user = service.register(register_request()).await.unwrap();
        let code = mailed_code(&pool, user.id).await;

        let request = VerifyEmailRequest {
            email: user.email.clone(),
            verification_code: code,
        };
        service.verify_email(request).await.unwrap();

        // Second submission, even with a stale code, is a no-op success
        let again = service
            .verify_email(VerifyEmailRequest {
                email: user.email.clone(),
                verification_code: "000000".to_string(),
            })
            .await
            .unwrap();
        assert!(again.email_verified);
    }

    #[sqlx::test]
    async fn test_verify_email_wrong_code(pool: sqlx::PgPool) {
        let service = test_service(pool.clone());
        let user = service.register(register_request()).await.unwrap();

        let result = service
            .verify_email(VerifyEmailRequest {
                email: user.email.clone(),
                verification_code: "000000".to_string(),
            })
            .await;
        assert!(matches!(
            result,
            Err(UserServiceError::InvalidVerificationCode)
        ));

        // The wrong guess is charged against the pending record
        let attempts = sqlx::query_scalar!(
            r#"SELECT attempts FROM email_verifications WHERE user_id = $1"#,
            user.id
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(attempts, 1);
    }

    #[sqlx::test]
    async fn test_verify_email_attempt_ceiling(pool: sqlx::PgPool) {
        let service = test_service(pool.clone());
        let user = service.register(register_request()).await.unwrap();
        let code = mailed_code(&pool, user.id).await;

        for _ in 0..3 {
            let result = service
                .verify_email(VerifyEmailRequest {
                    email: user.email.clone(),
                    verification_code: "000000".to_string(),
                })
                .await;
            assert!(matches!(
                result,
                Err(UserServiceError::InvalidVerificationCode)
            ));
        }

        // Even the right code is refused once the guesses are spent
        let result = service
            .verify_email(VerifyEmailRequest {
                email: user.email,
                verification_code: code,
            })
            .await;
        assert!(matches!(result, Err(UserServiceError::TooManyAttempts)));
    }

    #[sqlx::test]
    async fn test_verify_email_expired_code(pool: sqlx::PgPool) {
        let service = test_service(pool.clone());
        let user = service.register(register_request()).await.unwrap();
        let code = mailed_code(&pool, user.id).await;

        sqlx::query!(
            "UPDATE email_verifications SET expires_at = NOW() - INTERVAL '1 minute' WHERE user_id = $1",
            user.id
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = service
            .verify_email(VerifyEmailRequest {
                email: user.email,
                verification_code: code,
            })
            .await;
        assert!(matches!(
            result,
            Err(UserServiceError::VerificationCodeExpired)
        ));
    }

    #[sqlx::test]
    async fn test_resend_verification_rejects_verified(pool: sqlx::PgPool) {
        let email = Arc::new(RecordingEmailGateway::new());
        let service = test_service_with_email(pool.clone(), email.clone());
        let user = service.register(register_request()).await.unwrap();
        let code = mailed_code(&pool, user.id).await;

        service
            .verify_email(VerifyEmailRequest {
                email: user.email.clone(),
                verification_code: code,
            })
            .await
            .unwrap();

        let result = service.resend_verification_email(&user.email).await;
        assert!(matches!(result, Err(UserServiceError::AlreadyVerified)));
    }

    #[sqlx::test]
    async fn test_set_phone_resets_verified_flag(pool: sqlx::PgPool) {
        let service = test_service(pool.clone());
        let user = service.register(register_request()).await.unwrap();

        let updated = service
            .set_phone(user.id, Some("+1 (555) 123-4567"))
            .await
            .unwrap();
        assert_eq!(updated.phone_number.as_deref(), Some("+15551234567"));
        assert!(!updated.phone_verified);

        // Simulate verification, then change the number again
        sqlx::query!(
            "UPDATE users SET phone_verified = TRUE WHERE id = $1",
            user.id
        )
        .execute(&pool)
        .await
        .unwrap();

        let changed = service
            .set_phone(user.id, Some("+15559876543"))
            .await
            .unwrap();
        assert!(!changed.phone_verified);

        let cleared = service.set_phone(user.id, None).await.unwrap();
        assert!(cleared.phone_number.is_none());
        assert!(!cleared.phone_verified);
    }

    #[sqlx::test]
    async fn test_set_phone_rejects_claimed_number(pool: sqlx::PgPool) {
        let service = test_service(pool.clone());
        let owner = service.register(register_request()).await.unwrap();

        sqlx::query!(
            "UPDATE users SET phone_number = '+15551234567', phone_verified = TRUE WHERE id = $1",
            owner.id
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut request = register_request();
        request.email = "other@example.com".to_string();
        request.username = "otheruser".to_string();
        let other = service.register(request).await.unwrap();

        let result = service.set_phone(other.id, Some("+15551234567")).await;
        assert!(matches!(result, Err(UserServiceError::PhoneAlreadyClaimed)));
    }

    #[sqlx::test]
    async fn test_change_password_revokes_sessions(pool: sqlx::PgPool) {
        let email = Arc::new(RecordingEmailGateway::new());
        let service = test_service_with_email(pool.clone(), email);
        let user = service.register(register_request()).await.unwrap();

        let token_service = TokenService::new(
            pool.clone(),
            "test_access_secret_key".to_string(),
            "test_refresh_secret_key".to_string(),
        );
        let pair = token_service.issue_pair(user.id, None, None).await.unwrap();

        service
            .change_password(
                user.id,
                ChangePasswordRequest {
                    current_password: "SecurePass123!".to_string(),
                    new_password: "EvenMoreSecure456!".to_string(),
                },
            )
            .await
            .unwrap();

        // Old refresh session must be gone
        assert!(token_service
            .refresh_access_token(&pair.refresh_token)
            .await
            .is_err());

        // Old password no longer works, new one does
        assert!(matches!(
            service
                .authenticate(&user.email, "SecurePass123!")
                .await,
            Err(UserServiceError::InvalidCredentials)
        ));
        assert!(service
            .authenticate(&user.email, "EvenMoreSecure456!")
            .await
            .is_ok());
    }

    #[sqlx::test]
    async fn test_change_password_wrong_current(pool: sqlx::PgPool) {
        let service = test_service(pool);
        let user = service.register(register_request()).await.unwrap();

        let result = service
            .change_password(
                user.id,
                ChangePasswordRequest {
                    current_password: "NotThePassword1!".to_string(),
                    new_password: "EvenMoreSecure456!".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(UserServiceError::InvalidCredentials)));
    }
}
