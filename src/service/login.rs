//! Login Orchestrator
//!
//! Drives password and social logins through the account gates and the
//! optional two-factor challenge. A login either completes with a token pair
//! or pauses as a challenge; tokens are never issued before every gate and
//! the second factor (when enrolled) have passed.

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    social::{PendingSocialLogin, PENDING_SOCIAL_LOGIN_KEY},
    user::User,
    SocialProfile, TokenPair,
};
use crate::service::session::{SessionStore, SessionStoreError};
use crate::service::social::{ProviderRegistry, SocialProviderError};
use crate::service::token::{TokenService, TokenServiceError};
use crate::service::two_factor::{TwoFactorError, TwoFactorService};
use crate::service::user::{UserService, UserServiceError};
use crate::utils::error::AppError;
use crate::utils::security::generate_secure_token;

/// How long a challenged social login stays resumable
const PENDING_SOCIAL_LOGIN_TTL_MINUTES: i64 = 10;

/// Custom error types for the login orchestrator
#[derive(Error, Debug)]
pub enum LoginError {
    /// Identifier/password pair did not match any account
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account exists but its email has not been verified yet
    #[error("Email verification required")]
    VerificationRequired { email: String },

    /// Account has been administratively disabled
    #[error("Account is disabled")]
    AccountDisabled,

    /// Second-factor code was wrong
    #[error("Invalid authentication code")]
    InvalidSecondFactor,

    /// No pending challenged login matches the supplied session token
    #[error("Login session expired or invalid")]
    NoPendingLogin,

    /// Identity provider interaction failed
    #[error(transparent)]
    Provider(#[from] SocialProviderError),

    /// Token issuance failed
    #[error(transparent)]
    Token(#[from] TokenServiceError),

    /// Session store failure
    #[error(transparent)]
    Session(#[from] SessionStoreError),

    /// Second-factor registry failure
    #[error(transparent)]
    TwoFactor(TwoFactorError),

    /// Credential store failure
    #[error(transparent)]
    User(UserServiceError),

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<TwoFactorError> for LoginError {
    fn from(err: TwoFactorError) -> Self {
        match err {
            TwoFactorError::InvalidCode | TwoFactorError::NotEnabled => {
                LoginError::InvalidSecondFactor
            }
            other => LoginError::TwoFactor(other),
        }
    }
}

impl From<UserServiceError> for LoginError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::InvalidCredentials | UserServiceError::UserNotFound => {
                LoginError::InvalidCredentials
            }
            other => LoginError::User(other),
        }
    }
}

impl From<LoginError> for AppError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::InvalidCredentials => {
                AppError::Authentication("Invalid credentials".to_string())
            }
            LoginError::VerificationRequired { email } => AppError::VerificationRequired { email },
            LoginError::AccountDisabled => AppError::AccountDisabled,
            LoginError::InvalidSecondFactor => {
                AppError::Authentication("Invalid authentication code".to_string())
            }
            LoginError::NoPendingLogin => {
                AppError::Authentication("Login session expired or invalid".to_string())
            }
            LoginError::Provider(SocialProviderError::UnknownProvider(p)) => {
                AppError::BadRequest(format!("Unknown provider: {}", p))
            }
            LoginError::Provider(e) => AppError::ExternalService(e.to_string()),
            LoginError::Token(e) => e.into(),
            LoginError::Session(e) => e.into(),
            LoginError::TwoFactor(e) => e.into(),
            LoginError::User(e) => e.into(),
            LoginError::DatabaseError(e) => AppError::Database(e),
        }
    }
}

/// Result type for login operations
pub type LoginResult<T> = Result<T, LoginError>;

/// How a login request resolved
#[derive(Debug)]
pub enum LoginOutcome {
    /// Every gate passed; tokens issued
    Complete { tokens: TokenPair, user: User },

    /// First factor passed but a second factor is enrolled; no tokens yet
    Challenge {
        user_id: Uuid,
        /// Present when the first factor was a social provider
        provider: Option<String>,
        /// Opaque token binding a social challenge to this client
        session_token: Option<String>,
    },
}

/// Request metadata recorded with issued sessions
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// Orchestrates password and social logins across the account gates
#[derive(Clone)]
pub struct LoginService {
    db_pool: PgPool,
    user_service: UserService,
    two_factor_service: TwoFactorService,
    token_service: TokenService,
    session_store: SessionStore,
    providers: ProviderRegistry,
}

impl LoginService {
    pub fn new(
        db_pool: PgPool,
        user_service: UserService,
        two_factor_service: TwoFactorService,
        token_service: TokenService,
        session_store: SessionStore,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            db_pool,
            user_service,
            two_factor_service,
            token_service,
            session_store,
            providers,
        }
    }

    /// Password login
    ///
    /// Gate order: credentials, disabled, email verification, then the
    /// second factor. A challenged login returns no tokens; the client
    /// resubmits through [`LoginService::verify_login_2fa`].
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client: ClientInfo,
    ) -> LoginResult<LoginOutcome> {
        let user = self.user_service.authenticate(identifier, password).await?;
        let user = self.pass_account_gates(user).await?;

        if self.two_factor_service.has_confirmed_device(user.id).await? {
            return Ok(LoginOutcome::Challenge {
                user_id: user.id,
                provider: None,
                session_token: None,
            });
        }

        let tokens = self
            .token_service
            .issue_pair(user.id, client.user_agent, client.ip_address)
            .await?;

        Ok(LoginOutcome::Complete { tokens, user })
    }

    /// Completes a challenged password login with a second-factor code
    pub async fn verify_login_2fa(
        &self,
        user_id: Uuid,
        code: &str,
        client: ClientInfo,
    ) -> LoginResult<(TokenPair, User)> {
        self.two_factor_service.verify(user_id, code).await?;

        let user = self.user_service.get_user_by_id(user_id).await?;
        let user = self.pass_account_gates(user).await?;

        let tokens = self
            .token_service
            .issue_pair(user.id, client.user_agent, client.ip_address)
            .await?;

        Ok((tokens, user))
    }

    /// Social login via an authorization code from a configured provider
    ///
    /// The provider identity is linked to an existing account by provider id
    /// or by email, or a new account is provisioned. Provider-reported
    /// emails are trusted as verified. A challenged social login hands the
    /// client an opaque session token bound to the pending state.
    pub async fn social_login(
        &self,
        provider_id: &str,
        code: &str,
        client: ClientInfo,
    ) -> LoginResult<LoginOutcome> {
        let provider = self.providers.get(provider_id)?;
        let profile = provider.exchange_code(code).await?;
        let display_name = provider.display_name(&profile);

        let user = self
            .find_or_create_social_user(provider.id(), &profile, display_name)
            .await?;
        let user = self.pass_account_gates(user).await?;

        if self.two_factor_service.has_confirmed_device(user.id).await? {
            let session_token = generate_secure_token(48);
            self.session_store
                .put(
                    &session_token,
                    PENDING_SOCIAL_LOGIN_KEY,
                    &PendingSocialLogin {
                        user_id: user.id,
                        provider: provider.id().to_string(),
                        created_at: Utc::now(),
                    },
                    PENDING_SOCIAL_LOGIN_TTL_MINUTES,
                )
                .await?;

            return Ok(LoginOutcome::Challenge {
                user_id: user.id,
                provider: Some(provider.id().to_string()),
                session_token: Some(session_token),
            });
        }

        let tokens = self
            .token_service
            .issue_pair(user.id, client.user_agent, client.ip_address)
            .await?;

        Ok(LoginOutcome::Complete { tokens, user })
    }

    /// Completes a challenged social login
    ///
    /// The pending record must exist under the session token, match the
    /// claimed user, and be within its TTL; it is consumed on success.
    pub async fn social_login_verify_2fa(
        &self,
        session_token: &str,
        user_id: Uuid,
        code: &str,
        client: ClientInfo,
    ) -> LoginResult<(TokenPair, User)> {
        let pending: PendingSocialLogin = self
            .session_store
            .get(session_token, PENDING_SOCIAL_LOGIN_KEY)
            .await?
            .ok_or(LoginError::NoPendingLogin)?;

        if pending.user_id != user_id {
            return Err(LoginError::NoPendingLogin);
        }

        self.two_factor_service.verify(user_id, code).await?;

        let user = self.user_service.get_user_by_id(user_id).await?;
        let user = self.pass_account_gates(user).await?;

        let tokens = self
            .token_service
            .issue_pair(user.id, client.user_agent, client.ip_address)
            .await?;

        self.session_store
            .remove(session_token, PENDING_SOCIAL_LOGIN_KEY)
            .await?;

        Ok((tokens, user))
    }

    /// Applies the disabled and email-verification gates
    ///
    /// A verified-but-inactive account is activated in place, so users who
    /// verified through a path that predates the activation flag are never
    /// locked out.
    async fn pass_account_gates(&self, user: User) -> LoginResult<User> {
        if user.is_disabled {
            return Err(LoginError::AccountDisabled);
        }

        if !user.email_verified {
            return Err(LoginError::VerificationRequired { email: user.email });
        }

        if !user.is_active {
            sqlx::query!(
                "UPDATE users SET is_active = TRUE, updated_at = NOW() WHERE id = $1",
                user.id
            )
            .execute(&self.db_pool)
            .await?;
            log::info!("Account {} self-healed to active on login", user.id);
            return Ok(User {
                is_active: true,
                ..user
            });
        }

        Ok(user)
    }

    /// Resolves a provider identity to a local account
    async fn find_or_create_social_user(
        &self,
        provider_id: &str,
        profile: &SocialProfile,
        display_name: Option<String>,
    ) -> LoginResult<User> {
        let linked_user_id = sqlx::query_scalar!(
            r#"
            SELECT user_id FROM linked_accounts
            WHERE provider = $1 AND provider_user_id = $2
            "#,
            provider_id,
            profile.provider_user_id
        )
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(user_id) = linked_user_id {
            return Ok(self.user_service.get_user_by_id(user_id).await?);
        }

        let email = crate::utils::validation::normalize_email(&profile.email);

        let existing = sqlx::query_scalar!("SELECT id FROM users WHERE email = $1", email)
            .fetch_optional(&self.db_pool)
            .await?;

        let user_id = match existing {
            Some(user_id) => {
                // Linking a trusted provider identity also settles the email
                // verification for this account.
                sqlx::query!(
                    r#"
                    UPDATE users
                    SET email_verified = TRUE, is_active = TRUE, updated_at = NOW()
                    WHERE id = $1 AND is_disabled = FALSE
                    "#,
                    user_id
                )
                .execute(&self.db_pool)
                .await?;
                user_id
            }
            None => {
                self.provision_social_user(&email, display_name.as_deref())
                    .await?
            }
        };

        sqlx::query!(
            r#"
            INSERT INTO linked_accounts (user_id, provider, provider_user_id, provider_email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, provider_user_id) DO NOTHING
            "#,
            user_id,
            provider_id,
            profile.provider_user_id,
            email
        )
        .execute(&self.db_pool)
        .await?;

        Ok(self.user_service.get_user_by_id(user_id).await?)
    }

    /// Creates a password-less account for a first-time social login
    async fn provision_social_user(
        &self,
        email: &str,
        display_name: Option<&str>,
    ) -> LoginResult<Uuid> {
        let base = username_from_email(email);

        // The derived username can collide; retry with a random suffix.
        let mut candidate = base.clone();
        for _ in 0..5 {
            let inserted = sqlx::query_scalar!(
                r#"
                INSERT INTO users (email, username, display_name, password_hash,
                                   is_active, email_verified)
                VALUES ($1, $2, $3, NULL, TRUE, TRUE)
                ON CONFLICT (LOWER(username)) DO NOTHING
                RETURNING id
                "#,
                email,
                candidate,
                display_name
            )
            .fetch_optional(&self.db_pool)
            .await?;

            if let Some(user_id) = inserted {
                log::info!("Provisioned account {} from social login", user_id);
                return Ok(user_id);
            }

            candidate = format!("{}{}", base, generate_secure_token(4).to_lowercase());
        }

        Err(LoginError::DatabaseError(sqlx::Error::RowNotFound))
    }
}

/// Derives a valid username from an email local part
fn username_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let mut name: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    if name.len() < 3 {
        name = format!("user{}", generate_secure_token(6).to_lowercase());
    }
    name.truncate(64);
    name
}
