//! Token Issuer
//!
//! JWT access/refresh pair generation, validation, and session management.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::PgPool;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AccessTokenClaims, RefreshTokenClaims, TokenPair, UserContext};
use crate::utils::error::AppError;

/// Custom error types for the token service
#[derive(Error, Debug)]
pub enum TokenServiceError {
    /// Token failed validation or its session is gone
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token could not be encoded
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<TokenServiceError> for AppError {
    fn from(err: TokenServiceError) -> Self {
        match err {
            TokenServiceError::InvalidToken(msg) => AppError::Authentication(msg),
            TokenServiceError::TokenGeneration(msg) => {
                AppError::Internal(format!("Token generation failed: {}", msg))
            }
            TokenServiceError::Database(e) => AppError::Database(e),
        }
    }
}

/// Result type for token service operations
pub type TokenServiceResult<T> = Result<T, TokenServiceError>;

/// Token service for JWT issuance and refresh-session management
#[derive(Clone)]
pub struct TokenService {
    /// Database connection pool
    pool: PgPool,
    /// JWT access token secret
    access_secret: String,
    /// JWT refresh token secret
    refresh_secret: String,
    /// Access token expiration duration (default: 1 hour)
    access_token_expires_in: Duration,
    /// Refresh token expiration duration (default: 30 days)
    refresh_token_expires_in: Duration,
}

impl TokenService {
    /// Create a new token service instance
    pub fn new(pool: PgPool, access_secret: String, refresh_secret: String) -> Self {
        Self {
            pool,
            access_secret,
            refresh_secret,
            access_token_expires_in: Duration::hours(1),
            refresh_token_expires_in: Duration::days(30),
        }
    }

    /// Create a new token service with custom token expiration times
    pub fn with_expiration(
        pool: PgPool,
        access_secret: String,
        refresh_secret: String,
        access_expires_in: Duration,
        refresh_expires_in: Duration,
    ) -> Self {
        Self {
            pool,
            access_secret,
            refresh_secret,
            access_token_expires_in: access_expires_in,
            refresh_token_expires_in: refresh_expires_in,
        }
    }

    /// Generate a new access and refresh token pair for a user
    pub async fn issue_pair(
        &self,
        user_id: Uuid,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> TokenServiceResult<TokenPair> {
        let now = Utc::now();
        let access_expires_at = now + self.access_token_expires_in;
        let refresh_expires_at = now + self.refresh_token_expires_in;

        let access_claims = AccessTokenClaims::new(user_id, access_expires_at, now);
        let access_token = self.encode_access_token(&access_claims)?;

        let session_id = Uuid::new_v4();
        let refresh_claims = RefreshTokenClaims::new(user_id, session_id, refresh_expires_at, now);
        let refresh_token = self.encode_refresh_token(&refresh_claims)?;

        let token_hash = self.hash_token(&refresh_token);
        let ip_network = ip_address
            .as_ref()
            .and_then(|ip| IpNetwork::from_str(ip).ok());

        sqlx::query!(
            r#"
            INSERT INTO auth_sessions (id, user_id, refresh_token_hash, expires_at, user_agent, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            session_id,
            user_id,
            token_hash,
            refresh_expires_at,
            user_agent,
            ip_network as Option<IpNetwork>
        )
        .execute(&self.pool)
        .await?;

        Ok(TokenPair::new(
            access_token,
            refresh_token,
            self.access_token_expires_in.num_seconds(),
        ))
    }

    /// Refresh an access token using a valid refresh token
    pub async fn refresh_access_token(&self, refresh_token: &str) -> TokenServiceResult<TokenPair> {
        let refresh_claims = self.decode_refresh_token(refresh_token)?;
        let session_id = Uuid::parse_str(&refresh_claims.session_id)
            .map_err(|_| TokenServiceError::InvalidToken("Invalid session ID in token".into()))?;

        // One statement resolves the session, checks the stored hash and the
        // expiry, and stamps last_used_at. A revoked, rotated, or expired
        // session all surface as the same missing row; stale rows are left
        // for cleanup_expired_sessions.
        let token_hash = self.hash_token(refresh_token);
        let user_id = sqlx::query_scalar!(
            r#"
            UPDATE auth_sessions
            SET last_used_at = NOW()
            WHERE id = $1 AND refresh_token_hash = $2 AND expires_at > NOW()
            RETURNING user_id
            "#,
            session_id,
            token_hash
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TokenServiceError::InvalidToken("Refresh session not found".into()))?;

        let now = Utc::now();
        let access_expires_at = now + self.access_token_expires_in;
        let access_claims = AccessTokenClaims::new(user_id, access_expires_at, now);
        let access_token = self.encode_access_token(&access_claims)?;

        Ok(TokenPair::new(
            access_token,
            refresh_token.to_string(),
            self.access_token_expires_in.num_seconds(),
        ))
    }

    /// Validate an access token and extract user context
    pub fn validate_access_token(&self, token: &str) -> TokenServiceResult<UserContext> {
        let claims = self.decode_access_token(token)?;
        UserContext::from_access_claims(&claims)
            .map_err(|_| TokenServiceError::InvalidToken("Invalid user ID in token".into()))
    }

    /// Revoke a refresh token by deleting its session
    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> TokenServiceResult<()> {
        let claims = self.decode_refresh_token(refresh_token)?;
        let session_id = Uuid::parse_str(&claims.session_id)
            .map_err(|_| TokenServiceError::InvalidToken("Invalid session ID in token".into()))?;

        sqlx::query!("DELETE FROM auth_sessions WHERE id = $1", session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Revoke all sessions for a user (logout from all devices)
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> TokenServiceResult<()> {
        sqlx::query!("DELETE FROM auth_sessions WHERE user_id = $1", user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Clean up expired sessions from the database
    pub async fn cleanup_expired_sessions(&self) -> TokenServiceResult<u64> {
        let result = sqlx::query!("DELETE FROM auth_sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Encode an access token with the given claims
    fn encode_access_token(&self, claims: &AccessTokenClaims) -> TokenServiceResult<String> {
        let header = Header::new(Algorithm::HS256);
        let encoding_key = EncodingKey::from_secret(self.access_secret.as_ref());

        encode(&header, claims, &encoding_key)
            .map_err(|e| TokenServiceError::TokenGeneration(e.to_string()))
    }

    /// Encode a refresh token with the given claims
    fn encode_refresh_token(&self, claims: &RefreshTokenClaims) -> TokenServiceResult<String> {
        let header = Header::new(Algorithm::HS256);
        let encoding_key = EncodingKey::from_secret(self.refresh_secret.as_ref());

        encode(&header, claims, &encoding_key)
            .map_err(|e| TokenServiceError::TokenGeneration(e.to_string()))
    }

    /// Decode and validate an access token
    fn decode_access_token(&self, token: &str) -> TokenServiceResult<AccessTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;

        let decoding_key = DecodingKey::from_secret(self.access_secret.as_ref());

        decode::<AccessTokenClaims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenServiceError::InvalidToken(e.to_string()))
    }

    /// Decode and validate a refresh token
    fn decode_refresh_token(&self, token: &str) -> TokenServiceResult<RefreshTokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;

        let decoding_key = DecodingKey::from_secret(self.refresh_secret.as_ref());

        decode::<RefreshTokenClaims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenServiceError::InvalidToken(e.to_string()))
    }

    /// Hash a token using SHA-256 for secure storage
    fn hash_token(&self, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service(pool: sqlx::PgPool) -> TokenService {
        TokenService::new(
            pool,
            "test_access_secret_key".to_string(),
            "test_refresh_secret_key".to_string(),
        )
    }

    async fn create_test_user(pool: &sqlx::PgPool) -> Uuid {
        sqlx::query_scalar!(
            r#"
            INSERT INTO users (email, username, is_active, email_verified)
            VALUES ('token-user@example.com', 'token-user', TRUE, TRUE)
            RETURNING id
            "#
        )
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn test_token_hash(pool: sqlx::PgPool) {
        let service = create_test_service(pool);
        let token = "test_token";
        let hash1 = service.hash_token(token);
        let hash2 = service.hash_token(token);

        // Same token should produce same hash
        assert_eq!(hash1, hash2);

        let different_hash = service.hash_token("different_token");
        assert_ne!(hash1, different_hash);
    }

    #[sqlx::test]
    async fn test_access_token_encoding_decoding(pool: sqlx::PgPool) {
        let service = create_test_service(pool);
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + Duration::hours(1);

        let claims = AccessTokenClaims::new(user_id, expires_at, now);
        let token = service.encode_access_token(&claims).unwrap();
        let decoded_claims = service.decode_access_token(&token).unwrap();

        assert_eq!(claims.sub, decoded_claims.sub);
        assert_eq!(claims.token_type, decoded_claims.token_type);
    }

    #[sqlx::test]
    async fn test_issue_pair_and_refresh(pool: sqlx::PgPool) {
        let service = create_test_service(pool.clone());
        let user_id = create_test_user(&pool).await;

        let pair = service.issue_pair(user_id, None, None).await.unwrap();
        assert_eq!(pair.token_type, "Bearer");

        let context = service.validate_access_token(&pair.access_token).unwrap();
        assert_eq!(context.user_id, user_id);

        let refreshed = service
            .refresh_access_token(&pair.refresh_token)
            .await
            .unwrap();
        assert_eq!(refreshed.refresh_token, pair.refresh_token);
        let refreshed_context = service
            .validate_access_token(&refreshed.access_token)
            .unwrap();
        assert_eq!(refreshed_context.user_id, user_id);
    }

    #[sqlx::test]
    async fn test_revoked_refresh_token_rejected(pool: sqlx::PgPool) {
        let service = create_test_service(pool.clone());
        let user_id = create_test_user(&pool).await;

        let pair = service.issue_pair(user_id, None, None).await.unwrap();
        service
            .revoke_refresh_token(&pair.refresh_token)
            .await
            .unwrap();

        let result = service.refresh_access_token(&pair.refresh_token).await;
        assert!(matches!(result, Err(TokenServiceError::InvalidToken(_))));
    }

    #[sqlx::test]
    async fn test_expired_session_rejected(pool: sqlx::PgPool) {
        let service = create_test_service(pool.clone());
        let user_id = create_test_user(&pool).await;

        let pair = service.issue_pair(user_id, None, None).await.unwrap();
        sqlx::query!(
            "UPDATE auth_sessions SET expires_at = NOW() - INTERVAL '1 minute' WHERE user_id = $1",
            user_id
        )
        .execute(&pool)
        .await
        .unwrap();

        let result = service.refresh_access_token(&pair.refresh_token).await;
        assert!(matches!(result, Err(TokenServiceError::InvalidToken(_))));

        let removed = service.cleanup_expired_sessions().await.unwrap();
        assert_eq!(removed, 1);
    }

    #[sqlx::test]
    async fn test_revoke_all_for_user(pool: sqlx::PgPool) {
        let service = create_test_service(pool.clone());
        let user_id = create_test_user(&pool).await;

        let first = service.issue_pair(user_id, None, None).await.unwrap();
        let second = service.issue_pair(user_id, None, None).await.unwrap();

        service.revoke_all_for_user(user_id).await.unwrap();

        assert!(service.refresh_access_token(&first.refresh_token).await.is_err());
        assert!(service.refresh_access_token(&second.refresh_token).await.is_err());
    }
}
