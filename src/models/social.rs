//! Social Login Models
//!
//! Provider profiles, linked accounts, and the pending-login record used to
//! bridge a social login across a two-factor challenge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile data fetched from an identity provider after a code exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialProfile {
    /// Provider's stable identifier for this user
    pub provider_user_id: String,

    /// Email address the provider reports (trusted as verified)
    pub email: String,

    /// Full name, when the provider supplies one
    pub name: Option<String>,

    /// Given name component, when supplied separately
    pub given_name: Option<String>,

    /// Family name component, when supplied separately
    pub family_name: Option<String>,

    /// Avatar URL, when the provider supplies one
    pub avatar_url: Option<String>,
}

/// A provider identity linked to a local account
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LinkedAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_user_id: String,
    pub provider_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server-side record of a social login interrupted by a two-factor
/// challenge
///
/// Stored in the session store under the hash of an opaque token handed to
/// the client, so the pending state cannot be forged or replayed after its
/// TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSocialLogin {
    /// User whose login is awaiting a second factor
    pub user_id: Uuid,

    /// Provider that authenticated the first factor
    pub provider: String,

    /// When the challenge was issued
    pub created_at: DateTime<Utc>,
}

/// Session entry key for the pending social login record
pub const PENDING_SOCIAL_LOGIN_KEY: &str = "pending_social_login";
