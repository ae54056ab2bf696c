//! Data Models
//!
//! Database row structs, domain types, and API request/response payloads.

pub mod auth;
pub mod requests;
pub mod social;
pub mod two_factor;
pub mod user;
pub mod verification;

pub use auth::{AccessTokenClaims, RefreshTokenClaims, TokenPair, UserContext};
pub use requests::*;
pub use social::{LinkedAccount, PendingSocialLogin, SocialProfile, PENDING_SOCIAL_LOGIN_KEY};
pub use two_factor::{SecondFactorVerification, TotpDevice, TwoFactorSetup, TwoFactorStatus};
pub use user::User;
pub use verification::{
    EmailVerification, EmailVerificationRow, PhoneVerification, PhoneVerificationRow, SendPermit,
};
