//! Two-Factor Authentication Models
//!
//! TOTP device and backup-code data structures.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A TOTP authenticator device registered by a user
///
/// A device starts unconfirmed after setup and becomes confirmed once the
/// user proves possession by entering a valid code. Only confirmed devices
/// participate in login challenges.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TotpDevice {
    /// Unique identifier for the device
    pub id: Uuid,

    /// Owner of the device
    pub user_id: Uuid,

    /// Base32-encoded shared secret
    pub secret: String,

    /// Whether the user has completed setup for this device
    pub confirmed: bool,

    /// Timestamp when setup began
    pub created_at: DateTime<Utc>,
}

/// Material returned when two-factor setup begins
///
/// The secret and provisioning URL are shown once so the user can load them
/// into an authenticator app; they are not retrievable afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetup {
    /// Identifier of the pending device
    pub device_id: Uuid,

    /// Base32 secret for manual entry
    pub secret: String,

    /// otpauth:// provisioning URL for QR display
    pub otpauth_url: String,
}

/// Outcome of a successful second-factor verification
#[derive(Debug, Clone, Serialize)]
pub struct SecondFactorVerification {
    /// True when a single-use backup code was consumed instead of a TOTP code
    pub used_backup_code: bool,
}

/// Current two-factor state for a user, as reported by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorStatus {
    /// Whether a confirmed device exists
    pub enabled: bool,

    /// Number of unused backup codes remaining
    pub backup_codes_remaining: i64,
}
