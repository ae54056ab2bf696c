//! Security Utilities
//!
//! Cryptographic functions, password hashing, and code generation.

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};

/// Default bcrypt cost for password hashing
pub const DEFAULT_BCRYPT_COST: u32 = DEFAULT_COST;

/// Number of backup codes issued when two-factor auth is confirmed
pub const BACKUP_CODE_COUNT: usize = 10;

/// Length of each backup code
pub const BACKUP_CODE_LENGTH: usize = 8;

/// Generate a cryptographically secure random string
pub fn generate_secure_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Generate a 6-digit numeric OTP code
pub fn generate_otp_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Generate a single backup code from an unambiguous uppercase alphabet
pub fn generate_backup_code() -> String {
    // 0/O and 1/I excluded so codes survive being read off paper
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    (0..BACKUP_CODE_LENGTH)
        .map(|_| {
            let idx = rand::thread_rng().gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash_password_with_cost(password, DEFAULT_BCRYPT_COST)
}

/// Hash a password with custom bcrypt cost
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

/// Verify a password against its hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Create a secure hash of sensitive data for storage
pub fn hash_sensitive_data(data: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Timing-safe string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }
    result == 0
}

/// Mask a phone number for log output, keeping only a short prefix
pub fn mask_phone_number(phone: &str) -> String {
    if phone.len() <= 5 {
        return "***".to_string();
    }
    format!("{}***", &phone[..5])
}

/// Create an expiration timestamp
pub fn create_expiration(duration_minutes: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::minutes(duration_minutes)
}

/// Check if a timestamp has expired
pub fn is_expired(expiry: DateTime<Utc>) -> bool {
    Utc::now() > expiry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_secure_token() {
        let token1 = generate_secure_token(32);
        let token2 = generate_secure_token(32);

        assert_eq!(token1.len(), 32);
        assert_eq!(token2.len(), 32);
        assert_ne!(token1, token2); // Should be different
    }

    #[test]
    fn test_generate_otp_code() {
        let otp = generate_otp_code();
        assert_eq!(otp.len(), 6);
        assert!(otp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_generate_backup_code() {
        let code = generate_backup_code();
        assert_eq!(code.len(), BACKUP_CODE_LENGTH);
        assert!(!code.contains('0'));
        assert!(!code.contains('O'));
        assert!(!code.contains('1'));
        assert!(!code.contains('I'));
    }

    #[test]
    fn test_password_hashing() {
        let password = "test_password_123";
        let hash = hash_password(password).unwrap();

        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("wrong_password", &hash).unwrap());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hello_world"));
    }

    #[test]
    fn test_hash_sensitive_data() {
        let data = "sensitive_data";
        let hash1 = hash_sensitive_data(data);
        let hash2 = hash_sensitive_data(data);

        assert_eq!(hash1, hash2); // Same input should produce same hash
        assert_eq!(hash1.len(), 64); // SHA256 produces 64-character hex string
    }

    #[test]
    fn test_mask_phone_number() {
        assert_eq!(mask_phone_number("+15551234567"), "+1555***");
        assert_eq!(mask_phone_number("+1555"), "***");
    }
}
