//! Configuration Module
//!
//! Centralized configuration management for the service: server, database,
//! JWT, email, SMS, OAuth providers, OTP limits, and the payment webhook.

/// Environment variable helpers
pub mod env {
    use std::env;

    /// Get environment variable as string with default
    pub fn get_string(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get environment variable as boolean with default
    pub fn get_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u32 with default
    pub fn get_u32(key: &str, default: u32) -> u32 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u16 with default
    pub fn get_u16(key: &str, default: u16) -> u16 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u64 with default
    pub fn get_u64(key: &str, default: u64) -> u64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as i64 with default
    pub fn get_i64(key: &str, default: i64) -> i64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Check if environment variable is set
    pub fn is_set(key: &str) -> bool {
        env::var(key).is_ok()
    }

    /// Get required environment variable or panic
    pub fn get_required(key: &str) -> String {
        env::var(key).unwrap_or_else(|_| panic!("Required environment variable {} is not set", key))
    }
}

/// Application configuration combining all service configurations
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT configuration
    pub jwt: JwtConfig,

    /// OTP limits and windows
    pub otp: OtpConfig,

    /// Email configuration (optional; codes are logged as sent when absent)
    pub email: Option<EmailConfig>,

    /// SMS configuration (optional)
    pub sms: Option<SmsConfig>,

    /// OAuth provider configuration (optional)
    pub oauth: Option<OAuthConfig>,

    /// Payment webhook configuration (optional)
    pub webhook: Option<WebhookConfig>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub cors_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_expires_hours: i64,
    pub refresh_token_expires_days: i64,
}

/// Phone OTP limits
#[derive(Debug, Clone)]
pub struct OtpConfig {
    /// Code lifetime in minutes
    pub code_ttl_minutes: i64,

    /// Maximum codes sent per phone number per hour
    pub max_sends_per_hour: u32,

    /// Maximum wrong guesses per pending code
    pub max_attempts_per_code: i32,

    /// Maximum fast-path verification attempts per minute
    pub max_verify_attempts_per_minute: u32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_ttl_minutes: env::get_i64("OTP_CODE_TTL_MINUTES", 10),
            max_sends_per_hour: env::get_u32("OTP_MAX_SENDS_PER_HOUR", 5),
            max_attempts_per_code: env::get_i64("OTP_MAX_ATTEMPTS_PER_CODE", 5) as i32,
            max_verify_attempts_per_minute: env::get_u32("OTP_MAX_VERIFY_PER_MINUTE", 6),
        }
    }
}

/// Email service configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_name: String,
    pub from_email: String,
}

/// SMS gateway configuration (Twilio-compatible REST API)
#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

/// OAuth provider configuration
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub google: Option<ProviderCredentials>,
    pub facebook: Option<ProviderCredentials>,
}

/// Client credentials for a single OAuth provider
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Payment webhook configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared secret used to verify webhook signatures
    pub signing_secret: String,

    /// Accepted clock drift on the signature timestamp, in seconds
    pub tolerance_seconds: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env::get_string("SERVER_HOST", "0.0.0.0"),
            port: env::get_u16("SERVER_PORT", 3000),
            log_level: env::get_string("LOG_LEVEL", "info"),
            cors_origins: env::get_string("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::get_required("DATABASE_URL"),
            max_connections: env::get_u32("DB_MAX_CONNECTIONS", 10),
            min_connections: env::get_u32("DB_MIN_CONNECTIONS", 1),
            connect_timeout_seconds: env::get_u64("DB_CONNECT_TIMEOUT", 10),
            idle_timeout_seconds: env::get_u64("DB_IDLE_TIMEOUT", 600),
            max_lifetime_seconds: env::get_u64("DB_MAX_LIFETIME", 3600),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            access_secret: env::get_required("JWT_ACCESS_SECRET"),
            refresh_secret: env::get_required("JWT_REFRESH_SECRET"),
            access_token_expires_hours: env::get_i64("JWT_ACCESS_EXPIRES_HOURS", 1),
            refresh_token_expires_days: env::get_i64("JWT_REFRESH_EXPIRES_DAYS", 30),
        }
    }
}

impl EmailConfig {
    pub fn from_env() -> Option<Self> {
        if !env::is_set("SMTP_HOST") {
            return None;
        }

        Some(Self {
            smtp_host: env::get_required("SMTP_HOST"),
            smtp_port: env::get_u16("SMTP_PORT", 587),
            smtp_username: env::get_required("SMTP_USERNAME"),
            smtp_password: env::get_required("SMTP_PASSWORD"),
            from_name: env::get_string("SMTP_FROM_NAME", "Storefront"),
            from_email: env::get_required("SMTP_FROM_EMAIL"),
        })
    }
}

impl SmsConfig {
    pub fn from_env() -> Option<Self> {
        if !env::is_set("TWILIO_ACCOUNT_SID") {
            return None;
        }

        Some(Self {
            account_sid: env::get_required("TWILIO_ACCOUNT_SID"),
            auth_token: env::get_required("TWILIO_AUTH_TOKEN"),
            from_number: env::get_required("TWILIO_FROM_NUMBER"),
        })
    }
}

impl OAuthConfig {
    pub fn from_env() -> Option<Self> {
        let google = ProviderCredentials::from_env("GOOGLE");
        let facebook = ProviderCredentials::from_env("FACEBOOK");

        if google.is_none() && facebook.is_none() {
            return None;
        }

        Some(Self { google, facebook })
    }
}

impl ProviderCredentials {
    fn from_env(prefix: &str) -> Option<Self> {
        let id_key = format!("{}_CLIENT_ID", prefix);
        if !env::is_set(&id_key) {
            return None;
        }

        Some(Self {
            client_id: env::get_required(&id_key),
            client_secret: env::get_required(&format!("{}_CLIENT_SECRET", prefix)),
            redirect_uri: env::get_required(&format!("{}_REDIRECT_URI", prefix)),
        })
    }
}

impl WebhookConfig {
    pub fn from_env() -> Option<Self> {
        if !env::is_set("PAYMENT_WEBHOOK_SECRET") {
            return None;
        }

        Some(Self {
            signing_secret: env::get_required("PAYMENT_WEBHOOK_SECRET"),
            tolerance_seconds: env::get_i64("PAYMENT_WEBHOOK_TOLERANCE_SECONDS", 300),
        })
    }
}

impl AppConfig {
    /// Load complete application configuration from environment
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            jwt: JwtConfig::default(),
            otp: OtpConfig::default(),
            email: EmailConfig::from_env(),
            sms: SmsConfig::from_env(),
            oauth: OAuthConfig::from_env(),
            webhook: WebhookConfig::from_env(),
        })
    }

    /// Validate the complete configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".into());
        }

        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".into());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err("Database min_connections cannot be greater than max_connections".into());
        }

        if self.jwt.access_secret.is_empty() {
            return Err("JWT access secret cannot be empty".into());
        }

        if self.jwt.refresh_secret.is_empty() {
            return Err("JWT refresh secret cannot be empty".into());
        }

        if self.jwt.access_secret == self.jwt.refresh_secret {
            return Err("JWT access and refresh secrets must be different".into());
        }

        if self.otp.max_sends_per_hour == 0 || self.otp.max_attempts_per_code <= 0 {
            return Err("OTP limits must be greater than 0".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_otp_config_default() {
        let config = OtpConfig::default();
        assert_eq!(config.code_ttl_minutes, 10);
        assert_eq!(config.max_sends_per_hour, 5);
        assert_eq!(config.max_attempts_per_code, 5);
    }

    #[test]
    fn test_env_helpers() {
        assert!(env::get_bool("NONEXISTENT_BOOL", true));
        assert!(!env::get_bool("NONEXISTENT_BOOL", false));
        assert_eq!(env::get_u32("NONEXISTENT_U32", 42), 42);
        assert_eq!(env::get_string("NONEXISTENT_STRING", "default"), "default");
    }
}
