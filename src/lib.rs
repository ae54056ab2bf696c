//! Storefront Auth Library
//!
//! Authentication backend for an e-commerce storefront: password and social
//! login with an optional two-factor step, SMS phone verification, JWT
//! session management, and the payment processor webhook that settles
//! orders.
//!
//! # Features
//!
//! - **Account Lifecycle**: Registration with mandatory email verification
//! - **Password Security**: bcrypt hashing with configurable cost factors
//! - **Two-Factor Auth**: TOTP devices plus single-use backup codes
//! - **Phone Verification**: SMS one-time codes with layered rate limits
//! - **Social Login**: Google and Facebook through a provider trait
//! - **Token Management**: JWT access/refresh pairs with revocable sessions
//! - **Payment Webhook**: Signed, deduplicated order-paid events
//! - **Type Safety**: Compile-time query verification with SQLx
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use storefront_auth::{
//!     service::{LoginService, LoginOutcome, ClientInfo},
//! };
//!
//! # async fn example(login_service: LoginService) -> Result<(), Box<dyn std::error::Error>> {
//! match login_service
//!     .login("alice@example.com", "SecurePass123!", ClientInfo::default())
//!     .await?
//! {
//!     LoginOutcome::Complete { tokens, user } => {
//!         println!("Logged in {} with token {}", user.email, tokens.access_token);
//!     }
//!     LoginOutcome::Challenge { user_id, .. } => {
//!         println!("Second factor required for {}", user_id);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **API Layer**: HTTP handlers, routing, and authentication middleware
//! - **Service Layer**: Login orchestration, credential store, second
//!   factors, phone OTP, tokens, and the payment webhook
//! - **Models**: Data structures and request/response payloads
//! - **Database**: Connection management
//! - **Utils**: Shared security, validation, and error handling
//!
//! # Security
//!
//! - Uniform invalid-credentials responses across unknown accounts and
//!   wrong passwords
//! - Backup codes and refresh tokens stored only as hashes
//! - Webhook signatures verified over the raw request body
//! - Phone numbers masked in all log output

/// HTTP API layer with handlers and routing
pub mod api;

/// Configuration management for all service settings
pub mod config;

/// Database connection management and configuration
pub mod database;

/// Data models and request/response structures
pub mod models;

/// Business logic services
pub mod service;

/// Shared utilities for security, validation, and error handling
pub mod utils;

// Re-export commonly used types for convenient access
pub use api::{create_routes, AppState, AuthUser};
pub use models::{
    auth::{TokenPair, UserContext},
    requests::{
        ChangePasswordRequest, ConfirmTwoFactorRequest, LoginRequest, LoginTwoFactorRequest,
        RefreshTokenRequest, RegisterRequest, SendPhoneCodeRequest, SocialLoginRequest,
        SocialLoginTwoFactorRequest, VerifyEmailRequest, VerifyPhoneRequest,
    },
    user::User,
    SocialProfile, TwoFactorSetup, TwoFactorStatus,
};
pub use service::{
    ClientInfo, LoginOutcome, LoginService, PaymentWebhookService, PhoneOtpService,
    ProviderRegistry, SessionStore, TokenService, TwoFactorService, UserService,
};
pub use utils::error::{AppError, AppResult, ErrorResponse};

// Re-export database utilities for configuration
pub use database::DatabaseConfig;

// Re-export configuration system
pub use config::{env, AppConfig, EmailConfig, JwtConfig, OtpConfig, ServerConfig, SmsConfig};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
