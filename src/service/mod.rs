//! Service Layer
//!
//! Business logic built on the database pool and the outbound gateway seams.

pub mod email;
pub mod login;
pub mod phone_otp;
pub mod session;
pub mod sms;
pub mod social;
pub mod token;
pub mod two_factor;
pub mod user;
pub mod webhook;

pub use email::{EmailError, EmailGateway, LoggingEmailGateway, SmtpEmailer};
pub use login::{ClientInfo, LoginError, LoginOutcome, LoginResult, LoginService};
pub use phone_otp::{PhoneOtpError, PhoneOtpResult, PhoneOtpService, SentCode};
pub use session::{SessionStore, SessionStoreError, SessionStoreResult};
pub use sms::{LoggingSmsGateway, SmsError, SmsGateway, SmsReceipt, TwilioGateway};
pub use social::{
    FacebookProvider, GoogleProvider, ProviderRegistry, SocialProvider, SocialProviderError,
};
pub use token::{TokenService, TokenServiceError, TokenServiceResult};
pub use two_factor::{TwoFactorError, TwoFactorResult, TwoFactorService};
pub use user::{UserService, UserServiceError, UserServiceResult};
pub use webhook::{PaymentWebhookService, WebhookDisposition, WebhookError, WebhookResult};
