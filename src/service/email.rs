//! Email Gateway
//!
//! Trait seam for transactional email with a lettre SMTP implementation.
//! Message bodies are short plain-text code deliveries.

use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

use crate::config::EmailConfig;

/// Errors surfaced by email delivery
#[derive(Error, Debug)]
pub enum EmailError {
    /// Message could not be constructed
    #[error("Email build error: {0}")]
    Build(String),

    /// SMTP transport failure
    #[error("Email transport error: {0}")]
    Transport(String),

    /// Configured addresses are invalid
    #[error("Email configuration error: {0}")]
    Configuration(String),
}

/// Seam for transactional email delivery
#[async_trait]
pub trait EmailGateway: Send + Sync {
    /// Deliver the account verification code
    async fn send_verification_email(
        &self,
        to: &str,
        display_name: &str,
        code: &str,
        expires_minutes: i64,
    ) -> Result<(), EmailError>;
}

/// SMTP implementation backed by lettre
pub struct SmtpEmailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailer {
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| EmailError::Transport(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ))
            .build();

        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|_| {
                EmailError::Configuration(format!("invalid from address: {}", config.from_email))
            })?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailGateway for SmtpEmailer {
    async fn send_verification_email(
        &self,
        to: &str,
        display_name: &str,
        code: &str,
        expires_minutes: i64,
    ) -> Result<(), EmailError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|_| EmailError::Build(format!("invalid recipient address: {}", to)))?;

        let body = format!(
            "Hi {},\n\nYour verification code is {}. It expires in {} minutes.\n\n\
             If you did not create an account, you can ignore this message.\n",
            display_name, code, expires_minutes
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject("Verify your email address")
            .body(body)
            .map_err(|e| EmailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        log::info!("Verification email dispatched to {}", to);
        Ok(())
    }
}

/// Gateway that only logs; used when no SMTP provider is configured
pub struct LoggingEmailGateway;

#[async_trait]
impl EmailGateway for LoggingEmailGateway {
    async fn send_verification_email(
        &self,
        to: &str,
        _display_name: &str,
        _code: &str,
        _expires_minutes: i64,
    ) -> Result<(), EmailError> {
        log::info!(
            "Email provider not configured; pretending to send verification email to {}",
            to
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captured verification email for assertions
    #[derive(Debug, Clone)]
    pub struct SentVerification {
        pub to: String,
        pub code: String,
    }

    /// Recording double that captures every verification email
    #[derive(Default)]
    pub struct RecordingEmailGateway {
        pub sent: Mutex<Vec<SentVerification>>,
    }

    impl RecordingEmailGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn last_code(&self) -> Option<String> {
            self.sent.lock().unwrap().last().map(|s| s.code.clone())
        }
    }

    #[async_trait]
    impl EmailGateway for RecordingEmailGateway {
        async fn send_verification_email(
            &self,
            to: &str,
            _display_name: &str,
            code: &str,
            _expires_minutes: i64,
        ) -> Result<(), EmailError> {
            self.sent.lock().unwrap().push(SentVerification {
                to: to.to_string(),
                code: code.to_string(),
            });
            Ok(())
        }
    }
}
