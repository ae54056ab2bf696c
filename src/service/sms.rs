//! SMS Gateway
//!
//! Trait seam for SMS delivery with a Twilio REST implementation and test
//! doubles. Phone numbers are masked in all log output.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::SmsConfig;
use crate::utils::security::mask_phone_number;

/// Errors surfaced by SMS delivery
#[derive(Error, Debug)]
pub enum SmsError {
    /// Provider rejected the message or returned a failure status
    #[error("SMS dispatch failed: {0}")]
    Dispatch(String),

    /// Transport-level failure talking to the provider
    #[error("SMS transport error: {0}")]
    Transport(String),
}

/// Delivery receipt returned on a successful send
#[derive(Debug, Clone)]
pub struct SmsReceipt {
    /// Provider-assigned message identifier, when available
    pub message_id: Option<String>,
}

/// Seam for SMS delivery so the OTP service can be tested without a network
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt, SmsError>;
}

/// Twilio-compatible REST gateway
pub struct TwilioGateway {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioGateway {
    pub fn new(config: SmsConfig) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SmsError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            account_sid: config.account_sid,
            auth_token: config.auth_token,
            from_number: config.from_number,
        })
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> Result<SmsReceipt, SmsError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let params = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| SmsError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            log::warn!(
                "SMS dispatch to {} failed with status {}",
                mask_phone_number(to),
                status
            );
            return Err(SmsError::Dispatch(format!(
                "provider returned status {}",
                status
            )));
        }

        let message_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("sid").and_then(|s| s.as_str()).map(String::from));

        log::info!("SMS dispatched to {}", mask_phone_number(to));
        Ok(SmsReceipt { message_id })
    }
}

/// Gateway that only logs; used when no SMS provider is configured
pub struct LoggingSmsGateway;

#[async_trait]
impl SmsGateway for LoggingSmsGateway {
    async fn send(&self, to: &str, _body: &str) -> Result<SmsReceipt, SmsError> {
        log::info!(
            "SMS provider not configured; pretending to send to {}",
            mask_phone_number(to)
        );
        Ok(SmsReceipt { message_id: None })
    }
}
