//! Payment Webhook
//!
//! Signed webhook deliveries from the payment processor. Each delivery is
//! authenticated with an HMAC signature over a timestamped payload, then
//! deduplicated by event id before any order state changes. Redeliveries and
//! unknown event types are acknowledged without side effects.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::utils::error::AppError;
use crate::utils::security::constant_time_compare;

type HmacSha256 = Hmac<Sha256>;

/// Custom error types for webhook handling
#[derive(Error, Debug)]
pub enum WebhookError {
    /// Signature header is missing pieces or unparsable
    #[error("Malformed signature header")]
    MalformedHeader,

    /// Signature did not verify or its timestamp is outside tolerance
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Payload is not the JSON shape we expect
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MalformedHeader => {
                AppError::BadRequest("Malformed signature header".to_string())
            }
            WebhookError::InvalidSignature => {
                AppError::BadRequest("Invalid webhook signature".to_string())
            }
            WebhookError::MalformedPayload(msg) => {
                AppError::BadRequest(format!("Malformed webhook payload: {}", msg))
            }
            WebhookError::DatabaseError(e) => AppError::Database(e),
        }
    }
}

/// Result type for webhook operations
pub type WebhookResult<T> = Result<T, WebhookError>;

/// What a delivery amounted to once authenticated
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Event applied; the named order is now paid
    OrderPaid { order_id: Uuid },

    /// Event id was seen before; nothing changed
    Duplicate,

    /// Event type is not one we act on, or it referenced no known order
    Ignored,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookData {
    #[serde(default)]
    object: WebhookObject,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookObject {
    #[serde(default)]
    metadata: WebhookMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookMetadata {
    order_id: Option<String>,
}

/// Verifies and applies payment processor webhook deliveries
#[derive(Clone)]
pub struct PaymentWebhookService {
    db_pool: PgPool,
    secret: String,
    tolerance_seconds: i64,
}

impl PaymentWebhookService {
    pub fn new(db_pool: PgPool, config: WebhookConfig) -> Self {
        Self {
            db_pool,
            secret: config.signing_secret,
            tolerance_seconds: config.tolerance_seconds,
        }
    }

    /// Verifies the `t=...,v1=...` signature header against the raw payload
    ///
    /// The signed message is `{timestamp}.{payload}`, so neither part can be
    /// swapped independently, and the timestamp must sit within the
    /// configured tolerance to blunt replay.
    pub fn verify_signature(&self, payload: &str, signature_header: &str) -> WebhookResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse().map_err(|_| WebhookError::MalformedHeader)?);
                }
                Some(("v1", value)) => signatures.push(value),
                Some(_) => {}
                None => return Err(WebhookError::MalformedHeader),
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }

        let age = (Utc::now().timestamp() - timestamp).abs();
        if age > self.tolerance_seconds {
            return Err(WebhookError::InvalidSignature);
        }

        let expected = sign_payload(&self.secret, timestamp, payload)?;
        if signatures
            .iter()
            .any(|candidate| constant_time_compare(candidate, &expected))
        {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        }
    }

    /// Applies an authenticated delivery exactly once
    pub async fn handle_event(&self, payload: &str) -> WebhookResult<WebhookDisposition> {
        let envelope: WebhookEnvelope =
            serde_json::from_str(payload).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        let inserted = sqlx::query!(
            r#"
            INSERT INTO webhook_events (event_id, event_type)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
            envelope.id,
            envelope.event_type
        )
        .execute(&self.db_pool)
        .await?;

        if inserted.rows_affected() == 0 {
            log::info!("Webhook event {} redelivered, skipping", envelope.id);
            return Ok(WebhookDisposition::Duplicate);
        }

        match envelope.event_type.as_str() {
            "payment_intent.succeeded" => self.apply_payment_succeeded(&envelope).await,
            other => {
                log::debug!("Ignoring webhook event type {}", other);
                Ok(WebhookDisposition::Ignored)
            }
        }
    }

    async fn apply_payment_succeeded(
        &self,
        envelope: &WebhookEnvelope,
    ) -> WebhookResult<WebhookDisposition> {
        let Some(order_id) = &envelope.data.object.metadata.order_id else {
            log::warn!("Payment event {} carries no order_id metadata", envelope.id);
            return Ok(WebhookDisposition::Ignored);
        };

        let Ok(order_id) = Uuid::parse_str(order_id) else {
            log::warn!("Payment event {} has an unparsable order_id", envelope.id);
            return Ok(WebhookDisposition::Ignored);
        };

        let updated = sqlx::query!(
            r#"
            UPDATE orders
            SET status = 'paid', paid_at = NOW()
            WHERE id = $1 AND status <> 'paid'
            "#,
            order_id
        )
        .execute(&self.db_pool)
        .await?;

        if updated.rows_affected() == 0 {
            log::warn!(
                "Payment event {} referenced order {} which is unknown or already paid",
                envelope.id,
                order_id
            );
            return Ok(WebhookDisposition::Ignored);
        }

        log::info!("Order {} marked paid by event {}", order_id, envelope.id);
        Ok(WebhookDisposition::OrderPaid { order_id })
    }
}

fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> WebhookResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn service(pool: PgPool) -> PaymentWebhookService {
        PaymentWebhookService::new(
            pool,
            WebhookConfig {
                signing_secret: SECRET.to_string(),
                tolerance_seconds: 300,
            },
        )
    }

    fn signed_header(payload: &str, timestamp: i64) -> String {
        format!(
            "t={},v1={}",
            timestamp,
            sign_payload(SECRET, timestamp, payload).unwrap()
        )
    }

    fn payment_event(event_id: &str, order_id: &str) -> String {
        serde_json::json!({
            "id": event_id,
            "type": "payment_intent.succeeded",
            "data": { "object": { "metadata": { "order_id": order_id } } }
        })
        .to_string()
    }

    async fn create_order(pool: &PgPool) -> Uuid {
        sqlx::query_scalar!("INSERT INTO orders (status) VALUES ('pending') RETURNING id")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_valid_signature_accepted(pool: PgPool) {
        let service = service(pool);
        let payload = r#"{"id":"evt_1","type":"ping"}"#;
        let header = signed_header(payload, Utc::now().timestamp());

        assert!(service.verify_signature(payload, &header).is_ok());
    }

    #[sqlx::test]
    async fn test_tampered_payload_rejected(pool: PgPool) {
        let service = service(pool);
        let payload = r#"{"id":"evt_1","type":"ping"}"#;
        let header = signed_header(payload, Utc::now().timestamp());

        let result = service.verify_signature(r#"{"id":"evt_2","type":"ping"}"#, &header);
        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[sqlx::test]
    async fn test_stale_timestamp_rejected(pool: PgPool) {
        let service = service(pool);
        let payload = r#"{"id":"evt_1","type":"ping"}"#;
        let stale = Utc::now().timestamp() - 3600;
        let header = signed_header(payload, stale);

        let result = service.verify_signature(payload, &header);
        assert!(matches!(result, Err(WebhookError::InvalidSignature)));
    }

    #[sqlx::test]
    async fn test_malformed_header_rejected(pool: PgPool) {
        let service = service(pool);
        let payload = r#"{}"#;

        assert!(matches!(
            service.verify_signature(payload, "garbage"),
            Err(WebhookError::MalformedHeader)
        ));
        assert!(matches!(
            service.verify_signature(payload, "t=123"),
            Err(WebhookError::MalformedHeader)
        ));
        assert!(matches!(
            service.verify_signature(payload, "v1=abcdef"),
            Err(WebhookError::MalformedHeader)
        ));
    }

    #[sqlx::test]
    async fn test_payment_succeeded_marks_order_paid(pool: PgPool) {
        let service = service(pool.clone());
        let order_id = create_order(&pool).await;

        let disposition = service
            .handle_event(&payment_event("evt_1", &order_id.to_string()))
            .await
            .unwrap();
        assert_eq!(disposition, WebhookDisposition::OrderPaid { order_id });

        let row = sqlx::query!("SELECT status, paid_at FROM orders WHERE id = $1", order_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.status, "paid");
        assert!(row.paid_at.is_some());
    }

    #[sqlx::test]
    async fn test_redelivery_is_a_noop(pool: PgPool) {
        let service = service(pool.clone());
        let order_id = create_order(&pool).await;
        let payload = payment_event("evt_1", &order_id.to_string());

        service.handle_event(&payload).await.unwrap();
        let paid_at = sqlx::query_scalar!("SELECT paid_at FROM orders WHERE id = $1", order_id)
            .fetch_one(&pool)
            .await
            .unwrap();

        let replay = service.handle_event(&payload).await.unwrap();
        assert_eq!(replay, WebhookDisposition::Duplicate);

        // paid_at is untouched by the redelivery
        let after = sqlx::query_scalar!("SELECT paid_at FROM orders WHERE id = $1", order_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(paid_at, after);
    }

    #[sqlx::test]
    async fn test_unknown_order_ignored(pool: PgPool) {
        let service = service(pool);

        let disposition = service
            .handle_event(&payment_event("evt_1", &Uuid::new_v4().to_string()))
            .await
            .unwrap();
        assert_eq!(disposition, WebhookDisposition::Ignored);
    }

    #[sqlx::test]
    async fn test_unhandled_event_type_ignored(pool: PgPool) {
        let service = service(pool);
        let payload = serde_json::json!({
            "id": "evt_2",
            "type": "charge.refunded",
            "data": { "object": {} }
        })
        .to_string();

        let disposition = service.handle_event(&payload).await.unwrap();
        assert_eq!(disposition, WebhookDisposition::Ignored);
    }
}
