//! Stripe payment provider client.
//!
//! Implements the PaymentIntents API for payment initiation and webhook
//! signature verification for asynchronous payment confirmation.

use super::PaymentError;
use crate::config::StripeConfig;
use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;

/// Stripe client for interacting with the Stripe API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

/// Stripe PaymentIntent, as returned by create/retrieve.
#[derive(Debug, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    /// Amount in the smallest currency unit (cents).
    pub amount: i64,
    #[serde(default)]
    pub amount_received: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Stripe API error response.
#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

/// Charge object carried by `charge.refunded` events. Only the fields the
/// reconciler acts on.
#[derive(Debug, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    pub payment_intent: Option<String>,
}

/// A webhook delivery, parsed into the event kinds this service reconciles.
#[derive(Debug)]
pub enum StripeEvent {
    PaymentIntentSucceeded(PaymentIntent),
    PaymentIntentFailed(PaymentIntent),
    ChargeRefunded(ChargeObject),
    Other(String),
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: serde_json::Value,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if Stripe is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.secret_key.expose_secret().is_empty()
    }

    /// Create a PaymentIntent for an amount in the smallest currency unit.
    /// Metadata is attached for later correlation by the webhook reconciler.
    pub async fn create_payment_intent(
        &self,
        amount: i64,
        currency: &str,
        metadata: &[(&str, &str)],
    ) -> Result<PaymentIntent, PaymentError> {
        if !self.is_configured() {
            return Err(PaymentError::GatewayUnavailable(anyhow!(
                "Stripe credentials not configured"
            )));
        }

        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), amount.to_string()),
            ("currency".to_string(), currency.to_string()),
        ];
        for (key, value) in metadata {
            form.push((format!("metadata[{}]", key), value.to_string()));
        }

        let url = format!("{}/payment_intents", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;

        tracing::debug!(status = %status, "Stripe create payment intent response");

        if status.is_success() {
            let intent: PaymentIntent = serde_json::from_str(&body)
                .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;
            tracing::info!(
                payment_intent_id = %intent.id,
                amount = intent.amount,
                currency = %intent.currency,
                "Stripe payment intent created"
            );
            Ok(intent)
        } else {
            Err(self.classify_error(status, &body))
        }
    }

    /// Fetch an existing PaymentIntent by id.
    pub async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, PaymentError> {
        if !self.is_configured() {
            return Err(PaymentError::GatewayUnavailable(anyhow!(
                "Stripe credentials not configured"
            )));
        }

        let url = format!("{}/payment_intents/{}", self.config.api_base_url, id);

        let response = self
            .client
            .get(&url)
            .basic_auth(self.config.secret_key.expose_secret(), None::<&str>)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;

        if status.is_success() {
            let intent: PaymentIntent = serde_json::from_str(&body)
                .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;
            Ok(intent)
        } else {
            Err(self.classify_error(status, &body))
        }
    }

    fn classify_error(&self, status: reqwest::StatusCode, body: &str) -> PaymentError {
        let detail = serde_json::from_str::<StripeErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or(StripeErrorDetail {
                kind: None,
                code: None,
                message: None,
            });

        tracing::error!(
            status = %status,
            kind = ?detail.kind,
            code = ?detail.code,
            message = ?detail.message,
            "Stripe request failed"
        );

        if status.is_client_error() && status != reqwest::StatusCode::UNAUTHORIZED {
            PaymentError::GatewayRejected(
                "The payment request was rejected by the card processor.".to_string(),
            )
        } else {
            PaymentError::GatewayUnavailable(anyhow!("Stripe error: {}", status))
        }
    }

    /// Verify a webhook signature header of the form `t=<unix>,v1=<hex>`.
    ///
    /// The signature is computed as `HMAC-SHA256("{t}.{body}", webhook_secret)`.
    pub fn verify_webhook_signature(&self, body: &str, signature_header: &str) -> Result<bool> {
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for part in signature_header.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = Some(value),
                    "v1" => candidates.push(value),
                    _ => {}
                }
            }
        }

        let timestamp = match timestamp {
            Some(t) if !candidates.is_empty() => t,
            _ => return Ok(false),
        };

        let signed_payload = format!("{}.{}", timestamp, body);
        let expected = compute_signature(
            &signed_payload,
            self.config.webhook_secret.expose_secret(),
        )?;

        Ok(candidates.iter().any(|candidate| *candidate == expected))
    }

    /// Parse a verified webhook body into the event kinds the reconciler
    /// acts on. Unknown event types are preserved by name so the caller can
    /// acknowledge and ignore them.
    pub fn parse_webhook_event(&self, body: &str) -> Result<StripeEvent> {
        let envelope: WebhookEnvelope = serde_json::from_str(body)?;
        let event = match envelope.event_type.as_str() {
            "payment_intent.succeeded" => {
                StripeEvent::PaymentIntentSucceeded(serde_json::from_value(envelope.data.object)?)
            }
            "payment_intent.payment_failed" => {
                StripeEvent::PaymentIntentFailed(serde_json::from_value(envelope.data.object)?)
            }
            "charge.refunded" => {
                StripeEvent::ChargeRefunded(serde_json::from_value(envelope.data.object)?)
            }
            other => StripeEvent::Other(other.to_string()),
        };
        Ok(event)
    }
}

/// Compute an HMAC-SHA256 signature, hex encoded.
fn compute_signature(payload: &str, secret: &str) -> Result<String> {
    type HmacSha256 = Hmac<sha2::Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| anyhow!("Invalid key length"))?;
    mac.update(payload.as_bytes());
    let result = mac.finalize();
    Ok(hex::encode(result.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: Secret::new("sk_test_123".to_string()),
            webhook_secret: Secret::new("whsec_test".to_string()),
            api_base_url: "https://api.stripe.com/v1".to_string(),
        }
    }

    fn sign(body: &str, timestamp: &str, secret: &str) -> String {
        let payload = format!("{}.{}", timestamp, body);
        compute_signature(&payload, secret).unwrap()
    }

    #[test]
    fn test_is_configured() {
        let client = StripeClient::new(test_config());
        assert!(client.is_configured());

        let empty_config = StripeConfig {
            secret_key: Secret::new("".to_string()),
            webhook_secret: Secret::new("".to_string()),
            api_base_url: "".to_string(),
        };
        let client = StripeClient::new(empty_config);
        assert!(!client.is_configured());
    }

    #[test]
    fn test_webhook_signature_verification() {
        let client = StripeClient::new(test_config());

        let body = r#"{"type":"payment_intent.succeeded"}"#;
        let signature = sign(body, "1492774577", "whsec_test");
        let header = format!("t=1492774577,v1={}", signature);

        assert!(client.verify_webhook_signature(body, &header).unwrap());
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let client = StripeClient::new(test_config());

        let body = r#"{"type":"payment_intent.succeeded"}"#;
        let signature = sign(body, "1492774577", "whsec_test");
        let header = format!("t=1492774577,v1={}", signature);

        let tampered = r#"{"type":"payment_intent.payment_failed"}"#;
        assert!(!client.verify_webhook_signature(tampered, &header).unwrap());
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        let client = StripeClient::new(test_config());
        let body = "{}";

        assert!(!client.verify_webhook_signature(body, "").unwrap());
        assert!(!client.verify_webhook_signature(body, "v1=abc").unwrap());
        assert!(!client.verify_webhook_signature(body, "t=123").unwrap());
    }

    #[test]
    fn test_parse_succeeded_event() {
        let client = StripeClient::new(test_config());
        let body = r#"{
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_123",
                "amount": 250000,
                "amount_received": 250000,
                "currency": "kes",
                "status": "succeeded",
                "metadata": { "booking_id": "b1" }
            }}
        }"#;

        match client.parse_webhook_event(body).unwrap() {
            StripeEvent::PaymentIntentSucceeded(intent) => {
                assert_eq!(intent.id, "pi_123");
                assert_eq!(intent.amount_received, 250000);
                assert_eq!(intent.metadata.get("booking_id").unwrap(), "b1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_refund_event() {
        let client = StripeClient::new(test_config());
        let body = r#"{
            "type": "charge.refunded",
            "data": { "object": { "id": "ch_1", "payment_intent": "pi_123" } }
        }"#;

        match client.parse_webhook_event(body).unwrap() {
            StripeEvent::ChargeRefunded(charge) => {
                assert_eq!(charge.payment_intent.as_deref(), Some("pi_123"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type_is_preserved() {
        let client = StripeClient::new(test_config());
        let body = r#"{ "type": "customer.created", "data": { "object": {} } }"#;

        match client.parse_webhook_event(body).unwrap() {
            StripeEvent::Other(kind) => assert_eq!(kind, "customer.created"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
