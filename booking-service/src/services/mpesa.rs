//! M-Pesa (Daraja) STK Push client.
//!
//! Implements OAuth token acquisition with in-process caching and STK Push
//! initiation. Payment outcomes always arrive later through the asynchronous
//! callback route, never from the initiation response.

use super::PaymentError;
use crate::config::MpesaConfig;
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime as ChronoDateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Access tokens are valid for one hour.
const TOKEN_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Clone)]
pub struct MpesaClient {
    client: Client,
    config: MpesaConfig,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct StkPushPayload {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "PhoneNumber")]
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    call_back_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

/// Gateway acknowledgment that the push was accepted for processing.
#[derive(Debug, Deserialize)]
pub struct StkPushAck {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
    #[serde(rename = "ResponseCode")]
    pub response_code: Option<String>,
    #[serde(rename = "ResponseDescription")]
    pub response_description: Option<String>,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MpesaErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Check if M-Pesa is configured (credentials are set).
    pub fn is_configured(&self) -> bool {
        !self.config.consumer_key.expose_secret().is_empty()
            && !self.config.consumer_secret.expose_secret().is_empty()
    }

    /// Obtain an OAuth access token, reusing a cached one while it is valid.
    async fn access_token(&self) -> Result<String> {
        if !self.is_configured() {
            return Err(anyhow!("M-Pesa credentials not configured"));
        }

        let now = Utc::now().timestamp_millis();
        if let Some(cached) = self.token_cache.read().await.as_ref() {
            if cached.expires_at > now {
                return Ok(cached.token.clone());
            }
        }

        let auth = general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.config.consumer_key.expose_secret(),
            self.config.consumer_secret.expose_secret()
        ));

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.api_base_url
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Basic {}", auth))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "M-Pesa token request failed");
            return Err(anyhow!("M-Pesa token request failed: {}", status));
        }

        let token: TokenResponse = response.json().await?;

        *self.token_cache.write().await = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: now + TOKEN_TTL_MS,
        });

        Ok(token.access_token)
    }

    /// Initiate an STK push for a booking.
    ///
    /// A successful return means only that the gateway accepted the push
    /// request; the payment outcome arrives later via the callback route.
    pub async fn stk_push(
        &self,
        booking_id: Uuid,
        phone_number: &str,
        amount: u64,
    ) -> Result<StkPushAck, PaymentError> {
        let token = self
            .access_token()
            .await
            .map_err(PaymentError::GatewayUnavailable)?;

        let timestamp = stk_timestamp(Utc::now());
        let password = stk_password(
            &self.config.short_code,
            self.config.passkey.expose_secret(),
            &timestamp,
        );

        let booking_ref = booking_id.to_string();
        let payload = StkPushPayload {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            transaction_type: self.config.transaction_type.clone(),
            amount: amount.to_string(),
            party_a: phone_number.to_string(),
            party_b: self.config.short_code.clone(),
            phone_number: phone_number.to_string(),
            call_back_url: format!(
                "{}/payments/mpesa/callback",
                self.config.callback_base_url.trim_end_matches('/')
            ),
            account_reference: booking_ref[..12].to_string(),
            transaction_desc: format!("Payment for Booking {}", &booking_ref[..10]),
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.api_base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;

        tracing::debug!(status = %status, body = %body, "M-Pesa stkpush response");

        if status.is_success() {
            let ack: StkPushAck = serde_json::from_str(&body)
                .map_err(|e| PaymentError::GatewayUnavailable(e.into()))?;
            Ok(ack)
        } else {
            let error = serde_json::from_str::<MpesaErrorBody>(&body).unwrap_or(MpesaErrorBody {
                error_code: None,
                error_message: None,
            });
            tracing::error!(
                status = %status,
                code = ?error.error_code,
                message = ?error.error_message,
                "M-Pesa STK push failed"
            );

            if status.is_client_error() {
                Err(PaymentError::GatewayRejected(
                    "The payment request was rejected by M-Pesa. Check the phone number and try again."
                        .to_string(),
                ))
            } else {
                Err(PaymentError::GatewayUnavailable(anyhow!(
                    "M-Pesa error: {}",
                    status
                )))
            }
        }
    }
}

/// Daraja timestamp format: `YYYYMMDDHHMMSS`.
fn stk_timestamp(now: ChronoDateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// STK password: base64 of shortcode + passkey + timestamp.
fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    general_purpose::STANDARD.encode(format!("{}{}{}", short_code, passkey, timestamp))
}
