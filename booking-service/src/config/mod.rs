use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub mpesa: MpesaConfig,
    pub gemini: GeminiConfig,
    pub rate_limit: RateLimitConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct MpesaConfig {
    pub consumer_key: Secret<String>,
    pub consumer_secret: Secret<String>,
    pub short_code: String,
    pub passkey: Secret<String>,
    pub transaction_type: String,
    pub api_base_url: String,
    /// Public base URL of this service, used to build the STK callback URL.
    pub callback_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: Secret<String>,
    pub model: String,
    pub api_base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitConfig {
    pub ai_limit: u32,
    pub ai_window_ms: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("BOOKING_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("BOOKING_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url = env::var("BOOKING_DATABASE_URL").expect("BOOKING_DATABASE_URL must be set");
        let db_name =
            env::var("BOOKING_DATABASE_NAME").unwrap_or_else(|_| "booking_db".to_string());

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let stripe_api_base_url = env::var("STRIPE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string());

        let mpesa_consumer_key = env::var("MPESA_CONSUMER_KEY").unwrap_or_default();
        let mpesa_consumer_secret = env::var("MPESA_CONSUMER_SECRET").unwrap_or_default();
        let mpesa_short_code = env::var("MPESA_SHORTCODE").unwrap_or_default();
        let mpesa_passkey = env::var("MPESA_PASSKEY").unwrap_or_default();
        let mpesa_transaction_type = env::var("MPESA_TRANSACTION_TYPE")
            .unwrap_or_else(|_| "CustomerPayBillOnline".to_string());
        let mpesa_api_base_url = env::var("MPESA_API_BASE_URL")
            .unwrap_or_else(|_| "https://sandbox.safaricom.co.ke".to_string());
        let mpesa_callback_base_url = env::var("MPESA_CALLBACK_BASE_URL").unwrap_or_default();

        let gemini_api_key = env::var("GEMINI_API_KEY").unwrap_or_default();
        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let gemini_api_base_url = env::var("GEMINI_API_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());

        let ai_limit = env::var("AI_RATE_LIMIT")
            .unwrap_or_else(|_| "5".to_string())
            .parse()?;
        let ai_window_ms = env::var("AI_RATE_WINDOW_MS")
            .unwrap_or_else(|_| "60000".to_string())
            .parse()?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(stripe_secret_key),
                webhook_secret: Secret::new(stripe_webhook_secret),
                api_base_url: stripe_api_base_url,
            },
            mpesa: MpesaConfig {
                consumer_key: Secret::new(mpesa_consumer_key),
                consumer_secret: Secret::new(mpesa_consumer_secret),
                short_code: mpesa_short_code,
                passkey: Secret::new(mpesa_passkey),
                transaction_type: mpesa_transaction_type,
                api_base_url: mpesa_api_base_url,
                callback_base_url: mpesa_callback_base_url,
            },
            gemini: GeminiConfig {
                api_key: Secret::new(gemini_api_key),
                model: gemini_model,
                api_base_url: gemini_api_base_url,
            },
            rate_limit: RateLimitConfig {
                ai_limit,
                ai_window_ms,
            },
            service_name: "booking-service".to_string(),
        })
    }
}
