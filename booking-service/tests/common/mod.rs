use booking_service::config::{
    Config, DatabaseConfig, GeminiConfig, MpesaConfig, RateLimitConfig, ServerConfig, StripeConfig,
};
use booking_service::Application;
use hmac::{Hmac, Mac};
use secrecy::Secret;
use sha2::Sha256;
use uuid::Uuid;

pub const TEST_USER_ID: &str = "test-user";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: mongodb::Database,
    pub db_name: String,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn the app with a config hook, used to point gateway base URLs at
    /// a wiremock server.
    pub async fn spawn_with<F>(customize: F) -> Self
    where
        F: FnOnce(&mut Config),
    {
        let db_name = format!("booking_test_{}", Uuid::new_v4());

        let mut config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(
                    std::env::var("TEST_MONGODB_URI")
                        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
                ),
                db_name: db_name.clone(),
            },
            stripe: StripeConfig {
                secret_key: Secret::new("sk_test_123".to_string()),
                webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
                api_base_url: "https://api.stripe.com/v1".to_string(),
            },
            mpesa: MpesaConfig {
                consumer_key: Secret::new("test-consumer-key".to_string()),
                consumer_secret: Secret::new("test-consumer-secret".to_string()),
                short_code: "174379".to_string(),
                passkey: Secret::new("test-passkey".to_string()),
                transaction_type: "CustomerPayBillOnline".to_string(),
                api_base_url: "https://sandbox.safaricom.co.ke".to_string(),
                callback_base_url: "http://127.0.0.1".to_string(),
            },
            gemini: GeminiConfig {
                api_key: Secret::new("".to_string()),
                model: "gemini-2.0-flash".to_string(),
                api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            },
            rate_limit: RateLimitConfig {
                ai_limit: 5,
                ai_window_ms: 60_000,
            },
            service_name: "booking-service-test".to_string(),
        };

        customize(&mut config);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let db = app.db().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            db,
            db_name,
            client,
        }
    }

    /// Insert a service into the catalog and return its id.
    pub async fn seed_service(&self, name: &str, price: f64) -> Uuid {
        let response = self
            .client
            .post(format!("{}/services", self.address))
            .header("X-User-ID", TEST_USER_ID)
            .json(&serde_json::json!({
                "name": name,
                "description": "Test service",
                "price": price,
                "duration_minutes": 60
            }))
            .send()
            .await
            .expect("Failed to create service");
        assert_eq!(response.status().as_u16(), 201);

        let body: serde_json::Value = response.json().await.expect("Invalid service response");
        Uuid::parse_str(body["id"].as_str().expect("Service id missing")).unwrap()
    }

    /// Create a booking for the test user and return its id.
    pub async fn create_booking(&self, service_id: Uuid) -> Uuid {
        let response = self
            .client
            .post(format!("{}/bookings", self.address))
            .header("X-User-ID", TEST_USER_ID)
            .json(&serde_json::json!({ "service_id": service_id }))
            .send()
            .await
            .expect("Failed to create booking");
        assert_eq!(response.status().as_u16(), 201);

        let body: serde_json::Value = response.json().await.expect("Invalid booking response");
        Uuid::parse_str(body["id"].as_str().expect("Booking id missing")).unwrap()
    }

    /// Fetch a booking as the test user.
    pub async fn get_booking(&self, booking_id: Uuid) -> serde_json::Value {
        let response = self
            .client
            .get(format!("{}/bookings/{}", self.address, booking_id))
            .header("X-User-ID", TEST_USER_ID)
            .send()
            .await
            .expect("Failed to fetch booking");
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.expect("Invalid booking response")
    }

    /// Deliver an M-Pesa STK callback payload.
    pub async fn post_stk_callback(&self, payload: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/payments/mpesa/callback", self.address))
            .json(payload)
            .send()
            .await
            .expect("Failed to deliver STK callback")
    }

    /// Deliver a signed Stripe webhook body.
    pub async fn post_stripe_webhook(&self, body: &str, signature: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/webhooks/stripe", self.address))
            .header("Stripe-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("Failed to deliver Stripe webhook")
    }

    /// Cleanup test database after test completes.
    pub async fn cleanup(&self) {
        self.db
            .drop(None)
            .await
            .expect("Failed to drop test database");
    }
}

/// Build a valid `Stripe-Signature` header for a webhook body.
pub fn stripe_signature(body: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let signed_payload = format!("{}.{}", timestamp, body);

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(TEST_WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(signed_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    format!("t={},v1={}", timestamp, signature)
}
