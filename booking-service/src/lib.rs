pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use prohealth_core::middleware::tracing::request_id_middleware;
use prohealth_core::rate_limit::RateLimiter;
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use config::Config;
use services::{BookingRepository, GeminiClient, MpesaClient, StripeClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repository: BookingRepository,
    pub stripe: StripeClient,
    pub mpesa: MpesaClient,
    pub gemini: GeminiClient,
    pub rate_limiter: Arc<RateLimiter>,
}

pub struct Application {
    port: u16,
    listener: tokio::net::TcpListener,
    router: Router,
    db: mongodb::Database,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("booking-service".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let repository = BookingRepository::new(&client, &db);
        repository.init_indexes().await?;

        let stripe = StripeClient::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - card payments will be limited");
        }

        let mpesa = MpesaClient::new(config.mpesa.clone());
        if mpesa.is_configured() {
            tracing::info!("M-Pesa client initialized");
        } else {
            tracing::warn!("M-Pesa credentials not configured - mobile payments will be limited");
        }

        let gemini = GeminiClient::new(config.gemini.clone());
        if !gemini.is_configured() {
            tracing::warn!("Gemini API key not configured - AI insights will be unavailable");
        }

        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.ai_limit,
            config.rate_limit.ai_window_ms,
        ));

        let state = AppState {
            config: config.clone(),
            repository,
            stripe,
            mpesa,
            gemini,
            rate_limiter,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            // Service catalog
            .route(
                "/services",
                get(handlers::services::list_services).post(handlers::services::create_service),
            )
            .route("/services/:id", get(handlers::services::get_service))
            // Bookings (caller-scoped)
            .route(
                "/bookings",
                post(handlers::bookings::create_booking).get(handlers::bookings::list_bookings),
            )
            .route("/bookings/:id", get(handlers::bookings::get_booking))
            // Card payments
            .route(
                "/payments/stripe/intent",
                post(handlers::stripe::create_payment_intent),
            )
            .route(
                "/payments/stripe/verify",
                post(handlers::stripe::verify_payment),
            )
            .route("/webhooks/stripe", post(handlers::stripe::webhook))
            // Mobile money payments
            .route("/payments/mpesa/stk-push", post(handlers::mpesa::stk_push))
            .route(
                "/payments/mpesa/callback",
                post(handlers::mpesa::stk_callback),
            )
            // AI assistant
            .route(
                "/ai/symptom-insights",
                post(handlers::insights::symptom_insights),
            )
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        user_id = tracing::field::Empty,
                    )
                }),
            )
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            db,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn db(&self) -> &mongodb::Database {
        &self.db
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("Listening on port {}", self.port);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
