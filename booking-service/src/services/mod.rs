mod gemini;
mod mpesa;
mod repository;
mod stripe;

pub use gemini::{GeminiClient, InsightError};
pub use mpesa::{MpesaClient, StkPushAck};
pub use repository::BookingRepository;
pub use stripe::{PaymentIntent, StripeClient, StripeEvent};

use prohealth_core::error::AppError;
use thiserror::Error;

/// Payment initiation failures, classified once at the gateway boundary.
///
/// The HTTP layer maps each kind to a stable user-safe message and status
/// code; raw gateway payloads are logged where they occur and never surfaced.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Booking not found or access denied")]
    NotFound,

    #[error("Booking already paid")]
    AlreadyPaid,

    #[error("Amount must be at least {minimum} {currency}")]
    InvalidAmount { minimum: u64, currency: &'static str },

    #[error("Payment provider is unavailable. Please try again later.")]
    GatewayUnavailable(#[source] anyhow::Error),

    #[error("{0}")]
    GatewayRejected(String),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::NotFound => {
                AppError::NotFound(anyhow::anyhow!("Booking not found or access denied"))
            }
            PaymentError::AlreadyPaid => AppError::Conflict(anyhow::anyhow!("Booking already paid")),
            PaymentError::InvalidAmount { minimum, currency } => AppError::BadRequest(
                anyhow::anyhow!("Amount must be at least {} {}", minimum, currency),
            ),
            PaymentError::GatewayUnavailable(source) => {
                tracing::error!(error = ?source, "Payment gateway unavailable");
                AppError::ServiceUnavailable(
                    "Payment provider is unavailable. Please try again later.".to_string(),
                )
            }
            PaymentError::GatewayRejected(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
        }
    }
}
