//! HTTP handlers for booking-service.

pub mod bookings;
pub mod insights;
pub mod mpesa;
pub mod services;
pub mod stripe;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use uuid::Uuid;

use crate::models::{Booking, PaymentStatus, ServiceOffering};
use crate::services::PaymentError;
use crate::AppState;
use prohealth_core::error::AppError;

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "booking-service",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

pub async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

/// Resolve a booking for payment initiation: it must exist within the
/// caller's scope, must not already be paid, and its service must resolve
/// for pricing. Checked in that order so each failure is distinct.
pub(crate) async fn load_unpaid_booking(
    state: &AppState,
    booking_id: Uuid,
    user_id: &str,
) -> Result<(Booking, ServiceOffering), AppError> {
    let booking = state
        .repository
        .find_booking_for_user(booking_id, user_id)
        .await?
        .ok_or(PaymentError::NotFound)?;

    if booking.payment_status == PaymentStatus::Paid {
        return Err(PaymentError::AlreadyPaid.into());
    }

    let service = state
        .repository
        .find_service(booking.service_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;

    Ok((booking, service))
}
