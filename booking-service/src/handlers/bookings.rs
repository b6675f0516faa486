//! Booking handlers.
//!
//! Bookings are created unpaid and pending; payment is initiated separately
//! through the payment routes and confirmed asynchronously by the gateways.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mongodb::bson::DateTime;
use prohealth_core::error::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    middleware::UserContext,
    models::{Booking, BookingStatus, PaymentStatus},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub service_id: Uuid,
    /// Defaults to the time of booking when omitted.
    pub booking_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: Uuid,
    pub service_id: Uuid,
    pub booking_date: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub gateway_checkout_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self {
            id: b.id,
            service_id: b.service_id,
            booking_date: b.booking_date.to_string(),
            status: b.status,
            payment_status: b.payment_status,
            gateway_checkout_id: b.gateway_checkout_id,
            created_at: b.created_at.to_string(),
            updated_at: b.updated_at.to_string(),
        }
    }
}

pub async fn create_booking(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), AppError> {
    let service = state
        .repository
        .find_service(payload.service_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Service not found")))?;

    let now = DateTime::now();
    let booking = Booking {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        service_id: service.id,
        booking_date: payload
            .booking_date
            .map(DateTime::from_chrono)
            .unwrap_or(now),
        status: BookingStatus::Pending,
        payment_status: PaymentStatus::Unpaid,
        gateway_checkout_id: None,
        created_at: now,
        updated_at: now,
    };

    state.repository.create_booking(booking.clone()).await?;

    tracing::info!(
        booking_id = %booking.id,
        service_id = %service.id,
        "Booking created"
    );

    Ok((StatusCode::CREATED, Json(booking.into())))
}

pub async fn get_booking(
    State(state): State<AppState>,
    user: UserContext,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .repository
        .find_booking_for_user(booking_id, &user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Booking not found or access denied")))?;

    Ok(Json(booking.into()))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<Vec<BookingResponse>>, AppError> {
    let bookings = state
        .repository
        .list_bookings_for_user(&user.user_id)
        .await?;

    Ok(Json(bookings.into_iter().map(Into::into).collect()))
}
