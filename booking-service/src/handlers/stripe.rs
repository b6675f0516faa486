//! Stripe payment handlers.
//!
//! Implements payment intent initiation, redirect verification, and the
//! asynchronous webhook reconciler. Payment state on a booking is only ever
//! advanced through the repository's guarded transitions, so duplicate or
//! out-of-order deliveries reduce to no-ops.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use mongodb::bson::DateTime;
use prohealth_core::error::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    middleware::UserContext,
    models::{Booking, PaymentGateway, PaymentStatus, Transaction, TransactionStatus},
    services::{PaymentError, PaymentIntent, StripeEvent},
    AppState,
};

use super::load_unpaid_booking;

/// Stripe's smallest chargeable amount, in minor currency units.
const MIN_CHARGE_MINOR_UNITS: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub booking_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    /// Token the frontend hands to the Stripe SDK to collect card details.
    pub client_secret: String,
    pub amount: f64,
    pub currency: String,
}

/// Create a Stripe PaymentIntent for an unpaid booking.
///
/// The pending ledger row is written only after Stripe has accepted the
/// intent, so a failed initiation leaves no state behind and is safe to
/// retry.
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<CreateIntentRequest>,
) -> Result<Json<CreateIntentResponse>, AppError> {
    let (booking, service) = load_unpaid_booking(&state, payload.booking_id, &user.user_id).await?;

    let amount_minor = (service.price * 100.0).round() as i64;
    if amount_minor < MIN_CHARGE_MINOR_UNITS {
        return Err(PaymentError::InvalidAmount {
            minimum: MIN_CHARGE_MINOR_UNITS as u64,
            currency: "cents",
        }
        .into());
    }

    let booking_id = booking.id.to_string();
    let intent = state
        .stripe
        .create_payment_intent(
            amount_minor,
            "kes",
            &[
                ("booking_id", booking_id.as_str()),
                ("user_id", user.user_id.as_str()),
                ("service_name", service.name.as_str()),
            ],
        )
        .await?;

    let client_secret = intent.client_secret.clone().ok_or_else(|| {
        tracing::error!(payment_intent_id = %intent.id, "Stripe returned no client secret");
        AppError::BadGateway("The card processor did not return a usable payment token".to_string())
    })?;

    let now = DateTime::now();
    state
        .repository
        .upsert_pending_transaction(Transaction {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            amount: service.price,
            currency: "KES".to_string(),
            gateway: PaymentGateway::Stripe,
            gateway_transaction_id: intent.id.clone(),
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        })
        .await?;

    tracing::info!(
        booking_id = %booking.id,
        payment_intent_id = %intent.id,
        amount = amount_minor,
        "Stripe payment intent created"
    );

    Ok(Json(CreateIntentResponse {
        client_secret,
        amount: service.price,
        currency: "KES".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    pub payment_intent: String,
    pub payment_intent_client_secret: String,
    pub booking_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    pub status: String,
    pub message: String,
}

/// Confirm a payment after the client returns from Stripe's redirect flow.
///
/// This is a convenience for the frontend; the webhook remains the source of
/// truth and both paths share the same guarded transitions.
pub async fn verify_payment(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let booking = state
        .repository
        .find_booking_for_user(payload.booking_id, &user.user_id)
        .await?
        .ok_or(PaymentError::NotFound)?;

    let intent = state
        .stripe
        .retrieve_payment_intent(&payload.payment_intent)
        .await?;

    if intent.client_secret.as_deref() != Some(payload.payment_intent_client_secret.as_str()) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Invalid payment intent"
        )));
    }

    if intent.status == "succeeded" {
        let amount = confirmed_amount(&state, &intent, &booking).await?;
        let applied = state
            .repository
            .confirm_payment(
                booking.id,
                success_transaction(booking.id, amount, &intent),
            )
            .await?;
        if !applied {
            tracing::info!(booking_id = %booking.id, "Payment already recorded, verify is a no-op");
        }

        Ok(Json(VerifyPaymentResponse {
            status: "succeeded".to_string(),
            message: "Payment successful! Your booking has been confirmed.".to_string(),
        }))
    } else {
        state
            .repository
            .fail_payment(booking.id, Some(&intent.id))
            .await?;

        Ok(Json(VerifyPaymentResponse {
            status: "failed".to_string(),
            message: "Payment failed. Please try again or contact support.".to_string(),
        }))
    }
}

/// Stripe webhook reconciler.
///
/// The payload's authenticity is verified against the signature header
/// before any parsing; a bad signature is rejected outright. Once verified,
/// every recognized event acknowledges with 200 regardless of the payment
/// outcome, and only a processing failure surfaces as 5xx so Stripe retries
/// delivery.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing Stripe-Signature header");
            AppError::Unauthorized(anyhow::anyhow!("Missing webhook signature"))
        })?;

    let is_valid = state
        .stripe
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::InternalError(anyhow::anyhow!("Webhook verification failed"))
        })?;

    if !is_valid {
        tracing::warn!("Invalid webhook signature");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid webhook signature"
        )));
    }

    let event = state.stripe.parse_webhook_event(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::BadRequest(anyhow::anyhow!("Invalid webhook payload"))
    })?;

    match event {
        StripeEvent::PaymentIntentSucceeded(intent) => {
            let Some(booking) = booking_for_intent(&state, &intent).await? else {
                return Ok(StatusCode::OK);
            };

            if booking.payment_status == PaymentStatus::Paid {
                tracing::info!(
                    booking_id = %booking.id,
                    payment_intent_id = %intent.id,
                    "Booking already marked PAID, ignoring duplicate webhook"
                );
                return Ok(StatusCode::OK);
            }

            let amount = confirmed_amount(&state, &intent, &booking).await?;
            let applied = state
                .repository
                .confirm_payment(
                    booking.id,
                    success_transaction(booking.id, amount, &intent),
                )
                .await?;

            if applied {
                tracing::info!(
                    booking_id = %booking.id,
                    payment_intent_id = %intent.id,
                    "Booking confirmed from payment webhook"
                );
            } else {
                tracing::info!(
                    booking_id = %booking.id,
                    "Lost the duplicate-delivery race, webhook is a no-op"
                );
            }
        }
        StripeEvent::PaymentIntentFailed(intent) => {
            let Some(booking) = booking_for_intent(&state, &intent).await? else {
                return Ok(StatusCode::OK);
            };

            state
                .repository
                .fail_payment(booking.id, Some(&intent.id))
                .await?;

            tracing::info!(
                booking_id = %booking.id,
                payment_intent_id = %intent.id,
                "Booking payment marked FAILED from webhook"
            );
        }
        StripeEvent::ChargeRefunded(charge) => {
            let Some(ref payment_intent_id) = charge.payment_intent else {
                tracing::warn!(charge_id = %charge.id, "Refunded charge carries no payment intent");
                return Ok(StatusCode::OK);
            };

            // The charge object does not carry our metadata; the intent does.
            let intent = state
                .stripe
                .retrieve_payment_intent(payment_intent_id)
                .await?;

            let Some(booking) = booking_for_intent(&state, &intent).await? else {
                return Ok(StatusCode::OK);
            };

            let applied = state.repository.refund_payment(booking.id).await?;
            if applied {
                tracing::info!(
                    booking_id = %booking.id,
                    payment_intent_id = %intent.id,
                    "Booking refunded and cancelled from webhook"
                );
            } else {
                tracing::info!(
                    booking_id = %booking.id,
                    "Refund webhook for a booking that is not PAID, ignoring"
                );
            }
        }
        StripeEvent::Other(event_type) => {
            tracing::debug!(event_type = %event_type, "Unhandled webhook event type");
        }
    }

    // Acknowledge receipt; the acknowledgment says "delivered", not "paid".
    Ok(StatusCode::OK)
}

/// Resolve the booking an intent correlates to via its metadata. Missing
/// metadata or an unknown booking is acknowledged silently: the gateway must
/// not keep retrying deliveries we can never match.
async fn booking_for_intent(
    state: &AppState,
    intent: &PaymentIntent,
) -> Result<Option<Booking>, AppError> {
    let Some(booking_id) = intent
        .metadata
        .get("booking_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
    else {
        tracing::warn!(
            payment_intent_id = %intent.id,
            "No booking id in payment intent metadata, likely created outside this application"
        );
        return Ok(None);
    };

    let booking = state.repository.find_booking(booking_id).await?;
    if booking.is_none() {
        tracing::warn!(
            payment_intent_id = %intent.id,
            booking_id = %booking_id,
            "No booking matches webhook correlation id"
        );
    }
    Ok(booking)
}

/// The gateway's confirmed amount, falling back to the service list price
/// when the gateway omitted it.
async fn confirmed_amount(
    state: &AppState,
    intent: &PaymentIntent,
    booking: &Booking,
) -> Result<f64, AppError> {
    if intent.amount_received > 0 {
        return Ok(intent.amount_received as f64 / 100.0);
    }
    let service = state.repository.find_service(booking.service_id).await?;
    Ok(service.map(|s| s.price).unwrap_or_default())
}

fn success_transaction(booking_id: Uuid, amount: f64, intent: &PaymentIntent) -> Transaction {
    let now = DateTime::now();
    Transaction {
        id: Uuid::new_v4(),
        booking_id,
        amount,
        currency: intent.currency.to_uppercase(),
        gateway: PaymentGateway::Stripe,
        gateway_transaction_id: intent.id.clone(),
        status: TransactionStatus::Success,
        created_at: now,
        updated_at: now,
    }
}
