//! M-Pesa payment handlers.
//!
//! Implements STK push initiation and the asynchronous callback reconciler.
//! The callback route always answers in the gateway's own acknowledgment
//! format: `ResultCode: 0` once processing completes (even for a failed
//! payment), `ResultCode: 1` only when processing itself broke and the
//! gateway should retry delivery.

use axum::{extract::State, http::StatusCode, Json};
use mongodb::bson::DateTime;
use prohealth_core::error::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    middleware::UserContext,
    models::{PaymentGateway, PaymentStatus, Transaction, TransactionStatus},
    services::PaymentError,
    AppState,
};

use super::load_unpaid_booking;

/// Smallest chargeable amount in whole shillings.
const MIN_CHARGE_KES: u64 = 1;

#[derive(Debug, Deserialize, Validate)]
pub struct StkPushRequest {
    pub booking_id: Uuid,
    #[validate(length(equal = 12, message = "Phone number must be 12 digits, e.g. 254712345678"))]
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushResponse {
    pub checkout_request_id: String,
    pub customer_message: Option<String>,
}

/// Initiate an STK push for an unpaid booking.
///
/// The correlation id is persisted only after the gateway has accepted the
/// push, so a failed initiation leaves the booking untouched. No automatic
/// retry: a blind retry could send a duplicate prompt to the user's phone.
pub async fn stk_push(
    State(state): State<AppState>,
    user: UserContext,
    Json(payload): Json<StkPushRequest>,
) -> Result<Json<StkPushResponse>, AppError> {
    payload.validate()?;
    if !is_valid_msisdn(&payload.phone_number) {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Phone number must be in the format 254XXXXXXXXX"
        )));
    }

    let (booking, service) = load_unpaid_booking(&state, payload.booking_id, &user.user_id).await?;

    let amount = service.price.round() as u64;
    if amount < MIN_CHARGE_KES {
        return Err(PaymentError::InvalidAmount {
            minimum: MIN_CHARGE_KES,
            currency: "KES",
        }
        .into());
    }

    let ack = state
        .mpesa
        .stk_push(booking.id, &payload.phone_number, amount)
        .await?;

    let Some(checkout_request_id) = ack.checkout_request_id else {
        tracing::error!(
            booking_id = %booking.id,
            response_code = ?ack.response_code,
            "M-Pesa accepted the push but returned no CheckoutRequestID"
        );
        return Err(AppError::BadGateway(
            "M-Pesa did not acknowledge the payment request".to_string(),
        ));
    };

    state
        .repository
        .set_checkout_id(booking.id, &checkout_request_id)
        .await?;

    tracing::info!(
        booking_id = %booking.id,
        checkout_request_id = %checkout_request_id,
        amount = amount,
        "STK push initiated"
    );

    Ok(Json(StkPushResponse {
        checkout_request_id,
        customer_message: ack.customer_message,
    }))
}

fn is_valid_msisdn(phone: &str) -> bool {
    phone.len() == 12 && phone.starts_with("254") && phone.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: Option<StkCallback>,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

/// One gateway callback, reduced to the fields the reconciler acts on.
#[derive(Debug, PartialEq)]
enum StkOutcome {
    Success {
        amount: Option<f64>,
        receipt: Option<String>,
    },
    Failure {
        code: i64,
        description: String,
    },
}

impl StkCallback {
    fn outcome(&self) -> StkOutcome {
        if self.result_code == 0 {
            StkOutcome::Success {
                amount: self.metadata_value("Amount").and_then(|v| v.as_f64()),
                receipt: self
                    .metadata_value("MpesaReceiptNumber")
                    .and_then(|v| v.as_str().map(str::to_string)),
            }
        } else {
            StkOutcome::Failure {
                code: self.result_code,
                description: self.result_desc.clone().unwrap_or_default(),
            }
        }
    }

    fn metadata_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|item| item.name == name)?
            .value
            .as_ref()
    }
}

/// M-Pesa acknowledgment envelope.
#[derive(Debug, Serialize)]
pub struct StkAck {
    #[serde(rename = "ResultCode")]
    result_code: i32,
    #[serde(rename = "ResultDesc")]
    result_desc: &'static str,
    #[serde(rename = "ThirdPartyTransID")]
    third_party_trans_id: &'static str,
}

impl StkAck {
    fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted",
            third_party_trans_id: "",
        }
    }

    fn failed() -> Self {
        Self {
            result_code: 1,
            result_desc: "Failed",
            third_party_trans_id: "",
        }
    }
}

/// M-Pesa STK callback reconciler.
///
/// Maps the callback to a booking by its stored CheckoutRequestID and applies
/// the payment transition exactly once. Unknown correlation ids and already
/// paid bookings are acknowledged without further action so the gateway stops
/// retrying.
pub async fn stk_callback(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<StkAck>) {
    tracing::info!("M-Pesa STK callback received");

    let callback = serde_json::from_str::<StkCallbackEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.body.stk_callback);

    let Some(callback) = callback else {
        tracing::error!("STK callback payload is missing or malformed");
        return (StatusCode::BAD_REQUEST, Json(StkAck::failed()));
    };

    match reconcile_stk_callback(&state, &callback).await {
        Ok(()) => (StatusCode::OK, Json(StkAck::accepted())),
        Err(err) => {
            tracing::error!(
                checkout_request_id = %callback.checkout_request_id,
                error = %err,
                "Failed to process STK callback"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(StkAck::failed()))
        }
    }
}

async fn reconcile_stk_callback(state: &AppState, callback: &StkCallback) -> anyhow::Result<()> {
    let checkout_id = &callback.checkout_request_id;

    let Some(booking) = state
        .repository
        .find_booking_by_checkout_id(checkout_id)
        .await?
    else {
        // Unknown correlation id: acknowledge so the gateway stops retrying.
        tracing::warn!(
            checkout_request_id = %checkout_id,
            "No booking matches callback correlation id"
        );
        return Ok(());
    };

    if booking.payment_status == PaymentStatus::Paid {
        tracing::info!(
            booking_id = %booking.id,
            checkout_request_id = %checkout_id,
            "Booking already marked PAID, ignoring duplicate callback"
        );
        return Ok(());
    }

    match callback.outcome() {
        StkOutcome::Success { amount, receipt } => {
            let amount = match amount {
                Some(amount) => amount,
                None => state
                    .repository
                    .find_service(booking.service_id)
                    .await?
                    .map(|s| s.price)
                    .unwrap_or_default(),
            };
            let gateway_transaction_id = receipt.unwrap_or_else(|| checkout_id.clone());

            let now = DateTime::now();
            let applied = state
                .repository
                .confirm_payment(
                    booking.id,
                    Transaction {
                        id: Uuid::new_v4(),
                        booking_id: booking.id,
                        amount,
                        currency: "KES".to_string(),
                        gateway: PaymentGateway::Mpesa,
                        gateway_transaction_id,
                        status: TransactionStatus::Success,
                        created_at: now,
                        updated_at: now,
                    },
                )
                .await?;

            if applied {
                tracing::info!(
                    booking_id = %booking.id,
                    checkout_request_id = %checkout_id,
                    "M-Pesa payment SUCCESS, booking confirmed"
                );
            } else {
                tracing::info!(
                    booking_id = %booking.id,
                    "Lost the duplicate-delivery race, callback is a no-op"
                );
            }
        }
        StkOutcome::Failure { code, description } => {
            state.repository.fail_payment(booking.id, None).await?;
            tracing::info!(
                booking_id = %booking.id,
                checkout_request_id = %checkout_id,
                result_code = code,
                result_desc = %description,
                "M-Pesa payment failed or was cancelled"
            );
        }
    }

    Ok(())
}
