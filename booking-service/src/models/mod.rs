use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_id: String,
    pub service_id: Uuid,
    pub booking_date: DateTime,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Gateway-issued correlation id for the outstanding payment attempt,
    /// e.g. an M-Pesa CheckoutRequestID. Sole join key for inbound callbacks.
    /// Omitted (not null) when absent so the unique sparse index skips
    /// bookings that have no initiated payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_checkout_id: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

/// Ledger entry for a booking payment attempt. At most one per booking.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub booking_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub gateway: PaymentGateway,
    pub gateway_transaction_id: String,
    pub status: TransactionStatus,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentGateway {
    Mpesa,
    Stripe,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceOffering {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// List price in KES.
    pub price: f64,
    pub duration_minutes: i32,
    pub image_url: Option<String>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AiInteractionLog {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user_id: String,
    pub input: String,
    pub response: String,
    pub status: AiInteractionStatus,
    pub error: Option<String>,
    pub created_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiInteractionStatus {
    Success,
    Error,
}
