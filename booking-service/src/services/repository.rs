use crate::models::{
    AiInteractionLog, Booking, BookingStatus, PaymentStatus, ServiceOffering, Transaction,
    TransactionStatus,
};
use anyhow::Result;
use futures::TryStreamExt;
use mongodb::options::{FindOptions, IndexOptions, UpdateOptions};
use mongodb::{
    bson::{doc, to_bson, DateTime},
    Client, Collection, Database, IndexModel,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct BookingRepository {
    client: Client,
    booking_collection: Collection<Booking>,
    transaction_collection: Collection<Transaction>,
    service_collection: Collection<ServiceOffering>,
    ai_log_collection: Collection<AiInteractionLog>,
}

impl BookingRepository {
    pub fn new(client: &Client, db: &Database) -> Self {
        Self {
            client: client.clone(),
            booking_collection: db.collection("bookings"),
            transaction_collection: db.collection("transactions"),
            service_collection: db.collection("services"),
            ai_log_collection: db.collection("ai_interaction_logs"),
        }
    }

    /// Initialize database indexes.
    pub async fn init_indexes(&self) -> Result<()> {
        // Unique sparse index on the gateway correlation id: the sole join
        // key between an inbound callback and a booking.
        let checkout_idx = IndexModel::builder()
            .keys(doc! { "gateway_checkout_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("booking_checkout_idx".to_string())
                    .unique(true)
                    .sparse(true)
                    .build(),
            )
            .build();

        // Compound index on (user_id, created_at) for caller-scoped listings
        let user_idx = IndexModel::builder()
            .keys(doc! { "user_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("booking_user_idx".to_string())
                    .build(),
            )
            .build();

        self.booking_collection
            .create_indexes([checkout_idx, user_idx], None)
            .await?;

        // One ledger row per booking payment attempt
        let booking_tx_idx = IndexModel::builder()
            .keys(doc! { "booking_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("transaction_booking_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.transaction_collection
            .create_indexes([booking_tx_idx], None)
            .await?;

        tracing::info!("Booking service indexes initialized");
        Ok(())
    }

    pub async fn create_booking(&self, booking: Booking) -> Result<()> {
        self.booking_collection.insert_one(booking, None).await?;
        Ok(())
    }

    pub async fn find_booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let filter = doc! { "_id": to_bson(&id)? };
        let booking = self.booking_collection.find_one(filter, None).await?;
        Ok(booking)
    }

    /// Find a booking by id within the caller's scope. Existence of other
    /// users' bookings is not revealed by this lookup.
    pub async fn find_booking_for_user(&self, id: Uuid, user_id: &str) -> Result<Option<Booking>> {
        let filter = doc! { "_id": to_bson(&id)?, "user_id": user_id };
        let booking = self.booking_collection.find_one(filter, None).await?;
        Ok(booking)
    }

    pub async fn list_bookings_for_user(&self, user_id: &str) -> Result<Vec<Booking>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self
            .booking_collection
            .find(doc! { "user_id": user_id }, Some(options))
            .await?;
        let bookings: Vec<Booking> = cursor.try_collect().await?;
        Ok(bookings)
    }

    pub async fn find_booking_by_checkout_id(&self, checkout_id: &str) -> Result<Option<Booking>> {
        let filter = doc! { "gateway_checkout_id": checkout_id };
        let booking = self.booking_collection.find_one(filter, None).await?;
        Ok(booking)
    }

    /// Record the gateway correlation id after the gateway has accepted the
    /// payment attempt. Never called on the failure path, so an aborted
    /// initiation leaves the booking untouched.
    pub async fn set_checkout_id(&self, booking_id: Uuid, checkout_id: &str) -> Result<()> {
        let filter = doc! { "_id": to_bson(&booking_id)? };
        let update = doc! {
            "$set": {
                "gateway_checkout_id": checkout_id,
                "updated_at": DateTime::now()
            }
        };
        self.booking_collection
            .update_one(filter, update, None)
            .await?;
        Ok(())
    }

    /// Apply the terminal success transition: booking to PAID/CONFIRMED and
    /// the ledger row to SUCCESS, as a single atomic unit.
    ///
    /// The booking update is conditional on `payment_status != PAID`, so a
    /// concurrent duplicate callback loses the race here and the ledger is
    /// left untouched. Returns whether the transition was applied.
    pub async fn confirm_payment(&self, booking_id: Uuid, txn: Transaction) -> Result<bool> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        let updated = self
            .booking_collection
            .update_one_with_session(
                doc! {
                    "_id": to_bson(&booking_id)?,
                    "payment_status": { "$ne": to_bson(&PaymentStatus::Paid)? }
                },
                doc! {
                    "$set": {
                        "payment_status": to_bson(&PaymentStatus::Paid)?,
                        "status": to_bson(&BookingStatus::Confirmed)?,
                        "updated_at": DateTime::now()
                    }
                },
                None,
                &mut session,
            )
            .await?;

        if updated.matched_count == 0 {
            session.abort_transaction().await?;
            return Ok(false);
        }

        let options = UpdateOptions::builder().upsert(true).build();
        self.transaction_collection
            .update_one_with_session(
                doc! { "booking_id": to_bson(&booking_id)? },
                doc! {
                    "$set": {
                        "amount": txn.amount,
                        "currency": &txn.currency,
                        "gateway": to_bson(&txn.gateway)?,
                        "gateway_transaction_id": &txn.gateway_transaction_id,
                        "status": to_bson(&TransactionStatus::Success)?,
                        "updated_at": DateTime::now()
                    },
                    "$setOnInsert": {
                        "_id": to_bson(&txn.id)?,
                        "created_at": txn.created_at
                    }
                },
                options,
                &mut session,
            )
            .await?;

        session.commit_transaction().await?;
        Ok(true)
    }

    /// Apply the failure transition. Booking `status` is left as-is so the
    /// user can retry payment; a PAID booking is never demoted. Returns
    /// whether the transition was applied.
    pub async fn fail_payment(
        &self,
        booking_id: Uuid,
        gateway_transaction_id: Option<&str>,
    ) -> Result<bool> {
        let updated = self
            .booking_collection
            .update_one(
                doc! {
                    "_id": to_bson(&booking_id)?,
                    "payment_status": { "$ne": to_bson(&PaymentStatus::Paid)? }
                },
                doc! {
                    "$set": {
                        "payment_status": to_bson(&PaymentStatus::Failed)?,
                        "updated_at": DateTime::now()
                    }
                },
                None,
            )
            .await?;

        if updated.matched_count == 0 {
            return Ok(false);
        }

        let mut set = doc! {
            "status": to_bson(&TransactionStatus::Failed)?,
            "updated_at": DateTime::now()
        };
        if let Some(id) = gateway_transaction_id {
            set.insert("gateway_transaction_id", id);
        }
        self.transaction_collection
            .update_one(doc! { "booking_id": to_bson(&booking_id)? }, doc! { "$set": set }, None)
            .await?;

        Ok(true)
    }

    /// Apply the refund transition to a previously PAID booking. This is the
    /// one path that revisits the PAID terminal state, driven by a distinct
    /// gateway event type. Returns whether the transition was applied.
    pub async fn refund_payment(&self, booking_id: Uuid) -> Result<bool> {
        let updated = self
            .booking_collection
            .update_one(
                doc! {
                    "_id": to_bson(&booking_id)?,
                    "payment_status": to_bson(&PaymentStatus::Paid)?
                },
                doc! {
                    "$set": {
                        "payment_status": to_bson(&PaymentStatus::Refunded)?,
                        "status": to_bson(&BookingStatus::Cancelled)?,
                        "updated_at": DateTime::now()
                    }
                },
                None,
            )
            .await?;

        if updated.matched_count == 0 {
            return Ok(false);
        }

        self.transaction_collection
            .update_one(
                doc! { "booking_id": to_bson(&booking_id)? },
                doc! {
                    "$set": {
                        "status": to_bson(&TransactionStatus::Refunded)?,
                        "updated_at": DateTime::now()
                    }
                },
                None,
            )
            .await?;

        Ok(true)
    }

    /// Record (or refresh) the pending ledger row for a card payment attempt.
    /// Upserted so a retried initiation after a failed attempt reuses the
    /// booking's single ledger row.
    pub async fn upsert_pending_transaction(&self, txn: Transaction) -> Result<()> {
        let options = UpdateOptions::builder().upsert(true).build();
        self.transaction_collection
            .update_one(
                doc! { "booking_id": to_bson(&txn.booking_id)? },
                doc! {
                    "$set": {
                        "amount": txn.amount,
                        "currency": &txn.currency,
                        "gateway": to_bson(&txn.gateway)?,
                        "gateway_transaction_id": &txn.gateway_transaction_id,
                        "status": to_bson(&TransactionStatus::Pending)?,
                        "updated_at": DateTime::now()
                    },
                    "$setOnInsert": {
                        "_id": to_bson(&txn.id)?,
                        "created_at": txn.created_at
                    }
                },
                options,
            )
            .await?;
        Ok(())
    }

    pub async fn find_transaction_by_booking(&self, booking_id: Uuid) -> Result<Option<Transaction>> {
        let filter = doc! { "booking_id": to_bson(&booking_id)? };
        let txn = self.transaction_collection.find_one(filter, None).await?;
        Ok(txn)
    }

    pub async fn create_service(&self, service: ServiceOffering) -> Result<()> {
        self.service_collection.insert_one(service, None).await?;
        Ok(())
    }

    pub async fn find_service(&self, id: Uuid) -> Result<Option<ServiceOffering>> {
        let filter = doc! { "_id": to_bson(&id)? };
        let service = self.service_collection.find_one(filter, None).await?;
        Ok(service)
    }

    pub async fn list_services(&self) -> Result<Vec<ServiceOffering>> {
        let options = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let cursor = self.service_collection.find(doc! {}, Some(options)).await?;
        let services: Vec<ServiceOffering> = cursor.try_collect().await?;
        Ok(services)
    }

    pub async fn log_ai_interaction(&self, log: AiInteractionLog) -> Result<()> {
        self.ai_log_collection.insert_one(log, None).await?;
        Ok(())
    }
}
