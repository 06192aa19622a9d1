//! PostgreSQL adapter for booking-service.

use super::{BookingStore, LedgerStore, NotificationStore, StoreError};
use crate::models::{
    find_clash, AccountBalance, Booking, BookingStatus, DateFilter, Notification, Posting,
    SlotClash, Transaction, MAX_BALANCE,
};
use crate::services::metrics::STORE_OPERATION_DURATION;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const BOOKING_COLUMNS: &str = "booking_id, provider_id, requester_id, lesson_type, date, \
    start_time, end_time, status, amount, original_booking_id, version, created_utc, updated_utc";

const TRANSACTION_COLUMNS: &str =
    "transaction_id, account_id, kind, amount, balance_after, description, reference, created_utc";

const NOTIFICATION_COLUMNS: &str =
    "notification_id, recipient_id, notification_type, booking_id, message, read, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "booking-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

// -------------------------------------------------------------------------
// Booking Operations
// -------------------------------------------------------------------------

#[async_trait]
impl BookingStore for Database {
    #[instrument(skip(self, booking), fields(booking_id = %booking.booking_id, provider_id = %booking.provider_id))]
    async fn insert(&self, booking: &Booking, ignore: Option<Uuid>) -> Result<Booking, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["insert_booking"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        // Provider key first, requester key second, in every transaction.
        for key in [
            format!("provider:{}:{}", booking.provider_id, booking.date),
            format!("requester:{}:{}", booking.requester_id, booking.date),
        ] {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        let same_day = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE date = $1 AND (provider_id = $2 OR requester_id = $3)"
        ))
        .bind(booking.date)
        .bind(&booking.provider_id)
        .bind(&booking.requester_id)
        .fetch_all(&mut *tx)
        .await?;

        match find_clash(booking, &same_day, ignore) {
            Some(SlotClash::Provider(id)) => return Err(StoreError::SlotTaken(id)),
            Some(SlotClash::Requester(id)) => return Err(StoreError::RequesterBusy(id)),
            None => {}
        }

        let inserted = sqlx::query_as::<_, Booking>(&format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking.booking_id)
        .bind(&booking.provider_id)
        .bind(&booking.requester_id)
        .bind(&booking.lesson_type)
        .bind(booking.date)
        .bind(booking.start)
        .bind(booking.end)
        .bind(booking.status)
        .bind(booking.amount)
        .bind(booking.original_booking_id)
        .bind(booking.version)
        .bind(booking.created_utc)
        .bind(booking.updated_utc)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        timer.observe_duration();

        Ok(inserted)
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["find_booking"])
            .start_timer();

        let booking = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(booking)
    }

    #[instrument(skip(self))]
    async fn find_by_provider(
        &self,
        provider_id: &str,
        filter: Option<DateFilter>,
    ) -> Result<Vec<Booking>, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["find_bookings_by_provider"])
            .start_timer();

        let (from, to) = match filter {
            Some(DateFilter::On(day)) => (Some(day), Some(day)),
            Some(DateFilter::Between(from, to)) => (Some(from), Some(to)),
            None => (None, None),
        };

        let bookings = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE provider_id = $1 \
               AND ($2::date IS NULL OR date >= $2) \
               AND ($3::date IS NULL OR date <= $3) \
             ORDER BY date, start_time, created_utc"
        ))
        .bind(provider_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(bookings)
    }

    #[instrument(skip(self))]
    async fn find_by_requester(
        &self,
        requester_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["find_bookings_by_requester"])
            .start_timer();

        let bookings = sqlx::query_as::<_, Booking>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE requester_id = $1 AND ($2::date IS NULL OR date = $2) \
             ORDER BY date, start_time, created_utc"
        ))
        .bind(requester_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(bookings)
    }

    #[instrument(skip(self), fields(status = %status))]
    async fn update_status(
        &self,
        booking_id: Uuid,
        expected_version: i64,
        status: BookingStatus,
    ) -> Result<Booking, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["update_booking_status"])
            .start_timer();

        let updated = sqlx::query_as::<_, Booking>(&format!(
            "UPDATE bookings SET status = $3, version = version + 1, updated_utc = NOW() \
             WHERE booking_id = $1 AND version = $2 \
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking_id)
        .bind(expected_version)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        match updated {
            Some(booking) => Ok(booking),
            None => match self.find_by_id(booking_id).await? {
                Some(_) => Err(StoreError::VersionMismatch {
                    booking_id,
                    expected: expected_version,
                }),
                None => Err(StoreError::NotFound(booking_id.to_string())),
            },
        }
    }
}

// -------------------------------------------------------------------------
// Ledger Operations
// -------------------------------------------------------------------------

#[async_trait]
impl LedgerStore for Database {
    #[instrument(skip(self))]
    async fn get_or_create_balance(&self, account_id: &str) -> Result<AccountBalance, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["get_or_create_balance"])
            .start_timer();

        let balance = sqlx::query_as::<_, AccountBalance>(
            r#"
            INSERT INTO account_balances (account_id, balance)
            VALUES ($1, 0)
            ON CONFLICT (account_id) DO UPDATE SET account_id = EXCLUDED.account_id
            RETURNING account_id, balance, updated_utc
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(balance)
    }

    #[instrument(skip(self, postings), fields(posting_count = postings.len()))]
    async fn post(&self, postings: &[Posting]) -> Result<Vec<Transaction>, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["post_ledger_batch"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        // Row locks in account order keep concurrent batches deadlock free.
        let account_ids: BTreeSet<&str> = postings.iter().map(|p| p.account_id.as_str()).collect();
        for account_id in account_ids {
            sqlx::query(
                "INSERT INTO account_balances (account_id, balance) VALUES ($1, 0) \
                 ON CONFLICT (account_id) DO NOTHING",
            )
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("SELECT balance FROM account_balances WHERE account_id = $1 FOR UPDATE")
                .bind(account_id)
                .execute(&mut *tx)
                .await?;
        }

        let mut written = Vec::with_capacity(postings.len());
        for posting in postings {
            // Dropping `tx` on an early return rolls the whole batch back.
            let balance_after: Option<Decimal> = sqlx::query_scalar(
                r#"
                UPDATE account_balances
                SET balance = balance + $2, updated_utc = NOW()
                WHERE account_id = $1 AND balance + $2 >= 0 AND balance + $2 <= $3
                RETURNING balance
                "#,
            )
            .bind(&posting.account_id)
            .bind(posting.balance_delta())
            .bind(MAX_BALANCE)
            .fetch_optional(&mut *tx)
            .await?;

            let balance_after = balance_after.ok_or_else(|| {
                if posting.balance_delta() > Decimal::ZERO {
                    StoreError::BalanceOutOfRange(posting.account_id.clone())
                } else {
                    StoreError::InsufficientBalance(posting.account_id.clone())
                }
            })?;

            let transaction = sqlx::query_as::<_, Transaction>(&format!(
                "INSERT INTO wallet_transactions \
                 (transaction_id, account_id, kind, amount, balance_after, description, reference) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 RETURNING {TRANSACTION_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(&posting.account_id)
            .bind(posting.kind)
            .bind(posting.amount)
            .bind(balance_after)
            .bind(&posting.description)
            .bind(&posting.reference)
            .fetch_one(&mut *tx)
            .await?;

            written.push(transaction);
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(written)
    }

    #[instrument(skip(self))]
    async fn transactions_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["transactions_for_account"])
            .start_timer();

        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE account_id = $1 ORDER BY sequence DESC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(transactions)
    }

    #[instrument(skip(self))]
    async fn transactions_for_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["transactions_for_reference"])
            .start_timer();

        let transactions = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE reference = $1 ORDER BY sequence"
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(transactions)
    }
}

// -------------------------------------------------------------------------
// Notification Operations
// -------------------------------------------------------------------------

#[async_trait]
impl NotificationStore for Database {
    #[instrument(skip(self, notification), fields(notification_id = %notification.notification_id))]
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["insert_notification"])
            .start_timer();

        sqlx::query(&format!(
            "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(notification.notification_id)
        .bind(&notification.recipient_id)
        .bind(notification.notification_type)
        .bind(notification.booking_id)
        .bind(&notification.message)
        .bind(notification.read)
        .bind(notification.created_utc)
        .execute(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["list_notifications"])
            .start_timer();

        let notifications = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE recipient_id = $1 ORDER BY sequence DESC"
        ))
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(notifications)
    }

    #[instrument(skip(self))]
    async fn mark_read(&self, notification_id: Uuid) -> Result<Notification, StoreError> {
        let timer = STORE_OPERATION_DURATION
            .with_label_values(&["mark_notification_read"])
            .start_timer();

        let notification = sqlx::query_as::<_, Notification>(&format!(
            "UPDATE notifications SET read = TRUE WHERE notification_id = $1 \
             RETURNING {NOTIFICATION_COLUMNS}"
        ))
        .bind(notification_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        notification.ok_or_else(|| StoreError::NotFound(notification_id.to_string()))
    }

    #[instrument(skip(self))]
    async fn unread_count(&self, recipient_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND NOT read",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
