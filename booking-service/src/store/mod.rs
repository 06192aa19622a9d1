//! Repository contracts for bookings, the wallet ledger and notifications.
//!
//! Two adapters ship: [`memory`] for tests and database-less runs, and
//! [`postgres`] backed by sqlx.

pub mod memory;
pub mod postgres;

use crate::models::{
    AccountBalance, Booking, BookingStatus, DateFilter, Notification, Posting, Transaction,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{MemoryBookingStore, MemoryLedgerStore, MemoryNotificationStore};
pub use postgres::Database;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("booking {booking_id} changed since version {expected}")]
    VersionMismatch { booking_id: Uuid, expected: i64 },

    #[error("slot overlaps provider booking {0}")]
    SlotTaken(Uuid),

    #[error("slot overlaps requester booking {0}")]
    RequesterBusy(Uuid),

    #[error("insufficient balance on account {0}")]
    InsufficientBalance(String),

    #[error("balance of account {0} would exceed the maximum")]
    BalanceOutOfRange(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert a new booking, re-checking the slot rules against committed
    /// bookings atomically. `ignore` excludes one booking from the check.
    async fn insert(&self, booking: &Booking, ignore: Option<Uuid>) -> Result<Booking, StoreError>;

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Provider bookings ordered by date then start.
    async fn find_by_provider(
        &self,
        provider_id: &str,
        filter: Option<DateFilter>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Requester bookings ordered by date then start.
    async fn find_by_requester(
        &self,
        requester_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Conditional status write: succeeds only if the stored version still
    /// equals `expected_version`, and bumps it.
    async fn update_status(
        &self,
        booking_id: Uuid,
        expected_version: i64,
        status: BookingStatus,
    ) -> Result<Booking, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_or_create_balance(&self, account_id: &str) -> Result<AccountBalance, StoreError>;

    /// Apply a batch of postings all-or-nothing, one transaction record per
    /// posting, returned in batch order.
    async fn post(&self, postings: &[Posting]) -> Result<Vec<Transaction>, StoreError>;

    /// Newest first.
    async fn transactions_for_account(&self, account_id: &str)
        -> Result<Vec<Transaction>, StoreError>;

    /// Oldest first.
    async fn transactions_for_reference(&self, reference: &str)
        -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>, StoreError>;

    async fn mark_read(&self, notification_id: Uuid) -> Result<Notification, StoreError>;

    async fn unread_count(&self, recipient_id: &str) -> Result<i64, StoreError>;
}
