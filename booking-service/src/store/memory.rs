//! In-process adapters built on `dashmap` and `tokio::sync` locks.

use super::{BookingStore, LedgerStore, NotificationStore, StoreError};
use crate::models::{
    find_clash, AccountBalance, Booking, BookingStatus, DateFilter, Notification, Posting,
    SlotClash, Transaction, MAX_BALANCE,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

// -------------------------------------------------------------------------
// Bookings
// -------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBookingStore {
    bookings: DashMap<Uuid, Booking>,
    // Serializes inserts so the clash check and the write are one step.
    slot_gate: Mutex<()>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, keep: F) -> Vec<Booking>
    where
        F: Fn(&Booking) -> bool,
    {
        let mut found: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| (a.date, a.start, a.created_utc).cmp(&(b.date, b.start, b.created_utc)));
        found
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn insert(&self, booking: &Booking, ignore: Option<Uuid>) -> Result<Booking, StoreError> {
        let _gate = self.slot_gate.lock().await;

        let same_day = self.collect(|b| {
            b.date == booking.date
                && (b.provider_id == booking.provider_id || b.requester_id == booking.requester_id)
        });

        match find_clash(booking, &same_day, ignore) {
            Some(SlotClash::Provider(id)) => return Err(StoreError::SlotTaken(id)),
            Some(SlotClash::Requester(id)) => return Err(StoreError::RequesterBusy(id)),
            None => {}
        }

        self.bookings.insert(booking.booking_id, booking.clone());
        Ok(booking.clone())
    }

    async fn find_by_id(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.get(&booking_id).map(|entry| entry.value().clone()))
    }

    async fn find_by_provider(
        &self,
        provider_id: &str,
        filter: Option<DateFilter>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect(|b| {
            b.provider_id == provider_id && filter.map_or(true, |f| f.contains(b.date))
        }))
    }

    async fn find_by_requester(
        &self,
        requester_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, StoreError> {
        Ok(self.collect(|b| b.requester_id == requester_id && date.map_or(true, |d| b.date == d)))
    }

    async fn update_status(
        &self,
        booking_id: Uuid,
        expected_version: i64,
        status: BookingStatus,
    ) -> Result<Booking, StoreError> {
        let mut entry = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::NotFound(booking_id.to_string()))?;

        if entry.version != expected_version {
            return Err(StoreError::VersionMismatch {
                booking_id,
                expected: expected_version,
            });
        }

        entry.status = status;
        entry.version += 1;
        entry.updated_utc = Utc::now();
        Ok(entry.clone())
    }
}

// -------------------------------------------------------------------------
// Ledger
// -------------------------------------------------------------------------

struct AccountState {
    balance: Decimal,
    updated_utc: DateTime<Utc>,
    transactions: Vec<Transaction>,
}

impl AccountState {
    fn new() -> Self {
        Self {
            balance: Decimal::ZERO,
            updated_utc: Utc::now(),
            transactions: Vec::new(),
        }
    }
}

/// Each account sits behind its own mutex; a batch locks its accounts in
/// sorted order before validating anything.
#[derive(Default)]
pub struct MemoryLedgerStore {
    accounts: DashMap<String, Arc<Mutex<AccountState>>>,
    by_reference: DashMap<String, Vec<Transaction>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn account(&self, account_id: &str) -> Arc<Mutex<AccountState>> {
        self.accounts
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(AccountState::new())))
            .clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_or_create_balance(&self, account_id: &str) -> Result<AccountBalance, StoreError> {
        let state = self.account(account_id);
        let state = state.lock().await;
        Ok(AccountBalance {
            account_id: account_id.to_string(),
            balance: state.balance,
            updated_utc: state.updated_utc,
        })
    }

    async fn post(&self, postings: &[Posting]) -> Result<Vec<Transaction>, StoreError> {
        let account_ids: BTreeSet<&str> = postings.iter().map(|p| p.account_id.as_str()).collect();

        let mut guards: BTreeMap<&str, OwnedMutexGuard<AccountState>> = BTreeMap::new();
        for account_id in account_ids {
            guards.insert(account_id, self.account(account_id).lock_owned().await);
        }

        // Validate the whole batch before touching any state.
        let mut projected: BTreeMap<&str, Decimal> =
            guards.iter().map(|(id, state)| (*id, state.balance)).collect();
        for posting in postings {
            let balance = projected
                .get_mut(posting.account_id.as_str())
                .ok_or_else(|| StoreError::NotFound(posting.account_id.clone()))?;
            *balance = balance
                .checked_add(posting.balance_delta())
                .filter(|next| *next <= MAX_BALANCE)
                .ok_or_else(|| StoreError::BalanceOutOfRange(posting.account_id.clone()))?;
            if *balance < Decimal::ZERO {
                return Err(StoreError::InsufficientBalance(posting.account_id.clone()));
            }
        }

        let now = Utc::now();
        let mut written = Vec::with_capacity(postings.len());
        for posting in postings {
            let state = guards
                .get_mut(posting.account_id.as_str())
                .ok_or_else(|| StoreError::NotFound(posting.account_id.clone()))?;

            // In range: the validation pass ran the same additions.
            state.balance += posting.balance_delta();
            state.updated_utc = now;

            let transaction = Transaction {
                transaction_id: Uuid::new_v4(),
                account_id: posting.account_id.clone(),
                kind: posting.kind,
                amount: posting.amount,
                balance_after: state.balance,
                description: posting.description.clone(),
                reference: posting.reference.clone(),
                created_utc: now,
            };
            state.transactions.push(transaction.clone());
            self.by_reference
                .entry(posting.reference.clone())
                .or_default()
                .push(transaction.clone());
            written.push(transaction);
        }

        Ok(written)
    }

    async fn transactions_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        let Some(state) = self.accounts.get(account_id).map(|entry| entry.value().clone()) else {
            return Ok(Vec::new());
        };
        let state = state.lock().await;
        Ok(state.transactions.iter().rev().cloned().collect())
    }

    async fn transactions_for_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .by_reference
            .get(reference)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

// -------------------------------------------------------------------------
// Notifications
// -------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: RwLock<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<(), StoreError> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }

    async fn list_for_recipient(&self, recipient_id: &str) -> Result<Vec<Notification>, StoreError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .rev()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, notification_id: Uuid) -> Result<Notification, StoreError> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications
            .iter_mut()
            .find(|n| n.notification_id == notification_id)
            .ok_or_else(|| StoreError::NotFound(notification_id.to_string()))?;
        notification.read = true;
        Ok(notification.clone())
    }

    async fn unread_count(&self, recipient_id: &str) -> Result<i64, StoreError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBooking, TimeSlot, TransactionKind};
    use chrono::NaiveTime;

    fn booking(provider: &str, requester: &str, start: u32, end: u32) -> Booking {
        Booking::pending(&NewBooking {
            requester_id: requester.to_string(),
            provider_id: provider.to_string(),
            lesson_type: "Piano".to_string(),
            slot: TimeSlot::new(
                NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
                NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
            ),
            amount: Decimal::from(50),
        })
    }

    #[tokio::test]
    async fn insert_rejects_overlap() {
        let store = MemoryBookingStore::new();
        let first = store.insert(&booking("T1", "S1", 10, 11), None).await.unwrap();

        let err = store.insert(&booking("T1", "S2", 10, 12), None).await.unwrap_err();
        assert!(matches!(err, StoreError::SlotTaken(id) if id == first.booking_id));

        let err = store.insert(&booking("T2", "S1", 10, 11), None).await.unwrap_err();
        assert!(matches!(err, StoreError::RequesterBusy(id) if id == first.booking_id));
    }

    #[tokio::test]
    async fn update_status_checks_version() {
        let store = MemoryBookingStore::new();
        let b = store.insert(&booking("T1", "S1", 10, 11), None).await.unwrap();

        let updated = store
            .update_status(b.booking_id, 0, BookingStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(updated.version, 1);

        let err = store
            .update_status(b.booking_id, 0, BookingStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { expected: 0, .. }));
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let ledger = MemoryLedgerStore::new();
        ledger
            .post(&[Posting::credit("A", TransactionKind::Purchase, Decimal::from(10), "top up", "r1")])
            .await
            .unwrap();

        let err = ledger
            .post(&[
                Posting::credit("B", TransactionKind::Purchase, Decimal::from(5), "top up", "r2"),
                Posting::debit("A", TransactionKind::BookingDeduct, Decimal::from(11), "deduct", "r2"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientBalance(ref id) if id == "A"));

        assert_eq!(ledger.get_or_create_balance("A").await.unwrap().balance, Decimal::from(10));
        assert_eq!(ledger.get_or_create_balance("B").await.unwrap().balance, Decimal::ZERO);
        assert!(ledger.transactions_for_reference("r2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn credit_past_the_ceiling_is_refused() {
        let ledger = MemoryLedgerStore::new();
        ledger
            .post(&[Posting::credit("A", TransactionKind::Purchase, MAX_BALANCE, "top up", "r1")])
            .await
            .unwrap();

        let err = ledger
            .post(&[Posting::credit("A", TransactionKind::Purchase, Decimal::ONE, "top up", "r2")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BalanceOutOfRange(ref id) if id == "A"));

        let err = ledger
            .post(&[Posting::credit("B", TransactionKind::Purchase, Decimal::MAX, "top up", "r3")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BalanceOutOfRange(ref id) if id == "B"));

        assert_eq!(ledger.get_or_create_balance("A").await.unwrap().balance, MAX_BALANCE);
        assert!(ledger.transactions_for_reference("r2").await.unwrap().is_empty());
    }
}
