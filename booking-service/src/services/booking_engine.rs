//! Booking state machine.
//!
//! Transitions are claim-then-settle: the status change is written with a
//! version check, then the wallet moves money. If the wallet call fails the
//! status is written back. Creation holds funds first and refunds them if
//! the insert is rejected. Observers run after every successful transition.

use crate::models::{
    find_clash, Booking, BookingEvent, BookingStatus, BookingSummary, DateFilter, NewBooking,
    SlotClash, TimeSlot,
};
use crate::services::metrics::BOOKING_TRANSITIONS_TOTAL;
use crate::services::wallet::{WalletError, WalletService};
use crate::store::{BookingStore, StoreError};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const SUMMARY_LIMIT: usize = 5;

/// Why a transition was refused on an existing booking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IllegalState {
    #[error("booking {0} not found")]
    NotFound(Uuid),

    #[error("booking {booking_id} is {actual}, {event} is not allowed")]
    WrongStatus {
        booking_id: Uuid,
        actual: BookingStatus,
        event: BookingEvent,
    },

    #[error("booking {0} was modified concurrently")]
    Stale(Uuid),

    #[error("booking {0} is not a reschedule request")]
    NotRescheduleChild(Uuid),
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid booking amount: {0}")]
    InvalidAmount(Decimal),

    #[error("invalid time slot: start must be before end")]
    InvalidSlot,

    #[error("selected slot is already booked (booking {0})")]
    Conflict(Uuid),

    #[error("requester already has an overlapping booking with another provider (booking {0})")]
    ConcurrentBooking(Uuid),

    #[error(transparent)]
    IllegalState(#[from] IllegalState),

    #[error("insufficient funds on account {0}")]
    InsufficientFunds(String),

    #[error("balance of account {0} would exceed the maximum")]
    BalanceOutOfRange(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotTaken(id) => Self::Conflict(id),
            StoreError::RequesterBusy(id) => Self::ConcurrentBooking(id),
            StoreError::VersionMismatch { booking_id, .. } => {
                Self::IllegalState(IllegalState::Stale(booking_id))
            }
            StoreError::InsufficientBalance(account_id) => Self::InsufficientFunds(account_id),
            StoreError::BalanceOutOfRange(account_id) => Self::BalanceOutOfRange(account_id),
            other => Self::Store(other),
        }
    }
}

impl From<WalletError> for BookingError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InvalidAmount(amount) => Self::InvalidAmount(amount),
            WalletError::InsufficientFunds(account_id) => Self::InsufficientFunds(account_id),
            WalletError::BalanceOutOfRange(account_id) => Self::BalanceOutOfRange(account_id),
            WalletError::Store(inner) => Self::Store(inner),
        }
    }
}

/// Receives every successful transition with its concrete recipients.
#[async_trait]
pub trait BookingObserver: Send + Sync {
    async fn on_event(&self, event: BookingEvent, booking: &Booking, recipient_ids: &[String]);
}

pub struct BookingEngine {
    bookings: Arc<dyn BookingStore>,
    wallet: Arc<WalletService>,
    observers: Vec<Arc<dyn BookingObserver>>,
}

impl BookingEngine {
    pub fn new(bookings: Arc<dyn BookingStore>, wallet: Arc<WalletService>) -> Self {
        Self {
            bookings,
            wallet,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn BookingObserver>) {
        self.observers.push(observer);
    }

    /// Reserve a slot and hold the requester's funds.
    #[instrument(
        skip(self, request),
        fields(
            requester_id = %request.requester_id,
            provider_id = %request.provider_id,
            amount = %request.amount
        )
    )]
    pub async fn create(&self, request: NewBooking) -> Result<Booking, BookingError> {
        let event = BookingEvent::Created;
        if request.amount <= Decimal::ZERO {
            return Err(self.fail(event, BookingError::InvalidAmount(request.amount)));
        }
        if !request.slot.is_valid() {
            return Err(self.fail(event, BookingError::InvalidSlot));
        }

        let booking = Booking::pending(&request);
        self.ensure_slot_free(&booking, None, event).await?;

        let reference = booking.booking_id.to_string();
        self.wallet
            .hold(&booking.requester_id, booking.amount, &reference)
            .await
            .map_err(|e| self.fail(event, e.into()))?;

        let booking = match self.bookings.insert(&booking, None).await {
            Ok(inserted) => inserted,
            Err(err) => {
                warn!(booking_id = %booking.booking_id, error = %err, "Insert rejected, refunding hold");
                if let Err(refund_err) = self
                    .wallet
                    .refund(&booking.requester_id, booking.amount, &reference)
                    .await
                {
                    error!(
                        booking_id = %booking.booking_id,
                        error = %refund_err,
                        "Compensating refund failed"
                    );
                }
                return Err(self.fail(event, err.into()));
            }
        };

        self.succeed(event, &booking, &[booking.provider_id.clone()]).await;
        Ok(booking)
    }

    /// Confirm a pending booking and pay out the escrow.
    #[instrument(skip(self))]
    pub async fn accept(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        let event = BookingEvent::Accepted;
        let current = self.load(booking_id, event).await?;
        let confirmed = self.advance(&current, event).await?;

        if let Err(err) = self
            .wallet
            .release_with_split(
                &current.requester_id,
                &current.provider_id,
                current.amount,
                &booking_id.to_string(),
            )
            .await
        {
            self.revert(&confirmed, current.status).await;
            return Err(self.fail(event, err.into()));
        }

        self.succeed(event, &confirmed, &confirmed.parties()).await;
        Ok(confirmed)
    }

    /// Cancel a pending booking (refunding the hold) or withdraw an on-hold
    /// reschedule request (restoring the original).
    #[instrument(skip(self))]
    pub async fn cancel(&self, booking_id: Uuid, actor_id: &str) -> Result<Booking, BookingError> {
        let event = BookingEvent::Cancelled;
        let current = self.load(booking_id, event).await?;

        if current.status == BookingStatus::OnHold {
            return self.resolve_reschedule(current, event, actor_id).await;
        }

        let cancelled = self.advance(&current, event).await?;

        if let Err(err) = self
            .wallet
            .refund(&current.requester_id, current.amount, &booking_id.to_string())
            .await
        {
            self.revert(&cancelled, current.status).await;
            return Err(self.fail(event, err.into()));
        }

        let recipient = cancelled.counterparty_of(actor_id).to_string();
        self.succeed(event, &cancelled, &[recipient]).await;
        Ok(cancelled)
    }

    /// Propose a new slot for a confirmed booking. Returns the on-hold child.
    #[instrument(skip(self))]
    pub async fn request_reschedule(
        &self,
        booking_id: Uuid,
        new_slot: TimeSlot,
    ) -> Result<Booking, BookingError> {
        let event = BookingEvent::RescheduleRequested;
        if !new_slot.is_valid() {
            return Err(self.fail(event, BookingError::InvalidSlot));
        }

        let original = self.load(booking_id, event).await?;
        if original.status != BookingStatus::Confirmed {
            return Err(self.fail(event, wrong_status(&original, event)));
        }

        let child = Booking::reschedule_of(&original, new_slot);
        self.ensure_slot_free(&child, Some(original.booking_id), event)
            .await?;

        let requested = self.advance(&original, event).await?;

        let child = match self.bookings.insert(&child, Some(original.booking_id)).await {
            Ok(inserted) => inserted,
            Err(err) => {
                self.revert(&requested, original.status).await;
                return Err(self.fail(event, err.into()));
            }
        };

        self.succeed(event, &child, &[child.provider_id.clone()]).await;
        Ok(child)
    }

    /// Confirm the child slot and cancel the original. Returns the child.
    #[instrument(skip(self))]
    pub async fn approve_reschedule(&self, child_id: Uuid) -> Result<Booking, BookingError> {
        let event = BookingEvent::RescheduleApproved;
        let child = self.load(child_id, event).await?;
        self.resolve_reschedule(child, event, "").await
    }

    /// Reject the child slot and restore the original. Returns the original.
    #[instrument(skip(self))]
    pub async fn reject_reschedule(&self, child_id: Uuid) -> Result<Booking, BookingError> {
        let event = BookingEvent::RescheduleRejected;
        let child = self.load(child_id, event).await?;
        self.resolve_reschedule(child, event, "").await
    }

    #[instrument(skip(self))]
    pub async fn get_by_id(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(BookingError::IllegalState(IllegalState::NotFound(booking_id)))
    }

    /// Provider bookings ordered by date then start.
    #[instrument(skip(self))]
    pub async fn list_by_provider(
        &self,
        provider_id: &str,
        filter: DateFilter,
    ) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.find_by_provider(provider_id, Some(filter)).await?)
    }

    /// Requester bookings ordered by date then start.
    #[instrument(skip(self))]
    pub async fn list_by_requester(&self, requester_id: &str) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.find_by_requester(requester_id, None).await?)
    }

    /// Pending and confirmed sessions from `today` on, soonest first.
    #[instrument(skip(self))]
    pub async fn upcoming_for_provider(
        &self,
        provider_id: &str,
        today: NaiveDate,
    ) -> Result<BookingSummary, BookingError> {
        let upcoming: Vec<Booking> = self
            .bookings
            .find_by_provider(provider_id, None)
            .await?
            .into_iter()
            .filter(|b| {
                b.date >= today
                    && matches!(b.status, BookingStatus::Pending | BookingStatus::Confirmed)
            })
            .collect();

        Ok(summarize(upcoming))
    }

    /// Confirmed sessions before `today`, most recent first.
    #[instrument(skip(self))]
    pub async fn recent_past_for_provider(
        &self,
        provider_id: &str,
        today: NaiveDate,
    ) -> Result<BookingSummary, BookingError> {
        let mut past: Vec<Booking> = self
            .bookings
            .find_by_provider(provider_id, None)
            .await?
            .into_iter()
            .filter(|b| b.date < today && b.status == BookingStatus::Confirmed)
            .collect();
        past.reverse();

        Ok(summarize(past))
    }

    /// Settle an on-hold reschedule child: approve, reject, or withdraw.
    async fn resolve_reschedule(
        &self,
        child: Booking,
        event: BookingEvent,
        actor_id: &str,
    ) -> Result<Booking, BookingError> {
        if event.transition(child.status).is_none() {
            return Err(self.fail(event, wrong_status(&child, event)));
        }
        let Some(original_id) = child.original_booking_id else {
            let err = IllegalState::NotRescheduleChild(child.booking_id).into();
            return Err(self.fail(event, err));
        };
        let Some((expected, next)) = event.original_transition() else {
            return Err(self.fail(event, wrong_status(&child, event)));
        };

        let original = self.load(original_id, event).await?;
        if original.status != expected {
            return Err(self.fail(event, wrong_status(&original, event)));
        }

        let settled_child = self.advance(&child, event).await?;
        let settled_original = match self
            .bookings
            .update_status(original_id, original.version, next)
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                self.revert(&settled_child, child.status).await;
                return Err(self.fail(event, err.into()));
            }
        };

        info!(
            child_id = %settled_child.booking_id,
            original_id = %original_id,
            child_status = %settled_child.status,
            original_status = %settled_original.status,
            "Reschedule resolved"
        );

        match event {
            BookingEvent::RescheduleApproved => {
                self.succeed(event, &settled_child, &settled_child.parties()).await;
                Ok(settled_child)
            }
            BookingEvent::RescheduleRejected => {
                self.succeed(event, &settled_original, &settled_original.parties())
                    .await;
                Ok(settled_original)
            }
            _ => {
                let recipient = settled_child.counterparty_of(actor_id).to_string();
                self.succeed(event, &settled_child, &[recipient]).await;
                Ok(settled_child)
            }
        }
    }

    /// Pre-check against committed bookings; the store repeats it atomically
    /// on insert.
    async fn ensure_slot_free(
        &self,
        candidate: &Booking,
        ignore: Option<Uuid>,
        event: BookingEvent,
    ) -> Result<(), BookingError> {
        let day = candidate.date;
        let mut same_day = self
            .bookings
            .find_by_provider(&candidate.provider_id, Some(DateFilter::On(day)))
            .await
            .map_err(|e| self.fail(event, e.into()))?;
        same_day.extend(
            self.bookings
                .find_by_requester(&candidate.requester_id, Some(day))
                .await
                .map_err(|e| self.fail(event, e.into()))?,
        );

        match find_clash(candidate, &same_day, ignore) {
            Some(SlotClash::Provider(id)) => Err(self.fail(event, BookingError::Conflict(id))),
            Some(SlotClash::Requester(id)) => {
                Err(self.fail(event, BookingError::ConcurrentBooking(id)))
            }
            None => Ok(()),
        }
    }

    async fn load(&self, booking_id: Uuid, event: BookingEvent) -> Result<Booking, BookingError> {
        match self.bookings.find_by_id(booking_id).await {
            Ok(Some(booking)) => Ok(booking),
            Ok(None) => Err(self.fail(event, IllegalState::NotFound(booking_id).into())),
            Err(err) => Err(self.fail(event, err.into())),
        }
    }

    /// Version-checked status write for `event`'s transition.
    async fn advance(&self, current: &Booking, event: BookingEvent) -> Result<Booking, BookingError> {
        let Some(next) = event.transition(current.status) else {
            return Err(self.fail(event, wrong_status(current, event)));
        };

        self.bookings
            .update_status(current.booking_id, current.version, next)
            .await
            .map_err(|e| self.fail(event, e.into()))
    }

    /// Put a claimed booking back after a failed settlement.
    async fn revert(&self, claimed: &Booking, previous: BookingStatus) {
        match self
            .bookings
            .update_status(claimed.booking_id, claimed.version, previous)
            .await
        {
            Ok(_) => warn!(booking_id = %claimed.booking_id, status = %previous, "Transition reverted"),
            Err(err) => error!(
                booking_id = %claimed.booking_id,
                error = %err,
                "Failed to revert booking status"
            ),
        }
    }

    async fn succeed(&self, event: BookingEvent, booking: &Booking, recipients: &[String]) {
        BOOKING_TRANSITIONS_TOTAL
            .with_label_values(&[event.as_str(), "ok"])
            .inc();
        info!(
            booking_id = %booking.booking_id,
            event = %event,
            status = %booking.status,
            "Booking transition applied"
        );

        for observer in &self.observers {
            observer.on_event(event, booking, recipients).await;
        }
    }

    fn fail(&self, event: BookingEvent, err: BookingError) -> BookingError {
        let outcome = match &err {
            BookingError::InvalidAmount(_) | BookingError::InvalidSlot => "invalid",
            BookingError::Conflict(_) | BookingError::ConcurrentBooking(_) => "conflict",
            BookingError::IllegalState(_) => "illegal_state",
            BookingError::InsufficientFunds(_) => "insufficient_funds",
            BookingError::BalanceOutOfRange(_) => "out_of_range",
            BookingError::Store(_) => "store_error",
        };
        BOOKING_TRANSITIONS_TOTAL
            .with_label_values(&[event.as_str(), outcome])
            .inc();
        err
    }
}

fn wrong_status(booking: &Booking, event: BookingEvent) -> BookingError {
    IllegalState::WrongStatus {
        booking_id: booking.booking_id,
        actual: booking.status,
        event,
    }
    .into()
}

fn summarize(bookings: Vec<Booking>) -> BookingSummary {
    let total_count = bookings.len();
    BookingSummary {
        sessions: bookings.into_iter().take(SUMMARY_LIMIT).collect(),
        total_count,
    }
}
