//! Booking model, slot arithmetic and the status transition table.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Booking lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    OnHold,
    Confirmed,
    RescheduleRequested,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::OnHold => "on_hold",
            Self::Confirmed => "confirmed",
            Self::RescheduleRequested => "reschedule_requested",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }

    /// Whether a booking in this status blocks its slot for other bookings.
    ///
    /// `reschedule_requested` still occupies the slot because rejecting the
    /// reschedule puts the booking back to `confirmed`.
    pub fn occupies_slot(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::OnHold | Self::Confirmed | Self::RescheduleRequested
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that drive a booking through its lifecycle.
///
/// Each event is also the notification type fanned out to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum BookingEvent {
    #[serde(rename = "booking_created")]
    #[sqlx(rename = "booking_created")]
    Created,
    #[serde(rename = "booking_accepted")]
    #[sqlx(rename = "booking_accepted")]
    Accepted,
    #[serde(rename = "booking_cancelled")]
    #[sqlx(rename = "booking_cancelled")]
    Cancelled,
    #[serde(rename = "reschedule_requested")]
    #[sqlx(rename = "reschedule_requested")]
    RescheduleRequested,
    #[serde(rename = "reschedule_approved")]
    #[sqlx(rename = "reschedule_approved")]
    RescheduleApproved,
    #[serde(rename = "reschedule_rejected")]
    #[sqlx(rename = "reschedule_rejected")]
    RescheduleRejected,
}

impl BookingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "booking_created",
            Self::Accepted => "booking_accepted",
            Self::Cancelled => "booking_cancelled",
            Self::RescheduleRequested => "reschedule_requested",
            Self::RescheduleApproved => "reschedule_approved",
            Self::RescheduleRejected => "reschedule_rejected",
        }
    }

    /// Transition table for the booking the event is addressed to.
    ///
    /// `RescheduleRequested` is addressed to the original booking, the
    /// approve/reject events to the reschedule child. `Created` has no
    /// source status.
    pub fn transition(self, from: BookingStatus) -> Option<BookingStatus> {
        use BookingStatus::*;

        match (self, from) {
            (Self::Accepted, Pending) => Some(Confirmed),
            (Self::Cancelled, Pending | OnHold) => Some(Cancelled),
            (Self::RescheduleRequested, Confirmed) => Some(RescheduleRequested),
            (Self::RescheduleApproved, OnHold) => Some(Confirmed),
            (Self::RescheduleRejected, OnHold) => Some(Rejected),
            _ => None,
        }
    }

    /// What happens to the original booking when its reschedule child is
    /// resolved by this event: `(expected, next)`.
    pub fn original_transition(self) -> Option<(BookingStatus, BookingStatus)> {
        use BookingStatus::*;

        match self {
            Self::RescheduleApproved => Some((RescheduleRequested, Cancelled)),
            Self::RescheduleRejected | Self::Cancelled => Some((RescheduleRequested, Confirmed)),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A calendar day plus a half-open `[start, end)` time-of-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub date: NaiveDate,
    #[serde(with = "hh_mm")]
    pub start: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self { date, start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Half-open overlap on the same day.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.date == other.date && self.start < other.end && other.start < self.end
    }
}

/// Lesson booking between a requester and a provider.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: Uuid,
    pub provider_id: String,
    pub requester_id: String,
    pub lesson_type: String,
    pub date: NaiveDate,
    #[sqlx(rename = "start_time")]
    #[serde(with = "hh_mm")]
    pub start: NaiveTime,
    #[sqlx(rename = "end_time")]
    #[serde(with = "hh_mm")]
    pub end: NaiveTime,
    pub status: BookingStatus,
    pub amount: Decimal,
    pub original_booking_id: Option<Uuid>,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Booking {
    /// Fresh `pending` booking for a reservation request.
    pub fn pending(request: &NewBooking) -> Self {
        let now = Utc::now();
        Self {
            booking_id: Uuid::new_v4(),
            provider_id: request.provider_id.clone(),
            requester_id: request.requester_id.clone(),
            lesson_type: request.lesson_type.clone(),
            date: request.slot.date,
            start: request.slot.start,
            end: request.slot.end,
            status: BookingStatus::Pending,
            amount: request.amount,
            original_booking_id: None,
            version: 0,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Proposed replacement for a confirmed booking, created `on_hold`.
    pub fn reschedule_of(original: &Booking, slot: TimeSlot) -> Self {
        let now = Utc::now();
        Self {
            booking_id: Uuid::new_v4(),
            provider_id: original.provider_id.clone(),
            requester_id: original.requester_id.clone(),
            lesson_type: original.lesson_type.clone(),
            date: slot.date,
            start: slot.start,
            end: slot.end,
            status: BookingStatus::OnHold,
            amount: original.amount,
            original_booking_id: Some(original.booking_id),
            version: 0,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.date, self.start, self.end)
    }

    /// The other party of the booking, seen from `actor_id`.
    pub fn counterparty_of(&self, actor_id: &str) -> &str {
        if actor_id == self.requester_id {
            &self.provider_id
        } else {
            &self.requester_id
        }
    }

    pub fn parties(&self) -> Vec<String> {
        vec![self.requester_id.clone(), self.provider_id.clone()]
    }
}

/// Input for a reservation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    pub requester_id: String,
    pub provider_id: String,
    pub lesson_type: String,
    pub slot: TimeSlot,
    pub amount: Decimal,
}

/// Which rule a candidate booking broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClash {
    /// The provider already has an overlapping booking.
    Provider(Uuid),
    /// The requester already has an overlapping booking with another provider.
    Requester(Uuid),
}

/// Check `candidate` against the bookings of its provider and requester on
/// the same day. `ignore` excludes one booking, the original of a reschedule.
pub fn find_clash<'a>(
    candidate: &Booking,
    existing: impl IntoIterator<Item = &'a Booking>,
    ignore: Option<Uuid>,
) -> Option<SlotClash> {
    let slot = candidate.slot();
    let mut requester_clash = None;

    for other in existing {
        if other.booking_id == candidate.booking_id
            || Some(other.booking_id) == ignore
            || !other.status.occupies_slot()
            || !other.slot().overlaps(&slot)
        {
            continue;
        }

        if other.provider_id == candidate.provider_id {
            return Some(SlotClash::Provider(other.booking_id));
        }
        if other.requester_id == candidate.requester_id && requester_clash.is_none() {
            requester_clash = Some(SlotClash::Requester(other.booking_id));
        }
    }

    requester_clash
}

/// Date filter for provider calendar queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    On(NaiveDate),
    /// Inclusive on both ends.
    Between(NaiveDate, NaiveDate),
}

impl DateFilter {
    pub fn contains(&self, date: NaiveDate) -> bool {
        match *self {
            Self::On(day) => date == day,
            Self::Between(from, to) => from <= date && date <= to,
        }
    }
}

/// A capped list of sessions plus the full count behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSummary {
    pub sessions: Vec<Booking>,
    pub total_count: usize,
}

/// `HH:MM` wire format for times of day; seconds are accepted on input.
pub mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    }
}
