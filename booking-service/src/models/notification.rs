use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{Booking, BookingEvent};

/// Persisted notification addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub recipient_id: String,
    pub notification_type: BookingEvent,
    pub booking_id: Uuid,
    pub message: String,
    pub read: bool,
    pub created_utc: DateTime<Utc>,
}

impl Notification {
    pub fn for_event(event: BookingEvent, booking: &Booking, recipient_id: &str) -> Self {
        Self {
            notification_id: Uuid::new_v4(),
            recipient_id: recipient_id.to_string(),
            notification_type: event,
            booking_id: booking.booking_id,
            message: message_for(event, booking),
            read: false,
            created_utc: Utc::now(),
        }
    }
}

fn message_for(event: BookingEvent, booking: &Booking) -> String {
    let when = format!(
        "{} {}-{}",
        booking.date,
        booking.start.format("%H:%M"),
        booking.end.format("%H:%M")
    );

    match event {
        BookingEvent::Created => format!(
            "A new booking for {} on {} has been created.",
            booking.lesson_type, when
        ),
        BookingEvent::Accepted => format!(
            "The booking for {} on {} has been confirmed.",
            booking.lesson_type, when
        ),
        BookingEvent::Cancelled => format!(
            "The booking for {} on {} has been cancelled.",
            booking.lesson_type, when
        ),
        BookingEvent::RescheduleRequested => format!(
            "A reschedule of {} to {} has been requested.",
            booking.lesson_type, when
        ),
        BookingEvent::RescheduleApproved => format!(
            "The reschedule of {} to {} has been approved.",
            booking.lesson_type, when
        ),
        BookingEvent::RescheduleRejected => format!(
            "The reschedule request for {} has been rejected. The original session on {} stands.",
            booking.lesson_type, when
        ),
    }
}
