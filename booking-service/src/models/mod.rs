//! Domain models for booking-service.

mod booking;
mod notification;
mod wallet;

pub use booking::{
    find_clash, hh_mm, Booking, BookingEvent, BookingStatus, BookingSummary, DateFilter,
    NewBooking, SlotClash, TimeSlot,
};
pub use notification::Notification;
pub use wallet::{
    AccountBalance, CommissionSplit, Posting, Transaction, TransactionKind, MAX_BALANCE,
};
