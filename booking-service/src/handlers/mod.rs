//! HTTP handlers for booking-service.

pub mod bookings;
pub mod health;
pub mod notifications;
pub mod wallet;

use crate::services::metrics::ERRORS_TOTAL;
use crate::services::{BookingError, IllegalState, NotificationError, WalletError};
use service_core::error::AppError;

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::InvalidAmount(_)
            | BookingError::InvalidSlot
            | BookingError::BalanceOutOfRange(_) => {
                AppError::BadRequest(anyhow::Error::new(err))
            }
            BookingError::Conflict(_) | BookingError::ConcurrentBooking(_) => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            BookingError::IllegalState(IllegalState::NotFound(_)) => {
                AppError::NotFound(anyhow::Error::new(err))
            }
            BookingError::IllegalState(_) => AppError::Conflict(anyhow::Error::new(err)),
            BookingError::InsufficientFunds(_) => {
                AppError::PaymentRequired(anyhow::Error::new(err))
            }
            BookingError::Store(_) => {
                ERRORS_TOTAL.with_label_values(&["store_error"]).inc();
                AppError::DatabaseError(anyhow::Error::new(err))
            }
        }
    }
}

impl From<WalletError> for AppError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InvalidAmount(_) | WalletError::BalanceOutOfRange(_) => {
                AppError::BadRequest(anyhow::Error::new(err))
            }
            WalletError::InsufficientFunds(_) => AppError::PaymentRequired(anyhow::Error::new(err)),
            WalletError::Store(_) => {
                ERRORS_TOTAL.with_label_values(&["store_error"]).inc();
                AppError::DatabaseError(anyhow::Error::new(err))
            }
        }
    }
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::NotFound(_) => AppError::NotFound(anyhow::Error::new(err)),
            NotificationError::Store(_) => {
                ERRORS_TOTAL.with_label_values(&["store_error"]).inc();
                AppError::DatabaseError(anyhow::Error::new(err))
            }
        }
    }
}
