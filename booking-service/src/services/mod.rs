//! Core services for booking-service.

pub mod booking_engine;
pub mod metrics;
pub mod notifications;
pub mod wallet;

pub use booking_engine::{BookingEngine, BookingError, BookingObserver, IllegalState};
pub use metrics::{get_metrics, init_metrics};
pub use notifications::{
    LiveFeed, NotificationDispatcher, NotificationError, Subscription, SubscriptionRegistry,
};
pub use wallet::{WalletError, WalletService};
