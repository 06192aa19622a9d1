//! Notification fan-out: persist one row per recipient, then push to any
//! live subscription channel of that recipient.

use crate::models::{Booking, BookingEvent, Notification};
use crate::services::booking_engine::BookingObserver;
use crate::services::metrics::NOTIFICATIONS_TOTAL;
use crate::store::{NotificationStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for NotificationError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

struct Subscriber {
    id: u64,
    sender: UnboundedSender<Notification>,
}

/// Live push channels per user. A user may hold several at once.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Receiving end of a live subscription.
pub struct Subscription {
    pub id: u64,
    pub receiver: UnboundedReceiver<Notification>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, user_id: &str) -> Subscription {
        let (sender, receiver) = unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.channels
            .entry(user_id.to_string())
            .or_default()
            .push(Subscriber { id, sender });
        debug!(user_id = %user_id, subscription_id = id, "Subscription registered");

        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, user_id: &str, subscription_id: u64) {
        if let Some(mut subscribers) = self.channels.get_mut(user_id) {
            subscribers.retain(|s| s.id != subscription_id);
        }
        self.channels.remove_if(user_id, |_, subscribers| subscribers.is_empty());
    }

    /// Send to every live channel of `user_id`, dropping closed ones.
    /// Returns the number of channels reached.
    pub fn push(&self, user_id: &str, notification: &Notification) -> usize {
        let mut delivered = 0;

        if let Some(mut subscribers) = self.channels.get_mut(user_id) {
            subscribers.retain(|subscriber| match subscriber.sender.send(notification.clone()) {
                Ok(()) => {
                    delivered += 1;
                    NOTIFICATIONS_TOTAL.with_label_values(&["delivered"]).inc();
                    true
                }
                Err(_) => {
                    warn!(
                        user_id = %user_id,
                        subscription_id = subscriber.id,
                        "Push channel closed, removing"
                    );
                    NOTIFICATIONS_TOTAL.with_label_values(&["dropped"]).inc();
                    false
                }
            });
        }
        self.channels.remove_if(user_id, |_, subscribers| subscribers.is_empty());

        delivered
    }

    pub fn subscriber_count(&self, user_id: &str) -> usize {
        self.channels.get(user_id).map_or(0, |s| s.len())
    }
}

/// A live subscription as a stream. Dropping it unregisters the channel,
/// so a disconnected client leaves nothing behind in the registry.
pub struct LiveFeed {
    dispatcher: Arc<NotificationDispatcher>,
    user_id: String,
    subscription_id: u64,
    receiver: UnboundedReceiverStream<Notification>,
}

impl LiveFeed {
    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }
}

impl Stream for LiveFeed {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Notification>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.dispatcher
            .registry
            .unsubscribe(&self.user_id, self.subscription_id);
        debug!(
            user_id = %self.user_id,
            subscription_id = self.subscription_id,
            "Live feed closed"
        );
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn NotificationStore>,
    registry: SubscriptionRegistry,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self {
            store,
            registry: SubscriptionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn subscribe(&self, user_id: &str) -> Subscription {
        self.registry.subscribe(user_id)
    }

    /// Subscribe `user_id` for the lifetime of the returned stream.
    pub fn live_feed(self: &Arc<Self>, user_id: &str) -> LiveFeed {
        let Subscription { id, receiver } = self.registry.subscribe(user_id);
        LiveFeed {
            dispatcher: Arc::clone(self),
            user_id: user_id.to_string(),
            subscription_id: id,
            receiver: UnboundedReceiverStream::new(receiver),
        }
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>, NotificationError> {
        Ok(self.store.list_for_recipient(user_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn mark_as_read(&self, notification_id: Uuid) -> Result<Notification, NotificationError> {
        self.store
            .mark_read(notification_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => NotificationError::NotFound(notification_id),
                other => NotificationError::Store(other),
            })
    }

    #[instrument(skip(self))]
    pub async fn unread_count(&self, user_id: &str) -> Result<i64, NotificationError> {
        Ok(self.store.unread_count(user_id).await?)
    }

    async fn deliver(&self, notification: Notification) {
        if let Err(err) = self.store.insert(&notification).await {
            error!(
                notification_id = %notification.notification_id,
                recipient_id = %notification.recipient_id,
                error = %err,
                "Failed to persist notification"
            );
            NOTIFICATIONS_TOTAL.with_label_values(&["persist_failed"]).inc();
        }

        self.registry.push(&notification.recipient_id, &notification);
    }
}

#[async_trait]
impl BookingObserver for NotificationDispatcher {
    #[instrument(skip(self, booking), fields(booking_id = %booking.booking_id, event = %event))]
    async fn on_event(&self, event: BookingEvent, booking: &Booking, recipient_ids: &[String]) {
        for recipient_id in recipient_ids {
            self.deliver(Notification::for_event(event, booking, recipient_id))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBooking, TimeSlot};
    use chrono::{NaiveDate, NaiveTime};
    use rust_decimal::Decimal;

    fn sample_booking() -> Booking {
        Booking::pending(&NewBooking {
            requester_id: "S1".to_string(),
            provider_id: "T1".to_string(),
            lesson_type: "Guitar".to_string(),
            slot: TimeSlot::new(
                NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            ),
            amount: Decimal::from(100),
        })
    }

    #[test]
    fn push_reaches_every_channel_of_the_user() {
        let registry = SubscriptionRegistry::new();
        let mut first = registry.subscribe("T1");
        let mut second = registry.subscribe("T1");
        let mut other = registry.subscribe("S1");

        let notification = Notification::for_event(BookingEvent::Created, &sample_booking(), "T1");
        assert_eq!(registry.push("T1", &notification), 2);

        assert_eq!(first.receiver.try_recv().unwrap(), notification);
        assert_eq!(second.receiver.try_recv().unwrap(), notification);
        assert!(other.receiver.try_recv().is_err());
    }

    #[test]
    fn closed_channels_are_removed_on_push() {
        let registry = SubscriptionRegistry::new();
        let live = registry.subscribe("T1");
        let dead = registry.subscribe("T1");
        drop(dead.receiver);

        let notification = Notification::for_event(BookingEvent::Created, &sample_booking(), "T1");
        assert_eq!(registry.push("T1", &notification), 1);
        assert_eq!(registry.subscriber_count("T1"), 1);

        drop(live);
        assert_eq!(registry.push("T1", &notification), 0);
        assert_eq!(registry.subscriber_count("T1"), 0);
    }

    #[test]
    fn unsubscribe_removes_only_that_channel() {
        let registry = SubscriptionRegistry::new();
        let first = registry.subscribe("T1");
        let _second = registry.subscribe("T1");

        registry.unsubscribe("T1", first.id);
        assert_eq!(registry.subscriber_count("T1"), 1);
    }
}
