use crate::models::Notification;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub user_id: String,
    pub unread_count: i64,
}

#[tracing::instrument(skip(state))]
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(state.notifications.list_for_user(&query.user_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn unread_count(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UnreadCountResponse>, AppError> {
    let unread_count = state.notifications.unread_count(&query.user_id).await?;
    Ok(Json(UnreadCountResponse {
        user_id: query.user_id,
        unread_count,
    }))
}

#[tracing::instrument(skip(state))]
pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.notifications.mark_as_read(notification_id).await?))
}

/// Server-sent event stream of live notifications for one user.
///
/// The channel is unregistered as soon as the client disconnects.
#[tracing::instrument(skip(state))]
pub async fn stream(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let feed = state.notifications.live_feed(&user_id);
    tracing::info!(subscription_id = feed.subscription_id(), "Notification stream opened");

    let events = feed.map(|notification| {
        Event::default()
            .event(notification.notification_type.as_str())
            .id(notification.notification_id.to_string())
            .json_data(&notification)
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
