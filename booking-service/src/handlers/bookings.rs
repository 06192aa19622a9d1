use crate::middleware::ActorId;
use crate::models::{hh_mm, Booking, BookingSummary, DateFilter, NewBooking, TimeSlot};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    #[validate(length(min = 1, message = "requester_id cannot be empty"))]
    pub requester_id: String,
    #[validate(length(min = 1, message = "provider_id cannot be empty"))]
    pub provider_id: String,
    #[validate(length(min = 1, max = 255, message = "lesson_type must be 1-255 characters"))]
    pub lesson_type: String,
    pub date: NaiveDate,
    #[serde(with = "hh_mm")]
    pub start: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end: NaiveTime,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: NaiveDate,
    #[serde(with = "hh_mm")]
    pub start: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end: NaiveTime,
}

#[derive(Debug, Deserialize)]
pub struct ProviderBookingsQuery {
    pub date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ProviderBookingsQuery {
    fn filter(&self) -> Result<DateFilter, AppError> {
        match (self.date, self.start_date, self.end_date) {
            (Some(day), None, None) => Ok(DateFilter::On(day)),
            (None, Some(from), Some(to)) if from <= to => Ok(DateFilter::Between(from, to)),
            (None, Some(_), Some(_)) => Err(AppError::BadRequest(anyhow::anyhow!(
                "start_date must not be after end_date"
            ))),
            _ => Err(AppError::BadRequest(anyhow::anyhow!(
                "Provide either date or both start_date and end_date"
            ))),
        }
    }
}

#[tracing::instrument(skip(state, request))]
pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    request.validate()?;

    let booking = state
        .engine
        .create(NewBooking {
            requester_id: request.requester_id,
            provider_id: request.provider_id,
            lesson_type: request.lesson_type,
            slot: TimeSlot::new(request.date, request.start, request.end),
            amount: request.amount,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

#[tracing::instrument(skip(state))]
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.get_by_id(booking_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn accept_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.accept(booking_id).await?))
}

#[tracing::instrument(skip(state, actor), fields(actor_id = %actor.0))]
pub async fn cancel_booking(
    State(state): State<AppState>,
    actor: ActorId,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.cancel(booking_id, &actor.0).await?))
}

#[tracing::instrument(skip(state, request))]
pub async fn request_reschedule(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<RescheduleRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let slot = TimeSlot::new(request.date, request.start, request.end);
    let child = state.engine.request_reschedule(booking_id, slot).await?;
    Ok((StatusCode::CREATED, Json(child)))
}

#[tracing::instrument(skip(state))]
pub async fn approve_reschedule(
    State(state): State<AppState>,
    Path(child_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.approve_reschedule(child_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn reject_reschedule(
    State(state): State<AppState>,
    Path(child_id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.reject_reschedule(child_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn list_provider_bookings(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(query): Query<ProviderBookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let filter = query.filter()?;
    Ok(Json(state.engine.list_by_provider(&provider_id, filter).await?))
}

#[tracing::instrument(skip(state))]
pub async fn provider_upcoming(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<BookingSummary>, AppError> {
    let today = Utc::now().date_naive();
    Ok(Json(state.engine.upcoming_for_provider(&provider_id, today).await?))
}

#[tracing::instrument(skip(state))]
pub async fn provider_recent(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<BookingSummary>, AppError> {
    let today = Utc::now().date_naive();
    Ok(Json(state.engine.recent_past_for_provider(&provider_id, today).await?))
}

#[tracing::instrument(skip(state))]
pub async fn list_requester_bookings(
    State(state): State<AppState>,
    Path(requester_id): Path<String>,
) -> Result<Json<Vec<Booking>>, AppError> {
    Ok(Json(state.engine.list_by_requester(&requester_id).await?))
}
