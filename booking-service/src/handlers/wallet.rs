use crate::models::{AccountBalance, Transaction};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct TopUpRequest {
    #[validate(length(min = 1, message = "account_id cannot be empty"))]
    pub account_id: String,
    pub amount: Decimal,
    /// External payment reference; a fresh id is used when absent.
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DeductRequest {
    #[validate(length(min = 1, message = "account_id cannot be empty"))]
    pub account_id: String,
    pub amount: Decimal,
    #[validate(length(min = 1, message = "reference cannot be empty"))]
    pub reference: String,
}

#[tracing::instrument(skip(state))]
pub async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountBalance>, AppError> {
    Ok(Json(state.wallet.get_or_create_balance(&account_id).await?))
}

#[tracing::instrument(skip(state, request), fields(account_id = %request.account_id))]
pub async fn top_up(
    State(state): State<AppState>,
    Json(request): Json<TopUpRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    request.validate()?;

    let reference = request
        .reference
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let transaction = state
        .wallet
        .top_up(&request.account_id, request.amount, &reference)
        .await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

#[tracing::instrument(skip(state, request), fields(account_id = %request.account_id))]
pub async fn deduct(
    State(state): State<AppState>,
    Json(request): Json<DeductRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    request.validate()?;

    let transaction = state
        .wallet
        .deduct(&request.account_id, request.amount, &request.reference)
        .await?;

    Ok((StatusCode::CREATED, Json(transaction)))
}

#[tracing::instrument(skip(state))]
pub async fn transactions(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    Ok(Json(state.wallet.transaction_history(&account_id).await?))
}
