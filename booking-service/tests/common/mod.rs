//! Common test utilities for booking-service integration tests.

#![allow(dead_code)]

use booking_service::config::{BookingServiceConfig, WalletConfig};
use booking_service::models::{Booking, NewBooking, TimeSlot};
use booking_service::startup::AppState;
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::str::FromStr;
use std::sync::Once;

pub const PLATFORM: &str = "COMPANY_WALLET";

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,booking_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_config() -> BookingServiceConfig {
    BookingServiceConfig {
        common: CommonConfig { port: 0 },
        service_name: "booking-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: None,
        wallet: WalletConfig::default(),
    }
}

/// Fresh services over in-memory stores.
pub fn spawn_state() -> AppState {
    init_tracing();
    AppState::in_memory(test_config())
}

pub fn dec(raw: &str) -> Decimal {
    Decimal::from_str(raw).expect("valid decimal")
}

pub fn day(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date")
}

pub fn time(raw: &str) -> NaiveTime {
    NaiveTime::parse_from_str(raw, "%H:%M").expect("valid time")
}

pub fn slot(date: &str, start: &str, end: &str) -> TimeSlot {
    TimeSlot::new(day(date), time(start), time(end))
}

pub fn request(
    requester: &str,
    provider: &str,
    date: &str,
    start: &str,
    end: &str,
    amount: &str,
) -> NewBooking {
    NewBooking {
        requester_id: requester.to_string(),
        provider_id: provider.to_string(),
        lesson_type: "Mathematics".to_string(),
        slot: slot(date, start, end),
        amount: dec(amount),
    }
}

/// Top up `account` with `amount` credits.
pub async fn fund(state: &AppState, account: &str, amount: &str) {
    state
        .wallet
        .top_up(account, dec(amount), "test-funding")
        .await
        .expect("Failed to fund account");
}

pub async fn balance(state: &AppState, account: &str) -> Decimal {
    state
        .wallet
        .get_or_create_balance(account)
        .await
        .expect("Failed to read balance")
        .balance
}

/// Sum of balance-affecting transactions recorded against a booking.
pub async fn escrow_net(state: &AppState, booking: &Booking) -> Decimal {
    state
        .wallet
        .transactions_for_reference(&booking.booking_id.to_string())
        .await
        .expect("Failed to read transactions")
        .iter()
        .filter(|t| t.kind.affects_balance())
        .map(|t| t.amount)
        .sum()
}
