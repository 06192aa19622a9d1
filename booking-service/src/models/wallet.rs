//! Wallet balance and transaction models.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Transaction kinds recorded on the wallet audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Purchase,
    BookingDeduct,
    BookingHold,
    BookingPaymentProvider,
    BookingCommission,
    BookingConfirmed,
    BookingRefund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "PURCHASE",
            Self::BookingDeduct => "BOOKING_DEDUCT",
            Self::BookingHold => "BOOKING_HOLD",
            Self::BookingPaymentProvider => "BOOKING_PAYMENT_PROVIDER",
            Self::BookingCommission => "BOOKING_COMMISSION",
            Self::BookingConfirmed => "BOOKING_CONFIRMED",
            Self::BookingRefund => "BOOKING_REFUND",
        }
    }

    /// `BOOKING_CONFIRMED` is an audit marker written on release; it never
    /// moves money.
    pub fn affects_balance(&self) -> bool {
        !matches!(self, Self::BookingConfirmed)
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Largest balance an account may hold: 999999999999999.9999, the range of
/// the `NUMERIC(19,4)` balance column.
pub const MAX_BALANCE: Decimal = Decimal::from_parts(0x89E7_FFFF, 0x8AC7_2304, 0, false, 4);

/// Current balance of one wallet account.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    pub balance: Decimal,
    pub updated_utc: DateTime<Utc>,
}

/// Immutable audit record. `amount` is signed: positive credits, negative debits.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub reference: String,
    pub created_utc: DateTime<Utc>,
}

/// One line of a ledger batch handed to the store.
///
/// A batch is applied all-or-nothing: if any debit would take its account
/// below zero nothing is written.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub reference: String,
}

impl Posting {
    pub fn credit(
        account_id: &str,
        kind: TransactionKind,
        amount: Decimal,
        description: impl Into<String>,
        reference: &str,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            kind,
            amount: amount.abs(),
            description: description.into(),
            reference: reference.to_string(),
        }
    }

    pub fn debit(
        account_id: &str,
        kind: TransactionKind,
        amount: Decimal,
        description: impl Into<String>,
        reference: &str,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            kind,
            amount: -amount.abs(),
            description: description.into(),
            reference: reference.to_string(),
        }
    }

    /// Change applied to the account balance.
    pub fn balance_delta(&self) -> Decimal {
        if self.kind.affects_balance() {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// Division of a released escrow amount between provider and platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionSplit {
    pub provider_share: Decimal,
    pub commission: Decimal,
}

impl CommissionSplit {
    /// Commission is rounded to cents; the provider gets the exact remainder.
    pub fn compute(amount: Decimal, rate: Decimal) -> Self {
        let commission =
            (amount * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        Self {
            provider_share: amount - commission,
            commission,
        }
    }
}
