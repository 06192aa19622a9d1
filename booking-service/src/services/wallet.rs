//! Escrow wallet on top of the ledger store.
//!
//! Every operation is one ledger batch, so a failure leaves no partial
//! balance change and no transaction record behind.

use crate::models::{
    AccountBalance, CommissionSplit, Posting, Transaction, TransactionKind, MAX_BALANCE,
};
use crate::services::metrics::{ESCROW_AMOUNT_TOTAL, WALLET_POSTINGS_TOTAL};
use crate::store::{LedgerStore, StoreError};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("amount must be greater than zero and within the balance range, got {0}")]
    InvalidAmount(Decimal),

    #[error("insufficient funds on account {0}")]
    InsufficientFunds(String),

    #[error("balance of account {0} would exceed the maximum")]
    BalanceOutOfRange(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WalletError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientBalance(account_id) => Self::InsufficientFunds(account_id),
            StoreError::BalanceOutOfRange(account_id) => Self::BalanceOutOfRange(account_id),
            other => Self::Store(other),
        }
    }
}

pub struct WalletService {
    ledger: Arc<dyn LedgerStore>,
    commission_rate: Decimal,
    platform_account_id: String,
}

impl WalletService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        commission_rate: Decimal,
        platform_account_id: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            commission_rate,
            platform_account_id: platform_account_id.into(),
        }
    }

    pub fn commission_rate(&self) -> Decimal {
        self.commission_rate
    }

    pub fn platform_account_id(&self) -> &str {
        &self.platform_account_id
    }

    #[instrument(skip(self))]
    pub async fn get_or_create_balance(&self, account_id: &str) -> Result<AccountBalance, WalletError> {
        Ok(self.ledger.get_or_create_balance(account_id).await?)
    }

    /// Credit purchased credits.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn top_up(
        &self,
        account_id: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<Transaction, WalletError> {
        ensure_valid_amount(amount)?;
        let posting = Posting::credit(
            account_id,
            TransactionKind::Purchase,
            amount,
            "Wallet top-up",
            reference,
        );
        self.single(posting).await
    }

    /// Direct debit outside the escrow flow.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn deduct(
        &self,
        account_id: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<Transaction, WalletError> {
        ensure_valid_amount(amount)?;
        let posting = Posting::debit(
            account_id,
            TransactionKind::BookingDeduct,
            amount,
            "Credits deducted",
            reference,
        );
        self.single(posting).await
    }

    /// Move funds from the requester's spendable balance into escrow.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn hold(
        &self,
        account_id: &str,
        amount: Decimal,
        booking_ref: &str,
    ) -> Result<Transaction, WalletError> {
        ensure_valid_amount(amount)?;
        let posting = Posting::debit(
            account_id,
            TransactionKind::BookingHold,
            amount,
            format!("Escrow hold for booking {}", booking_ref),
            booking_ref,
        );
        let transaction = self.single(posting).await?;
        record_escrow("hold", amount);
        Ok(transaction)
    }

    /// Pay a held amount out to the provider and the platform account.
    ///
    /// The requester gets an audit record only; their funds left at hold time.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn release_with_split(
        &self,
        requester_id: &str,
        provider_id: &str,
        amount: Decimal,
        booking_ref: &str,
    ) -> Result<Vec<Transaction>, WalletError> {
        ensure_valid_amount(amount)?;
        let split = CommissionSplit::compute(amount, self.commission_rate);

        let mut postings = Vec::with_capacity(3);
        if split.provider_share > Decimal::ZERO {
            postings.push(Posting::credit(
                provider_id,
                TransactionKind::BookingPaymentProvider,
                split.provider_share,
                format!("Payment for booking {}", booking_ref),
                booking_ref,
            ));
        }
        if split.commission > Decimal::ZERO {
            postings.push(Posting::credit(
                &self.platform_account_id,
                TransactionKind::BookingCommission,
                split.commission,
                format!("Commission for booking {}", booking_ref),
                booking_ref,
            ));
        }
        postings.push(Posting::debit(
            requester_id,
            TransactionKind::BookingConfirmed,
            amount,
            format!("Booking {} confirmed", booking_ref),
            booking_ref,
        ));

        let transactions = self.batch(&postings).await?;

        record_escrow("release", amount);
        info!(
            booking_ref = %booking_ref,
            provider_share = %split.provider_share,
            commission = %split.commission,
            "Escrow released"
        );

        Ok(transactions)
    }

    /// Return escrowed funds to the requester.
    #[instrument(skip(self), fields(amount = %amount))]
    pub async fn refund(
        &self,
        account_id: &str,
        amount: Decimal,
        booking_ref: &str,
    ) -> Result<Transaction, WalletError> {
        ensure_valid_amount(amount)?;
        let posting = Posting::credit(
            account_id,
            TransactionKind::BookingRefund,
            amount,
            format!("Refund for booking {}", booking_ref),
            booking_ref,
        );
        let transaction = self.single(posting).await?;
        record_escrow("refund", amount);
        Ok(transaction)
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn transaction_history(&self, account_id: &str) -> Result<Vec<Transaction>, WalletError> {
        Ok(self.ledger.transactions_for_account(account_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn transactions_for_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<Transaction>, WalletError> {
        Ok(self.ledger.transactions_for_reference(reference).await?)
    }

    async fn single(&self, posting: Posting) -> Result<Transaction, WalletError> {
        let mut written = self.batch(std::slice::from_ref(&posting)).await?;
        written
            .pop()
            .ok_or_else(|| WalletError::Store(StoreError::NotFound(posting.account_id)))
    }

    async fn batch(&self, postings: &[Posting]) -> Result<Vec<Transaction>, WalletError> {
        let transactions = self.ledger.post(postings).await?;

        for transaction in &transactions {
            WALLET_POSTINGS_TOTAL
                .with_label_values(&[transaction.kind.as_str()])
                .inc();
            info!(
                account_id = %transaction.account_id,
                kind = %transaction.kind,
                amount = %transaction.amount,
                balance_after = %transaction.balance_after,
                reference = %transaction.reference,
                "Ledger posting written"
            );
        }

        Ok(transactions)
    }
}

fn ensure_valid_amount(amount: Decimal) -> Result<(), WalletError> {
    if amount <= Decimal::ZERO || amount > MAX_BALANCE {
        return Err(WalletError::InvalidAmount(amount));
    }
    Ok(())
}

fn record_escrow(kind: &str, amount: Decimal) {
    ESCROW_AMOUNT_TOTAL
        .with_label_values(&[kind])
        .inc_by(amount.to_f64().unwrap_or_default());
}
