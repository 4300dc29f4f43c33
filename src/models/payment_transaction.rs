use chrono::Datelike;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use super::metadata::EntityMetadata;
use super::order::PaymentStatus;
use crate::errors::ServiceError;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Authorize,
    Capture,
    Refund,
    Cancel,
}

impl TransactionType {
    pub fn id_prefix(&self) -> &'static str {
        match self {
            TransactionType::Authorize => "AUTH",
            TransactionType::Capture => "CAPT",
            TransactionType::Refund => "REFUND",
            TransactionType::Cancel => "CANCEL",
        }
    }

    /// Order payment status reached when a transaction of this type succeeds.
    pub fn payment_status_on_success(&self) -> PaymentStatus {
        match self {
            TransactionType::Authorize => PaymentStatus::Authorized,
            TransactionType::Capture => PaymentStatus::Captured,
            TransactionType::Refund => PaymentStatus::Refunded,
            TransactionType::Cancel => PaymentStatus::Cancelled,
        }
    }

    fn requires_positive_amount(&self) -> bool {
        !matches!(self, TransactionType::Cancel)
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Successful,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentTransaction {
    pub order_id: Uuid,
    pub external_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    pub provider: String,
}

/// Ledger entry for a single provider payment event.
///
/// `amount` is what the provider reported and never changes. The running
/// balances only carry a value while the transaction is successful, so summing
/// them over an order's transactions yields what actually settled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub metadata: EntityMetadata,
    pub transaction_id: Option<String>,
    pub order_id: Uuid,
    pub external_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub currency: String,
    pub provider: String,
    pub authorized_amount: i64,
    pub captured_amount: i64,
    pub refunded_amount: i64,
}

impl PaymentTransaction {
    pub fn new(input: NewPaymentTransaction) -> Result<Self, ServiceError> {
        if input.order_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "order id is required".to_string(),
            ));
        }
        if input.currency.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "currency is required".to_string(),
            ));
        }
        if input.provider.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "provider is required".to_string(),
            ));
        }
        if input.amount < 0
            || (input.amount == 0 && input.transaction_type.requires_positive_amount())
        {
            return Err(ServiceError::ValidationError(format!(
                "invalid amount {} for {} transaction",
                input.amount, input.transaction_type
            )));
        }

        let mut transaction = Self {
            metadata: EntityMetadata::new(),
            transaction_id: None,
            order_id: input.order_id,
            external_id: non_empty(input.external_id),
            idempotency_key: non_empty(input.idempotency_key),
            transaction_type: input.transaction_type,
            status: input.status,
            amount: input.amount,
            currency: input.currency,
            provider: input.provider,
            authorized_amount: 0,
            captured_amount: 0,
            refunded_amount: 0,
        };
        if transaction.is_successful() {
            transaction.set_running_balance(transaction.amount);
        }
        Ok(transaction)
    }

    pub fn is_successful(&self) -> bool {
        self.status == TransactionStatus::Successful
    }

    /// Moves the transaction to `next`, keeping the running balance in step.
    /// Returns whether anything changed.
    pub fn update_status(&mut self, next: TransactionStatus) -> Result<bool, ServiceError> {
        if next == self.status {
            return Ok(false);
        }
        if next == TransactionStatus::Pending {
            return Err(ServiceError::transition(
                "payment transaction status",
                self.status,
                next,
            ));
        }

        let was_successful = self.is_successful();
        self.status = next;
        match next {
            TransactionStatus::Successful if !was_successful => self.set_running_balance(self.amount),
            TransactionStatus::Failed if was_successful => self.set_running_balance(0),
            _ => {}
        }
        self.metadata.touch();
        Ok(true)
    }

    /// Display id from the per-type yearly sequence, e.g. `TXN-CAPT-2024-007`.
    pub fn set_transaction_id(&mut self, sequence: u64) {
        self.transaction_id = Some(format!(
            "TXN-{}-{}-{:03}",
            self.transaction_type.id_prefix(),
            self.metadata.created_at.year(),
            sequence
        ));
    }

    pub fn year(&self) -> i32 {
        self.metadata.created_at.year()
    }

    fn set_running_balance(&mut self, value: i64) {
        match self.transaction_type {
            TransactionType::Authorize => self.authorized_amount = value,
            TransactionType::Capture => self.captured_amount = value,
            TransactionType::Refund => self.refunded_amount = value,
            TransactionType::Cancel => {}
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Settled totals for one order, summed over its transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBalances {
    pub authorized: i64,
    pub captured: i64,
    pub refunded: i64,
}

impl PaymentBalances {
    pub fn from_transactions<'a>(transactions: impl IntoIterator<Item = &'a PaymentTransaction>) -> Self {
        transactions
            .into_iter()
            .fold(Self::default(), |mut acc, txn| {
                acc.authorized += txn.authorized_amount;
                acc.captured += txn.captured_amount;
                acc.refunded += txn.refunded_amount;
                acc
            })
    }

    pub fn net_captured(&self) -> i64 {
        self.captured - self.refunded
    }

    /// What a refund may still return: the captured funds, or the open
    /// authorization when nothing has been captured yet.
    pub fn refundable(&self) -> i64 {
        let base = if self.captured > 0 {
            self.captured
        } else {
            self.authorized
        };
        (base - self.refunded).max(0)
    }
}
