use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{AggregateLocks, OrderService, PaymentSync};
use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        NewPaymentTransaction, PaymentBalances, PaymentStatus, PaymentTransaction,
        TransactionStatus, TransactionType,
    },
    repositories::PaymentTransactionRepository,
};

/// Result of ingesting a provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransaction {
    pub transaction: PaymentTransaction,
    /// `false` when the event matched an existing record.
    pub created: bool,
    /// `false` when the order's payment state machine refused the status this
    /// transaction drives. The ledger entry is kept either way.
    pub payment_status_applied: bool,
}

/// Payment-transaction ledger and its coupling to order payment status.
///
/// Webhook handlers feed provider events through [`record_transaction`],
/// which tolerates redelivery: the same event recorded twice yields one
/// ledger entry and one set of balances.
///
/// [`record_transaction`]: PaymentService::record_transaction
#[derive(Clone)]
pub struct PaymentService {
    transactions: Arc<dyn PaymentTransactionRepository>,
    orders: OrderService,
    event_sender: Arc<EventSender>,
    // Keyed by order id: all ledger writes for one order are serialized.
    locks: AggregateLocks,
}

impl PaymentService {
    pub fn new(
        transactions: Arc<dyn PaymentTransactionRepository>,
        orders: OrderService,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            transactions,
            orders,
            event_sender,
            locks: AggregateLocks::new(),
        }
    }

    #[instrument(
        skip(self, input),
        fields(
            order_id = %input.order_id,
            transaction_type = %input.transaction_type,
            status = %input.status,
            amount = input.amount
        )
    )]
    pub async fn record_transaction(
        &self,
        input: NewPaymentTransaction,
    ) -> Result<RecordedTransaction, ServiceError> {
        let _guard = self.locks.acquire(input.order_id).await;
        self.orders.get_order(input.order_id).await?;

        if let Some(existing) = self.find_duplicate(&input).await? {
            return self.reconcile_duplicate(existing, &input).await;
        }

        let mut transaction = PaymentTransaction::new(input)?;
        if transaction.is_successful() {
            self.check_balances(&transaction).await?;
        }
        let sequence = self
            .transactions
            .next_transaction_sequence(transaction.transaction_type, transaction.year())
            .await?;
        transaction.set_transaction_id(sequence);
        self.transactions.insert(&transaction).await?;

        info!(
            transaction_id = ?transaction.transaction_id,
            provider = %transaction.provider,
            "Payment transaction recorded"
        );
        self.event_sender
            .send_or_log(Event::PaymentTransactionRecorded {
                transaction_id: transaction.metadata.id,
                order_id: transaction.order_id,
                transaction_type: transaction.transaction_type,
                status: transaction.status,
                amount: transaction.amount,
            })
            .await;

        let payment_status_applied = self.sync_order(&transaction).await?;
        Ok(RecordedTransaction {
            transaction,
            created: true,
            payment_status_applied,
        })
    }

    #[instrument(skip(self))]
    pub async fn update_transaction_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
    ) -> Result<RecordedTransaction, ServiceError> {
        let order_id = self.get_transaction(transaction_id).await?.order_id;
        let _guard = self.locks.acquire(order_id).await;
        // Reload under the lock.
        let mut transaction = self.get_transaction(transaction_id).await?;
        let payment_status_applied = self.apply_status(&mut transaction, status).await?;
        Ok(RecordedTransaction {
            transaction,
            created: false,
            payment_status_applied,
        })
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<PaymentTransaction, ServiceError> {
        self.transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment transaction {} not found", transaction_id))
            })
    }

    pub async fn transactions_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>, ServiceError> {
        self.transactions.list_by_order(order_id).await
    }

    pub async fn balances(&self, order_id: Uuid) -> Result<PaymentBalances, ServiceError> {
        let transactions = self.transactions.list_by_order(order_id).await?;
        Ok(PaymentBalances::from_transactions(&transactions))
    }

    async fn find_duplicate(
        &self,
        input: &NewPaymentTransaction,
    ) -> Result<Option<PaymentTransaction>, ServiceError> {
        if let Some(key) = input.idempotency_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return self.transactions.find_by_idempotency_key(key).await;
        }
        if let Some(external_id) = input.external_id.as_deref().filter(|e| !e.trim().is_empty()) {
            return self
                .transactions
                .find_by_external_id(input.order_id, input.transaction_type, external_id)
                .await;
        }
        Ok(None)
    }

    async fn reconcile_duplicate(
        &self,
        mut existing: PaymentTransaction,
        input: &NewPaymentTransaction,
    ) -> Result<RecordedTransaction, ServiceError> {
        if existing.order_id != input.order_id
            || existing.transaction_type != input.transaction_type
            || existing.amount != input.amount
        {
            warn!(
                transaction_id = %existing.metadata.id,
                recorded_amount = existing.amount,
                incoming_amount = input.amount,
                "Conflicting payment event for an existing transaction"
            );
            return Err(ServiceError::Conflict(format!(
                "payment event conflicts with transaction {}: recorded {} {} for {}, received {} {} for {}",
                existing.metadata.id,
                existing.transaction_type,
                existing.amount,
                existing.order_id,
                input.transaction_type,
                input.amount,
                input.order_id
            )));
        }

        let payment_status_applied = if existing.status == input.status {
            info!(transaction_id = %existing.metadata.id, "Duplicate payment event ignored");
            true
        } else if input.status == TransactionStatus::Pending {
            // A late copy of the event that preceded the settlement.
            info!(
                transaction_id = %existing.metadata.id,
                status = %existing.status,
                "Stale pending payment event ignored"
            );
            true
        } else {
            self.apply_status(&mut existing, input.status).await?
        };
        Ok(RecordedTransaction {
            transaction: existing,
            created: false,
            payment_status_applied,
        })
    }

    /// Returns whether the order's payment status accepted the change.
    async fn apply_status(
        &self,
        transaction: &mut PaymentTransaction,
        status: TransactionStatus,
    ) -> Result<bool, ServiceError> {
        let old_status = transaction.status;
        if status == TransactionStatus::Successful && !transaction.is_successful() {
            self.check_balances(transaction).await?;
        }
        if !transaction.update_status(status)? {
            return Ok(true);
        }
        self.transactions.update(transaction).await?;

        info!(
            transaction_id = %transaction.metadata.id,
            from = %old_status,
            to = %status,
            "Payment transaction status updated"
        );
        self.event_sender
            .send_or_log(Event::PaymentTransactionUpdated {
                transaction_id: transaction.metadata.id,
                order_id: transaction.order_id,
                old_status,
                new_status: status,
            })
            .await;

        self.sync_order(transaction).await
    }

    /// Rejects a transaction whose success would capture more than was
    /// authorized or refund more than is refundable.
    async fn check_balances(&self, transaction: &PaymentTransaction) -> Result<(), ServiceError> {
        let balances = self.balances(transaction.order_id).await?;
        match transaction.transaction_type {
            TransactionType::Capture
                if balances.authorized > 0
                    && balances.captured + transaction.amount > balances.authorized =>
            {
                Err(ServiceError::InvalidOperation(format!(
                    "capture of {} exceeds remaining authorization {}",
                    transaction.amount,
                    balances.authorized - balances.captured
                )))
            }
            TransactionType::Refund if transaction.amount > balances.refundable() => {
                Err(ServiceError::InvalidOperation(format!(
                    "refund of {} exceeds refundable amount {}",
                    transaction.amount,
                    balances.refundable()
                )))
            }
            _ => Ok(()),
        }
    }

    async fn sync_order(&self, transaction: &PaymentTransaction) -> Result<bool, ServiceError> {
        let target = match (transaction.status, transaction.transaction_type) {
            (TransactionStatus::Successful, kind) => kind.payment_status_on_success(),
            (TransactionStatus::Failed, TransactionType::Authorize) => PaymentStatus::Failed,
            _ => return Ok(true),
        };
        let sync = self
            .orders
            .sync_payment_status(transaction.order_id, target)
            .await?;
        if let PaymentSync::Rejected { current } = sync {
            warn!(
                transaction_id = %transaction.metadata.id,
                order_id = %transaction.order_id,
                current = %current,
                target = %target,
                "Order payment status left unchanged by payment transaction"
            );
        }
        Ok(sync.is_consistent())
    }
}
