use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    CheckoutRepository, CurrencyRepository, DiscountRepository, OrderRepository,
    PaymentTransactionRepository, ShippingRepository,
};
use crate::errors::ServiceError;
use crate::models::{
    Checkout, Currency, Discount, Order, PaymentTransaction, ShippingMethod, ShippingRate,
    ShippingZone, TransactionType,
};

#[derive(Default)]
struct Tables {
    orders: DashMap<Uuid, Order>,
    order_sequence: AtomicU64,
    checkouts: DashMap<Uuid, Checkout>,
    active_sessions: DashMap<String, Uuid>,
    discounts: DashMap<Uuid, Discount>,
    discount_codes: DashMap<String, Uuid>,
    transactions: DashMap<Uuid, PaymentTransaction>,
    idempotency_keys: DashMap<String, Uuid>,
    transaction_sequences: DashMap<(TransactionType, i32), u64>,
    currencies: DashMap<String, Currency>,
    shipping_methods: DashMap<Uuid, ShippingMethod>,
    shipping_zones: DashMap<Uuid, ShippingZone>,
    shipping_rates: DashMap<Uuid, ShippingRate>,
}

/// `DashMap`-backed store implementing every persistence port.
///
/// Cloning is cheap and clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryStore(Arc<Tables>);

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_creation<T>(mut rows: Vec<T>, created: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) -> Vec<T> {
    rows.sort_by_key(|row| created(row));
    rows
}

fn missing(kind: &str, id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("{} {} not found", kind, id))
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert(&self, order: &Order) -> Result<(), ServiceError> {
        match self.0.orders.entry(order.metadata.id) {
            Entry::Occupied(_) => Err(ServiceError::Conflict(format!(
                "order {} already exists",
                order.metadata.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, order: &Order) -> Result<(), ServiceError> {
        let mut row = self
            .0
            .orders
            .get_mut(&order.metadata.id)
            .ok_or_else(|| missing("order", order.metadata.id))?;
        *row = order.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.0.orders.get(&id).map(|row| row.clone()))
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let rows = self
            .0
            .orders
            .iter()
            .filter(|row| row.user_id == Some(user_id))
            .map(|row| row.clone())
            .collect();
        Ok(sorted_by_creation(rows, |o: &Order| o.metadata.created_at))
    }

    async fn next_order_sequence(&self) -> Result<u64, ServiceError> {
        Ok(self.0.order_sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl CheckoutRepository for InMemoryStore {
    async fn save(&self, checkout: &Checkout) -> Result<(), ServiceError> {
        let id = checkout.metadata.id;
        if checkout.is_active() {
            match self.0.active_sessions.entry(checkout.session_id.clone()) {
                Entry::Occupied(owner) if *owner.get() != id => {
                    return Err(ServiceError::Conflict(format!(
                        "session {} already has an active checkout",
                        checkout.session_id
                    )));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        } else {
            self.0
                .active_sessions
                .remove_if(&checkout.session_id, |_, owner| *owner == id);
        }
        self.0.checkouts.insert(id, checkout.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Checkout>, ServiceError> {
        Ok(self.0.checkouts.get(&id).map(|row| row.clone()))
    }

    async fn find_active_by_session(&self, session_id: &str) -> Result<Option<Checkout>, ServiceError> {
        let Some(id) = self.0.active_sessions.get(session_id).map(|owner| *owner) else {
            return Ok(None);
        };
        Ok(self.0.checkouts.get(&id).map(|row| row.clone()))
    }

    async fn list(&self) -> Result<Vec<Checkout>, ServiceError> {
        let rows = self.0.checkouts.iter().map(|row| row.clone()).collect();
        Ok(sorted_by_creation(rows, |c: &Checkout| c.metadata.created_at))
    }

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let (_, checkout) = self
            .0
            .checkouts
            .remove(&id)
            .ok_or_else(|| missing("checkout", id))?;
        self.0
            .active_sessions
            .remove_if(&checkout.session_id, |_, owner| *owner == id);
        Ok(())
    }
}

#[async_trait]
impl DiscountRepository for InMemoryStore {
    async fn save(&self, discount: &Discount) -> Result<(), ServiceError> {
        let id = discount.metadata.id;
        match self.0.discount_codes.entry(discount.code.to_uppercase()) {
            Entry::Occupied(owner) if *owner.get() != id => {
                return Err(ServiceError::Conflict(format!(
                    "discount code {} is already in use",
                    discount.code
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        self.0.discounts.insert(id, discount.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Discount>, ServiceError> {
        Ok(self.0.discounts.get(&id).map(|row| row.clone()))
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Discount>, ServiceError> {
        let Some(id) = self
            .0
            .discount_codes
            .get(&code.trim().to_uppercase())
            .map(|owner| *owner)
        else {
            return Ok(None);
        };
        Ok(self.0.discounts.get(&id).map(|row| row.clone()))
    }

    async fn increment_usage(&self, id: Uuid) -> Result<Discount, ServiceError> {
        let mut row = self
            .0
            .discounts
            .get_mut(&id)
            .ok_or_else(|| missing("discount", id))?;
        if !row.has_remaining_usage() {
            return Err(ServiceError::Conflict(format!(
                "discount {} has reached its usage limit",
                row.code
            )));
        }
        row.increment_usage();
        Ok(row.clone())
    }

    async fn release_usage(&self, id: Uuid) -> Result<Discount, ServiceError> {
        let mut row = self
            .0
            .discounts
            .get_mut(&id)
            .ok_or_else(|| missing("discount", id))?;
        row.release_usage();
        Ok(row.clone())
    }
}

#[async_trait]
impl PaymentTransactionRepository for InMemoryStore {
    async fn insert(&self, transaction: &PaymentTransaction) -> Result<(), ServiceError> {
        let id = transaction.metadata.id;
        if let Some(key) = &transaction.idempotency_key {
            match self.0.idempotency_keys.entry(key.clone()) {
                Entry::Occupied(_) => {
                    return Err(ServiceError::Conflict(format!(
                        "idempotency key {} is already recorded",
                        key
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }
        self.0.transactions.insert(id, transaction.clone());
        Ok(())
    }

    async fn update(&self, transaction: &PaymentTransaction) -> Result<(), ServiceError> {
        let mut row = self
            .0
            .transactions
            .get_mut(&transaction.metadata.id)
            .ok_or_else(|| missing("payment transaction", transaction.metadata.id))?;
        if row.idempotency_key != transaction.idempotency_key || row.amount != transaction.amount {
            return Err(ServiceError::Conflict(format!(
                "payment transaction {} cannot change its key or amount",
                transaction.metadata.id
            )));
        }
        *row = transaction.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentTransaction>, ServiceError> {
        Ok(self.0.transactions.get(&id).map(|row| row.clone()))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<PaymentTransaction>, ServiceError> {
        let Some(id) = self.0.idempotency_keys.get(key).map(|owner| *owner) else {
            return Ok(None);
        };
        Ok(self.0.transactions.get(&id).map(|row| row.clone()))
    }

    async fn find_by_external_id(
        &self,
        order_id: Uuid,
        transaction_type: TransactionType,
        external_id: &str,
    ) -> Result<Option<PaymentTransaction>, ServiceError> {
        Ok(self
            .0
            .transactions
            .iter()
            .find(|row| {
                row.order_id == order_id
                    && row.transaction_type == transaction_type
                    && row.external_id.as_deref() == Some(external_id)
            })
            .map(|row| row.clone()))
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>, ServiceError> {
        let rows = self
            .0
            .transactions
            .iter()
            .filter(|row| row.order_id == order_id)
            .map(|row| row.clone())
            .collect();
        Ok(sorted_by_creation(rows, |t: &PaymentTransaction| t.metadata.created_at))
    }

    async fn next_transaction_sequence(
        &self,
        transaction_type: TransactionType,
        year: i32,
    ) -> Result<u64, ServiceError> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut counter = self
            .0
            .transaction_sequences
            .entry((transaction_type, year))
            .or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[async_trait]
impl CurrencyRepository for InMemoryStore {
    async fn save(&self, currency: &Currency) -> Result<(), ServiceError> {
        self.0.currencies.insert(currency.code.clone(), currency.clone());
        Ok(())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Currency>, ServiceError> {
        Ok(self.0.currencies.get(code).map(|row| row.clone()))
    }

    async fn list(&self) -> Result<Vec<Currency>, ServiceError> {
        let mut rows: Vec<Currency> = self.0.currencies.iter().map(|row| row.clone()).collect();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(rows)
    }
}

#[async_trait]
impl ShippingRepository for InMemoryStore {
    async fn save_method(&self, method: &ShippingMethod) -> Result<(), ServiceError> {
        self.0.shipping_methods.insert(method.metadata.id, method.clone());
        Ok(())
    }

    async fn save_zone(&self, zone: &ShippingZone) -> Result<(), ServiceError> {
        self.0.shipping_zones.insert(zone.metadata.id, zone.clone());
        Ok(())
    }

    async fn save_rate(&self, rate: &ShippingRate) -> Result<(), ServiceError> {
        self.0.shipping_rates.insert(rate.metadata.id, rate.clone());
        Ok(())
    }

    async fn find_method(&self, id: Uuid) -> Result<Option<ShippingMethod>, ServiceError> {
        Ok(self.0.shipping_methods.get(&id).map(|row| row.clone()))
    }

    async fn find_zone(&self, id: Uuid) -> Result<Option<ShippingZone>, ServiceError> {
        Ok(self.0.shipping_zones.get(&id).map(|row| row.clone()))
    }

    async fn find_rate(&self, id: Uuid) -> Result<Option<ShippingRate>, ServiceError> {
        Ok(self.0.shipping_rates.get(&id).map(|row| row.clone()))
    }

    async fn list_rates(&self) -> Result<Vec<ShippingRate>, ServiceError> {
        let rows = self.0.shipping_rates.iter().map(|row| row.clone()).collect();
        Ok(sorted_by_creation(rows, |r: &ShippingRate| r.metadata.created_at))
    }
}
