//! Persistence ports.
//!
//! Services depend on these traits only. Implementations must provide
//! idempotency-key uniqueness for payment transactions and serialized
//! sequence allocation; [`memory::InMemoryStore`] is the bundled one.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{
    Checkout, Currency, Discount, Order, PaymentTransaction, ShippingMethod, ShippingRate,
    ShippingZone, TransactionType,
};

pub mod memory;

pub use memory::InMemoryStore;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), ServiceError>;
    async fn update(&self, order: &Order) -> Result<(), ServiceError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, ServiceError>;
    /// Next value of the order-number sequence, starting at 1.
    async fn next_order_sequence(&self) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    /// Upsert. Fails with `Conflict` if another active checkout owns the session.
    async fn save(&self, checkout: &Checkout) -> Result<(), ServiceError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Checkout>, ServiceError>;
    async fn find_active_by_session(&self, session_id: &str) -> Result<Option<Checkout>, ServiceError>;
    async fn list(&self) -> Result<Vec<Checkout>, ServiceError>;
    async fn delete(&self, id: Uuid) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait DiscountRepository: Send + Sync {
    /// Upsert. Fails with `Conflict` if the code belongs to another discount.
    async fn save(&self, discount: &Discount) -> Result<(), ServiceError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Discount>, ServiceError>;
    async fn find_by_code(&self, code: &str) -> Result<Option<Discount>, ServiceError>;
    /// Atomically bumps `current_usage` and returns the updated discount.
    /// Fails with `Conflict` once the usage limit is reached.
    async fn increment_usage(&self, id: Uuid) -> Result<Discount, ServiceError>;
    /// Undoes one `increment_usage`.
    async fn release_usage(&self, id: Uuid) -> Result<Discount, ServiceError>;
}

#[async_trait]
pub trait PaymentTransactionRepository: Send + Sync {
    /// Fails with `Conflict` when the idempotency key is already taken.
    async fn insert(&self, transaction: &PaymentTransaction) -> Result<(), ServiceError>;
    async fn update(&self, transaction: &PaymentTransaction) -> Result<(), ServiceError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentTransaction>, ServiceError>;
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<PaymentTransaction>, ServiceError>;
    async fn find_by_external_id(
        &self,
        order_id: Uuid,
        transaction_type: TransactionType,
        external_id: &str,
    ) -> Result<Option<PaymentTransaction>, ServiceError>;
    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>, ServiceError>;
    /// Next value of the per-(type, year) display-id sequence, starting at 1.
    async fn next_transaction_sequence(
        &self,
        transaction_type: TransactionType,
        year: i32,
    ) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait CurrencyRepository: Send + Sync {
    async fn save(&self, currency: &Currency) -> Result<(), ServiceError>;
    async fn find_by_code(&self, code: &str) -> Result<Option<Currency>, ServiceError>;
    async fn list(&self) -> Result<Vec<Currency>, ServiceError>;
}

#[async_trait]
pub trait ShippingRepository: Send + Sync {
    async fn save_method(&self, method: &ShippingMethod) -> Result<(), ServiceError>;
    async fn save_zone(&self, zone: &ShippingZone) -> Result<(), ServiceError>;
    async fn save_rate(&self, rate: &ShippingRate) -> Result<(), ServiceError>;
    async fn find_method(&self, id: Uuid) -> Result<Option<ShippingMethod>, ServiceError>;
    async fn find_zone(&self, id: Uuid) -> Result<Option<ShippingZone>, ServiceError>;
    async fn find_rate(&self, id: Uuid) -> Result<Option<ShippingRate>, ServiceError>;
    async fn list_rates(&self) -> Result<Vec<ShippingRate>, ServiceError>;
}
