// Pricing and reference data
pub mod currency;
pub mod shipping;

// Aggregate lifecycles
pub mod checkout;
pub mod orders;

// Payments
pub mod payment_providers;
pub mod payments;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

pub use checkout::{CheckoutService, SweepReport};
pub use currency::CurrencyService;
pub use orders::{OrderService, PaymentSync};
pub use payment_providers::{
    PaymentOrchestrator, PaymentProvider, PaymentRequest, PaymentResult, ProviderType,
    WebhookRegistration,
};
pub use payments::{PaymentService, RecordedTransaction};
pub use shipping::ShippingService;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// One async mutex per aggregate id, so that load-mutate-save sequences on the
/// same checkout or order never interleave.
///
/// Slots exist only while some task holds or waits for them.
#[derive(Clone, Default)]
pub struct AggregateLocks(Arc<LockMap>);

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: Uuid) -> AggregateGuard {
        let lock = self.0.entry(id).or_default().clone();
        AggregateGuard {
            guard: Some(lock.lock_owned().await),
            id,
            slots: self.0.clone(),
        }
    }
}

/// Held lock on one aggregate; releasing it evicts the slot when unshared.
pub struct AggregateGuard {
    guard: Option<OwnedMutexGuard<()>>,
    id: Uuid,
    slots: Arc<LockMap>,
}

impl Drop for AggregateGuard {
    fn drop(&mut self) {
        // The owned guard keeps its own handle on the mutex; release it first.
        drop(self.guard.take());
        // Waiters clone the slot under the shard lock, so a count of one means
        // only the map still refers to it.
        self.slots
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
