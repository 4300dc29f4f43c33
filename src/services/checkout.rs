use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{AggregateLocks, CurrencyService, OrderService, ShippingService};
use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        Address, CategoryResolver, Checkout, CheckoutPolicy, CheckoutStatus, CustomerDetails,
        NewOrderItem, Order,
    },
    repositories::{CheckoutRepository, DiscountRepository},
};

/// Outcome of one [`CheckoutService::sweep`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub abandoned: usize,
    pub expired: usize,
    pub deleted: usize,
}

/// Session checkouts: cart mutation, pricing and conversion into orders.
#[derive(Clone)]
pub struct CheckoutService {
    checkouts: Arc<dyn CheckoutRepository>,
    discounts: Arc<dyn DiscountRepository>,
    orders: OrderService,
    currencies: CurrencyService,
    shipping: ShippingService,
    categories: Arc<dyn CategoryResolver>,
    event_sender: Arc<EventSender>,
    policy: CheckoutPolicy,
    locks: AggregateLocks,
}

impl CheckoutService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checkouts: Arc<dyn CheckoutRepository>,
        discounts: Arc<dyn DiscountRepository>,
        orders: OrderService,
        currencies: CurrencyService,
        shipping: ShippingService,
        categories: Arc<dyn CategoryResolver>,
        event_sender: Arc<EventSender>,
        policy: CheckoutPolicy,
    ) -> Self {
        Self {
            checkouts,
            discounts,
            orders,
            currencies,
            shipping,
            categories,
            event_sender,
            policy,
            locks: AggregateLocks::new(),
        }
    }

    /// Returns the session's active checkout, or opens one. Without an
    /// explicit currency the store default is used.
    #[instrument(skip(self))]
    pub async fn start_checkout(
        &self,
        session_id: &str,
        user_id: Option<Uuid>,
        currency: Option<&str>,
    ) -> Result<Checkout, ServiceError> {
        if let Some(existing) = self.checkouts.find_active_by_session(session_id).await? {
            if !existing.is_expired() {
                return Ok(existing);
            }
            self.expire(existing.metadata.id).await?;
        }

        let currency = match currency {
            Some(code) => self.currencies.get_enabled(code).await?,
            None => self.currencies.default_currency().await?,
        };
        let checkout = Checkout::new_at(session_id, user_id, &currency.code, Utc::now(), &self.policy)?;
        self.checkouts.save(&checkout).await?;

        info!(checkout_id = %checkout.metadata.id, session_id, currency = %checkout.currency, "Checkout started");
        self.event_sender
            .send_or_log(Event::CheckoutCreated {
                checkout_id: checkout.metadata.id,
                session_id: checkout.session_id.clone(),
            })
            .await;
        Ok(checkout)
    }

    pub async fn get_checkout(&self, checkout_id: Uuid) -> Result<Checkout, ServiceError> {
        self.checkouts
            .find_by_id(checkout_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("checkout {} not found", checkout_id)))
    }

    pub async fn get_by_session(&self, session_id: &str) -> Result<Checkout, ServiceError> {
        self.checkouts
            .find_active_by_session(session_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no active checkout for session {}", session_id))
            })
    }

    #[instrument(skip(self, item), fields(product_id = %item.product_id))]
    pub async fn add_item(&self, checkout_id: Uuid, item: NewOrderItem) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, |checkout| checkout.add_item(item)).await
    }

    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        checkout_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, |checkout| {
            checkout.update_item(product_id, variant_id, quantity)
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        checkout_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, |checkout| checkout.remove_item(product_id, variant_id))
            .await
    }

    pub async fn clear_items(&self, checkout_id: Uuid) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, Checkout::clear_items).await
    }

    #[instrument(skip(self))]
    pub async fn apply_discount_code(&self, checkout_id: Uuid, code: &str) -> Result<Checkout, ServiceError> {
        let discount = self
            .discounts
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("discount code {} not found", code)))?;
        let categories = self.categories.clone();
        self.mutate(checkout_id, |checkout| {
            checkout.apply_discount(Some(&discount), categories.as_ref())
        })
        .await
    }

    pub async fn remove_discount(&self, checkout_id: Uuid) -> Result<Checkout, ServiceError> {
        let categories = self.categories.clone();
        self.mutate(checkout_id, |checkout| {
            checkout.apply_discount(None, categories.as_ref())
        })
        .await
    }

    /// Quotes `rate_id` against the current cart and selects it.
    #[instrument(skip(self))]
    pub async fn select_shipping_rate(&self, checkout_id: Uuid, rate_id: Uuid) -> Result<Checkout, ServiceError> {
        let _guard = self.locks.acquire(checkout_id).await;
        let mut checkout = self.get_checkout(checkout_id).await?;
        let option = self
            .shipping
            .quote(rate_id, checkout.total_amount, checkout.total_weight)
            .await?;
        checkout.set_shipping_method(Some(option))?;
        self.persist(&checkout).await?;
        Ok(checkout)
    }

    pub async fn clear_shipping(&self, checkout_id: Uuid) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, |checkout| checkout.set_shipping_method(None))
            .await
    }

    #[instrument(skip(self))]
    pub async fn change_currency(&self, checkout_id: Uuid, code: &str) -> Result<Checkout, ServiceError> {
        let _guard = self.locks.acquire(checkout_id).await;
        let mut checkout = self.get_checkout(checkout_id).await?;
        if checkout.currency == code {
            return Ok(checkout);
        }
        let from = self.currencies.get(&checkout.currency).await?;
        let to = self.currencies.get_enabled(code).await?;
        checkout.set_currency(code, &from, &to)?;
        self.persist(&checkout).await?;
        info!(checkout_id = %checkout_id, from = %from.code, to = %to.code, "Checkout currency changed");
        Ok(checkout)
    }

    pub async fn set_customer_details(
        &self,
        checkout_id: Uuid,
        details: CustomerDetails,
    ) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, |checkout| checkout.set_customer_details(details))
            .await
    }

    pub async fn set_shipping_address(&self, checkout_id: Uuid, address: Address) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, |checkout| checkout.set_shipping_address(address))
            .await
    }

    pub async fn set_billing_address(&self, checkout_id: Uuid, address: Address) -> Result<Checkout, ServiceError> {
        self.mutate(checkout_id, |checkout| checkout.set_billing_address(address))
            .await
    }

    /// Converts the checkout into a persisted order.
    ///
    /// The applied discount is re-validated and its usage counted once; the
    /// checkout is then marked completed with the order id.
    #[instrument(skip(self))]
    pub async fn complete_checkout(&self, checkout_id: Uuid) -> Result<Order, ServiceError> {
        let _guard = self.locks.acquire(checkout_id).await;
        let mut checkout = self.get_checkout(checkout_id).await?;

        if checkout.is_active() && checkout.is_expired() {
            checkout.mark_as_expired()?;
            self.checkouts.save(&checkout).await?;
            self.event_sender
                .send_or_log(Event::CheckoutExpired(checkout_id))
                .await;
            return Err(ServiceError::InvalidOperation(format!(
                "checkout {} has expired",
                checkout_id
            )));
        }
        if checkout.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "cannot complete an empty checkout".to_string(),
            ));
        }

        let discount = match &checkout.applied_discount {
            Some(applied) => {
                let discount = self
                    .discounts
                    .find_by_id(applied.discount_id)
                    .await?
                    .filter(|d| d.is_valid())
                    .ok_or_else(|| {
                        ServiceError::InvalidOperation(format!(
                            "discount {} is no longer valid",
                            applied.code
                        ))
                    })?;
                Some(discount)
            }
            None => None,
        };
        let draft = checkout.to_order()?;

        // Redeem before placing the order so the usage limit holds across
        // concurrent checkouts sharing one code.
        let redeemed = match &discount {
            Some(discount) => Some(
                self.discounts
                    .increment_usage(discount.metadata.id)
                    .await
                    .map_err(|e| match e {
                        ServiceError::Conflict(_) => ServiceError::InvalidOperation(format!(
                            "discount {} is no longer valid",
                            discount.code
                        )),
                        other => other,
                    })?,
            ),
            None => None,
        };

        let order = match self.orders.place_order(draft).await {
            Ok(order) => order,
            Err(e) => {
                if let Some(redeemed) = &redeemed {
                    self.release_redemption(redeemed.metadata.id).await;
                }
                return Err(e);
            }
        };

        if let Some(redeemed) = redeemed {
            self.event_sender
                .send_or_log(Event::DiscountRedeemed {
                    discount_id: redeemed.metadata.id,
                    code: redeemed.code.clone(),
                    usage: redeemed.current_usage,
                })
                .await;
        }

        checkout.mark_as_completed(order.metadata.id)?;
        self.checkouts.save(&checkout).await?;

        info!(checkout_id = %checkout_id, order_id = %order.metadata.id, order_number = %order.order_number, "Checkout completed");
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                checkout_id,
                order_id: order.metadata.id,
            })
            .await;
        Ok(order)
    }

    /// One cleanup pass: expires and abandons stale active checkouts, then
    /// deletes the ones past their retention window.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        let mut report = SweepReport::default();

        for candidate in self.checkouts.list().await? {
            let id = candidate.metadata.id;
            let _guard = self.locks.acquire(id).await;
            let Some(mut checkout) = self.checkouts.find_by_id(id).await? else {
                continue;
            };

            if checkout.is_active() && checkout.is_expired_at(now) {
                checkout.mark_as_expired()?;
                self.checkouts.save(&checkout).await?;
                report.expired += 1;
                self.event_sender.send_or_log(Event::CheckoutExpired(id)).await;
            } else if checkout.should_be_abandoned_at(now, &self.policy) {
                checkout.mark_as_abandoned()?;
                self.checkouts.save(&checkout).await?;
                report.abandoned += 1;
                self.event_sender.send_or_log(Event::CheckoutAbandoned(id)).await;
            }

            if checkout.should_be_deleted_at(now, &self.policy) {
                self.checkouts.delete(id).await?;
                report.deleted += 1;
                self.event_sender.send_or_log(Event::CheckoutDeleted(id)).await;
            }
        }

        if report != SweepReport::default() {
            info!(
                abandoned = report.abandoned,
                expired = report.expired,
                deleted = report.deleted,
                "Checkout sweep finished"
            );
        }
        Ok(report)
    }

    async fn release_redemption(&self, discount_id: Uuid) {
        if let Err(e) = self.discounts.release_usage(discount_id).await {
            error!(error = %e, discount_id = %discount_id, "Failed to release discount usage");
        }
    }

    async fn expire(&self, checkout_id: Uuid) -> Result<(), ServiceError> {
        let _guard = self.locks.acquire(checkout_id).await;
        let mut checkout = self.get_checkout(checkout_id).await?;
        if checkout.status == CheckoutStatus::Active {
            checkout.mark_as_expired()?;
            self.checkouts.save(&checkout).await?;
            self.event_sender
                .send_or_log(Event::CheckoutExpired(checkout_id))
                .await;
        }
        Ok(())
    }

    /// Load, apply `f`, save, all under the checkout's lock.
    async fn mutate<F>(&self, checkout_id: Uuid, f: F) -> Result<Checkout, ServiceError>
    where
        F: FnOnce(&mut Checkout) -> Result<(), ServiceError>,
    {
        let _guard = self.locks.acquire(checkout_id).await;
        let mut checkout = self.get_checkout(checkout_id).await?;
        if let Err(e) = f(&mut checkout) {
            warn!(checkout_id = %checkout_id, error = %e, "Checkout mutation rejected");
            return Err(e);
        }
        self.persist(&checkout).await?;
        Ok(checkout)
    }

    async fn persist(&self, checkout: &Checkout) -> Result<(), ServiceError> {
        self.checkouts.save(checkout).await?;
        self.event_sender
            .send_or_log(Event::CheckoutUpdated(checkout.metadata.id))
            .await;
        Ok(())
    }
}
