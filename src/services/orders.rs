use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{AggregateLocks, ShippingService};
use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        Address, CategoryResolver, CustomerDetails, NewOrderItem, Order, OrderStatus,
        PaymentStatus,
    },
    repositories::{DiscountRepository, OrderRepository},
};

/// Outcome of [`OrderService::sync_payment_status`].
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentSync {
    Applied(Order),
    /// The order already had the requested status.
    Unchanged,
    /// The payment state machine refused to leave `current`.
    Rejected { current: PaymentStatus },
}

impl PaymentSync {
    /// `false` only when the move was refused.
    pub fn is_consistent(&self) -> bool {
        !matches!(self, PaymentSync::Rejected { .. })
    }
}

/// Order creation and lifecycle management.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    discounts: Arc<dyn DiscountRepository>,
    shipping: ShippingService,
    categories: Arc<dyn CategoryResolver>,
    event_sender: Arc<EventSender>,
    locks: AggregateLocks,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        discounts: Arc<dyn DiscountRepository>,
        shipping: ShippingService,
        categories: Arc<dyn CategoryResolver>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            orders,
            discounts,
            shipping,
            categories,
            event_sender,
            locks: AggregateLocks::new(),
        }
    }

    #[instrument(skip(self, items, shipping_address, billing_address), fields(item_count = items.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        items: Vec<NewOrderItem>,
        currency: &str,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
    ) -> Result<Order, ServiceError> {
        let order = Order::new(user_id, items, currency, shipping_address, billing_address)?;
        self.place_order(order).await
    }

    #[instrument(skip(self, items, customer, shipping_address, billing_address), fields(item_count = items.len()))]
    pub async fn create_guest_order(
        &self,
        items: Vec<NewOrderItem>,
        currency: &str,
        customer: CustomerDetails,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
    ) -> Result<Order, ServiceError> {
        let order = Order::new_guest(items, currency, customer, shipping_address, billing_address)?;
        self.place_order(order).await
    }

    /// Persists a freshly built order, swapping its temporary number for the
    /// next value of the order sequence.
    #[instrument(skip(self, order), fields(order_id = %order.metadata.id))]
    pub async fn place_order(&self, mut order: Order) -> Result<Order, ServiceError> {
        let sequence = self.orders.next_order_sequence().await?;
        order.assign_order_number(sequence);
        self.orders.insert(&order).await.map_err(|e| {
            error!(error = %e, order_id = %order.metadata.id, "Failed to persist order");
            e
        })?;

        info!(order_id = %order.metadata.id, order_number = %order.order_number, final_amount = order.final_amount, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.metadata.id,
                order_number: order.order_number.clone(),
            })
            .await;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))
    }

    pub async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        self.orders.find_by_user(user_id).await
    }

    /// Applies a discount code to a pending order and counts the redemption.
    #[instrument(skip(self))]
    pub async fn apply_discount_code(&self, order_id: Uuid, code: &str) -> Result<Order, ServiceError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.get_order(order_id).await?;
        ensure_pending(&order)?;
        if order.applied_discount.is_some() {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} already has a discount applied",
                order.order_number
            )));
        }

        let discount = self
            .discounts
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("discount code {} not found", code)))?;
        order.apply_discount(&discount, self.categories.as_ref())?;

        let redeemed = self.discounts.increment_usage(discount.metadata.id).await?;
        if let Err(e) = self.orders.update(&order).await {
            if let Err(release) = self.discounts.release_usage(redeemed.metadata.id).await {
                error!(error = %release, discount_id = %redeemed.metadata.id, "Failed to release discount usage");
            }
            return Err(e);
        }
        info!(order_id = %order_id, code = %discount.code, amount = order.discount_amount, "Discount applied to order");
        self.event_sender
            .send_or_log(Event::DiscountRedeemed {
                discount_id: redeemed.metadata.id,
                code: redeemed.code.clone(),
                usage: redeemed.current_usage,
            })
            .await;
        self.event_sender.send_or_log(Event::OrderUpdated(order_id)).await;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn remove_discount(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.get_order(order_id).await?;
        ensure_pending(&order)?;
        order.remove_discount();
        self.orders.update(&order).await?;
        self.event_sender.send_or_log(Event::OrderUpdated(order_id)).await;
        Ok(order)
    }

    /// Quotes `rate_id` for the order and stores the option; `None` clears it.
    #[instrument(skip(self))]
    pub async fn set_shipping_rate(&self, order_id: Uuid, rate_id: Option<Uuid>) -> Result<Order, ServiceError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.get_order(order_id).await?;
        ensure_pending(&order)?;

        let option = match rate_id {
            Some(rate_id) => Some(
                self.shipping
                    .quote(rate_id, order.total_amount, order.total_weight)
                    .await?,
            ),
            None => None,
        };
        order.set_shipping_method(option);
        self.orders.update(&order).await?;
        self.event_sender.send_or_log(Event::OrderUpdated(order_id)).await;
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order, ServiceError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.get_order(order_id).await?;
        let old_status = order.status;
        order.update_status(status).map_err(|e| {
            warn!(order_id = %order_id, from = %old_status, to = %status, "Rejected order status change");
            e
        })?;
        self.orders.update(&order).await?;

        info!(order_id = %order_id, from = %old_status, to = %status, "Order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: status,
            })
            .await;
        Ok(order)
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.update_status(order_id, OrderStatus::Cancelled).await
    }

    /// Moves the order's payment status and its coupled order status.
    ///
    /// A move the payment state machine refuses is logged and returned as
    /// [`PaymentSync::Rejected`] rather than raised, because provider events
    /// are redelivered and arrive out of order.
    #[instrument(skip(self))]
    pub async fn sync_payment_status(
        &self,
        order_id: Uuid,
        status: PaymentStatus,
    ) -> Result<PaymentSync, ServiceError> {
        let _guard = self.locks.acquire(order_id).await;
        let mut order = self.get_order(order_id).await?;
        let (old_payment, old_status) = (order.payment_status, order.status);
        if old_payment == status {
            return Ok(PaymentSync::Unchanged);
        }
        if let Err(e) = order.update_payment_status(status) {
            warn!(order_id = %order_id, error = %e, "Skipping payment status change");
            return Ok(PaymentSync::Rejected { current: old_payment });
        }
        self.orders.update(&order).await?;

        info!(order_id = %order_id, from = %old_payment, to = %status, order_status = %order.status, "Order payment status updated");
        self.event_sender
            .send_or_log(Event::PaymentStatusChanged {
                order_id,
                old_status: old_payment,
                new_status: status,
            })
            .await;
        if order.status != old_status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status: order.status,
                })
                .await;
        }
        Ok(PaymentSync::Applied(order))
    }
}

fn ensure_pending(order: &Order) -> Result<(), ServiceError> {
    if order.status == OrderStatus::Pending && order.payment_status == PaymentStatus::Pending {
        Ok(())
    } else {
        Err(ServiceError::InvalidOperation(format!(
            "order {} can no longer be repriced in status {}",
            order.order_number, order.status
        )))
    }
}
