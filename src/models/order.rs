use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;
use validator::Validate;

use super::discount::{CategoryResolver, Discount};
use super::metadata::EntityMetadata;
use super::shipping::ShippingOption;
use crate::errors::ServiceError;

/// Fulfillment status of an order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Cancelled,
    Completed,
}

impl OrderStatus {
    pub fn allowed_transitions(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
            OrderStatus::Paid => &[OrderStatus::Shipped, OrderStatus::Cancelled],
            OrderStatus::Shipped => &[OrderStatus::Completed, OrderStatus::Cancelled],
            OrderStatus::Cancelled | OrderStatus::Completed => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Entering one of these states stamps `completed_at`.
    fn closes_order(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Completed)
    }
}

/// Payment status of an order, driven by payment transactions.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Refunded,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub fn allowed_transitions(&self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Pending => &[PaymentStatus::Authorized, PaymentStatus::Failed],
            PaymentStatus::Authorized => &[
                PaymentStatus::Captured,
                PaymentStatus::Refunded,
                PaymentStatus::Cancelled,
            ],
            PaymentStatus::Captured => &[PaymentStatus::Refunded],
            PaymentStatus::Refunded | PaymentStatus::Cancelled | PaymentStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1))]
    pub full_name: String,
    #[validate(length(min = 1))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub postal_code: String,
    pub region: Option<String>,
    #[validate(length(equal = 2))]
    pub country: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CustomerDetails {
    #[validate(email)]
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

/// Snapshot of the discount that was applied, kept even if the discount is
/// later edited or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub discount_id: Uuid,
    pub code: String,
    pub amount: i64,
}

/// Line item input; converted into an immutable `OrderItem` snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub sku: String,
    pub price: i64,
    pub quantity: i32,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub sku: String,
    pub price: i64,
    pub quantity: i32,
    pub weight: f64,
    pub subtotal: i64,
}

impl OrderItem {
    fn from_input(input: NewOrderItem) -> Result<Self, ServiceError> {
        Ok(Self {
            id: Uuid::new_v4(),
            subtotal: line_subtotal(input.price, input.quantity)?,
            product_id: input.product_id,
            variant_id: input.variant_id,
            product_name: input.product_name,
            variant_name: input.variant_name,
            sku: input.sku,
            price: input.price,
            quantity: input.quantity,
            weight: input.weight,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub metadata: EntityMetadata,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub checkout_session_id: Option<String>,
    pub currency: String,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_provider: Option<String>,
    pub total_amount: i64,
    pub total_weight: f64,
    pub shipping_cost: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub applied_discount: Option<AppliedDiscount>,
    pub shipping_option: Option<ShippingOption>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub customer_details: Option<CustomerDetails>,
    pub is_guest_order: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Creates an order for an authenticated customer.
    pub fn new(
        user_id: Uuid,
        items: Vec<NewOrderItem>,
        currency: &str,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
    ) -> Result<Self, ServiceError> {
        if user_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "user id is required for customer orders".to_string(),
            ));
        }
        let mut order = Self::build(items, currency)?;
        order.user_id = Some(user_id);
        order.shipping_address = shipping_address;
        order.billing_address = billing_address;
        Ok(order)
    }

    /// Creates an order for a guest; contact details stand in for the account.
    pub fn new_guest(
        items: Vec<NewOrderItem>,
        currency: &str,
        customer_details: CustomerDetails,
        shipping_address: Option<Address>,
        billing_address: Option<Address>,
    ) -> Result<Self, ServiceError> {
        customer_details.validate()?;
        let mut order = Self::build(items, currency)?;
        order.is_guest_order = true;
        order.customer_details = Some(customer_details);
        order.shipping_address = shipping_address;
        order.billing_address = billing_address;
        Ok(order)
    }

    fn build(items: Vec<NewOrderItem>, currency: &str) -> Result<Self, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "order must contain at least one item".to_string(),
            ));
        }
        if currency.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "currency is required".to_string(),
            ));
        }
        for item in &items {
            if item.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "quantity for product {} must be positive",
                    item.product_id
                )));
            }
            if item.price <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "price for product {} must be positive",
                    item.product_id
                )));
            }
        }

        let items = items
            .into_iter()
            .map(OrderItem::from_input)
            .collect::<Result<Vec<_>, _>>()?;
        checked_total(items.iter().map(|item| item.subtotal))?;

        let mut order = Self::draft(items, currency);
        order.order_number = temporary_order_number(order.metadata.id);
        Ok(order)
    }

    /// Unvalidated order over the given lines. Used for synthetic views (e.g.
    /// pricing a checkout's discount) and as the base of `build`.
    pub(crate) fn draft(items: Vec<OrderItem>, currency: &str) -> Self {
        let metadata = EntityMetadata::new();
        let total_amount = items.iter().map(|item| item.subtotal).sum();
        let total_weight = items
            .iter()
            .map(|item| item.weight * f64::from(item.quantity))
            .sum();

        Self {
            order_number: String::new(),
            metadata,
            user_id: None,
            checkout_session_id: None,
            currency: currency.to_string(),
            items,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_provider: None,
            total_amount,
            total_weight,
            shipping_cost: 0,
            discount_amount: 0,
            final_amount: total_amount,
            applied_discount: None,
            shipping_option: None,
            shipping_address: None,
            billing_address: None,
            customer_details: None,
            is_guest_order: false,
            completed_at: None,
        }
    }

    /// Replaces the temporary number with the persisted sequence number.
    pub fn assign_order_number(&mut self, sequence: u64) {
        self.order_number = format!(
            "ORD-{}-{:06}",
            self.metadata.created_at.year(),
            sequence
        );
        self.metadata.touch();
    }

    pub fn has_temporary_number(&self) -> bool {
        self.order_number.starts_with(TEMPORARY_PREFIX)
    }

    pub fn update_status(&mut self, next: OrderStatus) -> Result<(), ServiceError> {
        if !self.status.can_transition_to(next) {
            return Err(ServiceError::transition("order status", self.status, next));
        }
        self.set_status(next);
        Ok(())
    }

    fn set_status(&mut self, next: OrderStatus) {
        self.status = next;
        if next.closes_order() {
            self.completed_at = Some(Utc::now());
        }
        self.metadata.touch();
    }

    /// Moves the payment status and applies the coupled order-status change.
    ///
    /// The order-status side effect only fires when the current order status
    /// matches its guard; otherwise the payment status still moves and the
    /// order status is left alone (a refund does not reopen a completed order).
    pub fn update_payment_status(&mut self, next: PaymentStatus) -> Result<(), ServiceError> {
        if !self.payment_status.can_transition_to(next) {
            return Err(ServiceError::transition(
                "payment status",
                self.payment_status,
                next,
            ));
        }
        self.payment_status = next;

        let coupled = match (next, self.status) {
            (PaymentStatus::Authorized, OrderStatus::Pending) => Some(OrderStatus::Paid),
            (PaymentStatus::Failed, OrderStatus::Pending) => Some(OrderStatus::Cancelled),
            (PaymentStatus::Captured, OrderStatus::Shipped) => Some(OrderStatus::Completed),
            (PaymentStatus::Cancelled, OrderStatus::Pending | OrderStatus::Paid) => {
                Some(OrderStatus::Cancelled)
            }
            _ => None,
        };

        match coupled {
            Some(status) => self.set_status(status),
            None => self.metadata.touch(),
        }
        Ok(())
    }

    pub fn apply_discount(
        &mut self,
        discount: &Discount,
        categories: &dyn CategoryResolver,
    ) -> Result<(), ServiceError> {
        if !discount.is_valid() {
            return Err(ServiceError::InvalidOperation(format!(
                "discount {} is not active",
                discount.code
            )));
        }

        let amount = discount.calculate_discount(self, categories);
        if amount <= 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "discount {} does not apply to this order",
                discount.code
            )));
        }

        self.discount_amount = amount;
        self.applied_discount = Some(AppliedDiscount {
            discount_id: discount.metadata.id,
            code: discount.code.clone(),
            amount,
        });
        self.recalculate_final_amount();
        Ok(())
    }

    /// Adopts a discount already priced elsewhere (a converted checkout).
    pub(crate) fn carry_discount(&mut self, applied: AppliedDiscount) {
        self.discount_amount = applied.amount.min(self.total_amount);
        self.applied_discount = Some(applied);
        self.recalculate_final_amount();
    }

    pub fn remove_discount(&mut self) {
        self.discount_amount = 0;
        self.applied_discount = None;
        self.recalculate_final_amount();
    }

    pub fn set_shipping_method(&mut self, option: Option<ShippingOption>) {
        self.shipping_cost = option.as_ref().map_or(0, |o| o.cost);
        self.shipping_option = option;
        self.recalculate_final_amount();
    }

    /// Full recompute from the three components, independent of call order.
    fn recalculate_final_amount(&mut self) {
        self.final_amount = self.total_amount + self.shipping_cost - self.discount_amount;
        self.metadata.touch();
    }
}

const TEMPORARY_PREFIX: &str = "TMP-";

/// `price * quantity` in cents.
pub(crate) fn line_subtotal(price: i64, quantity: i32) -> Result<i64, ServiceError> {
    price.checked_mul(i64::from(quantity)).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "line amount {} x {} is out of range",
            price, quantity
        ))
    })
}

pub(crate) fn checked_total(subtotals: impl IntoIterator<Item = i64>) -> Result<i64, ServiceError> {
    subtotals
        .into_iter()
        .try_fold(0i64, |total, subtotal| total.checked_add(subtotal))
        .ok_or_else(|| ServiceError::ValidationError("item total is out of range".to_string()))
}

fn temporary_order_number(id: Uuid) -> String {
    let simple = id.simple().to_string();
    format!("{}{}", TEMPORARY_PREFIX, simple[..8].to_uppercase())
}
