use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use super::currency::Currency;
use super::discount::{CategoryResolver, Discount};
use super::metadata::EntityMetadata;
use super::order::{
    checked_total, line_subtotal, Address, AppliedDiscount, CustomerDetails, NewOrderItem, Order,
    OrderItem,
};
use super::shipping::ShippingOption;
use crate::errors::ServiceError;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStatus {
    Active,
    Completed,
    Abandoned,
    Expired,
}

impl CheckoutStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CheckoutStatus::Active)
    }
}

/// Time windows governing checkout expiry, abandonment and cleanup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckoutPolicy {
    pub ttl: Duration,
    pub abandon_after: Duration,
    pub empty_retention: Duration,
    pub abandoned_retention: Duration,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            abandon_after: Duration::minutes(15),
            empty_retention: Duration::hours(24),
            abandoned_retention: Duration::days(7),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutItem {
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

impl CheckoutItem {
    fn matches(&self, product_id: Uuid, variant_id: Option<Uuid>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }

    fn refresh_subtotal(&mut self) -> Result<(), ServiceError> {
        self.subtotal = line_subtotal(self.price, self.quantity)?;
        Ok(())
    }

    fn to_order_item(&self) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            product_id: self.product_id,
            variant_id: self.variant_id,
            product_name: self.product_name.clone(),
            variant_name: self.variant_name.clone(),
            sku: self.sku.clone(),
            price: self.price,
            quantity: self.quantity,
            weight: self.weight,
            subtotal: self.subtotal,
        }
    }

    fn to_new_order_item(&self) -> NewOrderItem {
        NewOrderItem {
            product_id: self.product_id,
            variant_id: self.variant_id,
            product_name: self.product_name.clone(),
            variant_name: self.variant_name.clone(),
            sku: self.sku.clone(),
            price: self.price,
            quantity: self.quantity,
            weight: self.weight,
        }
    }
}

/// Mutable pre-order cart bound to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkout {
    pub metadata: EntityMetadata,
    pub session_id: String,
    pub user_id: Option<Uuid>,
    pub status: CheckoutStatus,
    pub items: Vec<CheckoutItem>,
    pub currency: String,
    pub total_amount: i64,
    pub total_weight: f64,
    pub shipping_cost: i64,
    pub discount_amount: i64,
    pub final_amount: i64,
    pub discount_code: Option<String>,
    pub applied_discount: Option<AppliedDiscount>,
    pub shipping_option: Option<ShippingOption>,
    pub customer_details: Option<CustomerDetails>,
    pub shipping_address: Option<Address>,
    pub billing_address: Option<Address>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub converted_order_id: Option<Uuid>,
}

impl Checkout {
    pub fn new(
        session_id: impl Into<String>,
        user_id: Option<Uuid>,
        currency: &str,
    ) -> Result<Self, ServiceError> {
        Self::new_at(session_id, user_id, currency, Utc::now(), &CheckoutPolicy::default())
    }

    pub fn new_at(
        session_id: impl Into<String>,
        user_id: Option<Uuid>,
        currency: &str,
        now: DateTime<Utc>,
        policy: &CheckoutPolicy,
    ) -> Result<Self, ServiceError> {
        let session_id = session_id.into();
        if session_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "session id is required".to_string(),
            ));
        }
        if currency.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "currency is required".to_string(),
            ));
        }

        Ok(Self {
            metadata: EntityMetadata::at(now),
            session_id,
            user_id: user_id.filter(|id| !id.is_nil()),
            status: CheckoutStatus::Active,
            items: Vec::new(),
            currency: currency.to_string(),
            total_amount: 0,
            total_weight: 0.0,
            shipping_cost: 0,
            discount_amount: 0,
            final_amount: 0,
            discount_code: None,
            applied_discount: None,
            shipping_option: None,
            customer_details: None,
            shipping_address: None,
            billing_address: None,
            last_activity_at: now,
            expires_at: now + policy.ttl,
            completed_at: None,
            converted_order_id: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == CheckoutStatus::Active
    }

    /// Adds a line, or increments the quantity of the line with the same
    /// product and variant. A merged line keeps its original price snapshot.
    pub fn add_item(&mut self, item: NewOrderItem) -> Result<(), ServiceError> {
        self.ensure_active()?;
        if item.product_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "product id is required".to_string(),
            ));
        }
        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be greater than 0".to_string(),
            ));
        }
        if item.price < 0 {
            return Err(ServiceError::ValidationError(
                "price cannot be negative".to_string(),
            ));
        }

        let mut items = self.items.clone();
        match items
            .iter_mut()
            .find(|line| line.matches(item.product_id, item.variant_id))
        {
            Some(line) => {
                line.quantity = line.quantity.checked_add(item.quantity).ok_or_else(|| {
                    ServiceError::ValidationError("quantity is out of range".to_string())
                })?;
                line.refresh_subtotal()?;
            }
            None => {
                let mut line = CheckoutItem {
                    id: Uuid::new_v4(),
                    product_id: item.product_id,
                    variant_id: item.variant_id,
                    product_name: item.product_name,
                    variant_name: item.variant_name,
                    sku: item.sku,
                    price: item.price,
                    quantity: item.quantity,
                    weight: item.weight,
                    subtotal: 0,
                };
                line.refresh_subtotal()?;
                items.push(line);
            }
        }
        self.commit_items(items)?;

        self.recalculate_totals();
        Ok(())
    }

    pub fn update_item(
        &mut self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        self.ensure_active()?;
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be greater than 0; remove the item instead".to_string(),
            ));
        }
        let mut items = self.items.clone();
        let line = items
            .iter_mut()
            .find(|line| line.matches(product_id, variant_id))
            .ok_or_else(item_not_found)?;
        line.quantity = quantity;
        line.refresh_subtotal()?;
        self.commit_items(items)?;

        self.recalculate_totals();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<(), ServiceError> {
        self.ensure_active()?;
        let index = self
            .items
            .iter()
            .position(|line| line.matches(product_id, variant_id))
            .ok_or_else(item_not_found)?;
        self.items.remove(index);

        self.recalculate_totals();
        Ok(())
    }

    pub fn clear_items(&mut self) -> Result<(), ServiceError> {
        self.ensure_active()?;
        self.items.clear();
        self.recalculate_totals();
        Ok(())
    }

    /// `None` clears any applied discount. `Some` prices the discount against
    /// an order view of the current lines and stores a snapshot.
    pub fn apply_discount(
        &mut self,
        discount: Option<&Discount>,
        categories: &dyn CategoryResolver,
    ) -> Result<(), ServiceError> {
        self.ensure_active()?;

        let Some(discount) = discount else {
            self.discount_code = None;
            self.discount_amount = 0;
            self.applied_discount = None;
            self.recalculate_totals();
            return Ok(());
        };

        if !discount.is_valid() {
            return Err(ServiceError::InvalidOperation(format!(
                "discount {} is not active",
                discount.code
            )));
        }

        let view = Order::draft(
            self.items.iter().map(CheckoutItem::to_order_item).collect(),
            &self.currency,
        );
        let amount = discount.calculate_discount(&view, categories);
        if amount <= 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "discount {} does not apply to this checkout",
                discount.code
            )));
        }

        self.discount_code = Some(discount.code.clone());
        self.discount_amount = amount;
        self.applied_discount = Some(AppliedDiscount {
            discount_id: discount.metadata.id,
            code: discount.code.clone(),
            amount,
        });
        self.recalculate_totals();
        Ok(())
    }

    pub fn set_shipping_method(&mut self, option: Option<ShippingOption>) -> Result<(), ServiceError> {
        self.ensure_active()?;
        self.shipping_cost = option.as_ref().map_or(0, |o| o.cost);
        self.shipping_option = option;
        self.recalculate_totals();
        Ok(())
    }

    /// Switches the checkout to `new_currency`, converting every line price,
    /// the shipping cost and the discount amount from `from` into `to`.
    pub fn set_currency(
        &mut self,
        new_currency: &str,
        from: &Currency,
        to: &Currency,
    ) -> Result<(), ServiceError> {
        self.ensure_active()?;
        if new_currency == self.currency {
            return Ok(());
        }
        if from.code != self.currency || to.code != new_currency {
            return Err(ServiceError::ValidationError(format!(
                "cannot convert {} to {} using rates for {} -> {}",
                self.currency, new_currency, from.code, to.code
            )));
        }

        // Convert into scratch values first so a failure leaves the checkout untouched.
        let mut items = self.items.clone();
        for line in items.iter_mut() {
            line.price = from.convert_amount(line.price, to)?;
            line.refresh_subtotal()?;
        }
        let shipping_cost = from.convert_amount(self.shipping_cost, to)?;
        let discount_amount = from.convert_amount(self.discount_amount, to)?;

        self.commit_items(items)?;
        self.shipping_cost = shipping_cost;
        if let Some(option) = self.shipping_option.as_mut() {
            option.cost = shipping_cost;
        }
        self.discount_amount = discount_amount;
        if let Some(applied) = self.applied_discount.as_mut() {
            applied.amount = discount_amount;
        }
        self.currency = new_currency.to_string();

        self.recalculate_totals();
        Ok(())
    }

    pub fn set_customer_details(&mut self, details: CustomerDetails) -> Result<(), ServiceError> {
        self.ensure_active()?;
        validator::Validate::validate(&details)?;
        self.customer_details = Some(details);
        self.record_activity();
        Ok(())
    }

    pub fn set_shipping_address(&mut self, address: Address) -> Result<(), ServiceError> {
        self.ensure_active()?;
        validator::Validate::validate(&address)?;
        self.shipping_address = Some(address);
        self.record_activity();
        Ok(())
    }

    pub fn set_billing_address(&mut self, address: Address) -> Result<(), ServiceError> {
        self.ensure_active()?;
        validator::Validate::validate(&address)?;
        self.billing_address = Some(address);
        self.record_activity();
        Ok(())
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn should_be_abandoned(&self) -> bool {
        self.should_be_abandoned_at(Utc::now(), &CheckoutPolicy::default())
    }

    /// An active checkout that captured customer or shipping details and then
    /// went quiet.
    pub fn should_be_abandoned_at(&self, now: DateTime<Utc>, policy: &CheckoutPolicy) -> bool {
        self.is_active()
            && (self.customer_details.is_some() || self.shipping_address.is_some())
            && now - self.last_activity_at > policy.abandon_after
    }

    pub fn should_be_deleted(&self) -> bool {
        self.should_be_deleted_at(Utc::now(), &CheckoutPolicy::default())
    }

    pub fn should_be_deleted_at(&self, now: DateTime<Utc>, policy: &CheckoutPolicy) -> bool {
        let idle = now - self.last_activity_at;
        let empty_and_idle = self.items.is_empty() && idle > policy.empty_retention;
        let abandoned_long_ago =
            self.status == CheckoutStatus::Abandoned && idle > policy.abandoned_retention;
        empty_and_idle
            || abandoned_long_ago
            || self.status == CheckoutStatus::Expired
            || (self.is_active() && self.is_expired_at(now))
    }

    pub fn mark_as_abandoned(&mut self) -> Result<(), ServiceError> {
        self.finish(CheckoutStatus::Abandoned)
    }

    pub fn mark_as_expired(&mut self) -> Result<(), ServiceError> {
        self.finish(CheckoutStatus::Expired)
    }

    pub fn mark_as_completed(&mut self, order_id: Uuid) -> Result<(), ServiceError> {
        if order_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "order id is required to complete a checkout".to_string(),
            ));
        }
        self.finish(CheckoutStatus::Completed)?;
        self.converted_order_id = Some(order_id);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Builds the order this checkout converts into. The checkout itself is
    /// left untouched; callers complete it once the order is persisted.
    pub fn to_order(&self) -> Result<Order, ServiceError> {
        self.ensure_active()?;
        let items = self.items.iter().map(CheckoutItem::to_new_order_item).collect();

        let mut order = match self.user_id {
            Some(user_id) => {
                let mut order = Order::new(
                    user_id,
                    items,
                    &self.currency,
                    self.shipping_address.clone(),
                    self.billing_address.clone(),
                )?;
                order.customer_details = self.customer_details.clone();
                order
            }
            None => {
                let details = self.customer_details.clone().ok_or_else(|| {
                    ServiceError::ValidationError(
                        "guest checkout requires customer details".to_string(),
                    )
                })?;
                Order::new_guest(
                    items,
                    &self.currency,
                    details,
                    self.shipping_address.clone(),
                    self.billing_address.clone(),
                )?
            }
        };

        order.checkout_session_id = Some(self.session_id.clone());
        if let Some(applied) = &self.applied_discount {
            order.carry_discount(applied.clone());
        }
        order.set_shipping_method(self.shipping_option.clone());
        Ok(order)
    }

    /// `final_amount = max(total + shipping - discount, 0)`.
    pub fn recalculate_totals(&mut self) {
        self.total_amount = self.items.iter().map(|line| line.subtotal).sum();
        self.total_weight = self
            .items
            .iter()
            .map(|line| line.weight * f64::from(line.quantity))
            .sum();
        self.final_amount = (self.total_amount + self.shipping_cost - self.discount_amount).max(0);
        self.record_activity();
    }

    /// Replaces the lines once their total is known to fit in cents.
    fn commit_items(&mut self, items: Vec<CheckoutItem>) -> Result<(), ServiceError> {
        checked_total(items.iter().map(|line| line.subtotal))?;
        self.items = items;
        Ok(())
    }

    fn record_activity(&mut self) {
        let now = Utc::now();
        self.last_activity_at = now;
        self.metadata.updated_at = now;
    }

    fn finish(&mut self, status: CheckoutStatus) -> Result<(), ServiceError> {
        if !self.is_active() {
            return Err(ServiceError::transition("checkout status", self.status, status));
        }
        self.status = status;
        self.metadata.touch();
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), ServiceError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ServiceError::InvalidOperation(
                "checkout is not active".to_string(),
            ))
        }
    }
}

fn item_not_found() -> ServiceError {
    ServiceError::NotFound("product not found in checkout".to_string())
}
