use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::metadata::EntityMetadata;
use super::order::{Order, OrderItem};
use crate::errors::ServiceError;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountType {
    /// Applies to the order's item total.
    Basket,
    /// Applies only to lines matching the configured products or categories.
    Product,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscountMethod {
    /// `value` is an amount in whole currency units.
    Fixed,
    /// `value` is a percentage in `(0, 100]`.
    Percentage,
}

/// Catalog capability the discount engine needs to match product discounts
/// configured by category.
pub trait CategoryResolver: Send + Sync {
    fn product_in_categories(&self, product_id: Uuid, category_ids: &[Uuid]) -> bool;
}

/// Resolver for callers without a catalog: nothing belongs to any category.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCategoryResolver;

impl CategoryResolver for NoCategoryResolver {
    fn product_in_categories(&self, _product_id: Uuid, _category_ids: &[Uuid]) -> bool {
        false
    }
}

/// In-memory product -> categories map.
#[derive(Debug, Clone, Default)]
pub struct StaticCategoryResolver {
    memberships: HashMap<Uuid, HashSet<Uuid>>,
}

impl StaticCategoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, product_id: Uuid, categories: impl IntoIterator<Item = Uuid>) -> Self {
        self.memberships
            .entry(product_id)
            .or_default()
            .extend(categories);
        self
    }
}

impl CategoryResolver for StaticCategoryResolver {
    fn product_in_categories(&self, product_id: Uuid, category_ids: &[Uuid]) -> bool {
        self.memberships
            .get(&product_id)
            .map_or(false, |cats| category_ids.iter().any(|c| cats.contains(c)))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewDiscount {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub method: DiscountMethod,
    pub value: Decimal,
    pub min_order_value: i64,
    pub max_discount_value: i64,
    pub product_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub usage_limit: u32,
    pub active: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub metadata: EntityMetadata,
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub method: DiscountMethod,
    pub value: Decimal,
    /// Minimum item total in cents; 0 disables the check.
    pub min_order_value: i64,
    /// Cap in cents; 0 means uncapped.
    pub max_discount_value: i64,
    pub product_ids: Vec<Uuid>,
    pub category_ids: Vec<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// 0 means unlimited.
    pub usage_limit: u32,
    pub current_usage: u32,
    pub active: bool,
}

impl Discount {
    pub fn new(input: NewDiscount) -> Result<Self, ServiceError> {
        let code = input.code.trim().to_string();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "discount code is required".to_string(),
            ));
        }
        if input.value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount value must be greater than 0".to_string(),
            ));
        }
        if input.method == DiscountMethod::Percentage && input.value > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "percentage discount cannot exceed 100".to_string(),
            ));
        }
        if input.min_order_value < 0 || input.max_discount_value < 0 {
            return Err(ServiceError::ValidationError(
                "minimum order and maximum discount values cannot be negative".to_string(),
            ));
        }
        if input.end_date <= input.start_date {
            return Err(ServiceError::ValidationError(
                "discount end date must be after its start date".to_string(),
            ));
        }
        if input.discount_type == DiscountType::Product
            && input.product_ids.is_empty()
            && input.category_ids.is_empty()
        {
            return Err(ServiceError::ValidationError(
                "product discounts require at least one product or category".to_string(),
            ));
        }

        Ok(Self {
            metadata: EntityMetadata::new(),
            code,
            description: input.description,
            discount_type: input.discount_type,
            method: input.method,
            value: input.value,
            min_order_value: input.min_order_value,
            max_discount_value: input.max_discount_value,
            product_ids: input.product_ids,
            category_ids: input.category_ids,
            start_date: input.start_date,
            end_date: input.end_date,
            usage_limit: input.usage_limit,
            current_usage: 0,
            active: input.active,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active
            && now >= self.start_date
            && now < self.end_date
            && self.has_remaining_usage()
    }

    pub fn is_applicable_to_order(&self, order: &Order, categories: &dyn CategoryResolver) -> bool {
        if !self.is_valid() {
            return false;
        }
        if self.min_order_value > 0 && order.total_amount < self.min_order_value {
            return false;
        }
        match self.discount_type {
            DiscountType::Basket => true,
            DiscountType::Product => order
                .items
                .iter()
                .any(|item| self.line_matches(item, categories)),
        }
    }

    /// Discount in cents for `order`, never above the cap or the item total.
    pub fn calculate_discount(&self, order: &Order, categories: &dyn CategoryResolver) -> i64 {
        if !self.is_applicable_to_order(order, categories) {
            return 0;
        }

        let raw = match self.discount_type {
            DiscountType::Basket => match self.method {
                DiscountMethod::Fixed => self.fixed_cents(),
                DiscountMethod::Percentage => self.percentage_of(order.total_amount),
            },
            // Fixed amounts apply once per matching line, not per unit.
            DiscountType::Product => order
                .items
                .iter()
                .filter(|item| self.line_matches(item, categories))
                .map(|item| match self.method {
                    DiscountMethod::Fixed => self.fixed_cents().min(item.subtotal),
                    DiscountMethod::Percentage => self.percentage_of(item.subtotal),
                })
                .sum(),
        };

        let capped = if self.max_discount_value > 0 {
            raw.min(self.max_discount_value)
        } else {
            raw
        };
        capped.min(order.total_amount).max(0)
    }

    /// Whether the usage limit leaves room for one more redemption.
    pub fn has_remaining_usage(&self) -> bool {
        self.usage_limit == 0 || self.current_usage < self.usage_limit
    }

    pub fn increment_usage(&mut self) {
        self.current_usage = self.current_usage.saturating_add(1);
        self.metadata.touch();
    }

    /// Gives back a redemption whose order was never placed.
    pub fn release_usage(&mut self) {
        self.current_usage = self.current_usage.saturating_sub(1);
        self.metadata.touch();
    }

    fn line_matches(&self, item: &OrderItem, categories: &dyn CategoryResolver) -> bool {
        self.product_ids.contains(&item.product_id)
            || (!self.category_ids.is_empty()
                && categories.product_in_categories(item.product_id, &self.category_ids))
    }

    fn fixed_cents(&self) -> i64 {
        round_cents(self.value * Decimal::ONE_HUNDRED)
    }

    fn percentage_of(&self, amount: i64) -> i64 {
        round_cents(Decimal::from(amount) * self.value / Decimal::ONE_HUNDRED)
    }
}

/// Rounds to whole cents. Values beyond `i64` clamp to its bounds; every
/// caller caps the result at the order total, so a clamped value still
/// yields the exact discount.
fn round_cents(value: Decimal) -> i64 {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if rounded.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}
