use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::EntityMetadata;
use crate::errors::ServiceError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub metadata: EntityMetadata,
    pub name: String,
    pub description: Option<String>,
    pub estimated_delivery_days: Option<u32>,
    pub active: bool,
}

impl ShippingMethod {
    pub fn new(name: impl Into<String>, estimated_delivery_days: Option<u32>) -> Result<Self, ServiceError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "shipping method name is required".to_string(),
            ));
        }
        Ok(Self {
            metadata: EntityMetadata::new(),
            name,
            description: None,
            estimated_delivery_days,
            active: true,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingZone {
    pub metadata: EntityMetadata,
    pub name: String,
    /// ISO 3166-1 alpha-2 codes, uppercase.
    pub countries: Vec<String>,
    pub active: bool,
}

impl ShippingZone {
    pub fn new(name: impl Into<String>, countries: Vec<String>) -> Result<Self, ServiceError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "shipping zone name is required".to_string(),
            ));
        }
        if countries.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "shipping zone {} must cover at least one country",
                name
            )));
        }
        Ok(Self {
            metadata: EntityMetadata::new(),
            name,
            countries: countries.into_iter().map(|c| c.to_uppercase()).collect(),
            active: true,
        })
    }

    pub fn covers(&self, country: &str) -> bool {
        self.active && self.countries.iter().any(|c| c.eq_ignore_ascii_case(country))
    }
}

/// Additive surcharge for parcels whose weight falls in `[min_weight, max_weight]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightBasedRate {
    pub min_weight: f64,
    pub max_weight: f64,
    pub rate: i64,
}

impl WeightBasedRate {
    fn contains(&self, weight: f64) -> bool {
        weight >= self.min_weight && weight <= self.max_weight
    }
}

/// Additive surcharge for orders whose value falls in `[min_order_value, max_order_value]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueBasedRate {
    pub min_order_value: i64,
    pub max_order_value: i64,
    pub rate: i64,
}

impl ValueBasedRate {
    fn contains(&self, value: i64) -> bool {
        value >= self.min_order_value && value <= self.max_order_value
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewShippingRate {
    pub method_id: Uuid,
    pub zone_id: Uuid,
    pub base_rate: i64,
    pub min_order_value: i64,
    pub free_shipping_threshold: Option<i64>,
    pub weight_based_rates: Vec<WeightBasedRate>,
    pub value_based_rates: Vec<ValueBasedRate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingRate {
    pub metadata: EntityMetadata,
    pub method_id: Uuid,
    pub zone_id: Uuid,
    pub base_rate: i64,
    pub min_order_value: i64,
    pub free_shipping_threshold: Option<i64>,
    pub weight_based_rates: Vec<WeightBasedRate>,
    pub value_based_rates: Vec<ValueBasedRate>,
    pub active: bool,
}

impl ShippingRate {
    pub fn new(input: NewShippingRate) -> Result<Self, ServiceError> {
        if input.method_id.is_nil() || input.zone_id.is_nil() {
            return Err(ServiceError::ValidationError(
                "shipping rate requires a method and a zone".to_string(),
            ));
        }
        if input.base_rate < 0 || input.min_order_value < 0 {
            return Err(ServiceError::ValidationError(
                "base rate and minimum order value cannot be negative".to_string(),
            ));
        }
        if matches!(input.free_shipping_threshold, Some(t) if t < 0) {
            return Err(ServiceError::ValidationError(
                "free shipping threshold cannot be negative".to_string(),
            ));
        }
        validate_weight_tiers(&input.weight_based_rates)?;
        validate_value_tiers(&input.value_based_rates)?;

        Ok(Self {
            metadata: EntityMetadata::new(),
            method_id: input.method_id,
            zone_id: input.zone_id,
            base_rate: input.base_rate,
            min_order_value: input.min_order_value,
            free_shipping_threshold: input.free_shipping_threshold,
            weight_based_rates: input.weight_based_rates,
            value_based_rates: input.value_based_rates,
            active: true,
        })
    }

    /// Active and not retired.
    pub fn is_available(&self) -> bool {
        self.active && !self.metadata.is_deleted()
    }

    /// Cost in cents for an order of `order_value` cents weighing `weight`.
    ///
    /// Free shipping short-circuits every tier. Otherwise the base rate is
    /// increased by the first matching weight tier and the first matching value
    /// tier.
    pub fn calculate_shipping_cost(&self, order_value: i64, weight: f64) -> Result<i64, ServiceError> {
        if let Some(threshold) = self.free_shipping_threshold {
            if order_value >= threshold {
                return Ok(0);
            }
        }

        if order_value < self.min_order_value {
            return Err(ServiceError::MinimumOrderValueNotMet {
                required: self.min_order_value,
                actual: order_value,
            });
        }

        let weight_surcharge = self
            .weight_based_rates
            .iter()
            .find(|tier| tier.contains(weight))
            .map_or(0, |tier| tier.rate);
        let value_surcharge = self
            .value_based_rates
            .iter()
            .find(|tier| tier.contains(order_value))
            .map_or(0, |tier| tier.rate);

        Ok(self.base_rate + weight_surcharge + value_surcharge)
    }
}

fn validate_weight_tiers(tiers: &[WeightBasedRate]) -> Result<(), ServiceError> {
    for (i, tier) in tiers.iter().enumerate() {
        if !(tier.min_weight.is_finite() && tier.max_weight.is_finite())
            || tier.min_weight < 0.0
            || tier.max_weight < tier.min_weight
        {
            return Err(ServiceError::ValidationError(format!(
                "weight tier {} has an invalid range [{}, {}]",
                i, tier.min_weight, tier.max_weight
            )));
        }
        if tier.rate < 0 {
            return Err(ServiceError::ValidationError(format!(
                "weight tier {} has a negative rate",
                i
            )));
        }
        if let Some(other) = tiers[..i]
            .iter()
            .find(|o| tier.min_weight <= o.max_weight && o.min_weight <= tier.max_weight)
        {
            return Err(ServiceError::ValidationError(format!(
                "weight tier [{}, {}] overlaps [{}, {}]",
                tier.min_weight, tier.max_weight, other.min_weight, other.max_weight
            )));
        }
    }
    Ok(())
}

fn validate_value_tiers(tiers: &[ValueBasedRate]) -> Result<(), ServiceError> {
    for (i, tier) in tiers.iter().enumerate() {
        if tier.min_order_value < 0 || tier.max_order_value < tier.min_order_value {
            return Err(ServiceError::ValidationError(format!(
                "value tier {} has an invalid range [{}, {}]",
                i, tier.min_order_value, tier.max_order_value
            )));
        }
        if tier.rate < 0 {
            return Err(ServiceError::ValidationError(format!(
                "value tier {} has a negative rate",
                i
            )));
        }
        if let Some(other) = tiers[..i].iter().find(|o| {
            tier.min_order_value <= o.max_order_value && o.min_order_value <= tier.max_order_value
        }) {
            return Err(ServiceError::ValidationError(format!(
                "value tier [{}, {}] overlaps [{}, {}]",
                tier.min_order_value, tier.max_order_value, other.min_order_value, other.max_order_value
            )));
        }
    }
    Ok(())
}

/// Snapshot of a chosen shipping rate, embedded in checkouts and orders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub rate_id: Uuid,
    pub method_id: Uuid,
    pub method_name: String,
    pub zone_id: Uuid,
    pub zone_name: String,
    pub cost: i64,
    pub estimated_delivery_days: Option<u32>,
}
