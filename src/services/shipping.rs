use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    models::{NewShippingRate, ShippingMethod, ShippingOption, ShippingRate, ShippingZone},
    repositories::ShippingRepository,
};

/// Shipping zones, methods and rates, plus quoting.
#[derive(Clone)]
pub struct ShippingService {
    repository: Arc<dyn ShippingRepository>,
}

impl ShippingService {
    pub fn new(repository: Arc<dyn ShippingRepository>) -> Self {
        Self { repository }
    }

    #[instrument(skip(self))]
    pub async fn create_method(
        &self,
        name: &str,
        estimated_delivery_days: Option<u32>,
    ) -> Result<ShippingMethod, ServiceError> {
        let method = ShippingMethod::new(name, estimated_delivery_days)?;
        self.repository.save_method(&method).await?;
        info!(method_id = %method.metadata.id, "Shipping method created");
        Ok(method)
    }

    #[instrument(skip(self))]
    pub async fn create_zone(&self, name: &str, countries: Vec<String>) -> Result<ShippingZone, ServiceError> {
        let zone = ShippingZone::new(name, countries)?;
        self.repository.save_zone(&zone).await?;
        info!(zone_id = %zone.metadata.id, "Shipping zone created");
        Ok(zone)
    }

    #[instrument(skip(self, input), fields(method_id = %input.method_id, zone_id = %input.zone_id))]
    pub async fn create_rate(&self, input: NewShippingRate) -> Result<ShippingRate, ServiceError> {
        self.method(input.method_id).await?;
        self.zone(input.zone_id).await?;

        let rate = ShippingRate::new(input)?;
        self.repository.save_rate(&rate).await?;
        info!(rate_id = %rate.metadata.id, "Shipping rate created");
        Ok(rate)
    }

    /// Soft-deletes a rate. Retired rates are no longer quoted or listed, but
    /// options already snapshotted onto orders keep their id.
    #[instrument(skip(self))]
    pub async fn retire_rate(&self, rate_id: Uuid) -> Result<ShippingRate, ServiceError> {
        let mut rate = self
            .repository
            .find_rate(rate_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("shipping rate {} not found", rate_id)))?;
        if !rate.metadata.is_deleted() {
            rate.active = false;
            rate.metadata.soft_delete();
            self.repository.save_rate(&rate).await?;
            info!(rate_id = %rate_id, "Shipping rate retired");
        }
        Ok(rate)
    }

    /// Prices one rate for the given order value (cents) and weight.
    #[instrument(skip(self))]
    pub async fn quote(
        &self,
        rate_id: Uuid,
        order_value: i64,
        weight: f64,
    ) -> Result<ShippingOption, ServiceError> {
        let rate = self
            .repository
            .find_rate(rate_id)
            .await?
            .filter(|r| !r.metadata.is_deleted())
            .ok_or_else(|| ServiceError::NotFound(format!("shipping rate {} not found", rate_id)))?;
        if !rate.active {
            return Err(ServiceError::InvalidOperation(format!(
                "shipping rate {} is not active",
                rate_id
            )));
        }
        let method = self.method(rate.method_id).await?;
        let zone = self.zone(rate.zone_id).await?;
        build_option(&rate, &method, &zone, order_value, weight)
    }

    /// Quotes every active rate whose zone covers `country`, cheapest first.
    /// Rates whose minimum order value is not met are left out.
    #[instrument(skip(self))]
    pub async fn available_options(
        &self,
        country: &str,
        order_value: i64,
        weight: f64,
    ) -> Result<Vec<ShippingOption>, ServiceError> {
        let mut options = Vec::new();
        for rate in self.repository.list_rates().await?.into_iter().filter(ShippingRate::is_available) {
            let zone = self.zone(rate.zone_id).await?;
            if !zone.covers(country) {
                continue;
            }
            let method = self.method(rate.method_id).await?;
            if !method.active {
                continue;
            }
            match build_option(&rate, &method, &zone, order_value, weight) {
                Ok(option) => options.push(option),
                Err(ServiceError::MinimumOrderValueNotMet { required, .. }) => {
                    debug!(rate_id = %rate.metadata.id, required, "Skipping rate below minimum order value");
                }
                Err(e) => return Err(e),
            }
        }
        options.sort_by_key(|o| o.cost);
        Ok(options)
    }

    async fn method(&self, id: Uuid) -> Result<ShippingMethod, ServiceError> {
        self.repository
            .find_method(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("shipping method {} not found", id)))
    }

    async fn zone(&self, id: Uuid) -> Result<ShippingZone, ServiceError> {
        self.repository
            .find_zone(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("shipping zone {} not found", id)))
    }
}

fn build_option(
    rate: &ShippingRate,
    method: &ShippingMethod,
    zone: &ShippingZone,
    order_value: i64,
    weight: f64,
) -> Result<ShippingOption, ServiceError> {
    Ok(ShippingOption {
        rate_id: rate.metadata.id,
        method_id: method.metadata.id,
        method_name: method.name.clone(),
        zone_id: zone.metadata.id,
        zone_name: zone.name.clone(),
        cost: rate.calculate_shipping_cost(order_value, weight)?,
        estimated_delivery_days: method.estimated_delivery_days,
    })
}
