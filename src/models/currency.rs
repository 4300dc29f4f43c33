use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::metadata::EntityMetadata;
use crate::errors::ServiceError;

/// Rejects anything that is not a 3-letter uppercase ISO-style code.
pub fn validate_currency_code(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter uppercase code".into());
        Err(err)
    }
}

fn validate_exchange_rate(rate: f64) -> Result<(), ValidationError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("exchange_rate");
        err.message = Some("Exchange rate must be a finite value greater than 0".into());
        Err(err)
    }
}

/// Input for registering a currency.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewCurrency {
    #[validate(custom = "validate_currency_code")]
    pub code: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub symbol: String,
    #[validate(custom = "validate_exchange_rate")]
    pub exchange_rate: f64,
    pub is_enabled: bool,
}

/// A currency and its exchange rate relative to the store's base unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub metadata: EntityMetadata,
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub exchange_rate: f64,
    pub is_enabled: bool,
    pub is_default: bool,
}

impl Currency {
    pub fn new(input: NewCurrency) -> Result<Self, ServiceError> {
        input.validate()?;
        Ok(Self {
            metadata: EntityMetadata::new(),
            code: input.code,
            name: input.name,
            symbol: input.symbol,
            exchange_rate: input.exchange_rate,
            is_enabled: input.is_enabled,
            is_default: false,
        })
    }

    /// Converts a minor-unit amount from this currency into `target`.
    ///
    /// The amount is first expressed in the base unit (`amount / self.rate`)
    /// and then scaled into the target (`* target.rate`). The arithmetic runs
    /// on `Decimal` and rounds half away from zero, so reciprocal rates such as
    /// 1.0 and 0.85 round-trip exactly.
    pub fn convert_amount(&self, amount: i64, target: &Currency) -> Result<i64, ServiceError> {
        if self.code == target.code {
            return Ok(amount);
        }

        let from_rate = rate_as_decimal(self)?;
        let to_rate = rate_as_decimal(target)?;

        let converted = Decimal::from(amount)
            .checked_div(from_rate)
            .and_then(|base| base.checked_mul(to_rate))
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Amount {} cannot be converted from {} to {}",
                    amount, self.code, target.code
                ))
            })?;

        converted
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Converted amount overflows for {} -> {}",
                    self.code, target.code
                ))
            })
    }

    pub fn update_exchange_rate(&mut self, rate: f64) -> Result<(), ServiceError> {
        validate_exchange_rate(rate).map_err(|e| {
            ServiceError::ValidationError(
                e.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "invalid exchange rate".to_string()),
            )
        })?;
        self.exchange_rate = rate;
        self.metadata.touch();
        Ok(())
    }
}

fn rate_as_decimal(currency: &Currency) -> Result<Decimal, ServiceError> {
    Decimal::from_f64(currency.exchange_rate)
        .filter(|rate| *rate > Decimal::ZERO)
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Currency {} has an invalid exchange rate {}",
                currency.code, currency.exchange_rate
            ))
        })
}
