use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{Currency, NewCurrency},
    repositories::CurrencyRepository,
};

/// Registry of currencies and their exchange rates.
///
/// Exactly one currency is the default and it is always enabled.
#[derive(Clone)]
pub struct CurrencyService {
    repository: Arc<dyn CurrencyRepository>,
    event_sender: Arc<EventSender>,
    // Serializes changes that touch the default flag on more than one row.
    default_lock: Arc<Mutex<()>>,
}

impl CurrencyService {
    pub fn new(repository: Arc<dyn CurrencyRepository>, event_sender: Arc<EventSender>) -> Self {
        Self {
            repository,
            event_sender,
            default_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Registers a currency. The first enabled currency becomes the default.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn register(&self, input: NewCurrency) -> Result<Currency, ServiceError> {
        let _guard = self.default_lock.lock().await;

        if self.repository.find_by_code(&input.code).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "currency {} already exists",
                input.code
            )));
        }

        let mut currency = Currency::new(input)?;
        let has_default = self
            .repository
            .list()
            .await?
            .iter()
            .any(|c| c.is_default);
        if !has_default && currency.is_enabled {
            currency.is_default = true;
        }
        self.repository.save(&currency).await?;

        info!(code = %currency.code, is_default = currency.is_default, "Currency registered");
        self.event_sender
            .send_or_log(Event::CurrencyUpdated(currency.code.clone()))
            .await;
        if currency.is_default {
            self.event_sender
                .send_or_log(Event::DefaultCurrencyChanged {
                    previous: None,
                    current: currency.code.clone(),
                })
                .await;
        }
        Ok(currency)
    }

    pub async fn get(&self, code: &str) -> Result<Currency, ServiceError> {
        self.repository
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("currency {} not found", code)))
    }

    /// Like [`get`](Self::get), but also rejects disabled currencies.
    pub async fn get_enabled(&self, code: &str) -> Result<Currency, ServiceError> {
        let currency = self.get(code).await?;
        if !currency.is_enabled {
            return Err(ServiceError::ValidationError(format!(
                "currency {} is disabled",
                code
            )));
        }
        Ok(currency)
    }

    pub async fn default_currency(&self) -> Result<Currency, ServiceError> {
        self.repository
            .list()
            .await?
            .into_iter()
            .find(|c| c.is_default)
            .ok_or_else(|| ServiceError::NotFound("no default currency configured".to_string()))
    }

    pub async fn list_enabled(&self) -> Result<Vec<Currency>, ServiceError> {
        Ok(self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|c| c.is_enabled)
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn set_default(&self, code: &str) -> Result<Currency, ServiceError> {
        let _guard = self.default_lock.lock().await;

        let mut next = self.get(code).await?;
        if !next.is_enabled {
            return Err(ServiceError::InvalidOperation(format!(
                "currency {} must be enabled before it can become the default",
                code
            )));
        }
        if next.is_default {
            return Ok(next);
        }

        let mut previous = None;
        for mut current in self.repository.list().await?.into_iter().filter(|c| c.is_default) {
            current.is_default = false;
            current.metadata.touch();
            self.repository.save(&current).await?;
            previous = Some(current.code);
        }

        next.is_default = true;
        next.metadata.touch();
        self.repository.save(&next).await?;

        info!(previous = ?previous, current = %next.code, "Default currency changed");
        self.event_sender
            .send_or_log(Event::DefaultCurrencyChanged {
                previous,
                current: next.code.clone(),
            })
            .await;
        Ok(next)
    }

    #[instrument(skip(self))]
    pub async fn set_enabled(&self, code: &str, enabled: bool) -> Result<Currency, ServiceError> {
        let _guard = self.default_lock.lock().await;

        let mut currency = self.get(code).await?;
        if !enabled && currency.is_default {
            warn!(code, "Refusing to disable the default currency");
            return Err(ServiceError::InvalidOperation(format!(
                "cannot disable default currency {}",
                code
            )));
        }
        if currency.is_enabled == enabled {
            return Ok(currency);
        }

        currency.is_enabled = enabled;
        currency.metadata.touch();
        self.repository.save(&currency).await?;
        self.event_sender
            .send_or_log(Event::CurrencyUpdated(currency.code.clone()))
            .await;
        Ok(currency)
    }

    #[instrument(skip(self))]
    pub async fn update_exchange_rate(&self, code: &str, rate: f64) -> Result<Currency, ServiceError> {
        // Held so a concurrent default switch cannot be overwritten by this row.
        let _guard = self.default_lock.lock().await;
        let mut currency = self.get(code).await?;
        currency.update_exchange_rate(rate)?;
        self.repository.save(&currency).await?;
        info!(code, rate, "Exchange rate updated");
        self.event_sender
            .send_or_log(Event::CurrencyUpdated(currency.code.clone()))
            .await;
        Ok(currency)
    }

    /// Converts `amount` cents between two enabled currencies.
    pub async fn convert(&self, amount: i64, from: &str, to: &str) -> Result<i64, ServiceError> {
        let from = self.get_enabled(from).await?;
        let to = self.get_enabled(to).await?;
        from.convert_amount(amount, &to)
    }
}
