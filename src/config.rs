use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::models::checkout::CheckoutPolicy;
use crate::models::currency::validate_currency_code;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_CURRENCY: &str = "USD";
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "APP";

/// Checkout lifecycle windows.
#[derive(Clone, Debug, Deserialize, Validate, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    /// Hours until an untouched checkout expires
    #[serde(default = "default_ttl_hours")]
    #[validate(range(min = 1))]
    pub ttl_hours: i64,

    /// Minutes of inactivity before a checkout with contact details is abandoned
    #[serde(default = "default_abandon_after_minutes")]
    #[validate(range(min = 1))]
    pub abandon_after_minutes: i64,

    /// Hours an empty, idle checkout is kept
    #[serde(default = "default_empty_retention_hours")]
    #[validate(range(min = 1))]
    pub empty_retention_hours: i64,

    /// Days an abandoned checkout is kept
    #[serde(default = "default_abandoned_retention_days")]
    #[validate(range(min = 1))]
    pub abandoned_retention_days: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            abandon_after_minutes: default_abandon_after_minutes(),
            empty_retention_hours: default_empty_retention_hours(),
            abandoned_retention_days: default_abandoned_retention_days(),
        }
    }
}

impl CheckoutConfig {
    pub fn policy(&self) -> CheckoutPolicy {
        CheckoutPolicy {
            ttl: chrono::Duration::hours(self.ttl_hours),
            abandon_after: chrono::Duration::minutes(self.abandon_after_minutes),
            empty_retention: chrono::Duration::hours(self.empty_retention_hours),
            abandoned_retention: chrono::Duration::days(self.abandoned_retention_days),
        }
    }
}

/// Payment provider selection and webhook registration.
#[derive(Clone, Debug, Default, Deserialize, Validate, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Provider ids to register at startup, e.g. `["stripe", "mobilepay"]`
    #[serde(default)]
    #[validate(custom = "validate_provider_names")]
    pub enabled_providers: Vec<String>,

    /// Public base URL providers deliver webhooks to
    #[serde(default)]
    #[validate(url)]
    pub webhook_base_url: Option<String>,

    /// Provider event names to subscribe to
    #[serde(default)]
    pub webhook_events: Vec<String>,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Currency new checkouts start in
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency_code")]
    pub default_currency: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            default_currency: default_currency(),
            event_channel_capacity: default_event_channel_capacity(),
            checkout: CheckoutConfig::default(),
            payment: PaymentConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn checkout_policy(&self) -> CheckoutPolicy {
        self.checkout.policy()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),
    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_ttl_hours() -> i64 {
    24
}

fn default_abandon_after_minutes() -> i64 {
    15
}

fn default_empty_retention_hours() -> i64 {
    24
}

fn default_abandoned_retention_days() -> i64 {
    7
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_provider_names(names: &[String]) -> Result<(), ValidationError> {
    let malformed = names.iter().find(|name| {
        name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    });
    if let Some(name) = malformed {
        let mut err = ValidationError::new("enabled_providers");
        err.message = Some(format!("Invalid provider name '{}'", name).into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stateset_commerce_core={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::new(filter_directive);

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*, `__` separates nested keys)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    load_config_from(Path::new(CONFIG_DIR), &run_env, ENV_PREFIX)
}

/// [`load_config`] with an explicit config directory, profile and
/// environment-variable prefix.
pub fn load_config_from(
    dir: &Path,
    run_env: &str,
    env_prefix: &str,
) -> Result<AppConfig, AppConfigError> {
    let default_file = dir.join("default");
    let profile_file = dir.join(run_env);

    let config = Config::builder()
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("default_currency", DEFAULT_CURRENCY)?
        .add_source(File::with_name(&default_file.to_string_lossy()).required(false))
        .add_source(File::with_name(&profile_file.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix(env_prefix).separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    info!(
        environment = %app_config.environment,
        providers = ?app_config.payment.enabled_providers,
        "Configuration loaded"
    );
    Ok(app_config)
}
