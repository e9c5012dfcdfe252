use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::retry::RetryConfig;

/// Default values for configuration
pub const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Pricing settings applied to every checkout
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CheckoutConfig {
    /// Flat shipping fee added to every order
    #[serde(default = "default_shipping_fee")]
    #[validate(custom = "validate_non_negative_amount")]
    pub shipping_fee: Decimal,

    /// ISO currency code sent to the gateway
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            shipping_fee: default_shipping_fee(),
            currency: default_currency(),
        }
    }
}

/// Payment gateway connection and signing settings.
///
/// Immutable once loaded; the verifier takes its own copy at construction.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Hosted checkout page the customer is redirected to
    #[serde(default = "default_gateway_url")]
    #[validate(url)]
    pub payment_url: String,

    /// Merchant terminal code issued by the gateway
    #[serde(default)]
    pub merchant_code: String,

    /// Shared HMAC secret; must be supplied by the deployment
    #[serde(default)]
    #[validate(custom = "validate_secret_key")]
    pub secret_key: String,

    /// Where the gateway sends the customer afterwards
    #[serde(default = "default_return_url")]
    #[validate(url)]
    pub return_url: String,

    #[serde(default = "default_gateway_version")]
    pub version: String,

    #[serde(default = "default_gateway_command")]
    pub command: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_order_type")]
    pub order_type: String,

    /// Offset of the gateway's local clock from UTC
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    /// Validity window of a checkout link
    #[serde(default = "default_expiry_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub expiry_minutes: i64,

    /// Parameter carrying the signature
    #[serde(default = "default_signature_param")]
    pub signature_param: String,

    /// Parameter naming the hash algorithm; excluded from signing
    #[serde(default = "default_signature_type_param")]
    pub signature_type_param: String,

    /// Response code that means the payment went through
    #[serde(default = "default_success_code")]
    pub success_code: String,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            payment_url: default_gateway_url(),
            merchant_code: String::new(),
            secret_key: String::new(),
            return_url: default_return_url(),
            version: default_gateway_version(),
            command: default_gateway_command(),
            locale: default_locale(),
            order_type: default_order_type(),
            utc_offset_minutes: default_utc_offset_minutes(),
            expiry_minutes: default_expiry_minutes(),
            signature_param: default_signature_param(),
            signature_type_param: default_signature_type_param(),
            success_code: default_success_code(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Maximum number of database connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// Minimum idle connections kept in the pool
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Pool acquire timeout in seconds
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Environment name (development, test, production)
    pub environment: String,

    /// Logging level
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    #[serde(default)]
    #[validate]
    pub payment_gateway: PaymentGatewayConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Upper bound on handling one gateway callback
    #[serde(default = "default_callback_timeout_secs")]
    #[validate(range(min = 1))]
    pub callback_timeout_secs: u64,

    /// Capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    /// Cross-field checks the derive cannot express.
    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let offset = self.payment_gateway.utc_offset_minutes;
        if !(-12 * 60..=14 * 60).contains(&offset) {
            let mut err = ValidationError::new("utc_offset_minutes");
            err.message = Some("utc_offset_minutes must be between -720 and 840".into());
            errors.add("payment_gateway", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections cannot exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if self.retry.max_attempts == 0 {
            let mut err = ValidationError::new("retry");
            err.message = Some("retry.max_attempts must be at least 1".into());
            errors.add("retry", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    30
}

fn default_callback_timeout_secs() -> u64 {
    DEFAULT_CALLBACK_TIMEOUT_SECS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_shipping_fee() -> Decimal {
    Decimal::new(30_000, 0)
}

fn default_currency() -> String {
    "VND".to_string()
}

fn default_gateway_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}

fn default_return_url() -> String {
    "http://localhost:8080/api/v1/payments/return".to_string()
}

fn default_gateway_version() -> String {
    "2.1.0".to_string()
}

fn default_gateway_command() -> String {
    "pay".to_string()
}

fn default_locale() -> String {
    "vn".to_string()
}

fn default_order_type() -> String {
    "other".to_string()
}

fn default_utc_offset_minutes() -> i32 {
    7 * 60
}

fn default_expiry_minutes() -> i64 {
    15
}

fn default_signature_param() -> String {
    "vnp_SecureHash".to_string()
}

fn default_signature_type_param() -> String {
    "vnp_SecureHashType".to_string()
}

fn default_success_code() -> String {
    "00".to_string()
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

fn validate_secret_key(secret: &str) -> Result<(), ValidationError> {
    if secret.trim().is_empty() {
        let mut err = ValidationError::new("secret_key");
        err.message = Some("payment_gateway.secret_key must be configured".into());
        return Err(err);
    }
    Ok(())
}

fn validate_non_negative_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        let mut err = ValidationError::new("shipping_fee");
        err.message = Some("shipping_fee cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stateset_checkout={},sea_orm=warn", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://checkout.db?mode=rwc")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
