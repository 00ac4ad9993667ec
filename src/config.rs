use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "USD";

/// Tax configuration: a single jurisdiction with a default rate and optional
/// per-category overrides.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct TaxConfig {
    /// Default tax rate as a fraction, e.g. 0.20 for 20%
    #[serde(default = "default_tax_rate")]
    pub default_rate: Decimal,

    /// Whether catalog prices already include tax (tax is backed out of the
    /// taxable base instead of added on top)
    #[serde(default)]
    pub prices_include_tax: bool,

    /// Per-category rate overrides keyed by product tax category
    #[serde(default)]
    pub category_rates: HashMap<String, Decimal>,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            default_rate: default_tax_rate(),
            prices_include_tax: false,
            category_rates: HashMap::new(),
        }
    }
}

fn default_tax_rate() -> Decimal {
    Decimal::new(20, 2) // 0.20
}

/// Carrier-aggregator configuration for shipping rate quotes.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ShippingProviderConfig {
    /// Aggregator API base URL; empty disables live quoting entirely
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Sender (warehouse) address used on every quote request
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_city: String,
    #[serde(default = "default_sender_country")]
    pub sender_country: String,
    #[serde(default)]
    pub sender_line1: String,
    #[serde(default)]
    pub sender_postal_code: String,

    /// Assumed per-item parcel weight in kg when estimating from cart size
    #[serde(default = "default_item_weight_kg")]
    pub default_item_weight_kg: Decimal,

    /// Offer polling cadence and deadline
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_poll_deadline_ms")]
    pub poll_deadline_ms: u64,

    /// Per-request HTTP timeout (seconds)
    #[serde(default = "default_provider_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Flat-rate fallback used whenever the aggregator yields nothing
    #[serde(default = "default_flat_rate_name")]
    pub flat_rate_name: String,
    #[serde(default = "default_flat_rate_amount")]
    pub flat_rate_amount: Decimal,
}

impl Default for ShippingProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            sender_name: String::new(),
            sender_city: String::new(),
            sender_country: default_sender_country(),
            sender_line1: String::new(),
            sender_postal_code: String::new(),
            default_item_weight_kg: default_item_weight_kg(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_deadline_ms: default_poll_deadline_ms(),
            request_timeout_secs: default_provider_timeout_secs(),
            flat_rate_name: default_flat_rate_name(),
            flat_rate_amount: default_flat_rate_amount(),
        }
    }
}

fn default_sender_country() -> String {
    "US".to_string()
}
fn default_item_weight_kg() -> Decimal {
    Decimal::new(5, 1) // 0.5 kg
}
fn default_poll_interval_ms() -> u64 {
    750
}
fn default_poll_deadline_ms() -> u64 {
    8_000
}
fn default_provider_timeout_secs() -> u64 {
    10
}
fn default_flat_rate_name() -> String {
    "Standard Shipping".to_string()
}
fn default_flat_rate_amount() -> Decimal {
    Decimal::new(999, 2) // 9.99
}

/// Hosted-checkout payment provider configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentProviderConfig {
    /// Provider API base URL; empty means the adapter reports `unavailable`
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub secret_key: String,

    /// URL the provider redirects the shopper back to after payment
    #[serde(default)]
    pub callback_url: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PaymentProviderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            secret_key: String::new(),
            callback_url: String::new(),
            request_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Application configuration, loaded once at startup.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format
    #[serde(default)]
    pub log_json: bool,

    /// Run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated allowed origins; unset falls back to permissive
    /// in development
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool sizing
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Store currency (single-currency deployment)
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub tax: TaxConfig,

    #[serde(default)]
    pub shipping: ShippingProviderConfig,

    #[serde(default)]
    pub payment: PaymentProviderConfig,

    /// Shared secret for shipment webhook HMAC verification; unset disables
    /// verification
    #[serde(default)]
    pub shipment_webhook_secret: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
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
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// file, and `APP__`-prefixed environment variables (later sources win).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder().set_default("environment", environment.clone())?;

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    if default_path.exists() {
        builder = builder.add_source(File::from(default_path));
    }
    let env_path = Path::new(CONFIG_DIR).join(format!("{}.toml", environment));
    if env_path.exists() {
        builder = builder.add_source(File::from(env_path));
    }

    let settings = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tax_config_defaults() {
        let tax = TaxConfig::default();
        assert_eq!(tax.default_rate, dec!(0.20));
        assert!(!tax.prices_include_tax);
        assert!(tax.category_rates.is_empty());
    }

    #[test]
    fn shipping_config_defaults_have_flat_rate() {
        let shipping = ShippingProviderConfig::default();
        assert_eq!(shipping.flat_rate_amount, dec!(9.99));
        assert!(!shipping.flat_rate_name.is_empty());
        assert!(shipping.poll_deadline_ms > shipping.poll_interval_ms);
    }

    #[test]
    fn app_config_deserializes_with_minimal_input() {
        let settings = Config::builder()
            .set_override("database_url", "sqlite::memory:")
            .unwrap()
            .build()
            .unwrap();

        let cfg: AppConfig = settings.try_deserialize().unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.currency, "USD");
        assert!(cfg.shipment_webhook_secret.is_none());
        assert!(cfg.payment.base_url.is_empty());
    }
}
