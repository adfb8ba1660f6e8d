use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_CORRELATION_BACKEND: &str = "in-memory";
const DEFAULT_CORRELATION_NAMESPACE: &str = "grodify:order-data";
const DEFAULT_CORRELATION_TTL_SECS: u64 = 30 * 60;
const DEFAULT_CLEANUP_INTERVAL: u64 = 60;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whole-request timeout applied at the HTTP boundary
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    /// Public origin of the storefront; redirect targets are built from it
    #[validate(url)]
    pub public_base_url: String,

    /// Storefront path shown after a captured payment
    #[serde(default = "default_confirmation_path")]
    pub confirmation_path: String,

    /// Storefront path shown when the payment itself did not go through
    #[serde(default = "default_error_path")]
    pub error_path: String,

    /// Storefront path the processor sends the buyer to on cancel
    #[serde(default = "default_cancel_path")]
    pub cancel_path: String,

    /// Stripe secret key, sent as a bearer token
    #[validate(length(min = 1))]
    pub stripe_secret_key: String,

    /// Stripe API origin (overridable for tests and proxies)
    #[serde(default = "default_stripe_api_base")]
    #[validate(url)]
    pub stripe_api_base: String,

    /// Optional pinned `Stripe-Version`
    #[serde(default)]
    pub stripe_api_version: Option<String>,

    #[serde(default = "default_stripe_timeout_secs")]
    #[validate(range(min = 1))]
    pub stripe_timeout_secs: u64,

    /// Webhook secret for verifying `Stripe-Signature`
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub stripe_webhook_tolerance_secs: u64,

    /// ISO currency code for checkout line items
    #[serde(default = "default_checkout_currency")]
    #[validate(length(equal = 3))]
    pub checkout_currency: String,

    /// Order backend origin; orders are posted to `{order_backend_url}/api/orders`
    #[validate(url)]
    pub order_backend_url: String,

    #[serde(default = "default_order_backend_timeout_secs")]
    #[validate(range(min = 1))]
    pub order_backend_timeout_secs: u64,

    /// Fallback category id when the order does not carry one
    #[serde(default = "default_fixed_id")]
    pub default_category_id: String,

    /// Fallback flyer id when the order does not carry one
    #[serde(default = "default_fixed_id")]
    pub default_flyer_id: String,

    /// Correlation store backend selection ("in-memory" or "redis")
    #[serde(default = "default_correlation_backend")]
    #[validate(custom = "validate_correlation_backend")]
    pub correlation_store_backend: String,

    /// Redis connection URL for the correlation store
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prefix for correlation keys when using Redis
    #[serde(default = "default_correlation_namespace")]
    pub correlation_namespace: String,

    /// Lifetime of a correlation entry
    #[serde(default = "default_correlation_ttl_secs")]
    #[validate(range(min = 1))]
    pub correlation_ttl_secs: u64,

    /// Interval in seconds for sweeping expired correlation entries
    #[serde(default = "default_cleanup_interval")]
    #[validate(range(min = 1))]
    pub correlation_sweep_interval_secs: u64,

    /// Stash oversized order data in the correlation store instead of rejecting it
    #[serde(default)]
    pub correlation_fallback_enabled: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything optional
    pub fn new(
        public_base_url: String,
        order_backend_url: String,
        stripe_secret_key: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            request_timeout_secs: default_request_timeout_secs(),
            public_base_url,
            confirmation_path: default_confirmation_path(),
            error_path: default_error_path(),
            cancel_path: default_cancel_path(),
            stripe_secret_key,
            stripe_api_base: default_stripe_api_base(),
            stripe_api_version: None,
            stripe_timeout_secs: default_stripe_timeout_secs(),
            stripe_webhook_secret: None,
            stripe_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            checkout_currency: default_checkout_currency(),
            order_backend_url,
            order_backend_timeout_secs: default_order_backend_timeout_secs(),
            default_category_id: default_fixed_id(),
            default_flyer_id: default_fixed_id(),
            correlation_store_backend: default_correlation_backend(),
            redis_url: default_redis_url(),
            correlation_namespace: default_correlation_namespace(),
            correlation_ttl_secs: default_correlation_ttl_secs(),
            correlation_sweep_interval_secs: default_cleanup_interval(),
            correlation_fallback_enabled: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stripe_timeout(&self) -> Duration {
        Duration::from_secs(self.stripe_timeout_secs)
    }

    pub fn order_backend_timeout(&self) -> Duration {
        Duration::from_secs(self.order_backend_timeout_secs)
    }

    pub fn correlation_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation_ttl_secs)
    }

    pub fn correlation_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.correlation_sweep_interval_secs)
    }

    /// Public origin without a trailing slash
    pub fn public_base(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.is_production() && self.stripe_secret_key.starts_with("sk_test_") {
            let mut err = ValidationError::new("stripe_secret_key_test_mode");
            err.message = Some("A Stripe test-mode key must not be used in production".into());
            errors.add("stripe_secret_key", err);
        }

        for (field, path) in [
            ("confirmation_path", &self.confirmation_path),
            ("error_path", &self.error_path),
            ("cancel_path", &self.cancel_path),
        ] {
            if !path.starts_with('/') {
                let mut err = ValidationError::new("storefront_path");
                err.message = Some("Storefront paths must start with '/'".into());
                errors.add(field, err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_confirmation_path() -> String {
    "/order-confirmation".to_string()
}

fn default_error_path() -> String {
    "/payment-error".to_string()
}

fn default_cancel_path() -> String {
    "/checkout?canceled=true".to_string()
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_stripe_timeout_secs() -> u64 {
    15
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_checkout_currency() -> String {
    "usd".to_string()
}

fn default_order_backend_timeout_secs() -> u64 {
    30
}

fn default_fixed_id() -> String {
    "1".to_string()
}

fn default_correlation_backend() -> String {
    DEFAULT_CORRELATION_BACKEND.to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_correlation_namespace() -> String {
    DEFAULT_CORRELATION_NAMESPACE.to_string()
}

fn default_correlation_ttl_secs() -> u64 {
    DEFAULT_CORRELATION_TTL_SECS
}

fn default_cleanup_interval() -> u64 {
    DEFAULT_CLEANUP_INTERVAL
}

fn validate_correlation_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "in-memory" | "redis" => Ok(()),
        _ => {
            let mut err = ValidationError::new("correlation_store_backend");
            err.message = Some("Must be one of: in-memory, redis".into());
            Err(err)
        }
    }
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

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("grodify_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
///
/// `public_base_url`, `order_backend_url` and `stripe_secret_key` have no defaults.
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
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    for required in ["stripe_secret_key", "order_backend_url", "public_base_url"] {
        if config.get_string(required).is_err() {
            error!(
                "{} is not configured. Set APP__{} in the environment.",
                required,
                required.to_ascii_uppercase()
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(format!(
                "{} is required but not configured",
                required
            ))));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "https://grodify.example".into(),
            "https://orders.grodify.example".into(),
            "sk_live_example".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn defaults_pass_field_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn correlation_defaults_are_thirty_minutes_and_disabled_fallback() {
        let cfg = base_config();
        assert_eq!(cfg.correlation_ttl(), Duration::from_secs(1800));
        assert!(!cfg.correlation_fallback_enabled);
    }

    #[test]
    fn unknown_correlation_backend_is_rejected() {
        let mut cfg = base_config();
        cfg.correlation_store_backend = "memcached".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors
            .field_errors()
            .contains_key("correlation_store_backend"));
    }

    #[test]
    fn public_base_url_must_be_a_url() {
        let mut cfg = base_config();
        cfg.public_base_url = "not a url".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://grodify.example".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_rejects_test_mode_stripe_key() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        cfg.stripe_secret_key = "sk_test_123".into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("stripe_secret_key"));
    }

    #[test]
    fn storefront_paths_must_be_absolute() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.error_path = "payment-error".into();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("error_path"));
    }

    #[test]
    fn public_base_trims_trailing_slash() {
        let mut cfg = base_config();
        cfg.public_base_url = "https://grodify.example/".into();
        assert_eq!(cfg.public_base(), "https://grodify.example");
    }
}
