use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Which order store implementation the service runs against.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// `AppConfig` holds all configuration parameters required by the application.
///
/// The configuration is loaded from environment variables (optionally via a `.env` file)
/// or uses default values if the variable is not set. Fields include database, HTTP
/// server, webhook verification and outbound integration settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname or service name.
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,
    /// Maximum number of pooled connections.
    pub db_pool_size: usize,
    /// `postgres` for production, `memory` for local runs without a database.
    pub storage_backend: StorageBackend,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,
    /// Graceful shutdown timeout (human-friendly format, e.g. "5s", "1m").
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    // --- Payment webhooks ---
    /// HMAC key Adyen signs notifications with.
    pub adyen_hmac_key: Option<String>,
    /// Shared secret for GoPay notifications.
    pub gopay_webhook_secret: Option<String>,
    /// Shared secret for WePay notifications.
    pub wepay_webhook_secret: Option<String>,
    /// Accept webhooks without checking signatures. Never enable outside local development.
    pub skip_signature_verification: bool,

    // --- Wolt Drive ---
    pub wolt_api_url: String,
    pub wolt_api_key: Option<String>,
    pub wolt_merchant_id: Option<String>,

    // --- Storyous POS ---
    pub storyous_api_url: String,
    pub storyous_api_token: Option<String>,

    // --- Transactional email ---
    /// HTTP endpoint of the email API; status emails are only logged when unset.
    pub email_api_url: Option<String>,
    pub email_api_token: Option<String>,
    pub email_from: String,

    // --- Outbound calls ---
    /// Per-request timeout for outbound provider calls.
    #[serde(deserialize_with = "deserialize_duration")]
    pub http_client_timeout: Duration,
    /// Attempts (including the first) for retryable outbound calls.
    pub retry_max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_initial_delay: Duration,
}

/// Custom deserializer for durations.
/// Accepts human-readable formats like "5s", "1m", "250ms".
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing required values.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(config::Environment::default())
    }

    /// Loads configuration from the given environment source on top of the defaults.
    pub fn load_from(env: config::Environment) -> Result<Self> {
        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "orders_user")?
            .set_default("db_password", "securepassword")?
            .set_default("db_name", "orders_db")?
            .set_default("db_pool_size", 16)?
            .set_default("storage_backend", "postgres")?
            // HTTP
            .set_default("http_port", 8081)?
            .set_default("shutdown_timeout", "5s")?
            // Webhooks
            .set_default("skip_signature_verification", false)?
            // Wolt Drive
            .set_default("wolt_api_url", "https://daas-public-api.wolt.com")?
            // Storyous
            .set_default("storyous_api_url", "https://api.storyous.com")?
            // Email
            .set_default("email_from", "orders@pizza.local")?
            // Outbound calls
            .set_default("http_client_timeout", "10s")?
            .set_default("retry_max_attempts", 3)?
            .set_default("retry_initial_delay", "1s")?
            .add_source(env)
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }

    /// Connection string for `tokio-postgres`.
    pub fn postgres_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.db_host, self.db_port, self.db_user, self.db_password, self.db_name
        )
    }
}
