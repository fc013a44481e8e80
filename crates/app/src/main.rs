/// Pizza order lifecycle service.
///
/// Receives payment webhooks from Adyen, GoPay and WePay, reconciles them with
/// stored orders, drives the order status state machine and fans status
/// changes out to customer email, the Storyous POS and Wolt Drive dispatch.
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use app_config::{AppConfig, StorageBackend};
use integrations::{
    HttpEmailSender, LogNotificationSender, NotificationSender, RetryPolicy, StoryousClient,
    WoltDriveClient,
};
use repository::{
    MemoryStore, PgDeliveriesRepository, PgOrdersRepository, PgTenantSettingsRepository,
};
use server::Server;
use service::{Collaborators, OrderService, OrderServiceImpl, Stores};
use webhooks::{WebhookProcessor, WebhookSecrets};

/// Initialize the tracing subscriber for logging (`RUST_LOG`, default `info`).
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn build_stores(config: &AppConfig) -> Result<Stores> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let pool = db::init_db_pool(config)
                .await
                .context("Failed to initialize database")?;
            info!("Database initialized successfully");
            Ok(Stores {
                orders: Arc::new(PgOrdersRepository::new(pool.clone())),
                deliveries: Arc::new(PgDeliveriesRepository::new(pool.clone())),
                settings: Arc::new(PgTenantSettingsRepository::new(pool)),
            })
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; orders are lost on restart");
            Ok(Stores::memory(&MemoryStore::new()))
        }
    }
}

fn build_collaborators(config: &AppConfig) -> Result<Collaborators> {
    let http = integrations::http_client(config.http_client_timeout)
        .context("Failed to build HTTP client")?;
    let retry = RetryPolicy::new(config.retry_max_attempts, config.retry_initial_delay);

    let notifier: Arc<dyn NotificationSender> = match &config.email_api_url {
        Some(url) => Arc::new(HttpEmailSender::new(
            http.clone(),
            url.clone(),
            config.email_api_token.clone(),
            config.email_from.clone(),
        )),
        None => {
            info!("email_api_url not set; status notifications are only logged");
            Arc::new(LogNotificationSender)
        }
    };
    if config.wolt_api_key.is_none() || config.wolt_merchant_id.is_none() {
        warn!("Wolt Drive credentials missing; deliveries must be dispatched manually");
    }

    Ok(Collaborators {
        notifier,
        pos: Arc::new(StoryousClient::new(
            http.clone(),
            config.storyous_api_url.clone(),
            config.storyous_api_token.clone(),
            retry,
        )),
        delivery: Arc::new(WoltDriveClient::new(
            http,
            config.wolt_api_url.clone(),
            config.wolt_api_key.clone(),
            config.wolt_merchant_id.clone(),
            retry,
        )),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    info!("Order lifecycle service starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;
    if config.skip_signature_verification {
        warn!("skip_signature_verification is enabled: webhook signatures will NOT be checked");
    }

    let stores = build_stores(&config).await?;
    let clients = build_collaborators(&config)?;
    let service: Arc<dyn OrderService> = Arc::new(OrderServiceImpl::new(stores, clients));
    let processor = Arc::new(WebhookProcessor::new(
        service.clone(),
        WebhookSecrets::from_config(&config),
    ));

    let http_server = Server::new(
        config.http_port,
        config.shutdown_timeout,
        service,
        processor,
    )?;
    if let Err(err) = http_server.start().await {
        error!("HTTP server error: {:#}", err);
        return Err(err);
    }

    info!("Application stopped");
    Ok(())
}
