use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tradegram::adapters::{AwesomeApiRates, PostgresDirectory, PostgresStore, TelegramNotifier};
use tradegram::api::{create_router, AppState};
use tradegram::config::AppConfig;
use tradegram::error::Result;
use tradegram::services::{CurrencyConverter, Dispatcher, PgAlertThrottle, PgNotificationLedger};

#[derive(Parser)]
#[command(name = "tradegram", about = "Trade-event notification engine")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook listener (default)
    Serve,
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config.logging.level);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
        }
        Commands::Serve => serve(config).await?,
    }

    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;

    let swept = store
        .fail_stale_pending(chrono::Duration::minutes(10))
        .await?;
    if swept > 0 {
        warn!(swept, "failed orphaned pending reservations from a previous run");
    }

    let ledger = Arc::new(PgNotificationLedger::new(store.clone()));
    let throttle = Arc::new(PgAlertThrottle::new(store.clone()));
    let messenger = Arc::new(TelegramNotifier::new(
        &config.telegram.api_url,
        &config.telegram.bot_token,
    ));
    let converter = Arc::new(CurrencyConverter::new(
        Arc::new(AwesomeApiRates::new(&config.currency.rates_url)),
        Duration::from_secs(config.currency.rate_ttl_secs),
    ));
    let directory = Arc::new(PostgresDirectory::new(store.pool().clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        &config,
        ledger,
        throttle,
        messenger,
        converter,
    ));

    let state = AppState::new(dispatcher, directory);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "webhook listener started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(%err, "failed to install shutdown handler");
        return;
    }
    // In-flight coalescing buckets are dropped on shutdown; the terminal
    // redelivers and the ledger frees unresolved pending rows for retry
    warn!("shutdown signal received, draining");
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},tradegram=debug,sqlx=warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
