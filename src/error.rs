use thiserror::Error;

/// Main error type for the notification engine
#[derive(Error, Debug)]
pub enum TradegramError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Inbound webhook errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    // Outbound delivery errors
    #[error("Message delivery failed: {0}")]
    Delivery(String),

    // Currency errors (always degraded, never surfaced to webhook callers)
    #[error("Exchange rate unavailable for {from}/{to}")]
    RateUnavailable { from: String, to: String },

    #[error("Invalid rate in response: {0}")]
    InvalidRate(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for TradegramError
pub type Result<T> = std::result::Result<T, TradegramError>;

impl TradegramError {
    /// Whether the webhook caller should retry (persistence-layer failures only).
    /// Delivery failures are absorbed: the inbound event was valid, only the
    /// downstream channel degraded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradegramError::Database(_) | TradegramError::Migration(_)
        )
    }
}
