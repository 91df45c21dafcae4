pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;

pub use adapters::{
    AccountDirectory, AwesomeApiRates, Messenger, PostgresDirectory, PostgresStore, RateSource,
    Recipient, TelegramNotifier,
};
pub use api::{create_router, AppState};
pub use config::AppConfig;
pub use domain::{
    AlertKind, CoalesceKey, NotificationKind, NotificationStatus, TradeAggregate, TradeDirection,
    TradeEvent, TradeOrigin, TradePhase,
};
pub use error::{Result, TradegramError};
pub use services::{
    AggregateSink, AlertThrottle, BucketFlush, Coalescer, CurrencyConverter, DispatchOutcome,
    Dispatcher, NotificationLedger, PgAlertThrottle, PgNotificationLedger,
};
