pub mod coalescer;
pub mod currency;
pub mod dispatcher;
pub mod ledger;
pub mod throttle;

pub use coalescer::{AggregateSink, BucketFlush, Coalescer};
pub use currency::CurrencyConverter;
pub use dispatcher::{DispatchOutcome, Dispatcher, FlushSink};
pub use ledger::{NotificationLedger, PgNotificationLedger};
pub use throttle::{AlertThrottle, PgAlertThrottle};
