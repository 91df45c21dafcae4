pub mod directory;
pub mod postgres;
pub mod rates;
pub mod telegram;

pub use directory::{AccountDirectory, PostgresDirectory, Recipient};
pub use postgres::PostgresStore;
pub use rates::{AwesomeApiRates, RateSource};
pub use telegram::{Messenger, TelegramNotifier};
