//! Account/user directory lookup
//!
//! Resolves a webhook's `email` + `accountNumber` into the internal user id,
//! the Telegram recipient and the user's display currency. The account and
//! bot-linking tables are owned by the wider platform; this adapter only
//! reads them.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::Result;

/// Resolved delivery target for one user/account pair
#[derive(Debug, Clone)]
pub struct Recipient {
    pub user_id: i64,
    /// Telegram chat id; `None` when the user has no active bot link,
    /// in which case the event is acknowledged without a send
    pub chat_id: Option<String>,
    /// ISO currency the user wants amounts displayed in
    pub display_currency: String,
}

/// Opaque lookup collaborator
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// `Ok(None)` means the user or account does not exist (webhook -> 404)
    async fn resolve(&self, email: &str, account_number: &str) -> Result<Option<Recipient>>;

    /// User-only lookup for account-group alerts that carry no account number
    async fn resolve_user(&self, email: &str) -> Result<Option<Recipient>>;
}

/// Directory backed by the platform's user/account tables
#[derive(Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for PostgresDirectory {
    async fn resolve(&self, email: &str, account_number: &str) -> Result<Option<Recipient>> {
        let row = sqlx::query(
            r#"
            SELECT u.id AS user_id,
                   CASE WHEN t.is_active THEN t.chat_id ELSE NULL END AS chat_id,
                   COALESCE(s.display_currency, 'USD') AS display_currency
            FROM users u
            JOIN trading_accounts a ON a.user_id = u.id AND a.account_number = $2
            LEFT JOIN telegram_users t ON t.user_id = u.id
            LEFT JOIN user_settings s ON s.user_id = u.id
            WHERE u.email = $1
            "#,
        )
        .bind(email)
        .bind(account_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Recipient {
            user_id: r.get("user_id"),
            chat_id: r.get("chat_id"),
            display_currency: r.get("display_currency"),
        }))
    }

    async fn resolve_user(&self, email: &str) -> Result<Option<Recipient>> {
        let row = sqlx::query(
            r#"
            SELECT u.id AS user_id,
                   CASE WHEN t.is_active THEN t.chat_id ELSE NULL END AS chat_id,
                   COALESCE(s.display_currency, 'USD') AS display_currency
            FROM users u
            LEFT JOIN telegram_users t ON t.user_id = u.id
            LEFT JOIN user_settings s ON s.user_id = u.id
            WHERE u.email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Recipient {
            user_id: r.get("user_id"),
            chat_id: r.get("chat_id"),
            display_currency: r.get("display_currency"),
        }))
    }
}
