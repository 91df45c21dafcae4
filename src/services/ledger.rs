//! Idempotent notification ledger
//!
//! Webhooks are delivered at-least-once; the ledger is what turns repeats
//! into no-ops. The idempotency token is `(user, account, ticket, kind)`:
//! one upstream ticket legitimately produces an "opened" and later a
//! "closed" notification, but never two of the same kind.

use async_trait::async_trait;

use crate::adapters::PostgresStore;
use crate::domain::{NotificationKind, NotificationStatus};
use crate::error::Result;

#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Read-only duplicate probe; `reserve` remains the authoritative gate
    async fn should_send(
        &self,
        user_id: i64,
        account_number: &str,
        ticket: &str,
        kind: NotificationKind,
    ) -> Result<bool>;

    /// Atomically claim the send slot. `None` means another delivery
    /// (concurrent or earlier) already holds it.
    async fn reserve(
        &self,
        user_id: i64,
        account_number: &str,
        ticket: &str,
        kind: NotificationKind,
    ) -> Result<Option<i64>>;

    /// Resolve a reservation: `Sent` is terminal and blocking, `Failed`
    /// frees the tuple for a redelivered webhook
    async fn resolve(&self, id: i64, status: NotificationStatus) -> Result<()>;

    /// Append a ticket-less audit row (drawdown alerts)
    async fn record_unkeyed(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: NotificationKind,
        status: NotificationStatus,
    ) -> Result<()>;
}

/// Ledger backed by the `notification_history` table
#[derive(Clone)]
pub struct PgNotificationLedger {
    store: PostgresStore,
}

impl PgNotificationLedger {
    pub fn new(store: PostgresStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationLedger for PgNotificationLedger {
    async fn should_send(
        &self,
        user_id: i64,
        account_number: &str,
        ticket: &str,
        kind: NotificationKind,
    ) -> Result<bool> {
        self.store
            .should_send(user_id, account_number, ticket, kind)
            .await
    }

    async fn reserve(
        &self,
        user_id: i64,
        account_number: &str,
        ticket: &str,
        kind: NotificationKind,
    ) -> Result<Option<i64>> {
        self.store
            .reserve_notification(user_id, account_number, ticket, kind)
            .await
    }

    async fn resolve(&self, id: i64, status: NotificationStatus) -> Result<()> {
        self.store.resolve_notification(id, status).await
    }

    async fn record_unkeyed(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: NotificationKind,
        status: NotificationStatus,
    ) -> Result<()> {
        self.store
            .record_unkeyed(user_id, account_number, kind, status)
            .await?;
        Ok(())
    }
}
