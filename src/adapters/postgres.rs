use crate::domain::{AlertKind, NotificationKind, NotificationStatus};
use crate::error::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// PostgreSQL storage adapter for the notification ledger and alert throttle
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Notification ledger ====================

    /// True if no non-failed record exists for the exact idempotency tuple.
    /// Read-only fast path; `reserve_notification` is the authoritative gate.
    pub async fn should_send(
        &self,
        user_id: i64,
        account_number: &str,
        ticket: &str,
        kind: NotificationKind,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notification_history
                WHERE user_id = $1
                  AND account_number = $2
                  AND ticket = $3
                  AND notification_type = $4
                  AND status <> 'failed'
            ) AS already
            "#,
        )
        .bind(user_id)
        .bind(account_number)
        .bind(ticket)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(!row.get::<bool, _>("already"))
    }

    /// Atomically claim the send slot for an idempotency tuple.
    ///
    /// Inserts a `pending` row; the partial unique index on
    /// `(user_id, account_number, ticket, notification_type) WHERE status <>
    /// 'failed'` makes the insert itself the duplicate check, so two
    /// concurrent deliveries of the same webhook cannot both pass. A rejected
    /// insert is the normal "already sent" signal, not an error.
    pub async fn reserve_notification(
        &self,
        user_id: i64,
        account_number: &str,
        ticket: &str,
        kind: NotificationKind,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            INSERT INTO notification_history (user_id, account_number, ticket, notification_type, status)
            VALUES ($1, $2, $3, $4, 'pending')
            ON CONFLICT (user_id, account_number, ticket, notification_type)
                WHERE status <> 'failed'
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(account_number)
        .bind(ticket)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let id = row.map(|r| r.get::<i64, _>("id"));
        if id.is_none() {
            debug!(
                user_id,
                account_number,
                ticket,
                kind = kind.as_str(),
                "duplicate notification suppressed by ledger"
            );
        }
        Ok(id)
    }

    /// Resolve a reservation with its terminal outcome. A `failed` row leaves
    /// the unique index, so a later redelivery may reserve the tuple again.
    pub async fn resolve_notification(
        &self,
        id: i64,
        status: NotificationStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_history
            SET status = $2, sent_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a ticket-less audit row (drawdown alerts). Exempt from the
    /// uniqueness contract: rate control for these lives in the throttle table.
    pub async fn record_unkeyed(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: NotificationKind,
        status: NotificationStatus,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO notification_history (user_id, account_number, ticket, notification_type, status, sent_at)
            VALUES ($1, $2, NULL, $3, $4, NOW())
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(account_number)
        .bind(kind.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    /// Fail reservations orphaned by a crash mid-send. Pending rows block
    /// the unique index; without this sweep a process death between reserve
    /// and resolve would suppress redeliveries of that event forever.
    pub async fn fail_stale_pending(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - older_than;
        let result = sqlx::query(
            r#"
            UPDATE notification_history
            SET status = 'failed'
            WHERE status = 'pending' AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ==================== Alert throttle ====================

    /// Timestamps of throttled alerts for a tuple since `cutoff`, oldest first.
    /// `account_number = None` matches account-group-level rows.
    pub async fn alert_times_since(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: AlertKind,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let rows = sqlx::query(
            r#"
            SELECT sent_at FROM alert_throttle
            WHERE user_id = $1
              AND account_number IS NOT DISTINCT FROM $2
              AND alert_kind = $3
              AND sent_at >= $4
            ORDER BY sent_at ASC
            "#,
        )
        .bind(user_id)
        .bind(account_number)
        .bind(kind.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("sent_at")).collect())
    }

    /// Record a throttled alert send. Magnitude is percent scaled x100
    /// (15.50% -> 1550) to keep the column integral.
    pub async fn insert_alert(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: AlertKind,
        magnitude: i32,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO alert_throttle (user_id, account_number, alert_kind, magnitude, sent_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(account_number)
        .bind(kind.as_str())
        .bind(magnitude)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }
}
