//! Rolling-window throttle for noisy alert classes
//!
//! Drawdown can flap across a threshold many times an hour without telling
//! the user anything new, so sends are capped at 2 per trailing 24 h with at
//! least 12 h between them. Independent of the notification ledger: these
//! alerts have no trade ticket to key on.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::adapters::PostgresStore;
use crate::domain::AlertKind;
use crate::error::Result;

/// Trailing window inspected per decision
const WINDOW_HOURS: i64 = 24;
/// Maximum sends inside the window
const MAX_PER_WINDOW: usize = 2;
/// Minimum spacing between consecutive sends
const MIN_SPACING_HOURS: i64 = 12;

/// Pure window decision over the in-window send timestamps, oldest first.
/// Zero sends: allow. At capacity: deny. One send: allow only after the
/// spacing interval.
pub fn window_allows(sent_at: &[DateTime<Utc>], now: DateTime<Utc>) -> bool {
    if sent_at.is_empty() {
        return true;
    }
    if sent_at.len() >= MAX_PER_WINDOW {
        return false;
    }
    let last = sent_at[sent_at.len() - 1];
    now - last >= Duration::hours(MIN_SPACING_HOURS)
}

#[async_trait]
pub trait AlertThrottle: Send + Sync {
    /// Whether a `kind` alert may go out for this user/account right now
    async fn can_send(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: AlertKind,
    ) -> Result<bool>;

    /// Record an alert send; `magnitude` is the drawdown percent
    async fn record(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: AlertKind,
        magnitude: Decimal,
    ) -> Result<()>;
}

/// Throttle backed by the `alert_throttle` table
#[derive(Clone)]
pub struct PgAlertThrottle {
    store: PostgresStore,
}

impl PgAlertThrottle {
    pub fn new(store: PostgresStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AlertThrottle for PgAlertThrottle {
    async fn can_send(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: AlertKind,
    ) -> Result<bool> {
        let now = Utc::now();
        let cutoff = now - Duration::hours(WINDOW_HOURS);
        let recent = self
            .store
            .alert_times_since(user_id, account_number, kind, cutoff)
            .await?;

        let allowed = window_allows(&recent, now);
        if !allowed {
            debug!(
                user_id,
                account = account_number.unwrap_or("<group>"),
                kind = kind.as_str(),
                in_window = recent.len(),
                "alert suppressed by throttle window"
            );
        }
        Ok(allowed)
    }

    async fn record(
        &self,
        user_id: i64,
        account_number: Option<&str>,
        kind: AlertKind,
        magnitude: Decimal,
    ) -> Result<()> {
        // percent x100, integral column (15.50% -> 1550)
        let scaled = (magnitude * Decimal::from(100))
            .round()
            .to_i32()
            .unwrap_or(i32::MAX);
        self.store
            .insert_alert(user_id, account_number, kind, scaled)
            .await?;
        Ok(())
    }
}
