//! Event coalescing buffer
//!
//! One upstream copy trade fans out to N follower accounts and arrives as N
//! near-simultaneous webhooks. Buffering by `(user, provider, symbol,
//! direction, phase)` with a debounce timer merges the burst into a single
//! outbound message instead of N near-identical ones.
//!
//! Debounce rather than fixed-window batching: follower fills are not
//! perfectly simultaneous, so each arrival restarts the quiet period. A
//! per-bucket deadline caps the total defer so continuous arrivals cannot
//! starve the flush. Buckets are process-local; a restart drops in-flight
//! buckets, which is accepted.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::CoalescerConfig;
use crate::domain::{AccountProfit, CoalesceKey, TradeAggregate, TradeEvent, TradePhase};
use crate::error::{Result, TradegramError};

/// Everything the flush side needs to send one aggregated message
#[derive(Debug)]
pub struct BucketFlush {
    pub aggregate: TradeAggregate,
    /// Ledger reservation ids for each contributing event, to be resolved
    /// with the send outcome
    pub ledger_ids: Vec<i64>,
    pub chat_id: String,
    pub display_currency: String,
}

/// Receives flushed aggregates; the production sink sends and records,
/// tests capture in memory
#[async_trait]
pub trait AggregateSink: Send + Sync {
    async fn deliver(&self, flush: BucketFlush);
}

struct Bucket {
    entries: Vec<(TradeEvent, i64)>,
    chat_id: String,
    display_currency: String,
    /// Absolute cap on deferral: first arrival + max_defer
    deadline: Instant,
    /// Bumped on every enqueue; a timer task only flushes if its snapshot
    /// still matches, which is what makes re-arming cancel older timers
    epoch: u64,
}

struct Inner {
    debounce: Duration,
    max_defer: Duration,
    buckets: Mutex<HashMap<CoalesceKey, Bucket>>,
    /// Per-key send serialization: a flush holds its key's lock across the
    /// sink call so a following burst cannot overlap an in-flight send
    send_locks: Mutex<HashMap<CoalesceKey, Arc<Mutex<()>>>>,
    sink: Arc<dyn AggregateSink>,
}

/// In-memory, timer-driven aggregator of correlated trade events
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

impl Coalescer {
    pub fn new(config: &CoalescerConfig, sink: Arc<dyn AggregateSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                debounce: Duration::from_millis(config.debounce_ms),
                max_defer: Duration::from_millis(config.max_defer_ms),
                buckets: Mutex::new(HashMap::new()),
                send_locks: Mutex::new(HashMap::new()),
                sink,
            }),
        }
    }

    /// Append a copy-trade event to its bucket and (re)arm the debounce.
    /// Returns as soon as the bucket is updated; the send happens later on
    /// the timer task.
    pub async fn enqueue(
        &self,
        event: TradeEvent,
        ledger_id: i64,
        chat_id: &str,
        display_currency: &str,
    ) -> Result<()> {
        let key = event.coalesce_key().ok_or_else(|| {
            TradegramError::Internal("coalescer received a non-copy-trade event".to_string())
        })?;

        let now = Instant::now();
        let (epoch, fire_at) = {
            let mut buckets = self.inner.buckets.lock().await;
            let bucket = buckets.entry(key.clone()).or_insert_with(|| Bucket {
                entries: Vec::new(),
                chat_id: chat_id.to_string(),
                display_currency: display_currency.to_string(),
                deadline: now + self.inner.max_defer,
                epoch: 0,
            });

            bucket.entries.push((event, ledger_id));
            bucket.epoch += 1;

            debug!(
                key = %key,
                accounts = bucket.entries.len(),
                "buffered copy-trade event"
            );

            // Debounce, but never past the bucket's deadline
            (bucket.epoch, (now + self.inner.debounce).min(bucket.deadline))
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep_until(fire_at).await;
            inner.flush_if_current(&key, epoch).await;
        });

        Ok(())
    }
}

impl Inner {
    /// Timer callback: flush the bucket unless a later enqueue re-armed it
    async fn flush_if_current(self: &Arc<Self>, key: &CoalesceKey, epoch: u64) {
        let bucket = {
            let mut buckets = self.buckets.lock().await;
            match buckets.get(key) {
                Some(bucket) if bucket.epoch == epoch => buckets.remove(key),
                // Re-armed since this timer was set, or already flushed
                _ => return,
            }
        };

        let Some(bucket) = bucket else { return };
        let flush = build_flush(key.clone(), bucket);

        info!(
            key = %key,
            accounts = flush.aggregate.accounts.len(),
            total_profit = %flush.aggregate.total_profit,
            "flushing coalesced bucket"
        );

        // Serialize sends per key
        let send_lock = {
            let mut locks = self.send_locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = send_lock.lock().await;

        self.sink.deliver(flush).await;
        drop(guard);

        // Key churn is unbounded over the process lifetime; drop the lock
        // entry once no other flush holds it. Clones are only taken under
        // the map lock, so the count cannot race the check.
        let mut locks = self.send_locks.lock().await;
        if Arc::strong_count(&send_lock) == 2 {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn send_lock_count(&self) -> usize {
        self.send_locks.lock().await.len()
    }
}

fn build_flush(key: CoalesceKey, bucket: Bucket) -> BucketFlush {
    let mut accounts: Vec<String> = Vec::new();
    let mut account_profits = Vec::new();
    let mut tickets = Vec::new();
    let mut ledger_ids = Vec::new();
    let mut total_profit = Decimal::ZERO;
    let mut total_volume = Decimal::ZERO;

    for (event, ledger_id) in bucket.entries {
        if !accounts.contains(&event.account_number) {
            accounts.push(event.account_number.clone());
        }
        let profit = event.profit.unwrap_or_default();
        total_profit += profit;
        total_volume += event.volume;
        account_profits.push(AccountProfit {
            account_number: event.account_number.clone(),
            profit,
        });
        tickets.push(event.ticket);
        ledger_ids.push(ledger_id);
    }

    if key.phase == TradePhase::Opened && total_profit != Decimal::ZERO {
        // Terminals occasionally stamp floating profit on open events;
        // it has no meaning for the aggregate
        warn!(key = %key, "ignoring profit on open-phase bucket");
        total_profit = Decimal::ZERO;
    }

    BucketFlush {
        aggregate: TradeAggregate {
            key,
            accounts,
            account_profits,
            total_profit,
            total_volume,
            tickets,
        },
        ledger_ids,
        chat_id: bucket.chat_id,
        display_currency: bucket.display_currency,
    }
}
