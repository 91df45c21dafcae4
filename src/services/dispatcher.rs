//! Dispatch orchestration
//!
//! Per inbound event: classify, claim the ledger slot, then either buffer
//! (copy trades) or send immediately. Drawdown alerts skip the buffer and go
//! through the throttle instead. Every send attempt ends with its ledger
//! reservation resolved to sent or failed; failed never blocks a redelivery.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::adapters::{Messenger, Recipient};
use crate::config::AppConfig;
use crate::domain::{
    AlertKind, NotificationKind, NotificationStatus, TradeAggregate, TradeEvent, TradePhase,
};
use crate::error::Result;
use crate::services::coalescer::{AggregateSink, BucketFlush, Coalescer};
use crate::services::currency::CurrencyConverter;
use crate::services::ledger::NotificationLedger;
use crate::services::throttle::AlertThrottle;

/// What the webhook caller learns about one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub notification_sent: bool,
    pub reason: Option<&'static str>,
}

impl DispatchOutcome {
    fn sent() -> Self {
        Self {
            notification_sent: true,
            reason: None,
        }
    }

    /// Buffered for coalescing; the send happens on flush
    fn buffered() -> Self {
        Self {
            notification_sent: true,
            reason: Some("buffered"),
        }
    }

    fn skipped(reason: &'static str) -> Self {
        Self {
            notification_sent: false,
            reason: Some(reason),
        }
    }
}

/// Control flow hub between ledger, throttle, buffer and messenger
pub struct Dispatcher {
    ledger: Arc<dyn NotificationLedger>,
    throttle: Arc<dyn AlertThrottle>,
    messenger: Arc<dyn Messenger>,
    converter: Arc<CurrencyConverter>,
    coalescer: Coalescer,
    max_event_age: ChronoDuration,
}

impl Dispatcher {
    pub fn new(
        config: &AppConfig,
        ledger: Arc<dyn NotificationLedger>,
        throttle: Arc<dyn AlertThrottle>,
        messenger: Arc<dyn Messenger>,
        converter: Arc<CurrencyConverter>,
    ) -> Self {
        let sink = Arc::new(FlushSink {
            ledger: Arc::clone(&ledger),
            messenger: Arc::clone(&messenger),
            converter: Arc::clone(&converter),
        });
        Self {
            ledger,
            throttle,
            messenger,
            converter,
            coalescer: Coalescer::new(&config.coalescer, sink),
            max_event_age: ChronoDuration::seconds(config.server.max_event_age_secs as i64),
        }
    }

    /// Handle one trade event end to end. Always returns an outcome for the
    /// webhook response; only persistence failures bubble up as errors.
    pub async fn dispatch_trade(
        &self,
        event: TradeEvent,
        recipient: &Recipient,
    ) -> Result<DispatchOutcome> {
        // Replays of historical events (terminal restarts) are acknowledged
        // but produce no side effects
        let age = Utc::now() - event.occurred_at;
        if age > self.max_event_age {
            debug!(
                ticket = %event.ticket,
                age_secs = age.num_seconds(),
                "ignoring stale event"
            );
            return Ok(DispatchOutcome::skipped("old_event"));
        }

        let kind = NotificationKind::classify(&event);

        let Some(chat_id) = recipient.chat_id.clone() else {
            debug!(user_id = event.user_id, "no active Telegram link, skipping");
            return Ok(DispatchOutcome::skipped("telegram_inactive"));
        };

        // Read-only probe first: plain redeliveries are the common duplicate
        // and skip the insert attempt entirely
        if !self
            .ledger
            .should_send(event.user_id, &event.account_number, &event.ticket, kind)
            .await?
        {
            info!(
                ticket = %event.ticket,
                kind = kind.as_str(),
                "duplicate delivery suppressed"
            );
            return Ok(DispatchOutcome::skipped("duplicate"));
        }

        // The insert remains the authoritative duplicate check; a lost race
        // here is the normal at-least-once redelivery path, not an error
        let Some(ledger_id) = self
            .ledger
            .reserve(event.user_id, &event.account_number, &event.ticket, kind)
            .await?
        else {
            info!(
                ticket = %event.ticket,
                kind = kind.as_str(),
                "duplicate delivery suppressed"
            );
            return Ok(DispatchOutcome::skipped("duplicate"));
        };

        if kind.is_coalescible() {
            self.coalescer
                .enqueue(event, ledger_id, &chat_id, &recipient.display_currency)
                .await?;
            return Ok(DispatchOutcome::buffered());
        }

        let text = self
            .format_trade_message(&event, kind, &recipient.display_currency)
            .await;
        match self.messenger.send(&chat_id, &text).await {
            Ok(()) => {
                self.ledger
                    .resolve(ledger_id, NotificationStatus::Sent)
                    .await?;
                Ok(DispatchOutcome::sent())
            }
            Err(err) => {
                // The inbound event was valid; only the channel degraded.
                // The failed row frees the tuple for a redelivery.
                warn!(ticket = %event.ticket, %err, "notification send failed");
                self.ledger
                    .resolve(ledger_id, NotificationStatus::Failed)
                    .await?;
                Ok(DispatchOutcome::skipped("delivery_failed"))
            }
        }
    }

    /// Throttled drawdown alert: no ticket, no coalescing, rate-limited per
    /// user/account over the rolling window.
    pub async fn dispatch_drawdown(
        &self,
        recipient: &Recipient,
        account_number: Option<&str>,
        kind: AlertKind,
        drawdown_pct: Decimal,
    ) -> Result<DispatchOutcome> {
        let Some(chat_id) = recipient.chat_id.clone() else {
            return Ok(DispatchOutcome::skipped("telegram_inactive"));
        };

        if !self
            .throttle
            .can_send(recipient.user_id, account_number, kind)
            .await?
        {
            return Ok(DispatchOutcome::skipped("throttled"));
        }

        let scope = match account_number {
            Some(account) => format!("account {account}"),
            None => "all accounts".to_string(),
        };
        let text = format!(
            "\u{1f6a8} Drawdown alert ({kind})\nDrawdown reached {drawdown_pct:.2}% on {scope}"
        );

        let status = match self.messenger.send(&chat_id, &text).await {
            Ok(()) => NotificationStatus::Sent,
            Err(err) => {
                warn!(user_id = recipient.user_id, %err, "drawdown alert send failed");
                NotificationStatus::Failed
            }
        };

        self.ledger
            .record_unkeyed(
                recipient.user_id,
                account_number,
                NotificationKind::DrawdownAlert,
                status,
            )
            .await?;

        if status == NotificationStatus::Sent {
            self.throttle
                .record(recipient.user_id, account_number, kind, drawdown_pct)
                .await?;
            Ok(DispatchOutcome::sent())
        } else {
            Ok(DispatchOutcome::skipped("delivery_failed"))
        }
    }

    async fn format_trade_message(
        &self,
        event: &TradeEvent,
        kind: NotificationKind,
        display_currency: &str,
    ) -> String {
        match kind {
            NotificationKind::TradeOpened => format!(
                "\u{1f4c8} Trade opened\n{} {} {} lots\nTicket {}",
                event.symbol, event.direction, event.volume, event.ticket
            ),
            NotificationKind::TradeClosedTp | NotificationKind::TradeClosedSl => {
                let profit = event.profit.unwrap_or_default();
                let shown = self
                    .converter
                    .convert(profit, "USD", display_currency)
                    .await;
                let marker = if kind == NotificationKind::TradeClosedTp {
                    "\u{2705}"
                } else {
                    "\u{1f53b}"
                };
                format!(
                    "{marker} Trade closed\n{} {}\nProfit {}\nTicket {}",
                    event.symbol,
                    event.direction,
                    format_money(shown, display_currency),
                    event.ticket
                )
            }
            // Coalescible kinds are formatted on flush; drawdown has its own path
            _ => format!("{} {}", event.symbol, event.direction),
        }
    }
}

/// Flush side of the coalescing buffer: sends one aggregated message and
/// resolves every contributing ledger reservation with the outcome
pub struct FlushSink {
    pub(crate) ledger: Arc<dyn NotificationLedger>,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) converter: Arc<CurrencyConverter>,
}

#[async_trait]
impl AggregateSink for FlushSink {
    async fn deliver(&self, flush: BucketFlush) {
        let text = self
            .format_aggregate(&flush.aggregate, &flush.display_currency)
            .await;

        let status = match self.messenger.send(&flush.chat_id, &text).await {
            Ok(()) => NotificationStatus::Sent,
            Err(err) => {
                warn!(key = %flush.aggregate.key, %err, "aggregated send failed");
                NotificationStatus::Failed
            }
        };

        for ledger_id in flush.ledger_ids {
            if let Err(err) = self.ledger.resolve(ledger_id, status).await {
                warn!(ledger_id, %err, "failed to resolve ledger reservation");
            }
        }
    }
}

impl FlushSink {
    async fn format_aggregate(&self, agg: &TradeAggregate, display_currency: &str) -> String {
        let key = &agg.key;
        match key.phase {
            TradePhase::Opened => format!(
                "\u{1f501} Copy trade executed \u{2014} {}\n{} {} {} lots\nAccounts ({}): {}",
                key.provider,
                key.symbol,
                key.direction,
                agg.total_volume,
                agg.accounts.len(),
                agg.accounts.join(", ")
            ),
            TradePhase::Closed => {
                let total = self
                    .converter
                    .convert(agg.total_profit, "USD", display_currency)
                    .await;
                let mut lines = format!(
                    "\u{1f501} Copy trade closed \u{2014} {}\n{} {}\nTotal profit {}",
                    key.provider,
                    key.symbol,
                    key.direction,
                    format_money(total, display_currency)
                );
                for ap in &agg.account_profits {
                    let shown = self
                        .converter
                        .convert(ap.profit, "USD", display_currency)
                        .await;
                    lines.push_str(&format!(
                        "\n\u{2022} {}: {}",
                        ap.account_number,
                        format_money(shown, display_currency)
                    ));
                }
                lines
            }
        }
    }
}

fn format_money(amount: Decimal, currency: &str) -> String {
    let rounded = amount.round_dp(2);
    if rounded > Decimal::ZERO {
        format!("+{rounded} {currency}")
    } else {
        format!("{rounded} {currency}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::RateSource;
    use crate::config::{
        CoalescerConfig, CurrencyConfig, DatabaseConfig, LoggingConfig, ServerConfig,
        TelegramConfig,
    };
    use crate::domain::{TradeDirection, TradeOrigin};
    use crate::error::TradegramError;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use tokio::sync::Mutex;

    type LedgerKey = (i64, String, String, &'static str);

    #[derive(Default)]
    struct MemLedger {
        next_id: AtomicI64,
        active: Mutex<HashMap<LedgerKey, i64>>,
        statuses: Mutex<HashMap<i64, NotificationStatus>>,
        unkeyed: Mutex<Vec<(i64, NotificationStatus)>>,
        deny_probe: AtomicBool,
    }

    #[async_trait]
    impl NotificationLedger for MemLedger {
        async fn should_send(
            &self,
            user_id: i64,
            account_number: &str,
            ticket: &str,
            kind: NotificationKind,
        ) -> Result<bool> {
            if self.deny_probe.load(Ordering::SeqCst) {
                return Ok(false);
            }
            let key = (
                user_id,
                account_number.to_string(),
                ticket.to_string(),
                kind.as_str(),
            );
            Ok(!self.active.lock().await.contains_key(&key))
        }

        async fn reserve(
            &self,
            user_id: i64,
            account_number: &str,
            ticket: &str,
            kind: NotificationKind,
        ) -> Result<Option<i64>> {
            let key = (
                user_id,
                account_number.to_string(),
                ticket.to_string(),
                kind.as_str(),
            );
            let mut active = self.active.lock().await;
            if active.contains_key(&key) {
                return Ok(None);
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            active.insert(key, id);
            self.statuses
                .lock()
                .await
                .insert(id, NotificationStatus::Pending);
            Ok(Some(id))
        }

        async fn resolve(&self, id: i64, status: NotificationStatus) -> Result<()> {
            self.statuses.lock().await.insert(id, status);
            if status == NotificationStatus::Failed {
                self.active.lock().await.retain(|_, v| *v != id);
            }
            Ok(())
        }

        async fn record_unkeyed(
            &self,
            user_id: i64,
            _account_number: Option<&str>,
            _kind: NotificationKind,
            status: NotificationStatus,
        ) -> Result<()> {
            self.unkeyed.lock().await.push((user_id, status));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemThrottle {
        deny: AtomicBool,
        records: Mutex<Vec<(i64, Decimal)>>,
    }

    #[async_trait]
    impl AlertThrottle for MemThrottle {
        async fn can_send(
            &self,
            _user_id: i64,
            _account_number: Option<&str>,
            _kind: AlertKind,
        ) -> Result<bool> {
            Ok(!self.deny.load(Ordering::SeqCst))
        }

        async fn record(
            &self,
            user_id: i64,
            _account_number: Option<&str>,
            _kind: AlertKind,
            magnitude: Decimal,
        ) -> Result<()> {
            self.records.lock().await.push((user_id, magnitude));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemMessenger {
        fail: AtomicBool,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Messenger for MemMessenger {
        async fn send(&self, recipient: &str, text: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TradegramError::Delivery("channel down".to_string()));
            }
            self.sent
                .lock()
                .await
                .push((recipient.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct DownSource;

    #[async_trait]
    impl RateSource for DownSource {
        async fn fetch_rate(&self, from: &str, to: &str) -> Result<Decimal> {
            Err(TradegramError::RateUnavailable {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        ledger: Arc<MemLedger>,
        throttle: Arc<MemThrottle>,
        messenger: Arc<MemMessenger>,
    }

    fn harness() -> Harness {
        let config = AppConfig {
            server: ServerConfig {
                bind_addr: "127.0.0.1:0".to_string(),
                max_event_age_secs: 300,
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
            },
            telegram: TelegramConfig {
                bot_token: String::new(),
                api_url: String::new(),
            },
            coalescer: CoalescerConfig::default(),
            currency: CurrencyConfig::default(),
            logging: LoggingConfig::default(),
        };
        let ledger = Arc::new(MemLedger::default());
        let throttle = Arc::new(MemThrottle::default());
        let messenger = Arc::new(MemMessenger::default());
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(DownSource),
            std::time::Duration::from_secs(3_600),
        ));
        let dispatcher = Dispatcher::new(
            &config,
            ledger.clone(),
            throttle.clone(),
            messenger.clone(),
            converter,
        );
        Harness {
            dispatcher,
            ledger,
            throttle,
            messenger,
        }
    }

    fn recipient() -> Recipient {
        Recipient {
            user_id: 7,
            chat_id: Some("chat-7".to_string()),
            display_currency: "USD".to_string(),
        }
    }

    fn manual_close(ticket: &str, profit: Decimal) -> TradeEvent {
        TradeEvent {
            user_id: 7,
            account_number: "101".to_string(),
            ticket: ticket.to_string(),
            phase: TradePhase::Closed,
            symbol: "EURUSD".to_string(),
            direction: TradeDirection::Sell,
            volume: dec!(0.10),
            profit: Some(profit),
            origin: TradeOrigin::Manual,
            occurred_at: Utc::now(),
        }
    }

    fn copy_close(account: &str, ticket: &str, profit: Decimal) -> TradeEvent {
        TradeEvent {
            origin: TradeOrigin::Copy {
                provider: "ProviderX".to_string(),
            },
            account_number: account.to_string(),
            ..manual_close(ticket, profit)
        }
    }

    #[tokio::test]
    async fn manual_loss_sends_once_and_redelivery_is_suppressed() {
        let h = harness();
        let event = manual_close("T1", dec!(-25));

        let first = h
            .dispatcher
            .dispatch_trade(event.clone(), &recipient())
            .await
            .unwrap();
        assert!(first.notification_sent);
        assert_eq!(h.messenger.sent.lock().await.len(), 1);

        let second = h
            .dispatcher
            .dispatch_trade(event, &recipient())
            .await
            .unwrap();
        assert_eq!(second, DispatchOutcome::skipped("duplicate"));
        assert_eq!(h.messenger.sent.lock().await.len(), 1);

        let statuses = h.ledger.statuses.lock().await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses.values().all(|s| *s == NotificationStatus::Sent));
    }

    #[tokio::test]
    async fn duplicate_probe_short_circuits_before_reserving() {
        let h = harness();
        h.ledger.deny_probe.store(true, Ordering::SeqCst);

        let outcome = h
            .dispatcher
            .dispatch_trade(manual_close("T8", dec!(5)), &recipient())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::skipped("duplicate"));
        // The fast path answered; no reservation row was attempted
        assert!(h.ledger.statuses.lock().await.is_empty());
        assert!(h.messenger.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_frees_the_slot_for_redelivery() {
        let h = harness();
        let event = manual_close("T2", dec!(10));

        h.messenger.fail.store(true, Ordering::SeqCst);
        let first = h
            .dispatcher
            .dispatch_trade(event.clone(), &recipient())
            .await
            .unwrap();
        assert_eq!(first, DispatchOutcome::skipped("delivery_failed"));

        h.messenger.fail.store(false, Ordering::SeqCst);
        let second = h
            .dispatcher
            .dispatch_trade(event, &recipient())
            .await
            .unwrap();
        assert!(second.notification_sent);
        assert_eq!(h.messenger.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn stale_events_have_no_side_effects() {
        let h = harness();
        let mut event = manual_close("T3", dec!(5));
        event.occurred_at = Utc::now() - ChronoDuration::minutes(10);

        let outcome = h
            .dispatcher
            .dispatch_trade(event, &recipient())
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::skipped("old_event"));
        assert!(h.ledger.statuses.lock().await.is_empty());
        assert!(h.messenger.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn inactive_telegram_skips_before_reserving() {
        let h = harness();
        let mut rcpt = recipient();
        rcpt.chat_id = None;

        let outcome = h
            .dispatcher
            .dispatch_trade(manual_close("T4", dec!(1)), &rcpt)
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::skipped("telegram_inactive"));
        assert!(h.ledger.statuses.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn copy_trade_burst_yields_one_aggregated_send() {
        let h = harness();

        for (i, (account, profit)) in [("A", dec!(50)), ("B", dec!(60)), ("C", dec!(40))]
            .into_iter()
            .enumerate()
        {
            let outcome = h
                .dispatcher
                .dispatch_trade(copy_close(account, &format!("T{i}"), profit), &recipient())
                .await
                .unwrap();
            assert_eq!(outcome, DispatchOutcome::buffered());
        }

        tokio::time::sleep(std::time::Duration::from_millis(3_100)).await;

        let sent = h.messenger.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Total profit +150"));
        assert!(sent[0].1.contains("A, B, C") || sent[0].1.contains("\u{2022} A"));

        let statuses = h.ledger.statuses.lock().await;
        assert_eq!(statuses.len(), 3);
        assert!(statuses.values().all(|s| *s == NotificationStatus::Sent));
    }

    #[tokio::test]
    async fn drawdown_respects_throttle_and_records() {
        let h = harness();

        let sent = h
            .dispatcher
            .dispatch_drawdown(&recipient(), Some("101"), AlertKind::Individual, dec!(15.5))
            .await
            .unwrap();
        assert!(sent.notification_sent);
        assert_eq!(h.throttle.records.lock().await.len(), 1);
        assert_eq!(h.ledger.unkeyed.lock().await.len(), 1);

        h.throttle.deny.store(true, Ordering::SeqCst);
        let denied = h
            .dispatcher
            .dispatch_drawdown(&recipient(), Some("101"), AlertKind::Individual, dec!(18))
            .await
            .unwrap();
        assert_eq!(denied, DispatchOutcome::skipped("throttled"));
        // No send, no new audit row
        assert_eq!(h.messenger.sent.lock().await.len(), 1);
        assert_eq!(h.ledger.unkeyed.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn drawdown_send_failure_skips_throttle_record() {
        let h = harness();
        h.messenger.fail.store(true, Ordering::SeqCst);

        let outcome = h
            .dispatcher
            .dispatch_drawdown(&recipient(), None, AlertKind::Consolidated, dec!(20))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::skipped("delivery_failed"));
        // Audit row with failed status, but the throttle window is not
        // consumed by a send that never reached the user
        assert!(h.throttle.records.lock().await.is_empty());
        let unkeyed = h.ledger.unkeyed.lock().await;
        assert_eq!(unkeyed[0].1, NotificationStatus::Failed);
    }
}
