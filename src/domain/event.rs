use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeOrigin;

/// Trade lifecycle phase carried by the webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradePhase {
    Opened,
    Closed,
}

impl std::fmt::Display for TradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradePhase::Opened => write!(f, "opened"),
            TradePhase::Closed => write!(f, "closed"),
        }
    }
}

/// Trade direction (terminal sends "BUY"/"SELL")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Buy => write!(f, "BUY"),
            TradeDirection::Sell => write!(f, "SELL"),
        }
    }
}

/// One normalized trading event, built per webhook call and never stored verbatim
#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub user_id: i64,
    pub account_number: String,
    /// Upstream trade identifier, unique per account+broker
    pub ticket: String,
    pub phase: TradePhase,
    pub symbol: String,
    pub direction: TradeDirection,
    pub volume: Decimal,
    /// Signed; present once the trade has closed
    pub profit: Option<Decimal>,
    pub origin: TradeOrigin,
    pub occurred_at: DateTime<Utc>,
}

impl TradeEvent {
    /// Provider name when this event is a copy-trade follow
    pub fn provider(&self) -> Option<&str> {
        match &self.origin {
            TradeOrigin::Copy { provider } => Some(provider),
            TradeOrigin::Manual => None,
        }
    }

    pub fn is_copy_trade(&self) -> bool {
        matches!(self.origin, TradeOrigin::Copy { .. })
    }

    /// Bucket key: events with equal keys are the same market move
    /// fanned out across follower accounts.
    pub fn coalesce_key(&self) -> Option<CoalesceKey> {
        let provider = self.provider()?;
        Some(CoalesceKey {
            user_id: self.user_id,
            provider: provider.to_string(),
            symbol: self.symbol.clone(),
            direction: self.direction,
            phase: self.phase,
        })
    }
}

/// Identifies a coalescing bucket: same user, provider, symbol, direction, phase
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalesceKey {
    pub user_id: i64,
    pub provider: String,
    pub symbol: String,
    pub direction: TradeDirection,
    pub phase: TradePhase,
}

impl std::fmt::Display for CoalesceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.user_id, self.provider, self.symbol, self.direction, self.phase
        )
    }
}

/// Fixed enumeration of user-facing notification classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TradeOpened,
    TradeClosedTp,
    TradeClosedSl,
    CopyTradeOpened,
    CopyTradeClosed,
    DrawdownAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TradeOpened => "trade_opened",
            NotificationKind::TradeClosedTp => "trade_closed_tp",
            NotificationKind::TradeClosedSl => "trade_closed_sl",
            NotificationKind::CopyTradeOpened => "copy_trade_opened",
            NotificationKind::CopyTradeClosed => "copy_trade_closed",
            NotificationKind::DrawdownAlert => "drawdown_alert",
        }
    }

    /// Copy-trade kinds are merged across follower accounts before sending
    pub fn is_coalescible(&self) -> bool {
        matches!(
            self,
            NotificationKind::CopyTradeOpened | NotificationKind::CopyTradeClosed
        )
    }

    /// Classify from event shape: phase, origin and profit sign.
    /// A closed manual trade maps to take-profit or stop-loss by the sign
    /// of its realized profit.
    pub fn classify(event: &TradeEvent) -> Self {
        match (event.phase, event.is_copy_trade()) {
            (TradePhase::Opened, false) => NotificationKind::TradeOpened,
            (TradePhase::Opened, true) => NotificationKind::CopyTradeOpened,
            (TradePhase::Closed, true) => NotificationKind::CopyTradeClosed,
            (TradePhase::Closed, false) => {
                let profit = event.profit.unwrap_or_default();
                if profit > Decimal::ZERO {
                    NotificationKind::TradeClosedTp
                } else {
                    NotificationKind::TradeClosedSl
                }
            }
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a notification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Reserved, send in flight
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

/// Drawdown alert classes, throttled per user/account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Single-account drawdown
    Individual,
    /// Account-group drawdown
    Consolidated,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Individual => "individual",
            AlertKind::Consolidated => "consolidated",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Profit contributed by one follower account to an aggregate
#[derive(Debug, Clone, Serialize)]
pub struct AccountProfit {
    pub account_number: String,
    pub profit: Decimal,
}

/// Merged view of a coalescing bucket, handed to the dispatcher on flush
#[derive(Debug, Clone)]
pub struct TradeAggregate {
    pub key: CoalesceKey,
    /// Distinct contributing accounts, in arrival order
    pub accounts: Vec<String>,
    /// Per-account profits (close phase)
    pub account_profits: Vec<AccountProfit>,
    pub total_profit: Decimal,
    /// Summed volume (open phase)
    pub total_volume: Decimal,
    /// Tickets backing each contribution, aligned with `accounts`
    pub tickets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeOrigin;
    use rust_decimal_macros::dec;

    fn event(phase: TradePhase, origin: TradeOrigin, profit: Option<Decimal>) -> TradeEvent {
        TradeEvent {
            user_id: 7,
            account_number: "101".to_string(),
            ticket: "T1".to_string(),
            phase,
            symbol: "EURUSD".to_string(),
            direction: TradeDirection::Sell,
            volume: dec!(0.10),
            profit,
            origin,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn classify_manual_open() {
        let e = event(TradePhase::Opened, TradeOrigin::Manual, None);
        assert_eq!(NotificationKind::classify(&e), NotificationKind::TradeOpened);
    }

    #[test]
    fn classify_closed_by_profit_sign() {
        let win = event(TradePhase::Closed, TradeOrigin::Manual, Some(dec!(12.5)));
        assert_eq!(
            NotificationKind::classify(&win),
            NotificationKind::TradeClosedTp
        );

        let loss = event(TradePhase::Closed, TradeOrigin::Manual, Some(dec!(-25)));
        assert_eq!(
            NotificationKind::classify(&loss),
            NotificationKind::TradeClosedSl
        );

        // Missing profit on a closed trade reads as a non-positive close
        let flat = event(TradePhase::Closed, TradeOrigin::Manual, None);
        assert_eq!(
            NotificationKind::classify(&flat),
            NotificationKind::TradeClosedSl
        );
    }

    #[test]
    fn classify_copy_trades() {
        let origin = TradeOrigin::Copy {
            provider: "Alpha".to_string(),
        };
        let open = event(TradePhase::Opened, origin.clone(), None);
        assert_eq!(
            NotificationKind::classify(&open),
            NotificationKind::CopyTradeOpened
        );
        assert!(NotificationKind::classify(&open).is_coalescible());

        let close = event(TradePhase::Closed, origin, Some(dec!(3)));
        assert_eq!(
            NotificationKind::classify(&close),
            NotificationKind::CopyTradeClosed
        );
    }

    #[test]
    fn coalesce_key_requires_provider() {
        let manual = event(TradePhase::Opened, TradeOrigin::Manual, None);
        assert!(manual.coalesce_key().is_none());

        let copy = event(
            TradePhase::Opened,
            TradeOrigin::Copy {
                provider: "Alpha".to_string(),
            },
            None,
        );
        let key = copy.coalesce_key().unwrap();
        assert_eq!(key.provider, "Alpha");
        assert_eq!(key.phase, TradePhase::Opened);
    }
}
