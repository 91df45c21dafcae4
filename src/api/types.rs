//! Wire types for the webhook surface

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{AlertKind, TradeDirection, TradePhase};

/// Inbound trade-event webhook body.
///
/// Terminals are sloppy about numeric vs string fields (tickets and account
/// numbers arrive as either), so those are normalized during deserialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEventRequest {
    pub email: String,
    #[serde(deserialize_with = "string_or_number")]
    pub account_number: String,
    #[serde(deserialize_with = "string_or_number")]
    pub ticket: String,
    pub event_type: TradePhase,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(rename = "type")]
    pub direction: TradeDirection,
    #[serde(default)]
    pub volume: Decimal,
    #[serde(default)]
    pub open_price: Option<Decimal>,
    #[serde(default)]
    pub close_price: Option<Decimal>,
    #[serde(default)]
    pub sl: Option<Decimal>,
    #[serde(default)]
    pub tp: Option<Decimal>,
    #[serde(default)]
    pub profit: Option<Decimal>,
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default)]
    pub close_time: Option<String>,
    #[serde(default)]
    pub comment: String,
}

fn default_symbol() -> String {
    "UNKNOWN".to_string()
}

/// Inbound drawdown alert body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawdownAlertRequest {
    pub email: String,
    /// Absent for account-group (consolidated) alerts
    #[serde(default)]
    pub account_number: Option<String>,
    pub alert_kind: AlertKind,
    pub drawdown_percent: Decimal,
}

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub notification_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Health probe response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: i64,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_full_body() {
        let body = r#"{
            "email": "u@example.com",
            "accountNumber": "101",
            "ticket": "T1",
            "eventType": "closed",
            "symbol": "EURUSD",
            "type": "SELL",
            "volume": 0.1,
            "profit": -25,
            "closeTime": "2024-06-01T10:00:00Z",
            "comment": "copy 42"
        }"#;
        let req: TradeEventRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.event_type, TradePhase::Closed);
        assert_eq!(req.direction, TradeDirection::Sell);
        assert_eq!(req.profit, Some(dec!(-25)));
        assert_eq!(req.comment, "copy 42");
    }

    #[test]
    fn numeric_ticket_and_account_normalize() {
        let body = r#"{
            "email": "u@example.com",
            "accountNumber": 101,
            "ticket": 987654,
            "eventType": "opened",
            "type": "BUY"
        }"#;
        let req: TradeEventRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.account_number, "101");
        assert_eq!(req.ticket, "987654");
        assert_eq!(req.symbol, "UNKNOWN");
        assert_eq!(req.volume, Decimal::ZERO);
    }

    #[test]
    fn rejects_missing_required_fields() {
        let body = r#"{ "email": "u@example.com", "eventType": "opened" }"#;
        assert!(serde_json::from_str::<TradeEventRequest>(body).is_err());
    }

    #[test]
    fn drawdown_body_with_optional_account() {
        let body = r#"{
            "email": "u@example.com",
            "alertKind": "consolidated",
            "drawdownPercent": 15.5
        }"#;
        let req: DrawdownAlertRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.alert_kind, AlertKind::Consolidated);
        assert!(req.account_number.is_none());
        assert_eq!(req.drawdown_percent, dec!(15.5));
    }

    #[test]
    fn response_omits_absent_reason() {
        let resp = WebhookResponse {
            success: true,
            notification_sent: true,
            reason: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"success":true,"notificationSent":true}"#);
    }
}
