use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::state::AppState;
use crate::api::types::{
    DrawdownAlertRequest, HealthResponse, TradeEventRequest, WebhookResponse,
};
use crate::domain::{TradeEvent, TradeOrigin, TradePhase};
use crate::error::TradegramError;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/trade-event", post(trade_event))
        .route("/api/drawdown-alert", post(drawdown_alert))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
}

/// Error wrapper mapping the engine taxonomy onto HTTP statuses.
/// Persistence failures are 503 so the upstream bridge retries; once the
/// store is back the redelivered webhook re-runs the same idempotent checks.
struct ApiError(TradegramError);

impl From<TradegramError> for ApiError {
    fn from(err: TradegramError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TradegramError::Validation(_) => StatusCode::BAD_REQUEST,
            TradegramError::UserNotFound(_) | TradegramError::AccountNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            err if err.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// POST /api/trade-event — trade opened/closed webhook from the terminal
async fn trade_event(
    State(state): State<AppState>,
    Json(req): Json<TradeEventRequest>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if req.email.is_empty() || req.account_number.is_empty() || req.ticket.is_empty() {
        return Err(TradegramError::Validation(
            "email, accountNumber and ticket are required".to_string(),
        )
        .into());
    }

    info!(
        ticket = %req.ticket,
        event = %req.event_type,
        symbol = %req.symbol,
        "trade event received"
    );

    let recipient = state
        .directory
        .resolve(&req.email, &req.account_number)
        .await?
        .ok_or_else(|| TradegramError::AccountNotFound(req.account_number.clone()))?;

    let occurred_at = event_time(&req);
    let event = TradeEvent {
        user_id: recipient.user_id,
        account_number: req.account_number,
        ticket: req.ticket,
        phase: req.event_type,
        symbol: req.symbol,
        direction: req.direction,
        volume: req.volume,
        profit: req.profit,
        origin: TradeOrigin::from_comment(&req.comment),
        occurred_at,
    };

    let outcome = state.dispatcher.dispatch_trade(event, &recipient).await?;
    Ok(Json(WebhookResponse {
        success: true,
        notification_sent: outcome.notification_sent,
        reason: outcome.reason.map(str::to_string),
    }))
}

/// POST /api/drawdown-alert — throttled alert ingress
async fn drawdown_alert(
    State(state): State<AppState>,
    Json(req): Json<DrawdownAlertRequest>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if req.email.is_empty() {
        return Err(TradegramError::Validation("email is required".to_string()).into());
    }

    let recipient = state
        .directory
        .resolve_user(&req.email)
        .await?
        .ok_or_else(|| TradegramError::UserNotFound(req.email.clone()))?;

    let outcome = state
        .dispatcher
        .dispatch_drawdown(
            &recipient,
            req.account_number.as_deref(),
            req.alert_kind,
            req.drawdown_percent,
        )
        .await?;

    Ok(Json(WebhookResponse {
        success: true,
        notification_sent: outcome.notification_sent,
        reason: outcome.reason.map(str::to_string),
    }))
}

/// GET /health — liveness probe
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// The phase decides which timestamp describes the event; unparseable or
/// missing times count as "now" rather than rejecting the webhook.
fn event_time(req: &TradeEventRequest) -> DateTime<Utc> {
    let raw = match req.event_type {
        TradePhase::Opened => req.open_time.as_deref(),
        TradePhase::Closed => req.close_time.as_deref(),
    };
    raw.and_then(parse_lenient).unwrap_or_else(Utc::now)
}

/// RFC 3339, or a bare `YYYY-MM-DDTHH:MM:SS` taken as UTC (some terminal
/// bridges omit the offset)
fn parse_lenient(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}
