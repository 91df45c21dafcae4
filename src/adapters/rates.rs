//! Live exchange-rate source (AwesomeAPI)

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, TradegramError};

/// Currency-rate collaborator: one quote lookup, nothing else
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current `from` -> `to` conversion rate
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<Decimal>;
}

/// AwesomeAPI quote client
///
/// `GET {base}/last/USD-BRL` answers `{"USDBRL": {"bid": "5.43", ...}}`;
/// the bid side is taken as the conversion rate.
#[derive(Clone)]
pub struct AwesomeApiRates {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct Quote {
    bid: String,
}

impl AwesomeApiRates {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RateSource for AwesomeApiRates {
    async fn fetch_rate(&self, from: &str, to: &str) -> Result<Decimal> {
        let url = format!("{}/last/{}-{}", self.base_url, from, to);
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let quotes: HashMap<String, Quote> = resp.json().await?;

        let pair = format!("{from}{to}");
        let quote = quotes.get(&pair).ok_or_else(|| TradegramError::RateUnavailable {
            from: from.to_string(),
            to: to.to_string(),
        })?;

        let rate: Decimal = quote
            .bid
            .parse()
            .map_err(|_| TradegramError::InvalidRate(quote.bid.clone()))?;

        debug!(%from, %to, %rate, "fetched live exchange rate");
        Ok(rate)
    }
}
