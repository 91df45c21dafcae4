//! Exchange-rate cache with static fallback
//!
//! Rates are fetched lazily per pair, cached for an hour, and degrade in two
//! steps when the live source is down: a fixed table of approximate rates,
//! then identity (1.0). Conversion never fails; money display is best-effort.
//!
//! Cross pairs not quoted directly are routed through USD. The two-hop path
//! means A->B->A is not an exact identity; accepted approximation.

use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::adapters::RateSource;

const BASE_CURRENCY: &str = "USD";

/// Approximate rates used when the live source is unreachable
const FALLBACK_RATES: &[(&str, &str, Decimal)] = &[
    ("USD", "BRL", dec!(5.60)),
    ("USD", "EUR", dec!(0.92)),
    ("USD", "GBP", dec!(0.79)),
    ("USD", "JPY", dec!(149.50)),
    ("USD", "CAD", dec!(1.36)),
    ("USD", "AUD", dec!(1.53)),
    ("USD", "CHF", dec!(0.88)),
    ("USD", "CNY", dec!(7.24)),
    ("USD", "INR", dec!(83.12)),
    ("USD", "MXN", dec!(17.05)),
    ("USD", "ARS", dec!(350.00)),
    ("USD", "CLP", dec!(890.00)),
    ("USD", "COP", dec!(3900.00)),
    ("USD", "PEN", dec!(3.75)),
    ("USD", "UYU", dec!(39.50)),
    ("EUR", "USD", dec!(1.09)),
    ("GBP", "USD", dec!(1.27)),
    ("BRL", "USD", dec!(0.18)),
];

struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

/// Concurrent-read rate cache over a live source.
///
/// Many tasks may convert at once; a rate up to an hour stale is preferred
/// over serializing all callers behind one fetch.
pub struct CurrencyConverter {
    source: Arc<dyn RateSource>,
    cache: DashMap<(String, String), CachedRate>,
    ttl: Duration,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Convert `amount` between currencies. Identity when the codes match;
    /// cross pairs route through USD.
    pub async fn convert(&self, amount: Decimal, from: &str, to: &str) -> Decimal {
        if from == to {
            return amount;
        }

        if from == BASE_CURRENCY || to == BASE_CURRENCY {
            return amount * self.rate(from, to).await;
        }

        // Two hops via the base currency
        let to_base = self.rate(from, BASE_CURRENCY).await;
        let from_base = self.rate(BASE_CURRENCY, to).await;
        amount * to_base * from_base
    }

    /// Resolve one pair: fresh cache entry, then live fetch, then the
    /// fallback table, then 1.0.
    async fn rate(&self, from: &str, to: &str) -> Decimal {
        let key = (from.to_string(), to.to_string());

        if let Some(entry) = self.cache.get(&key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry.rate;
            }
        }

        match self.source.fetch_rate(from, to).await {
            Ok(rate) => {
                debug!(%from, %to, %rate, "refreshed exchange rate");
                self.cache.insert(
                    key,
                    CachedRate {
                        rate,
                        fetched_at: Instant::now(),
                    },
                );
                rate
            }
            Err(err) => {
                let fallback = lookup_fallback(from, to);
                match fallback {
                    Some(rate) => {
                        warn!(%from, %to, %err, %rate, "rate source failed, using fallback table");
                        rate
                    }
                    None => {
                        warn!(%from, %to, %err, "rate source failed with no fallback, passing amount through");
                        Decimal::ONE
                    }
                }
            }
        }
    }
}

fn lookup_fallback(from: &str, to: &str) -> Option<Decimal> {
    FALLBACK_RATES
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, rate)| *rate)
}
