//! Market catalog client.
//!
//! Pages through the catalog endpoint and filters for the windowed
//! markets the rotation loop cares about. Token ids are 60+ digit
//! decimal strings and round-trip as strings only.

use crate::error::{ClobError, ClobResult};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Cursor value marking the end of pagination.
const CURSOR_END: &str = "LTE=";

/// Default timeout for catalog requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One outcome token in a catalog record.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogToken {
    #[serde(alias = "tokenId")]
    pub token_id: String,
    pub outcome: String,
}

/// One market record from the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogMarket {
    #[serde(alias = "conditionId")]
    pub condition_id: String,
    #[serde(default, alias = "marketSlug")]
    pub market_slug: String,
    /// Ordered pair: first is the YES-equivalent, second the NO.
    pub tokens: Vec<CatalogToken>,
    #[serde(
        alias = "minimumTickSize",
        deserialize_with = "decimal_from_number_or_string"
    )]
    pub minimum_tick_size: Decimal,
    #[serde(default, alias = "endDateIso")]
    pub end_date_iso: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, alias = "acceptingOrders")]
    pub accepting_orders: bool,
}

impl CatalogMarket {
    /// Whether this market is live for observation.
    pub fn is_observable(&self) -> bool {
        self.active && self.accepting_orders && self.tokens.len() == 2
    }
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Client for the market catalog endpoint.
pub struct CatalogClient {
    client: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: impl Into<String>) -> ClobResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ClobError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch every catalog page and return the records whose slug
    /// contains `slug_pattern`.
    ///
    /// Individual records that fail to parse are skipped and counted,
    /// never fatal: one malformed listing must not blind discovery.
    pub async fn fetch_markets(&self, slug_pattern: &str) -> ClobResult<Vec<CatalogMarket>> {
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;
        let mut skipped = 0usize;

        loop {
            let mut url = format!("{}/markets", self.base_url);
            if let Some(c) = &cursor {
                url = format!("{url}?next_cursor={c}");
            }

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ClobError::HttpClient(format!("catalog request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClobError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let page: CatalogPage = response
                .json()
                .await
                .map_err(|e| ClobError::HttpClient(format!("catalog decode failed: {e}")))?;

            let page_len = page.data.len();
            for record in page.data {
                let slug = record
                    .get("market_slug")
                    .or_else(|| record.get("marketSlug"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if !slug.contains(slug_pattern) {
                    continue;
                }
                match serde_json::from_value::<CatalogMarket>(record) {
                    Ok(market) => markets.push(market),
                    Err(e) => {
                        debug!(error = %e, slug, "Skipping unparseable catalog record");
                        skipped += 1;
                    }
                }
            }

            match page.next_cursor {
                Some(next) if next != CURSOR_END && page_len > 0 => cursor = Some(next),
                _ => break,
            }
        }

        info!(
            matched = markets.len(),
            skipped,
            pattern = slug_pattern,
            "Fetched market catalog"
        );
        Ok(markets)
    }
}

/// The catalog serves tick sizes as JSON numbers; decode through the
/// number's literal text so the value stays exact.
fn decimal_from_number_or_string<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => {
            Decimal::from_str(&s).map_err(serde::de::Error::custom)
        }
        serde_json::Value::Number(n) => {
            Decimal::from_str(&n.to_string()).map_err(serde::de::Error::custom)
        }
        other => Err(serde::de::Error::custom(format!(
            "expected tick size number or string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn record() -> serde_json::Value {
        json!({
            "condition_id": "0xdeadbeef",
            "market_slug": "btc-updown-15m-1767226500",
            "tokens": [
                {"token_id": "11111111111111111111111111111111111111111111111111111111111101", "outcome": "Up"},
                {"token_id": "11111111111111111111111111111111111111111111111111111111111102", "outcome": "Down"}
            ],
            "minimum_tick_size": 0.01,
            "end_date_iso": "2026-01-01T00:15:00Z",
            "active": true,
            "accepting_orders": true
        })
    }

    #[test]
    fn test_catalog_market_parses() {
        let market: CatalogMarket = serde_json::from_value(record()).unwrap();
        assert_eq!(market.condition_id, "0xdeadbeef");
        assert_eq!(market.minimum_tick_size, dec!(0.01));
        assert_eq!(market.tokens[0].outcome, "Up");
        assert!(market.is_observable());
    }

    #[test]
    fn test_token_ids_survive_as_strings() {
        let market: CatalogMarket = serde_json::from_value(record()).unwrap();
        assert_eq!(market.tokens[0].token_id.len(), 62);
        assert!(market.tokens[0].token_id.ends_with("01"));
    }

    #[test]
    fn test_tick_size_from_string() {
        let mut rec = record();
        rec["minimum_tick_size"] = json!("0.01");
        let market: CatalogMarket = serde_json::from_value(rec).unwrap();
        assert_eq!(market.minimum_tick_size, dec!(0.01));
    }

    #[test]
    fn test_inactive_market_not_observable() {
        let mut rec = record();
        rec["accepting_orders"] = json!(false);
        let market: CatalogMarket = serde_json::from_value(rec).unwrap();
        assert!(!market.is_observable());
    }

    #[test]
    fn test_camel_case_aliases() {
        let rec = json!({
            "conditionId": "0xfeed",
            "marketSlug": "eth-updown-15m-1767226500",
            "tokens": [
                {"tokenId": "1", "outcome": "Up"},
                {"tokenId": "2", "outcome": "Down"}
            ],
            "minimumTickSize": "0.01",
            "active": true,
            "acceptingOrders": true
        });
        let market: CatalogMarket = serde_json::from_value(rec).unwrap();
        assert_eq!(market.condition_id, "0xfeed");
        assert!(market.is_observable());
    }
}
