//! Polling fallback client.
//!
//! Per-token top-of-book, midpoint and price reads, a batch books
//! endpoint, and a server-time probe. Used for monitor bootstrap and
//! when the stream client reports a reconnect storm.

use crate::error::{ClobError, ClobResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Per-request timeout for polling reads.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// One price level from a polled book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

/// Full top-of-book for one token from the polling endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WireBook {
    #[serde(default)]
    pub market: Option<String>,
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
struct BookParams<'a> {
    token_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    mid: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
}

/// Polling fallback client.
pub struct PollingClient {
    client: Client,
    base_url: String,
}

impl PollingClient {
    pub fn new(base_url: impl Into<String>) -> ClobResult<Self> {
        let client = Client::builder()
            .timeout(POLL_TIMEOUT)
            .build()
            .map_err(|e| ClobError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch the full top-of-book for one token.
    pub async fn fetch_book(&self, token_id: &str) -> ClobResult<WireBook> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        self.get_json(&url).await
    }

    /// Fetch books for several tokens in one request.
    pub async fn fetch_books(&self, token_ids: &[String]) -> ClobResult<Vec<WireBook>> {
        let url = format!("{}/books", self.base_url);
        let params: Vec<BookParams<'_>> = token_ids
            .iter()
            .map(|id| BookParams { token_id: id })
            .collect();

        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| ClobError::HttpClient(format!("books request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClobError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClobError::HttpClient(format!("books decode failed: {e}")))
    }

    /// Fetch the midpoint for one token, as the wire decimal string.
    pub async fn fetch_midpoint(&self, token_id: &str) -> ClobResult<String> {
        let url = format!("{}/midpoint?token_id={}", self.base_url, token_id);
        let mid: MidpointResponse = self.get_json(&url).await?;
        Ok(mid.mid)
    }

    /// Fetch the best price for one token and side ("BUY"/"SELL").
    pub async fn fetch_price(&self, token_id: &str, side: &str) -> ClobResult<String> {
        let url = format!(
            "{}/price?token_id={}&side={}",
            self.base_url, token_id, side
        );
        let price: PriceResponse = self.get_json(&url).await?;
        Ok(price.price)
    }

    /// Fetch the server's unix time, for clock-skew detection.
    pub async fn fetch_server_time(&self) -> ClobResult<i64> {
        let url = format!("{}/time", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClobError::HttpClient(format!("time request failed: {e}")))?;
        let text = response
            .text()
            .await
            .map_err(|e| ClobError::HttpClient(format!("time read failed: {e}")))?;
        text.trim()
            .parse::<i64>()
            .map_err(|_| ClobError::MalformedResponse(format!("server time: {text}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ClobResult<T> {
        debug!(url, "Polling read");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClobError::HttpClient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClobError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClobError::HttpClient(format!("decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_book_parses() {
        let book: WireBook = serde_json::from_value(json!({
            "market": "0xdeadbeef",
            "asset_id": "7045",
            "bids": [{"price": "0.44", "size": "120"}],
            "asks": [{"price": "0.46", "size": "80"}],
            "timestamp": "1767225600123"
        }))
        .unwrap();
        assert_eq!(book.asset_id, "7045");
        assert_eq!(book.bids[0].price, "0.44");
    }

    #[test]
    fn test_book_params_shape() {
        let params = vec![BookParams { token_id: "123" }];
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json[0]["token_id"], "123");
    }

    #[test]
    fn test_midpoint_response_parses() {
        let mid: MidpointResponse = serde_json::from_value(json!({"mid": "0.455"})).unwrap();
        assert_eq!(mid.mid, "0.455");
    }
}
