//! Historical Trades Client
//!
//! `GET {base}/v2/stocks/{symbol}/trades` against Alpaca's market data REST
//! API, used by gap repair to replay trades missed during an outage.
//! Results are requested in ascending order and capped at `limit`; only the
//! first page is read.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::application::ports::{HistoryError, TradeHistoryPort};
use crate::domain::provider::DataFeed;
use crate::domain::streaming::CanonicalTick;

use super::auth::Credentials;
use super::messages::HistoricalTradesResponse;
use super::normalize;

/// Default market data REST base URL.
pub const DEFAULT_REST_URL: &str = "https://data.alpaca.markets";

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

/// REST client for historical stock trades.
#[derive(Debug, Clone)]
pub struct AlpacaHistoryClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    feed: DataFeed,
}

impl AlpacaHistoryClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Credentials,
        feed: DataFeed,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            feed,
        }
    }

    fn trades_url(&self, symbol: &str) -> String {
        format!("{}/v2/stocks/{symbol}/trades", self.base_url)
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl TradeHistoryPort for AlpacaHistoryClient {
    async fn fetch_trades(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CanonicalTick>, HistoryError> {
        let limit = limit.to_string();
        let query = [
            ("start", rfc3339(from)),
            ("end", rfc3339(to)),
            ("limit", limit),
            ("feed", self.feed.endpoint_name().to_string()),
            ("sort", "asc".to_string()),
        ];

        tracing::debug!(symbol, from = %from, to = %to, "Fetching historical trades");

        let response = self
            .http_client
            .get(self.trades_url(symbol))
            .header(KEY_HEADER, self.credentials.key())
            .header(SECRET_HEADER, self.credentials.secret())
            .query(&query)
            .send()
            .await
            .map_err(|e| HistoryError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: HistoricalTradesResponse = response
            .json()
            .await
            .map_err(|e| HistoryError::Decode(e.to_string()))?;

        let mut ticks: Vec<CanonicalTick> = body
            .trades
            .unwrap_or_default()
            .into_iter()
            .map(|trade| normalize::trade_from_history(symbol, trade))
            .collect();
        ticks.sort_by_key(CanonicalTick::timestamp);

        Ok(ticks)
    }
}
