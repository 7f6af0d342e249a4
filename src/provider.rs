//! Upstream price provider (CoinGecko public API).
//!
//! Used by import jobs that seed the document store, not by the refresh
//! controller. The client is blocking; do not create or drop it inside an
//! async runtime.

use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

use crate::config;
use crate::error::{MirrorError, Result};
use crate::models::{Series, TimePoint};

pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            base_url: config::COINGECKO_BASE.to_string(),
        })
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Current spot price of `coin_id` (e.g. `"bitcoin"`) in `vs` (e.g. `"usd"`).
    ///
    /// Returns `None` when the provider does not quote the pair.
    pub fn current_price(&self, coin_id: &str, vs: &str) -> Result<Option<f64>> {
        let url = format!("{}/simple/price", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("ids", coin_id), ("vs_currencies", vs)])
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MirrorError::RemoteFetch(format!(
                "current price error: {} {}",
                coin_id, status
            )));
        }
        let body: Value = resp.json()?;
        Ok(body
            .get(coin_id)
            .and_then(|quotes| quotes.get(vs))
            .and_then(Value::as_f64))
    }

    /// Historical closes of `coin_id` over the last `days` days.
    ///
    /// `interval` is passed through (`"hourly"`, `"daily"`); the provider
    /// picks its own granularity when it is empty.
    pub fn market_chart(&self, coin_id: &str, vs: &str, days: u32, interval: &str) -> Result<Series> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, coin_id);
        let days = days.to_string();
        let mut params = vec![("vs_currency", vs), ("days", days.as_str())];
        if !interval.is_empty() {
            params.push(("interval", interval));
        }

        tracing::debug!(coin_id, days = %days, interval, "fetching market chart");
        let resp = self.client.get(&url).query(&params).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MirrorError::RemoteFetch(format!(
                "market chart error: {} {}",
                coin_id, status
            )));
        }
        let body: Value = resp.json()?;
        Ok(chart_points(&body))
    }
}

/// Convert a `market_chart` body (`{"prices": [[ms, price], ...]}`) into a series.
///
/// Pairs with a bad timestamp or a non-numeric price are dropped.
pub fn chart_points(body: &Value) -> Series {
    let points = body
        .get("prices")
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| {
                    let pair = pair.as_array()?;
                    let ms = pair.first()?.as_f64()? as i64;
                    let price = pair.get(1)?.as_f64()?;
                    let time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)?;
                    TimePoint::new(time, price).ok()
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Series::from_unsorted(points)
}
