//! Binance spot ticker poller
//!
//! Polls `GET <api>?symbol=<symbol>` and writes the last trade price into the
//! store, where the game engine reads it as the reference price.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::game::logic::is_valid_price;
use crate::store::GuessStore;

/// `/api/v3/ticker/price` payload. Binance sends the price as a string.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

pub struct BinancePricePoller {
    client: Client,
    api_url: String,
    symbol: String,
    store: Arc<dyn GuessStore>,
}

impl BinancePricePoller {
    pub fn new(api_url: String, symbol: String, store: Arc<dyn GuessStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_url,
            symbol,
            store,
        })
    }

    pub async fn fetch_price(&self) -> Result<f64> {
        let body = self
            .client
            .get(&self.api_url)
            .query(&[("symbol", self.symbol.as_str())])
            .send()
            .await
            .context("ticker request failed")?
            .error_for_status()
            .context("ticker request rejected")?
            .text()
            .await
            .context("failed to read ticker response")?;

        parse_ticker(&body, &self.symbol)
    }

    /// Fetch once and store the price if it is usable.
    pub async fn poll_once(&self) -> Result<f64> {
        let price = self.fetch_price().await?;
        self.store
            .record_price(price)
            .await
            .context("failed to record price")?;
        Ok(price)
    }
}

fn parse_ticker(body: &str, expected_symbol: &str) -> Result<f64> {
    let ticker: TickerPrice =
        serde_json::from_str(body).context("failed to parse ticker response")?;

    if !ticker.symbol.eq_ignore_ascii_case(expected_symbol) {
        return Err(anyhow!(
            "ticker symbol mismatch: expected {}, got {}",
            expected_symbol,
            ticker.symbol
        ));
    }

    let price: f64 = ticker
        .price
        .trim()
        .parse()
        .with_context(|| format!("invalid ticker price {:?}", ticker.price))?;

    if !is_valid_price(price) {
        return Err(anyhow!("ticker price out of range: {}", price));
    }
    Ok(price)
}

pub async fn spawn_price_poller(poller: Arc<BinancePricePoller>, poll_interval_ms: u64) {
    info!(
        symbol = %poller.symbol,
        interval_ms = poll_interval_ms,
        "📈 Price poller started"
    );

    loop {
        match poller.poll_once().await {
            Ok(price) => debug!(symbol = %poller.symbol, price, "reference price updated"),
            Err(e) => warn!(symbol = %poller.symbol, error = %e, "price poll failed"),
        }

        tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
    }
}
