//! Historical fiat prices from bitcoinaverage.com, memoized in the store.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::consts::CHAINSPLIT_HEIGHT;
use crate::database::LedgerStore;
use crate::error::{CollectorError, Result};

type HmacSha256 = Hmac<Sha256>;

const BITCOINAVERAGE_URL: &str = "https://apiv2.bitcoinaverage.com";

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    average: f64,
}

pub struct ExchangeRateFetcher {
    symbol: String,
    pubkey: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    store: LedgerStore,
}

impl ExchangeRateFetcher {
    pub fn new(symbol: &str, pubkey: &str, secret: &str, store: LedgerStore) -> Self {
        Self {
            symbol: symbol.to_string(),
            pubkey: pubkey.to_string(),
            secret: secret.to_string(),
            base_url: BITCOINAVERAGE_URL.to_string(),
            client: reqwest::Client::new(),
            store,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// USD price of the coin at `timestamp`. Blocks up to the chain split
    /// have no separate price and yield `0.0`.
    pub async fn get_exchange_rate(&self, height: u64, timestamp: u64) -> Result<f64> {
        if height <= CHAINSPLIT_HEIGHT {
            return Ok(0.0);
        }

        if let Some(price) = self.store.get_price(&self.symbol, height).await? {
            return Ok(price);
        }

        tracing::debug!("No stored {} price at {}, fetching from bitcoinaverage", self.symbol, height);
        let price = self.fetch_historical(timestamp).await?;
        self.store.insert_price(&self.symbol, height, price).await?;
        Ok(price)
    }

    async fn fetch_historical(&self, timestamp: u64) -> Result<f64> {
        let url = format!(
            "{}/indices/global/history/{}USD?at={}",
            self.base_url, self.symbol, timestamp
        );
        let sig = signature(&self.pubkey, &self.secret, Utc::now().timestamp())?;

        let response = self.client.get(&url).header("X-signature", sig).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Status(status));
        }

        let body = response.text().await?;
        let data: HistoryResponse = serde_json::from_str(&body)?;
        Ok(data.average)
    }
}

/// `<unix>.<pubkey>.<hex hmac-sha256(secret, "<unix>.<pubkey>")>`
pub fn signature(pubkey: &str, secret: &str, unix: i64) -> Result<String> {
    let payload = format!("{}.{}", unix, pubkey);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| CollectorError::SigningKey)?;
    mac.update(payload.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", payload, digest))
}
