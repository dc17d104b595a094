//! Payout service client.
//!
//! The payout service is a black box reached over HTTP. Transport
//! errors, non-2xx statuses, `success: false` and a success reply with
//! no signature all collapse into one failure type carrying the most
//! specific message available; the caller decides whether and where to
//! record it.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PayoutError(pub String);

#[async_trait]
pub trait PayoutService: Send + Sync {
    /// Send `amount` SOL to `wallet_address`, returning the transaction
    /// signature.
    async fn send_payout(&self, wallet_address: &str, amount: f64)
        -> Result<String, PayoutError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayoutRequest<'a> {
    wallet_address: &'a str,
    amount: f64,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    success: bool,
    signature: Option<String>,
    error: Option<String>,
}

/// Stand-in wired when no payout service is configured: every payout
/// fails cleanly, winners stay pending and retryable.
pub struct DisabledPayout;

#[async_trait]
impl PayoutService for DisabledPayout {
    async fn send_payout(
        &self,
        _wallet_address: &str,
        _amount: f64,
    ) -> Result<String, PayoutError> {
        Err(PayoutError(
            "payout service is not configured (set PAYOUT_SERVICE_URL)".to_string(),
        ))
    }
}

pub struct HttpPayoutClient {
    client: Client,
    url: String,
}

impl HttpPayoutClient {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("lottery-ledger/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building payout HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl PayoutService for HttpPayoutClient {
    async fn send_payout(
        &self,
        wallet_address: &str,
        amount: f64,
    ) -> Result<String, PayoutError> {
        info!("requesting payout of {} SOL to {}", amount, wallet_address);

        let response = self
            .client
            .post(&self.url)
            .json(&PayoutRequest {
                wallet_address,
                amount,
            })
            .send()
            .await
            .map_err(|err| PayoutError(format!("payout request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(PayoutError(format!(
                "payout service returned {}",
                response.status()
            )));
        }

        let body: PayoutResponse = response
            .json()
            .await
            .map_err(|err| PayoutError(format!("undecodable payout response: {err}")))?;

        if !body.success {
            return Err(PayoutError(body.error.unwrap_or_else(|| {
                "payout failed without an error message".to_string()
            })));
        }
        body.signature
            .ok_or_else(|| PayoutError("payout succeeded without a signature".to_string()))
    }
}
