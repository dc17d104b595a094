//! Types for HTTP requests and responses

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct InstanceQuery {
    pub instance: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyTicketRequest {
    pub wallet_address: String,
    pub amount: Option<f64>,
    pub purchase_signature: Option<String>,
    pub instance: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRoundRequest {
    pub round_number: u64,
    /// Window length for the fresh round; the configured default applies
    /// when absent.
    pub duration_hours: Option<i64>,
    /// Explicit close time; overrides `duration_hours`.
    pub end_time: Option<DateTime<Utc>>,
    pub instance: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPayoutRequest {
    pub round_id: String,
    pub wallet_address: String,
    pub instance: Option<String>,
}
