use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ProjectRow;

/// Page envelope used by every list endpoint of the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

pub type AssetsPage = Paginated<ProjectRow>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionCounts {
    #[serde(default)]
    pub current_month: u64,
    #[serde(default)]
    pub current_year: u64,
    #[serde(default)]
    pub all_time: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NlpUsageTotals {
    #[serde(default)]
    pub asr_seconds_current_month: u64,
    #[serde(default)]
    pub mt_characters_current_month: u64,
    #[serde(default)]
    pub asr_seconds_current_year: u64,
    #[serde(default)]
    pub mt_characters_current_year: u64,
    #[serde(default)]
    pub asr_seconds_all_time: u64,
    #[serde(default)]
    pub mt_characters_all_time: u64,
}

/// Aggregated service usage for the current billing period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageResponse {
    pub current_month_start: DateTime<Utc>,
    pub current_year_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_period_end: Option<DateTime<Utc>>,
    pub total_submission_count: SubmissionCounts,
    #[serde(default)]
    pub total_storage_bytes: u64,
    pub total_nlp_usage: NlpUsageTotals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetNlpUsage {
    #[serde(default)]
    pub total_nlp_asr_seconds: u64,
    #[serde(default)]
    pub total_nlp_mt_characters: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetWithUsage {
    pub asset: String,
    pub uid: String,
    #[serde(rename = "asset__name")]
    pub asset_name: String,
    #[serde(default)]
    pub nlp_usage_current_month: AssetNlpUsage,
    #[serde(default)]
    pub nlp_usage_all_time: AssetNlpUsage,
    #[serde(default)]
    pub storage_bytes: u64,
    #[serde(default)]
    pub submission_count_current_month: u64,
    #[serde(default)]
    pub submission_count_all_time: u64,
    #[serde(default)]
    pub deployment_status: String,
}

pub type AssetUsagePage = Paginated<AssetWithUsage>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecurring {
    pub interval: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInfo {
    #[serde(default)]
    pub recurring: Option<PriceRecurring>,
    #[serde(default)]
    pub product: ProductInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub price: PriceInfo,
}

/// The parts of a billing subscription the limit calculations read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    #[serde(default)]
    pub items: Vec<SubscriptionItem>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
