//! Usage limit classification against the subscribed plan.

use std::{collections::HashMap, fmt};

use shared::protocol::{SubscriptionInfo, UsageResponse};

/// Fraction of a limit at which a metric starts warning.
pub const USAGE_WARNING_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageMetric {
    Storage,
    Submission,
    AutomatedTranscription,
    MachineTranslation,
}

impl UsageMetric {
    pub const ALL: [UsageMetric; 4] = [
        UsageMetric::Storage,
        UsageMetric::Submission,
        UsageMetric::AutomatedTranscription,
        UsageMetric::MachineTranslation,
    ];

    pub fn label(self) -> &'static str {
        match self {
            UsageMetric::Storage => "storage",
            UsageMetric::Submission => "submission",
            UsageMetric::AutomatedTranscription => "automated transcription",
            UsageMetric::MachineTranslation => "machine translation",
        }
    }

    /// Product metadata key carrying the plan limit for this metric.
    pub fn metadata_key(self) -> &'static str {
        match self {
            UsageMetric::Storage => "storage_bytes_limit",
            UsageMetric::Submission => "submission_limit",
            UsageMetric::AutomatedTranscription => "nlp_seconds_limit",
            UsageMetric::MachineTranslation => "nlp_character_limit",
        }
    }
}

impl fmt::Display for UsageMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitThreshold {
    Warning,
    Exceeded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlanInterval {
    #[default]
    Month,
    Year,
}

impl PlanInterval {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "month" => Some(PlanInterval::Month),
            "year" => Some(PlanInterval::Year),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanInterval::Month => "month",
            PlanInterval::Year => "year",
        }
    }
}

impl fmt::Display for PlanInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLimit {
    pub metric: UsageMetric,
    pub threshold: LimitThreshold,
    pub plan_interval: PlanInterval,
    pub usage: u64,
    pub limit: u64,
}

/// Per-metric limits of a plan. `None` is unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanLimits {
    pub storage_bytes: Option<u64>,
    pub submissions: Option<u64>,
    pub nlp_seconds: Option<u64>,
    pub nlp_characters: Option<u64>,
}

impl PlanLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn from_metadata(metadata: &HashMap<String, String>) -> Self {
        let read = |metric: UsageMetric| {
            metadata
                .get(metric.metadata_key())
                .and_then(|raw| parse_limit(raw))
        };
        Self {
            storage_bytes: read(UsageMetric::Storage),
            submissions: read(UsageMetric::Submission),
            nlp_seconds: read(UsageMetric::AutomatedTranscription),
            nlp_characters: read(UsageMetric::MachineTranslation),
        }
    }

    pub fn limit(&self, metric: UsageMetric) -> Option<u64> {
        match metric {
            UsageMetric::Storage => self.storage_bytes,
            UsageMetric::Submission => self.submissions,
            UsageMetric::AutomatedTranscription => self.nlp_seconds,
            UsageMetric::MachineTranslation => self.nlp_characters,
        }
    }
}

fn parse_limit(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("unlimited") {
        return None;
    }
    let value: f64 = raw.parse().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value as u64)
}

/// Limits of the first subscribed product, or `fallback` without a
/// subscription.
pub fn plan_limits(subscription: Option<&SubscriptionInfo>, fallback: PlanLimits) -> PlanLimits {
    subscription
        .and_then(|subscription| subscription.items.first())
        .map(|item| PlanLimits::from_metadata(&item.price.product.metadata))
        .unwrap_or(fallback)
}

pub fn get_plan_interval(subscription: Option<&SubscriptionInfo>) -> PlanInterval {
    subscription
        .and_then(|subscription| subscription.items.first())
        .and_then(|item| item.price.recurring.as_ref())
        .and_then(|recurring| PlanInterval::parse(&recurring.interval))
        .unwrap_or_default()
}

/// The usage figure compared against `metric`'s limit.
pub fn usage_for(usage: &UsageResponse, metric: UsageMetric, interval: PlanInterval) -> u64 {
    let nlp = &usage.total_nlp_usage;
    match (metric, interval) {
        (UsageMetric::Storage, _) => usage.total_storage_bytes,
        (UsageMetric::Submission, PlanInterval::Month) => usage.total_submission_count.current_month,
        (UsageMetric::Submission, PlanInterval::Year) => usage.total_submission_count.current_year,
        (UsageMetric::AutomatedTranscription, PlanInterval::Month) => nlp.asr_seconds_current_month,
        (UsageMetric::AutomatedTranscription, PlanInterval::Year) => nlp.asr_seconds_current_year,
        (UsageMetric::MachineTranslation, PlanInterval::Month) => nlp.mt_characters_current_month,
        (UsageMetric::MachineTranslation, PlanInterval::Year) => nlp.mt_characters_current_year,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceedingLimits {
    pub exceed_list: Vec<UsageLimit>,
    pub warning_list: Vec<UsageLimit>,
}

impl ExceedingLimits {
    pub fn is_exceeded(&self) -> bool {
        !self.exceed_list.is_empty()
    }

    pub fn is_warning(&self) -> bool {
        !self.warning_list.is_empty()
    }
}

fn classify(usage: u64, limit: u64) -> Option<LimitThreshold> {
    if usage >= limit && (limit > 0 || usage > 0) {
        return Some(LimitThreshold::Exceeded);
    }
    if limit > 0 && usage as f64 >= limit as f64 * USAGE_WARNING_RATIO {
        return Some(LimitThreshold::Warning);
    }
    None
}

/// Splits every limited metric into the exceeded or warning list. A metric
/// lands in at most one of them.
pub fn get_all_exceeding_limits(
    usage: &UsageResponse,
    limits: &PlanLimits,
    interval: PlanInterval,
) -> ExceedingLimits {
    let mut outcome = ExceedingLimits::default();
    for metric in UsageMetric::ALL {
        let Some(limit) = limits.limit(metric) else {
            continue;
        };
        let used = usage_for(usage, metric, interval);
        let Some(threshold) = classify(used, limit) else {
            continue;
        };
        let entry = UsageLimit {
            metric,
            threshold,
            plan_interval: interval,
            usage: used,
            limit,
        };
        match threshold {
            LimitThreshold::Exceeded => outcome.exceed_list.push(entry),
            LimitThreshold::Warning => outcome.warning_list.push(entry),
        }
    }
    outcome
}

#[cfg(test)]
#[path = "tests/limits_tests.rs"]
mod tests;
