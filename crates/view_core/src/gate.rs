//! Over-limit gating for the projects view: a blocking modal the first time
//! in a day, a dismissible banner afterwards.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::error::FetchFailure;
use storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    limits::{
        get_all_exceeding_limits, get_plan_interval, plan_limits, ExceedingLimits, PlanInterval,
        PlanLimits, UsageLimit,
    },
    UsageApi,
};

pub const OVER_LIMITS_MARKER: &str = "overLimitsMarker";
const MARKER_VALUE: &str = "true";

fn marker_lifetime() -> Duration {
    Duration::days(1)
}

#[async_trait]
pub trait SuppressionMarkerStore: Send + Sync {
    /// Value of a live marker; expired markers read as absent.
    async fn read_marker(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>>;
    async fn write_marker(&self, name: &str, value: &str, expires_at: DateTime<Utc>) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryMarkerStore {
    markers: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuppressionMarkerStore for InMemoryMarkerStore {
    async fn read_marker(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let mut markers = self.markers.lock().await;
        match markers.get(name) {
            Some((_, expires_at)) if *expires_at <= now => {
                markers.remove(name);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn write_marker(&self, name: &str, value: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.markers
            .lock()
            .await
            .insert(name.to_string(), (value.to_string(), expires_at));
        Ok(())
    }
}

#[async_trait]
impl SuppressionMarkerStore for Storage {
    async fn read_marker(&self, name: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        Ok(self.marker(name, now).await?.map(|marker| marker.value))
    }

    async fn write_marker(&self, name: &str, value: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.set_marker(name, value, expires_at).await
    }
}

/// What the view should show after a mount or a user action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateDecision {
    pub show_modal: bool,
    pub show_exceeded_banner: bool,
    pub show_warning_banner: bool,
    pub interval: PlanInterval,
    pub limits: ExceedingLimits,
}

#[derive(Default)]
struct GateState {
    decision: GateDecision,
    // Session scoped: survives remounts of the same gate.
    banner_dismissed: bool,
}

pub struct LimitGate {
    usage_api: Arc<dyn UsageApi>,
    markers: Arc<dyn SuppressionMarkerStore>,
    organization_id: Option<String>,
    fallback_limits: PlanLimits,
    billing_enabled: bool,
    state: Mutex<GateState>,
}

impl LimitGate {
    pub fn new(usage_api: Arc<dyn UsageApi>, markers: Arc<dyn SuppressionMarkerStore>) -> Self {
        Self {
            usage_api,
            markers,
            organization_id: None,
            fallback_limits: PlanLimits::unlimited(),
            billing_enabled: true,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn with_billing_enabled(mut self, billing_enabled: bool) -> Self {
        self.billing_enabled = billing_enabled;
        self
    }

    pub fn with_organization(mut self, organization_id: Option<String>) -> Self {
        self.organization_id = organization_id;
        self
    }

    /// Limits applied when the account has no subscription.
    pub fn with_fallback_limits(mut self, limits: PlanLimits) -> Self {
        self.fallback_limits = limits;
        self
    }

    /// Fetches usage and the subscription, recomputes the limit lists and
    /// applies the mount policy.
    pub async fn on_mount(&self, now: DateTime<Utc>) -> Result<GateDecision, FetchFailure> {
        let usage = self
            .usage_api
            .fetch_usage(self.organization_id.as_deref())
            .await?;
        let subscription = match self.usage_api.fetch_subscription().await {
            Ok(subscription) => subscription,
            Err(failure) => {
                warn!("gate: subscription unavailable, using fallback limits: {failure}");
                None
            }
        };

        let interval = get_plan_interval(subscription.as_ref());
        let limits = plan_limits(subscription.as_ref(), self.fallback_limits);
        let exceeding = get_all_exceeding_limits(&usage, &limits, interval);
        Ok(self.apply(exceeding, interval, now).await)
    }

    /// Mount policy over already computed limits.
    pub async fn apply(
        &self,
        limits: ExceedingLimits,
        interval: PlanInterval,
        now: DateTime<Utc>,
    ) -> GateDecision {
        let mut show_modal = false;
        let mut show_exceeded_banner = false;

        if limits.is_exceeded() {
            let marker = match self.markers.read_marker(OVER_LIMITS_MARKER, now).await {
                Ok(marker) => marker,
                Err(err) => {
                    warn!("gate: failed to read marker {OVER_LIMITS_MARKER}: {err:#}");
                    None
                }
            };

            if marker.is_none() {
                let expires_at = now + marker_lifetime();
                if let Err(err) = self
                    .markers
                    .write_marker(OVER_LIMITS_MARKER, MARKER_VALUE, expires_at)
                    .await
                {
                    warn!("gate: failed to write marker {OVER_LIMITS_MARKER}: {err:#}");
                }
                show_modal = self.billing_enabled;
            }
            show_exceeded_banner = !show_modal;
        }

        let mut state = self.state.lock().await;
        if state.banner_dismissed {
            show_exceeded_banner = false;
        }
        state.decision = GateDecision {
            show_modal,
            show_exceeded_banner,
            show_warning_banner: limits.is_warning(),
            interval,
            limits,
        };
        info!(
            "gate: mounted exceeded={} warnings={} modal={} banner={} interval={}",
            state.decision.limits.exceed_list.len(),
            state.decision.limits.warning_list.len(),
            show_modal,
            show_exceeded_banner,
            interval
        );
        state.decision.clone()
    }

    /// Closes the modal; the standing exceeded banner takes over.
    pub async fn modal_dismissed(&self) -> GateDecision {
        let mut state = self.state.lock().await;
        if state.decision.show_modal {
            debug!("gate: modal dismissed");
            state.decision.show_modal = false;
            state.decision.show_exceeded_banner =
                state.decision.limits.is_exceeded() && !state.banner_dismissed;
        }
        state.decision.clone()
    }

    /// Hides the exceeded banner for the rest of the session.
    pub async fn dismiss_banner(&self) -> GateDecision {
        let mut state = self.state.lock().await;
        state.banner_dismissed = true;
        state.decision.show_exceeded_banner = false;
        state.decision.clone()
    }

    pub async fn decision(&self) -> GateDecision {
        self.state.lock().await.decision.clone()
    }

    pub async fn exceed_list(&self) -> Vec<UsageLimit> {
        self.state.lock().await.decision.limits.exceed_list.clone()
    }

    pub async fn warning_list(&self) -> Vec<UsageLimit> {
        self.state.lock().await.decision.limits.warning_list.clone()
    }
}

#[cfg(test)]
#[path = "tests/gate_tests.rs"]
mod tests;
