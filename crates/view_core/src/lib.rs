use async_trait::async_trait;
use shared::{
    domain::{Cursor, ProjectRow, ProjectsFilter, ProjectsOrder},
    error::FetchFailure,
    protocol::{AssetUsagePage, SubscriptionInfo, UsageResponse},
};

pub mod error;
pub mod gate;
pub mod http;
pub mod limits;
pub mod query;
pub mod selection;
pub mod store;

pub use error::ViewError;
pub use gate::{GateDecision, InMemoryMarkerStore, LimitGate, SuppressionMarkerStore};
pub use http::HttpProjectsClient;
pub use limits::{ExceedingLimits, PlanInterval, PlanLimits, UsageLimit, UsageMetric};
pub use selection::{SelectionAffordance, SelectionController};
pub use store::{
    CustomViewStore, FetchOutcome, MissingViewSettingsStore, ViewSettings, ViewSettingsStore,
    ViewSnapshot,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// One page request against the projects collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectsQuery {
    pub base_query: String,
    pub filters: Vec<ProjectsFilter>,
    pub order: Option<ProjectsOrder>,
    /// `None` asks for the first page. Only ever a cursor produced by the
    /// same filters and order.
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectsPage {
    pub rows: Vec<ProjectRow>,
    pub next_cursor: Option<Cursor>,
}

/// Remote collection the view pages through.
#[async_trait]
pub trait ProjectsApi: Send + Sync {
    async fn fetch_page(&self, query: ProjectsQuery) -> Result<ProjectsPage, FetchFailure>;
}

/// Aggregated usage and billing data the limit gate is fed from.
#[async_trait]
pub trait UsageApi: Send + Sync {
    async fn fetch_usage(&self, organization_id: Option<&str>)
        -> Result<UsageResponse, FetchFailure>;
    async fn fetch_subscription(&self) -> Result<Option<SubscriptionInfo>, FetchFailure>;
    async fn fetch_asset_usage(
        &self,
        organization_id: Option<&str>,
        page: u32,
        order: Option<&ProjectsOrder>,
    ) -> Result<AssetUsagePage, FetchFailure>;
}

/// Notifications delivered to subscribers after each committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    StateChanged { generation: u64 },
    RowsReset { generation: u64 },
    FirstLoadComplete { generation: u64 },
    Error(String),
}
