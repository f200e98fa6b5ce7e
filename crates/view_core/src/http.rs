use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{Cursor, ProjectsOrder},
    error::FetchFailure,
    fields::FieldRegistry,
    protocol::{AssetUsagePage, AssetsPage, Paginated, SubscriptionInfo, UsageResponse},
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    query::{build_search_query, ordering_param},
    ProjectsApi, ProjectsPage, ProjectsQuery, UsageApi, DEFAULT_PAGE_SIZE,
};

const ASSETS_PATH: &str = "api/v2/assets/";
const USAGE_PATH: &str = "api/v2/service_usage/";
const ASSET_USAGE_PATH: &str = "api/v2/asset_usage/";
const SUBSCRIPTIONS_PATH: &str = "api/v2/stripe/subscriptions/";

fn organization_path(organization_id: &str, leaf: &str) -> String {
    format!("api/v2/organizations/{organization_id}/{leaf}/")
}

/// reqwest-backed client for the projects and usage endpoints.
pub struct HttpProjectsClient {
    http: Client,
    server_url: Url,
    registry: Arc<FieldRegistry>,
    page_size: u32,
}

impl HttpProjectsClient {
    pub fn new(server_url: &str, registry: Arc<FieldRegistry>) -> Result<Self, url::ParseError> {
        let mut server_url = Url::parse(server_url)?;
        if !server_url.path().ends_with('/') {
            let path = format!("{}/", server_url.path());
            server_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            server_url,
            registry,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 1000);
        self
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchFailure> {
        self.server_url
            .join(path)
            .map_err(|err| FetchFailure::Transport(format!("invalid endpoint '{path}': {err}")))
    }

    /// Sends the request and decodes a JSON body, turning every failure
    /// into a [`FetchFailure`].
    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, FetchFailure> {
        let response = request
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| FetchFailure::Transport(err.to_string()))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("application/json"));

        if !status.is_success() {
            let body = if is_json {
                response.json::<Value>().await.ok()
            } else {
                None
            };
            return Err(FetchFailure::Status {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchFailure::Transport(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| FetchFailure::Decode(err.to_string()))
    }

    fn first_page_request(&self, query: &ProjectsQuery) -> Result<RequestBuilder, FetchFailure> {
        let url = self.endpoint(ASSETS_PATH)?;
        let search = build_search_query(&self.registry, &query.base_query, &query.filters);
        let mut params: Vec<(&str, String)> = Vec::with_capacity(3);
        if !search.is_empty() {
            params.push(("q", search));
        }
        params.push(("limit", self.page_size.to_string()));
        if let Some(ordering) = ordering_param(&self.registry, query.order.as_ref()) {
            params.push(("ordering", ordering));
        }
        Ok(self.http.get(url).query(&params))
    }

    fn cursor_request(&self, cursor: &Cursor) -> Result<RequestBuilder, FetchFailure> {
        // `next` links are usually absolute; relative ones resolve against the server.
        let url = self
            .server_url
            .join(cursor.as_str())
            .map_err(|err| FetchFailure::Decode(format!("invalid cursor: {err}")))?;
        Ok(self.http.get(url))
    }
}

#[async_trait]
impl ProjectsApi for HttpProjectsClient {
    async fn fetch_page(&self, query: ProjectsQuery) -> Result<ProjectsPage, FetchFailure> {
        let request = match &query.cursor {
            Some(cursor) => self.cursor_request(cursor)?,
            None => self.first_page_request(&query)?,
        };
        let page: AssetsPage = self.get_json(request).await?;
        debug!(
            "projects: page loaded rows={} count={} has_next={}",
            page.results.len(),
            page.count,
            page.next.is_some()
        );
        Ok(ProjectsPage {
            rows: page.results,
            next_cursor: page.next.map(Cursor),
        })
    }
}

#[async_trait]
impl UsageApi for HttpProjectsClient {
    async fn fetch_usage(
        &self,
        organization_id: Option<&str>,
    ) -> Result<UsageResponse, FetchFailure> {
        let url = match organization_id {
            Some(id) => self.endpoint(&organization_path(id, "service_usage"))?,
            None => self.endpoint(USAGE_PATH)?,
        };
        self.get_json(self.http.get(url)).await
    }

    async fn fetch_subscription(&self) -> Result<Option<SubscriptionInfo>, FetchFailure> {
        let url = self.endpoint(SUBSCRIPTIONS_PATH)?;
        let page: Paginated<SubscriptionInfo> = self.get_json(self.http.get(url)).await?;
        Ok(page.results.into_iter().next())
    }

    async fn fetch_asset_usage(
        &self,
        organization_id: Option<&str>,
        page: u32,
        order: Option<&ProjectsOrder>,
    ) -> Result<AssetUsagePage, FetchFailure> {
        let mut params = vec![("page", page.max(1).to_string())];
        if let Some(ordering) = ordering_param(&self.registry, order) {
            params.push(("ordering", ordering));
        }

        if let Some(id) = organization_id {
            let url = self.endpoint(&organization_path(id, "asset_usage"))?;
            match self.get_json(self.http.get(url).query(&params)).await {
                Ok(usage) => return Ok(usage),
                Err(err) => {
                    warn!("usage: organization asset usage failed org={id}, falling back: {err}");
                }
            }
        }

        let url = self.endpoint(ASSET_USAGE_PATH)?;
        self.get_json(self.http.get(url).query(&params)).await
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
