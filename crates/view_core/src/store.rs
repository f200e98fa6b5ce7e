//! Projects custom view store: filters, visible fields, order and the
//! incrementally loaded rows of one view.

use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{AssetUid, Cursor, ProjectFieldName, ProjectRow, ProjectsFilter, ProjectsOrder, ViewUid},
    error::FetchFailure,
    fields::FieldRegistry,
};
use storage::Storage;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::{invariant_violation, ViewError},
    ProjectsApi, ProjectsQuery, ViewEvent,
};

const FETCH_ERROR_CONTEXT: &str = "Failed to load projects";

/// What a fetch did to the view.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Loaded {
        generation: u64,
        added: usize,
        duplicates: usize,
        has_more_pages: bool,
    },
    /// Nothing to do: a page is already loading or there are no more pages.
    Skipped,
    /// The response belonged to an older generation and was dropped.
    Stale { generation: u64 },
    Failed(FetchFailure),
}

/// Per-view settings that survive restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<ProjectFieldName>>,
    #[serde(default)]
    pub filters: Vec<ProjectsFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<ProjectsOrder>,
}

#[async_trait]
pub trait ViewSettingsStore: Send + Sync {
    async fn load_settings(&self, view_uid: &ViewUid) -> Result<Option<ViewSettings>>;
    async fn save_settings(&self, view_uid: &ViewUid, settings: &ViewSettings) -> Result<()>;
}

/// Settings store for views that do not persist anything.
pub struct MissingViewSettingsStore;

#[async_trait]
impl ViewSettingsStore for MissingViewSettingsStore {
    async fn load_settings(&self, _view_uid: &ViewUid) -> Result<Option<ViewSettings>> {
        Ok(None)
    }

    async fn save_settings(&self, _view_uid: &ViewUid, _settings: &ViewSettings) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ViewSettingsStore for Storage {
    async fn load_settings(&self, view_uid: &ViewUid) -> Result<Option<ViewSettings>> {
        let Some(raw) = self.view_settings(view_uid.as_str()).await? else {
            return Ok(None);
        };
        let settings = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt settings for view '{view_uid}'"))?;
        Ok(Some(settings))
    }

    async fn save_settings(&self, view_uid: &ViewUid, settings: &ViewSettings) -> Result<()> {
        let raw = serde_json::to_string(settings)?;
        self.save_view_settings(view_uid.as_str(), &raw).await
    }
}

/// Read-only copy of the view state handed to renderers and the selection
/// controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub view_uid: Option<ViewUid>,
    pub generation: u64,
    pub visible_fields: Vec<ProjectFieldName>,
    pub filters: Vec<ProjectsFilter>,
    pub order: Option<ProjectsOrder>,
    pub rows: Vec<ProjectRow>,
    pub cursor: Option<Cursor>,
    pub is_loading: bool,
    pub is_first_load_complete: bool,
}

impl ViewSnapshot {
    pub fn has_more_pages(&self) -> bool {
        self.cursor.is_some()
    }

    /// Fields with at least one filter, once each, in filter order.
    pub fn highlighted_fields(&self) -> Vec<ProjectFieldName> {
        let mut outcome = Vec::new();
        for filter in &self.filters {
            if !outcome.contains(&filter.field_name) {
                outcome.push(filter.field_name);
            }
        }
        outcome
    }

    pub fn row(&self, uid: &AssetUid) -> Option<&ProjectRow> {
        self.rows.iter().find(|row| &row.uid == uid)
    }
}

#[derive(Default)]
struct ViewState {
    view_uid: Option<ViewUid>,
    base_query: String,
    default_visible_fields: Vec<ProjectFieldName>,
    visible_fields: Vec<ProjectFieldName>,
    filters: Vec<ProjectsFilter>,
    order: Option<ProjectsOrder>,
    rows: Vec<ProjectRow>,
    // Every uid seen in this generation, including rows deleted since.
    seen_uids: HashSet<AssetUid>,
    cursor: Option<Cursor>,
    is_loading: bool,
    is_first_load_complete: bool,
    generation: u64,
}

impl ViewState {
    fn query(&self, cursor: Option<Cursor>) -> ProjectsQuery {
        ProjectsQuery {
            base_query: self.base_query.clone(),
            filters: self.filters.clone(),
            order: self.order,
            cursor,
        }
    }

    /// Starts a new query generation: drops loaded rows and the cursor and
    /// returns the first-page request for it.
    fn begin_generation(&mut self) -> (u64, ProjectsQuery) {
        self.generation += 1;
        self.rows.clear();
        self.seen_uids.clear();
        self.cursor = None;
        self.is_loading = true;
        self.is_first_load_complete = false;
        (self.generation, self.query(None))
    }

    /// Appends a page keeping the first occurrence of every uid.
    fn append_page(&mut self, rows: Vec<ProjectRow>) -> (usize, usize) {
        let mut added = 0;
        let mut duplicates = 0;
        for row in rows {
            if self.seen_uids.insert(row.uid.clone()) {
                self.rows.push(row);
                added += 1;
            } else {
                duplicates += 1;
            }
        }
        (added, duplicates)
    }

    fn settings(&self) -> ViewSettings {
        ViewSettings {
            fields: Some(self.visible_fields.clone()),
            filters: self.filters.clone(),
            order: self.order,
        }
    }

    fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot {
            view_uid: self.view_uid.clone(),
            generation: self.generation,
            visible_fields: self.visible_fields.clone(),
            filters: self.filters.clone(),
            order: self.order,
            rows: self.rows.clone(),
            cursor: self.cursor.clone(),
            is_loading: self.is_loading,
            is_first_load_complete: self.is_first_load_complete,
        }
    }
}

pub struct CustomViewStore {
    api: Arc<dyn ProjectsApi>,
    registry: Arc<FieldRegistry>,
    settings: Arc<dyn ViewSettingsStore>,
    inner: Mutex<ViewState>,
    // Serialises settings writes. Taken before `inner`, never after.
    save_lock: Mutex<()>,
    events: broadcast::Sender<ViewEvent>,
}

impl CustomViewStore {
    pub fn new(api: Arc<dyn ProjectsApi>, registry: Arc<FieldRegistry>) -> Arc<Self> {
        Self::new_with_dependencies(api, registry, Arc::new(MissingViewSettingsStore))
    }

    pub fn new_with_dependencies(
        api: Arc<dyn ProjectsApi>,
        registry: Arc<FieldRegistry>,
        settings: Arc<dyn ViewSettingsStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            api,
            registry,
            settings,
            inner: Mutex::new(ViewState::default()),
            save_lock: Mutex::new(()),
            events,
        })
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ViewSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// One-time initialisation of the view followed by its first fetch.
    /// Saved settings for `view_uid` win over the defaults.
    pub async fn set_up(
        &self,
        view_uid: ViewUid,
        base_query: impl Into<String>,
        default_visible_fields: Vec<ProjectFieldName>,
    ) -> Result<FetchOutcome, ViewError> {
        let saved = match self.settings.load_settings(&view_uid).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!("view: failed to load saved settings view={view_uid}: {err:#}");
                None
            }
        };

        let (generation, query) = {
            let mut guard = self.inner.lock().await;
            if let Some(existing) = &guard.view_uid {
                return Err(invariant_violation(format!(
                    "set_up called twice (view {existing} already set up)"
                )));
            }

            let defaults = self.sanitize_fields(default_visible_fields);
            guard.view_uid = Some(view_uid.clone());
            guard.base_query = base_query.into();
            guard.default_visible_fields = defaults.clone();
            guard.visible_fields = defaults;

            if let Some(saved) = saved {
                self.restore_settings(&mut guard, saved);
            }

            info!(
                "view: set up view={} fields={} filters={} order={:?}",
                view_uid,
                guard.visible_fields.len(),
                guard.filters.len(),
                guard.order
            );
            guard.begin_generation()
        };

        self.emit_reset(generation);
        Ok(self.run_fetch(generation, query).await)
    }

    /// Replaces the filter set and reloads from the first page.
    pub async fn set_filters(
        &self,
        filters: Vec<ProjectsFilter>,
    ) -> Result<FetchOutcome, ViewError> {
        if let Some(filter) = filters
            .iter()
            .find(|filter| self.registry.is_excluded(filter.field_name))
        {
            return Err(invariant_violation(format!(
                "filter on excluded field {}",
                filter.field_name
            )));
        }

        let (view_uid, generation, query) = {
            let mut guard = self.inner.lock().await;
            let view_uid = Self::require_set_up(&guard)?;
            guard.filters = filters;
            let (generation, query) = guard.begin_generation();
            debug!(
                "view: filters changed view={view_uid} filters={} generation={generation}",
                guard.filters.len()
            );
            (view_uid, generation, query)
        };

        self.emit_reset(generation);
        self.persist_settings(&view_uid).await;
        Ok(self.run_fetch(generation, query).await)
    }

    /// Sets the active order and reloads from the first page. Orders on
    /// fields the registry does not allow ordering by are rejected.
    pub async fn set_order(&self, order: ProjectsOrder) -> Result<FetchOutcome, ViewError> {
        if !self.registry.is_orderable(order.field_name) {
            return Err(invariant_violation(format!(
                "field {} is not orderable",
                order.field_name
            )));
        }

        let (view_uid, generation, query) = {
            let mut guard = self.inner.lock().await;
            let view_uid = Self::require_set_up(&guard)?;
            guard.order = Some(order);
            let (generation, query) = guard.begin_generation();
            debug!("view: order changed view={view_uid} order={order:?} generation={generation}");
            (view_uid, generation, query)
        };

        self.emit_reset(generation);
        self.persist_settings(&view_uid).await;
        Ok(self.run_fetch(generation, query).await)
    }

    /// Updates the visible fields. Rows are untouched: visibility is a
    /// projection, not a query parameter.
    pub async fn set_fields(&self, fields: Vec<ProjectFieldName>) -> Result<(), ViewError> {
        let fields = self.sanitize_fields(fields);
        self.update_fields(|current, _| {
            if *current == fields {
                return false;
            }
            *current = fields;
            true
        })
        .await
    }

    pub async fn reset_fields(&self) -> Result<(), ViewError> {
        self.update_fields(|current, defaults| {
            if current == defaults {
                return false;
            }
            *current = defaults.to_vec();
            true
        })
        .await
    }

    pub async fn hide_field(&self, field: ProjectFieldName) -> Result<(), ViewError> {
        self.update_fields(|current, _| {
            let before = current.len();
            current.retain(|visible| *visible != field);
            current.len() != before
        })
        .await
    }

    /// Loads the next page. A no-op while a page is loading or when the
    /// last page has been reached.
    pub async fn fetch_more_assets(&self) -> FetchOutcome {
        let (generation, query) = {
            let mut guard = self.inner.lock().await;
            if guard.is_loading {
                debug!("view: fetch more skipped, already loading generation={}", guard.generation);
                return FetchOutcome::Skipped;
            }
            let Some(cursor) = guard.cursor.clone() else {
                return FetchOutcome::Skipped;
            };
            guard.is_loading = true;
            (guard.generation, guard.query(Some(cursor)))
        };

        self.emit(ViewEvent::StateChanged { generation });
        self.run_fetch(generation, query).await
    }

    /// Refetches from the first page with the current filters and order.
    pub async fn reload(&self) -> Result<FetchOutcome, ViewError> {
        let (generation, query) = {
            let mut guard = self.inner.lock().await;
            Self::require_set_up(&guard)?;
            guard.begin_generation()
        };
        self.emit_reset(generation);
        Ok(self.run_fetch(generation, query).await)
    }

    /// Replaces a loaded row wholesale. Rows that are not loaded are ignored.
    pub async fn handle_asset_changed(&self, row: ProjectRow) -> bool {
        let generation = {
            let mut guard = self.inner.lock().await;
            let Some(position) = guard.rows.iter().position(|loaded| loaded.uid == row.uid) else {
                return false;
            };
            guard.rows[position] = row;
            guard.generation
        };
        self.emit(ViewEvent::StateChanged { generation });
        true
    }

    pub async fn handle_asset_deleted(&self, uid: &AssetUid) -> bool {
        let generation = {
            let mut guard = self.inner.lock().await;
            let before = guard.rows.len();
            guard.rows.retain(|row| &row.uid != uid);
            if guard.rows.len() == before {
                return false;
            }
            guard.generation
        };
        self.emit(ViewEvent::StateChanged { generation });
        true
    }

    async fn update_fields<F>(&self, update: F) -> Result<(), ViewError>
    where
        F: FnOnce(&mut Vec<ProjectFieldName>, &[ProjectFieldName]) -> bool,
    {
        let (view_uid, generation) = {
            let mut guard = self.inner.lock().await;
            let view_uid = Self::require_set_up(&guard)?;
            let state = &mut *guard;
            if !update(&mut state.visible_fields, &state.default_visible_fields) {
                return Ok(());
            }
            (view_uid, guard.generation)
        };

        self.emit(ViewEvent::StateChanged { generation });
        self.persist_settings(&view_uid).await;
        Ok(())
    }

    async fn run_fetch(&self, generation: u64, query: ProjectsQuery) -> FetchOutcome {
        let result = self.api.fetch_page(query).await;

        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!(
                "view: dropping stale response generation={} current={}",
                generation, guard.generation
            );
            return FetchOutcome::Stale { generation };
        }
        guard.is_loading = false;

        match result {
            Ok(page) => {
                let (added, duplicates) = guard.append_page(page.rows);
                guard.cursor = page.next_cursor;
                let first_load = !guard.is_first_load_complete;
                guard.is_first_load_complete = true;
                let has_more_pages = guard.cursor.is_some();
                let total = guard.rows.len();
                drop(guard);

                if duplicates > 0 {
                    warn!(
                        "view: ignored duplicate rows generation={generation} duplicates={duplicates}"
                    );
                }
                debug!(
                    "view: page applied generation={generation} added={added} total={total} has_more={has_more_pages}"
                );
                if first_load {
                    self.emit(ViewEvent::FirstLoadComplete { generation });
                }
                self.emit(ViewEvent::StateChanged { generation });
                FetchOutcome::Loaded {
                    generation,
                    added,
                    duplicates,
                    has_more_pages,
                }
            }
            Err(failure) => {
                drop(guard);
                warn!("view: fetch failed generation={generation}: {failure}");
                self.emit(ViewEvent::Error(failure.notification(FETCH_ERROR_CONTEXT)));
                self.emit(ViewEvent::StateChanged { generation });
                FetchOutcome::Failed(failure)
            }
        }
    }

    fn require_set_up(state: &ViewState) -> Result<ViewUid, ViewError> {
        state
            .view_uid
            .clone()
            .ok_or_else(|| invariant_violation("view used before set_up"))
    }

    /// Drops excluded and repeated fields, keeping first-seen order.
    fn sanitize_fields(&self, fields: Vec<ProjectFieldName>) -> Vec<ProjectFieldName> {
        let mut outcome = Vec::with_capacity(fields.len());
        for field in fields {
            if self.registry.is_excluded(field) {
                debug!("view: ignoring excluded field {field}");
                continue;
            }
            if !outcome.contains(&field) {
                outcome.push(field);
            }
        }
        outcome
    }

    fn restore_settings(&self, state: &mut ViewState, saved: ViewSettings) {
        if let Some(fields) = saved.fields {
            state.visible_fields = self.sanitize_fields(fields);
        }
        state.filters = saved
            .filters
            .into_iter()
            .filter(|filter| {
                let keep = !self.registry.is_excluded(filter.field_name);
                if !keep {
                    warn!("view: dropping saved filter on excluded field {}", filter.field_name);
                }
                keep
            })
            .collect();
        state.order = saved
            .order
            .filter(|order| self.registry.is_orderable(order.field_name));
    }

    /// Writes the settings current at the time the write lock is held, so
    /// overlapping mutations can only ever leave the latest state behind.
    async fn persist_settings(&self, view_uid: &ViewUid) {
        let _save = self.save_lock.lock().await;
        let settings = self.inner.lock().await.settings();
        if let Err(err) = self.settings.save_settings(view_uid, &settings).await {
            warn!("view: failed to save settings view={view_uid}: {err:#}");
        }
    }

    fn emit_reset(&self, generation: u64) {
        self.emit(ViewEvent::RowsReset { generation });
        self.emit(ViewEvent::StateChanged { generation });
    }

    fn emit(&self, event: ViewEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
