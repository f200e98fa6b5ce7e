use super::*;
use std::collections::VecDeque;

use shared::{
    domain::{FilterCondition, OrderDirection},
    fields::{HOME_BASE_QUERY, HOME_VIEW_UID},
};
use tokio::sync::{mpsc, oneshot};

type PageResult = std::result::Result<crate::ProjectsPage, FetchFailure>;

enum Scripted {
    Ready(PageResult),
    Gated(oneshot::Receiver<PageResult>),
}

struct ScriptedApi {
    responses: std::sync::Mutex<VecDeque<Scripted>>,
    requests: mpsc::UnboundedSender<ProjectsQuery>,
}

#[async_trait]
impl ProjectsApi for ScriptedApi {
    async fn fetch_page(&self, query: ProjectsQuery) -> PageResult {
        let _ = self.requests.send(query);
        let next = self.responses.lock().expect("responses lock").pop_front();
        match next {
            Some(Scripted::Ready(result)) => result,
            Some(Scripted::Gated(gate)) => gate.await.expect("gate dropped"),
            None => Ok(page(&[], None)),
        }
    }
}

fn scripted(
    responses: Vec<Scripted>,
) -> (Arc<ScriptedApi>, mpsc::UnboundedReceiver<ProjectsQuery>) {
    let (requests, rx) = mpsc::unbounded_channel();
    let api = Arc::new(ScriptedApi {
        responses: std::sync::Mutex::new(responses.into()),
        requests,
    });
    (api, rx)
}

fn page(uids: &[&str], next: Option<&str>) -> crate::ProjectsPage {
    crate::ProjectsPage {
        rows: uids
            .iter()
            .map(|uid| ProjectRow::new(*uid, format!("Project {uid}")))
            .collect(),
        next_cursor: next.map(|cursor| Cursor(cursor.to_string())),
    }
}

fn ready(uids: &[&str], next: Option<&str>) -> Scripted {
    Scripted::Ready(Ok(page(uids, next)))
}

fn gated() -> (Scripted, oneshot::Sender<PageResult>) {
    let (tx, rx) = oneshot::channel();
    (Scripted::Gated(rx), tx)
}

fn registry() -> Arc<FieldRegistry> {
    Arc::new(FieldRegistry::projects())
}

fn uids(snapshot: &ViewSnapshot) -> Vec<&str> {
    snapshot.rows.iter().map(|row| row.uid.as_str()).collect()
}

fn home() -> ViewUid {
    ViewUid::new(HOME_VIEW_UID)
}

fn name_contains(value: &str) -> ProjectsFilter {
    ProjectsFilter::new(
        ProjectFieldName::Name,
        FilterCondition::Contains,
        Some(value.to_string()),
    )
}

#[tokio::test]
async fn set_up_loads_the_first_page_with_default_fields() {
    let (api, mut requests) = scripted(vec![ready(&["1", "2"], Some("page-2"))]);
    let store = CustomViewStore::new(api, registry());

    let outcome = store
        .set_up(
            home(),
            HOME_BASE_QUERY,
            vec![ProjectFieldName::Name, ProjectFieldName::Status],
        )
        .await
        .expect("set up");
    assert!(matches!(
        outcome,
        FetchOutcome::Loaded { added: 2, has_more_pages: true, .. }
    ));

    let query = requests.recv().await.expect("request");
    assert_eq!(query.base_query, HOME_BASE_QUERY);
    assert!(query.cursor.is_none());
    assert!(query.order.is_none());

    let snapshot = store.snapshot().await;
    assert_eq!(
        snapshot.visible_fields,
        vec![ProjectFieldName::Name, ProjectFieldName::Status]
    );
    assert_eq!(uids(&snapshot), vec!["1", "2"]);
    assert!(snapshot.has_more_pages());
    assert!(snapshot.is_first_load_complete);
    assert!(!snapshot.is_loading);
}

#[tokio::test]
async fn set_order_resets_rows_before_the_new_fetch_resolves() {
    let (gate, release) = gated();
    let (api, mut requests) = scripted(vec![ready(&["1", "2"], Some("page-2")), gate]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(
            home(),
            HOME_BASE_QUERY,
            vec![ProjectFieldName::Name, ProjectFieldName::Status],
        )
        .await
        .expect("set up");
    requests.recv().await.expect("first request");

    let order = ProjectsOrder::new(ProjectFieldName::Name, OrderDirection::Descending);
    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.set_order(order).await }
    });

    let query = requests.recv().await.expect("order request");
    assert_eq!(query.order, Some(order));
    assert!(query.cursor.is_none());
    assert_eq!(
        crate::query::ordering_param(store.registry(), query.order.as_ref()).as_deref(),
        Some("-name")
    );

    let snapshot = store.snapshot().await;
    assert!(snapshot.rows.is_empty());
    assert!(snapshot.cursor.is_none());
    assert!(snapshot.is_loading);
    assert!(!snapshot.is_first_load_complete);

    release.send(Ok(page(&["2", "1"], None))).expect("release");
    pending.await.expect("join").expect("set order");

    let snapshot = store.snapshot().await;
    assert_eq!(uids(&snapshot), vec!["2", "1"]);
    assert_eq!(snapshot.order, Some(order));
    assert!(!snapshot.has_more_pages());
}

#[tokio::test]
async fn fetch_more_is_a_no_op_while_a_page_is_loading() {
    let (gate, release) = gated();
    let (api, mut requests) = scripted(vec![ready(&["1", "2"], Some("page-2")), gate]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");
    requests.recv().await.expect("first request");

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.fetch_more_assets().await }
    });
    let query = requests.recv().await.expect("page 2 request");
    assert_eq!(query.cursor, Some(Cursor("page-2".into())));

    let second = store.fetch_more_assets().await;
    assert!(matches!(second, FetchOutcome::Skipped));

    release.send(Ok(page(&["3"], None))).expect("release");
    let first = first.await.expect("join");
    assert!(matches!(first, FetchOutcome::Loaded { added: 1, .. }));

    assert!(requests.try_recv().is_err(), "no extra request was issued");
    assert_eq!(uids(&store.snapshot().await), vec!["1", "2", "3"]);

    assert!(matches!(store.fetch_more_assets().await, FetchOutcome::Skipped));
}

#[tokio::test]
async fn later_pages_never_reintroduce_a_seen_uid() {
    let duplicate = crate::ProjectsPage {
        rows: vec![
            ProjectRow::new("2", "Renamed on the server"),
            ProjectRow::new("3", "Project 3"),
        ],
        next_cursor: None,
    };
    let (api, _requests) = scripted(vec![
        ready(&["1", "2"], Some("page-2")),
        Scripted::Ready(Ok(duplicate)),
    ]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");

    let outcome = store.fetch_more_assets().await;
    assert!(matches!(
        outcome,
        FetchOutcome::Loaded { added: 1, duplicates: 1, .. }
    ));

    let snapshot = store.snapshot().await;
    assert_eq!(uids(&snapshot), vec!["1", "2", "3"]);
    assert_eq!(snapshot.rows[1].name, "Project 2", "first occurrence wins");
}

#[tokio::test]
async fn stale_response_does_not_overwrite_newer_generation() {
    let (gate, release_stale) = gated();
    let (api, mut requests) = scripted(vec![gate, ready(&["b1"], None)]);
    let store = CustomViewStore::new(api, registry());

    let initial = tokio::spawn({
        let store = store.clone();
        async move {
            store
                .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
                .await
        }
    });
    requests.recv().await.expect("generation 1 request");
    let stale_generation = store.snapshot().await.generation;

    let outcome = store
        .set_filters(vec![name_contains("b")])
        .await
        .expect("set filters");
    assert!(matches!(outcome, FetchOutcome::Loaded { .. }));
    let query = requests.recv().await.expect("generation 2 request");
    assert_eq!(query.filters, vec![name_contains("b")]);

    release_stale
        .send(Ok(page(&["a1", "a2"], Some("stale-cursor"))))
        .expect("release");
    let stale = initial.await.expect("join").expect("set up");
    assert!(matches!(stale, FetchOutcome::Stale { generation } if generation == stale_generation));

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.generation, stale_generation + 1);
    assert_eq!(uids(&snapshot), vec!["b1"]);
    assert!(snapshot.cursor.is_none());
    assert!(!snapshot.is_loading);
}

#[tokio::test]
async fn set_filters_clears_rows_and_cursor_immediately() {
    let (gate, release) = gated();
    let (api, mut requests) = scripted(vec![ready(&["1", "2"], Some("page-2")), gate]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");
    requests.recv().await.expect("first request");

    let pending = tokio::spawn({
        let store = store.clone();
        async move { store.set_filters(vec![name_contains("x")]).await }
    });
    requests.recv().await.expect("filter request");

    let snapshot = store.snapshot().await;
    assert!(snapshot.rows.is_empty());
    assert!(snapshot.cursor.is_none());
    assert_eq!(snapshot.highlighted_fields(), vec![ProjectFieldName::Name]);

    release.send(Ok(page(&["x1"], None))).expect("release");
    pending.await.expect("join").expect("set filters");
    assert_eq!(uids(&store.snapshot().await), vec!["x1"]);
}

#[tokio::test]
async fn fetch_failure_keeps_rows_and_notifies() {
    let failure = FetchFailure::Status {
        status: 500,
        status_text: "Internal Server Error".into(),
        body: Some(serde_json::json!({"detail": "boom"})),
    };
    let (api, _requests) = scripted(vec![
        ready(&["1", "2"], Some("page-2")),
        Scripted::Ready(Err(failure)),
        ready(&["3"], None),
    ]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");
    let mut events = store.subscribe_events();

    let outcome = store.fetch_more_assets().await;
    match outcome {
        FetchOutcome::Failed(failure) => assert_eq!(failure.status(), Some(500)),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let snapshot = store.snapshot().await;
    assert_eq!(uids(&snapshot), vec!["1", "2"]);
    assert_eq!(snapshot.cursor, Some(Cursor("page-2".into())));
    assert!(!snapshot.is_loading);

    let mut notified = None;
    while let Ok(event) = events.try_recv() {
        if let ViewEvent::Error(message) = event {
            notified = Some(message);
        }
    }
    assert_eq!(notified.as_deref(), Some("Failed to load projects: boom"));

    // Retrying the same action picks up where it failed.
    let retry = store.fetch_more_assets().await;
    assert!(matches!(retry, FetchOutcome::Loaded { added: 1, .. }));
    assert_eq!(uids(&store.snapshot().await), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn reload_starts_a_new_generation_after_a_failed_first_page() {
    let (api, _requests) = scripted(vec![
        Scripted::Ready(Err(FetchFailure::Transport("connection refused".into()))),
        ready(&["1"], None),
    ]);
    let store = CustomViewStore::new(api, registry());
    let first = store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");
    assert!(matches!(first, FetchOutcome::Failed(_)));
    assert!(!store.snapshot().await.is_first_load_complete);
    assert!(matches!(store.fetch_more_assets().await, FetchOutcome::Skipped));

    let retry = store.reload().await.expect("reload");
    assert!(matches!(retry, FetchOutcome::Loaded { generation: 2, .. }));
    assert!(store.snapshot().await.is_first_load_complete);
}

#[tokio::test]
async fn field_changes_do_not_touch_rows() {
    let (api, mut requests) = scripted(vec![ready(&["1", "2"], None)]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(
            home(),
            HOME_BASE_QUERY,
            vec![ProjectFieldName::Name, ProjectFieldName::Status],
        )
        .await
        .expect("set up");
    requests.recv().await.expect("first request");
    let before = store.snapshot().await;

    store
        .set_fields(vec![
            ProjectFieldName::Status,
            ProjectFieldName::OwnerEmail,
            ProjectFieldName::Status,
            ProjectFieldName::Sector,
        ])
        .await
        .expect("set fields");

    let after = store.snapshot().await;
    assert_eq!(
        after.visible_fields,
        vec![ProjectFieldName::Status, ProjectFieldName::Sector]
    );
    assert_eq!(after.generation, before.generation);
    assert_eq!(after.rows, before.rows);
    assert!(requests.try_recv().is_err());

    store.reset_fields().await.expect("reset fields");
    assert_eq!(
        store.snapshot().await.visible_fields,
        vec![ProjectFieldName::Name, ProjectFieldName::Status]
    );
}

#[tokio::test]
async fn hide_field_undoes_adding_a_field() {
    let (api, _requests) = scripted(vec![]);
    let store = CustomViewStore::new(api, registry());
    let initial = vec![ProjectFieldName::Name, ProjectFieldName::Status];
    store
        .set_up(home(), HOME_BASE_QUERY, initial.clone())
        .await
        .expect("set up");

    let mut extended = initial.clone();
    extended.push(ProjectFieldName::Languages);
    store.set_fields(extended).await.expect("set fields");
    store
        .hide_field(ProjectFieldName::Languages)
        .await
        .expect("hide");
    assert_eq!(store.snapshot().await.visible_fields, initial);

    store
        .hide_field(ProjectFieldName::Languages)
        .await
        .expect("hide again");
    assert_eq!(store.snapshot().await.visible_fields, initial);
}

#[tokio::test]
async fn events_follow_each_committed_mutation() {
    let (api, _requests) = scripted(vec![ready(&["1"], None)]);
    let store = CustomViewStore::new(api, registry());
    let mut events = store.subscribe_events();

    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");
    store
        .hide_field(ProjectFieldName::Name)
        .await
        .expect("hide");

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(
        received,
        vec![
            ViewEvent::RowsReset { generation: 1 },
            ViewEvent::StateChanged { generation: 1 },
            ViewEvent::FirstLoadComplete { generation: 1 },
            ViewEvent::StateChanged { generation: 1 },
            ViewEvent::StateChanged { generation: 1 },
        ]
    );
}

#[tokio::test]
async fn asset_updates_replace_or_remove_loaded_rows() {
    let (api, _requests) = scripted(vec![
        ready(&["1", "2"], Some("page-2")),
        ready(&["2", "3"], None),
    ]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");

    let renamed = ProjectRow::new("1", "Renamed").with_value("deployment_status", "archived".into());
    assert!(store.handle_asset_changed(renamed.clone()).await);
    assert!(!store.handle_asset_changed(ProjectRow::new("9", "Unknown")).await);
    assert!(store.handle_asset_deleted(&AssetUid::new("2")).await);

    store.fetch_more_assets().await;
    let snapshot = store.snapshot().await;
    assert_eq!(uids(&snapshot), vec!["1", "3"]);
    assert_eq!(snapshot.rows[0], renamed);
}

#[tokio::test]
async fn saved_settings_are_restored_on_set_up() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let order = ProjectsOrder::new(ProjectFieldName::DateModified, OrderDirection::Descending);

    {
        let (api, _requests) = scripted(vec![]);
        let store =
            CustomViewStore::new_with_dependencies(api, registry(), Arc::new(storage.clone()));
        store
            .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
            .await
            .expect("set up");
        store
            .set_filters(vec![name_contains("water")])
            .await
            .expect("filters");
        store.set_order(order).await.expect("order");
        store
            .set_fields(vec![ProjectFieldName::Name, ProjectFieldName::Submissions])
            .await
            .expect("fields");
    }

    let (api, mut requests) = scripted(vec![]);
    let store = CustomViewStore::new_with_dependencies(api, registry(), Arc::new(storage));
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up again");

    let query = requests.recv().await.expect("restored request");
    assert_eq!(query.filters, vec![name_contains("water")]);
    assert_eq!(query.order, Some(order));
    assert_eq!(
        store.snapshot().await.visible_fields,
        vec![ProjectFieldName::Name, ProjectFieldName::Submissions]
    );
}

#[tokio::test]
async fn saved_settings_are_revalidated() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .save_view_settings(
            HOME_VIEW_UID,
            r#"{"fields":["ownerEmail","name"],"filters":[{"fieldName":"ownerEmail","condition":"contains","value":"a"}],"order":{"fieldName":"sector","direction":"ascending"}}"#,
        )
        .await
        .expect("seed");

    let (api, mut requests) = scripted(vec![]);
    let store = CustomViewStore::new_with_dependencies(api, registry(), Arc::new(storage));
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Status])
        .await
        .expect("set up");

    let query = requests.recv().await.expect("request");
    assert!(query.filters.is_empty());
    assert!(query.order.is_none());
    assert_eq!(
        store.snapshot().await.visible_fields,
        vec![ProjectFieldName::Name]
    );
}

#[tokio::test]
#[cfg_attr(debug_assertions, should_panic(expected = "invariant violation"))]
async fn set_up_twice_is_an_invariant_violation() {
    let (api, _requests) = scripted(vec![]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("first set up");

    let err = store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect_err("second set up");
    assert!(matches!(err, ViewError::InvariantViolation(_)));
    assert_eq!(store.snapshot().await.generation, 1);
}

#[tokio::test]
#[cfg_attr(debug_assertions, should_panic(expected = "is not orderable"))]
async fn ordering_by_a_non_orderable_field_is_rejected() {
    let (api, _requests) = scripted(vec![ready(&["1"], None)]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");

    let err = store
        .set_order(ProjectsOrder::new(
            ProjectFieldName::Sector,
            OrderDirection::Ascending,
        ))
        .await
        .expect_err("must reject");
    assert!(matches!(err, ViewError::InvariantViolation(_)));

    let snapshot = store.snapshot().await;
    assert!(snapshot.order.is_none());
    assert_eq!(uids(&snapshot), vec!["1"]);
}

#[tokio::test]
#[cfg_attr(debug_assertions, should_panic(expected = "excluded field"))]
async fn filtering_on_an_excluded_field_is_rejected() {
    let (api, _requests) = scripted(vec![]);
    let store = CustomViewStore::new(api, registry());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");

    let err = store
        .set_filters(vec![ProjectsFilter::new(
            ProjectFieldName::OwnerEmail,
            FilterCondition::Contains,
            Some("a".into()),
        )])
        .await
        .expect_err("must reject");
    assert!(matches!(err, ViewError::InvariantViolation(_)));
}

#[tokio::test]
#[cfg_attr(debug_assertions, should_panic(expected = "before set_up"))]
async fn mutations_before_set_up_are_rejected() {
    let (api, _requests) = scripted(vec![]);
    let store = CustomViewStore::new(api, registry());
    let err = store
        .hide_field(ProjectFieldName::Name)
        .await
        .expect_err("must reject");
    assert!(matches!(err, ViewError::InvariantViolation(_)));
}

/// Holds the first save until released and records every save in order.
struct SlowSettingsStore {
    first_save: std::sync::Mutex<Option<oneshot::Receiver<()>>>,
    started: mpsc::UnboundedSender<()>,
    saved: std::sync::Mutex<Vec<ViewSettings>>,
}

#[async_trait]
impl ViewSettingsStore for SlowSettingsStore {
    async fn load_settings(&self, _view_uid: &ViewUid) -> Result<Option<ViewSettings>> {
        Ok(None)
    }

    async fn save_settings(&self, _view_uid: &ViewUid, settings: &ViewSettings) -> Result<()> {
        let _ = self.started.send(());
        let gate = self.first_save.lock().expect("gate lock").take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.saved
            .lock()
            .expect("saved lock")
            .push(settings.clone());
        Ok(())
    }
}

#[tokio::test]
async fn overlapping_saves_leave_the_latest_settings() {
    let (release, gate) = oneshot::channel();
    let (started, mut save_started) = mpsc::unbounded_channel();
    let settings = Arc::new(SlowSettingsStore {
        first_save: std::sync::Mutex::new(Some(gate)),
        started,
        saved: std::sync::Mutex::new(Vec::new()),
    });
    let (api, _requests) = scripted(vec![]);
    let store = CustomViewStore::new_with_dependencies(api, registry(), settings.clone());
    store
        .set_up(home(), HOME_BASE_QUERY, vec![ProjectFieldName::Name])
        .await
        .expect("set up");

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.set_filters(vec![name_contains("water")]).await }
    });
    save_started.recv().await.expect("first save started");

    let second = tokio::spawn({
        let store = store.clone();
        async move { store.set_filters(vec![name_contains("ocean")]).await }
    });
    while store.snapshot().await.filters != vec![name_contains("ocean")] {
        tokio::task::yield_now().await;
    }

    release.send(()).expect("release");
    first.await.expect("join").expect("first filters");
    second.await.expect("join").expect("second filters");

    let saved = settings.saved.lock().expect("saved lock");
    assert_eq!(
        saved.last().map(|settings| settings.filters.clone()),
        Some(vec![name_contains("ocean")])
    );
}
