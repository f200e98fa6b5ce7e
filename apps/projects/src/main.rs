mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use shared::{
    domain::{
        AssetUid, FilterCondition, OrderDirection, ProjectFieldName, ProjectsFilter,
        ProjectsOrder, ViewUid,
    },
    fields::{FieldRegistry, HOME_BASE_QUERY, HOME_VIEW_UID},
    protocol::AssetUsagePage,
};
use storage::Storage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use view_core::{
    CustomViewStore, FetchOutcome, GateDecision, HttpProjectsClient, LimitGate,
    SelectionAffordance, SelectionController, UsageApi, ViewEvent, ViewSnapshot,
};

use crate::config::{load_settings, normalize_database_url, Settings, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "projects", about = "Browse projects and usage limits from the command line")]
struct Args {
    /// Config file read before environment overrides.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[arg(long, global = true)]
    organization_id: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List projects of the "My Projects" view.
    List {
        /// FIELD:CONDITION[:VALUE], repeatable. Filters are ANDed.
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Field to order by; prefix with '-' for descending.
        #[arg(long, allow_hyphen_values = true)]
        order: Option<String>,
        /// Comma separated visible fields.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        /// Restore the default visible fields.
        #[arg(long)]
        reset_fields: bool,
        #[arg(long, default_value_t = 1)]
        pages: u32,
        /// Uids to select, repeatable.
        #[arg(long = "select")]
        selected: Vec<String>,
    },
    /// Show exceeded and near-exceeded usage limits.
    Limits,
    /// Per-project usage for the current period.
    AssetUsage {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, allow_hyphen_values = true)]
        order: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config);
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }
    if args.organization_id.is_some() {
        settings.organization_id = args.organization_id;
    }

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await?;
    let purged = storage.purge_expired_markers(Utc::now()).await?;
    info!(
        "projects: starting server_url={} database_url={database_url} purged_markers={purged}",
        settings.server_url
    );

    let registry = Arc::new(FieldRegistry::projects());
    let client = Arc::new(
        HttpProjectsClient::new(&settings.server_url, registry.clone())
            .with_context(|| format!("invalid server url '{}'", settings.server_url))?
            .with_page_size(settings.page_size),
    );

    match args.command {
        Command::List {
            filters,
            order,
            fields,
            reset_fields,
            pages,
            selected,
        } => {
            let request = ListRequest {
                filters: filters
                    .iter()
                    .map(|raw| parse_filter(&registry, raw))
                    .collect::<Result<_>>()?,
                order: order
                    .as_deref()
                    .map(|raw| parse_order(&registry, raw))
                    .transpose()?,
                fields: fields
                    .iter()
                    .map(|raw| parse_field(raw))
                    .collect::<Result<_>>()?,
                reset_fields,
                pages,
                selected: selected.into_iter().map(AssetUid::new).collect(),
            };
            run_list(&settings, client, registry, storage, request).await
        }
        Command::Limits => {
            let gate = limit_gate(&settings, client, storage);
            let decision = gate.on_mount(Utc::now()).await?;
            print_limits(&decision);
            Ok(())
        }
        Command::AssetUsage { page, order } => {
            let order = order
                .as_deref()
                .map(|raw| parse_order(&registry, raw))
                .transpose()?;
            let usage = client
                .fetch_asset_usage(settings.organization_id.as_deref(), page, order.as_ref())
                .await?;
            print_asset_usage(&usage);
            Ok(())
        }
    }
}

#[derive(Debug)]
struct ListRequest {
    filters: Vec<ProjectsFilter>,
    order: Option<ProjectsOrder>,
    fields: Vec<ProjectFieldName>,
    reset_fields: bool,
    pages: u32,
    selected: Vec<AssetUid>,
}

async fn run_list(
    settings: &Settings,
    client: Arc<HttpProjectsClient>,
    registry: Arc<FieldRegistry>,
    storage: Storage,
    request: ListRequest,
) -> Result<()> {
    let store = CustomViewStore::new_with_dependencies(
        client.clone(),
        registry.clone(),
        Arc::new(storage.clone()),
    );

    let mut events = store.subscribe_events();
    let notifier = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ViewEvent::Error(message) = event {
                eprintln!("error: {message}");
            }
        }
    });

    store
        .set_up(
            ViewUid::new(HOME_VIEW_UID),
            HOME_BASE_QUERY,
            registry.default_visible_fields(),
        )
        .await?;
    if request.reset_fields {
        store.reset_fields().await?;
    }
    if !request.fields.is_empty() {
        store.set_fields(request.fields).await?;
    }
    if !request.filters.is_empty() {
        store.set_filters(request.filters).await?;
    }
    if let Some(order) = request.order {
        store.set_order(order).await?;
    }

    for _ in 1..request.pages {
        match store.fetch_more_assets().await {
            FetchOutcome::Loaded { .. } => {}
            FetchOutcome::Skipped | FetchOutcome::Stale { .. } | FetchOutcome::Failed(_) => break,
        }
    }

    let snapshot = store.snapshot().await;
    print!("{}", render_rows(&registry, &snapshot));

    if !request.selected.is_empty() {
        let mut selection = SelectionController::new();
        selection.set_selection(&snapshot, request.selected);
        println!("{}", describe_affordance(&selection.affordance(&snapshot)));
    }

    let gate = limit_gate(settings, client, storage);
    match gate.on_mount(Utc::now()).await {
        Ok(decision) => print_limits(&decision),
        Err(err) => warn!("projects: usage limits unavailable: {err}"),
    }

    drop(store);
    let _ = notifier.await;
    Ok(())
}

fn limit_gate(settings: &Settings, client: Arc<HttpProjectsClient>, storage: Storage) -> LimitGate {
    LimitGate::new(client, Arc::new(storage))
        .with_billing_enabled(settings.billing_enabled)
        .with_organization(settings.organization_id.clone())
}

fn parse_field(raw: &str) -> Result<ProjectFieldName> {
    ProjectFieldName::parse(raw).with_context(|| format!("unknown field '{raw}'"))
}

/// Parses `FIELD:CONDITION[:VALUE]`. The value may itself contain ':'.
fn parse_filter(registry: &FieldRegistry, raw: &str) -> Result<ProjectsFilter> {
    let mut parts = raw.splitn(3, ':');
    let field = parse_field(parts.next().unwrap_or_default())?;
    if registry.is_excluded(field) {
        bail!("field '{field}' cannot be filtered on");
    }
    let condition_raw = parts
        .next()
        .with_context(|| format!("filter '{raw}' is missing a condition"))?;
    let condition = FilterCondition::parse(condition_raw)
        .with_context(|| format!("unknown filter condition '{condition_raw}'"))?;
    let value = parts.next().map(str::to_string);
    if condition.requires_value() && value.as_deref().map_or(true, str::is_empty) {
        bail!("filter condition '{condition_raw}' needs a value");
    }
    Ok(ProjectsFilter::new(field, condition, value))
}

fn parse_order(registry: &FieldRegistry, raw: &str) -> Result<ProjectsOrder> {
    let raw = raw.trim();
    let (direction, name) = match raw.strip_prefix('-') {
        Some(name) => (OrderDirection::Descending, name),
        None => (OrderDirection::Ascending, raw),
    };
    let field = parse_field(name)?;
    if !registry.is_orderable(field) {
        bail!("field '{field}' is not orderable");
    }
    Ok(ProjectsOrder::new(field, direction))
}

fn format_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| format_value(Some(item)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

/// Tab separated table of the visible fields. Filtered columns carry a '*'.
fn render_rows(registry: &FieldRegistry, snapshot: &ViewSnapshot) -> String {
    let highlighted = snapshot.highlighted_fields();
    let definitions: Vec<_> = snapshot
        .visible_fields
        .iter()
        .filter_map(|field| registry.get(*field))
        .collect();

    let mut out = String::new();
    let header: Vec<String> = definitions
        .iter()
        .map(|definition| {
            if highlighted.contains(&definition.name) {
                format!("{}*", definition.label)
            } else {
                definition.label.to_string()
            }
        })
        .collect();
    out.push_str(&format!("uid\t{}\n", header.join("\t")));

    for row in &snapshot.rows {
        let cells: Vec<String> = definitions
            .iter()
            .map(|definition| match definition.name {
                // Lifted out of the flattened values on decode.
                ProjectFieldName::Name => row.name.clone(),
                _ => format_value(row.value_at(definition.value_path)),
            })
            .collect();
        out.push_str(&format!("{}\t{}\n", row.uid, cells.join("\t")));
    }

    if !snapshot.is_first_load_complete {
        out.push_str("(projects did not load)\n");
    } else if snapshot.has_more_pages() {
        out.push_str(&format!("{} projects shown, more available\n", snapshot.rows.len()));
    } else {
        out.push_str(&format!("{} projects\n", snapshot.rows.len()));
    }
    out
}

fn describe_affordance(affordance: &SelectionAffordance<'_>) -> String {
    match affordance {
        SelectionAffordance::None => "no projects selected".to_string(),
        SelectionAffordance::Single(row) => format!("selected project: {} ({})", row.name, row.uid),
        SelectionAffordance::Bulk(rows) => format!("{} projects selected", rows.len()),
    }
}

fn print_limits(decision: &GateDecision) {
    let describe = |limits: &[view_core::UsageLimit]| {
        limits
            .iter()
            .map(|limit| format!("{} ({}/{})", limit.metric, limit.usage, limit.limit))
            .collect::<Vec<_>>()
            .join(", ")
    };

    if decision.show_modal {
        println!(
            "You have exceeded your {} plan limits: {}",
            decision.interval,
            describe(&decision.limits.exceed_list)
        );
    } else if decision.show_exceeded_banner {
        println!(
            "Over {} plan limits: {}",
            decision.interval,
            describe(&decision.limits.exceed_list)
        );
    }
    if decision.show_warning_banner {
        println!(
            "Approaching {} plan limits: {}",
            decision.interval,
            describe(&decision.limits.warning_list)
        );
    }
    if decision.limits.exceed_list.is_empty() && decision.limits.warning_list.is_empty() {
        println!("Usage is within the {} plan limits", decision.interval);
    }
}

fn print_asset_usage(page: &AssetUsagePage) {
    println!("uid\tname\tsubmissions (month)\tstorage bytes\tasr seconds (month)\tmt characters (month)");
    for asset in &page.results {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            asset.uid,
            asset.asset_name,
            asset.submission_count_current_month,
            asset.storage_bytes,
            asset.nlp_usage_current_month.total_nlp_asr_seconds,
            asset.nlp_usage_current_month.total_nlp_mt_characters
        );
    }
    println!("{} of {} projects", page.results.len(), page.count);
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
