use std::{fs, path::Path};

use serde::Deserialize;
use tracing::warn;
use view_core::DEFAULT_PAGE_SIZE;

pub const DEFAULT_CONFIG_FILE: &str = "projects.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub page_size: u32,
    pub billing_enabled: bool,
    pub organization_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            database_url: "sqlite://./data/projects.db".into(),
            page_size: DEFAULT_PAGE_SIZE,
            billing_enabled: false,
            organization_id: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    database_url: Option<String>,
    page_size: Option<u32>,
    billing_enabled: Option<bool>,
    organization_id: Option<String>,
}

pub fn load_settings(config_path: &Path) -> Settings {
    let file = fs::read_to_string(config_path).ok();
    settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the toml file, then the environment. Later sources win.
pub fn settings_from(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<FileSettings>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.server_url {
                    settings.server_url = v;
                }
                if let Some(v) = file_cfg.database_url {
                    settings.database_url = v;
                }
                if let Some(v) = file_cfg.page_size {
                    settings.page_size = v;
                }
                if let Some(v) = file_cfg.billing_enabled {
                    settings.billing_enabled = v;
                }
                if file_cfg.organization_id.is_some() {
                    settings.organization_id = file_cfg.organization_id;
                }
            }
            Err(err) => warn!("config: ignoring unreadable config file: {err}"),
        }
    }

    if let Some(v) = env("KPI_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__PAGE_SIZE") {
        match v.parse::<u32>() {
            Ok(parsed) => settings.page_size = parsed,
            Err(_) => warn!("config: ignoring invalid APP__PAGE_SIZE={v}"),
        }
    }

    if let Some(v) = env("APP__BILLING_ENABLED") {
        settings.billing_enabled = matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }

    if let Some(v) = env("APP__ORGANIZATION_ID") {
        let v = v.trim();
        settings.organization_id = (!v.is_empty()).then(|| v.to_string());
    }

    settings
}

/// Turns plain paths into sqlite URLs. `storage::Storage::new` creates the
/// parent directory.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
