use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::explorer::{GraphicWalker, Theme};
use crate::preview::{DEFAULT_ROW_CAP, PreviewOptions};
use crate::relay::{RelayMode, RelayPolicy};

/// Config file read from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "tablewalk.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind: String,
    pub max_upload_bytes: usize,
    pub session_ttl_secs: u64,
    pub preview: PreviewSettings,
    pub explorer: ExplorerSettings,
    pub relay: RelaySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8501".into(),
            max_upload_bytes: 200 * 1024 * 1024,
            session_ttl_secs: 24 * 60 * 60,
            preview: PreviewSettings::default(),
            explorer: ExplorerSettings::default(),
            relay: RelaySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// `0` shows every row.
    pub row_cap: usize,
    pub missing_placeholder: Option<String>,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            row_cap: DEFAULT_ROW_CAP,
            missing_placeholder: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerSettings {
    pub row_limit: Option<usize>,
    pub theme: Theme,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayModeSetting {
    #[default]
    Echo,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub enabled: bool,
    pub bind: String,
    pub url: String,
    pub policy: RelayPolicy,
    pub mode: RelayModeSetting,
    pub upload_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0:8000".into(),
            url: "http://127.0.0.1:8000/upload".into(),
            policy: RelayPolicy::Advisory,
            mode: RelayModeSetting::Echo,
            upload_dir: PathBuf::from("uploads"),
            timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn preview_options(&self) -> PreviewOptions {
        PreviewOptions {
            row_cap: (self.preview.row_cap > 0).then_some(self.preview.row_cap),
            missing_placeholder: self.preview.missing_placeholder.clone(),
        }
    }

    pub fn explorer(&self) -> GraphicWalker {
        GraphicWalker::new(self.explorer.row_limit, self.explorer.theme)
    }

    /// The policy the flow controller applies; disabled unless the relay is enabled.
    pub fn relay_policy(&self) -> RelayPolicy {
        if self.relay.enabled {
            self.relay.policy
        } else {
            RelayPolicy::Disabled
        }
    }

    pub fn relay_mode(&self) -> RelayMode {
        match self.relay.mode {
            RelayModeSetting::Echo => RelayMode::Echo,
            RelayModeSetting::Store => RelayMode::Store {
                dir: self.relay.upload_dir.clone(),
            },
        }
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.timeout_secs)
    }
}

/// Load settings: defaults, then the config file, then `TABLEWALK_*`
/// environment variables.
///
/// An explicit `path` must exist. Without one, `tablewalk.toml` is read if
/// present.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => read_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => read_file(Path::new(DEFAULT_CONFIG_FILE))?,
        None => Settings::default(),
    };

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_file(path: &Path) -> anyhow::Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    parse_settings(&raw).with_context(|| format!("invalid config file '{}'", path.display()))
}

pub fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    Ok(toml::from_str(raw)?)
}

/// Override settings from environment-style lookups.
pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("TABLEWALK_BIND") {
        settings.bind = v;
    }
    if let Some(v) = lookup("TABLEWALK_RELAY_ENABLED") {
        match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => settings.relay.enabled = true,
            "0" | "false" | "no" | "off" => settings.relay.enabled = false,
            _ => warn!(value = %v, "ignoring TABLEWALK_RELAY_ENABLED"),
        }
    }
    if let Some(v) = lookup("TABLEWALK_RELAY_BIND") {
        settings.relay.bind = v;
    }
    if let Some(v) = lookup("TABLEWALK_RELAY_URL") {
        settings.relay.url = v;
    }
    if let Some(v) = lookup("TABLEWALK_RELAY_POLICY") {
        match v.to_ascii_lowercase().as_str() {
            "advisory" => settings.relay.policy = RelayPolicy::Advisory,
            "gating" => settings.relay.policy = RelayPolicy::Gating,
            "disabled" => settings.relay.policy = RelayPolicy::Disabled,
            _ => warn!(value = %v, "ignoring TABLEWALK_RELAY_POLICY"),
        }
    }
    if let Some(v) = lookup("TABLEWALK_PREVIEW_ROWS") {
        match v.parse::<usize>() {
            Ok(rows) => settings.preview.row_cap = rows,
            Err(_) => warn!(value = %v, "ignoring TABLEWALK_PREVIEW_ROWS"),
        }
    }
    if let Some(v) = lookup("TABLEWALK_MISSING_PLACEHOLDER") {
        settings.preview.missing_placeholder = Some(v);
    }
}
