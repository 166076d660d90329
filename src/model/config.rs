use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the task file created next to the config on first run.
pub const DEFAULT_DATA_FILE_NAME: &str = "tasks.json";

/// Configuration from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the task file. Relative paths resolve against the config dir.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    #[serde(default)]
    pub ms_sync_enabled: bool,
    #[serde(default = "default_tasklist_name")]
    pub ms_tasklist_name: String,
    #[serde(default)]
    pub ms_client_id: String,
    /// Token-cache account the last successful sign-in resolved to
    #[serde(default)]
    pub ms_account_id: Option<String>,
    /// Seconds between reminder sweeps
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_secs: u64,
    /// Seconds between mtime polls of the task file (backs up the fs watcher)
    #[serde(default = "default_watch_interval")]
    pub watch_interval_secs: u64,
    /// Keys this version does not know about, kept in file order
    #[serde(flatten)]
    pub extra: IndexMap<String, toml::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_file: None,
            ms_sync_enabled: false,
            ms_tasklist_name: default_tasklist_name(),
            ms_client_id: String::new(),
            ms_account_id: None,
            reminder_interval_secs: default_reminder_interval(),
            watch_interval_secs: default_watch_interval(),
            extra: IndexMap::new(),
        }
    }
}

impl Config {
    /// Resolve the task file location against the config directory.
    pub fn data_file_path(&self, config_dir: &Path) -> PathBuf {
        match &self.data_file {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => config_dir.join(p),
            None => config_dir.join(DEFAULT_DATA_FILE_NAME),
        }
    }

    /// Whether a push to Microsoft To Do can be attempted at all.
    pub fn sync_configured(&self) -> bool {
        self.ms_sync_enabled && !self.ms_client_id.trim().is_empty()
    }
}

fn default_tasklist_name() -> String {
    "Tasker".to_string()
}

fn default_reminder_interval() -> u64 {
    30
}

fn default_watch_interval() -> u64 {
    60
}
