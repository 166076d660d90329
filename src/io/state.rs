use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::view::ViewMode;

const STATE_FILE_NAME: &str = "state.json";

/// Persisted panel state (written to state.json in the config dir)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelState {
    /// Which view was showing
    #[serde(default)]
    pub view: ViewMode,
    /// Selected task, by storage index
    #[serde(default)]
    pub selected: Option<usize>,
}

/// Read state.json from the config directory
pub fn read_panel_state(config_dir: &Path) -> Option<PanelState> {
    let content = fs::read_to_string(config_dir.join(STATE_FILE_NAME)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Write state.json to the config directory
pub fn write_panel_state(config_dir: &Path, state: &PanelState) -> Result<(), std::io::Error> {
    let content = serde_json::to_string_pretty(state)?;
    fs::create_dir_all(config_dir)?;
    fs::write(config_dir.join(STATE_FILE_NAME), content)
}
