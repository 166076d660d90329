use serde::{Deserialize, Serialize};

/// Which half of the task list is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Open tasks, plus the trailing "add a task" placeholder
    #[default]
    Active,
    /// Completed tasks, read-only for structure edits
    Completed,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            ViewMode::Active => ViewMode::Completed,
            ViewMode::Completed => ViewMode::Active,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ViewMode::Active => "active",
            ViewMode::Completed => "completed",
        }
    }

    /// Whether a task with the given completion flag is visible in this view.
    pub fn shows(self, done: bool) -> bool {
        done == (self == ViewMode::Completed)
    }

    /// Indent, unindent and group moves are only allowed in the active view.
    pub fn allows_structure_edits(self) -> bool {
        self == ViewMode::Active
    }
}
