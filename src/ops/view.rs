//! Filtered projection of the task sequence onto the screen.
//!
//! The projection keeps only tasks whose completion matches the view and
//! remembers, for each display row, the storage index it came from.

use crate::model::task::Task;
use crate::model::view::ViewMode;
use crate::ops::hierarchy::{self, Outcome};

/// Where keyboard focus sits within a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    /// A real task, by storage index
    Task(usize),
    /// The trailing "add a task" row (active view only)
    Placeholder,
}

/// Display-row to storage-index mapping for one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub mode: ViewMode,
    /// `index_map[display_pos]` is the storage index of that row
    pub index_map: Vec<usize>,
}

/// Project the sequence for a view, preserving relative order.
pub fn project(tasks: &[Task], mode: ViewMode) -> Projection {
    let index_map = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| mode.shows(t.done))
        .map(|(i, _)| i)
        .collect();
    Projection { mode, index_map }
}

/// Commit text typed into the placeholder row: appends a top-level task.
pub fn commit_placeholder(tasks: &mut Vec<Task>, text: &str) -> Outcome {
    hierarchy::append(tasks, text)
}

impl Projection {
    pub fn len(&self) -> usize {
        self.index_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_map.is_empty()
    }

    /// The visible tasks paired with their storage indices.
    pub fn rows<'a>(&self, tasks: &'a [Task]) -> Vec<(usize, &'a Task)> {
        self.index_map
            .iter()
            .filter_map(|&i| tasks.get(i).map(|t| (i, t)))
            .collect()
    }

    pub fn storage_index(&self, display_pos: usize) -> Option<usize> {
        self.index_map.get(display_pos).copied()
    }

    /// Reverse lookup; `None` when the task is filtered out of this view.
    pub fn display_position(&self, storage_index: usize) -> Option<usize> {
        self.index_map.iter().position(|&i| i == storage_index)
    }

    pub fn has_placeholder(&self) -> bool {
        self.mode == ViewMode::Active
    }

    /// Focus after moving down from `from`. Past the last row this lands on
    /// the placeholder in the active view and stays put otherwise.
    pub fn next(&self, from: Focus) -> Option<Focus> {
        let Focus::Task(storage) = from else {
            return None;
        };
        let pos = self.display_position(storage)?;
        match self.storage_index(pos + 1) {
            Some(i) => Some(Focus::Task(i)),
            None if self.has_placeholder() => Some(Focus::Placeholder),
            None => None,
        }
    }

    /// Focus after moving up from `from`. Moving up from the top is a no-op.
    pub fn previous(&self, from: Focus) -> Option<Focus> {
        match from {
            Focus::Placeholder => self.index_map.last().map(|&i| Focus::Task(i)),
            Focus::Task(storage) => {
                let pos = self.display_position(storage)?;
                let prev = pos.checked_sub(1)?;
                self.storage_index(prev).map(Focus::Task)
            }
        }
    }
}
