//! Pure edits over the flat, indent-tagged task sequence.
//!
//! The hierarchy is never stored explicitly. A task's *group* is the task
//! itself plus the contiguous run of following tasks indented deeper than it.
//! Every edit here keeps the sequence well-formed: no task is indented more
//! than one level past its predecessor, and the first task sits at indent 0.
//!
//! Out-of-range indices are no-ops, never errors: callers derive indices from
//! the current projection, so a stale index means there is nothing to do.

use std::ops::Range;

use chrono::NaiveDateTime;

use crate::model::task::{N_COLORS, Task};

/// Storage format for reminders written by this crate.
pub const REMINDER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Result of an edit: whether the sequence changed, and where the cursor
/// should land afterwards (`None` when there is nothing left to select).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub changed: bool,
    pub selected: Option<usize>,
}

impl Outcome {
    fn changed(selected: usize) -> Self {
        Outcome {
            changed: true,
            selected: Some(selected),
        }
    }

    fn unchanged(tasks: &[Task], index: usize) -> Self {
        Outcome {
            changed: false,
            selected: (index < tasks.len()).then_some(index),
        }
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// Half-open range covering `index` and its deeper-indented followers.
///
/// Always non-empty. For an out-of-range index the range is `index..index + 1`,
/// which callers must bounds-check before slicing.
pub fn group_extent(tasks: &[Task], index: usize) -> Range<usize> {
    let Some(head) = tasks.get(index) else {
        return index..index + 1;
    };
    let end = tasks[index + 1..]
        .iter()
        .position(|t| t.indent <= head.indent)
        .map_or(tasks.len(), |offset| index + 1 + offset);
    index..end
}

/// Pull over-indented runs back so each task is at most one level deeper
/// than the task before it. A violating task is shifted together with the
/// following tasks at or below its depth, so siblings stay siblings.
///
/// Returns true if any indent changed.
pub fn repair_indents(tasks: &mut [Task]) -> bool {
    let mut changed = false;
    for i in 0..tasks.len() {
        let max = if i == 0 { 0 } else { tasks[i - 1].indent + 1 };
        let base = tasks[i].indent;
        if base <= max {
            continue;
        }
        let delta = base - max;
        for task in tasks[i..].iter_mut().take_while(|t| t.indent >= base) {
            task.indent -= delta;
        }
        changed = true;
    }
    changed
}

// ---------------------------------------------------------------------------
// Completion and stars
// ---------------------------------------------------------------------------

/// Flip `done` on a task and copy the new value onto its whole group.
pub fn toggle_done(tasks: &mut [Task], index: usize) -> Outcome {
    if index >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    let new_state = !tasks[index].done;
    let group = group_extent(tasks, index);
    for task in &mut tasks[group] {
        task.done = new_state;
    }
    Outcome::changed(index)
}

/// Advance the star to the next color, wrapping back to unstarred.
pub fn toggle_star(tasks: &mut [Task], index: usize) -> Outcome {
    if index >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    let task = &mut tasks[index];
    task.star = (task.star % N_COLORS + 1) % N_COLORS;
    Outcome::changed(index)
}

// ---------------------------------------------------------------------------
// Insert / delete / edit
// ---------------------------------------------------------------------------

/// Insert an empty task right after `index`, at the same depth.
pub fn insert_after(tasks: &mut Vec<Task>, index: usize) -> Outcome {
    if index >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    let task = Task::new("").with_indent(tasks[index].indent);
    tasks.insert(index + 1, task);
    Outcome::changed(index + 1)
}

/// Append a top-level task with the given text. Blank text is ignored.
pub fn append(tasks: &mut Vec<Task>, text: &str) -> Outcome {
    let text = text.trim();
    if text.is_empty() {
        return Outcome {
            changed: false,
            selected: None,
        };
    }
    tasks.push(Task::new(text));
    Outcome::changed(tasks.len() - 1)
}

/// Remove exactly one task. Its children move up and become children of
/// whatever now precedes them; a child left more than one level deeper than
/// its new predecessor is pulled back.
pub fn delete(tasks: &mut Vec<Task>, index: usize) -> Outcome {
    if index >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    tasks.remove(index);
    repair_indents(tasks);
    Outcome {
        changed: true,
        selected: (!tasks.is_empty()).then(|| index.min(tasks.len() - 1)),
    }
}

/// Replace a task's text. Completed tasks are read-only.
pub fn set_text(tasks: &mut [Task], index: usize, text: &str) -> Outcome {
    if index >= tasks.len() || tasks[index].done || tasks[index].text == text {
        return Outcome::unchanged(tasks, index);
    }
    tasks[index].text = text.to_string();
    Outcome::changed(index)
}

pub fn set_reminder(tasks: &mut [Task], index: usize, at: NaiveDateTime) -> Outcome {
    if index >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    tasks[index].reminder = Some(at.format(REMINDER_FORMAT).to_string());
    Outcome::changed(index)
}

pub fn clear_reminder(tasks: &mut [Task], index: usize) -> Outcome {
    if tasks.get(index).is_none_or(|t| t.reminder.is_none()) {
        return Outcome::unchanged(tasks, index);
    }
    tasks[index].reminder = None;
    Outcome::changed(index)
}

// ---------------------------------------------------------------------------
// Indentation
// ---------------------------------------------------------------------------

/// Indent one level, but never past one level deeper than the task above.
pub fn indent(tasks: &mut [Task], index: usize) -> Outcome {
    if index == 0 || index >= tasks.len() || tasks[index].indent > tasks[index - 1].indent {
        return Outcome::unchanged(tasks, index);
    }
    tasks[index].indent += 1;
    Outcome::changed(index)
}

/// Outdent one level.
///
/// This can change the indent of tasks other than `index`: children left
/// more than one level deeper than their new predecessor lose a level too,
/// and any other over-indented run in the list is repaired in the same pass.
/// The outcome only selects `index`; callers that show the other tasks
/// should redraw the whole list.
pub fn unindent(tasks: &mut [Task], index: usize) -> Outcome {
    if tasks.get(index).is_none_or(|t| t.indent == 0) {
        return Outcome::unchanged(tasks, index);
    }
    tasks[index].indent -= 1;
    repair_indents(tasks);
    Outcome::changed(index)
}

// ---------------------------------------------------------------------------
// Group moves
// ---------------------------------------------------------------------------

/// Move a task and its group above the single task directly before it.
pub fn move_group_up(tasks: &mut [Task], index: usize) -> Outcome {
    if index >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    let Range { start, end } = group_extent(tasks, index);
    if start == 0 {
        return Outcome::unchanged(tasks, index);
    }
    tasks[start - 1..end].rotate_left(1);
    repair_indents(tasks);
    Outcome::changed(start - 1)
}

/// Swap a task's group with the whole group that follows it.
pub fn move_group_down(tasks: &mut [Task], index: usize) -> Outcome {
    if index >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    let Range { start, end } = group_extent(tasks, index);
    if end >= tasks.len() {
        return Outcome::unchanged(tasks, index);
    }
    let below_end = group_extent(tasks, end).end;
    tasks[start..below_end].rotate_left(end - start);
    repair_indents(tasks);
    Outcome::changed(start + (below_end - end))
}
