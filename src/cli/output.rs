use serde::Serialize;

use crate::model::task::Task;
use crate::model::view::ViewMode;
use crate::ops::reminder::parse_reminder;
use crate::ops::view::{Focus, Projection};
use crate::util::unicode::{display_width, truncate_to_width};

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TaskJson<'a> {
    /// 1-based number in the listed view
    pub number: usize,
    /// Position in the task file
    pub index: usize,
    pub text: &'a str,
    pub done: bool,
    pub star: u8,
    pub indent: usize,
    pub reminder: Option<&'a str>,
}

#[derive(Serialize)]
pub struct TaskListJson<'a> {
    pub view: ViewMode,
    pub tasks: Vec<TaskJson<'a>>,
}

pub fn list_to_json<'a>(tasks: &'a [Task], projection: &Projection) -> TaskListJson<'a> {
    TaskListJson {
        view: projection.mode,
        tasks: projection
            .rows(tasks)
            .into_iter()
            .enumerate()
            .map(|(pos, (index, task))| TaskJson {
                number: pos + 1,
                index,
                text: &task.text,
                done: task.done,
                star: task.star,
                indent: task.indent,
                reminder: task.reminder.as_deref(),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

/// Reminder as shown to the user; unreadable values are shown verbatim.
pub fn format_reminder(raw: &str) -> String {
    match parse_reminder(raw) {
        Some(at) => at.format("%Y-%m-%d %H:%M").to_string(),
        None => raw.to_string(),
    }
}

/// One task row: number, indentation, checkbox, text, star and reminder.
/// With a width, the text is shortened so the whole row fits.
pub fn format_task_line(number: usize, task: &Task, width: Option<usize>) -> String {
    let check = if task.done { 'x' } else { ' ' };
    let prefix = format!("{}. {}[{}] ", number, "  ".repeat(task.indent), check);

    let mut suffix = String::new();
    if task.is_starred() {
        suffix.push_str(&format!(" \u{2605}{}", task.star));
    }
    if let Some(raw) = &task.reminder {
        suffix.push_str(&format!(" \u{23f0} {}", format_reminder(raw)));
    }

    let text = match width {
        Some(w) => {
            let room = w.saturating_sub(display_width(&prefix) + display_width(&suffix));
            truncate_to_width(&task.text, room)
        }
        None => task.text.clone(),
    };
    format!("{}{}{}", prefix, text, suffix).trim_end().to_string()
}

/// The rows of a view, as printed by `tasker list`.
pub fn format_list(tasks: &[Task], projection: &Projection, width: Option<usize>) -> Vec<String> {
    projection
        .rows(tasks)
        .into_iter()
        .enumerate()
        .map(|(pos, (_, task))| format_task_line(pos + 1, task, width))
        .collect()
}

fn view_title(mode: ViewMode) -> &'static str {
    match mode {
        ViewMode::Active => "Active",
        ViewMode::Completed => "Completed",
    }
}

/// The panel screen: a header, the rows with the focused one marked, and the
/// add-a-task row in the active view.
pub fn format_panel(
    tasks: &[Task],
    projection: &Projection,
    focus: Option<Focus>,
    width: Option<usize>,
) -> Vec<String> {
    let mut lines = vec![format!("-- {} ({}) --", view_title(projection.mode), projection.len())];
    let row_width = width.map(|w| w.saturating_sub(2));
    for (pos, (index, task)) in projection.rows(tasks).into_iter().enumerate() {
        let marker = if focus == Some(Focus::Task(index)) { '>' } else { ' ' };
        lines.push(format!("{} {}", marker, format_task_line(pos + 1, task, row_width)));
    }
    if projection.has_placeholder() {
        let marker = if focus == Some(Focus::Placeholder) { '>' } else { ' ' };
        lines.push(format!("{} + add a task", marker));
    }
    lines
}
