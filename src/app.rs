//! The panel: a long-running controller that owns the task list.
//!
//! All edits happen on the thread that calls [`App::apply`] and [`App::tick`].
//! The file watcher, the sync worker and the stdin reader of [`run_panel`]
//! only hand results over through channels that the loop drains.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};

use crate::cli::output::format_panel;
use crate::io::config_io;
use crate::io::state::{PanelState, read_panel_state, write_panel_state};
use crate::io::store::TaskStore;
use crate::io::watcher::TaskFileWatcher;
use crate::model::config::Config;
use crate::model::task::Task;
use crate::model::view::ViewMode;
use crate::ops::hierarchy::{self, Outcome};
use crate::ops::reminder::{ReminderFired, ReminderScheduler, fire_due, parse_when};
use crate::ops::view::{Focus, Projection, commit_placeholder, project};
use crate::sync::{PushReport, SyncResult, SyncSettings, SyncWorker};

/// How often the panel loop wakes up without input.
pub const TICK: Duration = Duration::from_millis(250);

/// Panel state is written every this many intents (and on quit).
const STATE_SAVE_EVERY: u32 = 5;

/// Row width used when drawing the panel.
const PANEL_WIDTH: usize = 60;

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

/// Something the user asked the panel to do. Edits act on the focused task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Next,
    Previous,
    /// Focus a row by its 1-based number in the current view
    Select(usize),
    ToggleDone,
    ToggleStar,
    Insert,
    Indent,
    Unindent,
    MoveUp,
    MoveDown,
    Delete,
    Edit(String),
    /// Commit text through the add-a-task row
    Add(String),
    /// Set a reminder; the text is parsed when applied (empty = in one hour)
    Remind(String),
    ClearReminder,
    ToggleView,
    Escape,
    Sync { interactive: bool },
    Show,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IntentError {
    #[error("unknown command '{0}' (try: next, prev, sel N, done, star, new, add TEXT, edit TEXT, indent, unindent, mvup, mvdown, rm, remind [WHEN], unremind, view, esc, sync, ls, quit)")]
    Unknown(String),
    #[error("'{0}' needs {1}")]
    MissingArgument(&'static str, &'static str),
    #[error("'{0}' is not a row number")]
    BadNumber(String),
}

impl FromStr for Intent {
    type Err = IntentError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        let needs_text = |name: &'static str| {
            if rest.is_empty() {
                Err(IntentError::MissingArgument(name, "some text"))
            } else {
                Ok(rest.to_string())
            }
        };
        let intent = match word {
            "n" | "next" | "j" => Intent::Next,
            "p" | "prev" | "k" => Intent::Previous,
            "sel" | "select" => {
                if rest.is_empty() {
                    return Err(IntentError::MissingArgument("select", "a row number"));
                }
                match rest.parse::<usize>() {
                    Ok(n) if n > 0 => Intent::Select(n),
                    _ => return Err(IntentError::BadNumber(rest.to_string())),
                }
            }
            "x" | "done" => Intent::ToggleDone,
            "s" | "star" => Intent::ToggleStar,
            "o" | "new" | "insert" => Intent::Insert,
            ">" | "indent" => Intent::Indent,
            "<" | "unindent" => Intent::Unindent,
            "K" | "mvup" => Intent::MoveUp,
            "J" | "mvdown" => Intent::MoveDown,
            "rm" | "delete" => Intent::Delete,
            "e" | "edit" => Intent::Edit(needs_text("edit")?),
            "a" | "add" => Intent::Add(needs_text("add")?),
            "r" | "remind" => Intent::Remind(rest.to_string()),
            "unremind" => Intent::ClearReminder,
            "v" | "view" => Intent::ToggleView,
            "esc" => Intent::Escape,
            "sync" => Intent::Sync {
                interactive: matches!(rest, "-i" | "--interactive"),
            },
            "ls" | "show" | "" => Intent::Show,
            "q" | "quit" => Intent::Quit,
            other => return Err(IntentError::Unknown(other.to_string())),
        };
        Ok(intent)
    }
}

// ---------------------------------------------------------------------------
// Notices
// ---------------------------------------------------------------------------

/// Something the panel wants to tell the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Reminder(ReminderFired),
    Reloaded { count: usize },
    SyncStarted,
    SyncBusy,
    SyncDone(PushReport),
    SyncFailed(String),
    /// The intent is not available right now
    Blocked(&'static str),
    NoSelection,
    Invalid(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Reminder(fired) => write!(f, "Reminder: {}", fired.text),
            Notice::Reloaded { count } => {
                write!(f, "task file changed on disk; reloaded {} tasks", count)
            }
            Notice::SyncStarted => write!(f, "sync started"),
            Notice::SyncBusy => write!(f, "sync already in progress"),
            Notice::SyncDone(report) => {
                write!(f, "synced {} tasks to Microsoft To Do", report.created)
            }
            Notice::SyncFailed(msg) => write!(f, "sync failed: {}", msg),
            Notice::Blocked(why) => write!(f, "{}", why),
            Notice::NoSelection => write!(f, "no task selected"),
            Notice::Invalid(msg) => write!(f, "{}", msg),
        }
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Panel state: the task list, the view and focus, and the timers that
/// drive reminders, reloads and sync.
pub struct App {
    tasks: Vec<Task>,
    view: ViewMode,
    focus: Option<Focus>,
    store: TaskStore,
    config: Config,
    config_dir: PathBuf,
    scheduler: ReminderScheduler,
    watcher: Option<TaskFileWatcher>,
    watch_interval: Duration,
    last_watch_poll: Option<Instant>,
    sync: SyncWorker,
    intents_since_state_save: u32,
    /// Set when the last save was dropped; quit retries it
    unsaved: bool,
    pub should_quit: bool,
}

impl App {
    /// Load the task list and restore the last view and selection.
    pub fn new(config_dir: PathBuf, config: Config, mut store: TaskStore) -> Self {
        let tasks = store.load();
        let saved = read_panel_state(&config_dir).unwrap_or_default();
        let scheduler =
            ReminderScheduler::new(Duration::from_secs(config.reminder_interval_secs.max(1)));
        let watch_interval = Duration::from_secs(config.watch_interval_secs.max(1));
        let mut app = App {
            tasks,
            view: saved.view,
            focus: saved.selected.map(Focus::Task),
            store,
            config,
            config_dir,
            scheduler,
            watcher: None,
            watch_interval,
            last_watch_poll: None,
            sync: SyncWorker::new(),
            intents_since_state_save: 0,
            unsaved: false,
            should_quit: false,
        };
        app.settle_focus();
        app
    }

    /// Start the filesystem watcher. Without it, changes are still picked up
    /// by the periodic modification-time poll.
    pub fn start_watching(&mut self) {
        match TaskFileWatcher::start(self.store.path()) {
            Ok(w) => self.watcher = Some(w),
            Err(e) => log::warn!("file watch unavailable, polling only: {}", e),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn view(&self) -> ViewMode {
        self.view
    }

    pub fn focus(&self) -> Option<Focus> {
        self.focus
    }

    pub fn projection(&self) -> Projection {
        project(&self.tasks, self.view)
    }

    /// Storage index of the focused task.
    pub fn selected(&self) -> Option<usize> {
        match self.focus {
            Some(Focus::Task(i)) => Some(i),
            _ => None,
        }
    }

    pub fn render(&self) -> Vec<String> {
        format_panel(&self.tasks, &self.projection(), self.focus, Some(PANEL_WIDTH))
    }

    /// Apply one intent. `now` is the local wall-clock time, used for
    /// relative reminders.
    pub fn apply(&mut self, intent: Intent, now: NaiveDateTime) -> Vec<Notice> {
        self.intents_since_state_save += 1;
        if self.intents_since_state_save >= STATE_SAVE_EVERY {
            self.save_state();
        }

        let projection = self.projection();
        let notice = match intent {
            Intent::Next => {
                self.focus = match self.focus {
                    Some(from) => projection.next(from).or(self.focus),
                    None => first_focus(&projection),
                };
                None
            }
            Intent::Previous => {
                self.focus = match self.focus {
                    Some(from) => projection.previous(from).or(self.focus),
                    None => projection.index_map.last().map(|&i| Focus::Task(i)),
                };
                None
            }
            Intent::Select(number) => match number.checked_sub(1).and_then(|pos| projection.storage_index(pos)) {
                Some(i) => {
                    self.focus = Some(Focus::Task(i));
                    None
                }
                None => Some(Notice::Invalid(format!(
                    "no task {} in the {} view",
                    number,
                    self.view.name()
                ))),
            },
            Intent::ToggleDone => self.edit(false, |t, i| hierarchy::toggle_done(t, i)),
            Intent::ToggleStar => self.edit(false, |t, i| hierarchy::toggle_star(t, i)),
            Intent::Insert => self.edit(false, |t, i| hierarchy::insert_after(t, i)),
            Intent::Delete => self.edit(false, |t, i| hierarchy::delete(t, i)),
            Intent::Indent => self.edit(true, |t, i| hierarchy::indent(t, i)),
            Intent::Unindent => self.edit(true, |t, i| hierarchy::unindent(t, i)),
            Intent::MoveUp => self.edit(true, |t, i| hierarchy::move_group_up(t, i)),
            Intent::MoveDown => self.edit(true, |t, i| hierarchy::move_group_down(t, i)),
            Intent::Edit(text) => self.edit(false, |tasks, i| hierarchy::set_text(tasks, i, &text)),
            Intent::Remind(when) => match parse_when(&when, now) {
                Ok(at) => self.edit(false, |tasks, i| hierarchy::set_reminder(tasks, i, at)),
                Err(e) => Some(Notice::Invalid(e.to_string())),
            },
            Intent::ClearReminder => self.edit(false, |t, i| hierarchy::clear_reminder(t, i)),
            Intent::Add(text) => self.add(&text),
            Intent::ToggleView => {
                self.view = self.view.toggled();
                self.settle_focus();
                None
            }
            Intent::Escape => {
                // Leave the completed view first; from the active view, hide
                if self.view == ViewMode::Completed {
                    self.view = ViewMode::Active;
                    self.settle_focus();
                    None
                } else {
                    return self.quit();
                }
            }
            Intent::Sync { interactive } => Some(self.start_sync(interactive)),
            Intent::Show => None,
            Intent::Quit => return self.quit(),
        };
        notice.into_iter().collect()
    }

    /// Run an engine edit on the focused task and persist the result.
    fn edit<F>(&mut self, structural: bool, op: F) -> Option<Notice>
    where
        F: FnOnce(&mut Vec<Task>, usize) -> Outcome,
    {
        if structural && !self.view.allows_structure_edits() {
            return Some(Notice::Blocked(
                "indent and move are only available in the active view",
            ));
        }
        let Some(index) = self.selected() else {
            return Some(Notice::NoSelection);
        };
        let outcome = op(&mut self.tasks, index);
        if outcome.changed {
            self.persist();
        }
        self.focus = outcome.selected.map(Focus::Task);
        self.settle_focus();
        None
    }

    fn add(&mut self, text: &str) -> Option<Notice> {
        if self.view != ViewMode::Active {
            return Some(Notice::Blocked("switch to the active view to add tasks"));
        }
        if commit_placeholder(&mut self.tasks, text).changed {
            self.persist();
        }
        // Focus stays on the add row so several tasks can be entered in a row
        self.focus = Some(Focus::Placeholder);
        None
    }

    fn persist(&mut self) {
        self.unsaved = !self.store.save(&self.tasks);
    }

    /// Keep focus on something visible. A task that left the view hands
    /// focus to the nearest visible task after it, then before it.
    fn settle_focus(&mut self) {
        let projection = self.projection();
        let placeholder = projection.has_placeholder().then_some(Focus::Placeholder);
        self.focus = match self.focus {
            Some(Focus::Task(i)) if projection.display_position(i).is_some() => Some(Focus::Task(i)),
            Some(Focus::Task(i)) => projection
                .index_map
                .iter()
                .find(|&&s| s > i)
                .or_else(|| projection.index_map.iter().rev().find(|&&s| s < i))
                .map(|&s| Focus::Task(s))
                .or(placeholder),
            Some(Focus::Placeholder) => placeholder.or_else(|| first_focus(&projection)),
            None => None,
        };
    }

    /// Run whatever is due: a reminder sweep, a reload of external edits and
    /// the completion of a background sync.
    pub fn tick(&mut self, now: Instant, wall: NaiveDateTime) -> Vec<Notice> {
        let mut notices = Vec::new();
        if let Some(n) = self.sweep_reminders(now, wall) {
            notices.push(n);
        }
        if let Some(n) = self.check_file(now) {
            notices.push(n);
        }
        if let Some(result) = self.sync.poll() {
            notices.push(self.finish_sync(result));
        }
        notices
    }

    fn sweep_reminders(&mut self, now: Instant, wall: NaiveDateTime) -> Option<Notice> {
        if !self.scheduler.sweep_due(now) {
            return None;
        }
        let fired = fire_due(&mut self.tasks, wall)?;
        self.persist();
        self.view = ViewMode::Active;
        self.focus = Some(Focus::Task(fired.index));
        Some(Notice::Reminder(fired))
    }

    fn check_file(&mut self, now: Instant) -> Option<Notice> {
        let notified = self.watcher.as_ref().is_some_and(|w| !w.poll().is_empty());
        let poll_due = self
            .last_watch_poll
            .is_none_or(|last| now.duration_since(last) >= self.watch_interval);
        if poll_due {
            self.last_watch_poll = Some(now);
        }
        if !notified && !poll_due {
            return None;
        }
        let tasks = self.store.reload_if_changed(now)?;
        self.tasks = tasks;
        self.settle_focus();
        Some(Notice::Reloaded {
            count: self.tasks.len(),
        })
    }

    fn start_sync(&mut self, interactive: bool) -> Notice {
        let settings =
            match SyncSettings::from_config(&self.config, &self.config_dir, interactive) {
                Ok(s) => s,
                Err(e) => return Notice::SyncFailed(e.to_string()),
            };
        match self.sync.start(self.tasks.clone(), settings) {
            Ok(true) => Notice::SyncStarted,
            Ok(false) => Notice::SyncBusy,
            Err(e) => Notice::SyncFailed(e.to_string()),
        }
    }

    fn finish_sync(&mut self, result: SyncResult) -> Notice {
        match result {
            Ok(outcome) => {
                log::info!("sync finished: {} tasks pushed", outcome.report.created);
                if self.config.ms_account_id.as_deref() != Some(outcome.account_id.as_str()) {
                    match config_io::save_account_id(&self.config_dir, &outcome.account_id) {
                        Ok(()) => self.config.ms_account_id = Some(outcome.account_id),
                        Err(e) => log::warn!("could not record sync account: {}", e),
                    }
                }
                Notice::SyncDone(outcome.report)
            }
            Err(e) => {
                log::error!("sync failed: {}", e);
                Notice::SyncFailed(e.to_string())
            }
        }
    }

    fn save_state(&mut self) {
        self.intents_since_state_save = 0;
        let state = PanelState {
            view: self.view,
            selected: self.selected(),
        };
        if let Err(e) = write_panel_state(&self.config_dir, &state) {
            log::warn!("could not save panel state: {}", e);
        }
    }

    /// Retry any dropped save and, when sync is enabled, push one last time.
    /// Blocks until any push has finished. Every edit is saved as it
    /// happens, so an untouched list is never written back.
    pub fn quit(&mut self) -> Vec<Notice> {
        self.should_quit = true;
        if self.unsaved {
            self.persist();
        }
        self.save_state();

        let mut notices = Vec::new();
        if let Some(result) = self.sync.wait() {
            notices.push(self.finish_sync(result));
        }
        if self.config.sync_configured() {
            notices.push(self.start_sync(false));
            if let Some(result) = self.sync.wait() {
                notices.push(self.finish_sync(result));
            }
        }
        notices
    }

    #[cfg(test)]
    fn sync_worker(&mut self) -> &mut SyncWorker {
        &mut self.sync
    }
}

fn first_focus(projection: &Projection) -> Option<Focus> {
    projection
        .index_map
        .first()
        .map(|&i| Focus::Task(i))
        .or(projection.has_placeholder().then_some(Focus::Placeholder))
}

// ---------------------------------------------------------------------------
// Panel loop
// ---------------------------------------------------------------------------

fn print_screen<W: Write>(app: &App, out: &mut W) -> io::Result<()> {
    for line in app.render() {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}

fn print_notices<W: Write>(notices: &[Notice], out: &mut W) -> io::Result<()> {
    for notice in notices {
        writeln!(out, "* {}", notice)?;
    }
    out.flush()
}

/// Drive the panel from line-based input until it quits or input ends.
/// Input is read on its own thread so timers keep running while idle.
pub fn run_panel<R, W>(app: &mut App, input: R, out: &mut W) -> io::Result<()>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("tasker-input".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    print_screen(app, out)?;
    while !app.should_quit {
        match rx.recv_timeout(TICK) {
            Ok(line) => {
                let notices = match line.parse::<Intent>() {
                    Ok(intent) => app.apply(intent, Local::now().naive_local()),
                    Err(e) => vec![Notice::Invalid(e.to_string())],
                };
                print_notices(&notices, out)?;
                if !app.should_quit {
                    print_screen(app, out)?;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let notices = app.quit();
                print_notices(&notices, out)?;
                break;
            }
        }

        let notices = app.tick(Instant::now(), Local::now().naive_local());
        if !notices.is_empty() {
            print_notices(&notices, out)?;
            print_screen(app, out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::load_tasks;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn now() -> NaiveDateTime {
        at("2024-01-01T10:00:00")
    }

    fn setup(tasks: &[Task]) -> (TempDir, App) {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("tasks.json");
        fs::write(&data, serde_json::to_string(tasks).unwrap()).unwrap();
        let app = App::new(tmp.path().to_path_buf(), Config::default(), TaskStore::open(&data));
        (tmp, app)
    }

    fn saved(tmp: &TempDir) -> Vec<Task> {
        load_tasks(&tmp.path().join("tasks.json"))
    }

    fn texts(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_parse_intents() {
        assert_eq!("next".parse(), Ok(Intent::Next));
        assert_eq!("sel 3".parse(), Ok(Intent::Select(3)));
        assert_eq!("add  Buy milk ".parse(), Ok(Intent::Add("Buy milk".into())));
        assert_eq!("remind".parse(), Ok(Intent::Remind(String::new())));
        assert_eq!("remind +2h".parse(), Ok(Intent::Remind("+2h".into())));
        assert_eq!(
            "sync -i".parse(),
            Ok(Intent::Sync { interactive: true })
        );
        assert_eq!("".parse(), Ok(Intent::Show));
        assert_eq!(
            "add".parse::<Intent>(),
            Err(IntentError::MissingArgument("add", "some text"))
        );
        assert_eq!(
            "sel 0".parse::<Intent>(),
            Err(IntentError::BadNumber("0".into()))
        );
        assert!(matches!("dance".parse::<Intent>(), Err(IntentError::Unknown(_))));
    }

    #[test]
    fn test_navigation_reaches_placeholder() {
        let (_tmp, mut app) = setup(&[Task::new("A"), Task::new("B")]);
        assert_eq!(app.focus(), None);
        app.apply(Intent::Next, now());
        assert_eq!(app.focus(), Some(Focus::Task(0)));
        app.apply(Intent::Next, now());
        app.apply(Intent::Next, now());
        assert_eq!(app.focus(), Some(Focus::Placeholder));
        app.apply(Intent::Next, now());
        assert_eq!(app.focus(), Some(Focus::Placeholder));
        app.apply(Intent::Previous, now());
        assert_eq!(app.focus(), Some(Focus::Task(1)));
    }

    #[test]
    fn test_edits_are_saved() {
        let (tmp, mut app) = setup(&[Task::new("A"), Task::new("B")]);
        app.apply(Intent::Select(2), now());
        app.apply(Intent::Indent, now());
        app.apply(Intent::ToggleStar, now());
        let on_disk = saved(&tmp);
        assert_eq!(on_disk[1].indent, 1);
        assert_eq!(on_disk[1].star, 1);
    }

    #[test]
    fn test_done_task_leaves_active_view() {
        let (tmp, mut app) = setup(&[Task::new("A"), Task::new("B").with_indent(1), Task::new("C")]);
        app.apply(Intent::Select(1), now());
        app.apply(Intent::ToggleDone, now());

        assert!(saved(&tmp)[0].done && saved(&tmp)[1].done);
        // Focus moves to the next visible task
        assert_eq!(app.focus(), Some(Focus::Task(2)));
        assert_eq!(app.projection().index_map, vec![2]);
    }

    #[test]
    fn test_structure_edits_blocked_in_completed_view() {
        let mut a = Task::new("A");
        a.done = true;
        let mut b = Task::new("B");
        b.done = true;
        let (_tmp, mut app) = setup(&[a, b]);
        app.apply(Intent::ToggleView, now());
        app.apply(Intent::Select(2), now());
        let notices = app.apply(Intent::Indent, now());
        assert!(matches!(notices.as_slice(), [Notice::Blocked(_)]));
        assert_eq!(app.tasks()[1].indent, 0);
        let notices = app.apply(Intent::MoveUp, now());
        assert!(matches!(notices.as_slice(), [Notice::Blocked(_)]));
        assert_eq!(texts(app.tasks()), ["A", "B"]);
    }

    #[test]
    fn test_edit_without_selection() {
        let (_tmp, mut app) = setup(&[Task::new("A")]);
        assert_eq!(app.apply(Intent::ToggleDone, now()), vec![Notice::NoSelection]);
    }

    #[test]
    fn test_add_keeps_focus_on_placeholder() {
        let (tmp, mut app) = setup(&[]);
        app.apply(Intent::Add("  first ".into()), now());
        app.apply(Intent::Add("second".into()), now());
        assert_eq!(texts(&saved(&tmp)), ["first", "second"]);
        assert_eq!(app.focus(), Some(Focus::Placeholder));
    }

    #[test]
    fn test_add_blocked_in_completed_view() {
        let (_tmp, mut app) = setup(&[]);
        app.apply(Intent::ToggleView, now());
        let notices = app.apply(Intent::Add("x".into()), now());
        assert!(matches!(notices.as_slice(), [Notice::Blocked(_)]));
        assert!(app.tasks().is_empty());
    }

    #[test]
    fn test_remind_relative_and_invalid() {
        let (tmp, mut app) = setup(&[Task::new("A")]);
        app.apply(Intent::Select(1), now());
        app.apply(Intent::Remind("+90m".into()), now());
        assert_eq!(saved(&tmp)[0].reminder.as_deref(), Some("2024-01-01T11:30:00"));

        let notices = app.apply(Intent::Remind("whenever".into()), now());
        assert!(matches!(notices.as_slice(), [Notice::Invalid(_)]));

        app.apply(Intent::ClearReminder, now());
        assert_eq!(saved(&tmp)[0].reminder, None);
    }

    #[test]
    fn test_escape_is_layered() {
        let (_tmp, mut app) = setup(&[Task::new("A")]);
        app.apply(Intent::ToggleView, now());
        assert_eq!(app.view(), ViewMode::Completed);
        app.apply(Intent::Escape, now());
        assert_eq!(app.view(), ViewMode::Active);
        assert!(!app.should_quit);
        app.apply(Intent::Escape, now());
        assert!(app.should_quit);
    }

    #[test]
    fn test_reminder_fire_switches_view_and_selects() {
        let mut done = Task::new("old");
        done.done = true;
        let mut due = Task::new("Call Bob");
        due.reminder = Some("2024-01-01T00:00:00".into());
        let (tmp, mut app) = setup(&[done, Task::new("A"), due]);
        app.apply(Intent::ToggleView, now());

        let t0 = Instant::now();
        let notices = app.tick(t0, at("2024-01-02T00:00:00"));
        assert_eq!(
            notices,
            vec![Notice::Reminder(ReminderFired {
                index: 2,
                text: "Call Bob".into()
            })]
        );
        assert_eq!(app.view(), ViewMode::Active);
        assert_eq!(app.focus(), Some(Focus::Task(2)));
        assert_eq!(saved(&tmp)[2].reminder, None);

        // Fired once: the next sweep finds nothing
        let later = t0 + Duration::from_secs(60);
        assert!(app.tick(later, at("2024-01-03T00:00:00")).is_empty());
    }

    #[test]
    fn test_sweep_waits_for_interval() {
        let mut due = Task::new("Later");
        due.reminder = Some("2024-01-01T12:00:00".into());
        let (_tmp, mut app) = setup(&[due]);
        let t0 = Instant::now();
        assert!(app.tick(t0, at("2024-01-01T11:00:00")).is_empty());
        // Due now, but the 30 s interval has not elapsed
        assert!(app.tick(t0 + Duration::from_secs(5), at("2024-01-01T12:00:00")).is_empty());
        let notices = app.tick(t0 + Duration::from_secs(30), at("2024-01-01T12:00:00"));
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn test_external_edit_reloads_after_debounce() {
        let (tmp, mut app) = setup(&[Task::new("A")]);
        app.apply(Intent::Select(1), now());
        app.apply(Intent::ToggleStar, now());
        let saved_at = Instant::now();

        let data = tmp.path().join("tasks.json");
        // Make sure the new mtime differs from the one the store recorded
        std::thread::sleep(Duration::from_millis(20));
        fs::write(&data, r#"[{"text":"X"},{"text":"Y"}]"#).unwrap();
        let file = fs::File::options().write(true).open(&data).unwrap();
        file.set_modified(std::time::SystemTime::now() + Duration::from_secs(10)).unwrap();

        // Inside the self-save window nothing is reloaded
        assert!(app.tick(saved_at, now()).iter().all(|n| !matches!(n, Notice::Reloaded { .. })));

        let later = saved_at + Duration::from_secs(120);
        let notices = app.tick(later, now());
        assert!(notices.contains(&Notice::Reloaded { count: 2 }));
        assert_eq!(texts(app.tasks()), ["X", "Y"]);
    }

    #[test]
    fn test_undecodable_external_edit_keeps_list() {
        let (tmp, mut app) = setup(&[Task::new("A"), Task::new("B")]);
        let data = tmp.path().join("tasks.json");
        let broken = r#"[{"text":"A"},{"te"#;
        fs::write(&data, broken).unwrap();
        let file = fs::File::options().write(true).open(&data).unwrap();
        file.set_modified(std::time::SystemTime::now() + Duration::from_secs(10)).unwrap();

        let notices = app.tick(Instant::now() + Duration::from_secs(120), now());
        assert!(notices.iter().all(|n| !matches!(n, Notice::Reloaded { .. })));
        assert_eq!(texts(app.tasks()), ["A", "B"]);

        app.quit();
        assert_eq!(fs::read_to_string(&data).unwrap(), broken);
    }

    #[test]
    fn test_quit_without_edits_leaves_file_alone() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("tasks.json");
        fs::write(&data, "{not json").unwrap();
        let mut app = App::new(tmp.path().to_path_buf(), Config::default(), TaskStore::open(&data));
        assert!(app.tasks().is_empty());
        app.apply(Intent::Next, now());
        app.quit();
        assert_eq!(fs::read_to_string(&data).unwrap(), "{not json");
    }

    #[test]
    fn test_sync_completion_records_account() {
        let (tmp, mut app) = setup(&[Task::new("A")]);
        let started = app
            .sync_worker()
            .start_with(Vec::new(), |_| {
                Ok(crate::sync::SyncOutcome {
                    account_id: "acct-42".into(),
                    report: PushReport {
                        list_id: "l".into(),
                        deleted: 0,
                        created: 1,
                    },
                })
            })
            .unwrap();
        assert!(started);
        let result = app.sync_worker().wait().unwrap();
        let notice = app.finish_sync(result);
        assert!(matches!(notice, Notice::SyncDone(_)));

        let (config, _) = config_io::read_config(tmp.path()).unwrap().unwrap();
        assert_eq!(config.ms_account_id.as_deref(), Some("acct-42"));
    }

    #[test]
    fn test_sync_without_client_id_fails_cleanly() {
        let (_tmp, mut app) = setup(&[Task::new("A")]);
        let notices = app.apply(Intent::Sync { interactive: false }, now());
        assert!(matches!(notices.as_slice(), [Notice::SyncFailed(_)]));
        assert_eq!(texts(app.tasks()), ["A"]);
    }

    #[test]
    fn test_quit_persists_state_and_restores() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("tasks.json");
        {
            let mut app = App::new(tmp.path().to_path_buf(), Config::default(), TaskStore::open(&data));
            app.apply(Intent::Add("A".into()), now());
            app.apply(Intent::Add("B".into()), now());
            app.apply(Intent::Select(2), now());
            assert!(app.quit().is_empty());
        }
        let app = App::new(tmp.path().to_path_buf(), Config::default(), TaskStore::open(&data));
        assert_eq!(texts(app.tasks()), ["A", "B"]);
        assert_eq!(app.focus(), Some(Focus::Task(1)));
    }

    #[test]
    fn test_run_panel_script() {
        let (tmp, mut app) = setup(&[]);
        let input = io::Cursor::new("add Buy milk\nsel 1\nstar\nbogus\nquit\n");
        let mut out = Vec::new();
        run_panel(&mut app, input, &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("-- Active (1) --"));
        assert!(out.contains("> 1. [ ] Buy milk \u{2605}1"));
        assert!(out.contains("* unknown command 'bogus'"));
        assert_eq!(saved(&tmp)[0].star, 1);
        assert!(app.should_quit);
    }

    #[test]
    fn test_run_panel_quits_when_input_ends() {
        let (_tmp, mut app) = setup(&[Task::new("A")]);
        let mut out = Vec::new();
        run_panel(&mut app, io::Cursor::new(""), &mut out).unwrap();
        assert!(app.should_quit);
    }
}
