use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Events sent from the file watcher to the panel event loop.
#[derive(Debug, PartialEq, Eq)]
pub enum FileEvent {
    /// The task file was created, modified, replaced or removed.
    Changed(PathBuf),
}

/// Watches the directory holding the task file and reports changes to the
/// task file itself. Watching the directory (not the file) keeps working
/// across atomic rename-over saves.
pub struct TaskFileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<FileEvent>,
}

/// Whether an fs event concerns the task file.
fn is_relevant(event: &Event, data_file: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|p| p.file_name() == data_file.file_name() && p.parent() == data_file.parent())
}

impl TaskFileWatcher {
    /// Start watching. `poll()` should be called on each event-loop tick.
    pub fn start(data_file: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        let data_file = std::path::absolute(data_file).unwrap_or_else(|_| data_file.to_path_buf());
        let dir = match data_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let target = data_file.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(e) => e,
                    Err(e) => {
                        log::debug!("watch error: {}", e);
                        return;
                    }
                };
                if is_relevant(&event, &target) {
                    let _ = tx.send(FileEvent::Changed(target.clone()));
                }
            },
            Config::default(),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        log::debug!("watching {} for changes", data_file.display());
        Ok(TaskFileWatcher {
            _watcher: watcher,
            rx,
        })
    }

    /// Non-blocking poll for pending file events.
    /// Returns all queued events (may be empty).
    pub fn poll(&self) -> Vec<FileEvent> {
        let mut events = Vec::new();
        while let Ok(evt) = self.rx.try_recv() {
            events.push(evt);
        }
        events
    }
}
