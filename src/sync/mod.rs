//! One-way push of the task list to Microsoft To Do.
//!
//! A push is a destructive replace: the remote list is emptied and every
//! local task is recreated in local order. The local list is never touched,
//! so a failed push leaves nothing to roll back.

pub mod auth;
pub mod graph;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::config::Config;
use crate::model::task::Task;
use crate::ops::reminder::{parse_reminder, reminder_utc};

pub use auth::AuthError;

/// Title used for tasks whose text is blank.
pub const UNTITLED: &str = "(untitled)";

const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const WIRE_TIME_ZONE: &str = "UTC";

/// Error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{method} {url} failed: {status} {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected response from {url}: {message}")]
    Response { url: String, message: String },
    #[error("task list name is empty")]
    EmptyListName,
    #[error("sync worker: {0}")]
    Worker(String),
}

// ---------------------------------------------------------------------------
// Payload mapping
// ---------------------------------------------------------------------------

/// Graph `dateTimeTimeZone`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphDateTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone")]
    pub time_zone: String,
}

impl GraphDateTime {
    fn utc(date_time: String) -> Self {
        GraphDateTime {
            date_time,
            time_zone: WIRE_TIME_ZONE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    NotStarted,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Importance {
    High,
}

/// Body of a `todoTask` create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub title: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<Importance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date_time: Option<GraphDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_date_time: Option<GraphDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_reminder_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_date_time: Option<GraphDateTime>,
}

/// Map one task to its remote representation. `now` stamps completed tasks.
pub fn task_payload(task: &Task, now: DateTime<Utc>) -> TaskPayload {
    let title = match task.text.trim() {
        "" => UNTITLED.to_string(),
        t => t.to_string(),
    };
    let mut payload = TaskPayload {
        title,
        status: if task.done {
            TaskStatus::Completed
        } else {
            TaskStatus::NotStarted
        },
        importance: task.is_starred().then_some(Importance::High),
        due_date_time: None,
        reminder_date_time: None,
        is_reminder_on: None,
        completed_date_time: None,
    };

    if let Some(raw) = task.reminder.as_deref().filter(|r| !r.trim().is_empty()) {
        match (parse_reminder(raw), reminder_utc(raw)) {
            (Some(local), Some(utc)) => {
                // Due dates are whole days in the user's calendar
                payload.due_date_time = Some(GraphDateTime::utc(
                    local.date().format("%Y-%m-%dT00:00:00").to_string(),
                ));
                payload.reminder_date_time =
                    Some(GraphDateTime::utc(utc.format(WIRE_FORMAT).to_string()));
                payload.is_reminder_on = Some(true);
            }
            _ => log::warn!(
                "not pushing unreadable reminder {:?} on task {:?}",
                raw,
                task.text
            ),
        }
    }

    if task.done {
        payload.completed_date_time =
            Some(GraphDateTime::utc(now.format(WIRE_FORMAT).to_string()));
    }
    payload
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// The remote operations a push needs.
pub trait RemoteTaskList {
    /// Id of the list named `name`, creating it when absent.
    fn find_or_create_list(&mut self, name: &str) -> Result<String, SyncError>;
    /// Ids of every task in the list, across all pages.
    fn task_ids(&mut self, list_id: &str) -> Result<Vec<String>, SyncError>;
    fn delete_task(&mut self, list_id: &str, task_id: &str) -> Result<(), SyncError>;
    fn create_task(&mut self, list_id: &str, payload: &TaskPayload) -> Result<(), SyncError>;
}

/// What a finished push did on the remote side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub list_id: String,
    pub deleted: usize,
    pub created: usize,
}

/// Replace the contents of the remote list `list_name` with `tasks`.
pub fn push_tasks<R: RemoteTaskList + ?Sized>(
    remote: &mut R,
    list_name: &str,
    tasks: &[Task],
    now: DateTime<Utc>,
) -> Result<PushReport, SyncError> {
    let list_name = list_name.trim();
    if list_name.is_empty() {
        return Err(SyncError::EmptyListName);
    }
    let payloads: Vec<TaskPayload> = tasks.iter().map(|t| task_payload(t, now)).collect();

    let list_id = remote.find_or_create_list(list_name)?;
    let existing = remote.task_ids(&list_id)?;
    for task_id in &existing {
        remote.delete_task(&list_id, task_id)?;
    }
    for payload in &payloads {
        remote.create_task(&list_id, payload)?;
    }

    log::debug!(
        "list {:?}: removed {} remote tasks, created {}",
        list_name,
        existing.len(),
        payloads.len()
    );
    Ok(PushReport {
        list_id,
        deleted: existing.len(),
        created: payloads.len(),
    })
}

/// Everything a push needs besides the tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub client_id: String,
    pub list_name: String,
    pub account_id: Option<String>,
    /// Allow a device-code sign-in when no cached token works
    pub interactive: bool,
    pub token_cache: PathBuf,
}

impl SyncSettings {
    pub fn from_config(config: &Config, config_dir: &Path, interactive: bool) -> Result<Self, SyncError> {
        let client_id = config.ms_client_id.trim();
        if client_id.is_empty() {
            return Err(AuthError::MissingClientId.into());
        }
        Ok(SyncSettings {
            client_id: client_id.to_string(),
            list_name: config.ms_tasklist_name.clone(),
            account_id: config.ms_account_id.clone().filter(|a| !a.is_empty()),
            interactive,
            token_cache: config_dir.join(auth::TOKEN_CACHE_FILE),
        })
    }
}

/// Result of a completed push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Account the token came from; callers persist it for the next push
    pub account_id: String,
    pub report: PushReport,
}

pub type SyncResult = Result<SyncOutcome, SyncError>;

/// Sign in and push `tasks`. Blocks on the network.
pub fn run_sync(tasks: &[Task], settings: &SyncSettings) -> SyncResult {
    log::info!(
        "sync: pushing {} tasks to list {:?}",
        tasks.len(),
        settings.list_name
    );
    let authenticator = auth::Authenticator::new(&settings.client_id, &settings.token_cache)?;
    let signed_in = authenticator.acquire(settings.account_id.as_deref(), settings.interactive)?;
    let mut client = graph::GraphClient::new(signed_in.access_token)?;
    let report = push_tasks(&mut client, &settings.list_name, tasks, Utc::now())?;
    Ok(SyncOutcome {
        account_id: signed_in.account_id,
        report,
    })
}

// ---------------------------------------------------------------------------
// Background worker
// ---------------------------------------------------------------------------

struct InFlight {
    rx: Receiver<SyncResult>,
    handle: JoinHandle<()>,
}

/// Runs at most one push at a time on a background thread. The owner polls
/// for the result from its own loop, so completions are handled there.
#[derive(Default)]
pub struct SyncWorker {
    in_flight: Option<InFlight>,
}

impl SyncWorker {
    pub fn new() -> Self {
        SyncWorker::default()
    }

    /// True from `start` until the result has been taken by `poll` or `wait`.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Push a snapshot in the background. Returns `Ok(false)` when a push is
    /// already in flight.
    pub fn start(&mut self, tasks: Vec<Task>, settings: SyncSettings) -> Result<bool, SyncError> {
        self.start_with(tasks, move |tasks| run_sync(&tasks, &settings))
    }

    /// Like `start`, with the push itself supplied by the caller.
    pub fn start_with<F>(&mut self, tasks: Vec<Task>, job: F) -> Result<bool, SyncError>
    where
        F: FnOnce(Vec<Task>) -> SyncResult + Send + 'static,
    {
        if self.is_busy() {
            log::info!("sync already in progress; not starting another");
            return Ok(false);
        }
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("tasker-sync".to_string())
            .spawn(move || {
                // The receiver is gone only if the owner was dropped
                let _ = tx.send(job(tasks));
            })
            .map_err(|e| SyncError::Worker(format!("could not start: {e}")))?;
        self.in_flight = Some(InFlight { rx, handle });
        Ok(true)
    }

    /// Non-blocking check for a finished push.
    pub fn poll(&mut self) -> Option<SyncResult> {
        let result = match self.in_flight.as_ref()?.rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(SyncError::Worker("stopped without a result".into())),
        };
        self.finish();
        Some(result)
    }

    /// Block until the in-flight push finishes. `None` when idle.
    pub fn wait(&mut self) -> Option<SyncResult> {
        let result = match self.in_flight.as_ref()?.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(SyncError::Worker("stopped without a result".into())),
        };
        self.finish();
        Some(result)
    }

    fn finish(&mut self) {
        if let Some(done) = self.in_flight.take() {
            if done.handle.join().is_err() {
                log::error!("sync worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, NaiveDateTime, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap()
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        FindList(String),
        ListTasks(String),
        Delete(String),
        Create(String),
    }

    #[derive(Default)]
    struct FakeRemote {
        existing: Vec<String>,
        calls: Vec<Call>,
        fail_create_after: Option<usize>,
    }

    impl RemoteTaskList for FakeRemote {
        fn find_or_create_list(&mut self, name: &str) -> Result<String, SyncError> {
            self.calls.push(Call::FindList(name.to_string()));
            Ok("list-1".to_string())
        }

        fn task_ids(&mut self, list_id: &str) -> Result<Vec<String>, SyncError> {
            self.calls.push(Call::ListTasks(list_id.to_string()));
            Ok(self.existing.clone())
        }

        fn delete_task(&mut self, _list_id: &str, task_id: &str) -> Result<(), SyncError> {
            self.calls.push(Call::Delete(task_id.to_string()));
            Ok(())
        }

        fn create_task(&mut self, _list_id: &str, payload: &TaskPayload) -> Result<(), SyncError> {
            let created = self
                .calls
                .iter()
                .filter(|c| matches!(c, Call::Create(_)))
                .count();
            if self.fail_create_after == Some(created) {
                return Err(SyncError::Http {
                    method: "POST".into(),
                    url: "https://example.test".into(),
                    status: 503,
                    body: "busy".into(),
                });
            }
            self.calls.push(Call::Create(payload.title.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_payload_plain_open_task() {
        let payload = task_payload(&Task::new("  Buy milk "), now());
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"title": "Buy milk", "status": "notStarted"})
        );
    }

    #[test]
    fn test_payload_blank_title_and_star() {
        let task = Task {
            star: 3,
            ..Task::new("   ")
        };
        let payload = task_payload(&task, now());
        assert_eq!(payload.title, UNTITLED);
        assert_eq!(payload.importance, Some(Importance::High));
    }

    #[test]
    fn test_payload_done_gets_completion_stamp() {
        let task = Task {
            done: true,
            ..Task::new("Ship it")
        };
        assert_eq!(
            serde_json::to_value(task_payload(&task, now())).unwrap(),
            json!({
                "title": "Ship it",
                "status": "completed",
                "completedDateTime": {"dateTime": "2024-03-04T05:06:07", "timeZone": "UTC"}
            })
        );
    }

    #[test]
    fn test_payload_reminder_with_offset() {
        let task = Task {
            reminder: Some("2024-06-01T14:00:00.250+02:00".into()),
            ..Task::new("Call")
        };
        let payload = task_payload(&task, now());

        let local_day = Utc
            .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .unwrap()
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(
            payload.due_date_time,
            Some(GraphDateTime::utc(format!("{}T00:00:00", local_day.format("%Y-%m-%d"))))
        );
        assert_eq!(
            payload.reminder_date_time,
            Some(GraphDateTime::utc("2024-06-01T12:00:00".into()))
        );
        assert_eq!(payload.is_reminder_on, Some(true));
    }

    #[test]
    fn test_payload_naive_reminder_is_local_time() {
        let task = Task {
            reminder: Some("2024-01-15T09:30:00".into()),
            ..Task::new("Standup")
        };
        let payload = task_payload(&task, now());

        let naive = NaiveDateTime::parse_from_str("2024-01-15T09:30:00", WIRE_FORMAT).unwrap();
        let expected = Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
            .format(WIRE_FORMAT)
            .to_string();
        assert_eq!(
            payload.due_date_time,
            Some(GraphDateTime::utc("2024-01-15T00:00:00".into()))
        );
        assert_eq!(payload.reminder_date_time, Some(GraphDateTime::utc(expected)));
    }

    #[test]
    fn test_payload_skips_unreadable_reminder() {
        let task = Task {
            reminder: Some("next tuesday".into()),
            ..Task::new("Vague")
        };
        let payload = task_payload(&task, now());
        assert_eq!(payload.due_date_time, None);
        assert_eq!(payload.reminder_date_time, None);
        assert_eq!(payload.is_reminder_on, None);
    }

    #[test]
    fn test_push_replaces_remote_contents_in_order() {
        let mut remote = FakeRemote {
            existing: vec!["old-1".into(), "old-2".into()],
            ..Default::default()
        };
        let tasks = vec![Task::new("A"), Task::new("B").with_indent(1), Task::new("C")];

        let report = push_tasks(&mut remote, " Tasker ", &tasks, now()).unwrap();

        assert_eq!(
            report,
            PushReport {
                list_id: "list-1".into(),
                deleted: 2,
                created: 3,
            }
        );
        assert_eq!(
            remote.calls,
            vec![
                Call::FindList("Tasker".into()),
                Call::ListTasks("list-1".into()),
                Call::Delete("old-1".into()),
                Call::Delete("old-2".into()),
                Call::Create("A".into()),
                Call::Create("B".into()),
                Call::Create("C".into()),
            ]
        );
    }

    #[test]
    fn test_push_failure_is_reported() {
        let mut remote = FakeRemote {
            fail_create_after: Some(1),
            ..Default::default()
        };
        let tasks = vec![Task::new("A"), Task::new("B")];
        let err = push_tasks(&mut remote, "Tasker", &tasks, now()).unwrap_err();
        assert_eq!(err.to_string(), "POST https://example.test failed: 503 busy");
    }

    #[test]
    fn test_push_rejects_blank_list_name() {
        let mut remote = FakeRemote::default();
        let err = push_tasks(&mut remote, "  ", &[], now()).unwrap_err();
        assert!(matches!(err, SyncError::EmptyListName));
        assert!(remote.calls.is_empty());
    }

    #[test]
    fn test_settings_need_client_id() {
        let dir = Path::new("/tmp/tasker-test");
        let config = Config::default();
        let err = SyncSettings::from_config(&config, dir, false).unwrap_err();
        assert!(matches!(err, SyncError::Auth(AuthError::MissingClientId)));

        let config = Config {
            ms_client_id: " abc ".into(),
            ms_account_id: Some(String::new()),
            ..Config::default()
        };
        let settings = SyncSettings::from_config(&config, dir, true).unwrap();
        assert_eq!(settings.client_id, "abc");
        assert_eq!(settings.list_name, "Tasker");
        assert_eq!(settings.account_id, None);
        assert_eq!(settings.token_cache, dir.join(auth::TOKEN_CACHE_FILE));
    }

    fn ok_outcome(n: usize) -> SyncResult {
        Ok(SyncOutcome {
            account_id: "acct".into(),
            report: PushReport {
                list_id: "l".into(),
                deleted: 0,
                created: n,
            },
        })
    }

    #[test]
    fn test_worker_runs_one_push_at_a_time() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut worker = SyncWorker::new();

        let started = worker
            .start_with(vec![Task::new("A")], move |tasks| {
                release_rx.recv().unwrap();
                ok_outcome(tasks.len())
            })
            .unwrap();
        assert!(started);
        assert!(worker.is_busy());
        assert!(worker.poll().is_none());

        let second = worker.start_with(Vec::new(), |_| ok_outcome(0)).unwrap();
        assert!(!second);

        release_tx.send(()).unwrap();
        let result = worker.wait().unwrap().unwrap();
        assert_eq!(result.report.created, 1);
        assert!(!worker.is_busy());
        assert!(worker.wait().is_none());
    }

    #[test]
    fn test_worker_delivers_failure() {
        let mut worker = SyncWorker::new();
        worker
            .start_with(Vec::new(), |_| Err(SyncError::EmptyListName))
            .unwrap();
        let result = worker.wait().unwrap();
        assert!(matches!(result, Err(SyncError::EmptyListName)));
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let mut worker = SyncWorker::new();
        worker.start_with(Vec::new(), |_| panic!("boom")).unwrap();
        let result = worker.wait().unwrap();
        assert!(matches!(result, Err(SyncError::Worker(_))));
        assert!(!worker.is_busy());
    }
}
