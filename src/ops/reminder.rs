//! Reminder due-detection.
//!
//! The sweep itself is a plain function of `(tasks, now)`; whatever drives the
//! event loop decides when to call it. `ReminderScheduler` is only the
//! interval gate the event loop consults each tick.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use regex::Regex;

use crate::model::task::Task;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

static RELATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+((?:\d+[mhd])+)$").expect("valid relative-time regex"));
static RELATIVE_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([mhd])").expect("valid relative-part regex"));

/// Error for user-typed reminder times
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("could not understand reminder time '{0}' (use YYYY-MM-DDTHH:MM or +30m / +2h / +1d)")]
    Unparseable(String),
    #[error("reminder offset '{0}' is too large")]
    OutOfRange(String),
}

/// Emitted when a reminder fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderFired {
    /// Storage index of the task whose reminder fired
    pub index: usize,
    pub text: String,
}

/// A reminder as written: either with an explicit offset or as naive local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stamp {
    Offset(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

fn parse_stamp(value: &str) -> Option<Stamp> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(Stamp::Offset(dt));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return Some(Stamp::Offset(dt));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Stamp::Naive(dt));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(Stamp::Naive)
}

/// Parse a stored reminder into local wall-clock time.
///
/// Naive timestamps are taken as local time. Timestamps with an offset are
/// converted to local time. Date-only values mean local midnight.
pub fn parse_reminder(value: &str) -> Option<NaiveDateTime> {
    match parse_stamp(value)? {
        Stamp::Offset(dt) => Some(dt.with_timezone(&Local).naive_local()),
        Stamp::Naive(dt) => Some(dt),
    }
}

/// The reminder as an absolute UTC instant. Naive values are read as local
/// time; a local time skipped by a DST jump has no instant and yields `None`.
pub fn reminder_utc(value: &str) -> Option<DateTime<Utc>> {
    match parse_stamp(value)? {
        Stamp::Offset(dt) => Some(dt.with_timezone(&Utc)),
        Stamp::Naive(dt) => Local
            .from_local_datetime(&dt)
            .earliest()
            .map(|local| local.with_timezone(&Utc)),
    }
}

/// Storage index of the first open task whose reminder is due at `now`.
/// Unparseable reminders are skipped.
pub fn check_due(tasks: &[Task], now: NaiveDateTime) -> Option<usize> {
    tasks.iter().position(|task| {
        if task.done {
            return false;
        }
        let Some(raw) = task.reminder.as_deref() else {
            return false;
        };
        match parse_reminder(raw) {
            Some(at) => at <= now,
            None => {
                log::debug!("ignoring malformed reminder {:?} on task {:?}", raw, task.text);
                false
            }
        }
    })
}

/// Run one sweep: clear the first due reminder and report it.
/// At most one reminder fires per sweep; others wait for the next tick.
pub fn fire_due(tasks: &mut [Task], now: NaiveDateTime) -> Option<ReminderFired> {
    let index = check_due(tasks, now)?;
    let task = &mut tasks[index];
    task.reminder = None;
    log::info!("reminder fired for task {} ({:?})", index, task.text);
    Some(ReminderFired {
        index,
        text: task.text.clone(),
    })
}

/// Interpret a user-typed reminder time relative to `now`.
///
/// Accepts an empty string (one hour from now), relative offsets such as
/// `+45m`, `+2h`, `+1d` or `+1h30m`, and anything `parse_reminder` accepts.
pub fn parse_when(input: &str, now: NaiveDateTime) -> Result<NaiveDateTime, ReminderError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(now + TimeDelta::hours(1));
    }
    if let Some(caps) = RELATIVE_RE.captures(input) {
        let mut total = TimeDelta::zero();
        for part in RELATIVE_PART_RE.captures_iter(&caps[1]) {
            let amount: i64 = part[1]
                .parse()
                .map_err(|_| ReminderError::OutOfRange(input.to_string()))?;
            let delta = match &part[2] {
                "m" => TimeDelta::try_minutes(amount),
                "h" => TimeDelta::try_hours(amount),
                _ => TimeDelta::try_days(amount),
            }
            .ok_or_else(|| ReminderError::OutOfRange(input.to_string()))?;
            total = total
                .checked_add(&delta)
                .ok_or_else(|| ReminderError::OutOfRange(input.to_string()))?;
        }
        return now
            .checked_add_signed(total)
            .ok_or_else(|| ReminderError::OutOfRange(input.to_string()));
    }
    parse_reminder(input).ok_or_else(|| ReminderError::Unparseable(input.to_string()))
}

/// Decides when the event loop should run the next sweep.
#[derive(Debug, Clone)]
pub struct ReminderScheduler {
    interval: Duration,
    last_sweep: Option<Instant>,
}

impl Default for ReminderScheduler {
    fn default() -> Self {
        ReminderScheduler::new(DEFAULT_SWEEP_INTERVAL)
    }
}

impl ReminderScheduler {
    pub fn new(interval: Duration) -> Self {
        ReminderScheduler {
            interval,
            last_sweep: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True on the first call and then once per interval. Re-arms itself.
    pub fn sweep_due(&mut self, now: Instant) -> bool {
        match self.last_sweep {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_sweep = Some(now);
                true
            }
        }
    }
}
