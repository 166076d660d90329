use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Star palette. Index 0 is the unlit star; 1.. are the lit colors.
pub const STAR_COLORS: [&str; 7] = [
    "#888888", "#FFD700", "#FF4444", "#44FF44", "#4488FF", "#FF44FF", "#FF8800",
];

/// Number of star states a task cycles through.
pub const N_COLORS: u8 = STAR_COLORS.len() as u8;

/// A single to-do entry.
///
/// Tasks live in one flat ordered sequence. Nesting is not stored as links:
/// it is inferred from `indent` (see `ops::hierarchy::group_extent`).
/// Missing keys in the persisted form fall back to the `Default` values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    /// Task text (empty only while a freshly inserted row is being edited)
    #[serde(deserialize_with = "lenient")]
    pub text: String,
    /// Completion flag
    #[serde(deserialize_with = "lenient")]
    pub done: bool,
    /// Star color index in `[0, N_COLORS)`; 0 = unstarred
    #[serde(deserialize_with = "lenient")]
    pub star: u8,
    /// Nesting depth (0 = top-level)
    #[serde(deserialize_with = "lenient")]
    pub indent: usize,
    /// Reminder as an ISO-8601 datetime string, `None` = no reminder
    #[serde(deserialize_with = "lenient")]
    pub reminder: Option<String>,
}

/// Decode one field, falling back to its default for `null` or a value of
/// the wrong type, so one odd record never discards the whole list.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match T::deserialize(value) {
        Ok(v) => Ok(v),
        Err(e) => {
            log::debug!("task field reset to default: {}", e);
            Ok(T::default())
        }
    }
}

impl Default for Task {
    fn default() -> Self {
        Task {
            text: String::new(),
            done: false,
            star: 0,
            indent: 0,
            reminder: None,
        }
    }
}

impl Task {
    /// Create an open, unstarred task at indent 0.
    pub fn new(text: impl Into<String>) -> Self {
        Task {
            text: text.into(),
            ..Task::default()
        }
    }

    /// Builder-style indent setter, mostly for tests and fixtures.
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }

    pub fn is_starred(&self) -> bool {
        self.star > 0
    }

    /// Hex color for this task's star, wrapping out-of-range values.
    pub fn star_color(&self) -> &'static str {
        STAR_COLORS[(self.star % N_COLORS) as usize]
    }
}
