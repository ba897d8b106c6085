// ABOUTME: Per-session task log, written by workers as a TOML array of tables.
// ABOUTME: Reading falls back to scanning keyed status lines for unfamiliar or half-written layouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not-started",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
        }
    }

    /// Lenient parse used for hand-written logs ("done", "in_progress", ...).
    pub fn parse_loose(raw: &str) -> Option<TaskStatus> {
        match raw.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "not-started" | "todo" | "pending" | "open" => Some(TaskStatus::NotStarted),
            "in-progress" | "started" | "doing" | "active" => Some(TaskStatus::InProgress),
            "completed" | "complete" | "done" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_by: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>, assigned_by: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: TaskStatus::NotStarted,
            assigned_by: assigned_by.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskFile {
    #[serde(default)]
    task: Vec<Task>,
}

/// What the orchestrator could make of a task log.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskLog {
    /// Fully parsed entries.
    Parsed(Vec<Task>),
    /// Only the keyed status lines could be recovered. Unknown values map to `None`.
    Scanned(Vec<Option<TaskStatus>>),
}

impl TaskLog {
    pub fn parse(content: &str) -> TaskLog {
        match toml::from_str::<TaskFile>(content) {
            Ok(file) if !file.task.is_empty() => TaskLog::Parsed(file.task),
            Ok(_) => match scan_statuses(content) {
                statuses if statuses.is_empty() => TaskLog::Parsed(Vec::new()),
                statuses => TaskLog::Scanned(statuses),
            },
            Err(_) => TaskLog::Scanned(scan_statuses(content)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TaskLog::Parsed(tasks) => tasks.len(),
            TaskLog::Scanned(statuses) => statuses.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True only when at least one task exists and every entry reads "completed".
    pub fn all_completed(&self) -> bool {
        match self {
            TaskLog::Parsed(tasks) => {
                !tasks.is_empty() && tasks.iter().all(|t| t.status == TaskStatus::Completed)
            }
            TaskLog::Scanned(statuses) => {
                !statuses.is_empty()
                    && statuses.iter().all(|s| *s == Some(TaskStatus::Completed))
            }
        }
    }

    /// (completed, total), for display.
    pub fn progress(&self) -> (usize, usize) {
        let done = match self {
            TaskLog::Parsed(tasks) => tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            TaskLog::Scanned(statuses) => statuses
                .iter()
                .filter(|s| **s == Some(TaskStatus::Completed))
                .count(),
        };
        (done, self.len())
    }
}

/// Collect `status = "x"` or `status: x` lines, one per task entry.
fn scan_statuses(content: &str) -> Vec<Option<TaskStatus>> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*']).trim();
            let rest = line.strip_prefix("status")?;
            let rest = rest.trim_start();
            let value = rest
                .strip_prefix('=')
                .or_else(|| rest.strip_prefix(':'))?
                .trim()
                .trim_matches(['"', '\'']);
            Some(TaskStatus::parse_loose(value))
        })
        .collect()
}

/// Serialize a task list in the on-disk format.
pub fn render_tasks(tasks: &[Task]) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&TaskFile {
        task: tasks.to_vec(),
    })
}
