// ABOUTME: Session record and lifecycle status model.
// ABOUTME: Enforces monotone transitions created -> spawned -> terminal -> archived.

use crate::persona::Persona;
use crate::usage::Usage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Spawned,
    Idle,
    Stopped,
    Completed,
    Failed,
    Archived,
}

impl SessionStatus {
    /// Lifecycle phase. Transitions may only move to a later phase, except the
    /// lateral spawned <-> idle move inside the running phase.
    fn phase(&self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::Spawned | SessionStatus::Idle => 1,
            SessionStatus::Stopped | SessionStatus::Completed | SessionStatus::Failed => 2,
            SessionStatus::Archived => 3,
        }
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        let (from, to) = (self.phase(), next.phase());
        to > from || (from == 1 && to == 1 && *self != next)
    }

    /// A worker is (believed to be) running in its terminal session.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Spawned | SessionStatus::Idle)
    }

    /// Supervision has ended but the directory has not been archived yet.
    pub fn is_terminal(&self) -> bool {
        self.phase() == 2
    }

    /// Suffix appended to the session directory name when archived.
    pub fn archive_suffix(&self) -> Option<&'static str> {
        match self {
            SessionStatus::Stopped => Some("stopped"),
            SessionStatus::Completed => Some("completed"),
            SessionStatus::Failed => Some("failed"),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Spawned => "spawned",
            SessionStatus::Idle => "idle",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle for the terminal-multiplexer session hosting a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalHandle {
    pub name: String,
}

impl TerminalHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for TerminalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Persisted spawn guard, so a restarted orchestrator knows the session is already supervised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supervision {
    pub supervised_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub persona: Persona,
    pub display_name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub workspace_group: String,
    #[serde(default)]
    pub terminal: Option<TerminalHandle>,
    #[serde(default)]
    pub supervision: Option<Supervision>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,

    // Worker-authored and cost-monitor-authored data live in their own files;
    // the store overlays them on load and never writes them into session.json.
    #[serde(skip)]
    pub current_work: String,
    #[serde(skip)]
    pub usage: Usage,
}

impl Session {
    pub fn new(id: impl Into<String>, persona: Persona, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            persona,
            display_name: display_name.into(),
            status: SessionStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            pid: None,
            workspace_group: String::new(),
            terminal: None,
            supervision: None,
            archived_at: None,
            current_work: String::new(),
            usage: Usage::default(),
        }
    }

    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn is_supervised(&self) -> bool {
        self.supervision.is_some()
    }

    /// Move to `next` if the lifecycle allows it. Returns false (and leaves the
    /// session untouched) for backwards or no-op transitions.
    pub fn advance(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        if next == SessionStatus::Archived {
            self.archived_at = Some(Utc::now());
        }
        self.status = next;
        true
    }

    /// Record a successful launch inside `terminal`.
    pub fn mark_spawned(&mut self, terminal: TerminalHandle, pid: Option<u32>) -> bool {
        if !self.advance(SessionStatus::Spawned) {
            return false;
        }
        let now = Utc::now();
        self.terminal = Some(terminal);
        self.pid = pid;
        self.started_at = Some(now);
        self.supervision = Some(Supervision {
            supervised_at: now,
            heartbeat_at: now,
        });
        true
    }

    pub fn heartbeat(&mut self) {
        if let Some(supervision) = self.supervision.as_mut() {
            supervision.heartbeat_at = Utc::now();
        }
    }
}
