// ABOUTME: Aggregate orchestrator record persisted beside the sessions.
// ABOUTME: Holds counters, the own terminal handle, and every terminal ever spawned.

use crate::session::{Session, SessionStatus, TerminalHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorStatus {
    #[default]
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub spawned: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub status: OrchestratorStatus,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub counters: Counters,
    #[serde(default)]
    pub current_work: String,
    /// The orchestrator's own terminal session, when launched detached.
    #[serde(default)]
    pub terminal: Option<TerminalHandle>,
    /// Every terminal session ever created, for bulk teardown.
    #[serde(default)]
    pub spawned_terminals: Vec<TerminalHandle>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrchestratorState {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Self::default()
        }
    }

    /// Record a freshly created terminal session (deduplicated, append-only).
    pub fn record_spawn(&mut self, handle: &TerminalHandle) {
        if !self.spawned_terminals.contains(handle) {
            self.spawned_terminals.push(handle.clone());
        }
        self.counters.spawned += 1;
    }

    /// Recompute the active/completed/failed counters from the session records.
    ///
    /// Archived sessions count by the status recorded in their archive suffix, which the
    /// caller passes through `archived_as`.
    pub fn refresh_counters<'a>(
        &mut self,
        sessions: impl IntoIterator<Item = (&'a Session, Option<SessionStatus>)>,
    ) {
        let (mut active, mut completed, mut failed) = (0, 0, 0);
        for (session, archived_as) in sessions {
            let status = archived_as.unwrap_or(session.status);
            match status {
                s if s.is_active() => active += 1,
                SessionStatus::Completed => completed += 1,
                SessionStatus::Stopped | SessionStatus::Failed => failed += 1,
                _ => {}
            }
        }
        self.counters.active = active;
        self.counters.completed = completed;
        self.counters.failed = failed;
        self.current_work = format!(
            "{active} active, {completed} completed, {failed} stopped or failed"
        );
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;

    #[test]
    fn test_record_spawn_dedupes_handles() {
        let mut state = OrchestratorState::new("g1");
        let handle = TerminalHandle::new("troupe-intern-bo");
        state.record_spawn(&handle);
        state.record_spawn(&handle);
        assert_eq!(state.spawned_terminals.len(), 1);
        assert_eq!(state.counters.spawned, 2);
    }

    #[test]
    fn test_refresh_counters() {
        let mut running = Session::new("a", Persona::Engineer, "A");
        running.status = SessionStatus::Spawned;
        let mut done = Session::new("b", Persona::Engineer, "B");
        done.status = SessionStatus::Archived;
        let mut stopped = Session::new("c", Persona::Qa, "C");
        stopped.status = SessionStatus::Stopped;

        let mut state = OrchestratorState::new("g1");
        state.refresh_counters([
            (&running, None),
            (&done, Some(SessionStatus::Completed)),
            (&stopped, None),
        ]);
        assert_eq!(state.counters.active, 1);
        assert_eq!(state.counters.completed, 1);
        assert_eq!(state.counters.failed, 1);
        assert!(state.current_work.starts_with("1 active"));
    }
}
