// ABOUTME: Lifecycle monitor that notices when a worker's terminal session has gone away.
// ABOUTME: Classifies finished sessions from their task logs, then kills and archives them.

use super::Workspace;
use anyhow::Result;
use chrono::Utc;
use troupe_core::{ArchiveOutcome, Session, SessionStatus, StoredSession};

#[derive(Debug, Default)]
pub struct MonitorReport {
    pub completed: Vec<String>,
    pub stopped: Vec<String>,
    pub archived: Vec<String>,
}

/// Terminal status for a session whose worker has exited. Only a non-empty,
/// fully completed task log counts as completion.
pub fn classify_exit(ws: &Workspace, id: &str) -> SessionStatus {
    match ws.store.read_tasks(id) {
        Ok(log) if log.all_completed() => SessionStatus::Completed,
        Ok(_) => SessionStatus::Stopped,
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "Task log unreadable, treating as unfinished");
            SessionStatus::Stopped
        }
    }
}

/// Run one monitor pass over every unarchived session.
pub async fn tick(ws: &Workspace) -> Result<MonitorReport> {
    let mut report = MonitorReport::default();
    let sessions: Vec<StoredSession> = ws
        .store
        .list()?
        .into_iter()
        .filter(|s| s.archived_as.is_none())
        .collect();

    for stored in sessions {
        let mut session = stored.session;
        if session.status.is_active() {
            match check_liveness(ws, &mut session, &mut report).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(session = %session.id, error = %e, "Monitor check failed");
                    continue;
                }
            }
        }
        if session.status.is_terminal() {
            archive(ws, &session, &mut report);
        }
    }
    Ok(report)
}

/// Probe the worker's terminal. Returns true when the session has just finished.
async fn check_liveness(
    ws: &Workspace,
    session: &mut Session,
    report: &mut MonitorReport,
) -> Result<bool> {
    let Some(terminal) = session.terminal.clone() else {
        tracing::warn!(session = %session.id, "Active session has no terminal handle");
        return Ok(false);
    };
    let alive = match ws.mux.has_session(&terminal.name).await {
        Ok(alive) => alive,
        Err(e) => {
            tracing::warn!(session = %session.id, terminal = %terminal, error = %e, "Liveness probe failed");
            return Ok(false);
        }
    };

    if alive {
        session.heartbeat();
        let next = if is_idle(ws, session) {
            SessionStatus::Idle
        } else {
            SessionStatus::Spawned
        };
        if session.status != next && session.advance(next) {
            tracing::info!(session = %session.id, status = %next, "Worker activity changed");
        }
        ws.store.save(session)?;
        return Ok(false);
    }

    let next = classify_exit(ws, &session.id);
    if !session.advance(next) {
        return Ok(false);
    }
    ws.store.save(session)?;
    tracing::info!(session = %session.id, status = %next, "Worker finished");
    match next {
        SessionStatus::Completed => report.completed.push(session.id.clone()),
        _ => report.stopped.push(session.id.clone()),
    }

    if let Err(e) = ws.mux.kill_session(&terminal.name).await {
        tracing::warn!(terminal = %terminal, error = %e, "Failed to kill finished terminal");
    }
    Ok(true)
}

/// No worker-written file has changed within the configured window since launch.
fn is_idle(ws: &Workspace, session: &Session) -> bool {
    let Some(after) = ws.config.idle_after() else {
        return false;
    };
    let Ok(after) = chrono::Duration::from_std(after) else {
        return false;
    };
    let launched = session.supervision.map(|s| s.supervised_at);
    let touched = match ws.store.last_activity(&session.id) {
        Ok(touched) => touched,
        Err(e) => {
            tracing::debug!(session = %session.id, error = %e, "Activity unknown");
            return false;
        }
    };
    match launched.max(touched) {
        Some(last) => Utc::now() - last >= after,
        None => false,
    }
}

/// Archive a session in a terminal state. Failures are logged; the terminal status is
/// already persisted, so the next tick retries.
fn archive(ws: &Workspace, session: &Session, report: &mut MonitorReport) {
    match ws.store.archive(&session.id) {
        Ok(ArchiveOutcome::Archived(_)) => report.archived.push(session.id.clone()),
        Ok(ArchiveOutcome::AlreadyArchived(_)) => {}
        Err(e) => {
            tracing::warn!(session = %session.id, error = %e, "Failed to archive session");
        }
    }
}
