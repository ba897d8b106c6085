// ABOUTME: File-backed session store rooted at the workspace directory.
// ABOUTME: Every record update is an atomic write-then-rename; each file has a single writer role.

use crate::config::STATE_DIR;
use crate::error::{Result, StoreError};
use crate::inbox::{self, InboxMessage};
use crate::orchestrator::OrchestratorState;
use crate::persona::Persona;
use crate::policy::{MessagingPolicy, SYSTEM_SENDERS};
use crate::session::{Session, SessionStatus};
use crate::task::{render_tasks, Task, TaskLog, TaskStatus};
use crate::tracker::Tracker;
use crate::usage::{Usage, UsageSample};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SESSION_FILE: &str = "session.json";
pub const TELEMETRY_FILE: &str = "telemetry.json";
pub const USAGE_REPORT_FILE: &str = "usage.json";
pub const TASKS_FILE: &str = "tasks.toml";
pub const INBOX_FILE: &str = "inbox.jsonl";
pub const TRACKER_FILE: &str = "tracker.json";
pub const CURRENT_WORK_FILE: &str = "current_work.md";
pub const ROLE_FILE: &str = "ROLE.md";
pub const SCRIPT_FILE: &str = "run.sh";
const ORCHESTRATOR_FILE: &str = "orchestrator.json";

const ARCHIVE_SUFFIXES: [SessionStatus; 3] = [
    SessionStatus::Completed,
    SessionStatus::Stopped,
    SessionStatus::Failed,
];

/// Outcome of an archive request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Archived(PathBuf),
    AlreadyArchived(PathBuf),
}

/// A session record together with where it currently lives on disk.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub session: Session,
    pub dir: PathBuf,
    /// Terminal status encoded in the archive suffix, for archived directories.
    pub archived_as: Option<SessionStatus>,
}

/// Write `bytes` to `path` via a temp file in the same directory plus rename, so
/// concurrent readers see either the old or the new content, never a torn file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::write(path, e))?;
    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| StoreError::write(path, e))?;
    temp.persist(path)
        .map_err(|e| StoreError::write(path, e.error))?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::parse(path, e))?;
    write_atomic(path, &json)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read(path).map_err(|e| StoreError::read(path, e))?;
    serde_json::from_slice(&content).map_err(|e| StoreError::parse(path, e))
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(content) => serde_json::from_slice(&content).map_err(|e| StoreError::parse(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(StoreError::read(path, e)),
    }
}

/// Session ids are used as directory and terminal names.
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 96
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !id.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Split an archived directory name (`<id>.<status>`) into id and status.
pub fn parse_archived_name(name: &str) -> Option<(&str, SessionStatus)> {
    let (id, suffix) = name.rsplit_once('.')?;
    ARCHIVE_SUFFIXES
        .into_iter()
        .find(|s| s.archive_suffix() == Some(suffix))
        .map(|status| (id, status))
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Open the store at `root`. A missing workspace is fatal.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::WorkspaceMissing { path: root });
        }
        let state_dir = root.join(STATE_DIR);
        std::fs::create_dir_all(&state_dir).map_err(|e| StoreError::write(&state_dir, e))?;
        Ok(Self { root })
    }

    /// Create the workspace directory if needed, then open it.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::write(&root, e))?;
        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Active (unarchived) directory for a session id.
    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Find a session's directory, active or archived.
    pub fn locate(&self, id: &str) -> Option<(PathBuf, Option<SessionStatus>)> {
        let active = self.session_dir(id);
        if active.join(SESSION_FILE).is_file() {
            return Some((active, None));
        }
        ARCHIVE_SUFFIXES.into_iter().find_map(|status| {
            let suffix = status.archive_suffix()?;
            let dir = self.root.join(format!("{id}.{suffix}"));
            dir.join(SESSION_FILE).is_file().then_some((dir, Some(status)))
        })
    }

    fn active_dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        match self.locate(id) {
            Some((dir, None)) => Ok(dir),
            Some((_, Some(_))) => Err(StoreError::Archived(id.to_string())),
            None => Err(StoreError::SessionNotFound(id.to_string())),
        }
    }

    /// Every directory stem in use (active ids, archived ids, request directories).
    pub fn existing_names(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::read(&self.root, e))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_archived_name(&name) {
                Some((id, _)) => names.insert(id.to_string()),
                None => names.insert(name),
            };
        }
        Ok(names)
    }

    /// Register a new session in `created` state.
    pub fn create_session(
        &self,
        persona: Persona,
        display_name: &str,
        id: &str,
        workspace_group: &str,
    ) -> Result<Session> {
        validate_id(id)?;
        if self.locate(id).is_some() || self.session_dir(id).exists() {
            return Err(StoreError::SessionExists(id.to_string()));
        }
        let dir = self.session_dir(id);
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::write(&dir, e))?;

        let mut session = Session::new(id, persona, display_name);
        session.workspace_group = workspace_group.to_string();
        write_json(&dir.join(SESSION_FILE), &session)?;
        write_atomic(&dir.join(TASKS_FILE), b"")?;
        tracing::info!(session = %id, persona = %persona, "Created session");
        Ok(session)
    }

    fn load_from(&self, dir: &Path) -> Result<Session> {
        let mut session: Session = read_json(&dir.join(SESSION_FILE))?;
        session.usage = read_json_or_default(&dir.join(TELEMETRY_FILE)).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Ignoring unreadable telemetry");
            Usage::default()
        });
        session.current_work = std::fs::read_to_string(dir.join(CURRENT_WORK_FILE))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        Ok(session)
    }

    /// Load a session, active or archived.
    pub fn load(&self, id: &str) -> Result<Session> {
        validate_id(id)?;
        let (dir, _) = self
            .locate(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        self.load_from(&dir)
    }

    /// All sessions, archived ones included. Unreadable records are skipped with a warning
    /// (a worker or another writer may be mid-update; the next read will see it).
    pub fn list(&self) -> Result<Vec<StoredSession>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::read(&self.root, e))?;
        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.join(SESSION_FILE).is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let archived_as = parse_archived_name(&name).map(|(_, status)| status);
            match self.load_from(&dir) {
                Ok(session) => sessions.push(StoredSession {
                    session,
                    dir,
                    archived_as,
                }),
                Err(e) => tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable session"),
            }
        }
        sessions.sort_by(|a, b| a.session.id.cmp(&b.session.id));
        Ok(sessions)
    }

    /// Persist orchestrator-owned fields. Archived sessions are frozen.
    pub fn save(&self, session: &Session) -> Result<()> {
        let dir = self.active_dir(&session.id)?;
        let path = dir.join(SESSION_FILE);
        let on_disk: Session = read_json(&path)?;
        if on_disk.status == SessionStatus::Archived {
            return Err(StoreError::Archived(session.id.clone()));
        }
        if on_disk.status != session.status && !on_disk.status.can_transition_to(session.status) {
            return Err(StoreError::InvalidTransition {
                id: session.id.clone(),
                from: on_disk.status,
                to: session.status,
            });
        }
        write_json(&path, session)
    }

    /// Validated status change.
    pub fn transition(&self, id: &str, next: SessionStatus) -> Result<Session> {
        let mut session = self.load(id)?;
        let from = session.status;
        if !session.advance(next) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from,
                to: next,
            });
        }
        self.save(&session)?;
        tracing::info!(session = %id, from = %from, to = %next, "Session transition");
        Ok(session)
    }

    /// Rename a terminal session's directory to `<id>.<status>` and record it as archived.
    ///
    /// Already-archived sessions are left untouched. A destination collision is an error
    /// and leaves the source directory in place for a later retry.
    pub fn archive(&self, id: &str) -> Result<ArchiveOutcome> {
        validate_id(id)?;
        let (dir, archived_as) = self
            .locate(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        if archived_as.is_some() {
            return Ok(ArchiveOutcome::AlreadyArchived(dir));
        }

        let mut session = self.load_from(&dir)?;
        let suffix = session.status.archive_suffix().ok_or(StoreError::InvalidTransition {
            id: id.to_string(),
            from: session.status,
            to: SessionStatus::Archived,
        })?;
        let dest = self.root.join(format!("{id}.{suffix}"));
        if dest.exists() {
            return Err(StoreError::ArchiveCollision { path: dest });
        }
        std::fs::rename(&dir, &dest).map_err(|e| StoreError::write(&dest, e))?;

        session.advance(SessionStatus::Archived);
        write_json(&dest.join(SESSION_FILE), &session)?;
        tracing::info!(session = %id, dest = %dest.display(), "Archived session");
        Ok(ArchiveOutcome::Archived(dest))
    }

    // --- Task log (worker-authored) ---

    pub fn tasks_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(TASKS_FILE)
    }

    pub fn read_tasks(&self, id: &str) -> Result<TaskLog> {
        let (dir, _) = self
            .locate(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        let path = dir.join(TASKS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(TaskLog::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TaskLog::Parsed(Vec::new())),
            Err(e) => Err(StoreError::read(path, e)),
        }
    }

    pub fn write_tasks(&self, id: &str, tasks: &[Task]) -> Result<()> {
        let dir = self.active_dir(id)?;
        let path = dir.join(TASKS_FILE);
        let content = render_tasks(tasks).map_err(|e| StoreError::parse(&path, e))?;
        write_atomic(&path, content.as_bytes())
    }

    fn parsed_tasks(&self, id: &str) -> Result<Vec<Task>> {
        match self.read_tasks(id)? {
            TaskLog::Parsed(tasks) => Ok(tasks),
            TaskLog::Scanned(_) => Err(StoreError::parse(
                self.tasks_path(id),
                "task log is not valid TOML",
            )),
        }
    }

    pub fn add_task(&self, id: &str, task: Task) -> Result<usize> {
        let mut tasks = self.parsed_tasks(id)?;
        tasks.push(task);
        self.write_tasks(id, &tasks)?;
        Ok(tasks.len() - 1)
    }

    pub fn set_task_status(&self, id: &str, index: usize, status: TaskStatus) -> Result<()> {
        let mut tasks = self.parsed_tasks(id)?;
        let task = tasks.get_mut(index).ok_or(StoreError::TaskNotFound {
            id: id.to_string(),
            index,
        })?;
        task.status = status;
        self.write_tasks(id, &tasks)
    }

    /// Record that the worker has read its task log up to the current size.
    pub fn mark_tasks_read(&self, id: &str) -> Result<Tracker> {
        let dir = self.active_dir(id)?;
        let size = std::fs::metadata(dir.join(TASKS_FILE))
            .map(|m| m.len())
            .unwrap_or(0);
        let mut tracker = self.read_tracker(id)?;
        tracker.advance_tasks(size);
        write_json(&dir.join(TRACKER_FILE), &tracker)?;
        Ok(tracker)
    }

    // --- Inbox and tracker ---

    pub fn inbox_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(INBOX_FILE)
    }

    pub fn append_instruction(&self, id: &str, from: &str, body: &str) -> Result<InboxMessage> {
        let dir = self.active_dir(id)?;
        let message = inbox::append(&dir.join(INBOX_FILE), from, body)?;
        tracing::info!(session = %id, from = %from, seq = message.seq, "Delivered instruction");
        Ok(message)
    }

    /// Deliver `body` from `from` (a session id or a system sender) to session `to`,
    /// subject to the messaging policy.
    pub fn send(
        &self,
        from: &str,
        to: &str,
        body: &str,
        policy: MessagingPolicy,
    ) -> Result<InboxMessage> {
        if !SYSTEM_SENDERS.contains(&from) {
            let sender = self.load(from)?;
            let recipient = self.load(to)?;
            if !policy.allows(sender.persona, recipient.persona) {
                return Err(StoreError::PolicyDenied {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
        self.append_instruction(to, from, body)
    }

    pub fn read_tracker(&self, id: &str) -> Result<Tracker> {
        let (dir, _) = self
            .locate(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        read_json_or_default(&dir.join(TRACKER_FILE))
    }

    /// Messages the session has not consumed yet. Does not move the cursor.
    pub fn pending_instructions(&self, id: &str) -> Result<Vec<InboxMessage>> {
        let (dir, _) = self
            .locate(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        let tracker: Tracker = read_json_or_default(&dir.join(TRACKER_FILE))?;
        Ok(inbox::read_since(&dir.join(INBOX_FILE), tracker.inbox_offset, tracker.inbox_seq)?.messages)
    }

    /// Return pending messages and advance the session's cursor past them.
    pub fn consume_instructions(&self, id: &str) -> Result<Vec<InboxMessage>> {
        let dir = self.active_dir(id)?;
        let mut tracker: Tracker = read_json_or_default(&dir.join(TRACKER_FILE))?;
        let read = inbox::read_since(&dir.join(INBOX_FILE), tracker.inbox_offset, tracker.inbox_seq)?;
        let last_seq = read.messages.iter().map(|m| m.seq).max().unwrap_or(0);
        tracker.advance_inbox(read.end_offset, last_seq);
        write_json(&dir.join(TRACKER_FILE), &tracker)?;
        Ok(read.messages)
    }

    // --- Worker-authored summaries and telemetry ---

    pub fn write_current_work(&self, id: &str, text: &str) -> Result<()> {
        let dir = self.active_dir(id)?;
        write_atomic(&dir.join(CURRENT_WORK_FILE), text.trim().as_bytes())
    }

    pub fn read_usage(&self, id: &str) -> Result<Usage> {
        let dir = self.active_dir(id)?;
        read_json_or_default(&dir.join(TELEMETRY_FILE))
    }

    pub fn write_usage(&self, id: &str, usage: &Usage) -> Result<()> {
        let dir = self.active_dir(id)?;
        write_json(&dir.join(TELEMETRY_FILE), usage)
    }

    /// Structured usage fragment written by the worker, if any.
    pub fn read_usage_report(&self, id: &str) -> Result<Option<UsageSample>> {
        let dir = self.active_dir(id)?;
        let path = dir.join(USAGE_REPORT_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Most recent modification of any worker-written file, used to tell busy workers from idle ones.
    pub fn last_activity(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let dir = self.active_dir(id)?;
        Ok([TASKS_FILE, CURRENT_WORK_FILE, TRACKER_FILE, USAGE_REPORT_FILE]
            .iter()
            .filter_map(|name| std::fs::metadata(dir.join(name)).ok()?.modified().ok())
            .max()
            .map(DateTime::<Utc>::from))
    }

    // --- Orchestrator aggregate ---

    pub fn load_orchestrator(&self) -> Result<OrchestratorState> {
        read_json_or_default(&self.state_dir().join(ORCHESTRATOR_FILE))
    }

    pub fn save_orchestrator(&self, state: &OrchestratorState) -> Result<()> {
        write_json(&self.state_dir().join(ORCHESTRATOR_FILE), state)
    }

    /// Remove the entire workspace tree.
    pub fn destroy(self) -> Result<()> {
        std::fs::remove_dir_all(&self.root).map_err(|e| StoreError::write(&self.root, e))?;
        tracing::warn!(root = %self.root.display(), "Workspace deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_open_missing_workspace_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let err = SessionStore::open(tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, StoreError::WorkspaceMissing { .. }));
    }

    #[test]
    fn test_create_and_load_session() {
        let (_tmp, store) = store();
        store
            .create_session(Persona::Architect, "Ada", "architect-ada", "g1")
            .unwrap();
        let session = store.load("architect-ada").unwrap();
        assert_eq!(session.status, SessionStatus::Created);
        assert_eq!(session.workspace_group, "g1");
        assert!(store.read_tasks("architect-ada").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let (_tmp, store) = store();
        store
            .create_session(Persona::Intern, "Bo", "intern-bo", "")
            .unwrap();
        let err = store
            .create_session(Persona::Intern, "Bo", "intern-bo", "")
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionExists(_)));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let (_tmp, store) = store();
        for id in ["", "../escape", "Upper", "a/b", "-lead"] {
            assert!(store.create_session(Persona::Qa, "x", id, "").is_err(), "{id}");
        }
    }

    #[test]
    fn test_save_rejects_backwards_transition() {
        let (_tmp, store) = store();
        store
            .create_session(Persona::Engineer, "Grace", "software-engineer-grace", "")
            .unwrap();
        store
            .transition("software-engineer-grace", SessionStatus::Spawned)
            .unwrap();
        store
            .transition("software-engineer-grace", SessionStatus::Completed)
            .unwrap();

        let mut stale = store.load("software-engineer-grace").unwrap();
        stale.status = SessionStatus::Spawned;
        assert!(matches!(
            store.save(&stale),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(store
            .transition("software-engineer-grace", SessionStatus::Stopped)
            .is_err());
    }

    #[test]
    fn test_archive_renames_and_freezes() {
        let (tmp, store) = store();
        store
            .create_session(Persona::Qa, "Cy", "qa-engineer-cy", "")
            .unwrap();
        store.transition("qa-engineer-cy", SessionStatus::Spawned).unwrap();
        store.transition("qa-engineer-cy", SessionStatus::Stopped).unwrap();

        let outcome = store.archive("qa-engineer-cy").unwrap();
        let dest = tmp.path().join("qa-engineer-cy.stopped");
        assert_eq!(outcome, ArchiveOutcome::Archived(dest.clone()));
        assert!(!tmp.path().join("qa-engineer-cy").exists());

        let session = store.load("qa-engineer-cy").unwrap();
        assert_eq!(session.status, SessionStatus::Archived);
        assert!(matches!(store.save(&session), Err(StoreError::Archived(_))));
        assert!(matches!(
            store.append_instruction("qa-engineer-cy", "user", "hello"),
            Err(StoreError::Archived(_))
        ));
    }

    #[test]
    fn test_archive_is_idempotent_and_isolated() {
        let (_tmp, store) = store();
        store.create_session(Persona::Qa, "Cy", "qa-engineer-cy", "").unwrap();
        store.create_session(Persona::Intern, "Bo", "intern-bo", "").unwrap();
        store.transition("qa-engineer-cy", SessionStatus::Failed).unwrap();
        store.archive("qa-engineer-cy").unwrap();

        let before = std::fs::read(store.session_dir("intern-bo").join(SESSION_FILE)).unwrap();
        let again = store.archive("qa-engineer-cy").unwrap();
        assert!(matches!(again, ArchiveOutcome::AlreadyArchived(_)));
        let after = std::fs::read(store.session_dir("intern-bo").join(SESSION_FILE)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_archive_collision_keeps_source() {
        let (tmp, store) = store();
        store.create_session(Persona::Qa, "Cy", "qa-engineer-cy", "").unwrap();
        store.transition("qa-engineer-cy", SessionStatus::Failed).unwrap();
        std::fs::create_dir(tmp.path().join("qa-engineer-cy.failed")).unwrap();

        let err = store.archive("qa-engineer-cy").unwrap_err();
        assert!(matches!(err, StoreError::ArchiveCollision { .. }));
        assert!(store.session_dir("qa-engineer-cy").exists());
        assert_eq!(store.load("qa-engineer-cy").unwrap().status, SessionStatus::Failed);
    }

    #[test]
    fn test_archive_requires_terminal_status() {
        let (_tmp, store) = store();
        store.create_session(Persona::Qa, "Cy", "qa-engineer-cy", "").unwrap();
        assert!(store.archive("qa-engineer-cy").is_err());
    }

    #[test]
    fn test_existing_names_include_archived_ids() {
        let (_tmp, store) = store();
        store.create_session(Persona::Qa, "Cy", "qa-engineer-cy", "").unwrap();
        store.transition("qa-engineer-cy", SessionStatus::Failed).unwrap();
        store.archive("qa-engineer-cy").unwrap();
        let names = store.existing_names().unwrap();
        assert!(names.contains("qa-engineer-cy"));
        assert!(store
            .create_session(Persona::Qa, "Cy", "qa-engineer-cy", "")
            .is_err());
    }

    #[test]
    fn test_task_helpers() {
        let (_tmp, store) = store();
        store.create_session(Persona::Engineer, "Tim", "software-engineer-tim", "").unwrap();
        let idx = store
            .add_task("software-engineer-tim", Task::new("build it", "user"))
            .unwrap();
        assert_eq!(idx, 0);
        store
            .set_task_status("software-engineer-tim", 0, TaskStatus::Completed)
            .unwrap();
        assert!(store.read_tasks("software-engineer-tim").unwrap().all_completed());
        assert!(matches!(
            store.set_task_status("software-engineer-tim", 3, TaskStatus::Completed),
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn test_consume_instructions_advances_cursor() {
        let (_tmp, store) = store();
        store.create_session(Persona::Engineer, "Tim", "software-engineer-tim", "").unwrap();
        store.append_instruction("software-engineer-tim", "user", "one").unwrap();
        store.append_instruction("software-engineer-tim", "user", "two").unwrap();
        assert_eq!(store.pending_instructions("software-engineer-tim").unwrap().len(), 2);

        let consumed = store.consume_instructions("software-engineer-tim").unwrap();
        assert_eq!(consumed.len(), 2);
        assert!(store.pending_instructions("software-engineer-tim").unwrap().is_empty());

        let tracker = store.read_tracker("software-engineer-tim").unwrap();
        assert_eq!(tracker.inbox_seq, 2);
        assert!(tracker.inbox_offset > 0);

        store.append_instruction("software-engineer-tim", "user", "three").unwrap();
        let pending = store.pending_instructions("software-engineer-tim").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "three");
    }

    #[test]
    fn test_send_respects_policy() {
        let (_tmp, store) = store();
        store.create_session(Persona::Intern, "Bo", "intern-bo", "").unwrap();
        store.create_session(Persona::Architect, "Ada", "architect-ada", "").unwrap();

        let err = store
            .send("intern-bo", "architect-ada", "hi", MessagingPolicy::Hierarchical)
            .unwrap_err();
        assert!(matches!(err, StoreError::PolicyDenied { .. }));
        store
            .send("intern-bo", "architect-ada", "hi", MessagingPolicy::Open)
            .unwrap();
        store
            .send("user", "intern-bo", "hello", MessagingPolicy::Hierarchical)
            .unwrap();
        assert_eq!(store.pending_instructions("architect-ada").unwrap().len(), 1);
    }

    #[test]
    fn test_mark_tasks_read_records_offset() {
        let (_tmp, store) = store();
        store.create_session(Persona::Engineer, "Tim", "software-engineer-tim", "").unwrap();
        store.add_task("software-engineer-tim", Task::new("a", "user")).unwrap();
        let tracker = store.mark_tasks_read("software-engineer-tim").unwrap();
        assert!(tracker.tasks_offset > 0);
        assert!(tracker.tasks_read_at.is_some());
    }

    #[test]
    fn test_overlays_worker_files_on_load() {
        let (_tmp, store) = store();
        store.create_session(Persona::Manager, "Rich", "project-manager-rich", "").unwrap();
        store
            .write_current_work("project-manager-rich", "  planning sprint  \n")
            .unwrap();
        let usage = Usage {
            input_tokens: 7,
            ..Usage::default()
        };
        store.write_usage("project-manager-rich", &usage).unwrap();

        let session = store.load("project-manager-rich").unwrap();
        assert_eq!(session.current_work, "planning sprint");
        assert_eq!(session.usage.input_tokens, 7);
        let raw = std::fs::read_to_string(
            store.session_dir("project-manager-rich").join(SESSION_FILE),
        )
        .unwrap();
        assert!(!raw.contains("planning sprint"));
    }

    #[test]
    fn test_list_skips_unreadable_and_non_sessions() {
        let (tmp, store) = store();
        store.create_session(Persona::Manager, "Rich", "project-manager-rich", "").unwrap();
        std::fs::create_dir(tmp.path().join("deliverables")).unwrap();
        std::fs::create_dir(tmp.path().join("broken")).unwrap();
        std::fs::write(tmp.path().join("broken").join(SESSION_FILE), "{").unwrap();

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session.id, "project-manager-rich");
    }

    #[test]
    fn test_orchestrator_state_round_trip() {
        let (_tmp, store) = store();
        assert_eq!(store.load_orchestrator().unwrap(), OrchestratorState::default());
        let mut state = OrchestratorState::new("g1");
        state.counters.spawned = 3;
        store.save_orchestrator(&state).unwrap();
        assert_eq!(store.load_orchestrator().unwrap(), state);
    }

    #[test]
    fn test_parse_archived_name() {
        assert_eq!(
            parse_archived_name("intern-bo.completed"),
            Some(("intern-bo", SessionStatus::Completed))
        );
        assert_eq!(parse_archived_name("intern-bo"), None);
        assert_eq!(parse_archived_name("notes.txt"), None);
    }

    #[test]
    fn test_destroy_removes_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ws");
        let store = SessionStore::create(&root).unwrap();
        store.create_session(Persona::Manager, "Rich", "project-manager-rich", "").unwrap();
        store.destroy().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn test_last_activity_tracks_worker_files() {
        let (_tmp, store) = store();
        store.create_session(Persona::Intern, "Bo", "intern-bo", "g").unwrap();
        let first = store.last_activity("intern-bo").unwrap().unwrap();
        assert!(first <= Utc::now());

        store.write_current_work("intern-bo", "reading docs").unwrap();
        let second = store.last_activity("intern-bo").unwrap().unwrap();
        assert!(second >= first);
        assert!(store.last_activity("nobody").is_err());
    }
}
