// ABOUTME: Worker-facing and inspection subcommands: send, inbox, tasks, status, watch.
// ABOUTME: Thin wrappers over the session store that print human-readable output.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use troupe_core::store::TASKS_FILE;
use troupe_core::{
    Config, SessionStore, StoreError, Task, TaskLog, TaskStatus, TeamUsage,
};

fn open_store(workspace: &Path) -> Result<SessionStore> {
    let root = std::fs::canonicalize(workspace)
        .with_context(|| format!("Workspace not found at {}", workspace.display()))?;
    Ok(SessionStore::open(root)?)
}

/// Deliver an instruction, subject to the workspace's messaging policy.
pub fn run_send(workspace: PathBuf, from: &str, to: &str, body: &str) -> Result<()> {
    let store = open_store(&workspace)?;
    let config = Config::for_workspace(store.root())?;
    let message = store.send(from, to, body, config.messaging_policy)?;
    println!("Delivered #{} to {to}", message.seq);
    Ok(())
}

/// Print unread instructions. Unless `peek` is set, the read cursor moves past them.
pub fn run_inbox(workspace: PathBuf, session: &str, peek: bool) -> Result<()> {
    let store = open_store(&workspace)?;
    let messages = if peek {
        store.pending_instructions(session)?
    } else {
        store.consume_instructions(session)?
    };
    if messages.is_empty() {
        println!("No new instructions.");
        return Ok(());
    }
    for message in messages {
        println!(
            "#{} from {} at {}",
            message.seq,
            message.from,
            message.sent_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!("{}\n", message.body.trim_end());
    }
    Ok(())
}

/// Print a session's task log and record it as read.
pub fn run_tasks(workspace: PathBuf, session: &str) -> Result<()> {
    let store = open_store(&workspace)?;
    match store.read_tasks(session)? {
        TaskLog::Parsed(tasks) if tasks.is_empty() => println!("No tasks."),
        TaskLog::Parsed(tasks) => {
            for (index, task) in tasks.iter().enumerate() {
                let by = if task.assigned_by.is_empty() {
                    String::new()
                } else {
                    format!(" (from {})", task.assigned_by)
                };
                println!("{index:>3} [{:<11}] {}{by}", task.status.as_str(), task.description);
            }
        }
        TaskLog::Scanned(statuses) => {
            println!("tasks.toml does not parse; recovered {} status lines:", statuses.len());
            for (index, status) in statuses.iter().enumerate() {
                println!("{index:>3} [{}]", status.map(|s| s.as_str()).unwrap_or("unknown"));
            }
        }
    }
    if let Err(e) = store.mark_tasks_read(session) {
        tracing::debug!(session = %session, error = %e, "Tracker not updated");
    }
    Ok(())
}

pub fn run_task_add(workspace: PathBuf, session: &str, description: &str, by: &str) -> Result<()> {
    let store = open_store(&workspace)?;
    let index = store.add_task(session, Task::new(description, by))?;
    println!("Added task #{index} to {session}");
    Ok(())
}

pub fn run_task_set(workspace: PathBuf, session: &str, index: usize, status: TaskStatus) -> Result<()> {
    let store = open_store(&workspace)?;
    store.set_task_status(session, index, status)?;
    println!("Task #{index} of {session} is now {status}");
    Ok(())
}

/// Parse a task status for the command line ("done", "in-progress", ...).
pub fn parse_task_status(raw: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse_loose(raw)
        .ok_or_else(|| format!("unknown task status '{raw}' (use not-started, in-progress, completed)"))
}

#[derive(Debug, Serialize)]
pub struct StatusRow {
    pub id: String,
    pub persona: String,
    pub display_name: String,
    pub status: String,
    pub archived: bool,
    pub tasks_done: usize,
    pub tasks_total: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
    pub current_work: String,
}

/// Snapshot of every session, archived ones included.
pub fn status_rows(store: &SessionStore) -> Result<(Vec<StatusRow>, TeamUsage)> {
    let stored = store.list()?;
    let team = TeamUsage::from_usages(stored.iter().map(|s| &s.session.usage));
    let mut rows: Vec<StatusRow> = stored
        .into_iter()
        .map(|s| {
            let (tasks_done, tasks_total) = store
                .read_tasks(&s.session.id)
                .map(|log| log.progress())
                .unwrap_or_default();
            let status = s.archived_as.unwrap_or(s.session.status);
            StatusRow {
                persona: s.session.persona.label().to_string(),
                display_name: s.session.display_name,
                status: status.to_string(),
                archived: s.archived_as.is_some(),
                tasks_done,
                tasks_total,
                input_tokens: s.session.usage.input_tokens,
                output_tokens: s.session.usage.output_tokens,
                estimated_cost_usd: s.session.usage.estimated_cost_usd,
                current_work: s.session.current_work,
                id: s.session.id,
            }
        })
        .collect();
    rows.sort_by(|a, b| (a.archived, &a.id).cmp(&(b.archived, &b.id)));
    Ok((rows, team))
}

pub fn run_status(workspace: PathBuf, json: bool) -> Result<()> {
    let store = open_store(&workspace)?;
    let (rows, team) = status_rows(&store)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No sessions in {}", store.root().display());
        return Ok(());
    }
    for row in &rows {
        let status = if row.archived {
            format!("{} (archived)", row.status)
        } else {
            row.status.clone()
        };
        println!(
            "{:<30} {:<10} {:<22} tasks {}/{}  ${:.4}",
            row.id, row.persona, status, row.tasks_done, row.tasks_total, row.estimated_cost_usd
        );
        if !row.current_work.is_empty() && !row.archived {
            println!("    {}", row.current_work.lines().next().unwrap_or_default());
        }
    }
    println!(
        "Team: {} sessions, {} tokens, ${:.4}",
        team.sessions,
        team.total_tokens(),
        team.estimated_cost_usd
    );
    Ok(())
}

/// Change detector for a session's inbox and task log. Never moves the read cursor.
#[derive(Debug, Default)]
pub struct Watcher {
    notified_seq: u64,
    notified_tasks: u64,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices for anything that arrived since the last poll.
    pub fn poll(&mut self, store: &SessionStore, session: &str) -> troupe_core::Result<Vec<String>> {
        let mut notices = Vec::new();

        let pending = store.pending_instructions(session)?;
        if let Some(newest) = pending.iter().map(|m| m.seq).max() {
            if newest > self.notified_seq {
                notices.push(format!(
                    "[troupe] {} unread instruction(s) for {session}. Run: troupe inbox --session {session}",
                    pending.len()
                ));
                self.notified_seq = newest;
            }
        }

        let tracker = store.read_tracker(session)?;
        let size = store
            .locate(session)
            .and_then(|(dir, _)| std::fs::metadata(dir.join(TASKS_FILE)).ok())
            .map(|m| m.len())
            .unwrap_or(0);
        if size > self.notified_tasks.max(tracker.tasks_offset) {
            notices.push(format!(
                "[troupe] tasks.toml changed. Run: troupe tasks --session {session}"
            ));
            self.notified_tasks = size;
        }
        Ok(notices)
    }
}

/// Companion loop run beside the agent inside its terminal.
pub async fn run_watch(workspace: PathBuf, session: &str) -> Result<()> {
    let store = open_store(&workspace)?;
    let config = Config::for_workspace(store.root())?;
    let mut watcher = Watcher::new();
    let mut interval = tokio::time::interval(config.watch_interval());
    loop {
        interval.tick().await;
        match watcher.poll(&store, session) {
            Ok(notices) => {
                for notice in notices {
                    println!("{notice}");
                }
            }
            Err(StoreError::SessionNotFound(_)) | Err(StoreError::WorkspaceMissing { .. }) => {
                return Ok(());
            }
            Err(e) => tracing::debug!(session = %session, error = %e, "Watch poll failed"),
        }
        if !store.root().is_dir() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use troupe_core::Persona;

    fn store() -> (TempDir, SessionStore) {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::open(tmp.path()).unwrap();
        store.create_session(Persona::Intern, "Bo", "intern-bo", "g").unwrap();
        (tmp, store)
    }

    #[test]
    fn test_watcher_notifies_once_per_arrival() {
        let (_tmp, store) = store();
        let mut watcher = Watcher::new();
        assert!(watcher.poll(&store, "intern-bo").unwrap().is_empty());

        store.append_instruction("intern-bo", "user", "hello").unwrap();
        let notices = watcher.poll(&store, "intern-bo").unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("1 unread"));
        assert!(watcher.poll(&store, "intern-bo").unwrap().is_empty());

        store.append_instruction("intern-bo", "user", "again").unwrap();
        assert!(watcher.poll(&store, "intern-bo").unwrap()[0].contains("2 unread"));
    }

    #[test]
    fn test_watcher_never_moves_cursor() {
        let (_tmp, store) = store();
        store.append_instruction("intern-bo", "user", "hello").unwrap();
        let mut watcher = Watcher::new();
        watcher.poll(&store, "intern-bo").unwrap();
        assert_eq!(store.read_tracker("intern-bo").unwrap().inbox_seq, 0);
        assert_eq!(store.pending_instructions("intern-bo").unwrap().len(), 1);
    }

    #[test]
    fn test_watcher_sees_task_log_growth() {
        let (_tmp, store) = store();
        let mut watcher = Watcher::new();
        store.add_task("intern-bo", Task::new("read docs", "user")).unwrap();
        let notices = watcher.poll(&store, "intern-bo").unwrap();
        assert!(notices.iter().any(|n| n.contains("tasks.toml")));

        store.mark_tasks_read("intern-bo").unwrap();
        let mut fresh = Watcher::new();
        assert!(fresh.poll(&store, "intern-bo").unwrap().is_empty());
    }

    #[test]
    fn test_status_rows_include_archived() {
        let (_tmp, store) = store();
        store.create_session(Persona::Qa, "Cy", "qa-engineer-cy", "g").unwrap();
        store
            .transition("qa-engineer-cy", troupe_core::SessionStatus::Failed)
            .unwrap();
        store.archive("qa-engineer-cy").unwrap();

        let (rows, team) = status_rows(&store).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "intern-bo");
        assert!(rows[1].archived);
        assert_eq!(rows[1].status, "failed");
        assert_eq!(team.sessions, 2);
    }

    #[test]
    fn test_parse_task_status() {
        assert_eq!(parse_task_status("done"), Ok(TaskStatus::Completed));
        assert!(parse_task_status("maybe").is_err());
    }

    #[test]
    fn test_send_respects_workspace_policy() {
        let (tmp, store) = store();
        store
            .create_session(Persona::Architect, "Ada", "architect-ada", "g")
            .unwrap();
        let config = Config {
            messaging_policy: troupe_core::MessagingPolicy::Hierarchical,
            ..Config::default()
        };
        config.save(&Config::workspace_path(tmp.path())).unwrap();

        assert!(run_send(tmp.path().to_path_buf(), "intern-bo", "architect-ada", "hi").is_err());
        run_send(tmp.path().to_path_buf(), "user", "architect-ada", "hi").unwrap();
        assert_eq!(store.pending_instructions("architect-ada").unwrap().len(), 1);
    }
}
