// ABOUTME: Launches a worker for a session inside its own terminal session.
// ABOUTME: Renders ROLE.md and run.sh, creates the tmux session, and records supervision.

use super::Workspace;
use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;
use troupe_core::config::STATE_DIR;
use troupe_core::store::{self, ROLE_FILE, SCRIPT_FILE};
use troupe_core::{OrchestratorState, Persona, Session, SessionStatus, TerminalHandle};

/// Appended to the instruction document when the agent is launched.
pub const TASK_DIRECTIVE: &str = "Start by reading tasks.toml in your session directory. \
Work through every task it lists and update each task's status as you go. \
When every task is completed, finish your turn.";

fn builtin_role(persona: Persona) -> &'static str {
    match persona {
        Persona::Manager => {
            "You are the project manager. You turn the goal you are given into a plan, decide which \
             roles the team needs, request new sessions for them, hand each one concrete tasks through \
             its inbox, and keep track of progress until the goal is met."
        }
        Persona::Architect => {
            "You are the software architect. You own the technical design: choose the structure, \
             write down interfaces and decisions, break the design into engineering tasks, and review \
             the engineers' work against it."
        }
        Persona::Engineer => {
            "You are a software engineer. You implement the tasks assigned to you with working, tested \
             code, report progress to whoever assigned the work, and ask the architect when the design \
             is unclear."
        }
        Persona::Qa => {
            "You are the QA engineer. You verify delivered work: write and run tests, reproduce \
             defects, and send precise bug reports to the engineer responsible."
        }
        Persona::Intern => {
            "You are an intern. You take on small, well-scoped tasks, research questions for the \
             team, and ask for help early when you are stuck."
        }
    }
}

/// Role behaviour text: `.troupe/roles/<slug>.md` if present, else the builtin paragraph.
pub fn role_text(root: &Path, persona: Persona) -> String {
    let path = root
        .join(STATE_DIR)
        .join("roles")
        .join(format!("{}.md", persona.slug()));
    match std::fs::read_to_string(&path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => builtin_role(persona).to_string(),
    }
}

/// Render the instruction document a worker is launched with.
pub fn render_role(ws: &Workspace, session: &Session) -> String {
    let root = ws.store.root().display().to_string();
    let dir = ws.store.session_dir(&session.id).display().to_string();
    let exe = ws.exe.display().to_string();
    let id = &session.id;
    let mut doc = String::new();

    let _ = writeln!(doc, "# {} ({})\n", session.display_name, session.persona.label());
    let _ = writeln!(doc, "{}\n", role_text(ws.store.root(), session.persona));

    let _ = writeln!(doc, "## Your session\n");
    let _ = writeln!(doc, "- Session id: `{id}`");
    let _ = writeln!(doc, "- Directory: `{dir}` (keep your deliverables here)");
    let _ = writeln!(doc, "- `tasks.toml`: your task log, a `[[task]]` array with `description`, `status` (not-started, in-progress, completed), `assigned_by`, `created_at`");
    let _ = writeln!(doc, "- `inbox.jsonl`: instructions addressed to you");
    let _ = writeln!(doc, "- `current_work.md`: a short summary of what you are doing right now");
    let _ = writeln!(doc, "- `usage.json` (optional): your cumulative `model`, `input_tokens`, `output_tokens`\n");

    let _ = writeln!(doc, "## Talking to other sessions\n");
    let _ = writeln!(doc, "{}\n", ws.config.messaging_policy.describe());
    let _ = writeln!(doc, "- See the team: `{exe} status --workspace {root}`");
    let _ = writeln!(
        doc,
        "- Send an instruction: `{exe} send --workspace {root} --from {id} --to <session-id> \"<message>\"`"
    );
    let _ = writeln!(
        doc,
        "- Assign work by sending an instruction; each session records its own tasks with \
         `{exe} task add --workspace {root} --session <own-id> --by <assigner> \"<description>\"`\n"
    );

    let _ = writeln!(doc, "## Requesting a new session\n");
    let _ = writeln!(
        doc,
        "Create the directory `{root}/<role>-request-<short-name>/` and write the new session's \
         instructions to `instructions.md` inside it. The orchestrator picks it up within seconds, \
         delivers the instructions to the new session's inbox, and removes the request directory."
    );
    let slugs: Vec<&str> = Persona::ALL.iter().map(|p| p.slug()).collect();
    let _ = writeln!(doc, "Valid roles: {}.\n", slugs.join(", "));

    let _ = writeln!(doc, "## Staying current\n");
    let _ = writeln!(
        doc,
        "1. Check your inbox regularly with `{exe} inbox --workspace {root} --session {id}`. \
         A notice appears in this terminal when new instructions arrive."
    );
    let _ = writeln!(
        doc,
        "2. Every few minutes, overwrite `current_work.md` with one short paragraph about your current work."
    );
    let _ = writeln!(
        doc,
        "3. Track your own tasks with `{exe} task set --workspace {root} --session {id} <index> <status>`."
    );
    doc
}

/// Single-quote a value for POSIX shells.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Render the supervisory script: watcher in the background, the agent once in the foreground.
pub fn render_script(ws: &Workspace, session: &Session) -> String {
    let dir = ws.store.session_dir(&session.id);
    let exe = shell_quote(&ws.exe.to_string_lossy());
    let root = shell_quote(&ws.store.root().to_string_lossy());
    let id = shell_quote(&session.id);
    let agent: Vec<String> = std::iter::once(ws.config.agent_binary.as_str())
        .chain(ws.config.agent_args.iter().map(String::as_str))
        .map(shell_quote)
        .collect();

    let mut script = String::new();
    let _ = writeln!(script, "#!/usr/bin/env bash");
    let _ = writeln!(script, "# troupe worker: {}", session.id);
    let _ = writeln!(script, "cd {} || exit 1", shell_quote(&dir.to_string_lossy()));
    let _ = writeln!(script, "{exe} watch --workspace {root} --session {id} &");
    let _ = writeln!(script, "WATCHER=$!");
    let _ = writeln!(script, "trap 'kill \"$WATCHER\" 2>/dev/null' EXIT");
    let _ = writeln!(
        script,
        "{} \"$(cat {ROLE_FILE})\"$'\\n\\n'{}",
        agent.join(" "),
        shell_quote(TASK_DIRECTIVE)
    );
    let _ = writeln!(script, "STATUS=$?");
    let _ = writeln!(script, "echo \"[troupe] agent exited with status $STATUS\"");
    let _ = writeln!(script, "exit $STATUS");
    script
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    store::write_atomic(path, content.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Launch `session` in a new terminal session.
///
/// Returns `Ok(true)` when the worker is running. Failing to write the launch files or to
/// create the terminal marks the session `failed` and returns `Ok(false)`. Only errors
/// saving the session record propagate.
pub async fn launch(
    ws: &Workspace,
    session: &mut Session,
    state: &mut OrchestratorState,
) -> Result<bool> {
    let name = ws.config.terminal_name(&session.id);
    if let Err(e) = start_terminal(ws, session, &name).await {
        tracing::warn!(session = %session.id, terminal = %name, error = %e, "Failed to launch worker");
        if session.advance(SessionStatus::Failed) {
            ws.store.save(session)?;
        }
        return Ok(false);
    }

    let pid = match ws.mux.pane_pid(&name).await {
        Ok(pid) => pid,
        Err(e) => {
            tracing::debug!(terminal = %name, error = %e, "Pane pid unavailable");
            None
        }
    };
    let handle = TerminalHandle::new(name);
    state.record_spawn(&handle);
    session.mark_spawned(handle.clone(), pid);
    ws.store.save(session)?;
    tracing::info!(session = %session.id, terminal = %handle, pid = ?pid, "Launched worker");
    Ok(true)
}

/// Write ROLE.md and run.sh, then create the terminal session running the script.
async fn start_terminal(ws: &Workspace, session: &Session, name: &str) -> Result<()> {
    let dir = ws.store.session_dir(&session.id);
    store::write_atomic(&dir.join(ROLE_FILE), render_role(ws, session).as_bytes())?;
    let script = dir.join(SCRIPT_FILE);
    write_executable(&script, &render_script(ws, session))?;

    let command = format!("bash {}", shell_quote(&script.to_string_lossy()));
    ws.mux.create_session(name, &dir, &command).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::FakeMux;
    use std::sync::Arc;
    use tempfile::TempDir;
    use troupe_core::{Config, MessagingPolicy, SessionStore};

    fn workspace(tmp: &TempDir, mux: Arc<FakeMux>, config: Config) -> Workspace {
        let store = SessionStore::open(tmp.path()).unwrap();
        Workspace::with_parts(store, config, mux, "/usr/bin/troupe".into())
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_role_override_file_wins() {
        let tmp = TempDir::new().unwrap();
        let roles = tmp.path().join(STATE_DIR).join("roles");
        std::fs::create_dir_all(&roles).unwrap();
        std::fs::write(roles.join("qa-engineer.md"), "Custom QA behaviour.\n").unwrap();

        assert_eq!(role_text(tmp.path(), Persona::Qa), "Custom QA behaviour.");
        assert!(role_text(tmp.path(), Persona::Intern).starts_with("You are an intern"));
    }

    #[test]
    fn test_render_role_mentions_protocols() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            messaging_policy: MessagingPolicy::Hierarchical,
            ..Config::default()
        };
        let ws = workspace(&tmp, Arc::new(FakeMux::new()), config);
        let session = Session::new("architect-ada", Persona::Architect, "Ada");
        let doc = render_role(&ws, &session);

        assert!(doc.starts_with("# Ada (Architect)"));
        assert!(doc.contains("software architect"));
        assert!(doc.contains("--from architect-ada"));
        assert!(doc.contains("-request-<short-name>"));
        assert!(doc.contains("current_work.md"));
        assert!(doc.contains("one level above or below"));
    }

    #[test]
    fn test_render_script_runs_watcher_then_agent() {
        let tmp = TempDir::new().unwrap();
        let ws = workspace(&tmp, Arc::new(FakeMux::new()), Config::default());
        let session = Session::new("intern-bo", Persona::Intern, "Bo");
        let script = render_script(&ws, &session);

        let watch = script.find("watch --workspace").unwrap();
        let agent = script.find("'claude' '--print'").unwrap();
        assert!(watch < agent);
        assert!(script.contains("--session 'intern-bo' &"));
        assert!(script.contains("trap 'kill"));
        assert!(script.contains("$(cat ROLE.md)"));
    }

    #[tokio::test]
    async fn test_launch_records_supervision() {
        let tmp = TempDir::new().unwrap();
        let mux = Arc::new(FakeMux::new());
        let ws = workspace(&tmp, mux.clone(), Config::default());
        let mut session = ws
            .store
            .create_session(Persona::Intern, "Bo", "intern-bo", "g")
            .unwrap();
        let mut state = OrchestratorState::new("g");

        assert!(launch(&ws, &mut session, &mut state).await.unwrap());

        let stored = ws.store.load("intern-bo").unwrap();
        assert_eq!(stored.status, SessionStatus::Spawned);
        assert!(stored.is_supervised());
        assert_eq!(stored.pid, Some(4242));
        assert_eq!(state.spawned_terminals, vec![TerminalHandle::new("troupe-intern-bo")]);

        let dir = ws.store.session_dir("intern-bo");
        assert!(dir.join(ROLE_FILE).is_file());
        let pane = mux.pane("troupe-intern-bo").unwrap();
        assert_eq!(pane.cwd, dir);
        assert!(pane.command.ends_with("run.sh'"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.join(SCRIPT_FILE)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn test_launch_failure_marks_failed() {
        let tmp = TempDir::new().unwrap();
        let mux = Arc::new(FakeMux::new());
        mux.fail_creates(true);
        let ws = workspace(&tmp, mux, Config::default());
        let mut session = ws
            .store
            .create_session(Persona::Intern, "Bo", "intern-bo", "g")
            .unwrap();
        let mut state = OrchestratorState::new("g");

        assert!(!launch(&ws, &mut session, &mut state).await.unwrap());
        assert_eq!(ws.store.load("intern-bo").unwrap().status, SessionStatus::Failed);
        assert!(state.spawned_terminals.is_empty());
    }
}
