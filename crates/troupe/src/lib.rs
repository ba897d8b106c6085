// ABOUTME: troupe library with the control loop, bulk start, dashboard, and teardown entry points.
// ABOUTME: Re-exports the supervisor components for programmatic use.

pub mod commands;
pub mod mux;
pub mod supervisor;

pub use mux::{FakeMux, Multiplexer, MuxError, Tmux};
pub use supervisor::{teardown, tick, CostMonitor, Dashboard, Scanner, Workspace};
pub use troupe_core::Config;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use troupe_core::{names, OrchestratorStatus, Persona, Session, SessionStore, TerminalHandle};

/// Options for running the orchestrator control loop
pub struct SupervisorOptions {
    /// Workspace root
    pub workspace: PathBuf,
    /// Run without the dashboard
    pub headless: bool,
}

/// Options for `troupe start`
pub struct StartOptions {
    pub workspace: PathBuf,
    /// Personas to register; empty means the configured default team
    pub team: Vec<Persona>,
    /// Goal delivered to the first manager's inbox
    pub goal: Option<String>,
    /// Run the orchestrator inside its own terminal session
    pub detach: bool,
    pub headless: bool,
}

fn new_group_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

async fn dashboard_exit(handle: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    match handle.as_mut() {
        Some(handle) => handle.await.context("Dashboard task panicked")?,
        None => std::future::pending().await,
    }
}

/// Run the control loop until Ctrl-C or the dashboard quits.
pub async fn run_supervisor(options: SupervisorOptions) -> Result<()> {
    let ws = Workspace::open(&options.workspace)?;

    let mut state = ws.store.load_orchestrator()?;
    if state.group_id.is_empty() {
        state.group_id = new_group_id();
    }
    state.status = OrchestratorStatus::Running;
    ws.store.save_orchestrator(&state)?;
    tracing::info!(root = %ws.store.root().display(), group = %state.group_id, "Orchestrator running");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cost_task = tokio::spawn(
        CostMonitor::new(ws.clone()).run(ws.config.cost_interval(), shutdown_rx),
    );

    let mut dashboard = if options.headless {
        None
    } else {
        let dashboard = Dashboard::new(ws.clone());
        Some(tokio::spawn(dashboard.run()))
    };

    let mut scanner = Scanner::new();
    let mut interval = tokio::time::interval(ws.config.loop_interval());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match tick(&ws, &mut scanner).await {
                    Ok(report) => {
                        if !report.scan.created.is_empty() || !report.monitor.archived.is_empty() {
                            tracing::info!(
                                created = report.scan.created.len(),
                                launched = report.scan.launched.len(),
                                completed = report.monitor.completed.len(),
                                stopped = report.monitor.stopped.len(),
                                archived = report.monitor.archived.len(),
                                "Control loop tick"
                            );
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Control loop tick failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            result = dashboard_exit(&mut dashboard) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Dashboard exited with error");
                }
                break;
            }
        }
    }

    if let Some(handle) = dashboard {
        handle.abort();
    }
    let _ = shutdown_tx.send(true);
    let _ = cost_task.await;

    // The dashboard may have torn the workspace down.
    if ws.store.root().is_dir() {
        let mut state = ws.store.load_orchestrator()?;
        state.status = OrchestratorStatus::Stopped;
        ws.store.save_orchestrator(&state)?;
    }
    tracing::info!("Orchestrator stopped");
    Ok(())
}

/// Register one `created` session per persona.
pub fn register_team(store: &SessionStore, team: &[Persona], group_id: &str) -> Result<Vec<Session>> {
    let mut sessions = Vec::with_capacity(team.len());
    for persona in team {
        let taken = store.existing_names()?;
        let (display_name, id) = names::pick(*persona, &taken);
        sessions.push(store.create_session(*persona, &display_name, &id, group_id)?);
    }
    Ok(sessions)
}

/// Create the workspace, register the initial team, then run (or detach) the orchestrator.
pub async fn run_start(options: StartOptions) -> Result<()> {
    let store = SessionStore::create(&options.workspace)?;
    let ws = Workspace::open(store.root())?;

    let mut state = ws.store.load_orchestrator()?;
    if state.group_id.is_empty() {
        state.group_id = new_group_id();
    }
    let team = if options.team.is_empty() {
        ws.config.default_team.clone()
    } else {
        options.team
    };
    let sessions = register_team(&ws.store, &team, &state.group_id)?;
    for session in &sessions {
        println!("Registered {} ({})", session.id, session.persona.label());
    }

    if let Some(goal) = options.goal {
        let target = sessions
            .iter()
            .find(|s| s.persona == Persona::Manager)
            .or_else(|| sessions.first())
            .context("No session registered to receive the goal")?;
        ws.store.append_instruction(&target.id, "user", &goal)?;
        println!("Delivered goal to {}", target.id);
    }
    ws.store.save_orchestrator(&state)?;

    if options.detach {
        let name = ws.config.orchestrator_terminal_name();
        if ws.mux.has_session(&name).await? {
            println!("Orchestrator already running in terminal session {name}");
            return Ok(());
        }
        let mut command = format!(
            "{} run --workspace {}",
            supervisor::spawn::shell_quote(&ws.exe.to_string_lossy()),
            supervisor::spawn::shell_quote(&ws.store.root().to_string_lossy())
        );
        if options.headless {
            command.push_str(" --headless");
        }
        ws.mux
            .create_session(&name, ws.store.root(), &command)
            .await
            .with_context(|| format!("Failed to start orchestrator session {name}"))?;
        state.terminal = Some(TerminalHandle::new(name.clone()));
        ws.store.save_orchestrator(&state)?;
        println!("Orchestrator running in terminal session {name}");
        println!("Open the dashboard with: troupe dashboard --workspace {}", ws.store.root().display());
        return Ok(());
    }

    run_supervisor(SupervisorOptions {
        workspace: ws.store.root().to_path_buf(),
        headless: options.headless,
    })
    .await
}

/// Run only the dashboard against a workspace supervised elsewhere.
pub async fn run_dashboard(workspace: PathBuf) -> Result<()> {
    let ws = Workspace::open(&workspace)?;
    Dashboard::new(ws).run().await
}

/// Kill every terminal session and delete the workspace. Requires explicit confirmation.
pub async fn run_teardown(workspace: PathBuf, confirmed: bool) -> Result<()> {
    let ws = Workspace::open(&workspace)?;
    if !confirmed {
        anyhow::bail!(
            "Refusing to tear down {} without --yes",
            ws.store.root().display()
        );
    }
    let report = teardown(&ws).await;
    for name in &report.killed {
        println!("Killed {name}");
    }
    for failure in &report.failures {
        eprintln!("Warning: {failure}");
    }
    if report.workspace_removed {
        println!("Removed {}", ws.store.root().display());
    }
    Ok(())
}
