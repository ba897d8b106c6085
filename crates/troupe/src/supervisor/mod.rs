// ABOUTME: Orchestrator components: request scanner, process supervisor, monitors, dashboard.
// ABOUTME: Workspace bundles the store, config, and multiplexer shared by every component.

pub mod cost;
pub mod monitor;
pub mod scan;
pub mod spawn;
pub mod tui;

pub use cost::CostMonitor;
pub use monitor::MonitorReport;
pub use scan::{ScanReport, Scanner};
pub use tui::Dashboard;

use crate::mux::{Multiplexer, Tmux};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use troupe_core::{Config, OrchestratorStatus, SessionStore, TerminalHandle};

/// Everything a component needs to act on one workspace.
#[derive(Clone)]
pub struct Workspace {
    pub store: SessionStore,
    pub config: Arc<Config>,
    pub mux: Arc<dyn Multiplexer>,
    /// Executable that workers call back into (`troupe watch`, `troupe inbox`, ...).
    pub exe: PathBuf,
}

impl Workspace {
    /// Open an existing workspace with its resolved config and the tmux multiplexer.
    pub fn open(root: &Path) -> Result<Self> {
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("Workspace not found at {}", root.display()))?;
        let store = SessionStore::open(&root)?;
        let config = Config::for_workspace(&root)?;
        let mux = Arc::new(Tmux::new(config.tmux_binary.clone()));
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("troupe"));
        Ok(Self::with_parts(store, config, mux, exe))
    }

    pub fn with_parts(
        store: SessionStore,
        config: Config,
        mux: Arc<dyn Multiplexer>,
        exe: PathBuf,
    ) -> Self {
        Self {
            store,
            config: Arc::new(config),
            mux,
            exe,
        }
    }
}

/// Outcome of one control-loop tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub scan: ScanReport,
    pub monitor: MonitorReport,
}

/// One control-loop iteration: scan for new work, supervise running sessions, persist counters.
/// A failed scan or monitor pass is logged and does not stop the other.
pub async fn tick(ws: &Workspace, scanner: &mut Scanner) -> Result<TickReport> {
    let mut state = ws.store.load_orchestrator()?;
    let scan = scanner.tick(ws, &mut state).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Scan failed");
        ScanReport::default()
    });
    let monitor = monitor::tick(ws).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Monitor pass failed");
        MonitorReport::default()
    });

    let sessions = ws.store.list()?;
    state.refresh_counters(sessions.iter().map(|s| (&s.session, s.archived_as)));
    state.status = OrchestratorStatus::Running;
    ws.store.save_orchestrator(&state)?;
    Ok(TickReport { scan, monitor })
}

/// Summary of a teardown run.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub killed: Vec<String>,
    pub failures: Vec<String>,
    pub workspace_removed: bool,
}

/// Kill every terminal session the workspace ever created, delete the workspace tree,
/// then kill the orchestrator's own session. Best effort: failures are collected, not fatal.
pub async fn teardown(ws: &Workspace) -> TeardownReport {
    let mut report = TeardownReport::default();
    let state = ws.store.load_orchestrator().unwrap_or_default();

    let mut handles: Vec<TerminalHandle> = state.spawned_terminals.clone();
    if let Ok(sessions) = ws.store.list() {
        for stored in sessions {
            if let Some(handle) = stored.session.terminal {
                if !handles.contains(&handle) {
                    handles.push(handle);
                }
            }
        }
    }

    for handle in &handles {
        match ws.mux.kill_session(&handle.name).await {
            Ok(()) => report.killed.push(handle.name.clone()),
            Err(e) => {
                tracing::warn!(terminal = %handle, error = %e, "Failed to kill terminal");
                report.failures.push(format!("{handle}: {e}"));
            }
        }
    }

    match ws.store.clone().destroy() {
        Ok(()) => report.workspace_removed = true,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to delete workspace");
            report.failures.push(e.to_string());
        }
    }

    if let Some(own) = state.terminal {
        if let Err(e) = ws.mux.kill_session(&own.name).await {
            report.failures.push(format!("{own}: {e}"));
        } else {
            report.killed.push(own.name);
        }
    }
    report
}
