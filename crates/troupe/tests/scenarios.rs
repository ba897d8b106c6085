// ABOUTME: End-to-end control-loop scenarios against an in-memory multiplexer.
// ABOUTME: Covers exit classification, archiving, spawn requests, and cost accounting.

use std::sync::Arc;
use tempfile::TempDir;
use troupe::supervisor::{monitor, Workspace};
use troupe::{tick, CostMonitor, FakeMux, Scanner};
use troupe_core::{
    Config, Persona, SessionStatus, SessionStore, Task, TaskStatus, TerminalHandle,
};

fn workspace(tmp: &TempDir) -> (Workspace, Arc<FakeMux>) {
    let store = SessionStore::open(tmp.path()).unwrap();
    let mux = Arc::new(FakeMux::new());
    let ws = Workspace::with_parts(store, Config::default(), mux.clone(), "troupe".into());
    (ws, mux)
}

/// Register a session and pretend it was launched in `troupe-<id>`.
fn spawned(ws: &Workspace, mux: &FakeMux, persona: Persona, name: &str, id: &str) {
    let mut session = ws.store.create_session(persona, name, id, "g").unwrap();
    let terminal = format!("troupe-{id}");
    session.mark_spawned(TerminalHandle::new(terminal.clone()), None);
    ws.store.save(&session).unwrap();
    mux.insert(&terminal);
}

#[tokio::test]
async fn test_exit_without_tasks_is_stopped() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    spawned(&ws, &mux, Persona::Intern, "Bo", "intern-bo");
    mux.end_session("troupe-intern-bo");

    let report = monitor::tick(&ws).await.unwrap();

    assert_eq!(report.stopped, vec!["intern-bo"]);
    assert!(report.completed.is_empty());
    let stored = ws.store.list().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].archived_as, Some(SessionStatus::Stopped));
    assert!(tmp.path().join("intern-bo.stopped").is_dir());
}

#[tokio::test]
async fn test_exit_with_all_tasks_done_is_completed_and_archived() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    spawned(&ws, &mux, Persona::Engineer, "Tim", "software-engineer-tim");
    ws.store
        .add_task("software-engineer-tim", Task::new("ship it", "user"))
        .unwrap();
    ws.store
        .set_task_status("software-engineer-tim", 0, TaskStatus::Completed)
        .unwrap();
    mux.end_session("troupe-software-engineer-tim");

    let report = monitor::tick(&ws).await.unwrap();

    assert_eq!(report.completed, vec!["software-engineer-tim"]);
    assert_eq!(report.archived, vec!["software-engineer-tim"]);
    assert!(!tmp.path().join("software-engineer-tim").exists());
    assert!(tmp.path().join("software-engineer-tim.completed").is_dir());
    assert_eq!(mux.killed(), vec!["troupe-software-engineer-tim"]);
}

#[tokio::test]
async fn test_spawn_request_becomes_running_session() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    let request = tmp.path().join("software-engineer-request-foo");
    std::fs::create_dir(&request).unwrap();
    std::fs::write(request.join("task.md"), "X").unwrap();

    let mut scanner = Scanner::new();
    let report = tick(&ws, &mut scanner).await.unwrap();

    assert_eq!(report.scan.created.len(), 1);
    let id = report.scan.created[0].clone();
    assert!(id.starts_with("software-engineer-"));
    assert!(!request.exists());

    let session = ws.store.load(&id).unwrap();
    assert_eq!(session.persona, Persona::Engineer);
    assert_eq!(session.status, SessionStatus::Spawned);
    let inbox = ws.store.pending_instructions(&id).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].body, "X");
    assert_eq!(mux.session_names(), vec![format!("troupe-{id}")]);

    let state = ws.store.load_orchestrator().unwrap();
    assert_eq!(state.counters.spawned, 1);
    assert_eq!(state.counters.active, 1);
    assert_eq!(state.spawned_terminals.len(), 1);
}

#[tokio::test]
async fn test_scraped_telemetry_costs_tokens() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    spawned(&ws, &mux, Persona::Intern, "Bo", "intern-bo");
    mux.set_screen(
        "troupe-intern-bo",
        "model: sonnet\ninput tokens: 1000\noutput tokens: 500\n",
    );

    let cost = CostMonitor::new(ws.clone());
    cost.tick().await.unwrap();

    let session = ws.store.load("intern-bo").unwrap();
    assert_eq!(session.usage.input_tokens, 1000);
    assert_eq!(session.usage.output_tokens, 500);
    assert!((session.usage.estimated_cost_usd - 0.0105).abs() < 1e-9);

    // Same screen on the next sample adds nothing.
    cost.tick().await.unwrap();
    assert_eq!(ws.store.load("intern-bo").unwrap().usage.input_tokens, 1000);
}

#[tokio::test]
async fn test_failed_launch_is_archived_as_failed() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    mux.fail_creates(true);
    std::fs::create_dir(tmp.path().join("qa-request-smoke")).unwrap();
    std::fs::write(tmp.path().join("qa-request-smoke").join("a.md"), "smoke test").unwrap();

    let mut scanner = Scanner::new();
    let first = tick(&ws, &mut scanner).await.unwrap();
    assert_eq!(first.scan.failed.len(), 1);
    let id = first.scan.failed[0].clone();

    let stored = ws.store.list().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].session.id, id);
    assert_eq!(stored[0].archived_as, Some(SessionStatus::Failed));
    assert!(tmp.path().join(format!("{id}.failed")).is_dir());
}

#[tokio::test]
async fn test_full_lifecycle_across_ticks() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    ws.store
        .create_session(Persona::Architect, "Ada", "architect-ada", "g")
        .unwrap();

    let mut scanner = Scanner::new();
    let first = tick(&ws, &mut scanner).await.unwrap();
    assert_eq!(first.scan.launched, vec!["architect-ada"]);
    assert!(mux.pane("troupe-architect-ada").is_some());

    ws.store
        .add_task("architect-ada", Task::new("draw boxes", "user"))
        .unwrap();
    ws.store
        .set_task_status("architect-ada", 0, TaskStatus::Completed)
        .unwrap();
    mux.end_session("troupe-architect-ada");

    let second = tick(&ws, &mut scanner).await.unwrap();
    assert_eq!(second.monitor.completed, vec!["architect-ada"]);
    assert_eq!(second.monitor.archived, vec!["architect-ada"]);

    let third = tick(&ws, &mut scanner).await.unwrap();
    assert!(third.scan.created.is_empty() && third.monitor.archived.is_empty());
    assert!(tmp.path().join("architect-ada.completed").is_dir());
}

#[tokio::test]
async fn test_broken_session_does_not_stall_the_tick() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    ws.store
        .create_session(Persona::Architect, "Ada", "architect-ada", "g")
        .unwrap();
    std::fs::create_dir(tmp.path().join("architect-ada").join("ROLE.md")).unwrap();
    ws.store
        .create_session(Persona::Intern, "Bo", "intern-bo", "g")
        .unwrap();
    spawned(&ws, &mux, Persona::Qa, "Cy", "qa-engineer-cy");
    mux.end_session("troupe-qa-engineer-cy");

    let mut scanner = Scanner::new();
    let report = tick(&ws, &mut scanner).await.unwrap();

    assert_eq!(report.scan.failed, vec!["architect-ada"]);
    assert_eq!(report.scan.launched, vec!["intern-bo"]);
    assert_eq!(report.monitor.stopped, vec!["qa-engineer-cy"]);
    assert!(report.monitor.archived.contains(&"qa-engineer-cy".to_string()));
    assert!(report.monitor.archived.contains(&"architect-ada".to_string()));
    assert!(tmp.path().join("architect-ada.failed").is_dir());

    let state = ws.store.load_orchestrator().unwrap();
    assert_eq!(state.counters.active, 1);
}

#[tokio::test]
async fn test_unfamiliar_task_layout_still_completes() {
    let tmp = TempDir::new().unwrap();
    let (ws, mux) = workspace(&tmp);
    spawned(&ws, &mux, Persona::Intern, "Bo", "intern-bo");
    std::fs::write(
        ws.store.tasks_path("intern-bo"),
        "[[tasks]]\ndescription = \"x\"\nstatus = \"completed\"\n",
    )
    .unwrap();
    mux.end_session("troupe-intern-bo");

    let report = monitor::tick(&ws).await.unwrap();

    assert_eq!(report.completed, vec!["intern-bo"]);
    assert!(report.stopped.is_empty());
}
