// ABOUTME: Live dashboard for the orchestrator showing sessions, details, and team cost.
// ABOUTME: Uses ratatui on crossterm with a fixed 250ms tick and periodic store reloads.

use super::{teardown, Workspace};
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::{self, Stdout};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use troupe_core::{OrchestratorState, Session, SessionStatus, StoredSession, TeamUsage};

const TICK: Duration = Duration::from_millis(250);
const PANE_TAIL_LINES: u32 = 12;
const MAX_LOGS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Info,
    Warn,
    Error,
}

impl LogKind {
    fn color(&self) -> Color {
        match self {
            LogKind::Info => Color::Cyan,
            LogKind::Warn => Color::Yellow,
            LogKind::Error => Color::Red,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LogKind::Info => "INFO",
            LogKind::Warn => "WARN",
            LogKind::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
struct LogEntry {
    timestamp: Instant,
    kind: LogKind,
    content: String,
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Created => Color::Yellow,
        SessionStatus::Spawned => Color::Green,
        SessionStatus::Idle => Color::Cyan,
        SessionStatus::Completed => Color::Blue,
        SessionStatus::Stopped => Color::Magenta,
        SessionStatus::Failed => Color::Red,
        SessionStatus::Archived => Color::DarkGray,
    }
}

fn status_symbol(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Created => "o",
        SessionStatus::Spawned => "*",
        SessionStatus::Idle => "~",
        SessionStatus::Completed => "+",
        SessionStatus::Stopped => "-",
        SessionStatus::Failed => "x",
        SessionStatus::Archived => ".",
    }
}

/// What the event loop should do after a key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Continue,
    Quit,
    Attach(String),
    Teardown,
}

/// Everything the dashboard draws. Kept apart from IO so rendering and key handling are testable.
#[derive(Debug)]
pub struct View {
    workspace: String,
    sessions: Vec<Session>,
    progress: HashMap<String, (usize, usize)>,
    selected: usize,
    details: bool,
    confirm_teardown: bool,
    pane_tail: Vec<String>,
    team: TeamUsage,
    orchestrator: OrchestratorState,
    active: BTreeSet<String>,
    logs: VecDeque<LogEntry>,
    start_time: Instant,
}

impl View {
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            sessions: Vec::new(),
            progress: HashMap::new(),
            selected: 0,
            details: false,
            confirm_teardown: false,
            pane_tail: Vec::new(),
            team: TeamUsage::default(),
            orchestrator: OrchestratorState::default(),
            active: BTreeSet::new(),
            logs: VecDeque::new(),
            start_time: Instant::now(),
        }
    }

    pub fn log(&mut self, kind: LogKind, content: impl Into<String>) {
        self.logs.push_back(LogEntry {
            timestamp: Instant::now(),
            kind,
            content: content.into(),
        });
        while self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }

    /// Replace the session snapshot. Archived sessions only contribute to the cost totals.
    pub fn apply(
        &mut self,
        stored: Vec<StoredSession>,
        progress: HashMap<String, (usize, usize)>,
        orchestrator: OrchestratorState,
    ) {
        let selected_id = self.selected_session().map(|s| s.id.clone());
        self.team = TeamUsage::from_usages(stored.iter().map(|s| &s.session.usage));

        let mut visible: Vec<Session> = stored
            .into_iter()
            .filter(|s| s.archived_as.is_none() && s.session.status != SessionStatus::Archived)
            .map(|s| s.session)
            .collect();
        visible.sort_by(|a, b| {
            (a.persona.rank(), a.id.as_str()).cmp(&(b.persona.rank(), b.id.as_str()))
        });

        let active: BTreeSet<String> = visible
            .iter()
            .filter(|s| s.status.is_active())
            .map(|s| s.id.clone())
            .collect();
        if active != self.active {
            let list = active.iter().cloned().collect::<Vec<_>>().join(", ");
            let message = if list.is_empty() {
                "No active sessions".to_string()
            } else {
                format!("Active sessions ({}): {list}", active.len())
            };
            tracing::info!(active = active.len(), "Active set changed");
            self.log(LogKind::Info, message);
            self.active = active;
        }

        self.sessions = visible;
        self.progress = progress;
        self.orchestrator = orchestrator;
        self.selected = selected_id
            .and_then(|id| self.sessions.iter().position(|s| s.id == id))
            .unwrap_or(self.selected)
            .min(self.sessions.len().saturating_sub(1));
    }

    pub fn selected_session(&self) -> Option<&Session> {
        self.sessions.get(self.selected)
    }

    pub fn set_pane_tail(&mut self, tail: Vec<String>) {
        self.pane_tail = tail;
    }

    pub fn details_open(&self) -> bool {
        self.details
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        if self.confirm_teardown {
            self.confirm_teardown = false;
            if key.code == KeyCode::Char('y') {
                return Action::Teardown;
            }
            self.log(LogKind::Info, "Teardown cancelled");
            return Action::Continue;
        }

        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), m) if m.contains(KeyModifiers::CONTROL) => Action::Quit,
            (KeyCode::Char('q'), _) => Action::Quit,
            (KeyCode::Up, _) | (KeyCode::Char('k'), _) => {
                self.selected = self.selected.saturating_sub(1);
                self.pane_tail.clear();
                Action::Continue
            }
            (KeyCode::Down, _) | (KeyCode::Char('j'), _) => {
                if self.selected + 1 < self.sessions.len() {
                    self.selected += 1;
                    self.pane_tail.clear();
                }
                Action::Continue
            }
            (KeyCode::Enter, _) | (KeyCode::Char('d'), _) => {
                self.details = !self.details;
                Action::Continue
            }
            (KeyCode::Esc, _) | (KeyCode::Char('b'), _) => {
                self.details = false;
                Action::Continue
            }
            (KeyCode::Char('a'), _) => {
                let target = self
                    .selected_session()
                    .map(|s| (s.id.clone(), s.terminal.clone()));
                match target {
                    Some((_, Some(terminal))) => Action::Attach(terminal.name),
                    Some((id, None)) => {
                        self.log(LogKind::Warn, format!("{id} has no terminal to attach to"));
                        Action::Continue
                    }
                    None => Action::Continue,
                }
            }
            (KeyCode::Char('K'), _) => {
                self.confirm_teardown = true;
                self.log(
                    LogKind::Warn,
                    "Teardown armed: press y to kill every session and delete the workspace",
                );
                Action::Continue
            }
            _ => Action::Continue,
        }
    }
}

/// Interactive dashboard over one workspace.
pub struct Dashboard {
    ws: Workspace,
    view: View,
}

impl Dashboard {
    pub fn new(ws: Workspace) -> Self {
        let view = View::new(ws.store.root().display().to_string());
        Self { ws, view }
    }

    /// Reload the store. Failures become log lines.
    async fn reload(&mut self) {
        let stored = match self.ws.store.list() {
            Ok(stored) => stored,
            Err(e) => {
                self.view.log(LogKind::Error, format!("Reload failed: {e}"));
                return;
            }
        };
        let progress = stored
            .iter()
            .filter(|s| s.archived_as.is_none())
            .filter_map(|s| {
                let log = self.ws.store.read_tasks(&s.session.id).ok()?;
                Some((s.session.id.clone(), log.progress()))
            })
            .collect();
        let orchestrator = self.ws.store.load_orchestrator().unwrap_or_default();
        self.view.apply(stored, progress, orchestrator);
        self.refresh_tail().await;
    }

    async fn refresh_tail(&mut self) {
        if !self.view.details_open() {
            return;
        }
        let Some(terminal) = self.view.selected_session().and_then(|s| s.terminal.clone()) else {
            self.view.set_pane_tail(Vec::new());
            return;
        };
        match self.ws.mux.capture_pane(&terminal.name, PANE_TAIL_LINES).await {
            Ok(text) => self
                .view
                .set_pane_tail(text.lines().map(str::to_string).collect()),
            Err(_) => self.view.set_pane_tail(vec!["(terminal not running)".to_string()]),
        }
    }

    /// Run until quit or teardown.
    pub async fn run(mut self) -> Result<()> {
        let mut terminal = TerminalGuard::enter()?;
        let refresh = self.ws.config.dashboard_refresh_ticks.max(1);
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        self.view.log(LogKind::Info, "Dashboard started");
        self.reload().await;

        loop {
            ticker.tick().await;
            ticks += 1;
            if ticks % refresh == 0 {
                self.reload().await;
            }

            terminal.inner.draw(|f| render(f, &self.view))?;

            while event::poll(Duration::ZERO)? {
                let Event::Key(key) = event::read()? else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match self.view.handle_key(key) {
                    Action::Continue => self.refresh_tail().await,
                    Action::Quit => return Ok(()),
                    Action::Attach(name) => {
                        self.attach(&mut terminal, &name).await?;
                        self.reload().await;
                    }
                    Action::Teardown => {
                        let report = teardown(&self.ws).await;
                        tracing::warn!(
                            killed = report.killed.len(),
                            failures = report.failures.len(),
                            "Workspace torn down from dashboard"
                        );
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Suspend the dashboard, attach to a worker's terminal, and resume when it detaches.
    async fn attach(&mut self, terminal: &mut TerminalGuard, name: &str) -> Result<()> {
        terminal.suspend()?;
        let status = tokio::process::Command::from(self.ws.mux.attach_command(name))
            .status()
            .await;
        terminal.resume()?;
        match status {
            Ok(s) if s.success() => self.view.log(LogKind::Info, format!("Detached from {name}")),
            Ok(s) => self
                .view
                .log(LogKind::Error, format!("Attach to {name} exited with {s}")),
            Err(e) => self
                .view
                .log(LogKind::Error, format!("Failed to attach to {name}: {e}")),
        }
        Ok(())
    }
}

/// Owns raw mode and the alternate screen; restores the terminal on drop.
struct TerminalGuard {
    inner: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let inner = Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self { inner })
    }

    fn suspend(&mut self) -> io::Result<()> {
        disable_raw_mode()?;
        execute!(self.inner.backend_mut(), LeaveAlternateScreen)?;
        self.inner.show_cursor()
    }

    fn resume(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        execute!(self.inner.backend_mut(), EnterAlternateScreen)?;
        self.inner.clear()
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.inner.backend_mut(), LeaveAlternateScreen);
        let _ = self.inner.show_cursor();
    }
}

/// Render the whole dashboard.
pub fn render(frame: &mut Frame, view: &View) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(8),    // Sessions (+ details)
            Constraint::Length(8), // Logs
            Constraint::Length(1), // Cost
            Constraint::Length(1), // Help
        ])
        .split(frame.area());

    render_header(frame, chunks[0], view);
    if view.details {
        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(chunks[1]);
        render_sessions(frame, body[0], view);
        render_details(frame, body[1], view);
    } else {
        render_sessions(frame, chunks[1], view);
    }
    render_logs(frame, chunks[2], view);
    render_cost(frame, chunks[3], view);
    render_help(frame, chunks[4], view);
}

fn render_header(frame: &mut Frame, area: Rect, view: &View) {
    let elapsed = view.start_time.elapsed().as_secs();
    let uptime = format!(
        "{:02}:{:02}:{:02}",
        elapsed / 3600,
        (elapsed % 3600) / 60,
        elapsed % 60
    );
    let counters = &view.orchestrator.counters;

    let title = Line::from(vec![
        Span::styled(
            " troupe ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("{} active", view.active.len()),
            Style::default().fg(Color::Green),
        ),
        Span::raw(" | "),
        Span::styled(
            format!(
                "{} spawned, {} completed, {} stopped/failed",
                counters.spawned, counters.completed, counters.failed
            ),
            Style::default().fg(Color::Gray),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("uptime {uptime}"),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let block = Block::default()
        .title(format!(" {} ", view.workspace))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(title).block(block), area);
}

fn render_sessions(frame: &mut Frame, area: Rect, view: &View) {
    let items: Vec<ListItem> = view
        .sessions
        .iter()
        .map(|session| {
            let (done, total) = view.progress.get(&session.id).copied().unwrap_or_default();
            let status_style = Style::default().fg(status_color(session.status));
            ListItem::new(Line::from(vec![
                Span::styled(format!(" {} ", status_symbol(session.status)), status_style),
                Span::styled(
                    format!("{:<10}", session.persona.label()),
                    Style::default().fg(Color::Blue),
                ),
                Span::styled(
                    format!("{:<28}", session.id),
                    Style::default().fg(Color::White),
                ),
                Span::styled(format!("{:<10}", session.status.as_str()), status_style),
                Span::styled(
                    format!("tasks {done}/{total}"),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();

    let title = format!(" Sessions ({}) ", view.sessions.len());
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = ListState::default();
    if !view.sessions.is_empty() {
        state.select(Some(view.selected));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_details(frame: &mut Frame, area: Rect, view: &View) {
    let block = Block::default()
        .title(" Details ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let Some(session) = view.selected_session() else {
        frame.render_widget(Paragraph::new("No session selected").block(block), area);
        return;
    };

    let field = |label: &str, value: String| {
        Line::from(vec![
            Span::styled(format!("{label:<10}"), Style::default().fg(Color::DarkGray)),
            Span::raw(value),
        ])
    };
    let mut lines = vec![
        field("Name", session.display_name.clone()),
        field("Id", session.id.clone()),
        field("Role", session.persona.label().to_string()),
        field("Status", session.status.to_string()),
        field(
            "Started",
            session
                .started_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ),
        field(
            "Terminal",
            session
                .terminal
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "-".to_string()),
        ),
        field(
            "Pid",
            session.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        ),
        field(
            "Tokens",
            format!(
                "{} in / {} out (${:.4})",
                session.usage.input_tokens,
                session.usage.output_tokens,
                session.usage.estimated_cost_usd
            ),
        ),
        field(
            "Working on",
            if session.current_work.is_empty() {
                "-".to_string()
            } else {
                session.current_work.clone()
            },
        ),
        Line::from(Span::styled(
            "-- terminal --",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    lines.extend(view.pane_tail.iter().map(|l| Line::raw(l.clone())));

    frame.render_widget(
        Paragraph::new(lines).block(block).wrap(Wrap { trim: false }),
        area,
    );
}

fn render_logs(frame: &mut Frame, area: Rect, view: &View) {
    let inner_height = area.height.saturating_sub(2) as usize;
    let skip = view.logs.len().saturating_sub(inner_height);
    let items: Vec<ListItem> = view
        .logs
        .iter()
        .skip(skip)
        .map(|entry| {
            let elapsed = entry.timestamp.duration_since(view.start_time).as_secs();
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{:02}:{:02}", (elapsed / 60) % 60, elapsed % 60),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::raw(" "),
                Span::styled(
                    format!("{:5}", entry.kind.label()),
                    Style::default().fg(entry.kind.color()),
                ),
                Span::raw(" "),
                Span::raw(entry.content.clone()),
            ]))
        })
        .collect();

    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(List::new(items).block(block), area);
}

fn render_cost(frame: &mut Frame, area: Rect, view: &View) {
    let team = &view.team;
    let line = Line::from(vec![
        Span::styled(" Team cost ", Style::default().fg(Color::Yellow)),
        Span::raw(format!(
            "${:.4} | {} sessions | {} in / {} out tokens",
            team.estimated_cost_usd, team.sessions, team.input_tokens, team.output_tokens
        )),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn render_help(frame: &mut Frame, area: Rect, view: &View) {
    if view.confirm_teardown {
        let warning = Line::from(Span::styled(
            " Tear down every session and delete the workspace? y to confirm, any other key cancels",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
        frame.render_widget(Paragraph::new(warning), area);
        return;
    }

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let help = Line::from(vec![
        key(" q"),
        Span::raw(" quit  "),
        key("^/k v/j"),
        Span::raw(" select  "),
        key("enter/d"),
        Span::raw(" details  "),
        key("a"),
        Span::raw(" attach  "),
        key("esc/b"),
        Span::raw(" back  "),
        key("K"),
        Span::raw(" teardown"),
    ]);
    frame.render_widget(Paragraph::new(help), area);
}
