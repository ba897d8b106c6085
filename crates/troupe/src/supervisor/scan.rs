// ABOUTME: Scans the workspace for spawn requests and registered sessions awaiting launch.
// ABOUTME: Turns request directories into sessions and hands new sessions to the launcher.

use super::{spawn, Workspace};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use troupe_core::store::{parse_archived_name, SESSION_FILE};
use troupe_core::{names, OrchestratorState, Persona, Session, SessionStatus};

const REQUEST_MARKER: &str = "request-";

/// How a top-level directory name was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// `<persona-slug>-request-<name>`
    Request { persona: Persona, name: String },
    /// A registered session in `created` state with no supervision yet.
    Pending(String),
    /// Already supervised, finished, or archived.
    Known,
    Unknown,
}

/// List visible top-level directories (hidden ones skipped).
pub fn discover_dirs(root: &Path) -> Result<Vec<String>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("Failed to scan workspace {}", root.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if name.starts_with('.') {
            continue;
        }
        dirs.push(name.to_string());
    }
    dirs.sort();
    Ok(dirs)
}

/// Classify a directory name against the registered sessions.
pub fn classify(name: &str, sessions: &HashMap<String, Session>) -> Entry {
    if let Some(session) = sessions.get(name) {
        return if session.status == SessionStatus::Created && !session.is_supervised() {
            Entry::Pending(name.to_string())
        } else {
            Entry::Known
        };
    }
    if parse_archived_name(name).is_some() {
        return Entry::Known;
    }
    if let Some((persona, rest)) = Persona::split_prefix(name) {
        if let Some(request) = rest.strip_prefix(REQUEST_MARKER) {
            if !request.is_empty() {
                return Entry::Request {
                    persona,
                    name: request.to_string(),
                };
            }
        }
    }
    Entry::Unknown
}

/// Concatenate every regular file in a request directory, sorted by file name.
/// Invalid UTF-8 is replaced rather than rejected. Returns `None` while the directory
/// holds no files yet.
pub fn read_payload(dir: &Path) -> Result<Option<String>> {
    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    if files.is_empty() {
        return Ok(None);
    }
    files.sort();
    let mut parts = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = std::fs::read(file)
            .with_context(|| format!("Failed to read request payload {}", file.display()))?;
        parts.push(String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(Some(parts.join("\n\n")))
}

/// What one scan did.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Session ids created from request directories.
    pub created: Vec<String>,
    /// Session ids whose worker was launched.
    pub launched: Vec<String>,
    /// Session ids whose launch failed (now `failed`).
    pub failed: Vec<String>,
}

/// Spawn request scanner. The guard sets live for the process lifetime; after a restart
/// the persisted supervision marker keeps supervised sessions from being launched twice.
#[derive(Debug, Default)]
pub struct Scanner {
    handled: HashSet<String>,
    reported: HashSet<String>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tick(&mut self, ws: &Workspace, state: &mut OrchestratorState) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let sessions: HashMap<String, Session> = ws
            .store
            .list()?
            .into_iter()
            .filter(|s| s.archived_as.is_none())
            .map(|s| (s.session.id.clone(), s.session))
            .collect();

        for dir in discover_dirs(ws.store.root())? {
            if self.handled.contains(&dir) {
                continue;
            }
            match classify(&dir, &sessions) {
                Entry::Request { persona, name } => {
                    match self.accept_request(ws, &dir, persona, &name, state).await {
                        Ok(Some((id, launched))) => {
                            report.created.push(id.clone());
                            if launched {
                                report.launched.push(id);
                            } else {
                                report.failed.push(id);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(request = %dir, error = %e, "Failed to process spawn request");
                        }
                    }
                }
                Entry::Pending(id) => {
                    self.handled.insert(dir.clone());
                    let Some(mut session) = sessions.get(&id).cloned() else {
                        continue;
                    };
                    match spawn::launch(ws, &mut session, state).await {
                        Ok(true) => report.launched.push(id),
                        Ok(false) => report.failed.push(id),
                        Err(e) => {
                            // Retried next tick.
                            self.handled.remove(&dir);
                            tracing::warn!(session = %id, error = %e, "Failed to launch pending session");
                        }
                    }
                }
                Entry::Known => {}
                Entry::Unknown => {
                    // A session directory whose record has not landed yet is reclassified next tick.
                    let mid_create = ws.store.root().join(&dir).join(SESSION_FILE).exists();
                    if !mid_create && self.reported.insert(dir.clone()) {
                        tracing::warn!(dir = %dir, "Ignoring unrecognized directory");
                    }
                }
            }
        }
        Ok(report)
    }

    /// Create a session from a request directory, deliver its payload, remove the request,
    /// and launch the worker. Returns `None` when the request has no payload yet.
    async fn accept_request(
        &mut self,
        ws: &Workspace,
        dir_name: &str,
        persona: Persona,
        request_name: &str,
        state: &mut OrchestratorState,
    ) -> Result<Option<(String, bool)>> {
        let request_dir = ws.store.root().join(dir_name);
        let Some(payload) = read_payload(&request_dir)? else {
            tracing::debug!(request = %dir_name, "Request has no payload yet");
            return Ok(None);
        };
        self.handled.insert(dir_name.to_string());

        let taken = ws.store.existing_names()?;
        let (display_name, id) = names::pick(persona, &taken);
        let mut session = ws
            .store
            .create_session(persona, &display_name, &id, &state.group_id)?;
        if let Err(e) = ws.store.append_instruction(&id, "request", &payload) {
            // The request directory stays so its payload is not lost.
            tracing::warn!(request = %dir_name, session = %id, error = %e, "Failed to deliver request payload");
            if session.advance(SessionStatus::Failed) {
                ws.store.save(&session)?;
            }
            return Ok(Some((id, false)));
        }
        if let Err(e) = std::fs::remove_dir_all(&request_dir) {
            tracing::warn!(request = %dir_name, error = %e, "Failed to remove request directory");
        }
        tracing::info!(request = %request_name, session = %id, persona = %persona, "Accepted spawn request");

        let launched = match spawn::launch(ws, &mut session, state).await {
            Ok(launched) => launched,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "Failed to launch requested session");
                false
            }
        };
        Ok(Some((id, launched)))
    }
}
