// ABOUTME: Terminal multiplexer boundary used to host worker sessions.
// ABOUTME: Tmux drives the real binary through tokio::process; FakeMux keeps panes in memory.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum MuxError {
    /// The multiplexer binary could not be started at all.
    #[error("failed to run {binary}: {source}")]
    Unavailable {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The multiplexer ran but reported a failure.
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },
}

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Create a detached session named `name` running `command` in `cwd`.
    async fn create_session(&self, name: &str, cwd: &Path, command: &str) -> Result<(), MuxError>;

    async fn has_session(&self, name: &str) -> Result<bool, MuxError>;

    /// Last `lines` lines of the session's active pane.
    async fn capture_pane(&self, name: &str, lines: u32) -> Result<String, MuxError>;

    /// Kill a session. Killing a session that no longer exists succeeds.
    async fn kill_session(&self, name: &str) -> Result<(), MuxError>;

    /// Process id of the program running in the session's pane, when available.
    async fn pane_pid(&self, name: &str) -> Result<Option<u32>, MuxError>;

    /// Command that attaches the controlling terminal to `name`.
    fn attach_command(&self, name: &str) -> std::process::Command;
}

#[derive(Debug, Clone)]
pub struct Tmux {
    binary: String,
}

impl Tmux {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, MuxError> {
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|source| MuxError::Unavailable {
                binary: self.binary.clone(),
                source,
            })
    }

    async fn run_checked(&self, args: &[&str]) -> Result<String, MuxError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(MuxError::Command {
                command: format!("{} {}", self.binary, args.first().copied().unwrap_or_default()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for Tmux {
    fn default() -> Self {
        Self::new("tmux")
    }
}

/// Exact-match target, so `troupe-intern-bo` never resolves to `troupe-intern-bob`.
fn target(name: &str) -> String {
    format!("={name}")
}

#[async_trait]
impl Multiplexer for Tmux {
    async fn create_session(&self, name: &str, cwd: &Path, command: &str) -> Result<(), MuxError> {
        let cwd = cwd.to_string_lossy();
        self.run_checked(&["new-session", "-d", "-s", name, "-c", &cwd, command])
            .await?;
        tracing::debug!(session = %name, "Created tmux session");
        Ok(())
    }

    async fn has_session(&self, name: &str) -> Result<bool, MuxError> {
        // Exit status 1 covers both "no such session" and "no server running".
        let output = self.run(&["has-session", "-t", &target(name)]).await?;
        Ok(output.status.success())
    }

    async fn capture_pane(&self, name: &str, lines: u32) -> Result<String, MuxError> {
        let start = format!("-{lines}");
        // Pane targets do not accept the `=` prefix on older tmux releases.
        let pane = format!("{name}:");
        self.run_checked(&["capture-pane", "-p", "-J", "-t", &pane, "-S", &start])
            .await
    }

    async fn kill_session(&self, name: &str) -> Result<(), MuxError> {
        if !self.has_session(name).await? {
            return Ok(());
        }
        match self.run_checked(&["kill-session", "-t", &target(name)]).await {
            Ok(_) => Ok(()),
            // Lost a race with the session exiting on its own.
            Err(MuxError::Command { .. }) if !self.has_session(name).await? => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn pane_pid(&self, name: &str) -> Result<Option<u32>, MuxError> {
        let out = self
            .run_checked(&["display-message", "-p", "-t", &target(name), "#{pane_pid}"])
            .await?;
        Ok(out.trim().parse().ok())
    }

    fn attach_command(&self, name: &str) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.binary);
        cmd.args(["attach-session", "-t", &target(name)]);
        cmd
    }
}

pub use fake::FakeMux;

mod fake {
    use super::{MuxError, Multiplexer};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    pub struct FakePane {
        pub cwd: PathBuf,
        pub command: String,
        pub screen: String,
    }

    /// In-memory multiplexer for tests. Sessions live until `end_session` or `kill_session`.
    #[derive(Debug, Default)]
    pub struct FakeMux {
        panes: Mutex<HashMap<String, FakePane>>,
        killed: Mutex<Vec<String>>,
        fail_create: AtomicBool,
        fail_probe: AtomicBool,
    }

    impl FakeMux {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent `create_session` fail.
        pub fn fail_creates(&self, fail: bool) {
            self.fail_create.store(fail, Ordering::SeqCst);
        }

        /// Make every subsequent `has_session` fail.
        pub fn fail_probes(&self, fail: bool) {
            self.fail_probe.store(fail, Ordering::SeqCst);
        }

        /// Insert a live session directly.
        pub fn insert(&self, name: &str) {
            self.lock().insert(name.to_string(), FakePane::default());
        }

        pub fn set_screen(&self, name: &str, screen: &str) {
            if let Some(pane) = self.lock().get_mut(name) {
                pane.screen = screen.to_string();
            }
        }

        /// Simulate the program in the session exiting.
        pub fn end_session(&self, name: &str) {
            self.lock().remove(name);
        }

        pub fn pane(&self, name: &str) -> Option<FakePane> {
            self.lock().get(name).cloned()
        }

        pub fn session_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.lock().keys().cloned().collect();
            names.sort();
            names
        }

        pub fn killed(&self) -> Vec<String> {
            self.killed.lock().map(|k| k.clone()).unwrap_or_default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FakePane>> {
            self.panes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    #[async_trait]
    impl Multiplexer for FakeMux {
        async fn create_session(
            &self,
            name: &str,
            cwd: &Path,
            command: &str,
        ) -> Result<(), MuxError> {
            let mut panes = self.lock();
            if self.fail_create.load(Ordering::SeqCst) || panes.contains_key(name) {
                return Err(MuxError::Command {
                    command: "new-session".to_string(),
                    stderr: format!("duplicate session: {name}"),
                });
            }
            panes.insert(
                name.to_string(),
                FakePane {
                    cwd: cwd.to_path_buf(),
                    command: command.to_string(),
                    screen: String::new(),
                },
            );
            Ok(())
        }

        async fn has_session(&self, name: &str) -> Result<bool, MuxError> {
            if self.fail_probe.load(Ordering::SeqCst) {
                return Err(MuxError::Command {
                    command: "has-session".to_string(),
                    stderr: "server exited unexpectedly".to_string(),
                });
            }
            Ok(self.lock().contains_key(name))
        }

        async fn capture_pane(&self, name: &str, lines: u32) -> Result<String, MuxError> {
            let panes = self.lock();
            let pane = panes.get(name).ok_or_else(|| MuxError::Command {
                command: "capture-pane".to_string(),
                stderr: format!("can't find session: {name}"),
            })?;
            let all: Vec<&str> = pane.screen.lines().collect();
            let start = all.len().saturating_sub(lines as usize);
            Ok(all[start..].join("\n"))
        }

        async fn kill_session(&self, name: &str) -> Result<(), MuxError> {
            self.lock().remove(name);
            if let Ok(mut killed) = self.killed.lock() {
                killed.push(name.to_string());
            }
            Ok(())
        }

        async fn pane_pid(&self, name: &str) -> Result<Option<u32>, MuxError> {
            Ok(self.lock().contains_key(name).then_some(4242))
        }

        fn attach_command(&self, name: &str) -> std::process::Command {
            let mut cmd = std::process::Command::new("true");
            cmd.arg(name);
            cmd
        }
    }
}
