// ABOUTME: Configuration for the troupe orchestrator and its workers.
// ABOUTME: Loaded from TOML (workspace-local first, then ~/.config/troupe) with sensible defaults.

use crate::persona::Persona;
use crate::policy::MessagingPolicy;
use crate::usage::{ModelPrice, PriceTable};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory (inside the workspace root) holding orchestrator-owned files.
pub const STATE_DIR: &str = ".troupe";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for terminal session names (e.g. "troupe" -> "troupe-architect-ada")
    pub prefix: String,

    /// Terminal multiplexer binary
    pub tmux_binary: String,

    /// Agent binary launched once per session
    pub agent_binary: String,

    /// Arguments placed before the rendered instruction document
    pub agent_args: Vec<String>,

    /// Control loop cadence
    pub loop_interval_secs: u64,

    /// Dashboard reloads the store every N ticks of its 250ms timer
    pub dashboard_refresh_ticks: u64,

    /// Cost monitor cadence
    pub cost_interval_secs: u64,

    /// Scrollback lines captured per cost sample
    pub capture_lines: u32,

    /// Companion watcher cadence inside each worker terminal
    pub watch_interval_secs: u64,

    /// A live worker with no file activity for this long is shown as idle (0 disables)
    pub idle_after_secs: u64,

    pub messaging_policy: MessagingPolicy,

    /// Per-model price overrides, USD per million tokens
    pub pricing: BTreeMap<String, ModelPrice>,

    /// Personas registered by `troupe start` when no team is given
    pub default_team: Vec<Persona>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: "troupe".to_string(),
            tmux_binary: "tmux".to_string(),
            agent_binary: "claude".to_string(),
            agent_args: vec![
                "--print".to_string(),
                "--verbose".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            loop_interval_secs: 5,
            dashboard_refresh_ticks: 8,
            cost_interval_secs: 60,
            capture_lines: 200,
            watch_interval_secs: 5,
            idle_after_secs: 600,
            messaging_policy: MessagingPolicy::Open,
            pricing: BTreeMap::new(),
            default_team: vec![Persona::Manager],
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/troupe/config.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("troupe")
            .join("config.toml")
    }

    /// Workspace-local config path (<root>/.troupe/config.toml)
    pub fn workspace_path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join("config.toml")
    }

    /// Resolve config for a workspace: workspace-local file, then the default path,
    /// then built-in defaults. A file that exists but fails to parse is an error.
    pub fn for_workspace(root: &Path) -> Result<Self> {
        for candidate in [Self::workspace_path(root), Self::default_path()] {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }
        Ok(Self::default())
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs.max(1))
    }

    pub fn cost_interval(&self) -> Duration {
        Duration::from_secs(self.cost_interval_secs.max(1))
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs.max(1))
    }

    pub fn idle_after(&self) -> Option<Duration> {
        (self.idle_after_secs > 0).then(|| Duration::from_secs(self.idle_after_secs))
    }

    pub fn price_table(&self) -> PriceTable {
        PriceTable::default().with_overrides(&self.pricing)
    }

    /// Terminal session name for a session id.
    pub fn terminal_name(&self, session_id: &str) -> String {
        format!("{}-{}", self.prefix, session_id)
    }

    /// Terminal session name for the orchestrator itself.
    pub fn orchestrator_terminal_name(&self) -> String {
        format!("{}-orchestrator", self.prefix)
    }
}

/// Expand `~` in a user-supplied workspace path.
pub fn expand_path(raw: &str) -> PathBuf {
    shellexpand::tilde(raw).into_owned().into()
}
