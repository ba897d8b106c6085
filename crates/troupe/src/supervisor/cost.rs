// ABOUTME: Cost monitor that accumulates token usage for running sessions.
// ABOUTME: Prefers the worker's structured usage.json, else scrapes the pane's telemetry text.

use super::Workspace;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use troupe_core::usage::parse_telemetry;
use troupe_core::{PriceTable, Session, Usage};

/// Where a usage update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSource {
    Report,
    Scraped,
}

pub struct CostMonitor {
    ws: Workspace,
    prices: PriceTable,
}

impl CostMonitor {
    pub fn new(ws: Workspace) -> Self {
        let prices = ws.config.price_table();
        Self { ws, prices }
    }

    /// Sample every running session once. Returns the sessions whose usage changed.
    pub async fn tick(&self) -> Result<Vec<(String, UsageSource)>> {
        let mut updated = Vec::new();
        for stored in self.ws.store.list()? {
            if stored.archived_as.is_some() || !stored.session.status.is_active() {
                continue;
            }
            match self.sample(&stored.session).await {
                Ok(Some(source)) => updated.push((stored.session.id.clone(), source)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(session = %stored.session.id, error = %e, "Usage sample skipped");
                }
            }
        }
        Ok(updated)
    }

    async fn sample(&self, session: &Session) -> Result<Option<UsageSource>> {
        let Some(terminal) = &session.terminal else {
            return Ok(None);
        };
        if !self.ws.mux.has_session(&terminal.name).await? {
            return Ok(None);
        }
        let mut usage: Usage = self.ws.store.read_usage(&session.id)?;

        match self.ws.store.read_usage_report(&session.id) {
            Ok(Some(report)) => {
                if usage.absorb_report(&report, &self.prices) {
                    self.ws.store.write_usage(&session.id, &usage)?;
                    return Ok(Some(UsageSource::Report));
                }
                return Ok(None);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(session = %session.id, error = %e, "Ignoring unreadable usage report");
            }
        }

        let screen = self
            .ws
            .mux
            .capture_pane(&terminal.name, self.ws.config.capture_lines)
            .await?;
        let Some((sample, fingerprint)) = parse_telemetry(&screen) else {
            return Ok(None);
        };
        if usage.last_fingerprint.as_deref() == Some(fingerprint.as_str()) {
            return Ok(None);
        }
        usage.add(&sample, &self.prices);
        usage.last_fingerprint = Some(fingerprint);
        self.ws.store.write_usage(&session.id, &usage)?;
        tracing::debug!(
            session = %session.id,
            input = usage.input_tokens,
            output = usage.output_tokens,
            cost = usage.estimated_cost_usd,
            "Updated usage"
        );
        Ok(Some(UsageSource::Scraped))
    }

    /// Sample on a fixed period until `shutdown` flips to true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "Cost monitor tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
