// ABOUTME: Messaging policy layered over the inbox primitive.
// ABOUTME: Open lets anyone address anyone; Hierarchical limits senders to neighbouring ranks.

use crate::persona::Persona;
use serde::{Deserialize, Serialize};

/// Senders that are not sessions and are always allowed to deliver.
pub const SYSTEM_SENDERS: &[&str] = &["user", "orchestrator", "request"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingPolicy {
    #[default]
    Open,
    Hierarchical,
}

impl MessagingPolicy {
    /// Whether a session playing `from` may write to the inbox of one playing `to`.
    pub fn allows(&self, from: Persona, to: Persona) -> bool {
        match self {
            MessagingPolicy::Open => true,
            MessagingPolicy::Hierarchical => {
                from == Persona::Manager || from.rank().abs_diff(to.rank()) <= 1
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            MessagingPolicy::Open => {
                "You may write to any session's inbox; there is no hierarchy restriction."
            }
            MessagingPolicy::Hierarchical => {
                "You may only write to sessions one level above or below you in the hierarchy \
                 (manager, architect, engineer, QA, intern). The manager may address anyone."
            }
        }
    }
}
