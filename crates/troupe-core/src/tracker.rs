// ABOUTME: Read cursor over a session's inbox and task log.
// ABOUTME: Offsets and sequence numbers only move forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    #[serde(default)]
    pub inbox_offset: u64,
    #[serde(default)]
    pub inbox_seq: u64,
    #[serde(default)]
    pub inbox_read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks_offset: u64,
    #[serde(default)]
    pub tasks_read_at: Option<DateTime<Utc>>,
}

impl Tracker {
    pub fn advance_inbox(&mut self, offset: u64, seq: u64) {
        self.inbox_offset = self.inbox_offset.max(offset);
        self.inbox_seq = self.inbox_seq.max(seq);
        self.inbox_read_at = Some(Utc::now());
    }

    pub fn advance_tasks(&mut self, offset: u64) {
        self.tasks_offset = self.tasks_offset.max(offset);
        self.tasks_read_at = Some(Utc::now());
    }
}
