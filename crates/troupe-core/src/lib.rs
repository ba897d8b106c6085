// ABOUTME: Shared data model and file-backed session store for troupe.
// ABOUTME: Contains config parsing, session lifecycle, task logs, inboxes, and pricing.

pub mod config;
pub mod error;
pub mod inbox;
pub mod names;
pub mod orchestrator;
pub mod persona;
pub mod policy;
pub mod session;
pub mod store;
pub mod task;
pub mod tracker;
pub mod usage;

pub use config::Config;
pub use error::{Result, StoreError};
pub use inbox::InboxMessage;
pub use orchestrator::{OrchestratorState, OrchestratorStatus};
pub use persona::Persona;
pub use policy::MessagingPolicy;
pub use session::{Session, SessionStatus, TerminalHandle};
pub use store::{ArchiveOutcome, SessionStore, StoredSession};
pub use task::{Task, TaskLog, TaskStatus};
pub use tracker::Tracker;
pub use usage::{PriceTable, TeamUsage, Usage, UsageSample};
