pub mod command;
pub mod manager;
pub mod runner;

pub use command::build_command;
pub use manager::{EngineEvent, SyncManager};
pub use runner::{rsync_version, RunControl, RunHandle};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a source or destination path points at. Single-file sources
/// change the flag set handed to rsync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    #[default]
    Directory,
    File,
}

/// One sync run's worth of settings. Immutable once built; edits in a
/// front-end produce a fresh value. Persisted as-is inside profiles and
/// scheduled tasks.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SyncSettings {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default)]
    pub source_kind: PathKind,
    #[serde(default)]
    pub dest_kind: PathKind,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub bandwidth_limit_kbps: u64,
}

/// Lifecycle events for one run, delivered in order on the run's channel.
/// Exactly one terminal event (`Failed` or `Completed`) is emitted per run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// One line of combined stdout/stderr output.
    OutputLine(String),
    /// Derived overall progress, clamped to 0..=100.
    Progress(u8),
    /// Terminal: the run failed, with a human-readable reason.
    Failed(String),
    /// Terminal: the process exited cleanly.
    Completed(bool),
}

impl RunEvent {
    /// True for the two terminal variants.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Failed(_) | RunEvent::Completed(_))
    }
}
