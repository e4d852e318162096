//! Error types for the sync engine.

/// Top-level error type for sync runs, scheduling and persistence.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The program to run could not be found on PATH.
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    /// Process creation failed after the executable was located.
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// The child process exited with a nonzero code. Death by signal is
    /// reported as the negated signal number.
    #[error("Rsync exited with code {0}")]
    NonZeroExit(i32),

    /// A named profile or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A scheduled task with this name is already registered.
    #[error("a task named '{0}' already exists")]
    DuplicateName(String),

    /// The name is not usable as a stored record name.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Settings failed validation before a run could start.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// An environment configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A sync run is already in flight.
    #[error("a sync run is already active")]
    RunActive,

    /// I/O error from persistence or process plumbing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;
