pub mod error;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod utils;

pub use error::{Result, SyncError};
pub use scheduler::{run_scheduler, ScheduledTask, Scheduler, TaskExecutor, TaskId};
pub use store::ProfileStore;
pub use sync::{
    build_command, EngineEvent, PathKind, RunEvent, RunHandle, SyncManager, SyncSettings,
};
pub use utils::config::{load_config, Config};
