use crate::error::{Result, SyncError};
use crate::store::ProfileStore;
use crate::sync::SyncSettings;
use async_trait::async_trait;
use chrono::{DateTime, Local, LocalResult, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Identifier for one scheduled task. Session-scoped: ids are regenerated
/// when the schedule is loaded from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl TaskId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4().as_u128() as u64)
    }
}

/// One schedule entry. Fires daily at `run_at`'s clock time until removed.
/// Only `name`, `run_at` and `settings` are persisted; `id` and `next_run`
/// are recomputed at load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(skip, default = "TaskId::new")]
    pub id: TaskId,
    pub name: String,
    pub run_at: DateTime<Local>,
    pub settings: SyncSettings,
    #[serde(skip)]
    pub next_run: Option<DateTime<Local>>,
}

/// Callback fired for each due task. Implementations start the run and
/// return once it is underway; they must not block for the run's duration.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> Result<()>;
}

/// The durable schedule: a task list mirrored to the store after every
/// mutation, with due-time bookkeeping for the tick loop.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    store: ProfileStore,
}

impl Scheduler {
    /// Load the persisted schedule and arm every entry. A corrupt or
    /// unreadable record degrades to an empty schedule.
    pub async fn load(store: ProfileStore) -> Self {
        let tasks = match store.load_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("Failed to load scheduled tasks, starting empty: {}", e);
                Vec::new()
            }
        };
        let mut scheduler = Self { tasks, store };
        scheduler.arm_all(Local::now());
        if !scheduler.tasks.is_empty() {
            info!("Loaded {} scheduled tasks", scheduler.tasks.len());
        }
        scheduler
    }

    /// Register a daily-recurring task. `run_at` is truncated to second
    /// precision; its clock time is the recurrence time. Names must be
    /// unique across the schedule.
    pub async fn schedule(
        &mut self,
        name: String,
        run_at: DateTime<Local>,
        settings: SyncSettings,
    ) -> Result<TaskId> {
        if self.tasks.iter().any(|task| task.name == name) {
            return Err(SyncError::DuplicateName(name));
        }
        let run_at = run_at.with_nanosecond(0).unwrap_or(run_at);
        let task = ScheduledTask {
            id: TaskId::new(),
            name,
            run_at,
            settings,
            next_run: Some(first_occurrence(run_at, Local::now())),
        };
        let id = task.id;
        info!(
            "Task '{}' scheduled for {}",
            task.name,
            run_at.format("%Y-%m-%d %H:%M:%S")
        );
        self.tasks.push(task);
        if let Err(e) = self.store.save_tasks(&self.tasks).await {
            self.tasks.pop();
            return Err(e);
        }
        Ok(id)
    }

    /// Remove a task by id. Returns whether anything was removed; removing
    /// an unknown id is a no-op.
    pub async fn remove(&mut self, id: TaskId) -> Result<bool> {
        let len = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        if self.tasks.len() == len {
            return Ok(false);
        }
        self.store.save_tasks(&self.tasks).await?;
        Ok(true)
    }

    /// All registered tasks in registration order.
    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Snapshots of every armed task due at `now`. Each is re-armed at its
    /// next daily occurrence, so a due instant fires exactly once.
    pub fn due_tasks(&mut self, now: DateTime<Local>) -> Vec<ScheduledTask> {
        let mut due = Vec::new();
        for task in self.tasks.iter_mut() {
            match task.next_run {
                Some(next) if next <= now => {
                    due.push(task.clone());
                    task.next_run = Some(next_daily_occurrence(now, task.run_at.time()));
                }
                _ => {}
            }
        }
        due
    }

    fn arm_all(&mut self, now: DateTime<Local>) {
        for task in self.tasks.iter_mut() {
            task.next_run = Some(first_occurrence(task.run_at, now));
        }
    }
}

/// Background loop: tick, collect due tasks under a short lock, dispatch
/// outside it. An executor rejection is logged and skipped; the task fires
/// again at its next daily occurrence.
pub async fn run_scheduler(
    scheduler: Arc<Mutex<Scheduler>>,
    executor: Arc<dyn TaskExecutor>,
    tick: Duration,
) {
    let tick = if tick.is_zero() {
        Duration::from_secs(1)
    } else {
        tick
    };
    info!("Scheduler started (tick every {:?})", tick);
    let mut interval = tokio::time::interval(tick);

    loop {
        interval.tick().await;

        let due = {
            let mut scheduler = scheduler.lock().await;
            scheduler.due_tasks(Local::now())
        };

        for task in due {
            info!("Task '{}' is due", task.name);
            if let Err(e) = executor.execute(&task).await {
                warn!("Task '{}' could not be started: {}", task.name, e);
            }
        }
    }
}

/// `run_at` itself while it is still ahead, otherwise the next occurrence
/// of its clock time.
fn first_occurrence(run_at: DateTime<Local>, now: DateTime<Local>) -> DateTime<Local> {
    if run_at > now {
        run_at
    } else {
        next_daily_occurrence(now, run_at.time())
    }
}

/// Earliest local datetime strictly after `after` whose clock time is `at`.
/// A time skipped by a DST gap rolls to the next day; an ambiguous one
/// resolves to the earlier instant.
fn next_daily_occurrence(after: DateTime<Local>, at: NaiveTime) -> DateTime<Local> {
    let mut date = after.date_naive();
    loop {
        let candidate = match Local.from_local_datetime(&date.and_time(at)) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => None,
        };
        if let Some(candidate) = candidate {
            if candidate > after {
                return candidate;
            }
        }
        date = date.succ_opt().expect("date out of range");
    }
}
