use super::runner::{self, RunControl, RunHandle};
use super::{build_command, RunEvent, SyncSettings};
use crate::error::{Result, SyncError};
use crate::scheduler::{run_scheduler, ScheduledTask, Scheduler, TaskExecutor, TaskId};
use crate::store::ProfileStore;
use crate::utils::config::Config;
use crate::utils::log_buffer::{LogBuffer, LogEntry};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

/// Engine-level events for front-end subscription. Lossy (broadcast); the
/// per-run `RunEvent` stream is the authoritative record of a run.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RunStarted { task: Option<String> },
    Progress { task: Option<String>, percent: u8 },
    RunCompleted { task: Option<String> },
    RunFailed { task: Option<String>, message: String },
    TaskScheduled { name: String },
    TaskRemoved { name: String },
}

/// The caller-facing assembly: profiles, the schedule, the single active
/// run slot, the engine event broadcast and the run log. Cheap to clone;
/// clones share all state.
#[derive(Clone)]
pub struct SyncManager {
    config: Arc<Config>,
    store: ProfileStore,
    scheduler: Arc<Mutex<Scheduler>>,
    active: Arc<parking_lot::Mutex<Option<RunControl>>>,
    event_tx: broadcast::Sender<EngineEvent>,
    log_buffer: LogBuffer,
}

impl SyncManager {
    /// Build the engine: open the store under the configured data
    /// directory and load the persisted schedule.
    pub async fn new(config: Config) -> Self {
        let store = ProfileStore::new(config.data_dir.clone());
        let scheduler = Scheduler::load(store.clone()).await;
        let (event_tx, _) = broadcast::channel(128);

        Self {
            log_buffer: LogBuffer::new(config.log_capacity),
            config: Arc::new(config),
            store,
            scheduler: Arc::new(Mutex::new(scheduler)),
            active: Arc::new(parking_lot::Mutex::new(None)),
            event_tx,
        }
    }

    /// Spawn the background tick loop wired to this manager. Runs until
    /// aborted or the process exits.
    pub fn spawn_scheduler_loop(&self) -> tokio::task::JoinHandle<()> {
        let tick = Duration::from_secs(self.config.tick_interval_secs);
        tokio::spawn(run_scheduler(
            self.scheduler.clone(),
            Arc::new(self.clone()),
            tick,
        ))
    }

    /// Validate settings and start a sync run, handing the run's event
    /// stream to the caller. At most one run may be in flight; a second
    /// start is rejected with `RunActive`.
    pub async fn start_sync(&self, settings: &SyncSettings) -> Result<RunHandle> {
        self.start_named(settings, None).await
    }

    /// Cancel the active run, if any. Returns whether a cancellation was
    /// delivered to a live run.
    pub fn cancel_sync(&self) -> bool {
        let active = self.active.lock();
        match active.as_ref() {
            Some(control) if !control.is_finished() => {
                control.cancel();
                info!("Sync run cancelled");
                true
            }
            _ => false,
        }
    }

    /// True while a run is in flight.
    pub fn is_run_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|control| !control.is_finished())
    }

    pub async fn save_profile(&self, name: &str, settings: &SyncSettings) -> Result<()> {
        self.store.save(name, settings).await
    }

    pub async fn load_profile(&self, name: &str) -> Result<SyncSettings> {
        self.store.load(name).await
    }

    pub async fn delete_profile(&self, name: &str) -> Result<()> {
        self.store.delete(name).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<String>> {
        self.store.list().await
    }

    /// Load a stored profile and start it immediately.
    pub async fn run_profile(&self, name: &str) -> Result<RunHandle> {
        let settings = self.store.load(name).await?;
        self.start_sync(&settings).await
    }

    /// Register a daily-recurring run of `settings` at `run_at`'s clock
    /// time. A missing name is derived from the run timestamp.
    pub async fn schedule_task(
        &self,
        name: Option<String>,
        run_at: DateTime<Local>,
        settings: SyncSettings,
    ) -> Result<TaskId> {
        let name = name.unwrap_or_else(|| format!("sync-{}", run_at.format("%Y%m%d-%H%M%S")));
        let id = {
            let mut scheduler = self.scheduler.lock().await;
            scheduler.schedule(name.clone(), run_at, settings).await?
        };
        self.log_buffer
            .add_log("info", format!("Scheduled task '{}'", name), Some(name.clone()));
        let _ = self.event_tx.send(EngineEvent::TaskScheduled { name });
        Ok(id)
    }

    /// Remove a scheduled task. Removing an unknown id is a no-op.
    pub async fn cancel_task(&self, id: TaskId) -> Result<bool> {
        let (removed, name) = {
            let mut scheduler = self.scheduler.lock().await;
            let name = scheduler
                .tasks()
                .iter()
                .find(|task| task.id == id)
                .map(|task| task.name.clone());
            (scheduler.remove(id).await?, name)
        };
        if removed {
            if let Some(name) = name {
                info!("Task '{}' removed", name);
                let _ = self.event_tx.send(EngineEvent::TaskRemoved { name });
            }
        }
        Ok(removed)
    }

    /// Ids and names of all scheduled tasks.
    pub async fn scheduled_tasks(&self) -> Vec<(TaskId, String)> {
        let scheduler = self.scheduler.lock().await;
        scheduler
            .tasks()
            .iter()
            .map(|task| (task.id, task.name.clone()))
            .collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn recent_logs(&self, limit: Option<usize>) -> Vec<LogEntry> {
        self.log_buffer.get_logs(limit)
    }

    async fn start_named(&self, settings: &SyncSettings, task: Option<String>) -> Result<RunHandle> {
        let args = build_command(settings)?;
        let source_ok = tokio::fs::try_exists(&settings.source).await.unwrap_or(false);
        if !source_ok {
            return Err(SyncError::InvalidSettings(format!(
                "source path does not exist: {}",
                settings.source.display()
            )));
        }
        self.start_run(&args, task)
    }

    /// Claim the active slot and spawn the run. The slot is only replaced
    /// once its previous occupant has finished.
    fn start_run(&self, args: &[String], task: Option<String>) -> Result<RunHandle> {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|control| !control.is_finished()) {
            return Err(SyncError::RunActive);
        }
        let handle = runner::start(args)?;
        *active = Some(handle.control());
        drop(active);

        info!("Sync run started");
        self.log_buffer
            .add_log("info", "Sync run started".to_string(), task.clone());
        let _ = self.event_tx.send(EngineEvent::RunStarted { task });
        Ok(handle)
    }

    /// Drain a run's events in the background, mirroring them into the run
    /// log and the engine broadcast. Used for timer-fired runs, where no
    /// caller holds the handle.
    fn drain_run(&self, handle: RunHandle, task: String) {
        let log_buffer = self.log_buffer.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let mut events = handle.into_stream();
            while let Some(event) = events.next().await {
                match event {
                    RunEvent::OutputLine(line) => {
                        debug!("[{}] {}", task, line);
                    }
                    RunEvent::Progress(percent) => {
                        let _ = event_tx.send(EngineEvent::Progress {
                            task: Some(task.clone()),
                            percent,
                        });
                    }
                    RunEvent::Failed(message) => {
                        error!("Scheduled sync '{}' failed: {}", task, message);
                        log_buffer.add_log(
                            "error",
                            format!("Sync failed: {}", message),
                            Some(task.clone()),
                        );
                        let _ = event_tx.send(EngineEvent::RunFailed {
                            task: Some(task.clone()),
                            message,
                        });
                    }
                    RunEvent::Completed(_) => {
                        let elapsed =
                            humantime::format_duration(Duration::from_secs(started.elapsed().as_secs()));
                        info!("Scheduled sync '{}' completed in {}", task, elapsed);
                        log_buffer.add_log(
                            "success",
                            format!("Sync completed in {}", elapsed),
                            Some(task.clone()),
                        );
                        let _ = event_tx.send(EngineEvent::RunCompleted {
                            task: Some(task.clone()),
                        });
                    }
                }
            }
        });
    }
}

#[async_trait]
impl TaskExecutor for SyncManager {
    async fn execute(&self, task: &ScheduledTask) -> Result<()> {
        info!("Starting scheduled sync '{}'", task.name);
        let handle = self
            .start_named(&task.settings, Some(task.name.clone()))
            .await?;
        self.drain_run(handle, task.name.clone());
        Ok(())
    }
}
