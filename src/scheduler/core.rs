//! Scheduler implementation

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::{Result, eyre};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{EventBus, SyncEvent};
use crate::fetch::Fetcher;

use super::config::{TaskConfig, TaskConfigUpdate};
use super::task::{FireEntry, TaskStatus, compute_delay};

/// One registered task and its retry/backoff state
struct TaskEntry {
    name: String,
    fetcher: Arc<dyn Fetcher>,
    config: TaskConfig,
    retry_count: u32,
    is_running: bool,
    paused: bool,
    /// Bumped to invalidate queued fires (pause, removal, reconfiguration)
    generation: u64,
    last_run: Option<chrono::DateTime<Utc>>,
    next_run: Option<chrono::DateTime<Utc>>,
}

impl TaskEntry {
    fn status(&self, id: &str) -> TaskStatus {
        TaskStatus {
            id: id.to_string(),
            name: self.name.clone(),
            config: self.config.clone(),
            retry_count: self.retry_count,
            is_running: self.is_running,
            paused: self.paused,
            last_run: self.last_run,
            next_run: self.next_run,
        }
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    pub total_executions: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_disabled: u64,
}

/// Internal state protected by mutex
struct SchedulerInner {
    /// Task registry keyed by unique id
    tasks: HashMap<String, TaskEntry>,

    /// Min-heap of pending fires serviced by the driver loop
    queue: BinaryHeap<Reverse<FireEntry>>,

    /// start()/stop() switch; the driver exits when this clears
    active: bool,

    /// pause_all()/resume_all() switch
    paused: bool,

    /// Statistics
    stats: SchedulerStats,
}

impl SchedulerInner {
    /// Queue a fire for `id` after `delay`, stamped with the current generation
    fn schedule_fire(&mut self, id: &str, delay: Duration) {
        let Some(entry) = self.tasks.get_mut(id) else {
            return;
        };
        self.queue.push(Reverse(FireEntry {
            at: Instant::now() + delay,
            task_id: id.to_string(),
            generation: entry.generation,
        }));
        entry.next_run = Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        debug!(task_id = %id, delay_ms = delay.as_millis() as u64, "SchedulerInner::schedule_fire: queued");
    }
}

/// The TaskScheduler manages named periodic fetch tasks with priority-biased
/// delays, exponential retry backoff, and per-task failure isolation.
///
/// One registry per instance; construct at the application root and share by
/// reference. All state mutation goes through these public operations.
pub struct TaskScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
    notify: Arc<Notify>,
    events: EventBus,
}

impl TaskScheduler {
    /// Create a new scheduler emitting lifecycle events on `events`
    pub fn new(events: EventBus) -> Self {
        debug!("TaskScheduler::new: called");
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                tasks: HashMap::new(),
                queue: BinaryHeap::new(),
                active: false,
                paused: false,
                stats: SchedulerStats::default(),
            })),
            notify: Arc::new(Notify::new()),
            events,
        }
    }

    /// Register a task; rejects duplicate ids
    ///
    /// If the scheduler is running, the first fire is queued at the task's
    /// computed delay from now.
    pub async fn add_task(
        &self,
        id: &str,
        name: &str,
        fetcher: Arc<dyn Fetcher>,
        config: TaskConfig,
    ) -> Result<()> {
        debug!(task_id = %id, %name, ?config, "TaskScheduler::add_task: called");
        config.validate()?;

        let mut inner = self.inner.lock().await;
        if inner.tasks.contains_key(id) {
            debug!(task_id = %id, "TaskScheduler::add_task: duplicate id, rejecting");
            return Err(eyre!("Task id already registered: {}", id));
        }

        let schedulable = config.enabled;
        inner.tasks.insert(
            id.to_string(),
            TaskEntry {
                name: name.to_string(),
                fetcher,
                config,
                retry_count: 0,
                is_running: false,
                paused: false,
                generation: 0,
                last_run: None,
                next_run: None,
            },
        );

        if inner.active && !inner.paused && schedulable {
            let delay = compute_delay(&inner.tasks[id].config, 0);
            inner.schedule_fire(id, delay);
            self.notify.notify_one();
        }

        Ok(())
    }

    /// Remove a task from the registry
    ///
    /// A queued fire becomes stale and is discarded; an in-flight execution
    /// completes but its outcome is dropped.
    pub async fn remove_task(&self, id: &str) -> Result<()> {
        debug!(task_id = %id, "TaskScheduler::remove_task: called");
        let mut inner = self.inner.lock().await;
        if inner.tasks.remove(id).is_none() {
            return Err(eyre!("Unknown task id: {}", id));
        }
        Ok(())
    }

    /// Apply a partial configuration update to a task
    ///
    /// Any pending fire is invalidated and rescheduled under the new
    /// configuration. Re-enabling a disabled task resets its retry count -
    /// this is the "externally reconfigured" escape hatch for exhausted tasks.
    pub async fn update_task_config(&self, id: &str, update: TaskConfigUpdate) -> Result<()> {
        debug!(task_id = %id, ?update, "TaskScheduler::update_task_config: called");
        let mut inner = self.inner.lock().await;
        let entry = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| eyre!("Unknown task id: {}", id))?;

        let updated = update.apply(&entry.config);
        updated.validate()?;

        let re_enabled = updated.enabled && !entry.config.enabled;
        entry.config = updated;
        entry.generation += 1;
        entry.next_run = None;
        if re_enabled {
            entry.retry_count = 0;
        }

        let schedulable = entry.config.enabled && !entry.paused && !entry.is_running;
        let delay = compute_delay(&entry.config, entry.retry_count);
        if inner.active && !inner.paused && schedulable {
            inner.schedule_fire(id, delay);
            self.notify.notify_one();
        }

        Ok(())
    }

    /// Start the driver loop and queue all enabled tasks from now
    ///
    /// Idempotent while running.
    pub async fn start(&self) {
        debug!("TaskScheduler::start: called");
        let mut inner = self.inner.lock().await;
        if inner.active {
            debug!("TaskScheduler::start: already active");
            return;
        }
        inner.active = true;

        let due: Vec<(String, Duration)> = inner
            .tasks
            .iter()
            .filter(|(_, e)| e.config.enabled && !e.paused && !e.is_running)
            .map(|(id, e)| (id.clone(), compute_delay(&e.config, e.retry_count)))
            .collect();
        for (id, delay) in due {
            inner.schedule_fire(&id, delay);
        }
        drop(inner);

        tokio::spawn(driver_loop(
            Arc::clone(&self.inner),
            Arc::clone(&self.notify),
            self.events.clone(),
        ));
        self.notify.notify_one();
        info!("TaskScheduler started");
    }

    /// Stop the driver loop, cancelling pending fires but preserving the
    /// registry; a later start() resumes enabled tasks
    pub async fn stop(&self) {
        debug!("TaskScheduler::stop: called");
        let mut inner = self.inner.lock().await;
        if !inner.active {
            return;
        }
        inner.active = false;
        inner.queue.clear();
        for entry in inner.tasks.values_mut() {
            entry.next_run = None;
        }
        drop(inner);

        self.notify.notify_one();
        info!("TaskScheduler stopped");
    }

    /// Cancel every pending fire without touching retry or enabled state
    pub async fn pause_all(&self) {
        debug!("TaskScheduler::pause_all: called");
        let mut inner = self.inner.lock().await;
        inner.paused = true;
        inner.queue.clear();
        for entry in inner.tasks.values_mut() {
            entry.generation += 1;
            entry.next_run = None;
        }
        drop(inner);
        self.notify.notify_one();
        info!("TaskScheduler paused");
    }

    /// Reschedule every enabled, non-running task from now at its currently
    /// computed delay
    pub async fn resume_all(&self) {
        debug!("TaskScheduler::resume_all: called");
        let mut inner = self.inner.lock().await;
        inner.paused = false;
        if inner.active {
            let due: Vec<(String, Duration)> = inner
                .tasks
                .iter()
                .filter(|(_, e)| e.config.enabled && !e.paused && !e.is_running)
                .map(|(id, e)| (id.clone(), compute_delay(&e.config, e.retry_count)))
                .collect();
            for (id, delay) in due {
                inner.schedule_fire(&id, delay);
            }
        }
        drop(inner);
        self.notify.notify_one();
        info!("TaskScheduler resumed");
    }

    /// Pause a single task, cancelling its pending fire
    pub async fn pause_task(&self, id: &str) -> Result<()> {
        debug!(task_id = %id, "TaskScheduler::pause_task: called");
        let mut inner = self.inner.lock().await;
        let entry = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| eyre!("Unknown task id: {}", id))?;
        entry.paused = true;
        entry.generation += 1;
        entry.next_run = None;
        Ok(())
    }

    /// Resume a single task, rescheduling it from now
    pub async fn resume_task(&self, id: &str) -> Result<()> {
        debug!(task_id = %id, "TaskScheduler::resume_task: called");
        let mut inner = self.inner.lock().await;
        let entry = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| eyre!("Unknown task id: {}", id))?;
        entry.paused = false;

        let schedulable = entry.config.enabled && !entry.is_running;
        let delay = compute_delay(&entry.config, entry.retry_count);
        if inner.active && !inner.paused && schedulable {
            inner.schedule_fire(id, delay);
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Execute one task immediately and return that execution's result
    ///
    /// Runs outside the normal cadence: the pending fire is invalidated and
    /// the usual success/failure transitions (retry reset, backoff,
    /// disabling) apply afterwards. Rejects tasks that are disabled or
    /// already running.
    pub async fn run_task_now(&self, id: &str) -> Result<Value> {
        debug!(task_id = %id, "TaskScheduler::run_task_now: called");
        let fetcher = {
            let mut inner = self.inner.lock().await;
            let entry = inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| eyre!("Unknown task id: {}", id))?;
            if entry.is_running {
                return Err(eyre!("Task already running: {}", id));
            }
            if !entry.config.enabled {
                return Err(eyre!("Task is disabled: {}", id));
            }
            entry.is_running = true;
            entry.generation += 1;
            entry.next_run = None;
            inner.stats.total_executions += 1;
            Arc::clone(&inner.tasks[id].fetcher)
        };

        self.events.emit(SyncEvent::TaskStarted { task_id: id.to_string() });
        let result = fetcher.fetch().await;

        let outcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
        finish_execution(&self.inner, &self.notify, &self.events, id, outcome).await;
        result
    }

    /// Get a point-in-time view of one task
    pub async fn task_status(&self, id: &str) -> Option<TaskStatus> {
        let inner = self.inner.lock().await;
        inner.tasks.get(id).map(|e| e.status(id))
    }

    /// Get a point-in-time view of the whole registry
    pub async fn all_tasks(&self) -> Vec<TaskStatus> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<TaskStatus> = inner.tasks.iter().map(|(id, e)| e.status(id)).collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        let inner = self.inner.lock().await;
        inner.stats.clone()
    }
}

/// Single driver loop servicing the fire queue on a monotonic clock
///
/// Sleeps until the earliest pending fire; `notify` wakes it whenever the
/// queue head may have changed. Exits when the scheduler deactivates.
async fn driver_loop(inner: Arc<Mutex<SchedulerInner>>, notify: Arc<Notify>, events: EventBus) {
    debug!("TaskScheduler: driver loop started");
    loop {
        let next_at = {
            let mut guard = inner.lock().await;
            if !guard.active {
                break;
            }
            let now = Instant::now();
            while let Some(Reverse(head)) = guard.queue.peek() {
                if head.at > now {
                    break;
                }
                let Some(Reverse(fire)) = guard.queue.pop() else {
                    break;
                };
                fire_task(&mut guard, fire, &inner, &notify, &events);
            }
            guard.queue.peek().map(|Reverse(e)| e.at)
        };

        match next_at {
            Some(at) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep_until(at) => {}
                }
            }
            None => notify.notified().await,
        }
    }
    debug!("TaskScheduler: driver loop stopped");
}

/// Validate a popped fire and spawn its execution
fn fire_task(
    guard: &mut SchedulerInner,
    fire: FireEntry,
    inner: &Arc<Mutex<SchedulerInner>>,
    notify: &Arc<Notify>,
    events: &EventBus,
) {
    let paused_all = guard.paused;
    let Some(entry) = guard.tasks.get_mut(&fire.task_id) else {
        debug!(task_id = %fire.task_id, "fire_task: task removed, discarding");
        return;
    };
    if fire.generation != entry.generation {
        debug!(task_id = %fire.task_id, "fire_task: stale generation, discarding");
        return;
    }
    if paused_all || entry.paused || !entry.config.enabled {
        debug!(task_id = %fire.task_id, "fire_task: paused or disabled, discarding");
        return;
    }
    if entry.is_running {
        // Re-entrancy guard: the in-flight execution reschedules on completion
        debug!(task_id = %fire.task_id, "fire_task: already running, skipping");
        entry.next_run = None;
        return;
    }

    entry.is_running = true;
    entry.next_run = None;
    let fetcher = Arc::clone(&entry.fetcher);
    guard.stats.total_executions += 1;

    let task_id = fire.task_id;
    let inner = Arc::clone(inner);
    let notify = Arc::clone(notify);
    let events = events.clone();
    tokio::spawn(async move {
        events.emit(SyncEvent::TaskStarted { task_id: task_id.clone() });
        let outcome = fetcher.fetch().await.map(|_| ()).map_err(|e| e.to_string());
        finish_execution(&inner, &notify, &events, &task_id, outcome).await;
    });
}

/// Apply post-execution transitions: retry reset or backoff, disabling on
/// exhaustion, and rescheduling when the task remains eligible
async fn finish_execution(
    inner: &Arc<Mutex<SchedulerInner>>,
    notify: &Arc<Notify>,
    events: &EventBus,
    task_id: &str,
    outcome: Result<(), String>,
) {
    let mut guard = inner.lock().await;
    let Some(entry) = guard.tasks.get_mut(task_id) else {
        debug!(task_id = %task_id, "finish_execution: task removed mid-flight, discarding outcome");
        return;
    };
    entry.is_running = false;
    entry.last_run = Some(Utc::now());

    match outcome {
        Ok(()) => {
            entry.retry_count = 0;
            let eligible = entry.config.enabled && !entry.paused;
            let delay = compute_delay(&entry.config, 0);

            guard.stats.total_succeeded += 1;
            events.emit(SyncEvent::TaskSucceeded {
                task_id: task_id.to_string(),
            });

            if guard.active && !guard.paused && eligible {
                guard.schedule_fire(task_id, delay);
                notify.notify_one();
            }
        }
        Err(error) => {
            entry.retry_count += 1;
            let retry_count = entry.retry_count;
            let exhausted = retry_count >= entry.config.max_retries;
            if exhausted {
                entry.config.enabled = false;
                entry.next_run = None;
            }
            let task_paused = entry.paused;
            let delay = compute_delay(&entry.config, retry_count);

            guard.stats.total_failed += 1;
            warn!(task_id = %task_id, retry_count, %error, "Task execution failed");
            events.emit(SyncEvent::TaskFailed {
                task_id: task_id.to_string(),
                retry_count,
                error,
            });

            if exhausted {
                guard.stats.total_disabled += 1;
                warn!(task_id = %task_id, retry_count, "Task exhausted retries, disabling");
                events.emit(SyncEvent::TaskDisabled {
                    task_id: task_id.to_string(),
                });
            } else if guard.active && !guard.paused && !task_paused {
                guard.schedule_fire(task_id, delay);
                notify.notify_one();
            }
        }
    }
}
