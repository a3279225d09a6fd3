//! In-process background task scheduler.
//!
//! Stands in for the OS task manager on hosts that have none: each registered
//! task gets a tokio task that polls the location provider every
//! `min_interval` and fires the registry handler when the device moved at
//! least `min_distance_meters` since the last delivered fix.
//!
//! Unregistering signals the loop to stop ticking. A firing that is already
//! dispatching runs to completion.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{Error, Result};
use crate::models::GeoPoint;
use crate::platform::{LocationProvider, TaskPolicy, TaskScheduler};
use crate::tracking::TaskRegistry;

/// Whether a fix at `current` should be delivered given the last delivered point
pub fn moved_enough(last: Option<&GeoPoint>, current: &GeoPoint, min_distance_meters: f64) -> bool {
    match last {
        None => true,
        Some(last) => last.distance_meters(current) >= min_distance_meters,
    }
}

struct ScheduledTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ScheduledTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub struct IntervalScheduler {
    registry: Arc<TaskRegistry>,
    location: Arc<dyn LocationProvider>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
}

impl IntervalScheduler {
    pub fn new(registry: Arc<TaskRegistry>, location: Arc<dyn LocationProvider>) -> Self {
        Self {
            registry,
            location,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ScheduledTask>>> {
        self.tasks
            .lock()
            .map_err(|_| Error::Scheduler("task table poisoned".to_string()))
    }
}

#[async_trait]
impl TaskScheduler for IntervalScheduler {
    async fn register(&self, task: &str, policy: &TaskPolicy) -> Result<()> {
        if !self.registry.is_defined(task) {
            return Err(Error::Scheduler(format!(
                "task '{}' has no handler defined",
                task
            )));
        }
        if policy.min_interval.is_zero() {
            return Err(Error::Scheduler("task interval must be positive".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Scheduler(format!("no async runtime: {}", e)))?;

        let mut tasks = self.tasks()?;
        if let Some(existing) = tasks.get(task) {
            if existing.is_running() {
                return Ok(());
            }
        }

        let registry = self.registry.clone();
        let location = self.location.clone();
        let policy = policy.clone();
        let name = task.to_string();
        let (shutdown, mut stop_rx) = watch::channel(false);

        info!("[Scheduler] {}: {}", policy.notice.title, policy.notice.body);

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + policy.min_interval, policy.min_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_point: Option<GeoPoint> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    // Also fires when the sender is dropped
                    _ = stop_rx.changed() => break,
                }
                let fix = match location.current_position(policy.accuracy).await {
                    Ok(fix) => fix,
                    Err(e) => {
                        warn!("[Scheduler] {}: no position fix: {}", name, e);
                        continue;
                    }
                };
                let point = fix.point();
                if !moved_enough(last_point.as_ref(), &point, policy.min_distance_meters) {
                    debug!("[Scheduler] {}: moved less than {}m, not firing", name, policy.min_distance_meters);
                    continue;
                }
                if *stop_rx.borrow() {
                    break;
                }
                last_point = Some(point);
                registry.dispatch(&name, vec![fix]).await;
            }
            debug!("[Scheduler] {}: loop stopped", name);
        });

        tasks.insert(task.to_string(), ScheduledTask { handle, shutdown });
        Ok(())
    }

    async fn unregister(&self, task: &str) -> Result<()> {
        let scheduled = self.tasks()?.remove(task);
        match scheduled {
            Some(scheduled) => {
                // No abort: an in-flight dispatch finishes, later ticks never happen
                let _ = scheduled.shutdown.send(true);
                info!("[Scheduler] Task '{}' unregistered", task);
                Ok(())
            }
            None => Err(Error::Scheduler(format!("task '{}' is not registered", task))),
        }
    }

    async fn is_registered(&self, task: &str) -> bool {
        match self.tasks() {
            Ok(tasks) => tasks.get(task).map(|t| t.is_running()).unwrap_or(false),
            Err(_) => false,
        }
    }
}
