//! Background location tracking lifecycle.
//!
//! Tracking has two states, Unregistered and Active, and the scheduler is the
//! only source of truth for which one holds. Nothing here caches it.

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::constants::{
    DEFAULT_TRACKING_DISTANCE_METERS, DEFAULT_TRACKING_INTERVAL_SECS, KEY_DEVICE_ID,
    LOCATION_TASK_NAME,
};
use crate::gateway::BackendGateway;
use crate::models::{LocationFix, LocationUpload};
use crate::platform::{
    Accuracy, Capabilities, Capability, ForegroundNotice, PermissionStatus, TaskPolicy,
};
use crate::store::KeyValueStore;
use crate::sync::SyncPipeline;

/// Code run when the scheduler fires a registered task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, fixes: Vec<LocationFix>);
}

/// Task name → handler table.
///
/// Handlers are defined once at process start, before any scheduler fires,
/// and receive their dependencies when they are constructed.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: Mutex<HashMap<String, Arc<dyn TaskHandler>>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<TaskRegistry>> = OnceLock::new();

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the process-wide registry. Later calls return the same instance.
    pub fn init_global() -> Arc<TaskRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(TaskRegistry::new()))
            .clone()
    }

    pub fn define(&self, task: &str, handler: Arc<dyn TaskHandler>) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(task.to_string(), handler);
        }
    }

    pub fn is_defined(&self, task: &str) -> bool {
        self.handlers
            .lock()
            .map(|h| h.contains_key(task))
            .unwrap_or(false)
    }

    /// Run the handler for `task`. Returns false when no handler is defined.
    pub async fn dispatch(&self, task: &str, fixes: Vec<LocationFix>) -> bool {
        let handler = match self.handlers.lock() {
            Ok(handlers) => handlers.get(task).cloned(),
            Err(_) => None,
        };
        match handler {
            Some(handler) => {
                handler.handle(fixes).await;
                true
            }
            None => {
                warn!("No handler defined for task '{}'", task);
                false
            }
        }
    }
}

/// Uploads the first fix of each background firing as one location sample
pub struct LocationTaskHandler {
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn BackendGateway>,
}

impl LocationTaskHandler {
    pub fn new(store: Arc<dyn KeyValueStore>, gateway: Arc<dyn BackendGateway>) -> Self {
        Self { store, gateway }
    }
}

#[async_trait]
impl TaskHandler for LocationTaskHandler {
    async fn handle(&self, fixes: Vec<LocationFix>) {
        let fix = match fixes.into_iter().next() {
            Some(fix) => fix,
            None => {
                debug!("[Tracking] Firing without fixes, nothing to upload");
                return;
            }
        };

        // A stale OS task can outlive the identity; that is not an error
        let device_id = match self.store.get(KEY_DEVICE_ID) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("[Tracking] No device id stored, ignoring firing");
                return;
            }
            Err(e) => {
                warn!("[Tracking] Could not read device id: {}", e);
                return;
            }
        };

        // No retry: the next firing supersedes this one
        match self
            .gateway
            .upload_location(&LocationUpload::from_fix(&device_id, &fix))
            .await
        {
            Ok(()) => debug!(
                "[Tracking] Uploaded background fix ({:.5}, {:.5})",
                fix.latitude, fix.longitude
            ),
            Err(e) => warn!("[Tracking] Background upload failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    Active,
    Unregistered,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started,
    /// A location permission was refused; nothing was registered
    Denied(Capability),
    /// The scheduler refused the task; nothing is left registered
    Failed(String),
}

pub fn default_task_policy() -> TaskPolicy {
    TaskPolicy {
        accuracy: Accuracy::High,
        min_interval: Duration::from_secs(DEFAULT_TRACKING_INTERVAL_SECS),
        min_distance_meters: DEFAULT_TRACKING_DISTANCE_METERS,
        notice: ForegroundNotice {
            title: "Location sharing active".to_string(),
            body: "Your location is being shared with your parent device".to_string(),
        },
    }
}

pub struct TrackingController {
    capabilities: Capabilities,
    pipeline: Arc<SyncPipeline>,
    policy: TaskPolicy,
}

impl TrackingController {
    pub fn new(capabilities: Capabilities, pipeline: Arc<SyncPipeline>) -> Self {
        Self {
            capabilities,
            pipeline,
            policy: default_task_policy(),
        }
    }

    pub fn with_policy(mut self, policy: TaskPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &TaskPolicy {
        &self.policy
    }

    pub async fn status(&self) -> TrackingStatus {
        if self
            .capabilities
            .scheduler
            .is_registered(LOCATION_TASK_NAME)
            .await
        {
            TrackingStatus::Active
        } else {
            TrackingStatus::Unregistered
        }
    }

    /// Ask for permissions, register the background task and run one sync pass
    pub async fn start(&self) -> StartOutcome {
        let permissions = &self.capabilities.permissions;

        for capability in [Capability::ForegroundLocation, Capability::BackgroundLocation] {
            match permissions.request(capability).await {
                PermissionStatus::Granted => {}
                PermissionStatus::Denied | PermissionStatus::Undetermined => {
                    warn!("[Tracking] {} permission refused", capability);
                    return StartOutcome::Denied(capability);
                }
            }
        }

        // Contacts and media are best-effort; they are gated again at sync time
        for capability in [Capability::Contacts, Capability::MediaLibrary] {
            match permissions.request(capability).await {
                PermissionStatus::Granted => {}
                PermissionStatus::Denied | PermissionStatus::Undetermined => {
                    info!(
                        "[Tracking] {} permission refused, that domain will be skipped",
                        capability
                    );
                }
            }
        }

        let scheduler = &self.capabilities.scheduler;
        if scheduler.is_registered(LOCATION_TASK_NAME).await {
            debug!("[Tracking] Task already registered");
        } else if let Err(e) = scheduler.register(LOCATION_TASK_NAME, &self.policy).await {
            error!("[Tracking] Failed to register background task: {}", e);
            if scheduler.is_registered(LOCATION_TASK_NAME).await {
                if let Err(e) = scheduler.unregister(LOCATION_TASK_NAME).await {
                    error!("[Tracking] Failed to clean up partial registration: {}", e);
                }
            }
            return StartOutcome::Failed(e.to_string());
        } else {
            info!(
                "[Tracking] Background task registered (every {}s / {}m)",
                self.policy.min_interval.as_secs(),
                self.policy.min_distance_meters
            );
        }

        // Immediate pass so the parent does not wait for the first firing
        match self.pipeline.sync_stored_device().await {
            Ok(_) => {}
            Err(e) => warn!("[Tracking] Initial sync could not run: {}", e),
        }

        StartOutcome::Started
    }

    /// Deregister the background task. Never fails from the caller's view.
    pub async fn stop(&self) {
        let scheduler = &self.capabilities.scheduler;
        if !scheduler.is_registered(LOCATION_TASK_NAME).await {
            debug!("[Tracking] Task not registered, nothing to stop");
            return;
        }
        match scheduler.unregister(LOCATION_TASK_NAME).await {
            Ok(()) => info!("[Tracking] Background task stopped"),
            Err(e) => error!("[Tracking] Failed to stop background task: {}", e),
        }
    }
}
