//! Capability seams between the core and the host OS.
//!
//! Every sensor and OS service the core touches sits behind one of these
//! traits. `Capabilities` bundles them so components take a single handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::{GeoPoint, LocationFix, MediaType};

/// OS capability the user may grant or refuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ForegroundLocation,
    BackgroundLocation,
    Contacts,
    MediaLibrary,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::ForegroundLocation => "foreground location",
            Capability::BackgroundLocation => "background location",
            Capability::Contacts => "contacts",
            Capability::MediaLibrary => "media library",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// Never asked, or the prompt was dismissed
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(&self) -> bool {
        match self {
            PermissionStatus::Granted => true,
            PermissionStatus::Denied | PermissionStatus::Undetermined => false,
        }
    }
}

#[async_trait]
pub trait Permissions: Send + Sync {
    /// Current grant without prompting
    async fn status(&self, capability: Capability) -> PermissionStatus;
    /// Prompt the user if needed and return the resulting grant
    async fn request(&self, capability: Capability) -> PermissionStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Balanced,
    High,
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// One current position fix. Errors when the OS declines to produce one.
    async fn current_position(&self, accuracy: Accuracy) -> Result<LocationFix>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabeledValue {
    #[serde(default)]
    pub label: Option<String>,
    pub value: String,
}

/// Contact as the OS contacts provider reports it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlatformContact {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_numbers: Vec<LabeledValue>,
    #[serde(default)]
    pub emails: Vec<LabeledValue>,
}

#[async_trait]
pub trait ContactsProvider: Send + Sync {
    /// Full contact list including phone numbers and emails
    async fn all_contacts(&self) -> Result<Vec<PlatformContact>>;
}

/// Photo or video asset as the OS media index reports it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlatformAsset {
    pub id: String,
    pub filename: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modification_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Up to `limit` photo/video assets, newest creation time first
    async fn recent_assets(&self, limit: usize) -> Result<Vec<PlatformAsset>>;
}

/// User-visible notice kept up while the background task runs
#[derive(Debug, Clone, PartialEq)]
pub struct ForegroundNotice {
    pub title: String,
    pub body: String,
}

/// Registration policy handed to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPolicy {
    pub accuracy: Accuracy,
    pub min_interval: Duration,
    pub min_distance_meters: f64,
    pub notice: ForegroundNotice,
}

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Register a periodic task. The caller checks `is_registered` first.
    async fn register(&self, task: &str, policy: &TaskPolicy) -> Result<()>;
    async fn unregister(&self, task: &str) -> Result<()>;
    /// Live answer from the scheduler, never cached by callers
    async fn is_registered(&self, task: &str) -> bool;
}

/// Handles to every capability the core consumes
#[derive(Clone)]
pub struct Capabilities {
    pub permissions: Arc<dyn Permissions>,
    pub location: Arc<dyn LocationProvider>,
    pub contacts: Arc<dyn ContactsProvider>,
    pub media: Arc<dyn MediaLibrary>,
    pub scheduler: Arc<dyn TaskScheduler>,
}
