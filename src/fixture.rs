//! Capability implementation backed by a TOML fixture.
//!
//! Hosts without mobile sensors (a desktop, CI) describe the device in a file:
//!
//! ```toml
//! grant_on_prompt = true
//!
//! [permissions]
//! foreground_location = "granted"
//! background_location = "granted"
//! contacts = "denied"
//! media_library = "undetermined"
//!
//! [[fixes]]
//! latitude = 37.7749
//! longitude = -122.4194
//! accuracy = 8.0
//!
//! [[contacts]]
//! id = "1"
//! name = "Alice"
//! phone_numbers = [{ label = "mobile", value = "+1 555 0100" }]
//!
//! [[media]]
//! id = "IMG_0001"
//! filename = "IMG_0001.HEIC"
//! media_type = "photo"
//! creation_time = "2024-05-01T10:00:00Z"
//! location = { latitude = 37.77, longitude = -122.41 }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::models::LocationFix;
use crate::platform::{
    Accuracy, Capabilities, Capability, ContactsProvider, LocationProvider, MediaLibrary,
    PermissionStatus, Permissions, PlatformAsset, PlatformContact, TaskScheduler,
};

fn undetermined() -> PermissionStatus {
    PermissionStatus::Undetermined
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixturePermissions {
    #[serde(default = "undetermined")]
    pub foreground_location: PermissionStatus,
    #[serde(default = "undetermined")]
    pub background_location: PermissionStatus,
    #[serde(default = "undetermined")]
    pub contacts: PermissionStatus,
    #[serde(default = "undetermined")]
    pub media_library: PermissionStatus,
}

impl Default for FixturePermissions {
    fn default() -> Self {
        Self {
            foreground_location: undetermined(),
            background_location: undetermined(),
            contacts: undetermined(),
            media_library: undetermined(),
        }
    }
}

impl FixturePermissions {
    /// Every capability granted
    pub fn all_granted() -> Self {
        Self {
            foreground_location: PermissionStatus::Granted,
            background_location: PermissionStatus::Granted,
            contacts: PermissionStatus::Granted,
            media_library: PermissionStatus::Granted,
        }
    }

    fn get(&self, capability: Capability) -> PermissionStatus {
        match capability {
            Capability::ForegroundLocation => self.foreground_location,
            Capability::BackgroundLocation => self.background_location,
            Capability::Contacts => self.contacts,
            Capability::MediaLibrary => self.media_library,
        }
    }

    fn slot(&mut self, capability: Capability) -> &mut PermissionStatus {
        match capability {
            Capability::ForegroundLocation => &mut self.foreground_location,
            Capability::BackgroundLocation => &mut self.background_location,
            Capability::Contacts => &mut self.contacts,
            Capability::MediaLibrary => &mut self.media_library,
        }
    }
}

/// Fixture file contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureData {
    /// Answer given when an undetermined permission is requested
    #[serde(default)]
    pub grant_on_prompt: bool,
    #[serde(default)]
    pub permissions: FixturePermissions,
    /// Position fixes handed out in order; the last one repeats
    #[serde(default)]
    pub fixes: Vec<LocationFix>,
    #[serde(default)]
    pub contacts: Vec<PlatformContact>,
    #[serde(default)]
    pub media: Vec<PlatformAsset>,
}

struct FixtureState {
    data: FixtureData,
    next_fix: usize,
}

pub struct FixturePlatform {
    state: Mutex<FixtureState>,
}

impl FixturePlatform {
    pub fn new(data: FixtureData) -> Self {
        Self {
            state: Mutex::new(FixtureState { data, next_fix: 0 }),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let data: FixtureData = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse fixture: {}", e)))?;
        Ok(Self::new(data))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read fixture '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    fn state(&self) -> Result<MutexGuard<'_, FixtureState>> {
        self.state
            .lock()
            .map_err(|_| Error::Unavailable("fixture state poisoned".to_string()))
    }

    pub fn set_permission(&self, capability: Capability, status: PermissionStatus) {
        if let Ok(mut state) = self.state() {
            *state.data.permissions.slot(capability) = status;
        }
    }

    pub fn set_fixes(&self, fixes: Vec<LocationFix>) {
        if let Ok(mut state) = self.state() {
            state.data.fixes = fixes;
            state.next_fix = 0;
        }
    }

    pub fn set_contacts(&self, contacts: Vec<PlatformContact>) {
        if let Ok(mut state) = self.state() {
            state.data.contacts = contacts;
        }
    }

    pub fn set_media(&self, media: Vec<PlatformAsset>) {
        if let Ok(mut state) = self.state() {
            state.data.media = media;
        }
    }

    /// Bundle this platform with a scheduler into a capability handle
    pub fn capabilities(self: Arc<Self>, scheduler: Arc<dyn TaskScheduler>) -> Capabilities {
        Capabilities {
            permissions: self.clone(),
            location: self.clone(),
            contacts: self.clone(),
            media: self,
            scheduler,
        }
    }
}

#[async_trait]
impl Permissions for FixturePlatform {
    async fn status(&self, capability: Capability) -> PermissionStatus {
        self.state()
            .map(|s| s.data.permissions.get(capability))
            .unwrap_or(PermissionStatus::Undetermined)
    }

    async fn request(&self, capability: Capability) -> PermissionStatus {
        let mut state = match self.state() {
            Ok(state) => state,
            Err(_) => return PermissionStatus::Denied,
        };
        let grant_on_prompt = state.data.grant_on_prompt;
        let slot = state.data.permissions.slot(capability);
        match *slot {
            PermissionStatus::Granted => PermissionStatus::Granted,
            PermissionStatus::Denied => PermissionStatus::Denied,
            PermissionStatus::Undetermined => {
                *slot = if grant_on_prompt {
                    PermissionStatus::Granted
                } else {
                    PermissionStatus::Denied
                };
                *slot
            }
        }
    }
}

#[async_trait]
impl LocationProvider for FixturePlatform {
    async fn current_position(&self, _accuracy: Accuracy) -> Result<LocationFix> {
        let mut state = self.state()?;
        if state.data.fixes.is_empty() {
            return Err(Error::Unavailable("no position fix available".to_string()));
        }
        let idx = state.next_fix.min(state.data.fixes.len() - 1);
        state.next_fix = idx + 1;
        let mut fix = state.data.fixes[idx].clone();
        if fix.timestamp.is_none() {
            fix.timestamp = Some(chrono::Utc::now());
        }
        Ok(fix)
    }
}

#[async_trait]
impl ContactsProvider for FixturePlatform {
    async fn all_contacts(&self) -> Result<Vec<PlatformContact>> {
        Ok(self.state()?.data.contacts.clone())
    }
}

#[async_trait]
impl MediaLibrary for FixturePlatform {
    async fn recent_assets(&self, limit: usize) -> Result<Vec<PlatformAsset>> {
        let mut assets = self.state()?.data.media.clone();
        assets.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
        assets.truncate(limit);
        Ok(assets)
    }
}
