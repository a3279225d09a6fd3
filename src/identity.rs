//! Device identity: the persisted id, name, role and parent binding.

use log::{info, warn};
use std::sync::Arc;

use crate::constants::{
    generate_device_id, KEY_DEVICE_ID, KEY_DEVICE_MODE, KEY_DEVICE_NAME, KEY_PARENT_DEVICE_ID,
};
use crate::error::{Error, Result};
use crate::gateway::BackendGateway;
use crate::models::{DeviceRegistration, Role};
use crate::store::KeyValueStore;

/// A fully set-up device
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: String,
    pub device_name: String,
    pub role: Role,
    /// Present iff role is Child
    pub parent_device_id: Option<String>,
}

impl Device {
    fn registration(&self) -> DeviceRegistration {
        DeviceRegistration {
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            mode: self.role,
            parent_device_id: self.parent_device_id.clone(),
        }
    }
}

pub struct DeviceIdentity {
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<dyn BackendGateway>,
}

impl DeviceIdentity {
    pub fn new(store: Arc<dyn KeyValueStore>, gateway: Arc<dyn BackendGateway>) -> Self {
        Self { store, gateway }
    }

    /// Stored device id, if one has been generated
    pub fn device_id(&self) -> Result<Option<String>> {
        self.store.get(KEY_DEVICE_ID)
    }

    /// Return the stored device id, generating and persisting one on first use
    pub fn ensure_device_id(&self) -> Result<String> {
        if let Some(id) = self.store.get(KEY_DEVICE_ID)? {
            return Ok(id);
        }
        let id = generate_device_id();
        self.store.set(KEY_DEVICE_ID, &id)?;
        info!("Generated device id {}", id);
        Ok(id)
    }

    /// Register this device with the backend and persist its role.
    ///
    /// Nothing but the device id is written unless the backend accepts the
    /// registration, so a failed setup can be retried with the same id.
    pub async fn setup(&self, role: Role, name: &str, parent_id: Option<&str>) -> Result<Device> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidSetup("device name must not be empty".to_string()));
        }

        let parent_device_id = match role {
            Role::Parent => None,
            Role::Child => {
                let parent = parent_id.map(str::trim).unwrap_or("");
                if parent.is_empty() {
                    return Err(Error::InvalidSetup(
                        "a child device needs the parent device id".to_string(),
                    ));
                }
                Some(parent.to_string())
            }
        };

        let device_id = self.ensure_device_id()?;
        if parent_device_id.as_deref() == Some(device_id.as_str()) {
            return Err(Error::InvalidSetup(
                "a device cannot pair with itself".to_string(),
            ));
        }

        let device = Device {
            device_id,
            device_name: name.to_string(),
            role,
            parent_device_id,
        };

        self.gateway.register_device(&device.registration()).await?;
        self.persist_setup(&device)?;

        info!(
            "Registered {} device {} ({})",
            role, device.device_id, device.device_name
        );
        Ok(device)
    }

    /// Write parent, name, then role. On any failure the previous values are restored.
    fn persist_setup(&self, device: &Device) -> Result<()> {
        let keys = [KEY_PARENT_DEVICE_ID, KEY_DEVICE_NAME, KEY_DEVICE_MODE];
        let mut previous = Vec::with_capacity(keys.len());
        for key in keys {
            previous.push((key, self.store.get(key)?));
        }

        let result = self.write_setup(device);
        if result.is_err() {
            for (key, value) in previous {
                let restored = match value {
                    Some(value) => self.store.set(key, &value),
                    None => self.store.remove(key),
                };
                if let Err(e) = restored {
                    warn!("Could not restore '{}' after failed setup: {}", key, e);
                }
            }
        }
        result
    }

    fn write_setup(&self, device: &Device) -> Result<()> {
        match &device.parent_device_id {
            Some(parent) => self.store.set(KEY_PARENT_DEVICE_ID, parent)?,
            None => self.store.remove(KEY_PARENT_DEVICE_ID)?,
        }
        self.store.set(KEY_DEVICE_NAME, &device.device_name)?;
        // Role goes last: its presence marks a completed setup
        self.store.set(KEY_DEVICE_MODE, device.role.as_str())
    }

    /// Persisted role, None before setup completes
    pub fn current_role(&self) -> Result<Option<Role>> {
        match self.store.get(KEY_DEVICE_MODE)? {
            Some(value) => {
                let role = Role::parse(&value);
                if role.is_none() {
                    warn!("Ignoring unrecognised stored role '{}'", value);
                }
                Ok(role)
            }
            None => Ok(None),
        }
    }

    pub fn device_name(&self) -> Result<Option<String>> {
        self.store.get(KEY_DEVICE_NAME)
    }

    pub fn parent_device_id(&self) -> Result<Option<String>> {
        self.store.get(KEY_PARENT_DEVICE_ID)
    }

    /// The set-up device, None before setup completes
    pub fn device(&self) -> Result<Option<Device>> {
        let role = match self.current_role()? {
            Some(role) => role,
            None => return Ok(None),
        };
        let device_id = match self.device_id()? {
            Some(id) => id,
            None => return Ok(None),
        };
        let parent_device_id = match role {
            Role::Child => self.parent_device_id()?,
            Role::Parent => None,
        };
        Ok(Some(Device {
            device_id,
            device_name: self.device_name()?.unwrap_or_default(),
            role,
            parent_device_id,
        }))
    }

    /// Change the device name. The backend is updated before the local copy.
    pub async fn rename(&self, name: &str) -> Result<Device> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidSetup("device name must not be empty".to_string()));
        }
        let mut device = self
            .device()?
            .ok_or(Error::NotConfigured("device has not been set up"))?;
        device.device_name = name.to_string();

        self.gateway.register_device(&device.registration()).await?;
        self.store.set(KEY_DEVICE_NAME, &device.device_name)?;
        info!("Renamed device {} to {}", device.device_id, device.device_name);
        Ok(device)
    }

    /// Forget everything, including the device id
    pub fn reset(&self) -> Result<()> {
        self.store.clear()?;
        info!("Cleared device identity");
        Ok(())
    }
}
