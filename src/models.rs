use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a device plays in a pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Observes paired children
    Parent,
    /// Shares its location, contacts and media with one parent
    Child,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Parent => "parent",
            Role::Child => "child",
        }
    }

    /// Parse a persisted role value. Unknown strings yield None.
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "parent" => Some(Role::Parent),
            "child" => Some(Role::Child),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of POST /api/devices/register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: String,
    pub device_name: String,
    pub mode: Role,
    pub parent_device_id: Option<String>,
}

/// Entry of GET /api/devices/parent/{parentId}/children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub device_id: String,
    pub device_name: String,
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Great-circle distance in meters (haversine)
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Raw position fix produced by the location provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationFix {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Body of POST /api/locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpload {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl LocationUpload {
    pub fn from_fix(device_id: &str, fix: &LocationFix) -> Self {
        Self {
            device_id: device_id.to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            speed: fix.speed,
            heading: fix.heading,
            captured_at: fix.timestamp,
        }
    }
}

/// A location sample as stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub contact_id: String,
    pub name: String,
    pub phone_numbers: Vec<String>,
    pub emails: Vec<String>,
}

/// Body of POST /api/contacts/batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactsBatch {
    pub device_id: String,
    pub contacts: Vec<ContactRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub media_id: String,
    pub filename: String,
    pub media_type: MediaType,
    pub creation_time: Option<DateTime<Utc>>,
    pub modification_time: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Seconds, videos only
    pub duration: Option<f64>,
    pub location: Option<GeoPoint>,
}

/// Body of POST /api/media/batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaBatch {
    pub device_id: String,
    pub media_items: Vec<MediaRecord>,
}
