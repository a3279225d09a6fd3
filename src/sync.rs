use log::{info, warn};
use std::fmt;
use std::sync::Arc;

use crate::constants::{DEFAULT_MEDIA_LIMIT, KEY_DEVICE_ID, UNKNOWN_CONTACT_NAME};
use crate::error::{Error, Result};
use crate::gateway::BackendGateway;
use crate::models::{
    ContactRecord, ContactsBatch, LocationUpload, MediaBatch, MediaRecord,
};
use crate::platform::{Accuracy, Capabilities, Capability, PlatformAsset, PlatformContact};
use crate::store::KeyValueStore;

/// One independently gated, independently failing part of a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDomain {
    Contacts,
    Media,
    Location,
}

impl SyncDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDomain::Contacts => "contacts",
            SyncDomain::Media => "media",
            SyncDomain::Location => "location",
        }
    }
}

impl fmt::Display for SyncDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one domain during a sync pass
#[derive(Debug, Clone, PartialEq)]
pub enum DomainOutcome {
    /// Uploaded this many records
    Synced { items: usize },
    /// Permission not granted; not a failure
    Skipped(Capability),
    Failed(String),
}

impl DomainOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, DomainOutcome::Failed(_))
    }
}

impl fmt::Display for DomainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainOutcome::Synced { items } => write!(f, "synced {} item(s)", items),
            DomainOutcome::Skipped(cap) => write!(f, "skipped ({} not granted)", cap),
            DomainOutcome::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Ok,
    PartialFailure(Vec<SyncDomain>),
}

/// Result of one full sync pass
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub device_id: String,
    pub contacts: DomainOutcome,
    pub media: DomainOutcome,
    pub location: DomainOutcome,
}

impl SyncReport {
    /// Domains in the order they ran
    pub fn domains(&self) -> [(SyncDomain, &DomainOutcome); 3] {
        [
            (SyncDomain::Contacts, &self.contacts),
            (SyncDomain::Media, &self.media),
            (SyncDomain::Location, &self.location),
        ]
    }

    pub fn failed_domains(&self) -> Vec<SyncDomain> {
        self.domains()
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(domain, _)| *domain)
            .collect()
    }

    pub fn outcome(&self) -> SyncOutcome {
        let failed = self.failed_domains();
        if failed.is_empty() {
            SyncOutcome::Ok
        } else {
            SyncOutcome::PartialFailure(failed)
        }
    }

    /// Turn a partial failure into `Error::PartialSync`
    pub fn into_result(self) -> Result<SyncReport> {
        match self.outcome() {
            SyncOutcome::Ok => Ok(self),
            SyncOutcome::PartialFailure(domains) => Err(Error::PartialSync(domains)),
        }
    }
}

/// Map an OS contact to its wire record.
/// Absent or blank names become "Unknown"; multi-value fields keep their order.
pub fn contact_record(contact: PlatformContact) -> ContactRecord {
    let name = contact
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_CONTACT_NAME.to_string());
    ContactRecord {
        contact_id: contact.id,
        name,
        phone_numbers: contact.phone_numbers.into_iter().map(|p| p.value).collect(),
        emails: contact.emails.into_iter().map(|e| e.value).collect(),
    }
}

pub fn media_record(asset: PlatformAsset) -> MediaRecord {
    MediaRecord {
        media_id: asset.id,
        filename: asset.filename,
        media_type: asset.media_type,
        creation_time: asset.creation_time,
        modification_time: asset.modification_time,
        width: asset.width,
        height: asset.height,
        duration: asset.duration,
        location: asset.location,
    }
}

/// Newest `limit` assets by creation time. Assets without a creation time sort last.
pub fn select_recent(mut assets: Vec<PlatformAsset>, limit: usize) -> Vec<PlatformAsset> {
    assets.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
    assets.truncate(limit);
    assets
}

/// Collects location, contacts and media and uploads them domain by domain
pub struct SyncPipeline {
    capabilities: Capabilities,
    gateway: Arc<dyn BackendGateway>,
    store: Arc<dyn KeyValueStore>,
    media_limit: usize,
}

impl SyncPipeline {
    pub fn new(
        capabilities: Capabilities,
        gateway: Arc<dyn BackendGateway>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            capabilities,
            gateway,
            store,
            media_limit: DEFAULT_MEDIA_LIMIT,
        }
    }

    pub fn with_media_limit(mut self, media_limit: usize) -> Self {
        self.media_limit = media_limit;
        self
    }

    /// Sync the device whose id is in the store.
    /// Returns None without touching anything when no device id is stored.
    pub async fn sync_stored_device(&self) -> Result<Option<SyncReport>> {
        match self.store.get(KEY_DEVICE_ID)? {
            Some(device_id) => Ok(Some(self.sync_all(&device_id).await)),
            None => {
                info!("[Sync] No device id stored, skipping sync");
                Ok(None)
            }
        }
    }

    /// Run contacts, media and location syncs in that order.
    /// A failing domain is recorded in the report and never stops the next one.
    pub async fn sync_all(&self, device_id: &str) -> SyncReport {
        info!("[Sync] Starting sync for {}", device_id);

        let contacts = Self::isolate(SyncDomain::Contacts, self.sync_contacts(device_id).await);
        let media = Self::isolate(SyncDomain::Media, self.sync_media(device_id).await);
        let location = Self::isolate(SyncDomain::Location, self.sync_location(device_id).await);

        let report = SyncReport {
            device_id: device_id.to_string(),
            contacts,
            media,
            location,
        };

        match report.outcome() {
            SyncOutcome::Ok => info!("[Sync] Sync complete for {}", device_id),
            SyncOutcome::PartialFailure(failed) => {
                let names: Vec<&str> = failed.iter().map(|d| d.as_str()).collect();
                warn!(
                    "[Sync] Sync for {} finished with failures: {}",
                    device_id,
                    names.join(", ")
                );
            }
        }
        report
    }

    fn isolate(domain: SyncDomain, result: Result<DomainOutcome>) -> DomainOutcome {
        match result {
            Ok(outcome) => {
                info!("[Sync]   {}: {}", domain, outcome);
                outcome
            }
            Err(e) => {
                warn!("[Sync]   {}: failed: {}", domain, e);
                DomainOutcome::Failed(e.to_string())
            }
        }
    }

    async fn gate(&self, capability: Capability) -> Option<DomainOutcome> {
        let status = self.capabilities.permissions.status(capability).await;
        if status.is_granted() {
            None
        } else {
            Some(DomainOutcome::Skipped(capability))
        }
    }

    /// Upload one current high-accuracy fix
    pub async fn sync_location(&self, device_id: &str) -> Result<DomainOutcome> {
        if let Some(skipped) = self.gate(Capability::ForegroundLocation).await {
            return Ok(skipped);
        }
        let fix = self
            .capabilities
            .location
            .current_position(Accuracy::High)
            .await?;
        self.gateway
            .upload_location(&LocationUpload::from_fix(device_id, &fix))
            .await?;
        Ok(DomainOutcome::Synced { items: 1 })
    }

    /// Upload the full contact list as one snapshot
    pub async fn sync_contacts(&self, device_id: &str) -> Result<DomainOutcome> {
        if let Some(skipped) = self.gate(Capability::Contacts).await {
            return Ok(skipped);
        }
        let contacts: Vec<ContactRecord> = self
            .capabilities
            .contacts
            .all_contacts()
            .await?
            .into_iter()
            .map(contact_record)
            .collect();
        let items = contacts.len();
        self.gateway
            .upload_contacts(&ContactsBatch {
                device_id: device_id.to_string(),
                contacts,
            })
            .await?;
        Ok(DomainOutcome::Synced { items })
    }

    /// Upload the most recent photos and videos as one snapshot
    pub async fn sync_media(&self, device_id: &str) -> Result<DomainOutcome> {
        if let Some(skipped) = self.gate(Capability::MediaLibrary).await {
            return Ok(skipped);
        }
        let assets = self
            .capabilities
            .media
            .recent_assets(self.media_limit)
            .await?;
        let media_items: Vec<MediaRecord> = select_recent(assets, self.media_limit)
            .into_iter()
            .map(media_record)
            .collect();
        let items = media_items.len();
        self.gateway
            .upload_media(&MediaBatch {
                device_id: device_id.to_string(),
                media_items,
            })
            .await?;
        Ok(DomainOutcome::Synced { items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoPoint, MediaType};
    use crate::platform::LabeledValue;
    use chrono::{TimeZone, Utc};

    fn asset(id: &str, created_secs: Option<i64>) -> PlatformAsset {
        PlatformAsset {
            id: id.to_string(),
            filename: format!("{}.jpg", id),
            media_type: MediaType::Photo,
            creation_time: created_secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            modification_time: None,
            width: Some(4032),
            height: Some(3024),
            duration: None,
            location: None,
        }
    }

    #[test]
    fn test_contact_record_placeholder_and_flatten() {
        let contact = PlatformContact {
            id: "c1".to_string(),
            name: None,
            phone_numbers: vec![
                LabeledValue {
                    label: Some("mobile".to_string()),
                    value: "+1 555 0100".to_string(),
                },
                LabeledValue {
                    label: None,
                    value: "+1 555 0101".to_string(),
                },
            ],
            emails: vec![LabeledValue {
                label: Some("home".to_string()),
                value: "a@example.com".to_string(),
            }],
        };
        let record = contact_record(contact);
        assert_eq!(record.name, "Unknown");
        assert_eq!(record.phone_numbers, vec!["+1 555 0100", "+1 555 0101"]);
        assert_eq!(record.emails, vec!["a@example.com"]);

        let blank = PlatformContact {
            id: "c2".to_string(),
            name: Some("   ".to_string()),
            phone_numbers: vec![],
            emails: vec![],
        };
        assert_eq!(contact_record(blank).name, "Unknown");
    }

    #[test]
    fn test_select_recent_orders_and_caps() {
        let assets = vec![
            asset("old", Some(100)),
            asset("undated", None),
            asset("newest", Some(300)),
            asset("middle", Some(200)),
        ];
        let picked = select_recent(assets, 2);
        let ids: Vec<&str> = picked.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "middle"]);
    }

    #[test]
    fn test_media_record_keeps_geotag() {
        let mut a = asset("geo", Some(1));
        a.location = Some(GeoPoint {
            latitude: 48.85,
            longitude: 2.35,
        });
        let record = media_record(a);
        assert_eq!(record.location.unwrap().latitude, 48.85);
        assert_eq!(record.filename, "geo.jpg");
    }

    #[test]
    fn test_report_outcome() {
        let report = SyncReport {
            device_id: "d".to_string(),
            contacts: DomainOutcome::Skipped(Capability::Contacts),
            media: DomainOutcome::Synced { items: 3 },
            location: DomainOutcome::Failed("no fix".to_string()),
        };
        assert_eq!(
            report.outcome(),
            SyncOutcome::PartialFailure(vec![SyncDomain::Location])
        );
        assert!(matches!(
            report.into_result(),
            Err(Error::PartialSync(domains)) if domains == vec![SyncDomain::Location]
        ));
    }
}
