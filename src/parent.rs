//! Read path for a parent device: its children and their synced data.

use log::{debug, info};
use std::sync::Arc;

use crate::error::Result;
use crate::gateway::BackendGateway;
use crate::models::{ChildSummary, ContactRecord, LocationSample, MediaRecord};

/// How the media snapshot is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaSort {
    /// Everything, in the order the backend returned it
    #[default]
    Recent,
    /// Only items carrying a geotag
    Geotagged,
}

/// Apply a sort mode to a media snapshot. Computed locally, never by the backend.
pub fn media_view(items: &[MediaRecord], sort: MediaSort) -> Vec<MediaRecord> {
    match sort {
        MediaSort::Recent => items.to_vec(),
        MediaSort::Geotagged => items
            .iter()
            .filter(|m| m.location.is_some())
            .cloned()
            .collect(),
    }
}

/// Everything fetched for the selected child
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSnapshot {
    pub device_id: String,
    pub latest_location: Option<LocationSample>,
    pub history: Vec<LocationSample>,
    pub contacts: Vec<ContactRecord>,
    pub media: Vec<MediaRecord>,
}

/// Result of a manual refresh
#[derive(Debug, Clone, PartialEq)]
pub struct ParentView {
    pub children: Vec<ChildSummary>,
    pub selected: Option<ChildSnapshot>,
}

/// Fetches fresh on every call and keeps no cache.
/// Callers must not issue overlapping refreshes; nothing here deduplicates them.
pub struct ParentAggregator {
    gateway: Arc<dyn BackendGateway>,
    history_limit: usize,
}

impl ParentAggregator {
    pub fn new(gateway: Arc<dyn BackendGateway>, history_limit: usize) -> Self {
        Self {
            gateway,
            history_limit,
        }
    }

    /// Children bound to `parent_device_id`; an empty list is a normal answer
    pub async fn list_children(&self, parent_device_id: &str) -> Result<Vec<ChildSummary>> {
        let children = self.gateway.children(parent_device_id).await?;
        debug!(
            "[Parent] {} child device(s) for {}",
            children.len(),
            parent_device_id
        );
        Ok(children)
    }

    pub async fn latest_location(&self, child_id: &str) -> Result<Option<LocationSample>> {
        self.gateway.latest_location(child_id).await
    }

    /// Most recent first, at most `limit`
    pub async fn location_history(
        &self,
        child_id: &str,
        limit: usize,
    ) -> Result<Vec<LocationSample>> {
        let mut history = self.gateway.location_history(child_id, limit).await?;
        history.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        history.truncate(limit);
        Ok(history)
    }

    pub async fn contacts(&self, child_id: &str) -> Result<Vec<ContactRecord>> {
        self.gateway.contacts(child_id).await
    }

    pub async fn media(&self, child_id: &str) -> Result<Vec<MediaRecord>> {
        self.gateway.media(child_id).await
    }

    /// Fetch location, history, contacts and media for one child
    pub async fn child_snapshot(&self, child_id: &str) -> Result<ChildSnapshot> {
        let latest_location = self.latest_location(child_id).await?;
        let history = self.location_history(child_id, self.history_limit).await?;
        let contacts = self.contacts(child_id).await?;
        let media = self.media(child_id).await?;
        Ok(ChildSnapshot {
            device_id: child_id.to_string(),
            latest_location,
            history,
            contacts,
            media,
        })
    }

    /// Re-list the children, then refetch the selected child if there is one
    pub async fn refresh(
        &self,
        parent_device_id: &str,
        selected_child: Option<&str>,
    ) -> Result<ParentView> {
        info!("[Parent] Refreshing children of {}", parent_device_id);
        let children = self.list_children(parent_device_id).await?;
        let selected = match selected_child {
            Some(child_id) => Some(self.child_snapshot(child_id).await?),
            None => None,
        };
        Ok(ParentView { children, selected })
    }
}
