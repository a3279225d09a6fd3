//! HTTP client for the backend relay.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{
    ChildSummary, ContactRecord, ContactsBatch, DeviceRegistration, LocationSample,
    LocationUpload, MediaBatch, MediaRecord,
};

/// Backend operations used by the pairing, sync and parent components
#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn register_device(&self, registration: &DeviceRegistration) -> Result<()>;
    async fn children(&self, parent_device_id: &str) -> Result<Vec<ChildSummary>>;
    async fn upload_contacts(&self, batch: &ContactsBatch) -> Result<()>;
    async fn contacts(&self, device_id: &str) -> Result<Vec<ContactRecord>>;
    async fn upload_media(&self, batch: &MediaBatch) -> Result<()>;
    async fn media(&self, device_id: &str) -> Result<Vec<MediaRecord>>;
    async fn upload_location(&self, upload: &LocationUpload) -> Result<()>;
    /// None when the device has never synced a location
    async fn latest_location(&self, device_id: &str) -> Result<Option<LocationSample>>;
    /// Most recent first, at most `limit` samples
    async fn location_history(&self, device_id: &str, limit: usize)
        -> Result<Vec<LocationSample>>;
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Network error fetching {}: {}", path, e)))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to parse {} response: {}", path, e)))
    }

    async fn post_json<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Network error posting {}: {}", path, e)))?;
        Self::check(response).await?;
        Ok(())
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl BackendGateway for HttpGateway {
    async fn register_device(&self, registration: &DeviceRegistration) -> Result<()> {
        self.post_json("/api/devices/register", registration).await
    }

    async fn children(&self, parent_device_id: &str) -> Result<Vec<ChildSummary>> {
        self.get_json(&format!(
            "/api/devices/parent/{}/children",
            segment(parent_device_id)
        ))
        .await
    }

    async fn upload_contacts(&self, batch: &ContactsBatch) -> Result<()> {
        self.post_json("/api/contacts/batch", batch).await
    }

    async fn contacts(&self, device_id: &str) -> Result<Vec<ContactRecord>> {
        self.get_json(&format!("/api/contacts/{}", segment(device_id)))
            .await
    }

    async fn upload_media(&self, batch: &MediaBatch) -> Result<()> {
        self.post_json("/api/media/batch", batch).await
    }

    async fn media(&self, device_id: &str) -> Result<Vec<MediaRecord>> {
        self.get_json(&format!("/api/media/{}", segment(device_id)))
            .await
    }

    async fn upload_location(&self, upload: &LocationUpload) -> Result<()> {
        self.post_json("/api/locations", upload).await
    }

    async fn latest_location(&self, device_id: &str) -> Result<Option<LocationSample>> {
        let path = format!("/api/locations/{}/latest", segment(device_id));
        match self.get_json(&path).await {
            Ok(sample) => Ok(Some(sample)),
            Err(Error::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn location_history(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<LocationSample>> {
        let mut history: Vec<LocationSample> = self
            .get_json(&format!(
                "/api/locations/{}/history?limit={}",
                segment(device_id),
                limit
            ))
            .await?;
        history.truncate(limit);
        Ok(history)
    }
}
