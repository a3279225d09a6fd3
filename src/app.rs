//! Wires configuration, store, gateway and capabilities into the components.

use log::warn;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::constants::LOCATION_TASK_NAME;
use crate::error::Result;
use crate::fixture::{FixtureData, FixturePlatform};
use crate::gateway::{BackendGateway, HttpGateway};
use crate::identity::DeviceIdentity;
use crate::parent::ParentAggregator;
use crate::schedule::IntervalScheduler;
use crate::store::{FileStore, KeyValueStore};
use crate::sync::SyncPipeline;
use crate::tracking::{LocationTaskHandler, TaskRegistry, TrackingController};

pub struct App {
    pub store: Arc<dyn KeyValueStore>,
    pub gateway: Arc<dyn BackendGateway>,
    pub identity: DeviceIdentity,
    pub pipeline: Arc<SyncPipeline>,
    pub tracking: TrackingController,
    pub parent: ParentAggregator,
}

impl App {
    /// Build every component from the config.
    ///
    /// Defines the background location handler in `registry` before anything
    /// can register the task.
    pub fn from_config(config: &AppConfig, registry: Arc<TaskRegistry>) -> Result<App> {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.state_file)?);
        let gateway: Arc<dyn BackendGateway> =
            Arc::new(HttpGateway::new(&config.backend_url, config.request_timeout())?);

        let platform = match &config.fixture {
            Some(path) => FixturePlatform::from_file(path)?,
            None => {
                warn!("No capability fixture configured, all permissions are undetermined");
                FixturePlatform::new(FixtureData::default())
            }
        };
        let platform = Arc::new(platform);

        Ok(Self::assemble(config, registry, store, gateway, platform))
    }

    /// Build the components over already constructed parts
    pub fn assemble(
        config: &AppConfig,
        registry: Arc<TaskRegistry>,
        store: Arc<dyn KeyValueStore>,
        gateway: Arc<dyn BackendGateway>,
        platform: Arc<FixturePlatform>,
    ) -> App {
        registry.define(
            LOCATION_TASK_NAME,
            Arc::new(LocationTaskHandler::new(store.clone(), gateway.clone())),
        );

        let scheduler = Arc::new(IntervalScheduler::new(registry, platform.clone()));
        let capabilities = platform.capabilities(scheduler);

        let pipeline = Arc::new(
            SyncPipeline::new(capabilities.clone(), gateway.clone(), store.clone())
                .with_media_limit(config.sync.media_limit),
        );
        let tracking = TrackingController::new(capabilities, pipeline.clone())
            .with_policy(config.tracking.task_policy());

        App {
            identity: DeviceIdentity::new(store.clone(), gateway.clone()),
            parent: ParentAggregator::new(gateway.clone(), config.sync.history_limit),
            store,
            gateway,
            pipeline,
            tracking,
        }
    }
}
