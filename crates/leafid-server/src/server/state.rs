use anyhow::Context;
use leafid::{
    IdGenService,
    coordinator::{CoordinatorConfig, MemoryCoordinationBackend, WorkerIdCoordinator},
    segment::SegmentAllocator,
    snowflake::{SnowflakeConfig, SnowflakeGenerator},
    store::MemoryAllocationStore,
};
use std::sync::Arc;

use super::config::{SegmentSettings, ServerConfig, SnowflakeSettings, WorkerIdSource};

pub type Store = Arc<MemoryAllocationStore>;
pub type Allocator = SegmentAllocator<Store>;
pub type Generator = SnowflakeGenerator;
pub type Coordinator = WorkerIdCoordinator<MemoryCoordinationBackend>;
pub type Service = IdGenService<Allocator, Generator>;

/// Everything the handlers share: the dispatching service plus the worker id
/// lease backing Snowflake mode, if any.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    service: Service,
    coordinator: Option<Coordinator>,
}

impl AppState {
    /// Builds and initializes the configured generators.
    ///
    /// # Errors
    ///
    /// Fails if no worker id can be obtained or the Snowflake settings are
    /// rejected. A segment store that is not reachable yet is not an error:
    /// segment requests answer `InitNotReady` until a resync succeeds.
    pub async fn start(config: &ServerConfig) -> anyhow::Result<Self> {
        let segment = config.segment.as_ref().map(build_allocator);

        let (snowflake, coordinator) = match &config.snowflake {
            Some(settings) => {
                let (generator, coordinator) = build_generator(config, settings).await?;
                (Some(generator), coordinator)
            }
            None => (None, None),
        };

        let service = IdGenService::new(segment, snowflake);
        if !service.init().await {
            tracing::warn!("Not every generator initialized; retrying in the background");
        }

        Ok(Self::from_parts(service, coordinator))
    }

    pub fn from_parts(service: Service, coordinator: Option<Coordinator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                coordinator,
            }),
        }
    }

    pub fn service(&self) -> &Service {
        &self.inner.service
    }

    /// Stops the resync and heartbeat tasks.
    pub async fn shutdown(&self) {
        if let Some(allocator) = self.inner.service.segment() {
            allocator.shutdown().await;
        }
        if let Some(coordinator) = &self.inner.coordinator {
            coordinator.shutdown().await;
        }
    }
}

fn build_allocator(settings: &SegmentSettings) -> Allocator {
    tracing::warn!(
        tags = settings.seeds.len(),
        "Segment rows live in memory; ids restart from SEGMENT_TAGS after a restart"
    );
    let store = Arc::new(MemoryAllocationStore::new());
    for seed in &settings.seeds {
        store.insert(seed.tag.clone(), seed.max_id, seed.step);
    }
    SegmentAllocator::new(store, settings.config.clone())
}

async fn build_generator(
    config: &ServerConfig,
    settings: &SnowflakeSettings,
) -> anyhow::Result<(Generator, Option<Coordinator>)> {
    let (worker_id, coordinator) = match &settings.worker {
        WorkerIdSource::Static(worker_id) => (*worker_id, None),
        WorkerIdSource::Coordinated {
            ip,
            port,
            heartbeat_interval,
        } => {
            tracing::warn!(
                "The coordinator backend is in-process; worker ids are unique only within this instance"
            );
            let coordinator = WorkerIdCoordinator::new(
                MemoryCoordinationBackend::new(),
                CoordinatorConfig {
                    app_name: config.app_name.clone(),
                    ip: ip.to_string(),
                    port: *port,
                    config_dir: config.conf_path.clone(),
                    heartbeat_interval: *heartbeat_interval,
                },
            );
            let registration = coordinator
                .init()
                .await
                .context("failed to lease a Snowflake worker id")?;
            if registration.is_degraded() {
                tracing::warn!(
                    worker_id = registration.worker_id(),
                    "Coordinator unusable, running on the locally cached worker id"
                );
            }
            (registration.worker_id(), Some(coordinator))
        }
    };

    let generator = SnowflakeGenerator::new(SnowflakeConfig {
        epoch: settings.epoch,
        worker_id,
    })
    .context("failed to create the Snowflake generator")?;
    Ok((generator, coordinator))
}
