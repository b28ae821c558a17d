use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use codesync_domain::{Deriver, VectorIndex};
use codesync_engine::settings::{DeriverBackend, VectorBackend};
use codesync_engine::{
    LocalDeriver, QdrantIndex, RemoteDeriver, ServerSettings, SyncService, TenantAuthorizer,
    TieredCache,
};
use codesync_services::{InMemoryVectorIndex, MemoryKeyValueStore};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SyncService>,
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the configured collaborators into a sync service
    pub async fn from_settings(settings: &ServerSettings, metrics: PrometheusHandle) -> Result<Self> {
        let dimension = settings.deriver.dimension;

        let deriver: Arc<dyn Deriver> = match settings.deriver.backend {
            DeriverBackend::Local => Arc::new(LocalDeriver::new(dimension)),
            DeriverBackend::Remote => {
                let url = settings.deriver.url.as_deref().unwrap_or_default();
                Arc::new(RemoteDeriver::new(
                    url,
                    settings.deriver.api_key.clone(),
                    dimension,
                    settings.deriver.request_timeout(),
                )?)
            }
        };

        let index: Arc<dyn VectorIndex> = match settings.vector.backend {
            VectorBackend::Memory => Arc::new(InMemoryVectorIndex::new()),
            VectorBackend::Qdrant => Arc::new(
                QdrantIndex::connect(
                    &settings.vector.qdrant_url,
                    &settings.vector.collection,
                    dimension,
                )
                .await?,
            ),
        };

        info!(
            deriver = deriver.name(),
            index = index.name(),
            dimension,
            "Collaborators ready"
        );

        let cache = TieredCache::new(Arc::new(MemoryKeyValueStore::new()), settings.cache.clone());
        let service = SyncService::new(
            cache,
            deriver,
            index,
            TenantAuthorizer::new(settings.api_keys.clone()),
            settings.protocol.clone(),
        );

        Ok(Self { service: Arc::new(service), metrics, started_at: Instant::now() })
    }
}
