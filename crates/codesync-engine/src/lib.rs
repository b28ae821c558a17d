//! Codesync engine - incremental, tenant-aware content sync

pub mod cache;
pub mod client;
pub mod deriver;
pub mod dirty;
pub mod errors;
pub mod hasher;
pub mod index_svc;
pub mod logging;
pub mod merkle;
pub mod persist;
pub mod segmenter;
pub mod service;
pub mod settings;
pub mod signals;
pub mod tenant;
pub mod transport;
pub mod watcher;

pub use cache::TieredCache;
pub use client::{ClientConfig, StatusReport, SyncClient, SyncMode, SyncReport};
pub use deriver::{LocalDeriver, RemoteDeriver, derive_with_timeout};
pub use dirty::DirtyQueue;
pub use errors::{Result, SyncError};
pub use index_svc::QdrantIndex;
pub use logging::{LoggingConfig, init_default_logging, init_production_logging};
pub use merkle::{MerkleLeaf, MerkleTree, TreeDiff, TreeState};
pub use segmenter::{Segmenter, read_chunk_content};
pub use service::SyncService;
pub use settings::ServerSettings;
pub use tenant::{TenantAuthorizer, composite_id};
pub use transport::{HttpTransport, LocalTransport, SyncTransport};
pub use watcher::ProjectWatcher;
