//! Server configuration: optional TOML file overlaid with `CODESYNC__*` env vars

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use codesync_domain::{CacheConfig, ProtocolConfig};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};
use crate::tenant::validate_id;

pub const ENV_PREFIX: &str = "CODESYNC";

/// Room for one maximum-size chunk plus the request envelope
pub const MIN_REQUEST_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Memory,
    Qdrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeriverBackend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSettings {
    pub backend: VectorBackend,
    pub qdrant_url: String,
    pub collection: String,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Memory,
            qdrant_url: "http://localhost:6334".to_string(),
            collection: "codesync_chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeriverSettings {
    pub backend: DeriverBackend,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub request_timeout_ms: u64,
}

impl Default for DeriverSettings {
    fn default() -> Self {
        Self {
            backend: DeriverBackend::Local,
            url: None,
            api_key: None,
            dimension: 384,
            request_timeout_ms: 60_000,
        }
    }
}

impl DeriverSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
    pub cache: CacheConfig,
    pub protocol: ProtocolConfig,
    pub vector: VectorSettings,
    pub deriver: DeriverSettings,
    /// API key to the tenant it acts for. Empty means open mode.
    pub api_keys: HashMap<String, String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3015".to_string(),
            cache: CacheConfig::default(),
            protocol: ProtocolConfig::default(),
            vector: VectorSettings::default(),
            deriver: DeriverSettings::default(),
            api_keys: HashMap::new(),
        }
    }
}

impl ServerSettings {
    /// Defaults, then the file at `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| SyncError::configuration_error_with_source("settings", e))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.protocol.sub_batch_size == 0 {
            return Err(SyncError::configuration_error("protocol.sub_batch_size must be positive"));
        }
        if self.protocol.max_top_k == 0 {
            return Err(SyncError::configuration_error("protocol.max_top_k must be positive"));
        }
        if self.protocol.max_request_bytes < MIN_REQUEST_BYTES {
            return Err(SyncError::configuration_error(format!(
                "protocol.max_request_bytes must be at least {MIN_REQUEST_BYTES}"
            )));
        }
        if self.deriver.dimension == 0 {
            return Err(SyncError::configuration_error("deriver.dimension must be positive"));
        }
        if self.deriver.backend == DeriverBackend::Remote && self.deriver.url.is_none() {
            return Err(SyncError::configuration_error("deriver.url is required for the remote deriver"));
        }
        for tenant in self.api_keys.values() {
            validate_id("api_keys", tenant)?;
        }
        Ok(())
    }
}
