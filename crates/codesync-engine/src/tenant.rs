//! Tenant isolation: composite ids, identifier rules and API key checks

use std::collections::HashMap;

use codesync_domain::Scoped;
use tracing::warn;

use crate::errors::{Result, SyncError};

pub const MAX_ID_LEN: usize = 128;

/// `tenant_project_hash`. Ids never contain `_`, so the prefix is unambiguous.
pub fn composite_id(tenant_id: &str, project_id: &str, content_hash: &str) -> String {
    format!("{tenant_id}_{project_id}_{content_hash}")
}

/// Prefix every composite id of a tenant's project starts with
pub fn composite_prefix(tenant_id: &str, project_id: &str) -> String {
    format!("{tenant_id}_{project_id}_")
}

/// Check a tenant or project id: 1 to 128 chars of `[A-Za-z0-9.-]`
pub fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_ID_LEN {
        return Err(SyncError::validation_error(
            field,
            format!("must be 1-{MAX_ID_LEN} characters"),
        ));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
    {
        return Err(SyncError::validation_error(
            field,
            format!("contains invalid character '{bad}'"),
        ));
    }
    Ok(())
}

/// Validate the scope of any protocol request
pub fn validate_scope(request: &impl Scoped) -> Result<()> {
    validate_id("tenantId", request.tenant_id())?;
    validate_id("projectId", request.project_id())
}

/// Maps API keys to the one tenant each key may act for
#[derive(Debug, Clone, Default)]
pub struct TenantAuthorizer {
    keys: HashMap<String, String>,
}

impl TenantAuthorizer {
    pub fn new(keys: HashMap<String, String>) -> Self {
        if keys.is_empty() {
            warn!("No API keys configured, every request is authorized");
        }
        Self { keys }
    }

    pub fn is_open(&self) -> bool {
        self.keys.is_empty()
    }

    /// Reject a request whose key is missing, unknown, or bound to a
    /// different tenant
    pub fn authorize(&self, api_key: Option<&str>, tenant_id: &str) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        match api_key.and_then(|key| self.keys.get(key)) {
            Some(owner) if owner == tenant_id => Ok(()),
            Some(_) => Err(SyncError::authorization_error(format!("tenant {tenant_id}"))),
            None => Err(SyncError::authorization_error("missing or unknown API key")),
        }
    }
}
