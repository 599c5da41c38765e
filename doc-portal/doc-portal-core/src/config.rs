//! Runtime configuration for the portal core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by every portal operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortalConfig {
    /// Maximum number of results returned by a single listing search.
    pub list_limit: usize,
    /// Timeout applied to each individual object-store call.
    pub store_timeout_secs: u64,
    /// Timeout around the whole shared-with-me composition.
    pub search_timeout_secs: u64,
    pub default_url_expiry_secs: u64,
    /// Upper bound accepted for signed URL lifetimes (the S3 presign limit).
    pub max_url_expiry_secs: u64,
    /// MIME types stored with a preview plus a raw representation.
    pub paged_mime_types: Vec<String>,
    pub identity_concurrency: usize,
    /// Attempts per physical delete. Retries always target the same key.
    pub delete_attempts: u32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            list_limit: 100,
            store_timeout_secs: 10,
            search_timeout_secs: 30,
            default_url_expiry_secs: 3600,
            max_url_expiry_secs: 7 * 24 * 60 * 60,
            paged_mime_types: vec![
                "application/pdf".to_string(),
                "application/postscript".to_string(),
                "application/vnd.ms-xpsdocument".to_string(),
                "image/vnd.djvu".to_string(),
            ],
            identity_concurrency: 8,
            delete_attempts: 2,
        }
    }
}

impl PortalConfig {
    /// Defaults overlaid with `DOC_PORTAL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("DOC_PORTAL_LIST_LIMIT") {
            config.list_limit = v;
        }
        if let Some(v) = env_parse("DOC_PORTAL_STORE_TIMEOUT_SECS") {
            config.store_timeout_secs = v;
        }
        if let Some(v) = env_parse("DOC_PORTAL_SEARCH_TIMEOUT_SECS") {
            config.search_timeout_secs = v;
        }
        if let Some(v) = env_parse("DOC_PORTAL_URL_EXPIRY_SECS") {
            config.default_url_expiry_secs = v;
        }
        if let Some(v) = env_parse("DOC_PORTAL_IDENTITY_CONCURRENCY") {
            config.identity_concurrency = v;
        }
        if let Some(v) = env_parse("DOC_PORTAL_DELETE_ATTEMPTS") {
            config.delete_attempts = v;
        }
        if let Ok(types) = std::env::var("DOC_PORTAL_PAGED_MIME_TYPES") {
            config.paged_mime_types = types
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        config
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    /// Whether documents of this MIME type get a dual representation.
    pub fn is_paged(&self, mime_type: &str) -> bool {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.paged_mime_types.iter().any(|m| *m == mime)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
