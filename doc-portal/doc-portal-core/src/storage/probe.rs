//! Resource-type discovery ahead of tagging calls.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ObjectStore, ResourceType};

/// Learns which resource type the store assigned to a key. Results of real
/// metadata reads are cached, fallbacks are not.
pub struct ResourceTypeProbe {
    store: Arc<dyn ObjectStore>,
    cache: RwLock<HashMap<String, ResourceType>>,
    fallback: ResourceType,
}

impl ResourceTypeProbe {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            fallback: ResourceType::Image,
        }
    }

    pub async fn probe(&self, key: &str) -> ResourceType {
        let cached = self.cache.read().get(key).copied();
        if let Some(found) = cached {
            return found;
        }
        match self.store.get_metadata(key).await {
            Ok(object) => {
                debug!(key, resource_type = object.resource_type.as_str(), "probed resource type");
                self.cache.write().insert(key.to_string(), object.resource_type);
                object.resource_type
            }
            Err(err) => {
                warn!(key, error = %err, fallback = self.fallback.as_str(), "resource type probe failed");
                self.fallback
            }
        }
    }

    /// Record a type learned elsewhere, e.g. from an upload response.
    pub fn remember(&self, key: &str, resource_type: ResourceType) {
        self.cache.write().insert(key.to_string(), resource_type);
    }

    pub fn forget(&self, key: &str) {
        self.cache.write().remove(key);
    }
}
