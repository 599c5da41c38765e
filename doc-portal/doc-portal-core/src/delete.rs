//! Removal of every physical object behind a document.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult, StoreError, StoreResult};
use crate::keys;
use crate::model::DeleteOutcome;
use crate::storage::{ObjectStore, ResourceType, ResourceTypeProbe};

pub struct DeletionCoordinator {
    store: Arc<dyn ObjectStore>,
    probe: Arc<ResourceTypeProbe>,
    config: Arc<PortalConfig>,
}

impl DeletionCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        probe: Arc<ResourceTypeProbe>,
        config: Arc<PortalConfig>,
    ) -> Self {
        Self {
            store,
            probe,
            config,
        }
    }

    /// Delete the preview and, for paged documents, the raw copy. Anything
    /// short of removing both is an error: `PartialDelete` when some objects
    /// went, the underlying failure when none did.
    pub async fn delete(&self, document_id: &str, owner_id: &str) -> PortalResult<DeleteOutcome> {
        keys::validate_user_id(owner_id)?;
        if keys::is_raw_key(document_id) {
            return Err(PortalError::InvalidArgument(format!(
                "{document_id} is a raw representation, delete its preview instead"
            )));
        }
        if !keys::is_owned_by(document_id, owner_id) {
            return Err(PortalError::AccessDenied(format!(
                "{document_id} does not belong to {owner_id}"
            )));
        }

        let targets = match self.store.get_metadata(document_id).await {
            Ok(object) => {
                let mut targets = vec![(document_id.to_string(), object.resource_type)];
                if crate::sharing::is_paged(&object, &self.config) {
                    targets.push((keys::raw_key_for(document_id), ResourceType::Raw));
                }
                targets
            }
            Err(StoreError::NotFound(_)) => {
                return Err(PortalError::NotFound(document_id.to_string()))
            }
            Err(err) => {
                // Fall back to the naming convention; a raw copy that does
                // not exist deletes as NotFound, which counts as removed.
                warn!(document_id, error = %err, "metadata read before delete failed");
                vec![
                    (document_id.to_string(), ResourceType::Auto),
                    (keys::raw_key_for(document_id), ResourceType::Raw),
                ]
            }
        };

        let results = join_all(
            targets
                .iter()
                .map(|(key, resource_type)| self.delete_one(key, *resource_type)),
        )
        .await;

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;
        for ((key, _), result) in targets.into_iter().zip(results) {
            self.probe.forget(&key);
            match result {
                Ok(()) => deleted.push(key),
                Err(err) => {
                    warn!(document_id, key = %key, error = %err, "physical delete failed");
                    first_error.get_or_insert(err);
                    failed.push(key);
                }
            }
        }

        match first_error {
            None => {
                info!(document_id, owner_id, objects = deleted.len(), "document deleted");
                Ok(DeleteOutcome {
                    success: true,
                    partial: false,
                })
            }
            Some(_) if !deleted.is_empty() => Err(PortalError::PartialDelete { deleted, failed }),
            Some(err) => Err(PortalError::from_store(err)),
        }
    }

    /// Retries transient failures against the same key only.
    async fn delete_one(&self, key: &str, resource_type: ResourceType) -> StoreResult<()> {
        let attempts = self.config.delete_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.delete(key, resource_type).await {
                Ok(()) | Err(StoreError::NotFound(_)) => return Ok(()),
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(key, attempt, error = %err, "delete failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
