use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use crate::identity::IdentityResolver;
use crate::keys;
use crate::model::SignedUrls;
use crate::storage::{ObjectStore, ResourceType, StoredObject};
use crate::tags::ShareState;

/// Issues time-boxed download and preview links for documents the requester
/// owns or has been granted.
pub struct UrlIssuer {
    store: Arc<dyn ObjectStore>,
    identity: Arc<IdentityResolver>,
    config: Arc<PortalConfig>,
}

impl UrlIssuer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        identity: Arc<IdentityResolver>,
        config: Arc<PortalConfig>,
    ) -> Self {
        Self {
            store,
            identity,
            config,
        }
    }

    pub async fn issue(
        &self,
        document_id: &str,
        requester_id: &str,
        requester_email: Option<&str>,
        expires_in_secs: Option<u64>,
    ) -> PortalResult<SignedUrls> {
        keys::validate_user_id(requester_id)?;
        let expires_in = expires_in_secs.unwrap_or(self.config.default_url_expiry_secs);
        if expires_in == 0 || expires_in > self.config.max_url_expiry_secs {
            return Err(PortalError::InvalidArgument(format!(
                "expiry must be between 1 and {} seconds",
                self.config.max_url_expiry_secs
            )));
        }
        if keys::is_raw_key(document_id) {
            return Err(PortalError::InvalidArgument(format!(
                "{document_id} is a raw representation, not a document id"
            )));
        }

        let object = self
            .store
            .get_metadata(document_id)
            .await
            .map_err(PortalError::from_store)?;
        self.authorize(&object, requester_id, requester_email).await?;

        let expires_at = Utc::now().timestamp() + expires_in as i64;
        let preview_url = self
            .store
            .signed_url(&object.key, object.resource_type, expires_at)
            .await
            .map_err(PortalError::from_store)?;
        let download_url = if crate::sharing::is_paged(&object, &self.config) {
            let raw_key = keys::raw_key_for(&object.key);
            self.store
                .signed_url(&raw_key, ResourceType::Raw, expires_at)
                .await
                .map_err(PortalError::from_store)?
        } else {
            preview_url.clone()
        };

        info!(document_id, requester_id, expires_at, "issued signed urls");
        Ok(SignedUrls {
            download_url,
            preview_url,
            expires_at: DateTime::<Utc>::from_timestamp(expires_at, 0).ok_or_else(|| {
                PortalError::InvalidArgument(format!("expiry {expires_at} out of range"))
            })?,
        })
    }

    /// Owners always pass. Anyone else must be named by the grant recorded
    /// on the object and must not be reading their own document.
    async fn authorize(
        &self,
        object: &StoredObject,
        requester_id: &str,
        requester_email: Option<&str>,
    ) -> PortalResult<()> {
        if keys::is_owned_by(&object.key, requester_id) {
            return Ok(());
        }
        let state = ShareState::from_tags(&object.tags);
        let owner = state
            .owner_id
            .clone()
            .or_else(|| keys::owner_from_key(&object.key));
        if state.shared && owner.is_some() {
            if state.recipient_ids.contains(requester_id) {
                return Ok(());
            }
            let email = match requester_email {
                Some(email) => Some(email.to_string()),
                None => self.identity.resolve(requester_id).await,
            };
            if email.is_some() && state.includes(requester_id, email.as_deref()) {
                return Ok(());
            }
        }
        debug!(key = %object.key, requester_id, "signed url refused");
        Err(PortalError::AccessDenied(format!(
            "{} is not shared with {requester_id}",
            object.key
        )))
    }
}
