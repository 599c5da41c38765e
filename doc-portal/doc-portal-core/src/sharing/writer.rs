//! Writes sharing grants as object tags.
//!
//! The store's tagging calls are unreliable across resource types, so tags
//! are applied with up to three strategies in turn: an explicit replace with
//! the probed type, an additive tag call with the same type, and an explicit
//! replace addressed to `auto`. The first success wins.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult, StoreError, StoreResult};
use crate::keys;
use crate::model::{Permission, SharingResult, PERMISSIONS_KEY};
use crate::storage::{MetadataUpdate, ObjectStore, ResourceType, ResourceTypeProbe, StoredObject};
use crate::tags;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    Explicit,
    Additive,
    AutoExplicit,
}

impl Strategy {
    const ALL: [Strategy; 3] = [Strategy::Explicit, Strategy::Additive, Strategy::AutoExplicit];

    fn name(&self) -> &'static str {
        match self {
            Strategy::Explicit => "explicit",
            Strategy::Additive => "additive",
            Strategy::AutoExplicit => "auto",
        }
    }
}

/// A grant to record on one document.
#[derive(Clone, Debug, Default)]
pub struct Grant {
    pub recipient_ids: Vec<String>,
    pub recipient_emails: Vec<String>,
    pub permissions: Vec<Permission>,
}

impl Grant {
    pub fn is_empty(&self) -> bool {
        self.recipient_ids.is_empty() && self.recipient_emails.is_empty()
    }
}

pub struct AclWriter {
    store: Arc<dyn ObjectStore>,
    probe: Arc<ResourceTypeProbe>,
    config: Arc<PortalConfig>,
}

impl AclWriter {
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

    /// Replace the sharing state of `document_id` with `grant`. An empty
    /// grant revokes everything, including `isShared` and the owner tag.
    pub async fn set_sharing(
        &self,
        document_id: &str,
        owner_id: &str,
        grant: &Grant,
    ) -> PortalResult<SharingResult> {
        keys::validate_user_id(owner_id)?;
        if keys::is_raw_key(document_id) {
            return Err(PortalError::InvalidArgument(format!(
                "{document_id} is a raw representation, share its preview instead"
            )));
        }
        if !keys::is_owned_by(document_id, owner_id) {
            return Err(PortalError::AccessDenied(format!(
                "{document_id} does not belong to {owner_id}"
            )));
        }
        let sharing = tags::sharing_tags(owner_id, &grant.recipient_ids, &grant.recipient_emails)?;

        let existing = match self.store.get_metadata(document_id).await {
            Ok(object) => {
                self.probe.remember(document_id, object.resource_type);
                Some(object)
            }
            Err(StoreError::NotFound(_)) => {
                return Err(PortalError::NotFound(document_id.to_string()))
            }
            Err(err) => {
                warn!(document_id, error = %err, "metadata read before tagging failed");
                None
            }
        };
        let resource_type = match &existing {
            Some(object) => object.resource_type,
            None => self.probe.probe(document_id).await,
        };
        let desired = desired_tags(existing.as_ref(), owner_id, sharing);

        self.apply_with_fallbacks(document_id, resource_type, &desired)
            .await?;

        // A missing metadata read leaves it open whether a raw copy exists.
        let has_raw = existing
            .as_ref()
            .map_or(true, |object| super::is_paged(object, &self.config));
        if has_raw {
            self.tag_raw(document_id, &desired).await;
        }

        self.verify(document_id, &desired).await;
        self.record_permissions(document_id, grant).await;

        info!(
            document_id,
            owner_id,
            recipients = grant.recipient_ids.len() + grant.recipient_emails.len(),
            "sharing updated"
        );
        Ok(SharingResult {
            success: true,
            applied_tags: desired,
        })
    }

    async fn apply_with_fallbacks(
        &self,
        document_id: &str,
        resource_type: ResourceType,
        desired: &BTreeSet<String>,
    ) -> PortalResult<()> {
        let mut failures = Vec::new();
        for (attempt, strategy) in Strategy::ALL.into_iter().enumerate() {
            let attempt = attempt + 1;
            match self
                .apply(strategy, document_id, resource_type, desired)
                .await
            {
                Ok(()) => {
                    debug!(document_id, strategy = strategy.name(), attempt, "tags applied");
                    return Ok(());
                }
                Err(err) => {
                    warn!(document_id, strategy = strategy.name(), attempt, error = %err,
                        "tagging attempt failed");
                    failures.push(format!("{}: {err}", strategy.name()));
                }
            }
        }
        Err(PortalError::SharingFailed {
            reason: failures.join("; "),
        })
    }

    async fn apply(
        &self,
        strategy: Strategy,
        key: &str,
        resource_type: ResourceType,
        desired: &BTreeSet<String>,
    ) -> StoreResult<()> {
        match strategy {
            Strategy::Explicit => self.store.tag_explicit(key, resource_type, desired).await,
            Strategy::Additive => {
                self.store
                    .add_tags(desired, &[key.to_string()], resource_type)
                    .await
            }
            Strategy::AutoExplicit => {
                self.store
                    .tag_explicit(key, ResourceType::Auto, desired)
                    .await
            }
        }
    }

    async fn tag_raw(&self, document_id: &str, desired: &BTreeSet<String>) {
        let raw_key = keys::raw_key_for(document_id);
        match self
            .store
            .tag_explicit(&raw_key, ResourceType::Raw, desired)
            .await
        {
            Ok(()) => debug!(raw_key, "raw counterpart tagged"),
            Err(StoreError::NotFound(_)) => debug!(raw_key, "no raw counterpart"),
            Err(err) => warn!(raw_key, error = %err, "tagging raw counterpart failed"),
        }
    }

    /// Re-read the tags and force them with a metadata update if the sharing
    /// vocabulary on the object does not match what was written. Catches the
    /// additive strategy leaving revoked tags behind.
    async fn verify(&self, document_id: &str, desired: &BTreeSet<String>) {
        let actual = match self.store.get_metadata(document_id).await {
            Ok(object) => object.tags,
            Err(err) => {
                warn!(document_id, error = %err, "could not verify applied tags");
                return;
            }
        };
        if sharing_subset(&actual) == sharing_subset(desired) && actual.is_superset(desired) {
            return;
        }
        warn!(document_id, "applied tags differ from the grant, forcing metadata update");
        if let Err(err) = self
            .store
            .update_metadata(document_id, MetadataUpdate::tags(desired.clone()))
            .await
        {
            warn!(document_id, error = %err, "last-resort metadata update failed");
        }
    }

    async fn record_permissions(&self, document_id: &str, grant: &Grant) {
        let value = if grant.is_empty() {
            String::new()
        } else {
            let mut permissions: BTreeSet<Permission> = grant.permissions.iter().copied().collect();
            if permissions.is_empty() {
                permissions.insert(Permission::Read);
            }
            Permission::encode_set(&permissions)
        };
        let update = MetadataUpdate::context(BTreeMap::from([(PERMISSIONS_KEY.to_string(), value)]));
        if let Err(err) = self.store.update_metadata(document_id, update).await {
            warn!(document_id, error = %err, "recording permissions failed");
        }
    }
}

/// Tags the object keeps (everything outside the sharing vocabulary, or the
/// upload base tags when the object could not be read) plus the new grant.
fn desired_tags(
    existing: Option<&StoredObject>,
    owner_id: &str,
    sharing: BTreeSet<String>,
) -> BTreeSet<String> {
    let mut desired: BTreeSet<String> = match existing {
        Some(object) => object
            .tags
            .iter()
            .filter(|t| !tags::is_sharing_tag(t))
            .cloned()
            .collect(),
        None => tags::base_tags(owner_id, None)
            .into_iter()
            .filter(|t| !tags::is_sharing_tag(t))
            .collect(),
    };
    desired.extend(sharing);
    desired
}

fn sharing_subset(tags: &BTreeSet<String>) -> BTreeSet<&String> {
    tags.iter().filter(|t| tags::is_sharing_tag(t)).collect()
}
