//! Tag-based access control.
//!
//! [`AclWriter`] records grants as tags on the stored objects and
//! [`AclReader`] rebuilds "mine" and "shared with me" listings from tag
//! search, since the store keeps no grant index of its own.

use std::collections::BTreeSet;

use crate::config::PortalConfig;
use crate::keys;
use crate::model::{Document, Permission, MIME_TYPE_KEY, ORIGINAL_NAME_KEY, PERMISSIONS_KEY};
use crate::storage::StoredObject;
use crate::tags::ShareState;

pub mod reader;
pub mod writer;

pub use reader::AclReader;
pub use writer::AclWriter;

/// Whether a stored preview object has a raw counterpart.
pub(crate) fn is_paged(object: &StoredObject, config: &PortalConfig) -> bool {
    object
        .context
        .get(MIME_TYPE_KEY)
        .is_some_and(|mime| config.is_paged(mime))
}

/// Permissions recorded on the object, `read` when none are.
pub(crate) fn permissions_of(object: &StoredObject) -> BTreeSet<Permission> {
    let granted = object
        .context
        .get(PERMISSIONS_KEY)
        .map(|v| Permission::decode_set(v))
        .unwrap_or_default();
    if granted.is_empty() {
        BTreeSet::from([Permission::Read])
    } else {
        granted
    }
}

pub(crate) fn to_document(
    object: StoredObject,
    owner_id: String,
    owner_email: Option<String>,
    config: &PortalConfig,
) -> Document {
    let paged = is_paged(&object, config);
    let state = ShareState::from_tags(&object.tags);
    Document {
        raw_key: paged.then(|| keys::raw_key_for(&object.key)),
        is_pdf_like: paged,
        owner_id,
        owner_email,
        format: object.format.clone(),
        size_bytes: object.bytes,
        original_name: object.context.get(ORIGINAL_NAME_KEY).cloned(),
        page_count: object.pages,
        created_at: object.created_at,
        shared_with_emails: state.recipient_emails,
        permissions: permissions_of(&object),
        id: object.key,
        tags: object.tags,
    }
}
