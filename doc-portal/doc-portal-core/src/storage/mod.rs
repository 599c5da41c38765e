//! Object-store abstraction consumed by the portal.
//!
//! The store is a flat key space of blobs carrying a tag set and a small
//! string-to-string context map. It has no ACLs and no relational index; tag
//! search is the only query primitive.
//!
//! ## Backends
//!
//! | Backend               | Use case                              |
//! |-----------------------|---------------------------------------|
//! | `InMemoryObjectStore` | tests, local development              |
//! | `S3ObjectStore`       | production (S3 / MinIO)               |
//!
//! Wrap either in [`TimedStore`] to bound every call.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreResult;

pub mod memory;
pub mod probe;
pub mod query;
pub mod s3;
pub mod timed;


pub use memory::{Fault, InMemoryObjectStore, StoreOp};
pub use probe::ResourceTypeProbe;
pub use query::SearchExpr;
pub use s3::S3ObjectStore;
pub use timed::TimedStore;

/// How the store interprets an object's bytes. Tagging, deleting and signing
/// calls must name the right type; `Auto` matches whatever the store chose.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Auto,
    Image,
    Video,
    Raw,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Auto => "auto",
            ResourceType::Image => "image",
            ResourceType::Video => "video",
            ResourceType::Raw => "raw",
        }
    }

    /// Whether a call naming `self` may address an object stored as `actual`.
    pub fn addresses(&self, actual: ResourceType) -> bool {
        *self == ResourceType::Auto || *self == actual
    }

    /// The concrete type an `Auto` upload resolves to.
    pub fn interpret(mime_type: Option<&str>, format: &str) -> ResourceType {
        let mime = mime_type.unwrap_or_default().to_ascii_lowercase();
        if mime.starts_with("image/")
            || matches!(format, "pdf" | "ps" | "eps" | "djvu" | "xps")
        {
            ResourceType::Image
        } else if mime.starts_with("video/") || mime.starts_with("audio/") {
            ResourceType::Video
        } else {
            ResourceType::Raw
        }
    }
}

/// Options for [`ObjectStore::put`].
#[derive(Clone, Debug)]
pub struct PutOptions {
    pub tags: BTreeSet<String>,
    pub context: BTreeMap<String, String>,
    pub resource_type: ResourceType,
    pub overwrite: bool,
    /// Let the store add a random suffix so the key never collides.
    pub unique_name: bool,
    pub content_type: Option<String>,
    pub format: Option<String>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            tags: BTreeSet::new(),
            context: BTreeMap::new(),
            resource_type: ResourceType::Auto,
            overwrite: true,
            unique_name: false,
            content_type: None,
            format: None,
        }
    }
}

/// Partial metadata replacement. `tags` replaces the whole tag set, `context`
/// entries are merged key by key.
#[derive(Clone, Debug, Default)]
pub struct MetadataUpdate {
    pub tags: Option<BTreeSet<String>>,
    pub context: Option<BTreeMap<String, String>>,
}

impl MetadataUpdate {
    pub fn tags(tags: BTreeSet<String>) -> Self {
        Self {
            tags: Some(tags),
            context: None,
        }
    }

    pub fn context(context: BTreeMap<String, String>) -> Self {
        Self {
            tags: None,
            context: Some(context),
        }
    }

    pub(crate) fn apply(self, object: &mut StoredObject) {
        if let Some(tags) = self.tags {
            object.tags = tags;
        }
        if let Some(context) = self.context {
            object.context.extend(context);
        }
    }
}

/// Metadata of one stored object as reported by the store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub resource_type: ResourceType,
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub format: String,
    pub bytes: u64,
    pub created_at: DateTime<Utc>,
    pub pages: Option<u32>,
}

/// Store operations the portal relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key` (or a uniquified variant of it) and return
    /// the resulting metadata.
    async fn put(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<StoredObject>;

    /// Objects matching `expr`, newest first, at most `max_results`.
    async fn search(&self, expr: &SearchExpr, max_results: usize) -> StoreResult<Vec<StoredObject>>;

    /// Replace the tag set of one object.
    async fn tag_explicit(
        &self,
        key: &str,
        resource_type: ResourceType,
        tags: &BTreeSet<String>,
    ) -> StoreResult<()>;

    /// Add tags to several objects without removing existing ones.
    async fn add_tags(
        &self,
        tags: &BTreeSet<String>,
        keys: &[String],
        resource_type: ResourceType,
    ) -> StoreResult<()>;

    async fn update_metadata(&self, key: &str, update: MetadataUpdate) -> StoreResult<()>;

    async fn get_metadata(&self, key: &str) -> StoreResult<StoredObject>;

    async fn delete(&self, key: &str, resource_type: ResourceType) -> StoreResult<()>;

    /// A URL granting read access until `expires_at` (unix seconds).
    async fn signed_url(
        &self,
        key: &str,
        resource_type: ResourceType,
        expires_at: i64,
    ) -> StoreResult<String>;
}

/// Newest first; equal timestamps ordered by key so results are stable.
pub fn newest_first(a: &StoredObject, b: &StoredObject) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.key.cmp(&b.key))
}

pub fn sort_newest_first(objects: &mut [StoredObject]) {
    objects.sort_by(newest_first);
}

/// Lowercased extension of the last path segment of `name`.
pub fn format_of(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Page count of a PDF payload, counted from its `/Type /Page` objects.
pub fn pdf_page_count(data: &[u8]) -> Option<u32> {
    if !data.starts_with(b"%PDF") {
        return None;
    }
    let mut pages = 0u32;
    let mut i = 0;
    while let Some(pos) = find(&data[i..], b"/Type") {
        let mut j = i + pos + b"/Type".len();
        while j < data.len() && data[j].is_ascii_whitespace() {
            j += 1;
        }
        if data[j..].starts_with(b"/Page") {
            let after = j + b"/Page".len();
            if data.get(after) != Some(&b's') {
                pages += 1;
            }
        }
        i = j;
    }
    (pages > 0).then_some(pages)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `dir/name.ext` -> `dir/name_{suffix}.ext`.
pub(crate) fn uniquify(key: &str, suffix: &str) -> String {
    let (dir, file) = match key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, key),
    };
    let file = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{suffix}.{ext}"),
        _ => format!("{file}_{suffix}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{file}"),
        None => file,
    }
}

pub(crate) fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
}
