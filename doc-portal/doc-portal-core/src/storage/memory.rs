//! In-memory object store (tests and local development)
//!
//! Behaves like a hosted media store: uploads are typed, tagging calls must
//! name the right resource type, and signed URLs carry an HMAC over
//! `(type, key, expiry)`. Search can be made to lag behind writes, and
//! individual operations can be made to fail.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use ring::hmac;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use super::{
    format_of, pdf_page_count, random_suffix, sort_newest_first, uniquify, MetadataUpdate,
    ObjectStore, PutOptions, ResourceType, SearchExpr, StoredObject,
};
use crate::error::{StoreError, StoreResult};

const DEFAULT_URL_BASE: &str = "memory://doc-portal";

/// Operations that can be targeted by an injected [`Fault`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Put,
    Search,
    TagExplicit,
    AddTags,
    UpdateMetadata,
    GetMetadata,
    Delete,
    SignedUrl,
}

/// A failure rule. The subject matched by [`Fault::matching`] is the key for
/// keyed operations, the comma-joined keys for `AddTags` and the rendered
/// expression for `Search`.
#[derive(Clone, Debug)]
pub struct Fault {
    op: StoreOp,
    matching: Option<String>,
    remaining: Option<u32>,
    error: StoreError,
}

impl Fault {
    pub fn always(op: StoreOp) -> Self {
        Self {
            op,
            matching: None,
            remaining: None,
            error: StoreError::Unavailable(format!("injected {op:?} failure")),
        }
    }

    pub fn times(op: StoreOp, n: u32) -> Self {
        Self {
            remaining: Some(n),
            ..Self::always(op)
        }
    }

    /// Only fire when the subject contains `needle`.
    pub fn matching(mut self, needle: impl Into<String>) -> Self {
        self.matching = Some(needle.into());
        self
    }

    pub fn with_error(mut self, error: StoreError) -> Self {
        self.error = error;
        self
    }
}

struct Entry {
    object: StoredObject,
    data: Bytes,
    /// Tags search still sees until `fresh_at`; `None` hides the object.
    stale_tags: Option<BTreeSet<String>>,
    fresh_at: Instant,
}

impl Entry {
    fn searchable_tags(&self, now: Instant) -> Option<&BTreeSet<String>> {
        if now >= self.fresh_at {
            Some(&self.object.tags)
        } else {
            self.stale_tags.as_ref()
        }
    }

    fn set_tags(&mut self, tags: BTreeSet<String>, lag: Duration) {
        let now = Instant::now();
        self.stale_tags = self.searchable_tags(now).cloned();
        self.object.tags = tags;
        self.fresh_at = now + lag;
    }
}

/// Thread-safe via `RwLock`. Not persistent, data is lost on drop.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Entry>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<(StoreOp, String)>>,
    signing_key: hmac::Key,
    url_base: String,
    visibility_lag: Duration,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        let secret = [
            *uuid::Uuid::new_v4().as_bytes(),
            *uuid::Uuid::new_v4().as_bytes(),
        ]
        .concat();
        Self {
            objects: RwLock::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            signing_key: hmac::Key::new(hmac::HMAC_SHA256, &secret),
            url_base: DEFAULT_URL_BASE.to_string(),
            visibility_lag: Duration::ZERO,
        }
    }

    pub fn with_url_base(mut self, base: impl Into<String>) -> Self {
        self.url_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Delay before writes become visible to search.
    pub fn with_visibility_lag(mut self, lag: Duration) -> Self {
        self.visibility_lag = lag;
        self
    }

    pub fn inject_failure(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_failures(&self) {
        self.faults.lock().clear();
    }

    /// Every call received so far, failed ones included.
    pub fn calls(&self) -> Vec<(StoreOp, String)> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn object_bytes(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|e| e.data.clone())
    }

    /// Pin an object's creation time.
    pub fn set_created_at(&self, key: &str, created_at: DateTime<Utc>) -> StoreResult<()> {
        let mut objects = self.objects.write();
        let entry = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        entry.object.created_at = created_at;
        Ok(())
    }

    /// Check a URL produced by [`ObjectStore::signed_url`] against this
    /// store's key and the given clock.
    pub fn verify_signed_url(&self, url: &str, now_epoch: i64) -> bool {
        url.strip_prefix(&format!("{}/", self.url_base))
            .and_then(|rest| self.signed_key(rest, now_epoch))
            .is_some()
    }

    /// Resolve `{type}/{key}?expires=..&signature=..`, the part of a signed
    /// URL after the base, to the object it grants.
    pub fn open_signed(&self, path_and_query: &str, now_epoch: i64) -> Option<(StoredObject, Bytes)> {
        let key = self.signed_key(path_and_query.trim_start_matches('/'), now_epoch)?;
        self.objects
            .read()
            .get(&key)
            .map(|e| (e.object.clone(), e.data.clone()))
    }

    fn signed_key(&self, path_and_query: &str, now_epoch: i64) -> Option<String> {
        let (path, query) = path_and_query.split_once('?')?;
        let (resource_type, key) = path.split_once('/')?;
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = B64.decode(v).ok(),
                _ => {}
            }
        }
        let (expires, signature) = (expires?, signature?);
        let message = signing_message(resource_type, key, expires);
        (hmac::verify(&self.signing_key, message.as_bytes(), &signature).is_ok()
            && now_epoch <= expires)
            .then(|| key.to_string())
    }

    fn record(&self, op: StoreOp, subject: &str) -> StoreResult<()> {
        self.calls.lock().push((op, subject.to_string()));
        let mut faults = self.faults.lock();
        for fault in faults.iter_mut() {
            if fault.op != op || fault.remaining == Some(0) {
                continue;
            }
            if let Some(needle) = &fault.matching {
                if !subject.contains(needle.as_str()) {
                    continue;
                }
            }
            if let Some(n) = fault.remaining.as_mut() {
                *n -= 1;
            }
            return Err(fault.error.clone());
        }
        Ok(())
    }

    fn check_type(object: &StoredObject, requested: ResourceType) -> StoreResult<()> {
        if requested.addresses(object.resource_type) {
            Ok(())
        } else {
            Err(StoreError::Rejected(format!(
                "{} is stored as {}, not {}",
                object.key,
                object.resource_type.as_str(),
                requested.as_str()
            )))
        }
    }
}

fn signing_message(resource_type: &str, key: &str, expires: i64) -> String {
    format!("{resource_type}\n{key}\n{expires}")
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<StoredObject> {
        self.record(StoreOp::Put, key)?;
        let mut objects = self.objects.write();

        let mut final_key = key.to_string();
        if options.unique_name {
            while objects.contains_key(&final_key) || final_key == key {
                final_key = uniquify(key, &random_suffix());
            }
        } else if !options.overwrite && objects.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        let format = options
            .format
            .or_else(|| format_of(key))
            .unwrap_or_else(|| "bin".to_string());
        let resource_type = match options.resource_type {
            ResourceType::Auto => ResourceType::interpret(options.content_type.as_deref(), &format),
            explicit => explicit,
        };
        let pages = match (resource_type, format.as_str()) {
            (ResourceType::Image, "pdf") => pdf_page_count(&data),
            _ => None,
        };
        let object = StoredObject {
            key: final_key.clone(),
            resource_type,
            tags: options.tags,
            context: options.context,
            format,
            bytes: data.len() as u64,
            created_at: Utc::now(),
            pages,
        };
        objects.insert(
            final_key,
            Entry {
                object: object.clone(),
                data,
                stale_tags: None,
                fresh_at: Instant::now() + self.visibility_lag,
            },
        );
        Ok(object)
    }

    async fn search(&self, expr: &SearchExpr, max_results: usize) -> StoreResult<Vec<StoredObject>> {
        self.record(StoreOp::Search, &expr.to_string())?;
        let now = Instant::now();
        let objects = self.objects.read();
        let mut found: Vec<StoredObject> = objects
            .values()
            .filter_map(|entry| {
                let tags = entry.searchable_tags(now)?;
                expr.matches_with(&entry.object.key, |t| tags.contains(t))
                    .then(|| StoredObject {
                        tags: tags.clone(),
                        ..entry.object.clone()
                    })
            })
            .collect();
        sort_newest_first(&mut found);
        found.truncate(max_results);
        Ok(found)
    }

    async fn tag_explicit(
        &self,
        key: &str,
        resource_type: ResourceType,
        tags: &BTreeSet<String>,
    ) -> StoreResult<()> {
        self.record(StoreOp::TagExplicit, key)?;
        let mut objects = self.objects.write();
        let entry = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_type(&entry.object, resource_type)?;
        entry.set_tags(tags.clone(), self.visibility_lag);
        Ok(())
    }

    async fn add_tags(
        &self,
        tags: &BTreeSet<String>,
        keys: &[String],
        resource_type: ResourceType,
    ) -> StoreResult<()> {
        self.record(StoreOp::AddTags, &keys.join(","))?;
        let mut objects = self.objects.write();
        // Validate everything first so a failing batch changes nothing.
        for key in keys {
            let entry = objects
                .get(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            Self::check_type(&entry.object, resource_type)?;
        }
        for key in keys {
            if let Some(entry) = objects.get_mut(key) {
                let mut merged = entry.object.tags.clone();
                merged.extend(tags.iter().cloned());
                entry.set_tags(merged, self.visibility_lag);
            }
        }
        Ok(())
    }

    async fn update_metadata(&self, key: &str, update: MetadataUpdate) -> StoreResult<()> {
        self.record(StoreOp::UpdateMetadata, key)?;
        let mut objects = self.objects.write();
        let entry = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(context) = update.context {
            entry.object.context.extend(context);
        }
        if let Some(tags) = update.tags {
            entry.set_tags(tags, self.visibility_lag);
        }
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> StoreResult<StoredObject> {
        self.record(StoreOp::GetMetadata, key)?;
        self.objects
            .read()
            .get(key)
            .map(|e| e.object.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str, resource_type: ResourceType) -> StoreResult<()> {
        self.record(StoreOp::Delete, key)?;
        let mut objects = self.objects.write();
        let entry = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_type(&entry.object, resource_type)?;
        objects.remove(key);
        Ok(())
    }

    async fn signed_url(
        &self,
        key: &str,
        resource_type: ResourceType,
        expires_at: i64,
    ) -> StoreResult<String> {
        self.record(StoreOp::SignedUrl, key)?;
        let objects = self.objects.read();
        let entry = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Self::check_type(&entry.object, resource_type)?;
        let actual = entry.object.resource_type.as_str();
        let tag = hmac::sign(
            &self.signing_key,
            signing_message(actual, key, expires_at).as_bytes(),
        );
        Ok(format!(
            "{}/{actual}/{key}?expires={expires_at}&signature={}",
            self.url_base,
            B64.encode(tag.as_ref())
        ))
    }
}
