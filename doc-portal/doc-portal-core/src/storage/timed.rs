//! Per-call timeout decorator.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{MetadataUpdate, ObjectStore, PutOptions, ResourceType, SearchExpr, StoredObject};
use crate::error::{StoreError, StoreResult};

/// Bounds every call on the wrapped store by `limit`.
pub struct TimedStore {
    inner: Arc<dyn ObjectStore>,
    limit: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn ObjectStore>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn run<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.limit, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.limit)))
    }
}

#[async_trait]
impl ObjectStore for TimedStore {
    async fn put(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<StoredObject> {
        self.run(self.inner.put(key, data, options)).await
    }

    async fn search(&self, expr: &SearchExpr, max_results: usize) -> StoreResult<Vec<StoredObject>> {
        self.run(self.inner.search(expr, max_results)).await
    }

    async fn tag_explicit(
        &self,
        key: &str,
        resource_type: ResourceType,
        tags: &BTreeSet<String>,
    ) -> StoreResult<()> {
        self.run(self.inner.tag_explicit(key, resource_type, tags)).await
    }

    async fn add_tags(
        &self,
        tags: &BTreeSet<String>,
        keys: &[String],
        resource_type: ResourceType,
    ) -> StoreResult<()> {
        self.run(self.inner.add_tags(tags, keys, resource_type)).await
    }

    async fn update_metadata(&self, key: &str, update: MetadataUpdate) -> StoreResult<()> {
        self.run(self.inner.update_metadata(key, update)).await
    }

    async fn get_metadata(&self, key: &str) -> StoreResult<StoredObject> {
        self.run(self.inner.get_metadata(key)).await
    }

    async fn delete(&self, key: &str, resource_type: ResourceType) -> StoreResult<()> {
        self.run(self.inner.delete(key, resource_type)).await
    }

    async fn signed_url(
        &self,
        key: &str,
        resource_type: ResourceType,
        expires_at: i64,
    ) -> StoreResult<String> {
        self.run(self.inner.signed_url(key, resource_type, expires_at)).await
    }
}
