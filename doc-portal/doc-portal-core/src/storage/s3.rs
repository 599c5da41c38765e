//! S3-compatible object store.
//!
//! Object bytes live under their key. S3 object tagging is capped at ten
//! tags, far fewer than a grant with several recipients needs, so each
//! object's [`StoredObject`] metadata is kept in a JSON sidecar under
//! `meta_prefix`. Search lists the sidecars below the expression's folder
//! and evaluates the expression locally. S3 has no resource types, so
//! type parameters are recorded but never rejected.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::{
    format_of, pdf_page_count, random_suffix, sort_newest_first, uniquify, MetadataUpdate,
    ObjectStore, PutOptions, ResourceType, SearchExpr, StoredObject,
};
use crate::error::{StoreError, StoreResult};

const DEFAULT_META_PREFIX: &str = ".doc-portal/meta";
const SIDECAR_CONCURRENCY: usize = 16;

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    meta_prefix: String,
}

fn sdk_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    StoreError::Unavailable(DisplayErrorContext(&err).to_string())
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            meta_prefix: DEFAULT_META_PREFIX.to_string(),
        }
    }

    pub fn with_meta_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.meta_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    fn sidecar_key(&self, key: &str) -> String {
        format!("{}/{key}.json", self.meta_prefix)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(sdk_error(err))
                }
            }
        }
    }

    async fn load_sidecar(&self, sidecar_key: &str, key: &str) -> StoreResult<StoredObject> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(sidecar_key)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    StoreError::NotFound(key.to_string())
                } else {
                    sdk_error(err)
                }
            })?;
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .into_bytes();
        serde_json::from_slice(&body)
            .map_err(|e| StoreError::Unavailable(format!("corrupt metadata for {key}: {e}")))
    }

    async fn load(&self, key: &str) -> StoreResult<StoredObject> {
        self.load_sidecar(&self.sidecar_key(key), key).await
    }

    async fn save(&self, object: &StoredObject) -> StoreResult<()> {
        let body = serde_json::to_vec(object)
            .map_err(|e| StoreError::Rejected(format!("unserialisable metadata: {e}")))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.sidecar_key(&object.key))
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn list_sidecars(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(sdk_error)?;
            keys.extend(
                resp.contents()
                    .iter()
                    .filter_map(|o| o.key())
                    .filter(|k| k.ends_with(".json"))
                    .map(str::to_string),
            );
            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, data: Bytes, options: PutOptions) -> StoreResult<StoredObject> {
        let mut final_key = key.to_string();
        if options.unique_name {
            final_key = uniquify(key, &random_suffix());
            while self.exists(&final_key).await? {
                final_key = uniquify(key, &random_suffix());
            }
        } else if !options.overwrite && self.exists(key).await? {
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

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&final_key)
            .body(ByteStream::from(data));
        if let Some(content_type) = options.content_type {
            request = request.content_type(content_type);
        }
        request.send().await.map_err(sdk_error)?;
        self.save(&object).await?;
        debug!(key = %final_key, bucket = %self.bucket, "stored object");
        Ok(object)
    }

    async fn search(&self, expr: &SearchExpr, max_results: usize) -> StoreResult<Vec<StoredObject>> {
        let prefix = match expr.folder_prefix() {
            Some(folder) => format!("{}/{folder}/", self.meta_prefix),
            None => format!("{}/", self.meta_prefix),
        };
        let sidecars = self.list_sidecars(&prefix).await?;
        let strip = format!("{}/", self.meta_prefix);
        let mut found: Vec<StoredObject> = stream::iter(sidecars)
            .map(|sidecar| {
                let key = sidecar
                    .strip_prefix(&strip)
                    .and_then(|k| k.strip_suffix(".json"))
                    .unwrap_or_default()
                    .to_string();
                async move {
                    match self.load_sidecar(&sidecar, &key).await {
                        Ok(object) => Ok(Some(object)),
                        // Deleted between listing and loading.
                        Err(StoreError::NotFound(_)) => Ok(None),
                        Err(err) => Err(err),
                    }
                }
            })
            .buffer_unordered(SIDECAR_CONCURRENCY)
            .try_filter_map(|object| async move { Ok(object.filter(|o| expr.matches(o))) })
            .try_collect()
            .await?;
        sort_newest_first(&mut found);
        found.truncate(max_results);
        Ok(found)
    }

    async fn tag_explicit(
        &self,
        key: &str,
        _resource_type: ResourceType,
        tags: &BTreeSet<String>,
    ) -> StoreResult<()> {
        let mut object = self.load(key).await?;
        object.tags = tags.clone();
        self.save(&object).await
    }

    async fn add_tags(
        &self,
        tags: &BTreeSet<String>,
        keys: &[String],
        _resource_type: ResourceType,
    ) -> StoreResult<()> {
        for key in keys {
            let mut object = self.load(key).await?;
            object.tags.extend(tags.iter().cloned());
            self.save(&object).await?;
        }
        Ok(())
    }

    async fn update_metadata(&self, key: &str, update: MetadataUpdate) -> StoreResult<()> {
        let mut object = self.load(key).await?;
        update.apply(&mut object);
        self.save(&object).await
    }

    async fn get_metadata(&self, key: &str) -> StoreResult<StoredObject> {
        self.load(key).await
    }

    async fn delete(&self, key: &str, _resource_type: ResourceType) -> StoreResult<()> {
        // Confirms existence so a missing object reports NotFound.
        self.load(key).await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.sidecar_key(key))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn signed_url(
        &self,
        key: &str,
        _resource_type: ResourceType,
        expires_at: i64,
    ) -> StoreResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Rejected(e.to_string()))?
            .as_secs() as i64;
        let lifetime = expires_at - now;
        if lifetime <= 0 {
            return Err(StoreError::Rejected(format!(
                "expiry {expires_at} is not in the future"
            )));
        }
        // SigV4 embeds X-Amz-Date plus X-Amz-Expires; starting the signature at
        // a whole second makes their sum exactly `expires_at`.
        let config = PresigningConfig::builder()
            .start_time(UNIX_EPOCH + Duration::from_secs(now as u64))
            .expires_in(Duration::from_secs(lifetime as u64))
            .build()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(sdk_error)?;
        Ok(presigned.uri().to_string())
    }
}
