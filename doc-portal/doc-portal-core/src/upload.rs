//! Dual-representation upload.
//!
//! Paged formats are stored twice: a preview the store renders, and the exact
//! original bytes at `{preview}_raw`. Everything else is a single object.

use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult, StoreError};
use crate::keys;
use crate::model::{
    DocumentRef, UploadMetadata, DOCUMENT_TYPE_KEY, MIME_TYPE_KEY, ORIGINAL_NAME_KEY,
    PREVIEW_KEY_KEY, SECURITY_LEVEL_KEY,
};
use crate::storage::{ObjectStore, PutOptions, ResourceType, ResourceTypeProbe};
use crate::tags;

/// An uploaded file as received from the caller.
#[derive(Clone, Debug)]
pub struct FileUpload {
    pub original_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

pub struct DocumentUploader {
    store: Arc<dyn ObjectStore>,
    probe: Arc<ResourceTypeProbe>,
    config: Arc<PortalConfig>,
}

impl DocumentUploader {
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

    pub async fn upload(
        &self,
        owner_id: &str,
        file: FileUpload,
        metadata: &UploadMetadata,
    ) -> PortalResult<DocumentRef> {
        self.upload_on(owner_id, file, metadata, Utc::now().date_naive())
            .await
    }

    pub async fn upload_on(
        &self,
        owner_id: &str,
        file: FileUpload,
        metadata: &UploadMetadata,
        upload_date: NaiveDate,
    ) -> PortalResult<DocumentRef> {
        if file.data.is_empty() {
            return Err(PortalError::InvalidArgument("file is empty".into()));
        }
        let plan = keys::plan_key(owner_id, &file.original_name, upload_date)?;
        let paged = self.config.is_paged(&file.mime_type);
        let base = tags::base_tags(owner_id, metadata.document_type.as_deref());

        let mut context = BTreeMap::from([
            (ORIGINAL_NAME_KEY.to_string(), file.original_name.clone()),
            (MIME_TYPE_KEY.to_string(), file.mime_type.clone()),
        ]);
        if let Some(doc_type) = &metadata.document_type {
            context.insert(DOCUMENT_TYPE_KEY.to_string(), doc_type.clone());
        }
        if let Some(level) = &metadata.security_level {
            context.insert(SECURITY_LEVEL_KEY.to_string(), level.clone());
        }

        let preview = self
            .store
            .put(
                &plan.key(),
                file.data.clone(),
                PutOptions {
                    tags: base.clone(),
                    context: context.clone(),
                    resource_type: ResourceType::Auto,
                    unique_name: true,
                    content_type: Some(file.mime_type.clone()),
                    ..PutOptions::default()
                },
            )
            .await
            .map_err(|err| upload_failed(&plan.key(), err, None))?;
        self.probe.remember(&preview.key, preview.resource_type);

        if !paged {
            info!(document_id = %preview.key, owner_id, "uploaded document");
            return Ok(DocumentRef {
                id: preview.key,
                is_pdf_like: false,
                raw_key: None,
            });
        }

        let raw_key = keys::raw_key_for(&preview.key);
        context.insert(PREVIEW_KEY_KEY.to_string(), preview.key.clone());
        let raw = self
            .store
            .put(
                &raw_key,
                file.data,
                PutOptions {
                    tags: base,
                    context,
                    resource_type: ResourceType::Raw,
                    overwrite: false,
                    content_type: Some(file.mime_type),
                    format: Some(preview.format.clone()),
                    ..PutOptions::default()
                },
            )
            .await
            .map_err(|err| {
                error!(document_id = %preview.key, raw_key = %raw_key, error = %err,
                    "raw upload failed, preview left without its original");
                upload_failed(&raw_key, err, Some(preview.key.clone()))
            })?;
        self.probe.remember(&raw.key, raw.resource_type);

        info!(document_id = %preview.key, raw_key = %raw.key, owner_id, pages = ?preview.pages,
            "uploaded paged document");
        Ok(DocumentRef {
            id: preview.key,
            is_pdf_like: true,
            raw_key: Some(raw.key),
        })
    }
}

fn upload_failed(key: &str, err: StoreError, orphaned_preview: Option<String>) -> PortalError {
    PortalError::UploadFailed {
        reason: format!("{key}: {err}"),
        orphaned_preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Fault, InMemoryObjectStore, StoreOp};

    fn setup() -> (Arc<InMemoryObjectStore>, DocumentUploader) {
        let store = Arc::new(InMemoryObjectStore::new());
        let probe = Arc::new(ResourceTypeProbe::new(store.clone()));
        let uploader =
            DocumentUploader::new(store.clone(), probe, Arc::new(PortalConfig::default()));
        (store, uploader)
    }

    fn file(name: &str, mime: &str) -> FileUpload {
        FileUpload {
            original_name: name.into(),
            mime_type: mime.into(),
            data: Bytes::from_static(b"%PDF-1.4\n<< /Type /Page >>\n%%EOF"),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    #[tokio::test]
    async fn paged_upload_stores_preview_and_raw() {
        let (store, uploader) = setup();
        let doc = uploader
            .upload_on("u1", file("Annual Report.pdf", "application/pdf"), &UploadMetadata::default(), day())
            .await
            .unwrap();
        assert!(doc.is_pdf_like);
        assert!(doc.id.starts_with("users/u1/documents/2024-05-01/Annual_Report_"));
        assert_eq!(doc.raw_key.as_deref(), Some(format!("{}_raw", doc.id).as_str()));
        assert!(store.contains(&doc.id));
        assert!(store.contains(doc.raw_key.as_deref().unwrap()));

        let raw = store.get_metadata(doc.raw_key.as_deref().unwrap()).await.unwrap();
        assert_eq!(raw.resource_type, ResourceType::Raw);
        assert_eq!(raw.format, "pdf");
        assert!(raw.tags.contains("owner:u1"));
    }

    #[tokio::test]
    async fn renderable_upload_is_single_object() {
        let (store, uploader) = setup();
        let meta = UploadMetadata {
            document_type: Some("ID Card".into()),
            security_level: Some("confidential".into()),
        };
        let doc = uploader
            .upload_on("u1", file("scan.png", "image/png"), &meta, day())
            .await
            .unwrap();
        assert!(!doc.is_pdf_like);
        assert_eq!(doc.raw_key, None);
        assert_eq!(store.len(), 1);
        let stored = store.get_metadata(&doc.id).await.unwrap();
        assert!(stored.tags.contains("doctype_id_card"));
        assert_eq!(stored.context.get(SECURITY_LEVEL_KEY).map(String::as_str), Some("confidential"));
    }

    #[tokio::test]
    async fn raw_failure_reports_orphaned_preview() {
        let (store, uploader) = setup();
        store.inject_failure(Fault::always(StoreOp::Put).matching("_raw"));
        let err = uploader
            .upload_on("u1", file("a.pdf", "application/pdf"), &UploadMetadata::default(), day())
            .await
            .unwrap_err();
        match err {
            PortalError::UploadFailed {
                orphaned_preview: Some(preview),
                ..
            } => assert!(store.contains(&preview)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        let (_, uploader) = setup();
        let empty = FileUpload {
            data: Bytes::new(),
            ..file("a.pdf", "application/pdf")
        };
        assert!(matches!(
            uploader.upload_on("u1", empty, &UploadMetadata::default(), day()).await,
            Err(PortalError::InvalidArgument(_))
        ));
        assert!(matches!(
            uploader
                .upload_on("", file("a.pdf", "application/pdf"), &UploadMetadata::default(), day())
                .await,
            Err(PortalError::InvalidArgument(_))
        ));
    }
}
