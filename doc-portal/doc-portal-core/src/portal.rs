use std::sync::Arc;

use crate::config::PortalConfig;
use crate::delete::DeletionCoordinator;
use crate::error::PortalResult;
use crate::events::{DocumentEvent, EventBus};
use crate::identity::{IdentityProvider, IdentityResolver};
use crate::model::{
    DeleteOutcome, Document, DocumentRef, Permission, SharingResult, SignedUrls, UploadMetadata,
};
use crate::sharing::writer::Grant;
use crate::sharing::{AclReader, AclWriter};
use crate::storage::{ObjectStore, ResourceTypeProbe, TimedStore};
use crate::upload::{DocumentUploader, FileUpload};
use crate::urls::UrlIssuer;

/// Entry point for the UI/API layer. Every store call made through the
/// portal is bounded by `store_timeout`.
pub struct DocumentPortal {
    config: Arc<PortalConfig>,
    identity: Arc<IdentityResolver>,
    uploader: DocumentUploader,
    writer: AclWriter,
    reader: AclReader,
    urls: UrlIssuer,
    deleter: DeletionCoordinator,
    events: EventBus,
}

impl DocumentPortal {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        identity: Arc<dyn IdentityProvider>,
        config: PortalConfig,
    ) -> Self {
        let config = Arc::new(config);
        let store: Arc<dyn ObjectStore> = Arc::new(TimedStore::new(store, config.store_timeout()));
        let identity = Arc::new(
            IdentityResolver::new(identity).with_concurrency(config.identity_concurrency),
        );
        let probe = Arc::new(ResourceTypeProbe::new(store.clone()));
        Self {
            uploader: DocumentUploader::new(store.clone(), probe.clone(), config.clone()),
            writer: AclWriter::new(store.clone(), probe.clone(), config.clone()),
            reader: AclReader::new(store.clone(), identity.clone(), config.clone()),
            urls: UrlIssuer::new(store.clone(), identity.clone(), config.clone()),
            deleter: DeletionCoordinator::new(store, probe, config.clone()),
            events: EventBus::new(),
            identity,
            config,
        }
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub async fn upload_document(
        &self,
        owner_id: &str,
        file: FileUpload,
        metadata: &UploadMetadata,
    ) -> PortalResult<DocumentRef> {
        let doc = self.uploader.upload(owner_id, file, metadata).await?;
        self.events.send(DocumentEvent::Uploaded {
            id: doc.id.clone(),
            owner_id: owner_id.to_string(),
            paged: doc.is_pdf_like,
        });
        Ok(doc)
    }

    /// Replace the full recipient set of a document. To revoke one recipient,
    /// pass the remaining ones.
    pub async fn set_sharing(
        &self,
        document_id: &str,
        owner_id: &str,
        recipient_ids: &[String],
        recipient_emails: &[String],
        permissions: &[Permission],
    ) -> PortalResult<SharingResult> {
        let grant = Grant {
            recipient_ids: recipient_ids.to_vec(),
            recipient_emails: recipient_emails.to_vec(),
            permissions: permissions.to_vec(),
        };
        let result = self.writer.set_sharing(document_id, owner_id, &grant).await?;
        let event = if grant.is_empty() {
            DocumentEvent::Unshared {
                id: document_id.to_string(),
                owner_id: owner_id.to_string(),
            }
        } else {
            DocumentEvent::Shared {
                id: document_id.to_string(),
                owner_id: owner_id.to_string(),
                recipients: recipient_ids
                    .iter()
                    .chain(recipient_emails)
                    .cloned()
                    .collect(),
            }
        };
        self.events.send(event);
        Ok(result)
    }

    pub async fn remove_sharing(&self, document_id: &str, owner_id: &str) -> PortalResult<SharingResult> {
        self.set_sharing(document_id, owner_id, &[], &[], &[]).await
    }

    pub async fn list_owned(&self, user_id: &str) -> PortalResult<Vec<Document>> {
        self.reader.list_owned(user_id).await
    }

    pub async fn list_shared_with_me(
        &self,
        user_id: &str,
        user_email: Option<&str>,
    ) -> PortalResult<Vec<Document>> {
        self.reader.list_shared_with(user_id, user_email).await
    }

    pub async fn issue_urls(
        &self,
        document_id: &str,
        requester_id: &str,
        expires_in_secs: Option<u64>,
    ) -> PortalResult<SignedUrls> {
        self.urls
            .issue(document_id, requester_id, None, expires_in_secs)
            .await
    }

    /// Like [`issue_urls`](Self::issue_urls) with the requester's email
    /// already known, e.g. from token claims.
    pub async fn issue_urls_for(
        &self,
        document_id: &str,
        requester_id: &str,
        requester_email: Option<&str>,
        expires_in_secs: Option<u64>,
    ) -> PortalResult<SignedUrls> {
        self.urls
            .issue(document_id, requester_id, requester_email, expires_in_secs)
            .await
    }

    pub async fn delete_document(&self, document_id: &str, owner_id: &str) -> PortalResult<DeleteOutcome> {
        let outcome = self.deleter.delete(document_id, owner_id).await?;
        self.events.send(DocumentEvent::Deleted {
            id: document_id.to_string(),
            owner_id: owner_id.to_string(),
        });
        Ok(outcome)
    }
}
