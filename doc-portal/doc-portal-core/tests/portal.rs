use bytes::Bytes;
use chrono::Utc;
use doc_portal_core::events::DocumentEvent;
use doc_portal_core::identity::StaticIdentityProvider;
use doc_portal_core::storage::{
    Fault, InMemoryObjectStore, MetadataUpdate, ObjectStore, PutOptions, ResourceType, SearchExpr,
    StoreOp, StoredObject,
};
use doc_portal_core::{
    Document, DocumentPortal, FileUpload, PortalConfig, PortalError, StoreResult, UploadMetadata,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

fn two_page_pdf() -> Bytes {
    Bytes::from_static(
        b"%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
4 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
%%EOF\n",
    )
}

fn pdf_upload(name: &str) -> FileUpload {
    FileUpload {
        original_name: name.into(),
        mime_type: "application/pdf".into(),
        data: two_page_pdf(),
    }
}

fn portal_with(store: Arc<InMemoryObjectStore>) -> DocumentPortal {
    let identity = StaticIdentityProvider::new()
        .with_user("U1", "user1@example.com")
        .with_user("U2", "user2@example.com");
    DocumentPortal::new(store, Arc::new(identity), PortalConfig::default())
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Re-run `query` until `done` accepts its result or the deadline passes.
async fn poll_until<F, Fut>(mut query: F, done: impl Fn(&[Document]) -> bool) -> Vec<Document>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<Document>, PortalError>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let docs = query().await.unwrap();
        if done(&docs) || tokio::time::Instant::now() >= deadline {
            return docs;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn upload_share_unshare_scenario() {
    let store = Arc::new(InMemoryObjectStore::new().with_visibility_lag(Duration::from_millis(100)));
    let portal = portal_with(store.clone());

    let doc = portal
        .upload_document("U1", pdf_upload("contract.pdf"), &UploadMetadata::default())
        .await
        .unwrap();
    assert!(doc.is_pdf_like);
    let raw_key = doc.raw_key.clone().unwrap();
    assert_eq!(raw_key, format!("{}_raw", doc.id));
    assert!(store.contains(&doc.id) && store.contains(&raw_key));

    let owned = poll_until(|| portal.list_owned("U1"), |d| d.len() == 1).await;
    assert_eq!(owned.len(), 1);
    assert!(owned[0].is_pdf_like);
    assert_eq!(owned[0].raw_key.as_deref(), Some(raw_key.as_str()));
    assert_eq!(owned[0].page_count, Some(2));
    assert_eq!(owned[0].original_name.as_deref(), Some("contract.pdf"));
    assert_eq!(owned[0].owner_email.as_deref(), Some("user1@example.com"));

    let shared = portal
        .set_sharing(&doc.id, "U1", &strings(&["U2"]), &strings(&["user2@example.com"]), &[])
        .await
        .unwrap();
    assert!(shared.success);
    assert!(shared.applied_tags.contains("isShared"));
    let raw_tags = store.get_metadata(&raw_key).await.unwrap().tags;
    assert!(raw_tags.contains("sharedWith_U2"));

    let for_u2 = poll_until(
        || portal.list_shared_with_me("U2", Some("user2@example.com")),
        |d| d.len() == 1,
    )
    .await;
    assert_eq!(for_u2.len(), 1);
    assert_eq!(for_u2[0].owner_id, "U1");
    assert_eq!(for_u2[0].owner_email.as_deref(), Some("user1@example.com"));
    assert!(for_u2[0].shared_with_emails.contains("user2@example.com"));

    portal.remove_sharing(&doc.id, "U1").await.unwrap();
    let after = poll_until(
        || portal.list_shared_with_me("U2", Some("user2@example.com")),
        |d| d.is_empty(),
    )
    .await;
    assert!(after.is_empty());
    assert_eq!(portal.list_owned("U1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn own_documents_never_show_up_as_shared_with_me() {
    let store = Arc::new(InMemoryObjectStore::new());
    let portal = portal_with(store);
    let doc = portal
        .upload_document("U1", pdf_upload("self.pdf"), &UploadMetadata::default())
        .await
        .unwrap();
    portal
        .set_sharing(&doc.id, "U1", &strings(&["U1", "U2"]), &strings(&["user1@example.com"]), &[])
        .await
        .unwrap();

    assert!(portal
        .list_shared_with_me("U1", Some("user1@example.com"))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(portal.list_shared_with_me("U2", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sharing_survives_a_failing_primary_strategy() {
    let store = Arc::new(InMemoryObjectStore::new());
    let portal = portal_with(store.clone());
    let doc = portal
        .upload_document("U1", pdf_upload("a.pdf"), &UploadMetadata::default())
        .await
        .unwrap();

    store.inject_failure(Fault::times(StoreOp::TagExplicit, 1).matching(doc.id.as_str()));
    let result = portal
        .set_sharing(&doc.id, "U1", &strings(&["U2"]), &[], &[])
        .await
        .unwrap();
    assert!(result.success);
    let ops: Vec<StoreOp> = store.calls().into_iter().map(|(op, _)| op).collect();
    let first_tag = ops.iter().position(|op| *op == StoreOp::TagExplicit).unwrap();
    assert_eq!(ops[first_tag + 1], StoreOp::AddTags);
    assert_eq!(portal.list_shared_with_me("U2", None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_strategies_surface_sharing_failed() {
    let store = Arc::new(InMemoryObjectStore::new());
    let portal = portal_with(store.clone());
    let doc = portal
        .upload_document("U1", pdf_upload("a.pdf"), &UploadMetadata::default())
        .await
        .unwrap();
    store.inject_failure(Fault::always(StoreOp::TagExplicit));
    store.inject_failure(Fault::always(StoreOp::AddTags));
    let err = portal
        .set_sharing(&doc.id, "U1", &strings(&["U2"]), &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::SharingFailed { .. }));
}

#[tokio::test]
async fn signed_url_expiry_is_exact() {
    let store = Arc::new(InMemoryObjectStore::new());
    let portal = portal_with(store.clone());
    let doc = portal
        .upload_document("U1", pdf_upload("a.pdf"), &UploadMetadata::default())
        .await
        .unwrap();

    let before = Utc::now().timestamp();
    let urls = portal.issue_urls(&doc.id, "U1", Some(60)).await.unwrap();
    let expected = before + 60;
    assert!((urls.expires_at.timestamp() - expected).abs() <= 1);
    assert_ne!(urls.download_url, urls.preview_url);
    assert!(urls.download_url.contains("/raw/"));
    assert!(store.verify_signed_url(&urls.download_url, urls.expires_at.timestamp()));
    assert!(store.verify_signed_url(&urls.preview_url, urls.expires_at.timestamp()));

    assert!(matches!(
        portal.issue_urls(&doc.id, "U2", Some(60)).await,
        Err(PortalError::AccessDenied(_))
    ));
    portal
        .set_sharing(&doc.id, "U1", &strings(&["U2"]), &[], &[])
        .await
        .unwrap();
    assert!(portal.issue_urls(&doc.id, "U2", Some(60)).await.is_ok());
}

#[tokio::test]
async fn deleting_removes_both_keys_or_reports_partial() {
    let store = Arc::new(InMemoryObjectStore::new());
    let portal = portal_with(store.clone());
    let mut events = portal.events().subscribe();

    let whole = portal
        .upload_document("U1", pdf_upload("whole.pdf"), &UploadMetadata::default())
        .await
        .unwrap();
    let outcome = portal.delete_document(&whole.id, "U1").await.unwrap();
    assert!(outcome.success && !outcome.partial);
    assert!(store.is_empty());

    let half = portal
        .upload_document("U1", pdf_upload("half.pdf"), &UploadMetadata::default())
        .await
        .unwrap();
    store.inject_failure(Fault::always(StoreOp::Delete).matching("_raw"));
    let err = portal.delete_document(&half.id, "U1").await.unwrap_err();
    assert!(matches!(err, PortalError::PartialDelete { .. }));
    assert!(!store.contains(&half.id));
    assert!(store.contains(half.raw_key.as_deref().unwrap()));

    assert!(matches!(events.recv().await.unwrap(), DocumentEvent::Uploaded { .. }));
    assert!(matches!(events.recv().await.unwrap(), DocumentEvent::Deleted { .. }));
    assert!(matches!(events.recv().await.unwrap(), DocumentEvent::Uploaded { .. }));
}

#[tokio::test]
async fn raw_looking_file_names_stay_manageable() {
    let store = Arc::new(InMemoryObjectStore::new());
    let portal = portal_with(store.clone());
    let upload = FileUpload {
        original_name: "notes.txt_raw".into(),
        mime_type: "text/plain".into(),
        data: Bytes::from_static(b"meeting notes"),
    };
    let doc = portal
        .upload_document("U1", upload, &UploadMetadata::default())
        .await
        .unwrap();
    assert!(!doc.id.ends_with("_raw"), "{}", doc.id);

    let owned = portal.list_owned("U1").await.unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].id, doc.id);
    assert_eq!(owned[0].original_name.as_deref(), Some("notes.txt_raw"));

    portal
        .set_sharing(&doc.id, "U1", &strings(&["U2"]), &[], &[])
        .await
        .unwrap();
    let shared = portal.list_shared_with_me("U2", None).await.unwrap();
    assert_eq!(shared.len(), 1);
    portal.issue_urls(&doc.id, "U2", Some(60)).await.unwrap();

    portal.delete_document(&doc.id, "U1").await.unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn slow_store_calls_time_out() {
    struct Slow(InMemoryObjectStore);

    #[async_trait::async_trait]
    impl ObjectStore for Slow {
        async fn put(
            &self,
            key: &str,
            data: Bytes,
            options: PutOptions,
        ) -> StoreResult<StoredObject> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            self.0.put(key, data, options).await
        }
        async fn search(
            &self,
            expr: &SearchExpr,
            max: usize,
        ) -> StoreResult<Vec<StoredObject>> {
            self.0.search(expr, max).await
        }
        async fn tag_explicit(
            &self,
            key: &str,
            rt: ResourceType,
            tags: &BTreeSet<String>,
        ) -> StoreResult<()> {
            self.0.tag_explicit(key, rt, tags).await
        }
        async fn add_tags(
            &self,
            tags: &BTreeSet<String>,
            keys: &[String],
            rt: ResourceType,
        ) -> StoreResult<()> {
            self.0.add_tags(tags, keys, rt).await
        }
        async fn update_metadata(
            &self,
            key: &str,
            update: MetadataUpdate,
        ) -> StoreResult<()> {
            self.0.update_metadata(key, update).await
        }
        async fn get_metadata(
            &self,
            key: &str,
        ) -> StoreResult<StoredObject> {
            self.0.get_metadata(key).await
        }
        async fn delete(
            &self,
            key: &str,
            rt: ResourceType,
        ) -> StoreResult<()> {
            self.0.delete(key, rt).await
        }
        async fn signed_url(
            &self,
            key: &str,
            rt: ResourceType,
            expires_at: i64,
        ) -> StoreResult<String> {
            self.0.signed_url(key, rt, expires_at).await
        }
    }

    let config = PortalConfig {
        store_timeout_secs: 1,
        ..PortalConfig::default()
    };
    let portal = DocumentPortal::new(
        Arc::new(Slow(InMemoryObjectStore::new())),
        Arc::new(StaticIdentityProvider::new()),
        config,
    );
    let err = portal
        .upload_document("U1", pdf_upload("a.pdf"), &UploadMetadata::default())
        .await
        .unwrap_err();
    match err {
        PortalError::UploadFailed { reason, orphaned_preview } => {
            assert!(reason.contains("timed out"));
            assert_eq!(orphaned_preview, None);
        }
        other => panic!("unexpected {other:?}"),
    }
}
