//! Listings rebuilt from tag search.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::error::{PortalError, PortalResult};
use crate::identity::IdentityResolver;
use crate::keys;
use crate::model::Document;
use crate::storage::{newest_first, sort_newest_first, ObjectStore, SearchExpr, StoredObject};
use crate::tags::{self, ShareState};

/// One "shared with me" search. `verify` strategies only keep hits whose
/// decoded grant names the caller; the email search needs it because the
/// sanitized tag it matches on is lossy.
struct SharedSearch {
    name: &'static str,
    expr: SearchExpr,
    verify: bool,
}

pub struct AclReader {
    store: Arc<dyn ObjectStore>,
    identity: Arc<IdentityResolver>,
    config: Arc<PortalConfig>,
}

impl AclReader {
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

    /// Documents under the user's own folder, newest first.
    pub async fn list_owned(&self, user_id: &str) -> PortalResult<Vec<Document>> {
        let root = keys::user_root(user_id)?;
        // Raw copies share the folder, leave room for them before filtering.
        let found = self
            .store
            .search(&SearchExpr::folder(root), self.config.list_limit.saturating_mul(2))
            .await
            .map_err(PortalError::from_store)?;
        let owner_email = self.identity.resolve(user_id).await;

        let mut objects: Vec<StoredObject> = found
            .into_iter()
            .filter(|o| !keys::is_raw_key(&o.key))
            .collect();
        sort_newest_first(&mut objects);
        objects.truncate(self.config.list_limit);

        debug!(user_id, count = objects.len(), "listed owned documents");
        Ok(objects
            .into_iter()
            .map(|o| super::to_document(o, user_id.to_string(), owner_email.clone(), &self.config))
            .collect())
    }

    /// Documents other users have shared with `user_id`. Without a known
    /// email only id-based grants are found; nothing is returned unverified.
    pub async fn list_shared_with(
        &self,
        user_id: &str,
        user_email: Option<&str>,
    ) -> PortalResult<Vec<Document>> {
        keys::validate_user_id(user_id)?;
        let email = match user_email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) => Some(email.to_string()),
            None => self.identity.resolve(user_id).await,
        };

        tokio::time::timeout(
            self.config.search_timeout(),
            self.compose_shared(user_id, email.as_deref()),
        )
        .await
        .map_err(|_| {
            PortalError::StoreUnavailable(format!(
                "shared-with-me search exceeded {:?}",
                self.config.search_timeout()
            ))
        })?
    }

    fn shared_searches(user_id: &str, email: Option<&str>) -> Vec<SharedSearch> {
        let mut searches = Vec::with_capacity(3);
        if let Some(email) = email {
            searches.push(SharedSearch {
                name: "email",
                expr: SearchExpr::tag(tags::email_tag(email))
                    .or(SearchExpr::tag(tags::email_encoded_tag(email))),
                verify: true,
            });
        }
        searches.push(SharedSearch {
            name: "recipient",
            expr: SearchExpr::tag(tags::recipient_search_tag(user_id))
                .or(SearchExpr::tag(tags::recipient_tag(user_id))),
            verify: false,
        });
        searches.push(SharedSearch {
            name: "shared",
            expr: SearchExpr::tag(tags::SHARED_TAG),
            verify: true,
        });
        searches
    }

    async fn compose_shared(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> PortalResult<Vec<Document>> {
        let searches = Self::shared_searches(user_id, email);
        let results = join_all(searches.iter().map(|s| async move {
            match self.store.search(&s.expr, self.config.list_limit).await {
                Ok(found) => {
                    debug!(strategy = s.name, expr = %s.expr, hits = found.len(), "shared search");
                    found
                }
                Err(err) => {
                    warn!(strategy = s.name, expr = %s.expr, error = %err,
                        "shared search failed, continuing without it");
                    Vec::new()
                }
            }
        }))
        .await;

        let mut candidates: BTreeMap<String, (StoredObject, String)> = BTreeMap::new();
        for (search, found) in searches.iter().zip(results) {
            for object in found {
                if candidates.contains_key(&object.key) || keys::is_raw_key(&object.key) {
                    continue;
                }
                let state = ShareState::from_tags(&object.tags);
                if search.verify && !state.includes(user_id, email) {
                    continue;
                }
                let Some(owner_id) = state.owner_id.or_else(|| keys::owner_from_key(&object.key))
                else {
                    debug!(key = %object.key, "skipping shared object without owner");
                    continue;
                };
                if owner_id == user_id || keys::is_owned_by(&object.key, user_id) {
                    continue;
                }
                candidates.insert(object.key.clone(), (object, owner_id));
            }
        }

        let owner_emails = self
            .identity
            .resolve_many(candidates.values().map(|(_, owner)| owner.clone()))
            .await;
        let mut objects: Vec<(StoredObject, String)> = candidates.into_values().collect();
        objects.sort_by(|(a, _), (b, _)| newest_first(a, b));
        objects.truncate(self.config.list_limit);

        info!(user_id, count = objects.len(), "listed documents shared with user");
        Ok(objects
            .into_iter()
            .map(|(object, owner_id)| {
                let owner_email = owner_emails.get(&owner_id).cloned().flatten();
                super::to_document(object, owner_id, owner_email, &self.config)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentityProvider;
    use crate::storage::{Fault, InMemoryObjectStore, PutOptions, StoreOp};
    use bytes::Bytes;
    use std::collections::BTreeSet;

    fn reader(store: Arc<InMemoryObjectStore>) -> AclReader {
        let provider = StaticIdentityProvider::new()
            .with_user("u1", "u1@example.com")
            .with_user("u2", "u2@example.com");
        AclReader::new(
            store,
            Arc::new(IdentityResolver::new(Arc::new(provider))),
            Arc::new(PortalConfig::default()),
        )
    }

    async fn put(store: &InMemoryObjectStore, key: &str, tag_list: &[String]) {
        store
            .put(
                key,
                Bytes::from_static(b"x"),
                PutOptions {
                    tags: tag_list.iter().cloned().collect::<BTreeSet<_>>(),
                    ..PutOptions::default()
                },
            )
            .await
            .unwrap();
    }

    fn grant(owner: &str, ids: &[&str], emails: &[&str]) -> Vec<String> {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        let emails: Vec<String> = emails.iter().map(|s| s.to_string()).collect();
        tags::sharing_tags(owner, &ids, &emails)
            .unwrap()
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn owned_listing_hides_raw_copies() {
        let store = Arc::new(InMemoryObjectStore::new());
        put(&store, "users/u1/documents/2024-05-01/a.pdf", &[]).await;
        put(&store, "users/u1/documents/2024-05-01/a.pdf_raw", &[]).await;
        put(&store, "users/u10/documents/2024-05-01/b.pdf", &[]).await;
        let docs = reader(store).list_owned("u1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "users/u1/documents/2024-05-01/a.pdf");
        assert_eq!(docs[0].owner_email.as_deref(), Some("u1@example.com"));
    }

    #[tokio::test]
    async fn shared_listing_merges_strategies_and_excludes_own() {
        let store = Arc::new(InMemoryObjectStore::new());
        put(&store, "users/u1/documents/d/by-id.pdf", &grant("u1", &["u2"], &[])).await;
        put(&store, "users/u1/documents/d/by-email.pdf", &grant("u1", &[], &["u2@example.com"])).await;
        put(&store, "users/u3/documents/d/other.pdf", &grant("u3", &["u4"], &[])).await;
        put(&store, "users/u2/documents/d/mine.pdf", &grant("u2", &["u2"], &[])).await;
        put(&store, "loose/file.pdf", &["isShared".to_string(), "sharedWith_u2".to_string()]).await;

        let docs = reader(store)
            .list_shared_with("u2", Some("u2@example.com"))
            .await
            .unwrap();
        let ids: BTreeSet<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            BTreeSet::from(["users/u1/documents/d/by-email.pdf", "users/u1/documents/d/by-id.pdf"])
        );
        assert!(docs.iter().all(|d| d.owner_id == "u1"));
        assert!(docs.iter().all(|d| d.owner_email.as_deref() == Some("u1@example.com")));
    }

    #[tokio::test]
    async fn failing_strategy_does_not_sink_the_listing() {
        let store = Arc::new(InMemoryObjectStore::new());
        put(&store, "users/u1/documents/d/a.pdf", &grant("u1", &["u2"], &[])).await;
        store.inject_failure(Fault::always(StoreOp::Search).matching("sharedWith_u2"));
        let docs = reader(store.clone()).list_shared_with("u2", None).await.unwrap();
        assert_eq!(docs.len(), 1);

        store.inject_failure(Fault::always(StoreOp::Search));
        let docs = reader(store).list_shared_with("u2", None).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn lookalike_emails_are_not_recipients() {
        let store = Arc::new(InMemoryObjectStore::new());
        let key = "users/u1/documents/d/secret.txt";
        put(&store, key, &grant("u1", &[], &["a.b@x.com"])).await;
        let reader = reader(store);

        let docs = reader.list_shared_with("u9", Some("a_b@x.com")).await.unwrap();
        assert!(docs.is_empty());

        let docs = reader.list_shared_with("u9", Some("A.B@x.com")).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, key);
    }

    #[tokio::test]
    async fn legacy_sanitized_grants_are_still_found() {
        let store = Arc::new(InMemoryObjectStore::new());
        let legacy: Vec<String> = ["isShared", "owner_u1", "sharedEmail_u2_example_com"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        put(&store, "users/u1/documents/d/old.pdf", &legacy).await;
        let docs = reader(store)
            .list_shared_with("u2", Some("u2@example.com"))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].owner_id, "u1");
    }

    #[tokio::test]
    async fn equal_timestamps_list_in_key_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let later = chrono::DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        for (key, created_at) in [
            ("users/u1/documents/d/c.pdf", at),
            ("users/u1/documents/d/a.pdf", at),
            ("users/u1/documents/d/b.pdf", at),
            ("users/u1/documents/d/z.pdf", later),
        ] {
            put(&store, key, &grant("u1", &["u2"], &[])).await;
            store.set_created_at(key, created_at).unwrap();
        }
        let reader = reader(store);
        let expected = [
            "users/u1/documents/d/z.pdf",
            "users/u1/documents/d/a.pdf",
            "users/u1/documents/d/b.pdf",
            "users/u1/documents/d/c.pdf",
        ];

        let owned = reader.list_owned("u1").await.unwrap();
        let ids: Vec<_> = owned.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, expected);

        let shared = reader.list_shared_with("u2", None).await.unwrap();
        let ids: Vec<_> = shared.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn unknown_email_never_returns_unrelated_shares() {
        let store = Arc::new(InMemoryObjectStore::new());
        put(&store, "users/u1/documents/d/a.pdf", &grant("u1", &[], &["someone@example.com"])).await;
        let docs = reader(store).list_shared_with("u9", None).await.unwrap();
        assert!(docs.is_empty());
    }
}
