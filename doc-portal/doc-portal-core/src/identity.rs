//! User id to display email resolution.
//!
//! Lookups go to an [`IdentityProvider`]; the [`IdentityResolver`] in front
//! of it caches answers for the life of the process and never lets a
//! provider failure reach its caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` when the user exists but has no email, or is unknown.
    async fn user_email(&self, user_id: &str) -> Result<Option<String>>;
}

/// Identity service reached over HTTP: `GET {base}/users/{id}` answering
/// `{"email": "..."}`.
pub struct HttpIdentityProvider {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct UserRecord {
    #[serde(default)]
    email: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn user_email(&self, user_id: &str) -> Result<Option<String>> {
        let url = format!("{}/users/{}", self.base_url, user_id);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("identity lookup for {user_id}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: UserRecord = resp
            .error_for_status()
            .with_context(|| format!("identity lookup for {user_id}"))?
            .json()
            .await
            .context("decoding identity response")?;
        Ok(record.email.filter(|e| !e.trim().is_empty()))
    }
}

/// Fixed id to email table.
#[derive(Default, Clone)]
pub struct StaticIdentityProvider {
    emails: BTreeMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>, email: impl Into<String>) -> Self {
        self.emails.insert(user_id.into(), email.into());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn user_email(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.emails.get(user_id).cloned())
    }
}

pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    cache: RwLock<HashMap<String, Option<String>>>,
    concurrency: usize,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            concurrency: 8,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Email for `user_id`, or `None` when unknown or the provider failed.
    pub async fn resolve(&self, user_id: &str) -> Option<String> {
        let hit = self.cache.read().get(user_id).cloned();
        if let Some(hit) = hit {
            return hit;
        }
        match self.provider.user_email(user_id).await {
            Ok(email) => {
                debug!(user_id, found = email.is_some(), "resolved identity");
                self.cache.write().insert(user_id.to_string(), email.clone());
                email
            }
            Err(err) => {
                warn!(user_id, error = %err, "identity lookup failed");
                None
            }
        }
    }

    /// Resolve several ids with bounded concurrency.
    pub async fn resolve_many<I>(&self, user_ids: I) -> HashMap<String, Option<String>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut unique: Vec<String> = user_ids.into_iter().collect();
        unique.sort();
        unique.dedup();
        stream::iter(unique)
            .map(|id| async move {
                let email = self.resolve(&id).await;
                (id, email)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then answers `{id}@example.com`.
    struct Flaky {
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for Flaky {
        async fn user_email(&self, user_id: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("identity service down");
            }
            Ok(Some(format!("{user_id}@example.com")))
        }
    }

    #[tokio::test]
    async fn caches_answers_including_misses() {
        let provider = StaticIdentityProvider::new().with_user("u1", "u1@example.com");
        let resolver = IdentityResolver::new(Arc::new(provider));
        assert_eq!(resolver.resolve("u1").await.as_deref(), Some("u1@example.com"));
        assert_eq!(resolver.resolve("ghost").await, None);
        assert_eq!(resolver.cached(), 2);
    }

    #[tokio::test]
    async fn failures_degrade_to_none_and_are_retried() {
        let provider = Arc::new(Flaky {
            failures: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
        });
        let resolver = IdentityResolver::new(provider.clone());
        assert_eq!(resolver.resolve("u2").await, None);
        assert_eq!(resolver.resolve("u2").await.as_deref(), Some("u2@example.com"));
        assert_eq!(resolver.resolve("u2").await.as_deref(), Some("u2@example.com"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resolve_many_deduplicates() {
        let provider = Arc::new(Flaky {
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let resolver = IdentityResolver::new(provider.clone()).with_concurrency(2);
        let resolved = resolver
            .resolve_many(["a", "b", "a", "c"].map(String::from))
            .await;
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved["b"].as_deref(), Some("b@example.com"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
