//! Policy retrieval point (PRP).
//!
//! Read-through cache in front of a [`PolicyStore`]. Cached state lives in an
//! immutable snapshot behind an [`ArcSwap`]: readers take a lock-free load,
//! misses build a new snapshot and swap it in, and [`invalidate`] replaces
//! the whole snapshot with an empty one.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_policy::retrieval::PolicyRetrievalPoint;
//!
//! let prp = PolicyRetrievalPoint::new(store);
//! let url_policies = prp.find_url_policies().await?;
//! let method_policies = prp.find_method_policies("svc.Orders.get(long)").await?;
//!
//! // After any policy mutation
//! prp.invalidate();
//! ```
//!
//! [`invalidate`]: PolicyRetrievalPoint::invalidate

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::PolicyResult;
use crate::model::Policy;
use crate::storage::{PolicyStore, sort_by_priority};

// =============================================================================
// Cached Snapshot
// =============================================================================

/// Immutable cache generation.
#[derive(Default)]
struct CachedPolicies {
    /// All URL-target policies, once loaded.
    url_policies: Option<Arc<Vec<Policy>>>,

    /// Method policies by canonical signature.
    by_signature: HashMap<String, Arc<Vec<Policy>>>,

    /// Generation counter, incremented on each invalidation.
    version: u64,
}

// =============================================================================
// Policy Retrieval Point
// =============================================================================

/// Cached read path to persisted policies.
pub struct PolicyRetrievalPoint {
    /// Underlying policy store.
    store: Arc<dyn PolicyStore>,

    /// Current cache generation.
    cache: ArcSwap<CachedPolicies>,
}

impl PolicyRetrievalPoint {
    /// Create a gateway with an empty cache.
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            cache: ArcSwap::from_pointee(CachedPolicies::default()),
        }
    }

    /// All URL-target policies in ascending priority order.
    ///
    /// # Errors
    ///
    /// Propagates `PolicyError::Retrieval` from the store. Nothing is cached
    /// on failure and the call is not retried.
    pub async fn find_url_policies(&self) -> PolicyResult<Arc<Vec<Policy>>> {
        let snapshot = self.cache.load_full();
        if let Some(ref policies) = snapshot.url_policies {
            return Ok(policies.clone());
        }

        let mut loaded = self.store.load_url_policies().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to load URL policies");
        })?;
        sort_by_priority(&mut loaded);
        let loaded = Arc::new(loaded);

        let generation = snapshot.version;
        self.cache.rcu(|current| {
            if current.version != generation {
                // Invalidated while loading: keep the newer, empty generation.
                return Arc::clone(current);
            }
            Arc::new(CachedPolicies {
                url_policies: Some(loaded.clone()),
                by_signature: current.by_signature.clone(),
                version: current.version,
            })
        });

        tracing::debug!(
            policies = loaded.len(),
            version = generation,
            "URL policies loaded into cache"
        );

        Ok(loaded)
    }

    /// Policies targeting one canonical signature, in ascending priority order.
    ///
    /// # Errors
    ///
    /// Propagates `PolicyError::Retrieval` from the store.
    pub async fn find_method_policies(&self, signature: &str) -> PolicyResult<Arc<Vec<Policy>>> {
        let snapshot = self.cache.load_full();
        if let Some(policies) = snapshot.by_signature.get(signature) {
            return Ok(policies.clone());
        }

        let mut loaded = self
            .store
            .load_method_policies(signature)
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, signature, "Failed to load method policies");
            })?;
        sort_by_priority(&mut loaded);
        let loaded = Arc::new(loaded);

        let generation = snapshot.version;
        self.cache.rcu(|current| {
            if current.version != generation {
                return Arc::clone(current);
            }
            let mut by_signature = current.by_signature.clone();
            by_signature.insert(signature.to_string(), loaded.clone());
            Arc::new(CachedPolicies {
                url_policies: current.url_policies.clone(),
                by_signature,
                version: current.version,
            })
        });

        tracing::debug!(
            signature,
            policies = loaded.len(),
            "Method policies loaded into cache"
        );

        Ok(loaded)
    }

    /// Drop every cached entry.
    ///
    /// Call this after any policy change (create, update, delete).
    pub fn invalidate(&self) {
        let previous = self.cache.rcu(|current| {
            Arc::new(CachedPolicies {
                version: current.version + 1,
                ..Default::default()
            })
        });
        tracing::debug!(
            version = previous.version + 1,
            "Policy retrieval cache invalidated"
        );
    }

    /// Get the current cache generation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.cache.load().version
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> RetrievalStats {
        let cache = self.cache.load();
        RetrievalStats {
            version: cache.version,
            url_policies_cached: cache.url_policies.is_some(),
            url_policy_count: cache.url_policies.as_ref().map_or(0, |p| p.len()),
            cached_signatures: cache.by_signature.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics about the retrieval cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalStats {
    /// Current cache generation.
    pub version: u64,

    /// Whether URL policies are currently cached.
    pub url_policies_cached: bool,

    /// Number of cached URL policies.
    pub url_policy_count: usize,

    /// Number of cached method signatures.
    pub cached_signatures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use crate::model::{Effect, PolicyTarget};
    use crate::storage::InMemoryPolicyStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -------------------------------------------------------------------------
    // Mock Store
    // -------------------------------------------------------------------------

    struct CountingStore {
        inner: InMemoryPolicyStore,
        url_calls: AtomicUsize,
        method_calls: AtomicUsize,
    }

    impl CountingStore {
        fn new(policies: Vec<Policy>) -> Self {
            Self {
                inner: InMemoryPolicyStore::with_policies(policies),
                url_calls: AtomicUsize::new(0),
                method_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PolicyStore for CountingStore {
        async fn load_url_policies(&self) -> PolicyResult<Vec<Policy>> {
            self.url_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.load_url_policies().await
        }

        async fn load_method_policies(&self, signature: &str) -> PolicyResult<Vec<Policy>> {
            self.method_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.load_method_policies(signature).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl PolicyStore for FailingStore {
        async fn load_url_policies(&self) -> PolicyResult<Vec<Policy>> {
            Err(PolicyError::retrieval("connection refused"))
        }

        async fn load_method_policies(&self, _signature: &str) -> PolicyResult<Vec<Policy>> {
            Err(PolicyError::retrieval("connection refused"))
        }
    }

    fn create_policy(id: &str, priority: i32, target: PolicyTarget) -> Policy {
        Policy::new(id, format!("Policy {}", id), Effect::Allow)
            .with_priority(priority)
            .with_target(target)
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_url_policies_read_through() {
        let store = Arc::new(CountingStore::new(vec![
            create_policy("p1", 100, PolicyTarget::url("/a")),
            create_policy("p2", 50, PolicyTarget::url("/b")),
        ]));
        let prp = PolicyRetrievalPoint::new(store.clone());

        let first = prp.find_url_policies().await.unwrap();
        let second = prp.find_url_policies().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, "p2");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.url_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_method_policies_cached_per_signature() {
        let store = Arc::new(CountingStore::new(vec![
            create_policy("m1", 10, PolicyTarget::method("svc.A.run()")),
            create_policy("m2", 10, PolicyTarget::method("svc.B.run()")),
        ]));
        let prp = PolicyRetrievalPoint::new(store.clone());

        assert_eq!(prp.find_method_policies("svc.A.run()").await.unwrap().len(), 1);
        assert_eq!(prp.find_method_policies("svc.A.run()").await.unwrap().len(), 1);
        assert_eq!(prp.find_method_policies("svc.B.run()").await.unwrap().len(), 1);
        assert!(prp.find_method_policies("svc.C.run()").await.unwrap().is_empty());

        assert_eq!(store.method_calls.load(Ordering::SeqCst), 3);
        assert_eq!(prp.stats().cached_signatures, 3);
    }

    #[tokio::test]
    async fn test_invalidate_clears_everything() {
        let store = Arc::new(CountingStore::new(vec![
            create_policy("p1", 1, PolicyTarget::url("/a")),
            create_policy("m1", 1, PolicyTarget::method("svc.A.run()")),
        ]));
        let prp = PolicyRetrievalPoint::new(store.clone());

        prp.find_url_policies().await.unwrap();
        prp.find_method_policies("svc.A.run()").await.unwrap();
        let stats = prp.stats();
        assert!(stats.url_policies_cached);
        assert_eq!(stats.url_policy_count, 1);
        assert_eq!(stats.version, 0);

        prp.invalidate();

        let stats = prp.stats();
        assert!(!stats.url_policies_cached);
        assert_eq!(stats.cached_signatures, 0);
        assert_eq!(stats.version, 1);

        prp.find_url_policies().await.unwrap();
        prp.find_method_policies("svc.A.run()").await.unwrap();
        assert_eq!(store.url_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.method_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_changes() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let prp = PolicyRetrievalPoint::new(store.clone());

        assert!(prp.find_url_policies().await.unwrap().is_empty());

        store
            .upsert(create_policy("p1", 1, PolicyTarget::url("/a")))
            .unwrap();
        assert!(prp.find_url_policies().await.unwrap().is_empty());

        prp.invalidate();
        assert_eq!(prp.find_url_policies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retrieval_failure_propagates_and_is_not_cached() {
        let prp = PolicyRetrievalPoint::new(Arc::new(FailingStore));

        let err = prp.find_url_policies().await.unwrap_err();
        assert!(matches!(err, PolicyError::Retrieval { .. }));
        assert!(prp.find_method_policies("svc.A.run()").await.is_err());
        assert!(!prp.stats().url_policies_cached);
    }
}
