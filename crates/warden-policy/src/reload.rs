//! Policy hot-reload.
//!
//! Policy authoring code announces mutations through a
//! [`PolicyChangeNotifier`]. The [`PolicyReloadService`] listens, batches
//! bursts of changes behind a debounce window and rebuilds the URL mapping
//! table. A failed reload is logged and counted; the previous table stays
//! active and the next notification or periodic refresh tries again.
//!
//! # Example
//!
//! ```ignore
//! let notifier = Arc::new(PolicyChangeNotifier::new(config.channel_capacity));
//! let service = Arc::new(PolicyReloadService::new(url_manager, notifier.clone(), config));
//!
//! tokio::spawn({
//!     let service = service.clone();
//!     async move { service.run().await }
//! });
//!
//! store.upsert(policy)?;
//! notifier.notify(PolicyChange::Updated { policy_id: "admin-area".to_string() });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;

use crate::PolicyResult;
use crate::config::ReloadConfig;
use crate::enforcement::UrlPolicyManager;

// =============================================================================
// Policy Change Types
// =============================================================================

/// Types of policy changes that can trigger a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyChange {
    /// A new policy was created.
    Created {
        /// The ID of the created policy.
        policy_id: String,
    },
    /// An existing policy was updated.
    Updated {
        /// The ID of the updated policy.
        policy_id: String,
    },
    /// A policy was deleted.
    Deleted {
        /// The ID of the deleted policy.
        policy_id: String,
    },
    /// Request to reload all policies.
    BulkReload,
}

impl PolicyChange {
    /// Get the policy ID if this is a single-policy change.
    #[must_use]
    pub fn policy_id(&self) -> Option<&str> {
        match self {
            Self::Created { policy_id }
            | Self::Updated { policy_id }
            | Self::Deleted { policy_id } => Some(policy_id),
            Self::BulkReload => None,
        }
    }
}

// =============================================================================
// Policy Change Notifier
// =============================================================================

/// Broadcast channel for policy change notifications.
pub struct PolicyChangeNotifier {
    sender: broadcast::Sender<PolicyChange>,
}

impl PolicyChangeNotifier {
    /// Create a notifier holding at most `capacity` pending notifications.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Notify all subscribers of a policy change.
    ///
    /// If there are no subscribers, the notification is dropped.
    pub fn notify(&self, change: PolicyChange) {
        let _ = self.sender.send(change);
    }

    /// Subscribe to future notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyChange> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PolicyChangeNotifier {
    fn default() -> Self {
        Self::new(ReloadConfig::default().channel_capacity)
    }
}

// =============================================================================
// Reload Statistics
// =============================================================================

/// Statistics about the reload service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadStats {
    /// Total number of reload attempts.
    pub reload_attempts: u64,
    /// Number of successful reloads.
    pub successful_reloads: u64,
    /// Number of failed reloads.
    pub failed_reloads: u64,
    /// Number of notifications received.
    pub notifications_received: u64,
    /// Number of notifications folded into an already pending reload.
    pub notifications_debounced: u64,
}

// =============================================================================
// Policy Reload Service
// =============================================================================

/// Rebuilds the URL mapping table on policy change notifications.
pub struct PolicyReloadService {
    url_manager: Arc<UrlPolicyManager>,
    notifier: Arc<PolicyChangeNotifier>,
    config: ReloadConfig,

    shutdown: AtomicBool,
    shutdown_signal: Notify,

    reload_attempts: AtomicU64,
    successful_reloads: AtomicU64,
    failed_reloads: AtomicU64,
    notifications_received: AtomicU64,
    notifications_debounced: AtomicU64,
}

impl PolicyReloadService {
    #[must_use]
    pub fn new(
        url_manager: Arc<UrlPolicyManager>,
        notifier: Arc<PolicyChangeNotifier>,
        config: ReloadConfig,
    ) -> Self {
        Self {
            url_manager,
            notifier,
            config,
            shutdown: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
            reload_attempts: AtomicU64::new(0),
            successful_reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
            notifications_received: AtomicU64::new(0),
            notifications_debounced: AtomicU64::new(0),
        }
    }

    /// Run until [`shutdown`](Self::shutdown) is called or the notifier is
    /// dropped.
    pub async fn run(&self) {
        let mut receiver = self.notifier.subscribe();
        let debounce = self.config.debounce;
        let periodic = (!self.config.periodic_refresh.is_zero()).then_some(self.config.periodic_refresh);

        let mut pending_reload = false;
        let mut last_notification = Instant::now();
        let mut last_refresh = Instant::now();

        loop {
            if self.is_shutting_down() {
                tracing::info!("Policy reload service shutting down");
                break;
            }

            let deadline = match (pending_reload, periodic) {
                (true, Some(every)) => Some((last_notification + debounce).min(last_refresh + every)),
                (true, None) => Some(last_notification + debounce),
                (false, Some(every)) => Some(last_refresh + every),
                (false, None) => None,
            };

            tokio::select! {
                _ = self.shutdown_signal.notified() => {}

                result = receiver.recv() => {
                    match result {
                        Ok(change) => {
                            tracing::debug!(change = ?change, "Policy change received");
                            self.notifications_received.fetch_add(1, Ordering::Relaxed);
                            if pending_reload {
                                self.notifications_debounced.fetch_add(1, Ordering::Relaxed);
                            }
                            pending_reload = true;
                            last_notification = Instant::now();
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "Missed policy change notifications");
                            self.notifications_debounced.fetch_add(n, Ordering::Relaxed);
                            pending_reload = true;
                            last_notification = Instant::now();
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::info!("Policy change channel closed");
                            break;
                        }
                    }
                }

                _ = wait_until(deadline) => {
                    if pending_reload && last_notification.elapsed() >= debounce {
                        pending_reload = false;
                        self.perform_reload().await;
                        last_refresh = Instant::now();
                    } else if let Some(every) = periodic
                        && last_refresh.elapsed() >= every
                    {
                        tracing::debug!("Periodic policy refresh");
                        self.perform_reload().await;
                        last_refresh = Instant::now();
                    }
                }
            }
        }
    }

    async fn perform_reload(&self) {
        if let Err(e) = self.reload_now().await {
            tracing::error!(error = %e, "Policy reload failed, keeping previous table");
        }
    }

    /// Rebuild the URL mapping table once, without retrying.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if URL policies cannot be loaded.
    pub async fn reload_now(&self) -> PolicyResult<usize> {
        self.reload_attempts.fetch_add(1, Ordering::Relaxed);

        match self.url_manager.reload().await {
            Ok(entries) => {
                self.successful_reloads.fetch_add(1, Ordering::Relaxed);
                Ok(entries)
            }
            Err(e) => {
                self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Request a full reload through the notification channel.
    pub fn trigger_reload(&self) {
        self.notifier.notify(PolicyChange::BulkReload);
    }

    /// Signal the service to shut down.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.shutdown_signal.notify_one();
    }

    /// Check if the service is shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Get reload statistics.
    #[must_use]
    pub fn stats(&self) -> ReloadStats {
        ReloadStats {
            reload_attempts: self.reload_attempts.load(Ordering::Relaxed),
            successful_reloads: self.successful_reloads.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_debounced: self.notifications_debounced.load(Ordering::Relaxed),
        }
    }

    /// Get the underlying notifier.
    #[must_use]
    pub fn notifier(&self) -> &Arc<PolicyChangeNotifier> {
        &self.notifier
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::DirectAuthorityResolver;
    use crate::context::EvaluationContextBuilder;
    use crate::enforcement::DefaultDecision;
    use crate::error::PolicyError;
    use crate::expr::ExpressionEngine;
    use crate::model::{Effect, Policy, PolicyTarget};
    use crate::retrieval::PolicyRetrievalPoint;
    use crate::risk::RiskEngine;
    use crate::storage::{InMemoryPolicyStore, PolicyStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    // -------------------------------------------------------------------------
    // Mock Storage
    // -------------------------------------------------------------------------

    struct FlakyStore {
        inner: InMemoryPolicyStore,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl FlakyStore {
        fn new(policies: Vec<Policy>) -> Self {
            Self {
                inner: InMemoryPolicyStore::with_policies(policies),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PolicyStore for FlakyStore {
        async fn load_url_policies(&self) -> PolicyResult<Vec<Policy>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PolicyError::retrieval("Simulated storage failure"));
            }
            self.inner.load_url_policies().await
        }

        async fn load_method_policies(&self, signature: &str) -> PolicyResult<Vec<Policy>> {
            self.inner.load_method_policies(signature).await
        }
    }

    // -------------------------------------------------------------------------
    // Helper Functions
    // -------------------------------------------------------------------------

    fn create_policy(id: &str, pattern: &str) -> Policy {
        Policy::new(id, format!("Policy {}", id), Effect::Allow).with_target(PolicyTarget::url(pattern))
    }

    fn create_manager(store: Arc<dyn PolicyStore>) -> Arc<UrlPolicyManager> {
        Arc::new(UrlPolicyManager::new(
            Arc::new(PolicyRetrievalPoint::new(store)),
            EvaluationContextBuilder::new(Arc::new(DirectAuthorityResolver)),
            Arc::new(ExpressionEngine::new(Arc::new(RiskEngine::default()))),
            DefaultDecision::Deny,
        ))
    }

    fn create_service(store: Arc<dyn PolicyStore>, config: ReloadConfig) -> Arc<PolicyReloadService> {
        let notifier = Arc::new(PolicyChangeNotifier::new(config.channel_capacity));
        Arc::new(PolicyReloadService::new(create_manager(store), notifier, config))
    }

    // -------------------------------------------------------------------------
    // Notifier Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_policy_change_policy_id() {
        let change = PolicyChange::Deleted {
            policy_id: "p3".to_string(),
        };
        assert_eq!(change.policy_id(), Some("p3"));
        assert_eq!(PolicyChange::BulkReload.policy_id(), None);
    }

    #[tokio::test]
    async fn test_notifier_multiple_subscribers() {
        let notifier = PolicyChangeNotifier::new(16);
        let mut receiver1 = notifier.subscribe();
        let mut receiver2 = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.notify(PolicyChange::Updated {
            policy_id: "p1".to_string(),
        });

        assert_eq!(receiver1.recv().await.unwrap(), receiver2.recv().await.unwrap());
    }

    #[test]
    fn test_notifier_without_subscribers() {
        let notifier = PolicyChangeNotifier::default();
        notifier.notify(PolicyChange::BulkReload);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    // -------------------------------------------------------------------------
    // Service Tests
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_reload_now_failure_is_not_retried() {
        let store = Arc::new(FlakyStore::new(vec![create_policy("p1", "/a/**")]));
        let service = create_service(store.clone(), ReloadConfig::for_testing());

        service.reload_now().await.unwrap();
        let before = service.url_manager.table();

        store.fail.store(true, Ordering::SeqCst);
        assert!(service.reload_now().await.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);

        let stats = service.stats();
        assert_eq!(stats.reload_attempts, 2);
        assert_eq!(stats.successful_reloads, 1);
        assert_eq!(stats.failed_reloads, 1);

        // previous table survives
        assert!(Arc::ptr_eq(&before, &service.url_manager.table()));
    }

    #[tokio::test]
    async fn test_trigger_reload() {
        let service = create_service(Arc::new(InMemoryPolicyStore::new()), ReloadConfig::for_testing());
        let mut receiver = service.notifier().subscribe();

        service.trigger_reload();

        assert_eq!(receiver.recv().await.unwrap(), PolicyChange::BulkReload);
    }

    #[tokio::test]
    async fn test_service_run_with_notification() {
        let store = Arc::new(InMemoryPolicyStore::new());
        let service = create_service(store.clone(), ReloadConfig::for_testing());

        let handle = tokio::spawn({
            let service = service.clone();
            async move { service.run().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.upsert(create_policy("p1", "/reports/**")).unwrap();
        service.notifier().notify(PolicyChange::Created {
            policy_id: "p1".to_string(),
        });
        tokio::time::sleep(Duration::from_millis(80)).await;

        let table = service.url_manager.table();
        assert_eq!(table.len(), 1);
        assert!(table.find("GET", "/reports/q1").is_some());

        service.shutdown();
        let joined = tokio::time::timeout(Duration::from_millis(200), handle).await;
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn test_service_debouncing() {
        let config = ReloadConfig {
            debounce: Duration::from_millis(50),
            ..ReloadConfig::for_testing()
        };
        let service = create_service(Arc::new(InMemoryPolicyStore::new()), config);

        let handle = tokio::spawn({
            let service = service.clone();
            async move { service.run().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..5 {
            service.notifier().notify(PolicyChange::Updated {
                policy_id: format!("p{}", i),
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = service.stats();
        assert_eq!(stats.notifications_received, 5);
        assert_eq!(stats.notifications_debounced, 4);
        assert_eq!(stats.successful_reloads, 1);

        service.shutdown();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }

    #[tokio::test]
    async fn test_periodic_refresh() {
        let config = ReloadConfig {
            periodic_refresh: Duration::from_millis(30),
            ..ReloadConfig::for_testing()
        };
        let service = create_service(Arc::new(InMemoryPolicyStore::new()), config);

        let handle = tokio::spawn({
            let service = service.clone();
            async move { service.run().await }
        });
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(service.stats().successful_reloads >= 2);

        service.shutdown();
        let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
    }
}
