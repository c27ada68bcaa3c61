//! Policy persistence trait.
//!
//! Defines the read interface the engine needs from the policy store.
//! Aggregates are returned fully populated (targets, rules and conditions),
//! so no further round trips happen during evaluation.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::PolicyResult;
use crate::error::PolicyError;
use crate::model::{Policy, TargetType};

// =============================================================================
// Policy Store Trait
// =============================================================================

/// Read access to persisted policies.
///
/// # Example
///
/// ```ignore
/// use warden_policy::storage::PolicyStore;
///
/// async fn example(store: &impl PolicyStore) {
///     let policies = store.load_url_policies().await?;
///     for policy in policies {
///         println!("Policy: {} (priority: {})", policy.name, policy.priority);
///     }
/// }
/// ```
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Load every policy that carries at least one URL target.
    ///
    /// Results are sorted by priority (ascending).
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if the store cannot be read.
    async fn load_url_policies(&self) -> PolicyResult<Vec<Policy>>;

    /// Load the policies targeting one canonical operation signature.
    ///
    /// Results are sorted by priority (ascending).
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if the store cannot be read.
    async fn load_method_policies(&self, signature: &str) -> PolicyResult<Vec<Policy>>;
}

/// Sort policies by ascending priority, breaking ties by ID.
pub fn sort_by_priority(policies: &mut [Policy]) {
    policies.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// Policy store backed by a vector in memory.
///
/// Used by the CLI (loaded from a JSON file) and by tests. Writes are
/// expected to be followed by a gateway invalidation and an enforcement
/// reload, exactly as with a database-backed store.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl InMemoryPolicyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given policies.
    #[must_use]
    pub fn with_policies(policies: Vec<Policy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    /// Parse a JSON array of policies, validating each one.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if the document is malformed or a
    /// policy fails validation.
    pub fn from_json(json: &str) -> PolicyResult<Self> {
        let policies: Vec<Policy> = serde_json::from_str(json)
            .map_err(|e| PolicyError::retrieval(format!("invalid policy document: {}", e)))?;

        for policy in &policies {
            policy.validate().map_err(|e| {
                PolicyError::retrieval(format!("invalid policy '{}': {}", policy.id, e))
            })?;
        }

        Ok(Self::with_policies(policies))
    }

    /// Read and parse a JSON policy file.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::retrieval(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    /// Insert a policy, replacing any existing policy with the same ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn upsert(&self, policy: Policy) -> PolicyResult<()> {
        let mut policies = self.write()?;
        policies.retain(|p| p.id != policy.id);
        policies.push(policy);
        Ok(())
    }

    /// Remove a policy by ID. Returns `true` if a policy was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn remove(&self, id: &str) -> PolicyResult<bool> {
        let mut policies = self.write()?;
        let before = policies.len();
        policies.retain(|p| p.id != id);
        Ok(policies.len() != before)
    }

    /// Replace the whole policy set.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn replace_all(&self, replacement: Vec<Policy>) -> PolicyResult<()> {
        *self.write()? = replacement;
        Ok(())
    }

    /// All stored policies in priority order.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn snapshot(&self) -> PolicyResult<Vec<Policy>> {
        let mut policies = self.read()?.clone();
        sort_by_priority(&mut policies);
        Ok(policies)
    }

    /// Number of stored policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Returns `true` if no policies are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> PolicyResult<std::sync::RwLockReadGuard<'_, Vec<Policy>>> {
        self.policies
            .read()
            .map_err(|_| PolicyError::retrieval("policy store lock poisoned"))
    }

    fn write(&self) -> PolicyResult<std::sync::RwLockWriteGuard<'_, Vec<Policy>>> {
        self.policies
            .write()
            .map_err(|_| PolicyError::internal("policy store lock poisoned"))
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn load_url_policies(&self) -> PolicyResult<Vec<Policy>> {
        let mut policies: Vec<Policy> = self
            .read()?
            .iter()
            .filter(|p| p.has_target_type(TargetType::Url))
            .cloned()
            .collect();
        sort_by_priority(&mut policies);
        Ok(policies)
    }

    async fn load_method_policies(&self, signature: &str) -> PolicyResult<Vec<Policy>> {
        let mut policies: Vec<Policy> = self
            .read()?
            .iter()
            .filter(|p| p.targets_signature(signature))
            .cloned()
            .collect();
        sort_by_priority(&mut policies);
        Ok(policies)
    }
}
