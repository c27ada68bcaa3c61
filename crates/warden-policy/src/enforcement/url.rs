//! Request-path enforcement.
//!
//! URL policies are compiled into an ordered mapping table of
//! `(path matcher, decision expression)` entries. The table is rebuilt as a
//! whole on reload and published with a single atomic swap, so a concurrent
//! request sees either the old table or the new one, never a mix.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use regex::Regex;
use tokio::sync::Mutex;

use super::compile::compile_policy;
use super::decision::{AccessDecision, DefaultDecision, DenyReason, EvaluationResult, MatchedPolicy};
use crate::PolicyResult;
use crate::authority::Subject;
use crate::context::{EvaluationContextBuilder, RequestDescriptor};
use crate::expr::ExpressionEngine;
use crate::model::{AuthorizationPhase, Effect, Policy, TargetType};
use crate::retrieval::PolicyRetrievalPoint;

// =============================================================================
// Path Matching
// =============================================================================

/// Ant-style path pattern.
///
/// - `?` matches one character other than `/`
/// - `*` matches zero or more characters within one segment
/// - `**` matches zero or more segments; `/x/**` also matches `/x`
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    regex: Regex,
    http_method: Option<String>,
}

impl PathMatcher {
    /// Compile a pattern with an optional HTTP method restriction.
    ///
    /// # Errors
    ///
    /// Returns an error if the translated pattern is not a valid regex.
    pub fn new(pattern: &str, http_method: Option<&str>) -> Result<Self, regex::Error> {
        let regex = Regex::new(&ant_to_regex(pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            http_method: http_method.map(str::to_uppercase),
        })
    }

    /// The original pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The HTTP method restriction, if any.
    #[must_use]
    pub fn http_method(&self) -> Option<&str> {
        self.http_method.as_deref()
    }

    /// Check whether a request method and path match.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        if let Some(ref required) = self.http_method
            && !required.eq_ignore_ascii_case(method)
        {
            return false;
        }
        self.regex.is_match(path)
    }
}

fn ant_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut rest = pattern;
    while let Some(ch) = rest.chars().next() {
        if rest == "/**" {
            out.push_str("(?:/.*)?");
            rest = "";
        } else if let Some(tail) = rest.strip_prefix("/**/") {
            out.push_str("/(?:.*/)?");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("**") {
            out.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            out.push_str("[^/]*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('?') {
            out.push_str("[^/]");
            rest = tail;
        } else {
            let mut buf = [0u8; 4];
            out.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
            rest = &rest[ch.len_utf8()..];
        }
    }

    out.push('$');
    out
}

// =============================================================================
// Mapping Table
// =============================================================================

/// One compiled URL target.
#[derive(Debug, Clone)]
pub struct UrlMapping {
    /// Path matcher built from the target.
    pub matcher: PathMatcher,
    /// Policy the target belongs to.
    pub policy_id: String,
    /// Policy name.
    pub policy_name: String,
    /// Policy effect.
    pub effect: Effect,
    /// PRE-phase decision expression.
    pub expression: String,
}

/// An immutable, ordered mapping table.
#[derive(Debug, Default)]
pub struct MappingTable {
    generation: u64,
    entries: Vec<UrlMapping>,
}

impl MappingTable {
    /// Build a table from URL policies already in priority order.
    ///
    /// Targets with invalid patterns are skipped with a warning.
    #[must_use]
    pub fn build(generation: u64, policies: &[Policy]) -> Self {
        let mut entries = Vec::new();

        for policy in policies {
            let expression = compile_policy(policy, AuthorizationPhase::Pre);

            for target in policy.targets_of(TargetType::Url) {
                match PathMatcher::new(&target.target_identifier, target.http_method.as_deref()) {
                    Ok(matcher) => entries.push(UrlMapping {
                        matcher,
                        policy_id: policy.id.clone(),
                        policy_name: policy.name.clone(),
                        effect: policy.effect,
                        expression: expression.clone(),
                    }),
                    Err(e) => {
                        tracing::warn!(
                            policy_id = %policy.id,
                            pattern = %target.target_identifier,
                            error = %e,
                            "Skipping invalid URL pattern"
                        );
                    }
                }
            }
        }

        Self {
            generation,
            entries,
        }
    }

    /// First entry matching the request.
    #[must_use]
    pub fn find(&self, method: &str, path: &str) -> Option<&UrlMapping> {
        self.entries.iter().find(|e| e.matcher.matches(method, path))
    }

    /// Reload generation that produced this table.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Entries in match order.
    #[must_use]
    pub fn entries(&self) -> &[UrlMapping] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// URL Policy Manager
// =============================================================================

/// Request-path enforcement point.
pub struct UrlPolicyManager {
    retrieval: Arc<PolicyRetrievalPoint>,
    contexts: EvaluationContextBuilder,
    engine: Arc<ExpressionEngine>,
    default_decision: DefaultDecision,
    table: ArcSwap<MappingTable>,
    generation: AtomicU64,
    /// Serializes reloads so the last one started is the last one published.
    reload_lock: Mutex<()>,
}

impl UrlPolicyManager {
    /// Create a manager with an empty table. Call [`reload`](Self::reload)
    /// before serving requests.
    #[must_use]
    pub fn new(
        retrieval: Arc<PolicyRetrievalPoint>,
        contexts: EvaluationContextBuilder,
        engine: Arc<ExpressionEngine>,
        default_decision: DefaultDecision,
    ) -> Self {
        Self {
            retrieval,
            contexts,
            engine,
            default_decision,
            table: ArcSwap::from_pointee(MappingTable::default()),
            generation: AtomicU64::new(0),
            reload_lock: Mutex::new(()),
        }
    }

    /// Create a manager and load the initial table.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if URL policies cannot be loaded.
    pub async fn init(
        retrieval: Arc<PolicyRetrievalPoint>,
        contexts: EvaluationContextBuilder,
        engine: Arc<ExpressionEngine>,
        default_decision: DefaultDecision,
    ) -> PolicyResult<Self> {
        let manager = Self::new(retrieval, contexts, engine, default_decision);
        manager.reload().await?;
        Ok(manager)
    }

    /// Rebuild the mapping table from current URL policies and publish it.
    ///
    /// The retrieval cache is invalidated first so the rebuild observes the
    /// latest stored policies. On failure the previous table stays active.
    /// Overlapping calls run one at a time, so once a reload returns the
    /// active table reflects a load that began after it was called.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if URL policies cannot be loaded.
    pub async fn reload(&self) -> PolicyResult<usize> {
        let _guard = self.reload_lock.lock().await;
        self.retrieval.invalidate();
        let policies = self.retrieval.find_url_policies().await?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let table = MappingTable::build(generation, &policies);
        let entries = table.len();

        self.table.store(Arc::new(table));

        tracing::info!(
            generation = generation,
            policies = policies.len(),
            entries = entries,
            "URL policy table reloaded"
        );

        Ok(entries)
    }

    /// Snapshot of the current mapping table.
    #[must_use]
    pub fn table(&self) -> Arc<MappingTable> {
        self.table.load_full()
    }

    /// Decide a request.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Authority` if the subject's authorities cannot
    /// be resolved. A denial is returned as `AccessDecision::Deny`.
    pub async fn check(
        &self,
        subject: &Subject,
        request: &RequestDescriptor,
    ) -> PolicyResult<AccessDecision> {
        Ok(self.check_with_audit(subject, request).await?.decision)
    }

    /// Decide a request, failing with `PolicyError::AccessDenied` on denial.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::AccessDenied` if access is denied, or the
    /// errors of [`check`](Self::check).
    pub async fn enforce(&self, subject: &Subject, request: &RequestDescriptor) -> PolicyResult<()> {
        self.check(subject, request).await?.into_result()
    }

    /// Decide a request and return audit details.
    ///
    /// # Errors
    ///
    /// See [`check`](Self::check).
    pub async fn check_with_audit(
        &self,
        subject: &Subject,
        request: &RequestDescriptor,
    ) -> PolicyResult<EvaluationResult> {
        let start = Instant::now();
        let table = self.table.load_full();

        let Some(entry) = table.find(&request.method, &request.path) else {
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                default = ?self.default_decision,
                "No URL policy matched"
            );
            return Ok(EvaluationResult {
                decision: self.default_decision.to_decision(),
                matched: None,
                expression: None,
                table_generation: table.generation(),
                evaluation_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            });
        };

        let mut ctx = self.contexts.for_request(subject, request).await?;
        let allowed = self.engine.evaluate(&entry.expression, &mut ctx);

        tracing::debug!(
            policy_id = %entry.policy_id,
            method = %request.method,
            path = %request.path,
            subject = %subject.name,
            allowed = allowed,
            "URL policy evaluated"
        );

        let decision = if allowed {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny(DenyReason::policy_denied(&entry.policy_id, &entry.policy_name))
        };

        Ok(EvaluationResult {
            decision,
            matched: Some(MatchedPolicy {
                policy_id: entry.policy_id.clone(),
                policy_name: entry.policy_name.clone(),
                pattern: entry.matcher.pattern().to_string(),
                http_method: entry.matcher.http_method().map(str::to_string),
            }),
            expression: Some(entry.expression.clone()),
            table_generation: table.generation(),
            evaluation_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
