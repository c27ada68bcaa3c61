//! Assembled policy engine.
//!
//! [`PolicyEngine`] wires the retrieval point, context builder, expression
//! engine and both enforcement points from one [`PolicyEngineConfig`], the
//! way an application sets the engine up at startup.
//!
//! # Example
//!
//! ```ignore
//! let engine = PolicyEngine::builder(store)
//!     .with_config(PolicyEngineConfig::from_toml_file("warden.toml")?)
//!     .with_authority_resolver(Arc::new(directory))
//!     .with_permission_catalog(catalog)
//!     .build()
//!     .await?;
//!
//! let decision = engine.url_manager().check(&subject, &request).await?;
//! ```

use std::sync::Arc;

use crate::PolicyResult;
use crate::authority::{AuthorityResolver, DirectAuthorityResolver, PermissionCatalog};
use crate::config::PolicyEngineConfig;
use crate::context::EvaluationContextBuilder;
use crate::enforcement::{MethodSecurityInterceptor, UrlPolicyManager};
use crate::expr::{CatalogPermissionEvaluator, ConditionFunction, ExpressionEngine};
use crate::pip::AttributeSource;
use crate::reload::{PolicyChangeNotifier, PolicyReloadService};
use crate::retrieval::PolicyRetrievalPoint;
use crate::risk::{RiskEngine, RiskFactorEvaluator};
use crate::storage::PolicyStore;

/// A fully wired policy engine.
pub struct PolicyEngine {
    config: PolicyEngineConfig,
    retrieval: Arc<PolicyRetrievalPoint>,
    contexts: EvaluationContextBuilder,
    expressions: Arc<ExpressionEngine>,
    url_manager: Arc<UrlPolicyManager>,
    interceptor: Arc<MethodSecurityInterceptor>,
    notifier: Arc<PolicyChangeNotifier>,
}

impl PolicyEngine {
    /// Start building an engine over a policy store.
    #[must_use]
    pub fn builder(store: Arc<dyn PolicyStore>) -> PolicyEngineBuilder {
        PolicyEngineBuilder::new(store)
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PolicyEngineConfig {
        &self.config
    }

    /// Policy retrieval point.
    #[must_use]
    pub fn retrieval(&self) -> &Arc<PolicyRetrievalPoint> {
        &self.retrieval
    }

    /// Context builder shared by both enforcement points.
    #[must_use]
    pub fn contexts(&self) -> &EvaluationContextBuilder {
        &self.contexts
    }

    /// Expression engine.
    #[must_use]
    pub fn expressions(&self) -> &Arc<ExpressionEngine> {
        &self.expressions
    }

    /// Risk engine.
    #[must_use]
    pub fn risk_engine(&self) -> &RiskEngine {
        self.expressions.risk_engine()
    }

    /// Request-path enforcement point.
    #[must_use]
    pub fn url_manager(&self) -> &Arc<UrlPolicyManager> {
        &self.url_manager
    }

    /// Invocation enforcement point.
    #[must_use]
    pub fn interceptor(&self) -> &Arc<MethodSecurityInterceptor> {
        &self.interceptor
    }

    /// Notifier policy authoring code announces changes through.
    #[must_use]
    pub fn notifier(&self) -> &Arc<PolicyChangeNotifier> {
        &self.notifier
    }

    /// Rebuild the URL mapping table now.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Retrieval` if URL policies cannot be loaded.
    pub async fn reload(&self) -> PolicyResult<usize> {
        self.url_manager.reload().await
    }

    /// A reload service bound to this engine's notifier and URL manager.
    #[must_use]
    pub fn reload_service(&self) -> PolicyReloadService {
        PolicyReloadService::new(
            self.url_manager.clone(),
            self.notifier.clone(),
            self.config.reload.clone(),
        )
    }
}

/// Builder for [`PolicyEngine`].
pub struct PolicyEngineBuilder {
    store: Arc<dyn PolicyStore>,
    config: PolicyEngineConfig,
    resolver: Option<Arc<dyn AuthorityResolver>>,
    catalog: Option<Arc<dyn PermissionCatalog>>,
    attribute_source: Option<Arc<dyn AttributeSource>>,
    functions: Vec<Arc<dyn ConditionFunction>>,
    risk_factors: Vec<Arc<dyn RiskFactorEvaluator>>,
}

impl PolicyEngineBuilder {
    fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            config: PolicyEngineConfig::default(),
            resolver: None,
            catalog: None,
            attribute_source: None,
            functions: Vec::new(),
            risk_factors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: PolicyEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver for subject authorities. Defaults to the subject's own
    /// authorities.
    #[must_use]
    pub fn with_authority_resolver(mut self, resolver: Arc<dyn AuthorityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Catalog whose permission conditions `hasPermission` evaluates.
    /// Without one, `hasPermission` checks authority possession only.
    #[must_use]
    pub fn with_permission_catalog(mut self, catalog: Arc<dyn PermissionCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn with_attribute_source(mut self, source: Arc<dyn AttributeSource>) -> Self {
        self.attribute_source = Some(source);
        self
    }

    #[must_use]
    pub fn with_function(mut self, function: Arc<dyn ConditionFunction>) -> Self {
        self.functions.push(function);
        self
    }

    /// Add a risk factor after the configured built-in ones.
    #[must_use]
    pub fn with_risk_factor(mut self, factor: Arc<dyn RiskFactorEvaluator>) -> Self {
        self.risk_factors.push(factor);
        self
    }

    /// Validate the configuration, wire the components and load the URL
    /// mapping table.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Configuration` for an invalid configuration and
    /// `PolicyError::Retrieval` if URL policies cannot be loaded.
    pub async fn build(self) -> PolicyResult<PolicyEngine> {
        let config = self.config;
        config.validate()?;

        let mut risk = RiskEngine::from_config(&config.risk)?;
        for factor in self.risk_factors {
            risk = risk.with_factor(factor);
        }

        let mut expressions = ExpressionEngine::from_config(&config.expression, Arc::new(risk));
        if let Some(catalog) = self.catalog {
            expressions =
                expressions.with_permission_evaluator(Arc::new(CatalogPermissionEvaluator::new(catalog)));
        }
        for function in self.functions {
            expressions = expressions.with_function(function);
        }
        let expressions = Arc::new(expressions);

        let resolver: Arc<dyn AuthorityResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(DirectAuthorityResolver),
        };
        let mut contexts = EvaluationContextBuilder::new(resolver);
        if let Some(source) = self.attribute_source {
            contexts = contexts.with_attribute_source(source);
        }

        let retrieval = Arc::new(PolicyRetrievalPoint::new(self.store));

        let url_manager = Arc::new(
            UrlPolicyManager::init(
                retrieval.clone(),
                contexts.clone(),
                expressions.clone(),
                config.enforcement.url_default_decision,
            )
            .await?,
        );
        let interceptor = Arc::new(MethodSecurityInterceptor::new(
            retrieval.clone(),
            contexts.clone(),
            expressions.clone(),
            config.enforcement.method_default_decision,
        ));
        let notifier = Arc::new(PolicyChangeNotifier::new(config.reload.channel_capacity));

        tracing::info!(
            url_entries = url_manager.table().len(),
            risk_factors = expressions.risk_engine().factor_count(),
            "Policy engine initialized"
        );

        Ok(PolicyEngine {
            config,
            retrieval,
            contexts,
            expressions,
            url_manager,
            interceptor,
            notifier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{InMemoryCatalog, PermissionDefinition, Subject};
    use crate::context::RequestDescriptor;
    use crate::error::PolicyError;
    use crate::model::{Effect, Policy, PolicyCondition, PolicyRule, PolicyTarget};
    use crate::storage::InMemoryPolicyStore;

    fn store() -> Arc<InMemoryPolicyStore> {
        Arc::new(InMemoryPolicyStore::with_policies(vec![
            Policy::new("reports", "Reports", Effect::Allow)
                .with_target(PolicyTarget::url("/reports/**"))
                .with_rule(
                    PolicyRule::new("readers")
                        .with_condition(PolicyCondition::pre("hasPermission(#resource, 'report', 'view')")),
                ),
        ]))
    }

    #[tokio::test]
    async fn test_build_loads_table() {
        let engine = PolicyEngine::builder(store()).build().await.unwrap();
        assert_eq!(engine.url_manager().table().len(), 1);
        assert_eq!(engine.risk_engine().factor_count(), 3);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = PolicyEngineConfig::default();
        config.expression.max_permission_depth = 0;

        let result = PolicyEngine::builder(store()).with_config(config).build().await;
        assert!(matches!(result, Err(PolicyError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_catalog_condition_applies() {
        let catalog = InMemoryCatalog::new().with_permission(PermissionDefinition {
            name: "REPORT_VIEW".to_string(),
            description: None,
            condition_expression: Some("#subject.attributes.clearance >= 2".to_string()),
        });
        let engine = PolicyEngine::builder(store())
            .with_permission_catalog(Arc::new(catalog))
            .build()
            .await
            .unwrap();

        let request = RequestDescriptor::new("GET", "/reports/q3");
        let cleared = Subject::new("ann")
            .with_authority("REPORT_VIEW")
            .with_attribute("clearance", serde_json::json!(3));
        let uncleared = Subject::new("ben")
            .with_authority("REPORT_VIEW")
            .with_attribute("clearance", serde_json::json!(1));

        let manager = engine.url_manager();
        assert!(manager.check(&cleared, &request).await.unwrap().is_allowed());
        assert!(manager.check(&uncleared, &request).await.unwrap().is_denied());
    }
}
