//! # warden-policy
//!
//! Attribute-based policy decision and enforcement engine.
//!
//! This crate provides:
//! - A cached policy retrieval point over a pluggable policy store
//! - Request-path enforcement against an atomically swapped mapping table
//! - Invocation enforcement with PRE and POST decisions
//! - A boolean condition language with authority, permission, risk and
//!   attribute predicates
//! - A pluggable risk engine
//! - Natural-language translation of stored conditions for audit
//!
//! ## Modules
//!
//! - [`model`] - Policies, targets, rules and conditions
//! - [`storage`] - Policy persistence trait and in-memory store
//! - [`retrieval`] - Cached policy retrieval point
//! - [`authority`] - Subjects, authority resolution and catalogs
//! - [`context`] - Per-decision evaluation context and its builder
//! - [`pip`] - Lazily consulted attribute sources
//! - [`risk`] - Risk factors and the risk engine
//! - [`expr`] - Condition language parser and evaluator
//! - [`enforcement`] - URL and method enforcement points
//! - [`reload`] - Change notifications and hot reload
//! - [`middleware`] - axum request-path enforcement
//! - [`translate`] - Condition to natural-language translation
//! - [`engine`] - Wiring of all components from configuration

pub mod authority;
pub mod config;
pub mod context;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod expr;
pub mod middleware;
pub mod model;
pub mod pip;
pub mod reload;
pub mod retrieval;
pub mod risk;
pub mod storage;
pub mod translate;

pub use authority::{
    AuthorityCatalog, AuthorityKind, AuthorityResolver, AuthoritySet, CatalogData,
    DirectAuthorityResolver, DirectoryAuthorityResolver, DirectoryData, InMemoryCatalog,
    PermissionCatalog, PermissionDefinition, Subject,
};
pub use config::{
    ConfigError, EnforcementConfig, ExpressionConfig, PolicyEngineConfig, ReloadConfig,
    RiskConfig,
};
pub use context::{
    EnvironmentContext, EvaluationContext, EvaluationContextBuilder, InvocationDescriptor,
    MethodSignature, RequestDescriptor, ResourceDescriptor, decode_path,
};
pub use enforcement::{
    AccessDecision, DefaultDecision, DenyReason, EvaluationResult, MethodSecurityInterceptor,
    UrlPolicyManager, compile_policy,
};
pub use engine::{PolicyEngine, PolicyEngineBuilder};
pub use error::{ErrorCategory, PolicyError};
pub use expr::{ExpressionEngine, ExpressionError};
pub use model::{
    AuthorizationPhase, Effect, Policy, PolicyCondition, PolicyRule, PolicyTarget, TargetType,
};
pub use pip::{AttributeInformationPoint, AttributeSource, PipError};
pub use reload::{PolicyChange, PolicyChangeNotifier, PolicyReloadService, ReloadStats};
pub use retrieval::{PolicyRetrievalPoint, RetrievalStats};
pub use risk::{RiskEngine, RiskFactorEvaluator};
pub use storage::{InMemoryPolicyStore, PolicyStore};
pub use translate::{ExpressionAnalyzer, ExpressionNode, PolicyAnalysis, PolicyTranslator};

/// Type alias for policy engine results.
pub type PolicyResult<T> = Result<T, PolicyError>;
