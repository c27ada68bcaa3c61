//! Per-decision evaluation context.
//!
//! An [`EvaluationContext`] carries everything a condition can observe: the
//! subject with its resolved authorities, the resource and action, the
//! environment, invocation arguments, the return value in the POST phase and
//! lazily resolved extended attributes. A context is built for one decision
//! and dropped afterwards; it is never shared between decisions.
//!
//! # Usage
//!
//! ```ignore
//! use warden_policy::context::{EvaluationContextBuilder, RequestDescriptor};
//!
//! let builder = EvaluationContextBuilder::new(resolver).with_attribute_source(source);
//! let request = RequestDescriptor::new("GET", "/admin/users");
//! let mut ctx = builder.for_request(&subject, &request).await?;
//!
//! // Extended attributes are resolved on first use
//! let department = ctx.get_attribute("department")?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::PolicyResult;
use crate::authority::{AuthorityResolver, AuthoritySet, Subject};
use crate::error::PolicyError;
use crate::pip::{AttributeSource, PipError};

/// Resource type of request-path decisions.
pub const URL_RESOURCE_TYPE: &str = "URL";

/// Resource type of invocation decisions.
pub const METHOD_RESOURCE_TYPE: &str = "METHOD";

/// Action recorded for every invocation decision.
pub const INVOKE_ACTION: &str = "INVOKE";

// =============================================================================
// Descriptors
// =============================================================================

/// The resource a decision is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Resource shape (`URL`, `METHOD` or an application-defined type).
    pub resource_type: String,

    /// Path, canonical signature or application identifier.
    pub identifier: String,
}

impl ResourceDescriptor {
    /// Create a resource descriptor.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
        }
    }
}

/// An inbound network request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    /// HTTP method, upper-case.
    pub method: String,

    /// Request path without query string.
    pub path: String,

    /// Query parameters.
    #[serde(default)]
    pub query: HashMap<String, String>,

    /// Request headers, lower-case names.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Client address, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<IpAddr>,
}

impl RequestDescriptor {
    /// Create a request descriptor.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a request descriptor from a raw request target.
    ///
    /// The path is percent-decoded and the query string parsed as
    /// `application/x-www-form-urlencoded`, so policies match the decoded
    /// form a handler routes on.
    #[must_use]
    pub fn from_target(method: impl Into<String>, raw_path: &str, raw_query: Option<&str>) -> Self {
        let descriptor = Self::new(method, decode_path(raw_path));
        match raw_query {
            Some(query) => descriptor.with_query_string(query),
            None => descriptor,
        }
    }

    /// Add every parameter of a raw query string, percent-decoded.
    #[must_use]
    pub fn with_query_string(mut self, query: &str) -> Self {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            self.query.insert(name.into_owned(), value.into_owned());
        }
        self
    }

    /// Set the client address.
    #[must_use]
    pub fn with_remote_address(mut self, address: IpAddr) -> Self {
        self.remote_address = Some(address);
        self
    }

    /// Add a header (the name is lower-cased).
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }
}

/// Percent-decode a request path once. Invalid UTF-8 becomes U+FFFD.
#[must_use]
pub fn decode_path(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

/// Canonical identity of an invocable operation.
///
/// Renders as `declaring.scope.name(type1,type2)`, the key method policies
/// are stored and cached under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodSignature {
    /// Declaring scope (module, type or service name).
    pub declaring_scope: String,

    /// Operation name.
    pub name: String,

    /// Parameter type names, in declaration order.
    #[serde(default)]
    pub parameter_types: Vec<String>,
}

impl MethodSignature {
    /// Create a signature.
    #[must_use]
    pub fn new<I, S>(declaring_scope: impl Into<String>, name: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            declaring_scope: declaring_scope.into(),
            name: name.into(),
            parameter_types: params.into_iter().map(Into::into).collect(),
        }
    }

    /// The canonical signature string.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.declaring_scope,
            self.name,
            self.parameter_types.join(",")
        )
    }
}

impl FromStr for MethodSignature {
    type Err = PolicyError;

    /// Parse `scope.name(type1, type2)`. The scope may itself be dotted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PolicyError::configuration(format!("invalid method signature '{}'", s));

        let s = s.trim();
        let (head, params) = s
            .strip_suffix(')')
            .and_then(|rest| rest.split_once('('))
            .ok_or_else(invalid)?;
        let (scope, name) = head.rsplit_once('.').ok_or_else(invalid)?;
        if scope.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        let params: Vec<String> = params
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        Ok(Self::new(scope.trim(), name.trim(), params))
    }
}

/// An in-process invocation of a protected operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationDescriptor {
    /// Operation being invoked.
    pub signature: MethodSignature,

    /// Named arguments, bound as `#<name>` in conditions.
    #[serde(default)]
    pub arguments: Vec<(String, Value)>,
}

impl InvocationDescriptor {
    /// Create an invocation with no arguments.
    #[must_use]
    pub fn new(signature: MethodSignature) -> Self {
        Self {
            signature,
            arguments: Vec::new(),
        }
    }

    /// Add a named argument.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.push((name.into(), value));
        self
    }
}

/// Where and when the decision is made.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentContext {
    /// Client address, if the decision has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<IpAddr>,

    /// Decision time.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Raw request for request-path decisions; absent for invocations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestDescriptor>,
}

impl EnvironmentContext {
    /// An environment with no request, stamped now.
    #[must_use]
    pub fn now() -> Self {
        Self {
            remote_address: None,
            timestamp: OffsetDateTime::now_utc(),
            request: None,
        }
    }
}

// =============================================================================
// Evaluation Context
// =============================================================================

/// Complete state for evaluating the conditions of one decision.
pub struct EvaluationContext {
    /// Identity the decision is made for.
    pub subject: Subject,

    /// Effective authorities of the subject.
    pub authorities: AuthoritySet,

    /// Resource being accessed.
    pub resource: ResourceDescriptor,

    /// Action performed on the resource.
    pub action: String,

    /// Environment of the decision.
    pub environment: EnvironmentContext,

    arguments: Vec<(String, Value)>,
    return_value: Option<Value>,
    attributes: HashMap<String, Value>,
    attribute_source: Option<Arc<dyn AttributeSource>>,
    attribute_source_consulted: bool,
    risk_score: Option<u32>,
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("subject", &self.subject.name)
            .field("resource", &self.resource)
            .field("action", &self.action)
            .field("attributes", &self.attributes.len())
            .field("return_value", &self.return_value.is_some())
            .finish_non_exhaustive()
    }
}

impl EvaluationContext {
    /// Create a context with resolved authorities and no attribute source.
    #[must_use]
    pub fn new(
        subject: Subject,
        authorities: AuthoritySet,
        resource: ResourceDescriptor,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject,
            authorities,
            resource,
            action: action.into(),
            environment: EnvironmentContext::now(),
            arguments: Vec::new(),
            return_value: None,
            attributes: HashMap::new(),
            attribute_source: None,
            attribute_source_consulted: false,
            risk_score: None,
        }
    }

    /// Replace the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentContext) -> Self {
        self.environment = environment;
        self
    }

    /// Override the decision time.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.environment.timestamp = timestamp;
        self
    }

    /// Attach the attribute source consulted on attribute misses.
    #[must_use]
    pub fn with_attribute_source(mut self, source: Arc<dyn AttributeSource>) -> Self {
        self.attribute_source = Some(source);
        self
    }

    /// Pre-populate an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Bind invocation arguments.
    #[must_use]
    pub fn with_arguments(mut self, arguments: Vec<(String, Value)>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Bind the operation result for POST evaluation.
    pub fn set_return_value(&mut self, value: Value) {
        self.return_value = Some(value);
    }

    /// The operation result, present only in the POST phase.
    #[must_use]
    pub fn return_value(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    /// A named invocation argument.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Attributes resolved so far.
    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Look up an extended attribute.
    ///
    /// The local map is checked first. On the first miss the attribute source
    /// is called once and every attribute it returns is merged locally; later
    /// misses return `null` without another call.
    ///
    /// # Errors
    ///
    /// Returns the attribute source's error on the consulting call.
    pub fn get_attribute(&mut self, key: &str) -> Result<Value, PipError> {
        if let Some(value) = self.attributes.get(key) {
            return Ok(value.clone());
        }

        if self.attribute_source_consulted {
            return Ok(Value::Null);
        }
        self.attribute_source_consulted = true;

        let Some(source) = self.attribute_source.clone() else {
            return Ok(Value::Null);
        };

        let resolved = source.get_attributes(self)?;
        tracing::trace!(
            source = source.name(),
            resolved = resolved.len(),
            "Merged extended attributes into context"
        );
        for (k, v) in resolved {
            self.attributes.entry(k).or_insert(v);
        }

        Ok(self.attributes.get(key).cloned().unwrap_or(Value::Null))
    }

    /// The memoized risk score, if already computed.
    #[must_use]
    pub fn cached_risk_score(&self) -> Option<u32> {
        self.risk_score
    }

    pub(crate) fn remember_risk_score(&mut self, score: u32) {
        self.risk_score = Some(score);
    }

    /// JSON view of the subject, bound as `#subject`.
    #[must_use]
    pub fn subject_value(&self) -> Value {
        json!({
            "name": self.subject.name,
            "authenticated": self.subject.authenticated,
            "authorities": self.authorities.iter().collect::<Vec<_>>(),
            "attributes": self.subject.attributes,
        })
    }

    /// JSON view of the resource, bound as `#resource`.
    #[must_use]
    pub fn resource_value(&self) -> Value {
        json!({
            "type": self.resource.resource_type,
            "identifier": self.resource.identifier,
        })
    }

    /// JSON view of the environment, bound as `#environment`.
    #[must_use]
    pub fn environment_value(&self) -> Value {
        serde_json::to_value(&self.environment).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Context Builder
// =============================================================================

/// Assembles evaluation contexts for requests and invocations.
///
/// Authorities are resolved eagerly through the [`AuthorityResolver`];
/// extended attributes are left to the attribute source and resolved on
/// first use.
#[derive(Clone)]
pub struct EvaluationContextBuilder {
    resolver: Arc<dyn AuthorityResolver>,
    attribute_source: Option<Arc<dyn AttributeSource>>,
}

impl EvaluationContextBuilder {
    /// Create a builder resolving authorities with the given resolver.
    #[must_use]
    pub fn new(resolver: Arc<dyn AuthorityResolver>) -> Self {
        Self {
            resolver,
            attribute_source: None,
        }
    }

    /// Attach the attribute source given to every built context.
    #[must_use]
    pub fn with_attribute_source(mut self, source: Arc<dyn AttributeSource>) -> Self {
        self.attribute_source = Some(source);
        self
    }

    /// Build a context for a request-path decision.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Authority` if authorities cannot be resolved.
    pub async fn for_request(
        &self,
        subject: &Subject,
        request: &RequestDescriptor,
    ) -> PolicyResult<EvaluationContext> {
        let environment = EnvironmentContext {
            remote_address: request.remote_address,
            timestamp: OffsetDateTime::now_utc(),
            request: Some(request.clone()),
        };
        let resource = ResourceDescriptor::new(URL_RESOURCE_TYPE, request.path.clone());

        Ok(self
            .for_resource(subject, resource, request.method.clone())
            .await?
            .with_environment(environment))
    }

    /// Build a context for an invocation decision.
    ///
    /// The resource identifier is the canonical signature and the action is
    /// always [`INVOKE_ACTION`].
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Authority` if authorities cannot be resolved.
    pub async fn for_invocation(
        &self,
        subject: &Subject,
        invocation: &InvocationDescriptor,
    ) -> PolicyResult<EvaluationContext> {
        let resource =
            ResourceDescriptor::new(METHOD_RESOURCE_TYPE, invocation.signature.canonical());

        Ok(self
            .for_resource(subject, resource, INVOKE_ACTION)
            .await?
            .with_arguments(invocation.arguments.clone()))
    }

    /// Build a context for an arbitrary resource and action.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Authority` if authorities cannot be resolved.
    pub async fn for_resource(
        &self,
        subject: &Subject,
        resource: ResourceDescriptor,
        action: impl Into<String>,
    ) -> PolicyResult<EvaluationContext> {
        let authorities = self.resolver.resolve(subject).await.inspect_err(|e| {
            tracing::error!(subject = %subject.name, error = %e, "Failed to resolve authorities");
        })?;

        let mut ctx = EvaluationContext::new(subject.clone(), authorities, resource, action);
        if let Some(ref source) = self.attribute_source {
            ctx = ctx.with_attribute_source(source.clone());
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{DirectAuthorityResolver, DirectoryAuthorityResolver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -------------------------------------------------------------------------
    // Test Helpers
    // -------------------------------------------------------------------------

    struct CountingSource {
        calls: AtomicUsize,
        attributes: HashMap<String, Value>,
    }

    impl CountingSource {
        fn new(attributes: &[(&str, Value)]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                attributes: attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            }
        }
    }

    impl AttributeSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn get_attributes(
            &self,
            _ctx: &EvaluationContext,
        ) -> Result<HashMap<String, Value>, PipError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.attributes.clone())
        }
    }

    fn create_context() -> EvaluationContext {
        EvaluationContext::new(
            Subject::new("alice"),
            AuthoritySet::new(),
            ResourceDescriptor::new(URL_RESOURCE_TYPE, "/docs"),
            "GET",
        )
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_request_target_is_decoded() {
        let request = RequestDescriptor::from_target(
            "get",
            "/%61dmin%2Fusers",
            Some("name=J%C3%B6rg+M&flag&scope=a%26b"),
        );
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/admin/users");
        assert_eq!(request.query.get("name").map(String::as_str), Some("Jörg M"));
        assert_eq!(request.query.get("flag").map(String::as_str), Some(""));
        assert_eq!(request.query.get("scope").map(String::as_str), Some("a&b"));
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/docs/7"), "/docs/7");
        assert_eq!(decode_path("/a%20b"), "/a b");
        // Decoded once: a double-encoded segment stays encoded.
        assert_eq!(decode_path("/%2561dmin"), "/%61dmin");
        assert_eq!(decode_path("/admin/%FF"), "/admin/\u{FFFD}");
        assert_eq!(decode_path("/bad%zz"), "/bad%zz");
    }

    #[test]
    fn test_signature_canonical_form() {
        let sig = MethodSignature::new("docs.DocumentService", "read", ["long", "String"]);
        assert_eq!(sig.canonical(), "docs.DocumentService.read(long,String)");

        let no_args = MethodSignature::new("svc", "ping", Vec::<String>::new());
        assert_eq!(no_args.to_string(), "svc.ping()");
    }

    #[test]
    fn test_signature_parse() {
        let sig: MethodSignature = "docs.DocumentService.read(long, String)".parse().unwrap();
        assert_eq!(sig.declaring_scope, "docs.DocumentService");
        assert_eq!(sig.name, "read");
        assert_eq!(sig.canonical(), "docs.DocumentService.read(long,String)");

        let no_args: MethodSignature = "svc.ping()".parse().unwrap();
        assert!(no_args.parameter_types.is_empty());

        assert!("ping()".parse::<MethodSignature>().is_err());
        assert!("svc.ping".parse::<MethodSignature>().is_err());
    }

    #[test]
    fn test_attribute_source_called_once_and_merged() {
        let source = Arc::new(CountingSource::new(&[
            ("department", json!("finance")),
            ("clearance", json!(3)),
        ]));
        let mut ctx = create_context().with_attribute_source(source.clone());

        assert_eq!(ctx.get_attribute("department").unwrap(), json!("finance"));
        assert_eq!(ctx.get_attribute("clearance").unwrap(), json!(3));
        assert_eq!(ctx.get_attribute("missing").unwrap(), Value::Null);
        assert_eq!(ctx.get_attribute("missing").unwrap(), Value::Null);

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.attributes().len(), 2);
    }

    #[test]
    fn test_local_attributes_take_precedence() {
        let source = Arc::new(CountingSource::new(&[("department", json!("finance"))]));
        let mut ctx = create_context()
            .with_attribute("department", json!("legal"))
            .with_attribute_source(source.clone());

        assert_eq!(ctx.get_attribute("department").unwrap(), json!("legal"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_attribute_source_yields_null() {
        let mut ctx = create_context();
        assert_eq!(ctx.get_attribute("anything").unwrap(), Value::Null);
    }

    #[test]
    fn test_subject_value_shape() {
        let ctx = EvaluationContext::new(
            Subject::new("bob"),
            ["ROLE_USER"].into_iter().collect(),
            ResourceDescriptor::new("URL", "/"),
            "GET",
        );
        let value = ctx.subject_value();
        assert_eq!(value["name"], json!("bob"));
        assert_eq!(value["authenticated"], json!(true));
        assert_eq!(value["authorities"], json!(["ROLE_USER"]));
    }

    #[tokio::test]
    async fn test_builder_for_request() {
        let directory = DirectoryAuthorityResolver::new().with_user_role("alice", "ADMIN");
        let builder = EvaluationContextBuilder::new(Arc::new(directory));
        let request = RequestDescriptor::new("get", "/admin/users")
            .with_remote_address("10.1.2.3".parse().unwrap())
            .with_header("X-Trace", "abc");

        let ctx = builder
            .for_request(&Subject::new("alice"), &request)
            .await
            .unwrap();

        assert_eq!(ctx.resource.resource_type, URL_RESOURCE_TYPE);
        assert_eq!(ctx.resource.identifier, "/admin/users");
        assert_eq!(ctx.action, "GET");
        assert!(ctx.authorities.contains("ROLE_ADMIN"));
        assert_eq!(
            ctx.environment.remote_address,
            Some("10.1.2.3".parse().unwrap())
        );
        let env = ctx.environment_value();
        assert_eq!(env["request"]["headers"]["x-trace"], json!("abc"));
    }

    #[tokio::test]
    async fn test_builder_for_invocation() {
        let builder = EvaluationContextBuilder::new(Arc::new(DirectAuthorityResolver));
        let invocation =
            InvocationDescriptor::new(MethodSignature::new("svc.Orders", "get", ["long"]))
                .with_argument("id", json!(42));

        let ctx = builder
            .for_invocation(&Subject::new("alice"), &invocation)
            .await
            .unwrap();

        assert_eq!(ctx.resource.resource_type, METHOD_RESOURCE_TYPE);
        assert_eq!(ctx.resource.identifier, "svc.Orders.get(long)");
        assert_eq!(ctx.action, INVOKE_ACTION);
        assert_eq!(ctx.argument("id"), Some(&json!(42)));
        assert!(ctx.environment.request.is_none());
        assert!(ctx.return_value().is_none());
    }
}
