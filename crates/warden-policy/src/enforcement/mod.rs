//! Policy enforcement points.
//!
//! Two enforcement points share one compilation step:
//!
//! - [`UrlPolicyManager`] decides HTTP requests against an atomically swapped
//!   table of path matchers.
//! - [`MethodSecurityInterceptor`] guards in-process operations with PRE and
//!   POST decisions.
//!
//! Both resolve conflicts the same way: policies are ordered by ascending
//! priority (ties broken by ID) and the first applicable one decides.

pub mod compile;
pub mod decision;
pub mod method;
pub mod url;

pub use compile::{compile_policy, constrains_phase};
pub use decision::{AccessDecision, DefaultDecision, DenyReason, EvaluationResult, MatchedPolicy};
pub use method::MethodSecurityInterceptor;
pub use url::{MappingTable, PathMatcher, UrlMapping, UrlPolicyManager};
