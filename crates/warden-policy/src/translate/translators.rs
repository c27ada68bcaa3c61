//! Per-function translation strategies.
//!
//! Each strategy declares the function names it renders. The registry
//! resolves a call to the first registered strategy supporting the name;
//! calls nobody supports become opaque terminals.

use std::sync::Arc;

use serde_json::Value;

use super::node::Terminal;
use crate::authority::{AuthorityKind, normalize_group, normalize_role};
use crate::expr::Expr;
use crate::expr::permission::permission_name;

/// Renders calls of one or more condition functions.
pub trait FunctionTranslator: Send + Sync {
    /// Function names this strategy renders.
    fn names(&self) -> &[&str];

    /// Render a call. `text` is the call's source text.
    fn translate(&self, name: &str, args: &[Expr], text: &str) -> Terminal;

    /// Noun phrase for the call's value when used as a comparison operand.
    fn describe_value(&self, _name: &str, _args: &[Expr]) -> Option<String> {
        None
    }
}

/// Ordered set of translation strategies.
#[derive(Clone, Default)]
pub struct TranslatorRegistry {
    translators: Vec<Arc<dyn FunctionTranslator>>,
}

impl TranslatorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a strategy for every built-in function.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RoleTranslator));
        registry.register(Arc::new(GroupTranslator));
        registry.register(Arc::new(AuthorityTranslator));
        registry.register(Arc::new(AuthenticationTranslator));
        registry.register(Arc::new(PermissionTranslator));
        registry.register(Arc::new(RiskScoreTranslator));
        registry.register(Arc::new(AttributeTranslator));
        registry
    }

    /// Append a strategy.
    pub fn register(&mut self, translator: Arc<dyn FunctionTranslator>) {
        self.translators.push(translator);
    }

    /// First strategy supporting the name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn FunctionTranslator>> {
        self.translators.iter().find(|t| t.names().contains(&name))
    }
}

/// Literal string arguments, or the source text of anything else.
fn argument_texts(args: &[Expr]) -> Vec<String> {
    args.iter()
        .map(|arg| match arg {
            Expr::Literal(Value::String(s)) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

// =============================================================================
// Authority Translators
// =============================================================================

/// `hasRole`, `hasAnyRole`.
#[derive(Debug, Clone, Copy)]
pub struct RoleTranslator;

impl FunctionTranslator for RoleTranslator {
    fn names(&self) -> &[&str] {
        &["hasRole", "hasAnyRole"]
    }

    fn translate(&self, _name: &str, args: &[Expr], text: &str) -> Terminal {
        let roles: Vec<String> = argument_texts(args).iter().map(|r| normalize_role(r)).collect();
        let bare: Vec<String> = roles.iter().map(|r| AuthorityKind::bare_name(r).to_string()).collect();
        let description = if bare.len() == 1 {
            format!("the user has the role {}", bare[0])
        } else {
            format!("the user has one of the roles {}", join_names(&bare))
        };
        Terminal::new(text, description).with_authorities(AuthorityKind::Role, roles)
    }
}

/// `hasGroup`, `hasAnyGroup`.
#[derive(Debug, Clone, Copy)]
pub struct GroupTranslator;

impl FunctionTranslator for GroupTranslator {
    fn names(&self) -> &[&str] {
        &["hasGroup", "hasAnyGroup"]
    }

    fn translate(&self, _name: &str, args: &[Expr], text: &str) -> Terminal {
        let groups: Vec<String> = argument_texts(args).iter().map(|g| normalize_group(g)).collect();
        let bare: Vec<String> = groups.iter().map(|g| AuthorityKind::bare_name(g).to_string()).collect();
        let description = if bare.len() == 1 {
            format!("the user belongs to the group {}", bare[0])
        } else {
            format!("the user belongs to one of the groups {}", join_names(&bare))
        };
        Terminal::new(text, description).with_authorities(AuthorityKind::Group, groups)
    }
}

/// `hasAuthority`, `hasAnyAuthority`.
#[derive(Debug, Clone, Copy)]
pub struct AuthorityTranslator;

impl FunctionTranslator for AuthorityTranslator {
    fn names(&self) -> &[&str] {
        &["hasAuthority", "hasAnyAuthority"]
    }

    fn translate(&self, _name: &str, args: &[Expr], text: &str) -> Terminal {
        let authorities = argument_texts(args);
        let kind = authorities
            .first()
            .map(|a| AuthorityKind::of(a))
            .filter(|kind| authorities.iter().all(|a| AuthorityKind::of(a) == *kind))
            .unwrap_or(AuthorityKind::Permission);
        let description = if authorities.len() == 1 {
            format!("the user holds the authority {}", authorities[0])
        } else {
            format!("the user holds one of the authorities {}", join_names(&authorities))
        };
        Terminal::new(text, description).with_authorities(kind, authorities)
    }
}

// =============================================================================
// Other Translators
// =============================================================================

/// `isAuthenticated`, `isAnonymous`, `permitAll`, `denyAll`.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticationTranslator;

impl FunctionTranslator for AuthenticationTranslator {
    fn names(&self) -> &[&str] {
        &["isAuthenticated", "isAnonymous", "permitAll", "denyAll"]
    }

    fn translate(&self, name: &str, _args: &[Expr], text: &str) -> Terminal {
        match name {
            "isAuthenticated" => Terminal::new(text, "the user is signed in").requiring_auth(),
            "isAnonymous" => Terminal::new(text, "the user is not signed in"),
            "permitAll" => Terminal::new(text, "anyone may proceed"),
            _ => Terminal::new(text, "no one may proceed"),
        }
    }
}

/// `hasPermission(target, [type,] action)`.
#[derive(Debug, Clone, Copy)]
pub struct PermissionTranslator;

impl FunctionTranslator for PermissionTranslator {
    fn names(&self) -> &[&str] {
        &["hasPermission"]
    }

    fn translate(&self, _name: &str, args: &[Expr], text: &str) -> Terminal {
        let texts = argument_texts(args);
        let (target, target_type, action) = match texts.as_slice() {
            [target, action] => (target.as_str(), None, action.as_str()),
            [target, target_type, action] => {
                (target.as_str(), Some(target_type.as_str()), action.as_str())
            }
            _ => return Terminal::opaque(text),
        };

        let permission = permission_name(target_type, action);
        let description = match target_type {
            Some(target_type) => format!(
                "the user may {} the {} {}",
                action.to_lowercase(),
                target_type.to_lowercase(),
                target
            ),
            None => format!("the user may {} {}", action.to_lowercase(), target),
        };

        Terminal::new(text, description)
            .with_authorities(AuthorityKind::Permission, [permission])
            .with_action(action.to_lowercase())
    }
}

/// `getRiskScore()`.
#[derive(Debug, Clone, Copy)]
pub struct RiskScoreTranslator;

impl FunctionTranslator for RiskScoreTranslator {
    fn names(&self) -> &[&str] {
        &["getRiskScore"]
    }

    fn translate(&self, _name: &str, _args: &[Expr], text: &str) -> Terminal {
        Terminal::new(text, "the contextual risk score is non-zero")
    }

    fn describe_value(&self, _name: &str, _args: &[Expr]) -> Option<String> {
        Some("the contextual risk score".to_string())
    }
}

/// `getAttribute(key)`.
#[derive(Debug, Clone, Copy)]
pub struct AttributeTranslator;

impl FunctionTranslator for AttributeTranslator {
    fn names(&self) -> &[&str] {
        &["getAttribute"]
    }

    fn translate(&self, name: &str, args: &[Expr], text: &str) -> Terminal {
        let description = match self.describe_value(name, args) {
            Some(value) => format!("{} is set", value),
            None => return Terminal::opaque(text),
        };
        Terminal::new(text, description)
    }

    fn describe_value(&self, _name: &str, args: &[Expr]) -> Option<String> {
        match argument_texts(args).as_slice() {
            [key] => Some(format!("the attribute '{}'", key)),
            _ => None,
        }
    }
}
