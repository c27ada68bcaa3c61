//! Analysis of description trees.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use super::node::ExpressionNode;
use crate::authority::{AuthorityCatalog, AuthorityKind};

/// An authority with its friendly name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedAuthority {
    /// Authority string as granted (`ROLE_ADMIN`).
    pub authority: String,

    /// Name without the naming-convention prefix (`ADMIN`).
    pub name: String,

    /// Catalog display name, or `name` when the catalog has none.
    pub display_name: String,
}

/// Summary of what a condition tree requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAnalysis {
    /// Roles checked anywhere in the tree.
    pub roles: Vec<NamedAuthority>,

    /// Groups checked anywhere in the tree.
    pub groups: Vec<NamedAuthority>,

    /// Plain permissions checked anywhere in the tree.
    pub permissions: Vec<NamedAuthority>,

    /// Actions named by permission checks.
    pub actions: Vec<String>,

    /// Whether some condition can only hold for an authenticated subject.
    pub requires_authentication: bool,

    /// Authority kind shared by every authority check, if there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<AuthorityKind>,

    /// The rendered condition.
    pub condition_summary: String,
}

impl PolicyAnalysis {
    /// Whether the tree checks no authorities at all.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.roles.is_empty() && self.groups.is_empty() && self.permissions.is_empty()
    }
}

/// Collects required authorities and actions from a description tree.
#[derive(Clone, Default)]
pub struct ExpressionAnalyzer {
    catalog: Option<Arc<dyn AuthorityCatalog>>,
}

impl ExpressionAnalyzer {
    /// An analyzer without a catalog; display names equal bare names.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve friendly names through a catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn AuthorityCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Analyze a tree.
    #[must_use]
    pub fn analyze(&self, node: &ExpressionNode) -> PolicyAnalysis {
        let mut analysis = PolicyAnalysis {
            requires_authentication: node.requires_auth(),
            subject_type: node.subject_type(),
            condition_summary: node.render(),
            ..Default::default()
        };

        for authority in node.required_authorities() {
            let kind = AuthorityKind::of(&authority);
            let named = self.name(kind, authority);
            match kind {
                AuthorityKind::Role => analysis.roles.push(named),
                AuthorityKind::Group => analysis.groups.push(named),
                AuthorityKind::Permission => analysis.permissions.push(named),
            }
        }

        let mut actions = BTreeSet::new();
        node.for_each_terminal(&mut |t| actions.extend(t.actions.iter().cloned()));
        analysis.actions = actions.into_iter().collect();

        analysis
    }

    fn name(&self, kind: AuthorityKind, authority: String) -> NamedAuthority {
        let name = AuthorityKind::bare_name(&authority).to_string();
        let display_name = self
            .catalog
            .as_ref()
            .and_then(|catalog| match kind {
                AuthorityKind::Role => catalog.role_display_name(&authority),
                AuthorityKind::Group => catalog.group_display_name(&authority),
                AuthorityKind::Permission => catalog.permission_description(&authority),
            })
            .unwrap_or_else(|| name.clone());

        NamedAuthority {
            authority,
            name,
            display_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::{InMemoryCatalog, PermissionDefinition};
    use crate::translate::PolicyTranslator;

    fn catalog() -> Arc<InMemoryCatalog> {
        Arc::new(
            InMemoryCatalog::new()
                .with_role("ADMIN", "Administrator")
                .with_group("finance", "Finance department")
                .with_permission(PermissionDefinition {
                    name: "DOCUMENT_READ".to_string(),
                    description: Some("Read documents".to_string()),
                    condition_expression: None,
                }),
        )
    }

    #[test]
    fn test_partition_and_friendly_names() {
        let node = PolicyTranslator::new().parse_condition(
            "hasRole('ADMIN') or (hasGroup('finance') and hasPermission(#target, 'document', 'read'))",
        );
        let analysis = ExpressionAnalyzer::new().with_catalog(catalog()).analyze(&node);

        assert_eq!(analysis.roles.len(), 1);
        assert_eq!(analysis.roles[0].authority, "ROLE_ADMIN");
        assert_eq!(analysis.roles[0].display_name, "Administrator");
        assert_eq!(analysis.groups[0].name, "finance");
        assert_eq!(analysis.groups[0].display_name, "Finance department");
        assert_eq!(analysis.permissions[0].display_name, "Read documents");
        assert_eq!(analysis.actions, vec!["read".to_string()]);
        assert!(analysis.requires_authentication);
        assert_eq!(analysis.subject_type, None);
    }

    #[test]
    fn test_without_catalog() {
        let node = PolicyTranslator::new().parse_condition("hasRole('AUDITOR')");
        let analysis = ExpressionAnalyzer::new().analyze(&node);
        assert_eq!(analysis.roles[0].display_name, "AUDITOR");
        assert_eq!(analysis.subject_type, Some(AuthorityKind::Role));
        assert_eq!(analysis.condition_summary, "the user has the role AUDITOR");
    }

    #[test]
    fn test_unrestricted() {
        let node = PolicyTranslator::new().parse_condition("getRiskScore() < 30");
        let analysis = ExpressionAnalyzer::new().analyze(&node);
        assert!(analysis.is_unrestricted());
        assert!(!analysis.requires_authentication);
    }
}
