//! Subjects, granted authorities and the identity-store collaborators.
//!
//! Authorities are opaque strings partitioned by naming convention:
//! `ROLE_*` are roles, `GROUP_*` are groups and anything else is a plain
//! permission name.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::PolicyResult;

/// Prefix marking role authorities.
pub const ROLE_PREFIX: &str = "ROLE_";

/// Prefix marking group authorities.
pub const GROUP_PREFIX: &str = "GROUP_";

/// Prefix a role name with `ROLE_` unless already present.
#[must_use]
pub fn normalize_role(role: &str) -> String {
    if role.starts_with(ROLE_PREFIX) {
        role.to_string()
    } else {
        format!("{}{}", ROLE_PREFIX, role)
    }
}

/// Prefix a group name with `GROUP_` unless already present.
#[must_use]
pub fn normalize_group(group: &str) -> String {
    if group.starts_with(GROUP_PREFIX) {
        group.to_string()
    } else {
        format!("{}{}", GROUP_PREFIX, group)
    }
}

// =============================================================================
// Authority Kind
// =============================================================================

/// Classification of an authority string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityKind {
    /// `ROLE_*` authority.
    Role,
    /// `GROUP_*` authority.
    Group,
    /// Bare permission name.
    Permission,
}

impl AuthorityKind {
    /// Classify an authority by its prefix.
    #[must_use]
    pub fn of(authority: &str) -> Self {
        if authority.starts_with(ROLE_PREFIX) {
            Self::Role
        } else if authority.starts_with(GROUP_PREFIX) {
            Self::Group
        } else {
            Self::Permission
        }
    }

    /// Lower-case label used in rendered text.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Group => "group",
            Self::Permission => "permission",
        }
    }

    /// Strip the naming-convention prefix.
    #[must_use]
    pub fn bare_name(authority: &str) -> &str {
        authority
            .strip_prefix(ROLE_PREFIX)
            .or_else(|| authority.strip_prefix(GROUP_PREFIX))
            .unwrap_or(authority)
    }
}

// =============================================================================
// Subject
// =============================================================================

/// The identity a decision is made for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Principal name. Empty for anonymous subjects.
    pub name: String,

    /// Whether the subject passed authentication.
    pub authenticated: bool,

    /// Authorities granted directly (e.g. from a token).
    #[serde(default)]
    pub authorities: Vec<String>,

    /// Attributes carried by the identity itself.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Subject {
    /// An authenticated subject with no direct authorities.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authenticated: true,
            ..Default::default()
        }
    }

    /// An unauthenticated subject.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            authenticated: false,
            ..Default::default()
        }
    }

    /// Grant an authority directly.
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.push(authority.into());
        self
    }

    /// Grant a role directly (prefixed with `ROLE_` if needed).
    #[must_use]
    pub fn with_role(self, role: &str) -> Self {
        self.with_authority(normalize_role(role))
    }

    /// Attach an identity attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

// =============================================================================
// Authority Set
// =============================================================================

/// Deduplicated, ordered set of effective authorities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritySet(BTreeSet<String>);

impl AuthoritySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an authority. Returns `true` if it was not present.
    pub fn insert(&mut self, authority: impl Into<String>) -> bool {
        self.0.insert(authority.into())
    }

    /// Returns `true` if the authority is held.
    #[must_use]
    pub fn contains(&self, authority: &str) -> bool {
        self.0.contains(authority)
    }

    /// Returns `true` if any of the authorities is held.
    #[must_use]
    pub fn contains_any<'a>(&self, authorities: impl IntoIterator<Item = &'a str>) -> bool {
        authorities.into_iter().any(|a| self.contains(a))
    }

    /// Iterate over all authorities.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Iterate over authorities of one kind.
    pub fn of_kind(&self, kind: AuthorityKind) -> impl Iterator<Item = &str> {
        self.iter().filter(move |a| AuthorityKind::of(a) == kind)
    }

    /// Number of authorities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AuthoritySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Extend<String> for AuthoritySet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

// =============================================================================
// Authority Resolver
// =============================================================================

/// Maps a subject to its effective authorities.
#[async_trait]
pub trait AuthorityResolver: Send + Sync {
    /// Resolve roles, group-derived roles and role-derived permissions.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Authority` if the identity store fails.
    async fn resolve(&self, subject: &Subject) -> PolicyResult<AuthoritySet>;
}

/// Resolver that only returns the subject's direct authorities.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAuthorityResolver;

#[async_trait]
impl AuthorityResolver for DirectAuthorityResolver {
    async fn resolve(&self, subject: &Subject) -> PolicyResult<AuthoritySet> {
        Ok(subject.authorities.iter().cloned().collect())
    }
}

/// Identity-store contents for [`DirectoryAuthorityResolver`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectoryData {
    /// Per-user role and group memberships.
    pub users: HashMap<String, DirectoryEntry>,

    /// Roles granted through each group.
    pub group_roles: HashMap<String, Vec<String>>,

    /// Permissions granted through each role.
    pub role_permissions: HashMap<String, Vec<String>>,
}

/// Memberships of one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryEntry {
    /// Role names (prefix optional).
    pub roles: Vec<String>,

    /// Group names (prefix optional).
    pub groups: Vec<String>,
}

/// In-memory identity store resolving users → roles & groups,
/// groups → roles and roles → permissions.
#[derive(Debug, Clone, Default)]
pub struct DirectoryAuthorityResolver {
    data: DirectoryData,
}

impl DirectoryAuthorityResolver {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory from loaded data.
    #[must_use]
    pub fn from_data(data: DirectoryData) -> Self {
        Self { data }
    }

    /// Assign a role to a user.
    #[must_use]
    pub fn with_user_role(mut self, user: &str, role: &str) -> Self {
        self.data
            .users
            .entry(user.to_string())
            .or_default()
            .roles
            .push(role.to_string());
        self
    }

    /// Add a user to a group.
    #[must_use]
    pub fn with_user_group(mut self, user: &str, group: &str) -> Self {
        self.data
            .users
            .entry(user.to_string())
            .or_default()
            .groups
            .push(group.to_string());
        self
    }

    /// Grant a role to every member of a group.
    #[must_use]
    pub fn with_group_role(mut self, group: &str, role: &str) -> Self {
        self.data
            .group_roles
            .entry(normalize_group(group))
            .or_default()
            .push(role.to_string());
        self
    }

    /// Grant a permission to every holder of a role.
    #[must_use]
    pub fn with_role_permission(mut self, role: &str, permission: &str) -> Self {
        self.data
            .role_permissions
            .entry(normalize_role(role))
            .or_default()
            .push(permission.to_string());
        self
    }

    fn group_roles(&self, group: &str) -> impl Iterator<Item = String> + '_ {
        let bare = AuthorityKind::bare_name(group).to_string();
        self.data
            .group_roles
            .iter()
            .filter(move |(name, _)| AuthorityKind::bare_name(name) == bare)
            .flat_map(|(_, roles)| roles.iter().map(|r| normalize_role(r)))
    }

    fn role_permissions(&self, role: &str) -> impl Iterator<Item = String> + '_ {
        let bare = AuthorityKind::bare_name(role).to_string();
        self.data
            .role_permissions
            .iter()
            .filter(move |(name, _)| AuthorityKind::bare_name(name) == bare)
            .flat_map(|(_, permissions)| permissions.iter().cloned())
    }
}

#[async_trait]
impl AuthorityResolver for DirectoryAuthorityResolver {
    async fn resolve(&self, subject: &Subject) -> PolicyResult<AuthoritySet> {
        let mut authorities: AuthoritySet = subject.authorities.iter().cloned().collect();

        if subject.authenticated
            && let Some(entry) = self.data.users.get(&subject.name)
        {
            authorities.extend(entry.roles.iter().map(|r| normalize_role(r)));
            for group in &entry.groups {
                authorities.insert(normalize_group(group));
            }
        }

        let groups: Vec<String> = authorities
            .of_kind(AuthorityKind::Group)
            .map(String::from)
            .collect();
        for group in &groups {
            authorities.extend(self.group_roles(group));
        }

        let roles: Vec<String> = authorities
            .of_kind(AuthorityKind::Role)
            .map(String::from)
            .collect();
        for role in &roles {
            authorities.extend(self.role_permissions(role));
        }

        tracing::trace!(
            subject = %subject.name,
            authorities = authorities.len(),
            "Resolved effective authorities"
        );

        Ok(authorities)
    }
}

// =============================================================================
// Catalogs
// =============================================================================

/// A named permission as stored in the permission catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDefinition {
    /// Permission name (the authority string).
    pub name: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Optional condition that must also hold when the permission is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
}

/// Lookup of permission definitions by name.
pub trait PermissionCatalog: Send + Sync {
    /// Find a permission definition.
    fn find_permission_by_name(&self, name: &str) -> Option<PermissionDefinition>;
}

/// Friendly names for authorities, used when rendering descriptions.
pub trait AuthorityCatalog: Send + Sync {
    /// Display name of a role (`ROLE_*`).
    fn role_display_name(&self, role: &str) -> Option<String>;

    /// Display name of a group (`GROUP_*`).
    fn group_display_name(&self, group: &str) -> Option<String>;

    /// Description of a plain permission.
    fn permission_description(&self, permission: &str) -> Option<String>;
}

/// Catalog contents for [`InMemoryCatalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogData {
    /// Role display names keyed by role (prefix optional).
    pub roles: HashMap<String, String>,

    /// Group display names keyed by group (prefix optional).
    pub groups: HashMap<String, String>,

    /// Permission definitions.
    pub permissions: Vec<PermissionDefinition>,
}

/// In-memory permission and authority catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    roles: HashMap<String, String>,
    groups: HashMap<String, String>,
    permissions: HashMap<String, PermissionDefinition>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog from loaded data.
    #[must_use]
    pub fn from_data(data: CatalogData) -> Self {
        let mut catalog = Self::new();
        for (role, name) in data.roles {
            catalog.roles.insert(normalize_role(&role), name);
        }
        for (group, name) in data.groups {
            catalog.groups.insert(normalize_group(&group), name);
        }
        for permission in data.permissions {
            catalog.permissions.insert(permission.name.clone(), permission);
        }
        catalog
    }

    /// Register a role display name.
    #[must_use]
    pub fn with_role(mut self, role: &str, display_name: impl Into<String>) -> Self {
        self.roles.insert(normalize_role(role), display_name.into());
        self
    }

    /// Register a group display name.
    #[must_use]
    pub fn with_group(mut self, group: &str, display_name: impl Into<String>) -> Self {
        self.groups
            .insert(normalize_group(group), display_name.into());
        self
    }

    /// Register a permission definition.
    #[must_use]
    pub fn with_permission(mut self, permission: PermissionDefinition) -> Self {
        self.permissions.insert(permission.name.clone(), permission);
        self
    }
}

impl PermissionCatalog for InMemoryCatalog {
    fn find_permission_by_name(&self, name: &str) -> Option<PermissionDefinition> {
        self.permissions.get(name).cloned()
    }
}

impl AuthorityCatalog for InMemoryCatalog {
    fn role_display_name(&self, role: &str) -> Option<String> {
        self.roles.get(&normalize_role(role)).cloned()
    }

    fn group_display_name(&self, group: &str) -> Option<String> {
        self.groups.get(&normalize_group(group)).cloned()
    }

    fn permission_description(&self, permission: &str) -> Option<String> {
        self.permissions
            .get(permission)
            .and_then(|p| p.description.clone())
    }
}
