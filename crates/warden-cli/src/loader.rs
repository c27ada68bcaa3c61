//! Loading of policy files, configuration and identity data.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use warden_policy::{
    CatalogData, DirectoryAuthorityResolver, DirectoryData, InMemoryCatalog, InMemoryPolicyStore,
    PolicyEngine, PolicyEngineConfig, Subject,
};

use crate::cli::{Cli, SubjectArgs};

pub fn load_store(path: &Path) -> Result<Arc<InMemoryPolicyStore>> {
    let store = InMemoryPolicyStore::from_json_file(path)
        .with_context(|| format!("Failed to load policies from {}", path.display()))?;
    tracing::debug!(path = %path.display(), policies = store.len(), "Loaded policy file");
    Ok(Arc::new(store))
}

pub fn load_config(path: Option<&Path>) -> Result<PolicyEngineConfig> {
    match path {
        Some(path) => PolicyEngineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(PolicyEngineConfig::default()),
    }
}

pub fn load_catalog(path: Option<&Path>) -> Result<Option<Arc<InMemoryCatalog>>> {
    path.map(|path| read_json::<CatalogData>(path).map(|data| Arc::new(InMemoryCatalog::from_data(data))))
        .transpose()
}

/// Build an engine from the global options.
pub async fn build_engine(cli: &Cli, store: Arc<InMemoryPolicyStore>) -> Result<PolicyEngine> {
    let mut builder = PolicyEngine::builder(store).with_config(load_config(cli.config.as_deref())?);

    if let Some(path) = cli.directory.as_deref() {
        let data: DirectoryData = read_json(path)?;
        builder = builder.with_authority_resolver(Arc::new(DirectoryAuthorityResolver::from_data(data)));
    }
    if let Some(catalog) = load_catalog(cli.catalog.as_deref())? {
        builder = builder.with_permission_catalog(catalog);
    }

    Ok(builder.build().await?)
}

pub fn subject(args: &SubjectArgs) -> Result<Subject> {
    let mut subject = match args.user.as_deref() {
        Some(user) => Subject::new(user),
        None => Subject::anonymous(),
    };
    for role in &args.roles {
        subject = subject.with_role(role);
    }
    for authority in &args.authorities {
        subject = subject.with_authority(authority.clone());
    }
    for (key, value) in parse_pairs(&args.attributes)? {
        subject = subject.with_attribute(key, parse_value(&value));
    }
    Ok(subject)
}

/// Split `name=value` arguments.
pub fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .with_context(|| format!("Expected name=value, got '{pair}'"))
        })
        .collect()
}

/// JSON if the text parses as JSON, otherwise a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}
