//! Attribute information point (PIP).
//!
//! Supplies extended attributes that are not part of the request or the
//! identity token. Sources are consulted lazily by
//! [`EvaluationContext::get_attribute`] at most once per context.
//!
//! [`EvaluationContext::get_attribute`]: crate::context::EvaluationContext::get_attribute

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::context::EvaluationContext;

/// Errors raised by attribute sources.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipError {
    /// A source failed to produce attributes.
    #[error("Attribute source '{source_name}' failed: {message}")]
    Source {
        /// Name of the failing source.
        source_name: String,
        /// Description of the failure.
        message: String,
    },
}

impl PipError {
    /// Creates a new `Source` error.
    #[must_use]
    pub fn source_failed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// A provider of extended attributes.
///
/// Implementations must tolerate concurrent calls from independent contexts
/// and should be low-latency: they run synchronously during evaluation.
pub trait AttributeSource: Send + Sync {
    /// Source name for logs.
    fn name(&self) -> &str;

    /// Every attribute this source can supply for the context.
    ///
    /// # Errors
    ///
    /// Returns `PipError::Source` if the backing system fails.
    fn get_attributes(&self, ctx: &EvaluationContext) -> Result<HashMap<String, Value>, PipError>;
}

/// Composite over an ordered list of sources.
///
/// All sources are queried; when two supply the same key the earlier
/// source wins.
#[derive(Default, Clone)]
pub struct AttributeInformationPoint {
    sources: Vec<Arc<dyn AttributeSource>>,
}

impl AttributeInformationPoint {
    /// Create a PIP with no sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn AttributeSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Number of registered sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

impl AttributeSource for AttributeInformationPoint {
    fn name(&self) -> &str {
        "pip"
    }

    fn get_attributes(&self, ctx: &EvaluationContext) -> Result<HashMap<String, Value>, PipError> {
        let mut merged = HashMap::new();
        for source in &self.sources {
            let attributes = source.get_attributes(ctx).inspect_err(|e| {
                tracing::warn!(source = source.name(), error = %e, "Attribute source failed");
            })?;
            for (key, value) in attributes {
                merged.entry(key).or_insert(value);
            }
        }
        Ok(merged)
    }
}

/// Fixed attributes, identical for every context.
#[derive(Debug, Clone, Default)]
pub struct StaticAttributeSource {
    attributes: HashMap<String, Value>,
}

impl StaticAttributeSource {
    /// Create a source from a map.
    #[must_use]
    pub fn new(attributes: HashMap<String, Value>) -> Self {
        Self { attributes }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

impl AttributeSource for StaticAttributeSource {
    fn name(&self) -> &str {
        "static"
    }

    fn get_attributes(&self, _ctx: &EvaluationContext) -> Result<HashMap<String, Value>, PipError> {
        Ok(self.attributes.clone())
    }
}

/// Exposes the subject's own identity attributes as extended attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectAttributeSource;

impl AttributeSource for SubjectAttributeSource {
    fn name(&self) -> &str {
        "subject"
    }

    fn get_attributes(&self, ctx: &EvaluationContext) -> Result<HashMap<String, Value>, PipError> {
        Ok(ctx.subject.attributes.clone())
    }
}
