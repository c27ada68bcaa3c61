//! Description tree produced by the translator.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::authority::AuthorityKind;

/// Logical grouping of description nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    /// Every child must hold.
    And,
    /// At least one child must hold.
    Or,
    /// The single child must not hold.
    Not,
}

/// A node of the description tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExpressionNode {
    /// A combination of child nodes.
    Logical {
        op: LogicalOperator,
        children: Vec<ExpressionNode>,
    },
    /// A leaf condition.
    Terminal(Terminal),
}

/// A leaf condition with its rendering and implied authorities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Terminal {
    /// Source text of the condition.
    pub text: String,

    /// Human-readable description.
    pub description: String,

    /// Whether the condition can only hold for an authenticated subject.
    pub requires_auth: bool,

    /// Authorities the condition checks for.
    pub authorities: BTreeSet<String>,

    /// Kind of authority the condition is about, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<AuthorityKind>,

    /// Actions the condition grants or checks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

impl Terminal {
    /// A terminal with no implied authorities.
    #[must_use]
    pub fn new(text: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            description: description.into(),
            requires_auth: false,
            authorities: BTreeSet::new(),
            subject_type: None,
            actions: Vec::new(),
        }
    }

    /// A terminal standing for text that could not be interpreted.
    #[must_use]
    pub fn opaque(text: impl Into<String>) -> Self {
        let text = text.into();
        let description = format!("the condition `{}` holds", text.trim());
        Self::new(text, description)
    }

    /// Mark the terminal as requiring an authenticated subject.
    #[must_use]
    pub fn requiring_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    /// Add implied authorities of one kind.
    #[must_use]
    pub fn with_authorities<I>(mut self, kind: AuthorityKind, authorities: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.authorities.extend(authorities);
        self.subject_type = Some(kind);
        self.requires_auth = true;
        self
    }

    /// Add an action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }
}

impl ExpressionNode {
    /// Wrap a terminal.
    #[must_use]
    pub fn terminal(terminal: Terminal) -> Self {
        Self::Terminal(terminal)
    }

    /// An opaque terminal carrying the raw text.
    #[must_use]
    pub fn opaque(text: impl Into<String>) -> Self {
        Self::Terminal(Terminal::opaque(text))
    }

    /// Combine children, collapsing a single child into itself.
    #[must_use]
    pub fn combine(op: LogicalOperator, mut children: Vec<ExpressionNode>) -> Self {
        if op != LogicalOperator::Not && children.len() == 1 {
            return children.remove(0);
        }
        Self::Logical { op, children }
    }

    /// Union of authorities checked anywhere in the tree.
    #[must_use]
    pub fn required_authorities(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.for_each_terminal(&mut |t| out.extend(t.authorities.iter().cloned()));
        out
    }

    /// Whether any leaf requires an authenticated subject.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        let mut requires = false;
        self.for_each_terminal(&mut |t| requires |= t.requires_auth);
        requires
    }

    /// The authority kind shared by every leaf that names one.
    ///
    /// `None` if no leaf names an authority or the leaves disagree.
    #[must_use]
    pub fn subject_type(&self) -> Option<AuthorityKind> {
        let mut kinds = BTreeSet::new();
        self.for_each_terminal(&mut |t| {
            if let Some(kind) = t.subject_type {
                kinds.insert(kind);
            }
        });
        match kinds.len() {
            1 => kinds.into_iter().next(),
            _ => None,
        }
    }

    /// Visit every terminal, depth first.
    pub fn for_each_terminal<'a>(&'a self, visit: &mut dyn FnMut(&'a Terminal)) {
        match self {
            Self::Terminal(terminal) => visit(terminal),
            Self::Logical { children, .. } => {
                for child in children {
                    child.for_each_terminal(visit);
                }
            }
        }
    }

    /// Render the tree as one sentence fragment.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Terminal(terminal) => terminal.description.clone(),
            Self::Logical { op, children } => {
                let parts: Vec<String> = children.iter().map(Self::render).collect();
                match op {
                    LogicalOperator::And => format!("all of ({})", parts.join("; ")),
                    LogicalOperator::Or => format!("any of ({})", parts.join("; ")),
                    LogicalOperator::Not => format!("it is not the case that {}", parts.join("; ")),
                }
            }
        }
    }
}
