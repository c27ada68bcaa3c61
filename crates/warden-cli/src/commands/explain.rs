use std::sync::Arc;

use anyhow::{Result, bail};
use colored::Colorize;
use serde::Serialize;
use warden_policy::translate::NamedAuthority;
use warden_policy::{ExpressionAnalyzer, InMemoryCatalog, InMemoryPolicyStore, PolicyAnalysis, PolicyTranslator};

use crate::cli::{ExplainArgs, OutputFormat};
use crate::output::{emit, print_field};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Explanation {
    #[serde(skip_serializing_if = "Option::is_none")]
    policy_id: Option<String>,
    summary: String,
    analysis: PolicyAnalysis,
}

pub fn explain(
    store: Option<&InMemoryPolicyStore>,
    catalog: Option<Arc<InMemoryCatalog>>,
    args: &ExplainArgs,
    format: OutputFormat,
) -> Result<()> {
    let translator = PolicyTranslator::new();
    let analyzer = match catalog {
        Some(catalog) => ExpressionAnalyzer::new().with_catalog(catalog),
        None => ExpressionAnalyzer::new(),
    };

    let explanations = match (&args.condition, store) {
        (Some(condition), _) => {
            let node = translator.parse_condition(condition);
            vec![Explanation {
                policy_id: None,
                summary: node.render(),
                analysis: analyzer.analyze(&node),
            }]
        }
        (None, Some(store)) => {
            let policies: Vec<_> = store
                .snapshot()?
                .into_iter()
                .filter(|p| args.id.as_deref().is_none_or(|id| p.id == id))
                .collect();
            if policies.is_empty()
                && let Some(id) = &args.id
            {
                bail!("No policy with id '{id}'");
            }
            policies
                .iter()
                .map(|policy| Explanation {
                    policy_id: Some(policy.id.clone()),
                    summary: translator.describe_policy(policy),
                    analysis: analyzer.analyze(&translator.parse_policy(policy)),
                })
                .collect()
        }
        (None, None) => bail!("Nothing to explain: pass --condition or a policy file"),
    };

    emit(format, &explanations, || {
        for explanation in &explanations {
            if let Some(id) = &explanation.policy_id {
                println!("{}", id.bold());
            }
            println!("  {}", explanation.summary);
            print_authorities("  Roles", &explanation.analysis.roles);
            print_authorities("  Groups", &explanation.analysis.groups);
            print_authorities("  Permissions", &explanation.analysis.permissions);
            if explanation.analysis.requires_authentication {
                print_field("  Requires sign-in", "yes");
            }
        }
    })
}

fn print_authorities(label: &str, authorities: &[NamedAuthority]) {
    if authorities.is_empty() {
        return;
    }
    let names: Vec<&str> = authorities.iter().map(|a| a.display_name.as_str()).collect();
    print_field(label, names.join(", "));
}
