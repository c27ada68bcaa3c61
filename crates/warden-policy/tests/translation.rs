use std::sync::Arc;

use warden_policy::expr::Expr;
use warden_policy::translate::{FunctionTranslator, Terminal};
use warden_policy::{
    Effect, ExpressionAnalyzer, InMemoryCatalog, InMemoryPolicyStore, Policy, PolicyCondition,
    PolicyRule, PolicyStore, PolicyTarget, PolicyTranslator,
};

const POLICIES: &str = r#"[
  {
    "id": "finance-reports",
    "name": "Finance reports",
    "effect": "ALLOW",
    "priority": 20,
    "targets": [
      { "targetType": "URL", "targetIdentifier": "/finance/**", "httpMethod": "GET" }
    ],
    "rules": [
      {
        "description": "finance staff in a calm context",
        "conditions": [
          { "expression": "hasGroup('finance')", "authorizationPhase": "PRE" },
          { "expression": "getRiskScore() <= 40", "authorizationPhase": "PRE" }
        ]
      },
      {
        "description": "administrators",
        "conditions": [
          { "expression": "hasRole('ADMIN')", "authorizationPhase": "PRE" }
        ]
      }
    ]
  }
]"#;

#[tokio::test]
async fn stored_policy_is_described() {
    let store = InMemoryPolicyStore::from_json(POLICIES).unwrap();
    let policies = store.load_url_policies().await.unwrap();
    let policy = &policies[0];

    let translator = PolicyTranslator::new();
    assert_eq!(
        translator.describe_policy(policy),
        "Allow access to GET /finance/** when any of (all of (the user belongs to the group finance; \
         the contextual risk score is at most 40); the user has the role ADMIN)"
    );

    let catalog = InMemoryCatalog::new()
        .with_group("finance", "Finance department")
        .with_role("ADMIN", "Administrator");
    let analysis = ExpressionAnalyzer::new()
        .with_catalog(Arc::new(catalog))
        .analyze(&translator.parse_policy(policy));

    assert_eq!(analysis.groups[0].display_name, "Finance department");
    assert_eq!(analysis.roles[0].display_name, "Administrator");
    assert!(analysis.requires_authentication);
    assert_eq!(analysis.subject_type, None);
}

struct WeekdayTranslator;

impl FunctionTranslator for WeekdayTranslator {
    fn names(&self) -> &[&str] {
        &["isWeekday"]
    }

    fn translate(&self, _name: &str, _args: &[Expr], text: &str) -> Terminal {
        Terminal::new(text, "it is a weekday")
    }
}

#[test]
fn custom_translator_extends_vocabulary() {
    let policy = Policy::new("weekday", "Weekday access", Effect::Deny)
        .with_target(PolicyTarget::url("/batch/**"))
        .with_rule(PolicyRule::new("weekdays").with_condition(PolicyCondition::pre("not isWeekday()")));

    let plain = PolicyTranslator::new();
    assert_eq!(
        plain.describe_policy(&policy),
        "Deny access to /batch/** when it is not the case that the condition `isWeekday()` holds"
    );

    let extended = PolicyTranslator::new().with_translator(Arc::new(WeekdayTranslator));
    assert_eq!(
        extended.describe_policy(&policy),
        "Deny access to /batch/** when it is not the case that it is a weekday"
    );
}
