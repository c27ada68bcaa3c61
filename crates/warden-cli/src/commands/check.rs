use anyhow::Result;
use warden_policy::{PolicyEngine, RequestDescriptor};

use super::parse_remote;
use crate::cli::{CheckArgs, OutputFormat};
use crate::loader::{parse_pairs, subject};
use crate::output::{emit, print_allowed, print_denied, print_field};

pub fn describe(args: &CheckArgs) -> Result<RequestDescriptor> {
    let (path, query) = match args.path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (args.path.as_str(), None),
    };
    let mut request = RequestDescriptor::from_target(&args.method, path, query);
    for (name, value) in parse_pairs(&args.headers)? {
        request = request.with_header(&name, value);
    }
    if let Some(address) = parse_remote(args.remote.as_deref())? {
        request = request.with_remote_address(address);
    }

    Ok(request)
}

/// Returns whether the request was allowed.
pub async fn check(engine: &PolicyEngine, args: &CheckArgs, format: OutputFormat) -> Result<bool> {
    let subject = subject(&args.subject)?;
    let request = describe(args)?;

    let result = engine.url_manager().check_with_audit(&subject, &request).await?;

    emit(format, &result, || {
        print_field("Request", format!("{} {}", request.method, request.path));
        print_field("Subject", &subject.name);
        match &result.matched {
            Some(matched) => print_field(
                "Matched",
                format!("{} ({}) via {}", matched.policy_name, matched.policy_id, matched.pattern),
            ),
            None => print_field("Matched", "no policy"),
        }
        if let Some(expression) = &result.expression {
            print_field("Expression", expression);
        }
        print_field("Table generation", result.table_generation);
        match result.decision.deny_reason() {
            None => print_allowed("ALLOW"),
            Some(reason) => print_denied(&format!("DENY [{}] {}", reason.code, reason.message)),
        }
    })?;

    Ok(result.decision.is_allowed())
}
