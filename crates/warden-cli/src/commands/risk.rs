use anyhow::Result;
use warden_policy::{PolicyEngine, RequestDescriptor};

use super::parse_remote;
use crate::cli::{OutputFormat, RiskArgs};
use crate::loader::subject;
use crate::output::{emit, print_field};

pub async fn risk(engine: &PolicyEngine, args: &RiskArgs, format: OutputFormat) -> Result<()> {
    let subject = subject(&args.subject)?;
    let mut request = RequestDescriptor::new("GET", args.path.clone());
    if let Some(address) = parse_remote(args.remote.as_deref())? {
        request = request.with_remote_address(address);
    }

    let ctx = engine.contexts().for_request(&subject, &request).await?;
    let assessment = engine.risk_engine().assess(&ctx);

    emit(format, &assessment, || {
        for factor in &assessment.factors {
            let note = if factor.unknown { " (unknown)" } else { "" };
            print_field(&format!("  {}", factor.name), format!("{}{}", factor.contribution, note));
        }
        print_field("Risk score", assessment.score);
    })
}
