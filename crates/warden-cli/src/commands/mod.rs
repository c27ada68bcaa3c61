pub mod authorize;
pub mod check;
pub mod explain;
pub mod risk;

use std::net::IpAddr;

use anyhow::{Context, Result};

pub(crate) fn parse_remote(remote: Option<&str>) -> Result<Option<IpAddr>> {
    remote
        .map(|r| r.parse::<IpAddr>().with_context(|| format!("Invalid client address '{r}'")))
        .transpose()
}
