use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden CLI - evaluate and explain access policies offline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON file with an array of policies
    #[arg(short, long, global = true, env = "WARDEN_POLICIES", default_value = "policies.json")]
    pub policies: PathBuf,

    /// Engine configuration (TOML)
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity directory (JSON) used to resolve roles, groups and permissions
    #[arg(long, global = true, env = "WARDEN_DIRECTORY")]
    pub directory: Option<PathBuf>,

    /// Permission and display-name catalog (JSON)
    #[arg(long, global = true, env = "WARDEN_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decide a request path
    Check(CheckArgs),
    /// Decide a method invocation (PRE, and POST with --return-value)
    Authorize(AuthorizeArgs),
    /// Describe policies in natural language
    Explain(ExplainArgs),
    /// Score a synthetic request
    Risk(RiskArgs),
}

#[derive(clap::Args)]
pub struct SubjectArgs {
    /// Principal name (anonymous if omitted)
    #[arg(short, long)]
    pub user: Option<String>,
    /// Role granted directly to the subject (repeatable)
    #[arg(short, long = "role")]
    pub roles: Vec<String>,
    /// Authority granted directly to the subject (repeatable)
    #[arg(short, long = "authority")]
    pub authorities: Vec<String>,
    /// Subject attribute as key=value, value parsed as JSON if possible (repeatable)
    #[arg(long = "attr")]
    pub attributes: Vec<String>,
}

#[derive(clap::Args)]
pub struct CheckArgs {
    /// HTTP method
    pub method: String,
    /// Request path, optionally with a query string
    pub path: String,
    #[command(flatten)]
    pub subject: SubjectArgs,
    /// Client address
    #[arg(long)]
    pub remote: Option<String>,
    /// Request header as name=value (repeatable)
    #[arg(long = "header")]
    pub headers: Vec<String>,
}

#[derive(clap::Args)]
pub struct AuthorizeArgs {
    /// Method signature (e.g. DocumentService.getDocument(String))
    pub signature: String,
    #[command(flatten)]
    pub subject: SubjectArgs,
    /// Named argument as name=value, value parsed as JSON if possible (repeatable)
    #[arg(long = "arg")]
    pub arguments: Vec<String>,
    /// Return value as JSON; enables the POST decision
    #[arg(long)]
    pub return_value: Option<String>,
}

#[derive(clap::Args)]
pub struct ExplainArgs {
    /// Only explain this policy
    #[arg(long)]
    pub id: Option<String>,
    /// Explain a single condition instead of the policy file
    #[arg(long)]
    pub condition: Option<String>,
}

#[derive(clap::Args)]
pub struct RiskArgs {
    #[command(flatten)]
    pub subject: SubjectArgs,
    /// Client address
    #[arg(long)]
    pub remote: Option<String>,
    /// Request path
    #[arg(long, default_value = "/")]
    pub path: String,
}
