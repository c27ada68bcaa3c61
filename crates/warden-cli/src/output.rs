use colored::Colorize;
use serde::Serialize;

use crate::cli::OutputFormat;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_field(label: &str, value: impl std::fmt::Display) {
    println!("{}: {}", label.cyan(), value);
}

pub fn print_allowed(msg: &str) {
    println!("{} {}", "✓".green(), msg.green());
}

pub fn print_denied(msg: &str) {
    println!("{} {}", "✗".red(), msg.red());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print `value` as JSON, or run `text` for the human-readable form.
pub fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce()) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Text => {
            text();
            Ok(())
        }
    }
}
