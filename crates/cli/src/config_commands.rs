use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    cubicle_config::{CubicleConfig, Severity, ValidationResult},
    secrecy::Secret,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file, env overrides, defaults) as TOML.
    Show,
    /// Validate the configuration file and report errors/warnings.
    Validate {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => show(path),
        ConfigAction::Validate { verbose } => check(path, verbose),
    }
}

const REDACTED: &str = "<redacted>";

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn redacted(mut config: CubicleConfig) -> CubicleConfig {
    if config.env.anthropic_api_key.is_some() {
        config.env.anthropic_api_key = Some(Secret::new(REDACTED.into()));
    }
    config
}

fn show(path: Option<&Path>) -> Result<()> {
    let config = crate::load_config(path)?;
    print!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

fn render(result: &ValidationResult, verbose: bool) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let (color, label) = match d.severity {
                Severity::Error => (RED, "error"),
                Severity::Warning => (YELLOW, "warning"),
                Severity::Info => (CYAN, "info"),
            };
            if d.path.is_empty() {
                format!("  {BOLD}{color}{label}{RESET} {}", d.message)
            } else {
                format!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message)
            }
        })
        .collect()
}

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = cubicle_config::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let lines = render(&result, verbose);
    for line in &lines {
        eprintln!("{line}");
    }
    if !lines.is_empty() {
        eprintln!();
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
