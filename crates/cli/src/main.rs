mod config_commands;
mod sandbox_commands;
mod tool_commands;

use std::path::{Path, PathBuf};

use {
    clap::{Args, Parser, Subcommand},
    cubicle_config::CubicleConfig,
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "cubicle", version, about = "Per-chat-session container sandboxes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (overrides discovery of ./cubicle.toml and the user config dir).
    #[arg(long, global = true, env = "CUBICLE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

/// Who the container is being prepared for.
#[derive(Args, Clone, Default)]
struct Identity {
    /// Chat session id the container belongs to.
    #[arg(long)]
    session: String,
    /// Git author/committer name inside the container.
    #[arg(long)]
    user_name: Option<String>,
    /// Git author/committer email inside the container.
    #[arg(long)]
    user_email: Option<String>,
    /// GitLab personal access token injected as GITLAB_TOKEN.
    #[arg(long, env = "CUBICLE_GITLAB_TOKEN", hide_env_values = true)]
    gitlab_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the container engine answers.
    Ping,
    /// Create or revive the container for a session.
    Ensure {
        #[command(flatten)]
        identity: Identity,
    },
    /// Run a shell command in a session's container.
    Exec {
        #[command(flatten)]
        identity: Identity,
        /// Timeout in seconds (defaults to exec.command_timeout_secs).
        #[arg(long)]
        timeout: Option<u64>,
        /// Command to run; arguments are joined with spaces, like ssh.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Invoke one tool by name.
    Tool {
        #[command(flatten)]
        identity: Identity,
        /// Tool name (see `cubicle tools`).
        name: String,
        /// Tool parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// List tools with their parameter schemas.
    Tools,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Load the explicit config file, or discover one. Env overrides apply
/// either way.
fn load_config(path: Option<&Path>) -> anyhow::Result<CubicleConfig> {
    match path {
        Some(path) => {
            let mut config = cubicle_config::load_config(path)?;
            cubicle_config::apply_env_overrides(&mut config);
            Ok(config)
        },
        None => Ok(cubicle_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "cubicle starting");

    // Validation must see a broken file rather than fail on loading it.
    if let Commands::Config { action } = cli.command {
        return config_commands::handle_config(action, cli.config.as_deref());
    }
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ping => sandbox_commands::ping(&config).await,
        Commands::Ensure { identity } => sandbox_commands::ensure(&config, &identity).await,
        Commands::Exec {
            identity,
            timeout,
            command,
        } => {
            let code = sandbox_commands::exec(&config, &identity, timeout, &command).await?;
            std::process::exit(code);
        },
        Commands::Tool {
            identity,
            name,
            params,
        } => tool_commands::run(&config, &identity, &name, &params).await,
        Commands::Tools => tool_commands::list(&config),
        Commands::Config { .. } => Ok(()),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exec_takes_trailing_command() {
        let cli = Cli::try_parse_from([
            "cubicle", "exec", "--session", "abc", "--timeout", "30", "--", "ls", "-la", "/tmp",
        ])
        .unwrap();
        let Commands::Exec {
            identity,
            timeout,
            command,
        } = cli.command
        else {
            panic!("expected exec");
        };
        assert_eq!(identity.session, "abc");
        assert_eq!(timeout, Some(30));
        assert_eq!(command, vec!["ls", "-la", "/tmp"]);
    }

    #[test]
    fn tool_defaults_params_to_empty_object() {
        let cli = Cli::try_parse_from([
            "cubicle",
            "--json-logs",
            "tool",
            "--session",
            "abc",
            "--user-email",
            "ada@example.com",
            "view",
        ])
        .unwrap();
        assert!(cli.json_logs);
        let Commands::Tool {
            identity,
            name,
            params,
        } = cli.command
        else {
            panic!("expected tool");
        };
        assert_eq!(name, "view");
        assert_eq!(params, "{}");
        assert_eq!(identity.user_email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn exec_requires_session() {
        assert!(Cli::try_parse_from(["cubicle", "exec", "--", "ls"]).is_err());
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cubicle.toml");
        std::fs::write(&path, "[container]\nimage = \"sandbox:test\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.container.image, "sandbox:test");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(Path::new("/nonexistent/cubicle.toml"))).is_err());
    }
}
