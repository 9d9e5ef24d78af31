use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::CubicleConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "cubicle.toml",
    "cubicle.yaml",
    "cubicle.yml",
    "cubicle.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CubicleConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply `CUBICLE_*`
/// environment overrides.
///
/// Search order:
/// 1. `./cubicle.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/cubicle/cubicle.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `CubicleConfig::default()` when no file is found or the file
/// does not parse.
pub fn discover_and_load() -> CubicleConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                CubicleConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            CubicleConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists());
    if local.is_some() {
        return local;
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/cubicle/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "cubicle").map(|d| d.config_dir().to_path_buf())
}

/// Apply `CUBICLE_*` environment variables on top of a loaded config.
pub fn apply_env_overrides(config: &mut CubicleConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut CubicleConfig, lookup: impl Fn(&str) -> Option<String>) {
    let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = get("CUBICLE_DOCKER_SOCKET") {
        config.engine.socket = v;
    }
    if let Some(v) = get("CUBICLE_SSH_HOST") {
        config.engine.ssh_host = Some(v);
    }
    if let Some(v) = get("CUBICLE_SSH_USER") {
        config.engine.ssh_user = Some(v);
    }
    if let Some(v) = get("CUBICLE_IMAGE") {
        config.container.image = v;
    }
    if let Some(v) = get("CUBICLE_DATA_BASE_PATH") {
        config.container.data_base_path = v;
    }
    if let Some(v) = get("CUBICLE_ANTHROPIC_API_KEY") {
        config.env.anthropic_api_key = Some(Secret::new(v));
    }
    if let Some(v) = get("CUBICLE_ENABLE_NETWORK") {
        match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => config.container.enable_network = true,
            "0" | "false" | "no" | "off" => config.container.enable_network = false,
            other => warn!(value = other, "ignoring invalid CUBICLE_ENABLE_NETWORK"),
        }
    }
    for (name, slot) in [
        ("CUBICLE_COMMAND_TIMEOUT", &mut config.exec.command_timeout_secs),
        ("CUBICLE_IDLE_TIMEOUT", &mut config.exec.idle_timeout_secs),
    ] {
        if let Some(v) = get(name) {
            match v.parse() {
                Ok(secs) => *slot = secs,
                Err(_) => warn!(name, value = %v, "ignoring non-numeric override"),
            }
        }
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CubicleConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
