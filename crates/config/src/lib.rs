//! Configuration loading, validation, and env substitution.
//!
//! Config files: `cubicle.toml`, `cubicle.yaml`, or `cubicle.json`
//! Searched in `./` then `~/.config/cubicle/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file, and `CUBICLE_*` environment overrides after parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        ContainerConfig, CubicleConfig, EngineConfig, EnvConfig, ExecConfig, RetryConfig,
        parse_memory_limit,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config, validate_toml_str},
};
