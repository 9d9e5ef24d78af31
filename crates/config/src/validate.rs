//! Configuration validation.
//!
//! Checks a TOML config against the known schema, flags unknown or misspelled
//! fields, and reports values the sandbox could not run with.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};

use crate::schema::{CubicleConfig, parse_memory_limit};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "container.memory_limit"
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}]: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Free-form string map (labels, extra env).
    Map,
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    let retry = Struct(HashMap::from([("max_attempts", Leaf), ("base_delay_ms", Leaf)]));
    let engine = Struct(HashMap::from([
        ("socket", Leaf),
        ("ssh_host", Leaf),
        ("ssh_user", Leaf),
        ("remote_socket", Leaf),
        ("request_timeout_secs", Leaf),
        ("retry", retry),
    ]));
    let container = Struct(HashMap::from([
        ("image", Leaf),
        ("name_prefix", Leaf),
        ("memory_limit", Leaf),
        ("cpu_limit", Leaf),
        ("working_dir", Leaf),
        ("user", Leaf),
        ("entrypoint", Leaf),
        ("enable_network", Leaf),
        ("data_base_path", Leaf),
        ("labels", Map),
    ]));
    let exec = Struct(HashMap::from([
        ("command_timeout_secs", Leaf),
        ("idle_timeout_secs", Leaf),
        ("kill_grace_secs", Leaf),
        ("sub_agent_timeout_secs", Leaf),
    ]));
    let env = Struct(HashMap::from([
        ("gitlab_host", Leaf),
        ("anthropic_base_url", Leaf),
        ("anthropic_api_key", Leaf),
        ("extra", Map),
    ]));

    Struct(HashMap::from([
        ("engine", engine),
        ("container", container),
        ("exec", exec),
        ("env", env),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate the config file at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(&actual_path) {
        Ok(content) => {
            let content = crate::env_subst::substitute_env(&content);
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path);
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path),
        },
    }
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<CubicleConfig>(toml_str) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();
    for (key, child) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message,
                });
            },
        }
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &CubicleConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut push = |severity, path: &str, message: String| {
        out.push(Diagnostic {
            severity,
            category: "value",
            path: path.to_string(),
            message,
        });
    };

    let c = &config.container;
    if c.image.trim().is_empty() {
        push(Severity::Error, "container.image", "image must not be empty".into());
    }
    if c.name_prefix.is_empty() {
        push(
            Severity::Error,
            "container.name_prefix",
            "name prefix must not be empty".into(),
        );
    } else if !c
        .name_prefix
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'))
    {
        push(
            Severity::Error,
            "container.name_prefix",
            format!("\"{}\" contains characters outside [A-Za-z0-9_.-]", c.name_prefix),
        );
    }
    if parse_memory_limit(&c.memory_limit).is_none() {
        push(
            Severity::Error,
            "container.memory_limit",
            format!("cannot parse memory limit \"{}\"", c.memory_limit),
        );
    }
    if c.cpu_limit.is_nan() || c.cpu_limit <= 0.0 {
        push(
            Severity::Error,
            "container.cpu_limit",
            format!("cpu limit must be positive, got {}", c.cpu_limit),
        );
    }
    if !Path::new(&c.data_base_path).is_absolute() {
        push(
            Severity::Error,
            "container.data_base_path",
            format!("\"{}\" must be an absolute host path", c.data_base_path),
        );
    }
    if !c.working_dir.starts_with('/') {
        push(
            Severity::Warning,
            "container.working_dir",
            format!("\"{}\" is not absolute", c.working_dir),
        );
    }

    let e = &config.engine;
    let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
    match (has(&e.ssh_host), has(&e.ssh_user)) {
        (true, false) => push(
            Severity::Error,
            "engine.ssh_user",
            "ssh_host is set but ssh_user is missing".into(),
        ),
        (false, true) => push(
            Severity::Error,
            "engine.ssh_host",
            "ssh_user is set but ssh_host is missing".into(),
        ),
        _ => {},
    }
    if e.retry.max_attempts == 0 {
        push(
            Severity::Error,
            "engine.retry.max_attempts",
            "at least one connection attempt is required".into(),
        );
    }
    if e.request_timeout_secs < config.exec.command_timeout_secs {
        push(
            Severity::Warning,
            "engine.request_timeout_secs",
            "shorter than exec.command_timeout_secs; long commands may be cut off by the client"
                .into(),
        );
    }

    let x = &config.exec;
    if x.command_timeout_secs == 0 {
        push(
            Severity::Error,
            "exec.command_timeout_secs",
            "command timeout must be greater than zero".into(),
        );
    }
    if x.idle_timeout_secs == 0 {
        push(
            Severity::Info,
            "exec.idle_timeout_secs",
            "idle shutdown disabled; containers run until stopped externally".into(),
        );
    }

    out
}
