//! Config schema types (engine connection, container policy, exec timing,
//! environment injection).
use std::collections::BTreeMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CubicleConfig {
    pub engine: EngineConfig,
    pub container: ContainerConfig,
    pub exec: ExecConfig,
    pub env: EnvConfig,
}

/// How to reach the container engine.
///
/// When both `ssh_host` and `ssh_user` are set the engine is reached through
/// an SSH tunnel and `socket` is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local engine endpoint: `unix:///path`, a bare socket path, or `tcp://host:port`.
    pub socket: String,
    pub ssh_host: Option<String>,
    pub ssh_user: Option<String>,
    /// Engine socket path on the remote host.
    pub remote_socket: String,
    /// Per-request timeout handed to the engine client.
    pub request_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: "unix:///var/run/docker.sock".into(),
            ssh_host: None,
            ssh_user: None,
            remote_socket: "/var/run/docker.sock".into(),
            request_timeout_secs: 900,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// `Some((user, host))` when the tunnel transport is configured.
    #[must_use]
    pub fn ssh_target(&self) -> Option<(&str, &str)> {
        let host = self.ssh_host.as_deref().filter(|h| !h.is_empty())?;
        let user = self.ssh_user.as_deref().filter(|u| !u.is_empty())?;
        Some((user, host))
    }
}

/// Reconnect policy: `max_attempts` tries, `base_delay_ms * 2^n` between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Per-session container policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    pub name_prefix: String,
    /// Memory limit (e.g. "512m", "2g").
    pub memory_limit: String,
    /// CPU limit in cores (1.0 = one core).
    pub cpu_limit: f64,
    pub working_dir: String,
    /// `user[:group]` the container runs as. `None` keeps the image default.
    pub user: Option<String>,
    /// Init script run before the keep-alive loop.
    pub entrypoint: Option<String>,
    pub enable_network: bool,
    /// Host directory holding `<session>/uploads` and `<session>/outputs`.
    pub data_base_path: String,
    /// Extra labels added to every session container.
    pub labels: BTreeMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "computer-use:latest".into(),
            name_prefix: "owui-chat".into(),
            memory_limit: "2g".into(),
            cpu_limit: 1.0,
            working_dir: "/home/assistant".into(),
            user: Some("assistant:assistant".into()),
            entrypoint: Some("/home/assistant/.entrypoint.sh".into()),
            enable_network: true,
            data_base_path: "/tmp/computer-use-data".into(),
            labels: BTreeMap::new(),
        }
    }
}

impl ContainerConfig {
    /// Memory limit in bytes, `None` if the string does not parse.
    #[must_use]
    pub fn memory_bytes(&self) -> Option<i64> {
        parse_memory_limit(&self.memory_limit)
    }

    /// CPU limit in the engine's nano-CPU unit.
    #[must_use]
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }

    /// The user name part of `user`, used for exec calls.
    #[must_use]
    pub fn exec_user(&self) -> Option<&str> {
        self.user
            .as_deref()
            .map(|u| u.split(':').next().unwrap_or(u))
            .filter(|u| !u.is_empty())
    }
}

/// Command timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub command_timeout_secs: u64,
    /// Idle period after which a container stops itself. 0 disables.
    pub idle_timeout_secs: u64,
    /// Grace period between TERM and KILL when a command times out.
    pub kill_grace_secs: u64,
    pub sub_agent_timeout_secs: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 600,
            idle_timeout_secs: 600,
            kill_grace_secs: 5,
            sub_agent_timeout_secs: 1800,
        }
    }
}

/// Base environment injected into every session container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub gitlab_host: Option<String>,
    pub anthropic_base_url: Option<String>,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub anthropic_api_key: Option<Secret<String>>,
    /// Static variables passed through verbatim.
    pub extra: BTreeMap<String, String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            gitlab_host: Some("gitlab.com".into()),
            anthropic_base_url: Some("https://api.anthropic.com".into()),
            anthropic_api_key: None,
            extra: BTreeMap::new(),
        }
    }
}

fn serialize_option_secret<S: serde::Serializer>(
    value: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Parse a memory limit such as `512m`, `2g`, `1GB` or `1048576` into bytes.
///
/// Suffixes are binary multiples and case-insensitive; a trailing `b` is
/// accepted after the unit.
#[must_use]
pub fn parse_memory_limit(raw: &str) -> Option<i64> {
    let s = raw.trim().to_ascii_lowercase();
    let s = s
        .strip_suffix('b')
        .filter(|rest| !rest.is_empty())
        .unwrap_or(&s);
    let (digits, multiplier) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 1i64 << 10),
        'm' => (&s[..s.len() - 1], 1i64 << 20),
        'g' => (&s[..s.len() - 1], 1i64 << 30),
        c if c.is_ascii_digit() => (s, 1),
        _ => return None,
    };
    let value: i64 = digits.trim().parse().ok()?;
    if value <= 0 {
        return None;
    }
    value.checked_mul(multiplier)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("2g", Some(2 * 1024 * 1024 * 1024))]
    #[case("512m", Some(512 * 1024 * 1024))]
    #[case("512M", Some(512 * 1024 * 1024))]
    #[case("1GB", Some(1024 * 1024 * 1024))]
    #[case("64k", Some(64 * 1024))]
    #[case("1048576", Some(1_048_576))]
    #[case("100b", Some(100))]
    #[case("", None)]
    #[case("g", None)]
    #[case("two gigs", None)]
    #[case("-1g", None)]
    fn memory_limit_parsing(#[case] raw: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_memory_limit(raw), expected);
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = CubicleConfig::default();
        assert_eq!(cfg.container.name_prefix, "owui-chat");
        assert_eq!(cfg.container.image, "computer-use:latest");
        assert_eq!(cfg.exec.command_timeout_secs, 600);
        assert_eq!(cfg.exec.idle_timeout_secs, 600);
        assert_eq!(cfg.engine.retry.max_attempts, 3);
        assert!(cfg.engine.ssh_target().is_none());
    }

    #[test]
    fn ssh_target_requires_host_and_user() {
        let mut engine = EngineConfig {
            ssh_host: Some("dockerai".into()),
            ..Default::default()
        };
        assert!(engine.ssh_target().is_none());
        engine.ssh_user = Some("docker-user".into());
        assert_eq!(engine.ssh_target(), Some(("docker-user", "dockerai")));
        engine.ssh_host = Some(String::new());
        assert!(engine.ssh_target().is_none());
    }

    #[test]
    fn exec_user_strips_group() {
        let container = ContainerConfig::default();
        assert_eq!(container.exec_user(), Some("assistant"));
        let container = ContainerConfig {
            user: None,
            ..Default::default()
        };
        assert_eq!(container.exec_user(), None);
    }

    #[test]
    fn nano_cpus_scales_cores() {
        let container = ContainerConfig {
            cpu_limit: 1.5,
            ..Default::default()
        };
        assert_eq!(container.nano_cpus(), 1_500_000_000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: CubicleConfig = toml::from_str(
            r#"
            [container]
            image = "ubuntu:24.04"

            [env]
            anthropic_api_key = "sk-test"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.container.image, "ubuntu:24.04");
        assert_eq!(cfg.container.memory_limit, "2g");
        assert_eq!(
            cfg.env
                .anthropic_api_key
                .as_ref()
                .map(|k| k.expose_secret().as_str()),
            Some("sk-test")
        );
        assert_eq!(cfg.env.gitlab_host.as_deref(), Some("gitlab.com"));
    }
}
