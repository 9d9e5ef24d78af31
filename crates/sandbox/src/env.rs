//! Environment injected into session containers.

use std::{collections::BTreeMap, fmt};

use {
    cubicle_config::EnvConfig,
    secrecy::{ExposeSecret, Secret},
};

/// Container environment for one session.
///
/// Starts from the configured base set and layers caller values on top.
/// Empty values never produce a key. `Debug` prints key names only.
#[derive(Clone, Default)]
pub struct SessionEnv {
    vars: BTreeMap<String, String>,
}

impl SessionEnv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Base variables from the `[env]` config section.
    #[must_use]
    pub fn from_config(config: &EnvConfig) -> Self {
        let mut env = Self::new();
        for (key, value) in &config.extra {
            env.insert(key, value);
        }
        if let Some(host) = &config.gitlab_host {
            env.insert("GITLAB_HOST", host);
        }
        if let Some(key) = &config.anthropic_api_key {
            env.insert("ANTHROPIC_API_KEY", key.expose_secret());
        }
        if let Some(url) = &config.anthropic_base_url {
            env.insert("ANTHROPIC_BASE_URL", url);
        }
        env
    }

    #[must_use]
    pub fn gitlab_token(mut self, token: Option<&Secret<String>>) -> Self {
        if let Some(token) = token {
            self.insert("GITLAB_TOKEN", token.expose_secret());
        }
        self
    }

    #[must_use]
    pub fn user_name(mut self, name: Option<&str>) -> Self {
        if let Some(name) = name {
            self.insert("GIT_AUTHOR_NAME", name);
            self.insert("GIT_COMMITTER_NAME", name);
        }
        self
    }

    #[must_use]
    pub fn user_email(mut self, email: Option<&str>) -> Self {
        if let Some(email) = email.filter(|e| !e.is_empty()) {
            self.insert("GIT_AUTHOR_EMAIL", email);
            self.insert("GIT_COMMITTER_EMAIL", email);
            self.insert(
                "ANTHROPIC_CUSTOM_HEADERS",
                &format!("x-openwebui-user-email: {email}"),
            );
        }
        self
    }

    /// Arbitrary override, applied last by the caller.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    fn insert(&mut self, key: &str, value: &str) {
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.vars.insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// `KEY=VALUE` pairs sorted by key.
    #[must_use]
    pub fn to_vars(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

impl fmt::Debug for SessionEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEnv")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_config_without_key() {
        let env = SessionEnv::from_config(&EnvConfig::default());
        assert_eq!(env.to_vars(), vec![
            "ANTHROPIC_BASE_URL=https://api.anthropic.com".to_string(),
            "GITLAB_HOST=gitlab.com".to_string(),
        ]);
        assert_eq!(env.get("ANTHROPIC_API_KEY"), None);
    }

    #[test]
    fn proxy_base_url_is_injected_without_key() {
        let config = EnvConfig {
            anthropic_base_url: Some("http://litellm:4000".into()),
            anthropic_api_key: None,
            ..Default::default()
        };
        let env = SessionEnv::from_config(&config).user_email(Some("ada@example.com"));
        assert_eq!(env.get("ANTHROPIC_BASE_URL"), Some("http://litellm:4000"));
        assert_eq!(
            env.get("ANTHROPIC_CUSTOM_HEADERS"),
            Some("x-openwebui-user-email: ada@example.com")
        );
        assert_eq!(env.get("ANTHROPIC_API_KEY"), None);
    }

    #[test]
    fn unset_base_url_is_omitted() {
        let config = EnvConfig {
            anthropic_base_url: None,
            ..Default::default()
        };
        assert_eq!(SessionEnv::from_config(&config).get("ANTHROPIC_BASE_URL"), None);
    }

    #[test]
    fn full_override_set() {
        let config = EnvConfig {
            anthropic_api_key: Some(Secret::new("sk-1".into())),
            ..Default::default()
        };
        let env = SessionEnv::from_config(&config)
            .gitlab_token(Some(&Secret::new("glpat-x".into())))
            .user_name(Some("Ada"))
            .user_email(Some("ada@example.com"))
            .with("EXTRA", "1");
        assert_eq!(
            env.to_vars(),
            vec![
                "ANTHROPIC_API_KEY=sk-1",
                "ANTHROPIC_BASE_URL=https://api.anthropic.com",
                "ANTHROPIC_CUSTOM_HEADERS=x-openwebui-user-email: ada@example.com",
                "EXTRA=1",
                "GITLAB_HOST=gitlab.com",
                "GITLAB_TOKEN=glpat-x",
                "GIT_AUTHOR_EMAIL=ada@example.com",
                "GIT_AUTHOR_NAME=Ada",
                "GIT_COMMITTER_EMAIL=ada@example.com",
                "GIT_COMMITTER_NAME=Ada",
            ]
        );
    }

    #[test]
    fn empty_values_are_omitted() {
        let env = SessionEnv::new()
            .gitlab_token(Some(&Secret::new(String::new())))
            .user_name(Some(""))
            .user_email(Some(""))
            .with("X", "");
        assert!(env.is_empty());
    }

    #[test]
    fn overrides_win_over_base() {
        let env = SessionEnv::from_config(&EnvConfig::default()).with("GITLAB_HOST", "git.corp");
        assert_eq!(env.get("GITLAB_HOST"), Some("git.corp"));
    }

    #[test]
    fn debug_hides_values() {
        let env = SessionEnv::new().gitlab_token(Some(&Secret::new("glpat-secret".into())));
        let printed = format!("{env:?}");
        assert!(printed.contains("GITLAB_TOKEN"));
        assert!(!printed.contains("glpat-secret"));
    }
}
