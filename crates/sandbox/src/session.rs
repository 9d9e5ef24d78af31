//! Session identifiers and the resource names derived from them.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

/// Ids that callers send when no real session exists.
const RESERVED_IDS: &[&str] = &["unset", "default"];

/// A validated, caller-supplied session id.
///
/// The raw value is kept for labels and logging. Every engine or host
/// resource name goes through [`SessionId::sanitized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    raw: String,
    sanitized: String,
}

impl SessionId {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidSession("session id is empty".into()));
        }
        if RESERVED_IDS
            .iter()
            .any(|reserved| trimmed.eq_ignore_ascii_case(reserved))
        {
            return Err(Error::InvalidSession(format!(
                "\"{trimmed}\" is not a real session"
            )));
        }
        let sanitized = sanitize(&raw);
        Ok(Self { raw, sanitized })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The id with every character outside `[A-Za-z0-9_.-]` replaced by `-`.
    #[must_use]
    pub fn sanitized(&self) -> &str {
        &self.sanitized
    }

    #[must_use]
    pub fn container_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.sanitized)
    }

    #[must_use]
    pub fn workspace_volume(&self) -> String {
        format!("chat-{}-workspace", self.sanitized)
    }

    #[must_use]
    pub fn hostname(&self) -> String {
        let short: String = self.sanitized.chars().take(8).collect();
        format!("chat-{short}")
    }

    #[must_use]
    pub fn data_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.sanitized)
    }

    #[must_use]
    pub fn uploads_dir(&self, base: &Path) -> PathBuf {
        self.data_dir(base).join("uploads")
    }

    #[must_use]
    pub fn outputs_dir(&self, base: &Path) -> PathBuf {
        self.data_dir(base).join("outputs")
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Map every character outside `[A-Za-z0-9_.-]` to `-`, one per char.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("My Chat #1", "My-Chat--1")]
    #[case("abc-123_x.y", "abc-123_x.y")]
    #[case("a/b\\c", "a-b-c")]
    #[case("../etc", "..-etc")]
    #[case("héllo", "h-llo")]
    #[case("日本", "--")]
    fn sanitizes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize(raw), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("unset")]
    #[case("DEFAULT")]
    #[case(" Unset ")]
    fn rejects_reserved_and_empty(#[case] raw: &str) {
        assert!(matches!(
            SessionId::parse(raw),
            Err(Error::InvalidSession(_))
        ));
    }

    #[test]
    fn derived_names() {
        let id = SessionId::parse("My Chat #1").unwrap();
        assert_eq!(id.as_str(), "My Chat #1");
        assert_eq!(id.container_name("owui-chat"), "owui-chat-My-Chat--1");
        assert_eq!(id.workspace_volume(), "chat-My-Chat--1-workspace");
        assert_eq!(id.hostname(), "chat-My-Chat-");
        assert_eq!(
            id.uploads_dir(Path::new("/data")),
            PathBuf::from("/data/My-Chat--1/uploads")
        );
        assert_eq!(
            id.outputs_dir(Path::new("/data")),
            PathBuf::from("/data/My-Chat--1/outputs")
        );
    }

    #[test]
    fn host_paths_stay_under_base() {
        let id = SessionId::parse("../../root").unwrap();
        let dir = id.data_dir(Path::new("/data"));
        assert_eq!(dir, PathBuf::from("/data/..-..-root"));
        assert_eq!(dir.parent(), Some(Path::new("/data")));
    }

    #[test]
    fn identical_sanitization_is_same_resource() {
        let a = SessionId::parse("chat 1").unwrap();
        let b = SessionId::parse("chat#1").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.container_name("p"), b.container_name("p"));
    }

    #[test]
    fn sanitized_names_only_use_allowed_chars() {
        for raw in ["a b", "ü∂ß", "x\ny", "tab\there", "quote\"s'"] {
            let name = SessionId::parse(raw).unwrap().container_name("owui-chat");
            assert!(
                name.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')),
                "{name}"
            );
        }
    }
}
