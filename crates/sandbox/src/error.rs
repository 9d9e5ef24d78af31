use thiserror::Error;

/// Container engine failure, classified once where the engine call fails.
///
/// Callers above the engine adapter branch on the variant, never on the
/// message text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Connection-level failure expected to clear after reconnecting
    /// (broken pipe, reset, refused, dead tunnel).
    #[error("transient engine error: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Name already taken, usually by a concurrent create.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0}")]
    Fatal(String),
}

impl EngineError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Connection to container engine failed")]
    NotConnected,

    #[error("reconnect failed after {attempts} attempts: {last}")]
    ReconnectFailed { attempts: u32, last: String },

    #[error("invalid session id: {0}")]
    InvalidSession(String),

    #[error("invalid sandbox configuration: {0}")]
    Config(String),
}

impl Error {
    /// The engine classification, if this error came from an engine call.
    #[must_use]
    pub fn engine(&self) -> Option<&EngineError> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_text_is_user_facing() {
        assert_eq!(
            Error::NotConnected.to_string(),
            "Connection to container engine failed"
        );
    }

    #[test]
    fn engine_accessor() {
        let err = Error::from(EngineError::NotFound("owui-chat-x".into()));
        assert!(err.engine().is_some_and(EngineError::is_not_found));
        assert!(Error::NotConnected.engine().is_none());
    }
}
