use secrecy::Secret;

/// Per-call identity, passed explicitly to every tool.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub gitlab_token: Option<Secret<String>>,
}

impl ToolContext {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_name: None,
            user_email: None,
            gitlab_token: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, name: Option<String>, email: Option<String>) -> Self {
        self.user_name = name.filter(|n| !n.is_empty());
        self.user_email = email.filter(|e| !e.is_empty());
        self
    }

    #[must_use]
    pub fn with_gitlab_token(mut self, token: Option<String>) -> Self {
        self.gitlab_token = token.filter(|t| !t.is_empty()).map(Secret::new);
        self
    }
}
