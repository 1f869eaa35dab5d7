use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failure reported by a non-reqwest `Transport`.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    #[error("Credential store error: {0:#}")]
    CredentialStore(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// Classify a response status from an authenticated call.
    /// Only 401 and 403 are failures here; everything else goes back to the caller.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 | 403 => Some(SessionError::AuthenticationFailed(format!(
                "server responded with {}",
                status
            ))),
            _ => None,
        }
    }

    pub fn unexpected_status(status: u16) -> Self {
        SessionError::AuthenticationFailed(format!("unexpected status {}", status))
    }

    pub fn credentials_not_set() -> Self {
        SessionError::AuthenticationFailed("credentials not set".to_string())
    }

    /// True when the user should be asked to re-enter credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SessionError::AuthenticationFailed(_))
    }

    /// True for network conditions a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::Network(_) | SessionError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_auth_codes() {
        for code in [401, 403] {
            let err = SessionError::from_status(code).expect("auth failure expected");
            assert!(err.is_auth_failure());
            assert_eq!(
                err.to_string(),
                format!("Authentication failed: server responded with {}", code)
            );
        }
    }

    #[test]
    fn test_from_status_passes_other_codes() {
        for code in [200, 204, 302, 400, 404, 429, 500, 503] {
            assert!(SessionError::from_status(code).is_none(), "code {}", code);
        }
    }

    #[test]
    fn test_classification() {
        assert!(SessionError::Transport("reset".into()).is_transient());
        assert!(!SessionError::Transport("reset".into()).is_auth_failure());
        assert!(SessionError::credentials_not_set().is_auth_failure());
        assert!(!SessionError::InvalidArgument("x".into()).is_transient());
        assert_eq!(
            SessionError::unexpected_status(200).to_string(),
            "Authentication failed: unexpected status 200"
        );
    }
}
