use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(
        "KRX login requires credentials. Provide mbr_id/password or set environment variables \
         KRX_MBR_ID and KRX_PASSWORD. You may also set KRX_CREDENTIALS_FILE or use \
         ~/.config/krx-session/krx_credentials.json"
    )]
    CredentialsMissing,

    #[error("KRX login failed: {0}")]
    AuthenticationFailed(String),

    /// Session file I/O problem. Absorbed inside the store, never returned to callers.
    #[error("Session store unavailable: {0}")]
    TransientStore(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Maximum number of characters of a response kept in diagnostics
pub const MAX_SNIPPET_CHARS: usize = 200;

impl SessionError {
    /// Truncate a response body for an error message.
    /// Counts characters, not bytes: portal responses are mostly Korean text.
    pub fn snippet(body: &str) -> String {
        body.chars().take(MAX_SNIPPET_CHARS).collect()
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        SessionError::AuthenticationFailed(format!(
            "status={}. Response snippet: {}",
            status,
            Self::snippet(body)
        ))
    }

    /// True when the error means "the portal said no", as opposed to setup or I/O trouble
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SessionError::AuthenticationFailed(_))
    }
}
