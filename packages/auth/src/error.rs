// ABOUTME: Error types for credential management and OAuth operations
// ABOUTME: Distinguishes re-authorization, timeout, refresh and corrupt-store failures

use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authorization required for {0}: no usable credential is stored")]
    AuthorizationRequired(String),

    #[error("Authorization timed out after {0} seconds waiting for user consent")]
    AuthorizationTimeout(u64),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Credential store is corrupt: {0}")]
    CorruptCredentialStore(String),

    #[error("OAuth authentication failed: {0}")]
    OAuthFailed(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("State mismatch: CSRF protection failed")]
    StateMismatch,

    #[error("Callback server error: {0}")]
    CallbackServer(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("PKCE error: {0}")]
    Pkce(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Whether running the interactive authorization flow again can resolve this error
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationRequired(_)
                | Self::TokenRefreshFailed(_)
                | Self::CorruptCredentialStore(_)
        )
    }
}

impl From<skybridge_config::ConfigError> for AuthError {
    fn from(e: skybridge_config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}
