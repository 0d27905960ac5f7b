// ABOUTME: Skybridge authentication library managing OAuth2 credentials for tool adapters
// ABOUTME: Supports Google, Microsoft and Dropbox with PKCE, refresh and keychain-backed storage

pub mod error;
pub mod oauth;

// Re-export main types
pub use error::{AuthError, AuthResult};
pub use oauth::{
    AuthorizationCallback, AuthorizationFlow, AuthorizationState, BrowserAuthorizationFlow,
    CallbackServer, Credential, CredentialManager, FlowProgress, KeyringEnclave, OAuthProvider,
    OAuthProviderConfig, PkceChallenge, ProviderStatus, SecretStore, SecureEnclave,
    StoredCredentialRecord, TokenResponse,
};
