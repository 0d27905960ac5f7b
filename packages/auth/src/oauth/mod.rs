// ABOUTME: OAuth module providing credential management for cloud API providers
// ABOUTME: Includes PKCE, callback server, authorization flow, secret store and manager

pub mod enclave;
pub mod flow;
pub mod manager;
pub mod pkce;
pub mod provider;
pub mod server;
pub mod storage;
pub mod types;

pub use enclave::{KeyringEnclave, SecureEnclave};
pub use flow::{AuthorizationFlow, AuthorizationState, BrowserAuthorizationFlow, FlowProgress};
pub use manager::{CredentialManager, ProviderStatus};
pub use provider::{OAuthProvider, OAuthProviderConfig};
pub use server::{AuthorizationCallback, CallbackServer};
pub use storage::{SecretStore, StoredCredentialRecord};
pub use types::{Credential, PkceChallenge, TokenResponse};
