// ABOUTME: OAuth provider catalogue for the cloud APIs exposed as tools
// ABOUTME: Endpoints, minimal scopes and offline-consent parameters per provider

use serde::{Deserialize, Serialize};
use skybridge_config::OAuthClientSettings;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Supported OAuth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Microsoft,
    Dropbox,
}

impl OAuthProvider {
    /// Get authorization URL for this provider
    pub fn auth_url(&self) -> &'static str {
        match self {
            Self::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Self::Microsoft => "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            Self::Dropbox => "https://www.dropbox.com/oauth2/authorize",
        }
    }

    /// Get token exchange URL for this provider
    pub fn token_url(&self) -> &'static str {
        match self {
            Self::Google => "https://oauth2.googleapis.com/token",
            Self::Microsoft => "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            Self::Dropbox => "https://api.dropboxapi.com/oauth2/token",
        }
    }

    /// Get token revocation URL, if the provider has one
    pub fn revoke_url(&self) -> Option<&'static str> {
        match self {
            Self::Google => Some("https://oauth2.googleapis.com/revoke"),
            // Microsoft identity platform has no token revocation endpoint
            Self::Microsoft => None,
            Self::Dropbox => Some("https://api.dropboxapi.com/2/auth/token/revoke"),
        }
    }

    /// Get the minimal scope set requested during consent
    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            Self::Google => &[
                "openid",
                "https://www.googleapis.com/auth/userinfo.email",
                "https://www.googleapis.com/auth/drive.readonly",
                "https://www.googleapis.com/auth/calendar.readonly",
            ],
            Self::Microsoft => &["offline_access", "User.Read", "Files.Read"],
            Self::Dropbox => &["account_info.read", "files.metadata.read"],
        }
    }

    /// Extra authorization parameters that force a refresh token to be issued
    pub fn offline_consent_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Google => &[("access_type", "offline"), ("prompt", "consent")],
            Self::Microsoft => &[("prompt", "consent")],
            Self::Dropbox => &[("token_access_type", "offline"), ("force_reapprove", "true")],
        }
    }

    /// Prefix for this provider's environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE",
            Self::Microsoft => "MICROSOFT",
            Self::Dropbox => "DROPBOX",
        }
    }

    /// Get all supported providers
    pub fn all() -> Vec<Self> {
        vec![Self::Google, Self::Microsoft, Self::Dropbox]
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Microsoft => write!(f, "microsoft"),
            Self::Dropbox => write!(f, "dropbox"),
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> AuthResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            "dropbox" => Ok(Self::Dropbox),
            _ => Err(AuthError::Configuration(format!(
                "Unknown provider: {}. Supported: google, microsoft, dropbox",
                s
            ))),
        }
    }
}

/// Resolved OAuth configuration for one provider
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub provider: OAuthProvider,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: Option<String>,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
}

impl OAuthProviderConfig {
    /// Combine the provider catalogue entry with client settings
    pub fn new(provider: OAuthProvider, settings: OAuthClientSettings) -> Self {
        Self {
            provider,
            client_id: settings.client_id,
            client_secret: settings.client_secret,
            auth_url: provider.auth_url().to_string(),
            token_url: provider.token_url().to_string(),
            revoke_url: provider.revoke_url().map(str::to_string),
            redirect_uri: settings.redirect_uri,
            scopes: provider.scopes().iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Load client settings from `<PROVIDER>_OAUTH_*` variables.
    ///
    /// Missing client id or secret is a startup error, never a per-call error.
    pub fn from_env(provider: OAuthProvider) -> AuthResult<Self> {
        let settings = OAuthClientSettings::from_env(provider.env_prefix())?;
        Ok(Self::new(provider, settings))
    }
}
