// ABOUTME: Typed settings loaded from the process environment at startup
// ABOUTME: OAuth client settings per provider and process-wide runtime settings

use std::path::PathBuf;

use url::Url;

use crate::{
    constants::*,
    env::{env_flag, env_list_or_default, optional_env, require_env},
    ConfigError, ConfigResult,
};

/// OAuth client registration for one provider
#[derive(Debug, Clone)]
pub struct OAuthClientSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
}

impl OAuthClientSettings {
    /// Load `<PREFIX>_OAUTH_CLIENT_ID`, `<PREFIX>_OAUTH_CLIENT_SECRET` and the
    /// optional `<PREFIX>_OAUTH_REDIRECT_URI`.
    pub fn from_env(prefix: &str) -> ConfigResult<Self> {
        let prefix = prefix.to_ascii_uppercase();
        let client_id = require_env(&format!("{}_{}", prefix, OAUTH_CLIENT_ID_SUFFIX))?;
        let client_secret = require_env(&format!("{}_{}", prefix, OAUTH_CLIENT_SECRET_SUFFIX))?;
        let redirect_var = format!("{}_{}", prefix, OAUTH_REDIRECT_URI_SUFFIX);
        let raw_redirect =
            optional_env(&redirect_var).unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        let redirect_uri = parse_loopback_redirect(&redirect_var, &raw_redirect)?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
        })
    }
}

/// Validate that a redirect URI points at a local http listener
pub fn parse_loopback_redirect(var_name: &str, raw: &str) -> ConfigResult<Url> {
    let invalid = |reason: &str| ConfigError::InvalidValue {
        name: var_name.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" {
        return Err(invalid("redirect URI must use http"));
    }
    match url.host_str() {
        Some("localhost") | Some("127.0.0.1") | Some("[::1]") => {}
        _ => return Err(invalid("redirect URI must point at a loopback address")),
    }
    if url.port_or_known_default().is_none() {
        return Err(invalid("redirect URI has no usable port"));
    }
    Ok(url)
}

/// Process-wide settings shared by every provider
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub providers: Vec<String>,
    pub home_dir: PathBuf,
    pub user_id: String,
    pub keychain_enabled: bool,
}

impl RuntimeSettings {
    pub fn from_env() -> ConfigResult<Self> {
        let home_dir = match optional_env(SKYBRIDGE_HOME) {
            Some(path) => PathBuf::from(path),
            None => dirs::home_dir()
                .ok_or(ConfigError::HomeDirectoryUnavailable)?
                .join(DEFAULT_HOME_DIR_NAME),
        };

        Ok(Self {
            providers: env_list_or_default(SKYBRIDGE_PROVIDERS, DEFAULT_PROVIDERS),
            home_dir,
            user_id: optional_env(SKYBRIDGE_USER).unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            keychain_enabled: !env_flag(SKYBRIDGE_DISABLE_KEYCHAIN),
        })
    }

    /// Directory holding one sub-directory per provider
    pub fn credentials_dir(&self) -> PathBuf {
        self.home_dir.join(CREDENTIALS_DIR_NAME)
    }
}
