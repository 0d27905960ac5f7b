// ABOUTME: Environment variable name constants and fixed defaults
// ABOUTME: Centralized definitions of all environment variable names used across Skybridge

use std::time::Duration;

// Per-provider OAuth client settings, formatted as `<PROVIDER>_OAUTH_CLIENT_ID` etc.
pub const OAUTH_CLIENT_ID_SUFFIX: &str = "OAUTH_CLIENT_ID";
pub const OAUTH_CLIENT_SECRET_SUFFIX: &str = "OAUTH_CLIENT_SECRET";
pub const OAUTH_REDIRECT_URI_SUFFIX: &str = "OAUTH_REDIRECT_URI";

// Process-wide settings
pub const SKYBRIDGE_PROVIDERS: &str = "SKYBRIDGE_PROVIDERS";
pub const SKYBRIDGE_HOME: &str = "SKYBRIDGE_HOME";
pub const SKYBRIDGE_USER: &str = "SKYBRIDGE_USER";
pub const SKYBRIDGE_DISABLE_KEYCHAIN: &str = "SKYBRIDGE_DISABLE_KEYCHAIN";

pub const DEFAULT_PROVIDERS: &str = "google";
pub const DEFAULT_USER_ID: &str = "default";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3737/oauth/callback";
pub const DEFAULT_HOME_DIR_NAME: &str = ".skybridge";
pub const CREDENTIALS_DIR_NAME: &str = "credentials";

/// Access tokens expiring within this window are refreshed before use.
pub const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Absolute ceiling for the interactive authorization flow.
pub const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// In-flight requests older than this are force-cancelled by the sweep.
pub const STALE_REQUEST_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// How often the request and progress sweeps run.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
