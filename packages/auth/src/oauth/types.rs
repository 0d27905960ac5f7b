// ABOUTME: Core type definitions for OAuth credentials
// ABOUTME: Includes the stored credential, token endpoint payloads and PKCE challenge types

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use skybridge_config::constants::TOKEN_REFRESH_BUFFER;

/// Fallback lifetime when a token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// OAuth credential for one provider and user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub scope: BTreeSet<String>,
    pub token_type: String,
}

impl Credential {
    /// Build a credential from a token endpoint response.
    ///
    /// Refresh responses often omit the refresh token and scope; both are carried
    /// over from `previous` in that case.
    pub fn from_token_response(
        response: TokenResponse,
        previous: Option<&Credential>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let scope = match response.scope.as_deref() {
            Some(raw) => parse_scope(raw),
            None => previous.map(|p| p.scope.clone()).unwrap_or_default(),
        };

        Self {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            expiry: now + Duration::seconds(expires_in),
            scope,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
        }
    }

    /// Check if the token expires within the refresh buffer (inclusive) of `now`
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now + refresh_buffer()
    }

    /// Check if the token expires within the 5-minute refresh buffer
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    /// Check if the token is past its expiry
    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now()
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }
}

fn refresh_buffer() -> Duration {
    Duration::seconds(TOKEN_REFRESH_BUFFER.as_secs() as i64)
}

/// Split a space-delimited OAuth scope string
pub fn parse_scope(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// PKCE challenge for OAuth flow
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// OAuth token response from provider
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// RFC 6749 error body returned by token endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

impl std::fmt::Display for TokenErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{} ({})", self.error, description),
            None => write!(f, "{}", self.error),
        }
    }
}
