// ABOUTME: Credential manager owning the stored credential for one provider and user
// ABOUTME: Hands out valid access tokens, refreshing or re-authorizing at most once at a time

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use skybridge_config::{constants::AUTHORIZATION_TIMEOUT, RuntimeSettings};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    error::{AuthError, AuthResult},
    oauth::{
        flow::{AuthorizationFlow, AuthorizationState, BrowserAuthorizationFlow, FlowProgress},
        pkce::{generate_pkce_challenge, generate_state},
        provider::{OAuthProvider, OAuthProviderConfig},
        storage::SecretStore,
        types::{Credential, PkceChallenge, TokenErrorResponse, TokenResponse},
    },
};

/// Snapshot of a provider's authentication status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: OAuthProvider,
    pub user_id: String,
    pub authenticated: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub has_refresh_token: bool,
}

/// Manages the OAuth credential for a single provider and user.
///
/// Shared behind an `Arc`; all token refreshes and authorization flows are
/// serialized by an internal lock so concurrent callers never race the
/// token endpoint or the callback port. A refresh runs on its own task and
/// keeps the lock until the new credential is persisted, even if the caller
/// that started it goes away.
pub struct CredentialManager {
    endpoint: TokenEndpoint,
    user_id: String,
    store: SecretStore,
    flow: Arc<dyn AuthorizationFlow>,
    credential_lock: Arc<Mutex<()>>,
    state: watch::Sender<AuthorizationState>,
    authorization_timeout: Duration,
}

impl CredentialManager {
    pub fn new(
        config: OAuthProviderConfig,
        user_id: impl Into<String>,
        store: SecretStore,
        flow: Arc<dyn AuthorizationFlow>,
    ) -> Self {
        let (state, _) = watch::channel(AuthorizationState::Idle);
        Self {
            endpoint: TokenEndpoint {
                client: Client::new(),
                config,
            },
            user_id: user_id.into(),
            store,
            flow,
            credential_lock: Arc::new(Mutex::new(())),
            state,
            authorization_timeout: AUTHORIZATION_TIMEOUT,
        }
    }

    /// Build a manager from environment configuration with the browser flow
    pub fn from_settings(provider: OAuthProvider, settings: &RuntimeSettings) -> AuthResult<Self> {
        let config = OAuthProviderConfig::from_env(provider)?;
        let store = SecretStore::from_settings(provider, settings)?;
        let flow = Arc::new(BrowserAuthorizationFlow::new(config.redirect_uri.clone()));
        Ok(Self::new(config, settings.user_id.clone(), store, flow))
    }

    pub fn provider(&self) -> OAuthProvider {
        self.endpoint.config.provider
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        *self.state.borrow()
    }

    pub fn subscribe_authorization_state(&self) -> watch::Receiver<AuthorizationState> {
        self.state.subscribe()
    }

    /// Return a usable access token.
    ///
    /// Refreshes when the stored token is within the refresh buffer of expiry
    /// and runs the interactive flow when nothing is stored yet. A token that
    /// cannot be refreshed is still handed out until it actually expires.
    pub async fn get_valid_access_token(&self) -> AuthResult<String> {
        if let Some(credential) = self.store.load(&self.user_id).await? {
            if !credential.needs_refresh() {
                return Ok(credential.access_token);
            }
        }

        let guard = self.credential_lock.clone().lock_owned().await;

        // Re-read: another caller may have refreshed or authorized while we waited
        match self.store.load(&self.user_id).await? {
            Some(credential) if !credential.needs_refresh() => Ok(credential.access_token),
            Some(credential) if !credential.can_refresh() && !credential.is_expired() => {
                debug!(
                    "{} token expires at {} and has no refresh token",
                    self.provider(),
                    credential.expiry
                );
                Ok(credential.access_token)
            }
            Some(credential) => Ok(self.refresh_with_guard(guard, credential).await?.access_token),
            None => {
                info!("No stored {} credential, starting authorization", self.provider());
                self.authorize_locked().await?;
                self.store
                    .load(&self.user_id)
                    .await?
                    .map(|credential| credential.access_token)
                    .ok_or_else(|| AuthError::AuthorizationRequired(self.provider().to_string()))
            }
        }
    }

    /// Run the interactive authorization flow, replacing any stored credential
    pub async fn authorize(&self) -> AuthResult<Credential> {
        let _guard = self.credential_lock.lock().await;
        self.authorize_locked().await
    }

    /// Refresh the stored credential now, regardless of its expiry
    pub async fn refresh(&self) -> AuthResult<Credential> {
        let guard = self.credential_lock.clone().lock_owned().await;
        let credential = self
            .store
            .load(&self.user_id)
            .await?
            .ok_or_else(|| AuthError::AuthorizationRequired(self.provider().to_string()))?;
        self.refresh_with_guard(guard, credential).await
    }

    /// Revoke the credential at the provider (best effort) and delete it locally
    pub async fn revoke(&self) -> AuthResult<()> {
        let _guard = self.credential_lock.lock().await;

        match self.store.load(&self.user_id).await {
            Ok(Some(credential)) => self.endpoint.revoke(&credential).await,
            Ok(None) => debug!("No {} credential to revoke", self.provider()),
            Err(e) => warn!("Deleting unreadable {} credential: {}", self.provider(), e),
        }

        self.store.delete(&self.user_id).await?;
        self.state.send_replace(AuthorizationState::Idle);
        info!("Revoked {} credential for user {}", self.provider(), self.user_id);
        Ok(())
    }

    /// Whether the stored access token is currently unexpired
    pub async fn is_authenticated(&self) -> bool {
        match self.store.load(&self.user_id).await {
            Ok(Some(credential)) => !credential.is_expired(),
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read {} credential: {}", self.provider(), e);
                false
            }
        }
    }

    pub async fn status(&self) -> ProviderStatus {
        let credential = match self.store.load(&self.user_id).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Failed to read {} credential: {}", self.provider(), e);
                None
            }
        };

        ProviderStatus {
            provider: self.provider(),
            user_id: self.user_id.clone(),
            authenticated: credential.as_ref().is_some_and(|c| !c.is_expired()),
            expires_at: credential.as_ref().map(|c| c.expiry),
            scopes: credential
                .as_ref()
                .map(|c| c.scope.iter().cloned().collect())
                .unwrap_or_default(),
            has_refresh_token: credential.as_ref().is_some_and(Credential::can_refresh),
        }
    }

    async fn authorize_locked(&self) -> AuthResult<Credential> {
        let reset = ResetToIdle::new(&self.state);
        let result = self.run_authorization().await;

        match &result {
            Ok(_) => {
                reset.disarm();
                self.state.send_replace(AuthorizationState::Authorized);
                info!("Authorized {} for user {}", self.provider(), self.user_id);
            }
            Err(e) => error!("Authorization for {} failed: {}", self.provider(), e),
        }
        result
    }

    async fn run_authorization(&self) -> AuthResult<Credential> {
        let pkce = generate_pkce_challenge()?;
        let expected_state = generate_state();
        let consent_url = self.consent_url(&pkce, &expected_state)?;

        self.state.send_replace(AuthorizationState::AwaitingUserConsent);
        let progress = FlowProgress::new(&self.state);

        let callback = tokio::time::timeout(
            self.authorization_timeout,
            self.flow.run_authorization_flow(&consent_url, &progress),
        )
        .await
        .map_err(|_| AuthError::AuthorizationTimeout(self.authorization_timeout.as_secs()))??;

        if callback.state.as_deref() != Some(expected_state.as_str()) {
            return Err(AuthError::StateMismatch);
        }
        debug!("State validated");

        progress.set(AuthorizationState::ExchangingCode);
        let response = self
            .endpoint
            .exchange_code(&callback.code, &pkce.code_verifier)
            .await?;

        let mut credential = Credential::from_token_response(response, None, Utc::now());
        if credential.scope.is_empty() {
            credential.scope = self.endpoint.config.scopes.iter().cloned().collect::<BTreeSet<_>>();
        }
        self.store.store(&self.user_id, &credential).await?;
        Ok(credential)
    }

    fn consent_url(&self, pkce: &PkceChallenge, state: &str) -> AuthResult<Url> {
        let config = &self.endpoint.config;
        let scope = config.scopes.join(" ");
        let mut params = vec![
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("code_challenge", pkce.code_challenge.as_str()),
            ("code_challenge_method", pkce.code_challenge_method.as_str()),
            ("state", state),
        ];
        params.extend_from_slice(self.provider().offline_consent_params());

        Url::parse_with_params(&config.auth_url, &params)
            .map_err(|e| AuthError::Configuration(format!("Invalid authorization URL: {}", e)))
    }

    /// Refresh on a detached task that owns `guard` until the result is stored.
    ///
    /// Dropping the caller's future only stops it from waiting; the exchange
    /// still completes and the rotated refresh token is persisted before the
    /// next caller can take the lock.
    async fn refresh_with_guard(
        &self,
        guard: OwnedMutexGuard<()>,
        current: Credential,
    ) -> AuthResult<Credential> {
        let endpoint = self.endpoint.clone();
        let store = self.store.clone();
        let user_id = self.user_id.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let refreshed = endpoint.refresh(current).await?;
            store.store(&user_id, &refreshed).await?;
            debug!(
                "Refreshed {} token, new expiry {}",
                endpoint.config.provider, refreshed.expiry
            );
            Ok::<_, AuthError>(refreshed)
        });

        task.await
            .map_err(|e| AuthError::TokenRefreshFailed(format!("Refresh task failed: {}", e)))?
    }
}

/// Client side of the provider's token and revocation endpoints
#[derive(Clone)]
struct TokenEndpoint {
    client: Client,
    config: OAuthProviderConfig,
}

impl TokenEndpoint {
    fn provider(&self) -> OAuthProvider {
        self.config.provider
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AuthResult<TokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        self.post_token_request(&form)
            .await?
            .map_err(AuthError::TokenExchange)
    }

    async fn refresh(&self, current: Credential) -> AuthResult<Credential> {
        let refresh_token = current
            .refresh_token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::AuthorizationRequired(self.provider().to_string()))?;

        info!("Refreshing {} access token", self.provider());
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .post_token_request(&form)
            .await?
            .map_err(AuthError::TokenRefreshFailed)?;

        Ok(Credential::from_token_response(response, Some(&current), Utc::now()))
    }

    /// POST a form to the token endpoint.
    ///
    /// The outer error is a transport failure; the inner one is the endpoint's
    /// rejection, which callers map to their own error kind.
    async fn post_token_request(
        &self,
        form: &[(&str, &str)],
    ) -> AuthResult<Result<TokenResponse, String>> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Network(format!("Token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            // Only the RFC 6749 error fields are surfaced; never the raw body
            let reason = match response.json::<TokenErrorResponse>().await {
                Ok(body) => format!("{} returned {}", status, body),
                Err(_) => format!("token endpoint returned {}", status),
            };
            warn!("Token request to {} rejected: {}", self.provider(), reason);
            return Ok(Err(reason));
        }

        Ok(response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("Failed to parse token response: {}", e)))
    }

    /// Best-effort revocation; failures are logged and never surfaced
    async fn revoke(&self, credential: &Credential) {
        let Some(revoke_url) = self.config.revoke_url.as_deref() else {
            debug!("{} has no revocation endpoint", self.provider());
            return;
        };

        let request = match self.provider() {
            OAuthProvider::Dropbox => self
                .client
                .post(revoke_url)
                .bearer_auth(&credential.access_token),
            _ => {
                let token = credential
                    .refresh_token
                    .as_deref()
                    .unwrap_or(&credential.access_token);
                self.client.post(revoke_url).form(&[("token", token)])
            }
        };

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Revoked {} token at provider", self.provider())
            }
            Ok(response) => warn!(
                "{} revocation returned {}; deleting local credential anyway",
                self.provider(),
                response.status()
            ),
            Err(e) => warn!(
                "{} revocation failed: {}; deleting local credential anyway",
                self.provider(),
                e
            ),
        }
    }
}

/// Puts the observable state back to `Idle` unless the flow completed.
///
/// Also covers the flow future being dropped mid-wait.
struct ResetToIdle<'a> {
    state: Option<&'a watch::Sender<AuthorizationState>>,
}

impl<'a> ResetToIdle<'a> {
    fn new(state: &'a watch::Sender<AuthorizationState>) -> Self {
        Self { state: Some(state) }
    }

    fn disarm(mut self) {
        self.state = None;
    }
}

impl Drop for ResetToIdle<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state {
            state.send_replace(AuthorizationState::Idle);
        }
    }
}
