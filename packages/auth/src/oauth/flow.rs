// ABOUTME: Interactive authorization flow interface and its browser implementation
// ABOUTME: Consent URL in, authorization code out; swappable for headless or test flows

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

use crate::{
    error::AuthResult,
    oauth::server::{AuthorizationCallback, CallbackServer},
};

/// Authorization-code flow states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationState {
    Idle,
    AwaitingUserConsent,
    AwaitingCallback,
    ExchangingCode,
    Authorized,
}

/// Lets a flow publish its state transitions to the owning manager
pub struct FlowProgress<'a> {
    sender: &'a watch::Sender<AuthorizationState>,
}

impl<'a> FlowProgress<'a> {
    pub(crate) fn new(sender: &'a watch::Sender<AuthorizationState>) -> Self {
        Self { sender }
    }

    pub fn set(&self, state: AuthorizationState) {
        self.sender.send_replace(state);
    }
}

/// Obtains an authorization code for a consent URL.
///
/// Implementations must not apply their own overall deadline; the credential
/// manager bounds the whole flow.
#[async_trait]
pub trait AuthorizationFlow: Send + Sync {
    async fn run_authorization_flow(
        &self,
        consent_url: &Url,
        progress: &FlowProgress<'_>,
    ) -> AuthResult<AuthorizationCallback>;
}

/// Opens the system browser and waits on the local redirect listener
pub struct BrowserAuthorizationFlow {
    redirect_uri: Url,
}

impl BrowserAuthorizationFlow {
    pub fn new(redirect_uri: Url) -> Self {
        Self { redirect_uri }
    }
}

#[async_trait]
impl AuthorizationFlow for BrowserAuthorizationFlow {
    async fn run_authorization_flow(
        &self,
        consent_url: &Url,
        progress: &FlowProgress<'_>,
    ) -> AuthResult<AuthorizationCallback> {
        // Bind first so a fast redirect cannot race the listener
        let server = CallbackServer::bind(&self.redirect_uri).await?;

        info!("Opening browser for user consent");
        if let Err(e) = open::that_detached(consent_url.as_str()) {
            warn!(
                "Failed to open browser ({}). Please visit this URL manually: {}",
                e, consent_url
            );
        }

        let expected_state = consent_url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned());

        progress.set(AuthorizationState::AwaitingCallback);
        server.wait_for_callback(expected_state).await
    }
}
