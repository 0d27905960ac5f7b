#[cfg(test)]
mod protocol_tests;


#[cfg(test)]
mod integration_tests;

#[cfg(test)]
pub mod test_helpers {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::Value;
    use skybridge_auth::{
        AuthResult, AuthorizationCallback, AuthorizationFlow, Credential, CredentialManager,
        FlowProgress, OAuthProvider, OAuthProviderConfig, SecretStore,
    };
    use skybridge_security::CredentialEncryption;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use url::Url;

    use crate::{context::ToolContext, server::McpServer, tracker::RequestTracker};

    /// Consent that never arrives; only cancellation or timeout ends it
    pub struct PendingFlow;

    #[async_trait]
    impl AuthorizationFlow for PendingFlow {
        async fn run_authorization_flow(
            &self,
            _consent_url: &Url,
            _progress: &FlowProgress<'_>,
        ) -> AuthResult<AuthorizationCallback> {
            std::future::pending().await
        }
    }

    /// Consent granted immediately with a canned code
    pub struct GrantingFlow;

    #[async_trait]
    impl AuthorizationFlow for GrantingFlow {
        async fn run_authorization_flow(
            &self,
            consent_url: &Url,
            _progress: &FlowProgress<'_>,
        ) -> AuthResult<AuthorizationCallback> {
            let state = consent_url
                .query_pairs()
                .find(|(key, _)| key == "state")
                .map(|(_, value)| value.into_owned());
            Ok(AuthorizationCallback {
                code: "canned-code".to_string(),
                state,
            })
        }
    }

    fn encryption() -> Arc<CredentialEncryption> {
        Arc::new(CredentialEncryption::with_key([5u8; 32]))
    }

    pub fn secret_store(dir: &TempDir) -> SecretStore {
        SecretStore::new(OAuthProvider::Google, dir.path(), None, encryption())
    }

    pub fn google_manager(
        dir: &TempDir,
        server_uri: &str,
        flow: Arc<dyn AuthorizationFlow>,
    ) -> Arc<CredentialManager> {
        let config = OAuthProviderConfig {
            provider: OAuthProvider::Google,
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
            auth_url: format!("{}/authorize", server_uri),
            token_url: format!("{}/token", server_uri),
            revoke_url: Some(format!("{}/revoke", server_uri)),
            redirect_uri: Url::parse("http://localhost:3737/oauth/callback").unwrap(),
            scopes: vec!["openid".to_string(), "email".to_string()],
        };
        Arc::new(CredentialManager::new(config, "default", secret_store(dir), flow))
    }

    pub async fn store_credential(dir: &TempDir, access_token: &str, expires_in_secs: i64) {
        let credential = Credential {
            access_token: access_token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expiry: Utc::now() + Duration::seconds(expires_in_secs),
            scope: ["openid".to_string(), "email".to_string()].into_iter().collect(),
            token_type: "Bearer".to_string(),
        };
        secret_store(dir).store("default", &credential).await.unwrap();
    }

    pub fn test_server(context: ToolContext) -> (Arc<McpServer>, mpsc::UnboundedReceiver<Value>) {
        let (outgoing, receiver) = mpsc::unbounded_channel();
        let server = Arc::new(McpServer::new(
            context,
            Arc::new(RequestTracker::new()),
            outgoing,
        ));
        (server, receiver)
    }

    pub async fn next_message(receiver: &mut mpsc::UnboundedReceiver<Value>) -> Value {
        tokio::time::timeout(std::time::Duration::from_secs(5), receiver.recv())
            .await
            .expect("timed out waiting for server output")
            .expect("server output closed")
    }

    /// Parse the JSON text payload of a successful `tools/call` response
    pub fn tool_payload(response: &Value) -> Value {
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }
}
