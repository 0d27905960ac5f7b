//! Context management for MCP server tools
//!
//! `ToolContext` holds the long-lived dependencies shared by every call (one
//! credential manager per configured provider). `ToolCall` is the per-call
//! execution context: the request's cancellation signal and its progress
//! emitter.

use std::{future::Future, sync::Arc};

use skybridge_auth::{AuthResult, CredentialManager, OAuthProvider};
use skybridge_config::RuntimeSettings;
use tracing::info;

use crate::{
    cancellation::CancellationSignal,
    error::TrackerError,
    progress::ProgressEmitter,
    tracker::RequestId,
};

/// Dependencies injected into tool handlers
#[derive(Clone)]
pub struct ToolContext {
    managers: Arc<Vec<Arc<CredentialManager>>>,
}

impl ToolContext {
    pub fn new(managers: Vec<Arc<CredentialManager>>) -> Self {
        Self {
            managers: Arc::new(managers),
        }
    }

    /// Build one credential manager per configured provider.
    ///
    /// Unknown providers or missing client credentials are fatal here, at
    /// startup, rather than on first use.
    pub fn from_settings(settings: &RuntimeSettings) -> AuthResult<Self> {
        let mut managers = Vec::with_capacity(settings.providers.len());
        for name in &settings.providers {
            let provider: OAuthProvider = name.parse()?;
            if managers
                .iter()
                .any(|m: &Arc<CredentialManager>| m.provider() == provider)
            {
                continue;
            }
            managers.push(Arc::new(CredentialManager::from_settings(provider, settings)?));
            info!("Configured provider {}", provider);
        }
        Ok(Self::new(managers))
    }

    pub fn manager(&self, provider: OAuthProvider) -> Option<&Arc<CredentialManager>> {
        self.managers.iter().find(|m| m.provider() == provider)
    }

    pub fn managers(&self) -> &[Arc<CredentialManager>] {
        &self.managers
    }

    pub fn providers(&self) -> Vec<OAuthProvider> {
        self.managers.iter().map(|m| m.provider()).collect()
    }
}

/// Per-invocation execution context handed to a tool
#[derive(Clone)]
pub struct ToolCall {
    pub request_id: RequestId,
    pub signal: CancellationSignal,
    pub progress: ProgressEmitter,
}

impl ToolCall {
    pub fn new(request_id: RequestId, signal: CancellationSignal, progress: ProgressEmitter) -> Self {
        Self {
            request_id,
            signal,
            progress,
        }
    }

    /// Drive `work` until it finishes or the request is cancelled.
    ///
    /// A result that arrives after cancellation is discarded.
    pub async fn run<F: Future>(&self, work: F) -> Result<F::Output, TrackerError> {
        self.signal.check()?;
        tokio::select! {
            biased;
            _ = self.signal.cancelled() => {}
            output = work => {
                if !self.signal.is_cancelled() {
                    return Ok(output);
                }
            }
        }
        Err(TrackerError::RequestCancelled {
            reason: self.signal.reason().unwrap_or_default(),
        })
    }
}
