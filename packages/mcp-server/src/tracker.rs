// ABOUTME: Registry of in-flight tool invocations and their cancellation sources
// ABOUTME: Safe under concurrent registration, cancellation, cleanup and staleness sweeps

use std::{fmt, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use skybridge_config::constants::STALE_REQUEST_THRESHOLD;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    cancellation::{CancellationController, CancellationSignal},
    error::{TrackerError, TrackerResult},
};

const STALE_REASON: &str = "Request exceeded the staleness threshold";
const SHUTDOWN_REASON: &str = "Server shutting down";

/// JSON-RPC request identifier as sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Caller-supplied token correlating progress notifications with one invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    Number(i64),
    String(String),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ProgressToken {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Lifecycle record of one in-flight invocation, owned by the tracker
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub tool_name: String,
    pub progress_token: Option<ProgressToken>,
    pub registered_at: Instant,
    controller: CancellationController,
}

impl RequestContext {
    pub fn signal(&self) -> CancellationSignal {
        self.controller.signal()
    }

    pub fn is_cancelled(&self) -> bool {
        self.controller.is_cancelled()
    }
}

/// What the invoking code receives from a successful registration
#[derive(Debug, Clone)]
pub struct RegisteredRequest {
    pub request_id: RequestId,
    pub progress_token: Option<ProgressToken>,
    pub signal: CancellationSignal,
}

/// Tracks every in-flight tool invocation by request id
#[derive(Debug)]
pub struct RequestTracker {
    requests: DashMap<RequestId, RequestContext>,
    progress_tokens: DashMap<ProgressToken, RequestId>,
    stale_threshold: Duration,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::with_stale_threshold(STALE_REQUEST_THRESHOLD)
    }

    pub fn with_stale_threshold(stale_threshold: Duration) -> Self {
        Self {
            requests: DashMap::new(),
            progress_tokens: DashMap::new(),
            stale_threshold,
        }
    }

    /// Register a new invocation; an id that is still registered is rejected
    pub fn register_request(
        &self,
        request_id: RequestId,
        progress_token: Option<ProgressToken>,
        tool_name: &str,
    ) -> TrackerResult<RegisteredRequest> {
        let signal = match self.requests.entry(request_id.clone()) {
            Entry::Occupied(_) => return Err(TrackerError::DuplicateRequestId(request_id)),
            Entry::Vacant(slot) => {
                let context = RequestContext {
                    request_id: request_id.clone(),
                    tool_name: tool_name.to_string(),
                    progress_token: progress_token.clone(),
                    registered_at: Instant::now(),
                    controller: CancellationController::new(),
                };
                slot.insert(context).signal()
            }
        };

        // The request entry guard is released above; maps are never locked together
        if let Some(token) = &progress_token {
            if let Some(previous) = self.progress_tokens.insert(token.clone(), request_id.clone()) {
                warn!(
                    "Progress token {} moved from request {} to {}",
                    token, previous, request_id
                );
            }
        }

        debug!("Registered request {} ({})", request_id, tool_name);
        Ok(RegisteredRequest {
            request_id,
            progress_token,
            signal,
        })
    }

    /// Cancel a registered request.
    ///
    /// Returns false, with no side effects, for unknown, finished or already
    /// cancelled requests.
    pub fn cancel_request(&self, request_id: &RequestId, reason: &str) -> bool {
        let cancelled = self
            .requests
            .get(request_id)
            .is_some_and(|context| context.controller.cancel(reason));

        if cancelled {
            info!("Cancelled request {}: {}", request_id, reason);
        } else {
            debug!("Cancel for inactive request {} ignored", request_id);
        }
        cancelled
    }

    /// Release a finished request. Returns whether it was still registered.
    pub fn cleanup(&self, request_id: &RequestId) -> bool {
        match self.requests.remove(request_id) {
            Some((_, context)) => {
                self.release_progress_token(&context);
                debug!("Cleaned up request {}", request_id);
                true
            }
            None => false,
        }
    }

    /// Cancel and evict requests older than the staleness threshold
    pub fn cleanup_stale_requests(&self) -> usize {
        self.cleanup_requests_older_than(self.stale_threshold)
    }

    pub fn cleanup_requests_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let is_stale = |context: &RequestContext| {
            now.saturating_duration_since(context.registered_at) >= max_age
        };

        let stale_ids: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for request_id in stale_ids {
            if let Some((_, context)) = self.requests.remove_if(&request_id, |_, c| is_stale(c)) {
                context.controller.cancel(STALE_REASON);
                self.release_progress_token(&context);
                warn!(
                    "Evicted stale request {} ({}) after {:?}",
                    request_id,
                    context.tool_name,
                    now.saturating_duration_since(context.registered_at)
                );
                removed += 1;
            }
        }
        removed
    }

    /// Cancel every outstanding request and clear the registry
    pub fn shutdown(&self) -> usize {
        let ids: Vec<RequestId> = self.requests.iter().map(|e| e.key().clone()).collect();

        let mut cancelled = 0;
        for request_id in ids {
            if let Some((_, context)) = self.requests.remove(&request_id) {
                context.controller.cancel(SHUTDOWN_REASON);
                cancelled += 1;
            }
        }
        self.progress_tokens.clear();

        if cancelled > 0 {
            info!("Cancelled {} outstanding request(s) at shutdown", cancelled);
        }
        cancelled
    }

    /// The registered request that currently owns `token`, cancelled or not
    pub fn progress_token_owner(&self, token: &ProgressToken) -> Option<RequestId> {
        let request_id = self.progress_tokens.get(token).map(|r| r.value().clone())?;
        self.requests.contains_key(&request_id).then_some(request_id)
    }

    /// The owner of `token`, if progress for it should still be delivered
    pub fn active_progress_owner(&self, token: &ProgressToken) -> Option<RequestId> {
        let request_id = self.progress_tokens.get(token).map(|r| r.value().clone())?;
        let active = self
            .requests
            .get(&request_id)
            .is_some_and(|context| !context.is_cancelled());
        active.then_some(request_id)
    }

    pub fn is_progress_token_active(&self, token: &ProgressToken) -> bool {
        self.active_progress_owner(token).is_some()
    }

    pub fn has_progress_token(&self, token: &ProgressToken) -> bool {
        self.progress_token_owner(token).is_some()
    }

    pub fn signal(&self, request_id: &RequestId) -> Option<CancellationSignal> {
        self.requests.get(request_id).map(|context| context.signal())
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.requests.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn release_progress_token(&self, context: &RequestContext) {
        if let Some(token) = &context.progress_token {
            self.progress_tokens
                .remove_if(token, |_, owner| owner == &context.request_id);
        }
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}
