// ABOUTME: Out-of-band progress delivery for in-flight tool invocations
// ABOUTME: Bounded by the request tracker's lifecycle; delivery failures never fail a call

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::tracker::{ProgressToken, RequestId, RequestTracker};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("notification channel closed")]
pub struct SinkClosed;

/// Params of a `notifications/progress` message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotification {
    pub progress_token: ProgressToken,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Transport that carries progress notifications to the client
pub trait NotificationSink: Send + Sync {
    fn send_progress(&self, notification: ProgressNotification) -> Result<(), SinkClosed>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub total: Option<f64>,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(progress: f64, total: Option<f64>) -> Self {
        Self {
            progress,
            total,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Delivers progress for tokens owned by live, uncancelled requests
pub struct ProgressReporter {
    tracker: Arc<RequestTracker>,
    sink: Arc<dyn NotificationSink>,
    /// Last delivered progress per token, tagged with the request it was sent for
    last_progress: DashMap<ProgressToken, (RequestId, f64)>,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<RequestTracker>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            tracker,
            sink,
            last_progress: DashMap::new(),
        }
    }

    /// Emit a progress notification. Returns whether it was handed to the sink.
    ///
    /// Unknown, cancelled or finished tokens are ignored, as is any update
    /// that does not advance past the last progress delivered for the same
    /// request. A token reused by a later request starts over.
    pub fn report(&self, token: &ProgressToken, update: ProgressUpdate) -> bool {
        let Some(owner) = self.tracker.active_progress_owner(token) else {
            debug!("Dropping progress for inactive token {}", token);
            return false;
        };
        if !update.progress.is_finite() {
            warn!("Dropping non-finite progress for token {}", token);
            return false;
        }

        match self.last_progress.entry(token.clone()) {
            Entry::Occupied(mut last) => {
                let (last_owner, last_progress) = last.get();
                if *last_owner == owner && update.progress <= *last_progress {
                    debug!(
                        "Dropping non-increasing progress {} for token {}",
                        update.progress, token
                    );
                    return false;
                }
                last.insert((owner, update.progress));
            }
            Entry::Vacant(slot) => {
                slot.insert((owner, update.progress));
            }
        }

        let notification = ProgressNotification {
            progress_token: token.clone(),
            progress: update.progress,
            total: update.total,
            message: update.message,
        };
        match self.sink.send_progress(notification) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to deliver progress for token {}: {}", token, e);
                false
            }
        }
    }

    /// Bind an emitter to an optional token for use at call sites
    pub fn create_progress_callback(self: &Arc<Self>, token: Option<ProgressToken>) -> ProgressEmitter {
        ProgressEmitter {
            reporter: Arc::clone(self),
            token,
        }
    }

    /// Drop bookkeeping for tokens whose request no longer exists
    pub fn cleanup_completed_requests(&self) -> usize {
        let before = self.last_progress.len();
        self.last_progress.retain(|token, (owner, _)| {
            self.tracker.progress_token_owner(token).as_ref() == Some(owner)
        });
        let removed = before.saturating_sub(self.last_progress.len());
        if removed > 0 {
            debug!("Reclaimed progress state for {} finished request(s)", removed);
        }
        removed
    }

    pub fn tracked_tokens(&self) -> usize {
        self.last_progress.len()
    }
}

/// Progress callback bound to one invocation's token; a no-op without one
#[derive(Clone)]
pub struct ProgressEmitter {
    reporter: Arc<ProgressReporter>,
    token: Option<ProgressToken>,
}

impl ProgressEmitter {
    pub fn report(&self, update: ProgressUpdate) -> bool {
        match &self.token {
            Some(token) => self.reporter.report(token, update),
            None => false,
        }
    }

    pub fn step(&self, progress: f64, total: f64, message: &str) -> bool {
        self.report(ProgressUpdate::new(progress, Some(total)).with_message(message))
    }
}
