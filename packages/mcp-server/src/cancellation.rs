// ABOUTME: Cooperative cancellation source and signal carrying a cancellation reason
// ABOUTME: The controller is owned by the request tracker; signals are cloned into tool calls

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::{TrackerError, TrackerResult};

const DEFAULT_REASON: &str = "Request cancelled";

/// Exclusively-owned cancellation source for one request
#[derive(Debug)]
pub struct CancellationController {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Read-only view handed to the code doing the work
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            token: self.token.clone(),
            reason: Arc::clone(&self.reason),
        }
    }

    /// Trigger cancellation. Returns false if it was already cancelled; the
    /// first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self.reason.set(reason.into()).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observable side of a [`CancellationController`]
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancellationSignal {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cause, once cancelled
    pub fn reason(&self) -> Option<String> {
        if !self.is_cancelled() {
            return None;
        }
        Some(
            self.reason
                .get()
                .cloned()
                .unwrap_or_else(|| DEFAULT_REASON.to_string()),
        )
    }

    /// Resolves when the request is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// `Err(RequestCancelled)` once cancellation has been observed
    pub fn check(&self) -> TrackerResult<()> {
        match self.reason() {
            Some(reason) => Err(TrackerError::RequestCancelled { reason }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let controller = CancellationController::new();
        let signal = controller.signal();

        assert!(signal.check().is_ok());
        assert!(controller.cancel("client went away"));
        assert!(!controller.cancel("shutdown"));

        assert_eq!(signal.reason().as_deref(), Some("client went away"));
        assert_eq!(
            signal.check(),
            Err(TrackerError::RequestCancelled {
                reason: "client went away".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let controller = CancellationController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
            signal.reason()
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.cancel("stop");

        assert_eq!(waiter.await.unwrap().as_deref(), Some("stop"));
    }
}
