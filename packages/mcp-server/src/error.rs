// ABOUTME: Error types for request lifecycle tracking
// ABOUTME: Duplicate registrations are caller bugs; cancellation is an expected terminal state

use thiserror::Error;

use crate::tracker::RequestId;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Request id {0} is already registered")]
    DuplicateRequestId(RequestId),

    #[error("Request cancelled: {reason}")]
    RequestCancelled { reason: String },
}
