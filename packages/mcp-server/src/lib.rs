// ABOUTME: Skybridge MCP server library: request lifecycle tracking, progress and tools
// ABOUTME: Every tool call gets a cancellable context and an optional progress emitter

pub mod cancellation;
pub mod context;
pub mod error;
pub mod mcp;
pub mod progress;
pub mod server;
pub mod tools;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use cancellation::{CancellationController, CancellationSignal};
pub use context::{ToolCall, ToolContext};
pub use error::{TrackerError, TrackerResult};
pub use progress::{NotificationSink, ProgressEmitter, ProgressReporter, ProgressUpdate};
pub use server::{serve, McpServer};
pub use tracker::{ProgressToken, RegisteredRequest, RequestId, RequestTracker};
