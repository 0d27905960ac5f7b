// ABOUTME: Line-delimited JSON-RPC server loop over stdin/stdout
// ABOUTME: Runs each tool call as its own tracked task; one writer task owns the output stream

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use serde_json::Value;
use skybridge_config::constants::SWEEP_INTERVAL;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    context::{ToolCall, ToolContext},
    mcp::{self, CancelledNotification, IncomingMessage, InitializeRequest},
    progress::{NotificationSink, ProgressNotification, ProgressReporter, SinkClosed},
    tools::{tools_call, tools_list, CallToolRequest, ToolError},
    tracker::{RequestId, RequestTracker},
};

/// How long in-flight calls get to answer after shutdown cancels them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const CLIENT_CANCEL_REASON: &str = "Cancelled by client";

/// Progress notifications share the response channel so lines never interleave
struct ChannelSink {
    outgoing: mpsc::UnboundedSender<Value>,
}

impl NotificationSink for ChannelSink {
    fn send_progress(&self, notification: ProgressNotification) -> Result<(), SinkClosed> {
        self.outgoing
            .send(mcp::notification("notifications/progress", notification))
            .map_err(|_| SinkClosed)
    }
}

/// Removes a call from the tracker however its task ends
struct RequestGuard {
    tracker: Arc<RequestTracker>,
    request_id: RequestId,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.cleanup(&self.request_id);
    }
}

pub struct McpServer {
    context: ToolContext,
    tracker: Arc<RequestTracker>,
    reporter: Arc<ProgressReporter>,
    outgoing: mpsc::UnboundedSender<Value>,
    tasks: TaskTracker,
}

impl McpServer {
    pub fn new(
        context: ToolContext,
        tracker: Arc<RequestTracker>,
        outgoing: mpsc::UnboundedSender<Value>,
    ) -> Self {
        let sink = Arc::new(ChannelSink {
            outgoing: outgoing.clone(),
        });
        let reporter = Arc::new(ProgressReporter::new(Arc::clone(&tracker), sink));
        Self {
            context,
            tracker,
            reporter,
            outgoing,
            tasks: TaskTracker::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.reporter
    }

    fn send(&self, message: Value) {
        if self.outgoing.send(message).is_err() {
            warn!("Output stream closed; dropping message");
        }
    }

    fn send_error(&self, id: Option<&RequestId>, code: i64, message: impl Into<String>) {
        self.send(mcp::error_response(id, code, message));
    }

    /// Handle one inbound line. Tool calls are spawned; everything else is
    /// answered inline.
    pub fn handle_line(self: &Arc<Self>, line: &str) {
        let message: IncomingMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Unparseable message: {}", e);
                self.send_error(None, mcp::PARSE_ERROR, format!("Parse error: {}", e));
                return;
            }
        };

        match (message.id, message.method) {
            (Some(id), Some(method)) => self.handle_request(id, &method, message.params),
            (None, Some(method)) => self.handle_notification(&method, message.params),
            (Some(id), None) => debug!("Ignoring client response for id {}", id),
            (None, None) => {
                self.send_error(None, mcp::INVALID_REQUEST, "Message has neither id nor method")
            }
        }
    }

    fn handle_request(self: &Arc<Self>, id: RequestId, method: &str, params: Option<Value>) {
        debug!("Request {} {}", id, method);
        match method {
            "initialize" => {
                let request = params.and_then(|p| serde_json::from_value::<InitializeRequest>(p).ok());
                match serde_json::to_value(mcp::initialize(request)) {
                    Ok(result) => self.send(mcp::response(&id, result)),
                    Err(e) => self.send_error(Some(&id), mcp::INTERNAL_ERROR, e.to_string()),
                }
            }
            "ping" => self.send(mcp::response(&id, mcp::ping())),
            "tools/list" => match serde_json::to_value(tools_list()) {
                Ok(result) => self.send(mcp::response(&id, result)),
                Err(e) => self.send_error(Some(&id), mcp::INTERNAL_ERROR, e.to_string()),
            },
            "tools/call" => self.spawn_tool_call(id, params),
            other => self.send_error(
                Some(&id),
                mcp::METHOD_NOT_FOUND,
                format!("Unknown method: {}", other),
            ),
        }
    }

    fn handle_notification(&self, method: &str, params: Option<Value>) {
        match method {
            "notifications/cancelled" => {
                let Some(params) =
                    params.and_then(|p| serde_json::from_value::<CancelledNotification>(p).ok())
                else {
                    warn!("Malformed cancellation notification");
                    return;
                };
                let reason = params.reason.as_deref().unwrap_or(CLIENT_CANCEL_REASON);
                self.tracker.cancel_request(&params.request_id, reason);
            }
            "notifications/initialized" => debug!("Client initialized"),
            other => debug!("Ignoring notification {}", other),
        }
    }

    fn spawn_tool_call(self: &Arc<Self>, id: RequestId, params: Option<Value>) {
        let request = match params.map(serde_json::from_value::<CallToolRequest>) {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                self.send_error(Some(&id), mcp::INVALID_PARAMS, format!("Invalid params: {}", e));
                return;
            }
            None => {
                self.send_error(Some(&id), mcp::INVALID_PARAMS, "Missing params");
                return;
            }
        };

        let progress_token = request.progress_token();
        let registered = match self
            .tracker
            .register_request(id.clone(), progress_token.clone(), &request.name)
        {
            Ok(registered) => registered,
            Err(e) => {
                error!("Rejecting tools/call: {}", e);
                self.send_error(Some(&id), mcp::INVALID_REQUEST, e.to_string());
                return;
            }
        };

        let server = Arc::clone(self);
        self.tasks.spawn(async move {
            let guard = RequestGuard {
                tracker: Arc::clone(&server.tracker),
                request_id: id.clone(),
            };
            let call = ToolCall::new(
                id.clone(),
                registered.signal,
                server.reporter.create_progress_callback(progress_token),
            );

            let outcome = tools_call(request, &server.context, &call).await;
            // Release before answering so late progress for this call is dropped
            drop(guard);

            let reply = match outcome {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(result) => mcp::response(&id, result),
                    Err(e) => mcp::error_response(Some(&id), mcp::INTERNAL_ERROR, e.to_string()),
                },
                Err(e) => tool_error_response(&id, &e),
            };
            server.send(reply);
        });
    }

    /// Stop accepting work, cancel what is in flight and give it a grace
    /// period to answer
    pub async fn shutdown(&self) {
        let cancelled = self.tracker.shutdown();
        self.tasks.close();
        if cancelled > 0 {
            info!("Waiting for {} cancelled call(s) to finish", cancelled);
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tasks.wait())
            .await
            .is_err()
        {
            warn!("In-flight calls did not finish within {:?}", SHUTDOWN_GRACE);
        }
    }
}

fn tool_error_response(id: &RequestId, error: &ToolError) -> Value {
    if let Some(reason) = error.cancellation_reason() {
        info!("Request {} cancelled: {}", id, reason);
        return mcp::error_response(
            Some(id),
            mcp::REQUEST_CANCELLED,
            format!("Request cancelled: {}", reason),
        );
    }

    let code = match error {
        ToolError::UnknownTool(_) | ToolError::InvalidArguments(_) => mcp::INVALID_PARAMS,
        _ => mcp::INTERNAL_ERROR,
    };
    mcp::error_response(Some(id), code, error.to_string())
}

/// Periodically evict stale requests and reclaim finished progress state
pub fn spawn_maintenance(
    tracker: Arc<RequestTracker>,
    reporter: Arc<ProgressReporter>,
    period: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let stale = tracker.cleanup_stale_requests();
                    let reclaimed = reporter.cleanup_completed_requests();
                    if stale > 0 || reclaimed > 0 {
                        debug!("Sweep evicted {} stale request(s), reclaimed {} progress token(s)", stale, reclaimed);
                    }
                }
            }
        }
        debug!("Maintenance sweeper stopped");
    })
}

async fn write_messages<W>(mut output: W, mut outgoing: mpsc::UnboundedReceiver<Value>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outgoing.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(())
}

/// Serve JSON-RPC on `input`/`output` until EOF or `shutdown` resolves
pub async fn serve<R, W, S>(context: ToolContext, input: R, output: W, shutdown: S) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let (outgoing, receiver) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_messages(output, receiver));

    let server = Arc::new(McpServer::new(
        context,
        Arc::new(RequestTracker::new()),
        outgoing,
    ));
    let stop_sweeper = CancellationToken::new();
    let sweeper = spawn_maintenance(
        Arc::clone(&server.tracker),
        Arc::clone(&server.reporter),
        SWEEP_INTERVAL,
        stop_sweeper.clone(),
    );

    let mut lines = input.lines();
    tokio::pin!(shutdown);
    let read_result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break Ok(());
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => server.handle_line(&line),
                Ok(None) => {
                    info!("Input closed");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        }
    };

    stop_sweeper.cancel();
    if let Err(e) = sweeper.await {
        warn!("Maintenance sweeper ended abnormally: {}", e);
    }
    server.shutdown().await;

    // The writer finishes once every sender is gone
    drop(server);
    match tokio::time::timeout(SHUTDOWN_GRACE, writer).await {
        Ok(Ok(Err(e))) => warn!("Output stream failed: {}", e),
        Ok(Err(e)) => warn!("Writer task ended abnormally: {}", e),
        Err(_) => warn!("Output still pending at exit"),
        Ok(Ok(Ok(()))) => {}
    }

    read_result.map_err(Into::into)
}
