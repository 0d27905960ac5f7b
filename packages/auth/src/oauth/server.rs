// ABOUTME: One-shot local HTTP listener for OAuth authorization redirects
// ABOUTME: Binds the redirect URI's loopback port and returns the first code or error callback

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinSet,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AuthError, AuthResult};

/// Requests larger than this are rejected; a callback request line is short
const MAX_REQUEST_BYTES: usize = 8192;

/// Connections that send no complete request head within this window are dropped
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Authorization code delivered to the redirect URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCallback {
    pub code: String,
    pub state: Option<String>,
}

/// What a single inbound request carried
#[derive(Debug, PartialEq, Eq)]
enum CallbackRequest {
    Code(AuthorizationCallback),
    Error {
        error: String,
        description: Option<String>,
        state: Option<String>,
    },
    Incomplete,
    OtherPath,
}

/// Local listener bound before the browser is opened
pub struct CallbackServer {
    listener: TcpListener,
    path: String,
}

impl CallbackServer {
    /// Bind the loopback address and port named by `redirect_uri`
    pub async fn bind(redirect_uri: &Url) -> AuthResult<Self> {
        let port = redirect_uri.port_or_known_default().ok_or_else(|| {
            AuthError::Configuration(format!("Redirect URI {} has no port", redirect_uri))
        })?;
        let ip = match redirect_uri.host_str() {
            Some("[::1]") => IpAddr::V6(Ipv6Addr::LOCALHOST),
            _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
        };
        Self::bind_addr(SocketAddr::new(ip, port), redirect_uri.path()).await
    }

    /// Bind an explicit address, answering callbacks on `path`
    pub async fn bind_addr(addr: SocketAddr, path: &str) -> AuthResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AuthError::CallbackServer(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Waiting for OAuth callback on {}{}", addr, path);
        Ok(Self {
            listener,
            path: path.to_string(),
        })
    }

    pub fn local_addr(&self) -> AuthResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| AuthError::CallbackServer(format!("Failed to read local address: {}", e)))
    }

    /// Serve requests until one successful or one error callback arrives.
    ///
    /// Each connection is handled on its own task, so a silent or slow client
    /// never holds up the browser's redirect. Requests for other paths
    /// (favicon requests) get a 404, and error callbacks whose `state` differs
    /// from `expected_state` get a 400; both are otherwise ignored.
    pub async fn wait_for_callback(
        self,
        expected_state: Option<String>,
    ) -> AuthResult<AuthorizationCallback> {
        let path: Arc<str> = Arc::from(self.path.as_str());
        let expected_state: Option<Arc<str>> = expected_state.map(Arc::from);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(1);
        // Dropped on return, which aborts any connection still being read
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                Some(outcome) = outcome_rx.recv() => return outcome,
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted.map_err(|e| {
                        AuthError::CallbackServer(format!("Failed to accept connection: {}", e))
                    })?;
                    debug!("Received connection from {}", peer_addr);
                    connections.spawn(handle_connection(
                        stream,
                        path.clone(),
                        expected_state.clone(),
                        outcome_tx.clone(),
                    ));
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

/// Answer one connection, reporting a terminal callback through `outcome`
async fn handle_connection(
    mut stream: TcpStream,
    path: Arc<str>,
    expected_state: Option<Arc<str>>,
    outcome: mpsc::Sender<AuthResult<AuthorizationCallback>>,
) {
    let request = match tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut stream))
        .await
    {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            warn!("Discarding unreadable callback request: {}", e);
            return;
        }
        Err(_) => {
            debug!("Closing idle callback connection");
            return;
        }
    };

    let result = match parse_callback_request(&request, &path) {
        CallbackRequest::Code(callback) => {
            respond(&mut stream, "200 OK", SUCCESS_HTML).await;
            info!("Received authorization code");
            Ok(callback)
        }
        CallbackRequest::Error {
            error,
            description,
            state,
        } => {
            if let Some(expected) = expected_state.as_deref() {
                if state.as_deref() != Some(expected) {
                    warn!("Ignoring error callback with unexpected state");
                    respond(
                        &mut stream,
                        "400 Bad Request",
                        &error_html("Invalid state parameter"),
                    )
                    .await;
                    return;
                }
            }
            let message = match &description {
                Some(d) => format!("{}: {}", error, d),
                None => error,
            };
            respond(&mut stream, "400 Bad Request", &error_html(&message)).await;
            Err(AuthError::OAuthFailed(format!("Provider error: {}", message)))
        }
        CallbackRequest::Incomplete => {
            respond(
                &mut stream,
                "400 Bad Request",
                &error_html("No authorization code found in request"),
            )
            .await;
            return;
        }
        CallbackRequest::OtherPath => {
            respond(&mut stream, "404 Not Found", "").await;
            return;
        }
    };

    // Only the first terminal callback counts
    let _ = outcome.try_send(result);
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write callback response: {}", e);
    }
    let _ = stream.shutdown().await;
}

fn parse_callback_request(request: &str, expected_path: &str) -> CallbackRequest {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return CallbackRequest::OtherPath;
    };
    if url.path() != expected_path {
        return CallbackRequest::OtherPath;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => CallbackRequest::Error {
            error,
            description,
            state,
        },
        (Some(code), None) if !code.is_empty() => {
            CallbackRequest::Code(AuthorizationCallback { code, state })
        }
        _ => CallbackRequest::Incomplete,
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn error_html(message: &str) -> String {
    format!(
        r#"<html><body><h1>Authorization Failed</h1><p>{}</p><p>You can close this tab and return to your client.</p></body></html>"#,
        escape_html(message)
    )
}

const SUCCESS_HTML: &str = r#"<html>
<head>
    <title>Authorization Successful</title>
    <style>
        body { font-family: system-ui, -apple-system, sans-serif; max-width: 600px; margin: 100px auto; text-align: center; }
        h1 { color: #22c55e; }
        p { color: #64748b; }
    </style>
</head>
<body>
    <h1>Authorization Successful</h1>
    <p>Skybridge now has access to your account.</p>
    <p>You can close this tab and return to your client.</p>
</body>
</html>"#;
