use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skybridge_auth::{AuthError, AuthorizationState, CredentialManager, OAuthProvider};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    context::{ToolCall, ToolContext},
    error::TrackerError,
    tracker::ProgressToken,
};

// MCP Tool Types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
    #[serde(rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: ToolInputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub type_name: String,
    pub properties: HashMap<String, ToolInputSchemaProperty>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchemaProperty {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "enum")]
    pub enum_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(rename = "progressToken")]
    pub progress_token: Option<ProgressToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    pub arguments: Option<Value>,
    #[serde(rename = "_meta", default)]
    pub meta: Option<RequestMeta>,
}

impl CallToolRequest {
    pub fn progress_token(&self) -> Option<ProgressToken> {
        self.meta.as_ref().and_then(|m| m.progress_token.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    fn json(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![ToolContent::text(text)],
            is_error: Some(false),
        }
    }

    fn error(message: String) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: Some(true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ToolContent {
    fn text(text: String) -> Self {
        Self {
            content_type: "text".to_string(),
            text,
        }
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ToolError {
    /// The cancellation reason, if this call ended because it was cancelled
    pub fn cancellation_reason(&self) -> Option<&str> {
        match self {
            Self::Tracker(TrackerError::RequestCancelled { reason }) => Some(reason),
            _ => None,
        }
    }
}

// Request types for our tools
#[derive(Debug, Clone, Default, Deserialize)]
struct ProviderArgs {
    provider: Option<String>,
}

fn provider_property() -> ToolInputSchemaProperty {
    ToolInputSchemaProperty {
        type_name: Some("string".to_string()),
        description: Some(
            "OAuth provider name; may be omitted when only one provider is configured".to_string(),
        ),
        enum_values: Some(OAuthProvider::all().iter().map(|p| p.to_string()).collect()),
    }
}

fn provider_tool(name: &str, description: &str) -> Tool {
    let mut properties = HashMap::new();
    properties.insert("provider".to_string(), provider_property());
    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: ToolInputSchema {
            type_name: "object".to_string(),
            properties,
            required: vec![],
        },
    }
}

// Tool handlers
pub fn tools_list() -> ListToolsResult {
    ListToolsResult {
        tools: vec![
            provider_tool(
                "auth_status",
                "Report authentication status for one provider, or all configured providers",
            ),
            provider_tool(
                "auth_login",
                "Authorize a provider through the browser consent flow, replacing any stored credential",
            ),
            provider_tool(
                "auth_logout",
                "Revoke and delete the stored credential for a provider",
            ),
            provider_tool(
                "access_token_info",
                "Obtain a valid access token (refreshing if needed) and report its expiry and scopes",
            ),
        ],
        next_cursor: None,
    }
}

/// Run a tool.
///
/// Credential failures come back as an error result the client can show;
/// cancellation and malformed calls come back as `Err`.
pub async fn tools_call(
    request: CallToolRequest,
    context: &ToolContext,
    call: &ToolCall,
) -> Result<CallToolResult, ToolError> {
    let args: ProviderArgs = match request.arguments {
        Some(Value::Null) | None => ProviderArgs::default(),
        Some(arguments) => serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?,
    };

    let outcome = match request.name.as_str() {
        "auth_status" => auth_status(args, context, call).await,
        "auth_login" => auth_login(args, context, call).await,
        "auth_logout" => auth_logout(args, context, call).await,
        "access_token_info" => access_token_info(args, context, call).await,
        other => return Err(ToolError::UnknownTool(other.to_string())),
    };

    match outcome {
        Ok(value) => Ok(CallToolResult::json(&value)),
        Err(ToolError::Auth(e)) => {
            warn!("Tool {} failed: {}", request.name, e);
            let message = if e.requires_reauthorization() {
                format!("{}. Run auth_login to authorize again.", e)
            } else {
                e.to_string()
            };
            Ok(CallToolResult::error(message))
        }
        Err(e) => Err(e),
    }
}

fn resolve_manager<'a>(
    args: &ProviderArgs,
    context: &'a ToolContext,
) -> Result<&'a Arc<CredentialManager>, ToolError> {
    match &args.provider {
        Some(name) => {
            let provider: OAuthProvider = name
                .parse()
                .map_err(|e: AuthError| ToolError::InvalidArguments(e.to_string()))?;
            context.manager(provider).ok_or_else(|| {
                ToolError::InvalidArguments(format!("Provider {} is not configured", provider))
            })
        }
        None => match context.managers() {
            [only] => Ok(only),
            _ => Err(ToolError::InvalidArguments(
                "provider is required when several providers are configured".to_string(),
            )),
        },
    }
}

async fn auth_status(
    args: ProviderArgs,
    context: &ToolContext,
    call: &ToolCall,
) -> Result<Value, ToolError> {
    let managers: Vec<&Arc<CredentialManager>> = match &args.provider {
        Some(_) => vec![resolve_manager(&args, context)?],
        None => context.managers().iter().collect(),
    };

    let statuses = call
        .run(async {
            let mut statuses = Vec::with_capacity(managers.len());
            for manager in managers {
                statuses.push(manager.status().await);
            }
            statuses
        })
        .await?;

    Ok(json!({ "providers": statuses }))
}

async fn auth_login(
    args: ProviderArgs,
    context: &ToolContext,
    call: &ToolCall,
) -> Result<Value, ToolError> {
    let manager = resolve_manager(&args, context)?;
    info!("Starting {} login", manager.provider());
    call.progress.step(0.0, 2.0, "Waiting for user consent");

    let mut states = manager.subscribe_authorization_state();
    let login = manager.authorize();
    let credential = call
        .run(async {
            tokio::pin!(login);
            loop {
                tokio::select! {
                    result = &mut login => break result,
                    Ok(()) = states.changed() => {
                        if *states.borrow_and_update() == AuthorizationState::ExchangingCode {
                            call.progress.step(1.0, 2.0, "Exchanging authorization code");
                        }
                    }
                }
            }
        })
        .await??;

    call.progress.step(2.0, 2.0, "Authorized");
    Ok(json!({
        "provider": manager.provider(),
        "authorized": true,
        "expiresAt": credential.expiry,
        "scopes": credential.scope,
        "hasRefreshToken": credential.can_refresh(),
    }))
}

async fn auth_logout(
    args: ProviderArgs,
    context: &ToolContext,
    call: &ToolCall,
) -> Result<Value, ToolError> {
    let manager = resolve_manager(&args, context)?;
    call.run(manager.revoke()).await??;

    Ok(json!({
        "provider": manager.provider(),
        "loggedOut": true,
    }))
}

async fn access_token_info(
    args: ProviderArgs,
    context: &ToolContext,
    call: &ToolCall,
) -> Result<Value, ToolError> {
    let manager = resolve_manager(&args, context)?;
    let token = call.run(manager.get_valid_access_token()).await??;
    let status = manager.status().await;

    Ok(json!({
        "provider": manager.provider(),
        "valid": true,
        "tokenLength": token.len(),
        "expiresAt": status.expires_at,
        "scopes": status.scopes,
    }))
}
