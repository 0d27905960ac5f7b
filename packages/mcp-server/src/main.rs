#!/usr/bin/env -S cargo run --bin skybridge-mcp --

use anyhow::{Context, Result};
use clap::Parser;
use skybridge_config::RuntimeSettings;
use skybridge_mcp_server::{serve, tools::tools_list, ToolContext};
use tokio::io::BufReader;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "skybridge-mcp")]
#[command(about = "Skybridge MCP Server - cloud API tools with managed OAuth credentials")]
#[command(version)]
struct Cli {
    #[arg(long, help = "Display available tools")]
    tools: bool,
    #[arg(long, help = "Print the authentication status of configured providers and exit")]
    status: bool,
}

fn init_tracing() {
    // stdout carries the JSON-RPC stream; logs go to stderr only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if cli.tools {
        println!("Available tools:");
        for tool in tools_list().tools {
            println!("- {}: {}", tool.name, tool.description.unwrap_or_default());
        }
        return Ok(());
    }

    let settings = RuntimeSettings::from_env().context("Failed to load configuration")?;
    let context =
        ToolContext::from_settings(&settings).context("Failed to initialize credential managers")?;

    if cli.status {
        for manager in context.managers() {
            println!("{}", serde_json::to_string_pretty(&manager.status().await)?);
        }
        return Ok(());
    }

    info!(
        "Starting Skybridge MCP server for {} (user {})",
        context
            .providers()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        settings.user_id
    );

    serve(
        context,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await
}
