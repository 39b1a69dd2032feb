//! OAuth-authenticated protocol translation proxy: OpenAI-compatible
//! chat-completions in, Anthropic messages API out.

mod config;
mod models;
mod oauth;
mod proxy;
mod streaming;
mod token_manager;
mod translator;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oauth::OAuthClient;
use token_manager::TokenManager;

#[derive(Parser)]
#[command(name = "anthropic-proxy")]
#[command(author, version, about = "OAuth-authenticated OpenAI-to-Anthropic proxy")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server (default if no subcommand is given)
    Start {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },

    /// Authenticate with a Claude Pro/Max subscription via OAuth
    Auth {
        #[arg(long)]
        status: bool,
        #[arg(long)]
        logout: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anthropic_proxy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => cmd_start(None, None).await,
        Some(Commands::Start { port, host }) => cmd_start(port, host).await,
        Some(Commands::Auth { status, logout }) => cmd_auth(status, logout).await,
    }
}

async fn cmd_start(port: Option<u16>, host: Option<String>) -> anyhow::Result<()> {
    let mut config = config::load_config()?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    proxy::start_server(config).await
}

async fn cmd_auth(status: bool, logout: bool) -> anyhow::Result<()> {
    let config = config::load_config()?;
    let manager = TokenManager::new(
        config.token_file.clone(),
        OAuthClient::new(config.oauth.clone()),
    );

    if logout {
        manager.clear().await?;
        println!("Logged out.");
        return Ok(());
    }

    if status {
        match manager.load().await {
            Some(tokens) => println!("Authenticated. Token expires at {}.", tokens.expires_at),
            None => println!("Not authenticated."),
        }
        return Ok(());
    }

    let (url, verifier) = manager.start_auth_flow().await;
    println!("Visit this URL to authorize:\n\n{url}\n");
    println!("Paste the code Claude gives you back here:");

    let mut code = String::new();
    std::io::stdin().read_line(&mut code)?;
    let code = code.trim();

    match manager.complete_auth_flow(code, Some(&verifier)).await {
        Ok(()) => {
            info!("authentication complete");
            println!("Authenticated successfully.");
        }
        Err(e) => {
            error!(error = %e, "authentication failed");
            println!("Authentication failed: {e}");
        }
    }

    Ok(())
}
