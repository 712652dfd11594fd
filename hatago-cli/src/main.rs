use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use hatago_common::config::HubConfig;
use hatago_hub::{serve_http, serve_stdio, Hub, HubOptions};

#[derive(Parser)]
#[command(name = "hatago")]
#[command(about = "MCP hub: aggregate many MCP servers behind one endpoint")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the hub and serve downstream clients
    Serve {
        /// Hub configuration file (.json, .yaml, or .toml)
        #[arg(short, long)]
        config: PathBuf,

        /// Serve MCP over stdio instead of HTTP
        #[arg(long)]
        stdio: bool,

        /// HTTP bind address
        #[arg(short, long, default_value = "127.0.0.1:3535")]
        bind: SocketAddr,

        /// Only add upstreams carrying one of these tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    hatago_common::init_logging();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            config,
            stdio,
            bind,
            tags,
        } => serve(config, stdio, bind, tags).await,
    }
}

async fn serve(config_path: PathBuf, stdio: bool, bind: SocketAddr, tags: Vec<String>) -> Result<()> {
    let config = HubConfig::from_file(&config_path)?;
    let options = HubOptions::from_config(&config).with_tags(tags);

    let hub = Hub::new(options);
    hub.start(&config).await?;
    info!(servers = hub.server_ids().len(), "hub started");

    if stdio {
        serve_stdio(hub.clone()).await?;
    } else {
        tokio::select! {
            result = serve_http(hub.clone(), bind) => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
            }
        }
    }

    hub.stop().await;
    Ok(())
}
