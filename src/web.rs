#![cfg(not(tarpaulin_include))]

use clap::Parser;
use std::path::PathBuf;
use tablewalk::{app, config};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "website", about = "Serve the upload and explorer pages")]
struct Cli {
    /// Config file; `tablewalk.toml` is used when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config
    #[arg(short, long)]
    bind: Option<String>,
}

/// Main entry point for the web application
///
/// Reads settings, starts the relay service when it is enabled and serves
/// the app until the process is stopped.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = config::load_settings(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        settings.bind = bind;
    }

    app::run(settings).await
}
