// og-proxy command line harness
//
// Runs the link service once per invocation and prints the result as JSON.
// Serving it over HTTP is left to the embedding application.

use anyhow::Result;
use clap::{Parser, Subcommand};
use og_proxy::{LinkService, load_yaml_config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "og-proxy", version, about = "Resolve social links and extract Open Graph previews")]
struct Cli {
    /// YAML config file (defaults to $OG_PROXY_CONFIG, then ./config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a shortened or wrapped link to its canonical target
    Resolve { url: String },

    /// Extract preview metadata for a link
    Og {
        url: String,

        /// Skip the plain fetch and render the page in Chromium
        #[arg(long)]
        render: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("og_proxy=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_yaml_config(cli.config.as_deref())?;
    let service = LinkService::from_config(&config).await?;

    let output = match &cli.command {
        Command::Resolve { url } => service.resolve(url).await.map(|r| serde_json::to_string_pretty(&r)),
        Command::Og { url, render: false } => service
            .extract_metadata(url)
            .await
            .map(|m| serde_json::to_string_pretty(&m)),
        Command::Og { url, render: true } => service
            .extract_rendered_metadata(url)
            .await
            .map(|m| serde_json::to_string_pretty(&m)),
    };

    service.shutdown().await;

    println!("{}", output??);
    Ok(())
}
