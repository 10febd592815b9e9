use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crossroad::config::Config;
use crossroad::server::{self, Server};

#[derive(Parser)]
#[command(name = "crossroad")]
#[command(about = "Rule-driven DNS forwarder", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "crossroad.toml")]
    config: PathBuf,

    /// Log every query
    #[arg(short, long)]
    verbose: bool,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let listen = config.listen_addr()?;
    let handler = config
        .build_handler()
        .context("invalid configuration")?;

    let server = Server::bind(listen, handler)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    server::run(server, args.config).await?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "warn,crossroad=debug"
    } else {
        "warn,crossroad=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(args))
}
