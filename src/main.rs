use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_discovery::{
    Discovery, DiscoveryEndpoint, FileRegistry, FileTactics, SourcePoller, SystemClock,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relay-discovery", about = "Serves relay server discovery")]
struct Args {
    /// Address the discovery endpoint listens on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// JSON tactics document with discovery parameters.
    #[arg(long)]
    tactics: PathBuf,

    /// JSON array of discovery server entries.
    #[arg(long)]
    servers: PathBuf,

    /// Seconds between checks of the tactics and server files.
    #[arg(long, default_value_t = 30)]
    poll_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let tactics = Arc::new(FileTactics::load(&args.tactics).context("loading tactics")?);
    let registry = Arc::new(FileRegistry::load(&args.servers).context("loading servers")?);
    let discovery = Arc::new(
        Discovery::new(tactics.clone(), registry.clone(), Arc::new(SystemClock))
            .context("initializing discovery")?,
    );

    let mut poller = SourcePoller::new(Arc::clone(&discovery), tactics, registry);
    let poll_interval = Duration::from_secs(args.poll_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            poller = match tokio::task::spawn_blocking(move || {
                poller.poll();
                poller
            })
            .await
            {
                Ok(poller) => poller,
                Err(e) => {
                    tracing::error!(error = %e, "source polling stopped");
                    return;
                }
            };
        }
    });

    DiscoveryEndpoint::new(discovery).serve(args.bind).await?;
    Ok(())
}
