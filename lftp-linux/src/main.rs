// LFTP for Linux: discovery daemon, transfer server and client, interactive shell.

mod cli;
mod config;
mod discovery;
mod logging;
mod node;
mod shell;
mod transport;

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, CliCommand};
use config::Config;
use node::Node;

/// Blocking stdin reads cannot be cancelled; don't wait on them at exit.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load();
    logging::init(&cfg.log);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(cli, cfg));
    rt.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(cli: Cli, cfg: Config) -> anyhow::Result<()> {
    let node = Node::new(cfg);
    let result = match cli.command.unwrap_or(CliCommand::Shell) {
        CliCommand::Shell => {
            start_discovery_or_warn(&node).await;
            tokio::select! {
                r = shell::run(&node) => r,
                r = shutdown_signal() => r,
            }
        }
        CliCommand::Server(args) => {
            start_discovery_or_warn(&node).await;
            match shell::serve(&node, &args).await {
                Ok(()) => shutdown_signal().await,
                Err(e) => Err(e),
            }
        }
        CliCommand::Put(args) => shell::put(&node, &args).await,
        CliCommand::Get(args) => shell::get(&node, &args).await,
        CliCommand::Peers { wait_secs, json } => peers(&node, wait_secs, json).await,
    };
    node.shutdown().await;
    info!("shutting down");
    result
}

/// Transfers still work without discovery (e.g. port 5050 taken by another instance).
async fn start_discovery_or_warn(node: &Node) {
    if let Err(e) = node.start_discovery().await {
        warn!("discovery unavailable: {e}");
    }
}

async fn peers(node: &Node, wait_secs: u64, json: bool) -> anyhow::Result<()> {
    node.start_discovery().await?;
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(wait_secs)) => {}
        r = shutdown_signal() => r?,
    }
    let peers = node.list_peers();
    if json {
        println!("{}", serde_json::to_string_pretty(&peers)?);
    } else {
        print!(
            "{}",
            shell::render_peers(&peers, node.online_count(), std::time::SystemTime::now())
        );
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
