//! Interactive shell and the command handlers the one-shot subcommands reuse.

use std::fmt::Write as _;
use std::time::SystemTime;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use lftp_core::PeerRecord;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::cli::{GetArgs, PutArgs, ServerArgs, ShellCommand, ShellLine};
use crate::node::{credentials, Node};
use crate::transport::progress::Console;

const PROMPT: &str = "lftp> ";

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Read commands from stdin until `exit` or EOF.
pub async fn run(node: &Node) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    println!("LFTP shell. Type 'help' for commands.");
    loop {
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        let command = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                // Includes clap's own help and usage output.
                let _ = e.print();
                continue;
            }
        };
        match execute(node, command).await {
            Ok(Flow::Exit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    debug!("shell finished");
    Ok(())
}

pub async fn execute(node: &Node, command: ShellCommand) -> anyhow::Result<Flow> {
    match command {
        ShellCommand::Help => {
            println!("{}", ShellLine::command().render_help());
        }
        ShellCommand::List { .. } | ShellCommand::Peers => {
            print!(
                "{}",
                render_peers(&node.list_peers(), node.online_count(), SystemTime::now())
            );
        }
        ShellCommand::Server(args) => {
            serve(node, &args).await?;
        }
        ShellCommand::Stop => {
            if node.stop_server().await {
                println!("Server stopped");
            } else {
                println!("Server is not running");
            }
        }
        ShellCommand::Put(args) => put(node, &args).await?,
        ShellCommand::Get(args) => get(node, &args).await?,
        ShellCommand::Exit => return Ok(Flow::Exit),
    }
    Ok(Flow::Continue)
}

pub async fn serve(node: &Node, args: &ServerArgs) -> anyhow::Result<()> {
    let status = node
        .start_server(
            args.port,
            args.root.clone(),
            credentials(args.username.clone(), args.password.clone()),
        )
        .await
        .context("cannot start server")?;
    println!(
        "Server listening on port {} serving {}{}",
        status.local_addr.port(),
        status.root.display(),
        if status.authenticated {
            " (authentication required)"
        } else {
            ""
        }
    );
    Ok(())
}

pub async fn put(node: &Node, args: &PutArgs) -> anyhow::Result<()> {
    let creds = credentials(args.peer.username.clone(), args.peer.password.clone());
    let sent = node
        .put_file(
            args.ip,
            args.peer.port,
            &args.file,
            creds.as_ref(),
            &mut Console::new(),
        )
        .await
        .with_context(|| format!("upload of {} to {} failed", args.file.display(), args.ip))?;
    println!("Sent {} ({sent} bytes)", args.file.display());
    Ok(())
}

pub async fn get(node: &Node, args: &GetArgs) -> anyhow::Result<()> {
    let dest = match &args.dest {
        Some(d) => d.clone(),
        None => std::env::current_dir()?,
    };
    let creds = credentials(args.peer.username.clone(), args.peer.password.clone());
    let path = node
        .get_file(
            args.ip,
            args.peer.port,
            &args.name,
            creds.as_ref(),
            &dest,
            &mut Console::new(),
        )
        .await
        .with_context(|| format!("download of {} from {} failed", args.name, args.ip))?;
    println!("Saved {}", path.display());
    Ok(())
}

/// Table of peers with a trailing online count.
pub fn render_peers(peers: &[PeerRecord], online: usize, now: SystemTime) -> String {
    let mut out = String::new();
    if peers.is_empty() {
        out.push_str("No devices discovered yet.\n");
        return out;
    }
    let _ = writeln!(out, "{:<24} {:<16} {:<8} LAST SEEN", "NAME", "ADDRESS", "STATUS");
    for p in peers {
        let _ = writeln!(
            out,
            "{:<24} {:<16} {:<8} {}s ago",
            p.name,
            p.address.to_string(),
            if p.online { "Online" } else { "Offline" },
            p.age(now).as_secs()
        );
    }
    let _ = writeln!(out, "{online} of {} devices online", peers.len());
    out
}
