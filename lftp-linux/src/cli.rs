//! Argument types shared by the one-shot subcommands and the interactive shell.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lftp", version, about = "LAN peer discovery and file transfer")]
pub struct Cli {
    /// Defaults to the interactive shell.
    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum CliCommand {
    /// Interactive shell with discovery running in the background
    Shell,
    /// Run the transfer server (and discovery) until interrupted
    Server(ServerArgs),
    /// Upload a local file to a peer
    Put(PutArgs),
    /// Download a file from a peer
    Get(GetArgs),
    /// Listen for announcements, then print the peers heard
    Peers {
        /// How long to listen before printing
        #[arg(short, long, default_value_t = 35)]
        wait_secs: u64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Clone, Debug, Default)]
pub struct ServerArgs {
    /// Require this username (enables authentication)
    #[arg(short = 'u', long)]
    pub username: Option<String>,
    /// Password for --username
    #[arg(short = 'p', long)]
    pub password: Option<String>,
    /// Directory to serve and store into
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,
    /// Listening port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,
}

/// Connection options for put/get.
#[derive(Args, Clone, Debug, Default)]
pub struct PeerArgs {
    #[arg(short = 'u', long)]
    pub username: Option<String>,
    #[arg(short = 'p', long)]
    pub password: Option<String>,
    /// Peer's transfer port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,
}

#[derive(Args, Clone, Debug)]
pub struct PutArgs {
    pub ip: Ipv4Addr,
    pub file: PathBuf,
    #[command(flatten)]
    pub peer: PeerArgs,
}

#[derive(Args, Clone, Debug)]
pub struct GetArgs {
    pub ip: Ipv4Addr,
    /// Name relative to the peer's root
    pub name: String,
    /// Local directory to write into (default: working directory)
    #[arg(short = 'd', long)]
    pub dest: Option<PathBuf>,
    #[command(flatten)]
    pub peer: PeerArgs,
}

/// One line typed at the shell prompt.
#[derive(Parser, Debug)]
#[command(
    name = "lftp",
    no_binary_name = true,
    disable_help_subcommand = true,
    disable_version_flag = true
)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ShellCommand {
    /// Show available commands
    Help,
    /// List discovered devices
    List {
        #[arg(default_value = "users", value_parser = ["users", "peers"])]
        what: String,
    },
    /// Same as `list users`
    Peers,
    /// Start the transfer server in the background
    Server(ServerArgs),
    /// Stop the background transfer server
    Stop,
    Put(PutArgs),
    Get(GetArgs),
    /// Leave the shell
    #[command(alias = "quit")]
    Exit,
}
