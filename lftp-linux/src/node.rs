//! One process-wide handle over discovery, the peer registry and the transfer
//! server. The shell and the one-shot subcommands only talk to this.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lftp_core::{Credentials, Error, PeerRecord, Registry, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::discovery::{self, DiscoverySettings, LocalIdentity};
use crate::transport::client;
use crate::transport::progress::Progress;
use crate::transport::server::{ServerOptions, ServerStatus, TransferServer};

pub struct Node {
    config: Config,
    registry: Arc<Registry>,
    server: TransferServer,
    shutdown: CancellationToken,
    discovery_started: AtomicBool,
}

impl Node {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::new(config.peer_ttl()));
        Self {
            config,
            registry,
            server: TransferServer::new(),
            shutdown: CancellationToken::new(),
            discovery_started: AtomicBool::new(false),
        }
    }

    /// Spawn announcer and listener. Later calls are no-ops.
    pub async fn start_discovery(&self) -> Result<()> {
        if self.discovery_started.swap(true, Ordering::SeqCst) {
            debug!("discovery already running");
            return Ok(());
        }
        let started = discovery::start_discovery(
            DiscoverySettings::from(&self.config),
            LocalIdentity::detect(),
            self.registry.clone(),
            self.shutdown.child_token(),
        )
        .await;
        if started.is_err() {
            self.discovery_started.store(false, Ordering::SeqCst);
        }
        started.map_err(Error::from)
    }

    /// `port` and `root` fall back to the configuration.
    pub async fn start_server(
        &self,
        port: Option<u16>,
        root: Option<PathBuf>,
        credentials: Option<Credentials>,
    ) -> Result<ServerStatus> {
        let mut opts = ServerOptions::new(port.unwrap_or(self.config.transfer_port));
        opts.root = root.or_else(|| self.config.root.clone());
        opts.credentials = credentials;
        self.server.start(opts).await?;
        self.server.status().await.ok_or(Error::NotRunning)
    }

    /// Idempotent. Returns whether a running server was stopped.
    pub async fn stop_server(&self) -> bool {
        let stopped = self.server.stop().await;
        if !stopped {
            debug!("stop requested but no server is running");
        }
        stopped
    }

    pub async fn server_status(&self) -> Option<ServerStatus> {
        self.server.status().await
    }

    pub async fn put_file(
        &self,
        peer: Ipv4Addr,
        port: Option<u16>,
        path: &Path,
        credentials: Option<&Credentials>,
        progress: &mut dyn Progress,
    ) -> Result<u64> {
        client::put_file(path, self.peer_addr(peer, port), credentials, progress).await
    }

    pub async fn get_file(
        &self,
        peer: Ipv4Addr,
        port: Option<u16>,
        name: &str,
        credentials: Option<&Credentials>,
        dest_dir: &Path,
        progress: &mut dyn Progress,
    ) -> Result<PathBuf> {
        let addr = self.peer_addr(peer, port);
        client::get_file(name, addr, credentials, dest_dir, progress).await
    }

    /// Most-recent-first copy of the registry.
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        self.registry.list()
    }

    pub fn online_count(&self) -> usize {
        self.registry.online_count()
    }

    /// Stop discovery loops and the server. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.server.stop().await;
    }

    fn peer_addr(&self, peer: Ipv4Addr, port: Option<u16>) -> SocketAddr {
        SocketAddr::new(
            IpAddr::V4(peer),
            port.unwrap_or(self.config.transfer_port),
        )
    }
}

/// Authentication is on only when a username is given; a missing password is empty.
pub fn credentials(username: Option<String>, password: Option<String>) -> Option<Credentials> {
    username.map(|u| Credentials::new(u, password.unwrap_or_default()))
}
