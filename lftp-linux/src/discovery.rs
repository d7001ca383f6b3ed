//! LAN discovery: UDP broadcast announcer, listener feeding the registry, periodic sweep.
//!
//! Announcer and listener never talk to each other; both only touch the registry
//! (the listener) or the wire (the announcer). Both stop when `shutdown` is cancelled.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lftp_core::announce::MAX_DATAGRAM_LEN;
use lftp_core::{Announcement, Registry, SweepEvent, Upsert};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Config;

/// Receive poll; bounds how long a stalled socket can delay a sweep.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub port: u16,
    pub announce_interval: Duration,
    pub sweep_interval: Duration,
}

impl From<&Config> for DiscoverySettings {
    fn from(c: &Config) -> Self {
        Self {
            port: c.discovery_port,
            announce_interval: c.announce_interval(),
            sweep_interval: c.sweep_interval(),
        }
    }
}

/// Who we announce as, and which source address to ignore.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub name: String,
    pub address: Option<Ipv4Addr>,
}

impl LocalIdentity {
    pub fn detect() -> Self {
        let name = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let address = match local_ip_address::local_ip() {
            Ok(IpAddr::V4(ip)) => Some(ip),
            Ok(IpAddr::V6(_)) => None,
            Err(e) => {
                warn!("cannot detect local LAN address, self-suppression disabled: {e}");
                None
            }
        };
        Self { name, address }
    }
}

/// Bind both sockets, then spawn announcer and listener as detached tasks.
pub async fn start_discovery(
    settings: DiscoverySettings,
    identity: LocalIdentity,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let send_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    send_socket.set_broadcast(true)?;
    let recv_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, settings.port)).await?;

    info!(
        "discovery started as {} ({}) on port {}",
        identity.name,
        identity
            .address
            .map_or_else(|| "unknown".to_string(), |a| a.to_string()),
        settings.port
    );

    let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), settings.port);
    tokio::spawn(announce_loop(
        send_socket,
        identity.name.clone(),
        dest,
        settings.announce_interval,
        shutdown.clone(),
    ));
    tokio::spawn(listen_loop(
        recv_socket,
        registry,
        identity.address,
        settings.sweep_interval,
        shutdown,
    ));
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn announce_loop(
    socket: UdpSocket,
    name: String,
    dest: SocketAddr,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut sent: u64 = 0;
    loop {
        let payload = Announcement::new(&name, unix_now()).encode();
        match socket.send_to(payload.as_bytes(), dest).await {
            Ok(_) => {
                sent += 1;
                debug!("announcement #{sent} sent: {payload}");
            }
            Err(e) => warn!("announcement to {dest} failed: {e}"),
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("announcer stopped after {sent} announcements");
}

async fn listen_loop(
    socket: UdpSocket,
    registry: Arc<Registry>,
    local_addr: Option<Ipv4Addr>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let mut last_sweep = Instant::now();
    let mut received: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            r = tokio::time::timeout(POLL_INTERVAL, socket.recv_from(&mut buf)) => match r {
                Ok(Ok((n, from))) => {
                    if handle_datagram(&registry, local_addr, &buf[..n], from).is_some() {
                        received += 1;
                    }
                }
                Ok(Err(e)) => {
                    warn!("discovery receive failed: {e}");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(_) => {}
            }
        }
        if last_sweep.elapsed() >= sweep_interval {
            sweep(&registry, SystemTime::now());
            last_sweep = Instant::now();
        }
    }
    debug!("listener stopped after {received} announcements");
}

/// Apply one datagram to the registry. `None` when ignored.
fn handle_datagram(
    registry: &Registry,
    local_addr: Option<Ipv4Addr>,
    data: &[u8],
    from: SocketAddr,
) -> Option<Upsert> {
    let IpAddr::V4(ip) = from.ip() else {
        return None;
    };
    if Some(ip) == local_addr {
        return None;
    }
    let announcement = match Announcement::parse(data) {
        Ok(a) => a,
        Err(e) => {
            trace!("ignoring datagram from {from}: {e}");
            return None;
        }
    };
    let outcome = registry.upsert(&announcement.name, ip);
    match outcome {
        Upsert::Inserted => info!("new device discovered: {} ({ip})", announcement.name),
        Upsert::Returned => info!("device back online: {} ({ip})", announcement.name),
        Upsert::Refreshed => debug!("heartbeat from {} ({ip})", announcement.name),
    }
    Some(outcome)
}

fn sweep(registry: &Registry, now: SystemTime) {
    let mut evicted = 0usize;
    for event in registry.sweep(now) {
        match event {
            SweepEvent::WentOffline(r) => {
                info!("device offline: {} ({}) - timeout", r.name, r.address)
            }
            SweepEvent::Evicted(r) => {
                info!("device removed: {} ({})", r.name, r.address);
                evicted += 1;
            }
        }
    }
    if evicted > 0 {
        debug!("cleaned up {evicted} stale devices");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from(ip: [u8; 4]) -> SocketAddr {
        SocketAddr::from((ip, 5050))
    }

    #[test]
    fn datagram_upserts_sender_address() {
        let reg = Registry::default();
        let out = handle_datagram(&reg, None, b"nas|1700000000", from([10, 0, 0, 7]));
        assert_eq!(out, Some(Upsert::Inserted));
        let rec = reg.get(Ipv4Addr::new(10, 0, 0, 7)).unwrap();
        assert_eq!(rec.name, "nas");
        assert!(rec.online);

        let out = handle_datagram(&reg, None, b"nas2|1700000030", from([10, 0, 0, 7]));
        assert_eq!(out, Some(Upsert::Refreshed));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(Ipv4Addr::new(10, 0, 0, 7)).unwrap().name, "nas2");
    }

    #[test]
    fn own_broadcast_suppressed() {
        let reg = Registry::default();
        let me = Ipv4Addr::new(192, 168, 0, 5);
        assert_eq!(handle_datagram(&reg, Some(me), b"me|1", from([192, 168, 0, 5])), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn malformed_datagrams_ignored() {
        let reg = Registry::default();
        let junk: [&[u8]; 5] = [b"", b"no separator", b"|1", b"host|x", &[0xff, 0x00]];
        for junk in junk {
            assert_eq!(handle_datagram(&reg, None, junk, from([10, 0, 0, 1])), None);
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn sweep_demotes_stale_peers() {
        let reg = Registry::new(Duration::from_secs(90));
        reg.upsert_at("a", Ipv4Addr::new(10, 0, 0, 1), UNIX_EPOCH);
        sweep(&reg, UNIX_EPOCH + Duration::from_secs(100));
        assert_eq!(reg.online_count(), 0);
        sweep(&reg, UNIX_EPOCH + Duration::from_secs(200));
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn announcer_sends_parseable_payload_and_stops() {
        let rx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = rx.local_addr().unwrap();
        let tx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(announce_loop(
            tx,
            "tester".into(),
            dest,
            Duration::from_secs(30),
            shutdown.clone(),
        ));

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), rx.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let a = Announcement::parse(&buf[..n]).unwrap();
        assert_eq!(a.name, "tester");
        assert!(a.timestamp > 0);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn listener_feeds_registry_until_cancelled() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let reg = Arc::new(Registry::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(listen_loop(
            socket,
            reg.clone(),
            None,
            Duration::from_secs(5),
            shutdown.clone(),
        ));

        let tx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        tx.send_to(b"peer-one|1700000000", addr).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while reg.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let rec = reg.get(Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(rec.name, "peer-one");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
