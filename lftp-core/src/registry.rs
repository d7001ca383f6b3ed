//! Device registry: who is reachable on the LAN, keyed by IPv4 address.
//!
//! One lock guards the whole map. Every operation is a single critical section,
//! so a sweep never interleaves with an upsert. The registry does not log; it
//! returns what changed and the caller decides how to report it.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::announce;

/// Peer considered offline after this long without an announcement (evicted after twice this).
pub const DEFAULT_PEER_TTL: Duration = Duration::from_secs(90);

/// Last-seen metadata for one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub name: String,
    pub address: Ipv4Addr,
    #[serde(with = "unix_secs")]
    pub last_seen: SystemTime,
    pub online: bool,
}

impl PeerRecord {
    /// Time since last announcement, zero if the clock went backwards.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_seen).unwrap_or(Duration::ZERO)
    }
}

mod unix_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        t.duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs: u64 = Deserialize::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// Outcome of [`Registry::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// First time this address was seen.
    Inserted,
    /// Known and online; name and last-seen refreshed.
    Refreshed,
    /// Known but marked offline; now back online.
    Returned,
}

/// Change made by [`Registry::sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepEvent {
    WentOffline(PeerRecord),
    Evicted(PeerRecord),
}

/// Thread-safe peer table.
pub struct Registry {
    ttl: Duration,
    peers: Mutex<HashMap<Ipv4Addr, PeerRecord>>,
}

impl Registry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Ipv4Addr, PeerRecord>> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable.
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an announcement from `address` now.
    pub fn upsert(&self, name: &str, address: Ipv4Addr) -> Upsert {
        self.upsert_at(name, address, SystemTime::now())
    }

    /// Record an announcement observed at `now`. Last writer wins on the name.
    pub fn upsert_at(&self, name: &str, address: Ipv4Addr, now: SystemTime) -> Upsert {
        let name = announce::truncate(name, announce::MAX_NAME_LEN);
        let mut peers = self.lock();
        match peers.get_mut(&address) {
            Some(rec) => {
                let was_online = rec.online;
                rec.name.clear();
                rec.name.push_str(name);
                rec.last_seen = rec.last_seen.max(now);
                rec.online = true;
                if was_online {
                    Upsert::Refreshed
                } else {
                    Upsert::Returned
                }
            }
            None => {
                peers.insert(
                    address,
                    PeerRecord {
                        name: name.to_string(),
                        address,
                        last_seen: now,
                        online: true,
                    },
                );
                Upsert::Inserted
            }
        }
    }

    /// Refresh last-seen for a known peer without changing its name. False if unknown.
    pub fn touch(&self, address: Ipv4Addr) -> bool {
        self.touch_at(address, SystemTime::now())
    }

    pub fn touch_at(&self, address: Ipv4Addr, now: SystemTime) -> bool {
        let mut peers = self.lock();
        match peers.get_mut(&address) {
            Some(rec) => {
                rec.last_seen = rec.last_seen.max(now);
                rec.online = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, address: Ipv4Addr) -> Option<PeerRecord> {
        self.lock().remove(&address)
    }

    /// Demote peers silent for more than TTL, drop peers silent for more than 2×TTL.
    ///
    /// Not reentrant with itself: callers run a single sweeper.
    pub fn sweep(&self, now: SystemTime) -> Vec<SweepEvent> {
        let evict_after = self.ttl * 2;
        let mut events = Vec::new();
        let mut peers = self.lock();
        peers.retain(|_, rec| {
            let age = rec.age(now);
            if age <= self.ttl {
                return true;
            }
            if rec.online {
                rec.online = false;
                events.push(SweepEvent::WentOffline(rec.clone()));
            }
            if age > evict_after {
                events.push(SweepEvent::Evicted(rec.clone()));
                return false;
            }
            true
        });
        events
    }

    /// Snapshot of every record, most recently seen first.
    pub fn list(&self) -> Vec<PeerRecord> {
        let mut out: Vec<PeerRecord> = self.lock().values().cloned().collect();
        out.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.address.cmp(&b.address))
        });
        out
    }

    pub fn get(&self, address: Ipv4Addr) -> Option<PeerRecord> {
        self.lock().get(&address).cloned()
    }

    pub fn online_count(&self) -> usize {
        self.lock().values().filter(|r| r.online).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_TTL)
    }
}
