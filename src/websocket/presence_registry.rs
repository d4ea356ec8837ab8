//! Process-wide presence state: connected clients and the station registry.
//!
//! Connections are identified by an opaque `ConnId` (a monotonic counter)
//! rather than any pointer into another structure, so a station's listener
//! set and a client's own record can each refer to the other without a
//! cycle — cleanup walks clients first, then stations, or vice versa,
//! never both directions at once.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::ids::FlatId;

pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceRole {
    Idle,
    Broadcaster,
    Listener,
}

#[derive(Debug, Clone)]
pub struct AudioState {
    pub mic_on: bool,
    pub sys_on: bool,
    pub ptt: bool,
    pub speaking: bool,
    pub mic_level: f64,
}

impl Default for AudioState {
    fn default() -> Self {
        AudioState {
            mic_on: false,
            sys_on: false,
            ptt: false,
            speaking: false,
            mic_level: 0.0,
        }
    }
}

pub struct PresenceClient {
    pub flat_id: Option<FlatId>,
    pub ip: String,
    pub role: PresenceRole,
    pub listening_to: Option<FlatId>,
    pub connected_at: DateTime<Utc>,
    #[allow(dead_code)]
    pub outbox: mpsc::UnboundedSender<String>,
}

pub struct Station {
    pub ip: String,
    pub started_at: DateTime<Utc>,
    pub listeners: HashSet<ConnId>,
    pub audio: AudioState,
}

#[derive(Debug, Serialize)]
pub struct PublicStation {
    pub id: String,
    pub name: String,
    pub live: bool,
    pub listeners: usize,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotListener {
    pub flat_id: String,
    pub ip: String,
    #[serde(rename = "connectedAt")]
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotStation {
    pub flat_id: String,
    pub ip: String,
    pub started_at: DateTime<Utc>,
    pub listeners: Vec<SnapshotListener>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotClient {
    pub flat_id: Option<String>,
    pub ip: String,
    pub role: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub total_stations: usize,
    pub total_clients: usize,
    /// Seconds since the server process started (spec §4.4's "uptime").
    pub uptime_seconds: i64,
    pub stations: Vec<SnapshotStation>,
    pub clients: Vec<SnapshotClient>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BroadcastStartResult {
    Started,
    AlreadyBroadcasting,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<ConnId, PresenceClient>,
    stations: HashMap<FlatId, Station>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    inner: Mutex<Inner>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_client(
        &self,
        conn_id: ConnId,
        ip: String,
        outbox: mpsc::UnboundedSender<String>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.clients.insert(
            conn_id,
            PresenceClient {
                flat_id: None,
                ip,
                role: PresenceRole::Idle,
                listening_to: None,
                connected_at: Utc::now(),
                outbox,
            },
        );
    }

    pub async fn identify(&self, conn_id: ConnId, flat_id: FlatId) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.clients.get_mut(&conn_id) {
            client.flat_id = Some(flat_id);
        }
    }

    pub async fn broadcast_start(&self, conn_id: ConnId) -> Option<BroadcastStartResult> {
        let mut inner = self.inner.lock().await;
        let flat_id = inner.clients.get(&conn_id)?.flat_id.clone()?;

        if inner.stations.contains_key(&flat_id) {
            return Some(BroadcastStartResult::AlreadyBroadcasting);
        }

        if let Some(old_target) = inner.clients.get(&conn_id).and_then(|c| c.listening_to.clone()) {
            if let Some(station) = inner.stations.get_mut(&old_target) {
                station.listeners.remove(&conn_id);
            }
        }

        let ip = inner.clients.get(&conn_id)?.ip.clone();
        inner.stations.insert(
            flat_id.clone(),
            Station {
                ip,
                started_at: Utc::now(),
                listeners: HashSet::new(),
                audio: AudioState::default(),
            },
        );

        if let Some(client) = inner.clients.get_mut(&conn_id) {
            client.role = PresenceRole::Broadcaster;
            client.listening_to = None;
        }

        Some(BroadcastStartResult::Started)
    }

    pub async fn broadcast_stop(&self, conn_id: ConnId) {
        let mut inner = self.inner.lock().await;
        let Some(client) = inner.clients.get(&conn_id) else {
            return;
        };
        if client.role != PresenceRole::Broadcaster {
            return;
        }
        let Some(flat_id) = client.flat_id.clone() else {
            return;
        };
        Self::teardown_station(&mut inner, &flat_id);
        if let Some(client) = inner.clients.get_mut(&conn_id) {
            client.role = PresenceRole::Idle;
        }
    }

    fn teardown_station(inner: &mut Inner, flat_id: &FlatId) {
        let Some(station) = inner.stations.remove(flat_id) else {
            return;
        };
        for listener_id in station.listeners {
            if let Some(listener) = inner.clients.get_mut(&listener_id) {
                listener.role = PresenceRole::Idle;
                listener.listening_to = None;
            }
        }
    }

    pub async fn broadcast_status(
        &self,
        conn_id: ConnId,
        mic_on: bool,
        sys_on: bool,
        ptt: bool,
        speaking: bool,
        mic_level: f64,
    ) {
        let mut inner = self.inner.lock().await;
        let Some(flat_id) = inner.clients.get(&conn_id).and_then(|c| c.flat_id.clone()) else {
            return;
        };
        if let Some(station) = inner.stations.get_mut(&flat_id) {
            station.audio = AudioState {
                mic_on,
                sys_on,
                ptt,
                speaking,
                mic_level: mic_level.clamp(0.0, 1.0),
            };
        }
    }

    pub async fn listen_start(&self, conn_id: ConnId, target: FlatId) {
        let mut inner = self.inner.lock().await;

        let Some(client) = inner.clients.get(&conn_id) else {
            return;
        };
        if client.flat_id.is_none() {
            return;
        }
        if client.role == PresenceRole::Broadcaster {
            return;
        }
        if !inner.stations.contains_key(&target) {
            return;
        }

        let old_target = inner.clients.get(&conn_id).and_then(|c| c.listening_to.clone());
        if let Some(old) = old_target {
            if old != target {
                if let Some(station) = inner.stations.get_mut(&old) {
                    station.listeners.remove(&conn_id);
                }
            }
        }

        if let Some(station) = inner.stations.get_mut(&target) {
            station.listeners.insert(conn_id);
        }
        if let Some(client) = inner.clients.get_mut(&conn_id) {
            client.role = PresenceRole::Listener;
            client.listening_to = Some(target);
        }
    }

    pub async fn listen_stop(&self, conn_id: ConnId) {
        let mut inner = self.inner.lock().await;
        let Some(target) = inner.clients.get(&conn_id).and_then(|c| c.listening_to.clone()) else {
            return;
        };
        if let Some(station) = inner.stations.get_mut(&target) {
            station.listeners.remove(&conn_id);
        }
        if let Some(client) = inner.clients.get_mut(&conn_id) {
            client.role = PresenceRole::Idle;
            client.listening_to = None;
        }
    }

    /// Full disconnect cleanup. Idempotent: calling this twice for the same
    /// id (or for an id that was never registered) is a no-op the second
    /// time.
    pub async fn remove_client(&self, conn_id: ConnId) {
        let mut inner = self.inner.lock().await;
        let Some(client) = inner.clients.remove(&conn_id) else {
            return;
        };
        if let Some(target) = client.listening_to {
            if let Some(station) = inner.stations.get_mut(&target) {
                station.listeners.remove(&conn_id);
            }
        }
        if client.role == PresenceRole::Broadcaster {
            if let Some(flat_id) = client.flat_id {
                Self::teardown_station(&mut inner, &flat_id);
            }
        }
    }

    pub async fn public_stations(&self) -> Vec<PublicStation> {
        let inner = self.inner.lock().await;
        let mut list: Vec<PublicStation> = inner
            .stations
            .iter()
            .map(|(flat_id, station)| PublicStation {
                id: flat_id.as_str().to_string(),
                name: flat_id.as_str().to_string(),
                live: true,
                listeners: station.listeners.len(),
                started_at: station.started_at,
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn station_exists(&self, flat_id: &FlatId) -> bool {
        let inner = self.inner.lock().await;
        inner.stations.contains_key(flat_id)
    }

    /// `process_started_at` is the server's boot time (`AppState::started_at`),
    /// used to compute the snapshot's `uptime_seconds` — the registry itself
    /// tracks no process-wide clock of its own.
    pub async fn snapshot(&self, process_started_at: DateTime<Utc>) -> Snapshot {
        let inner = self.inner.lock().await;
        let stations = inner
            .stations
            .iter()
            .map(|(flat_id, station)| SnapshotStation {
                flat_id: flat_id.as_str().to_string(),
                ip: station.ip.clone(),
                started_at: station.started_at,
                listeners: station
                    .listeners
                    .iter()
                    .filter_map(|id| inner.clients.get(id))
                    .map(|c| SnapshotListener {
                        flat_id: c.flat_id.as_ref().map(|f| f.as_str().to_string()).unwrap_or_default(),
                        ip: c.ip.clone(),
                        connected_at: c.connected_at,
                    })
                    .collect(),
            })
            .collect();

        let clients = inner
            .clients
            .values()
            .map(|c| SnapshotClient {
                flat_id: c.flat_id.as_ref().map(|f| f.as_str().to_string()),
                ip: c.ip.clone(),
                role: match c.role {
                    PresenceRole::Idle => "idle",
                    PresenceRole::Broadcaster => "broadcaster",
                    PresenceRole::Listener => "listener",
                },
            })
            .collect::<Vec<_>>();

        Snapshot {
            total_stations: inner.stations.len(),
            total_clients: inner.clients.len(),
            uptime_seconds: (Utc::now() - process_started_at).num_seconds().max(0),
            stations,
            clients,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn flat(s: &str) -> FlatId {
        FlatId::canonicalize(s)
    }

    async fn registered(reg: &PresenceRegistry, ip: &str) -> ConnId {
        let id = next_conn_id();
        let (tx, _rx) = unbounded_channel();
        reg.insert_client(id, ip.to_string(), tx).await;
        id
    }

    #[tokio::test]
    async fn broadcast_start_creates_station_once() {
        let reg = PresenceRegistry::new();
        let conn = registered(&reg, "127.0.0.1").await;
        reg.identify(conn, flat("a1")).await;

        assert_eq!(
            reg.broadcast_start(conn).await,
            Some(BroadcastStartResult::Started)
        );
        assert!(reg.station_exists(&flat("a1")).await);
    }

    #[tokio::test]
    async fn second_broadcaster_is_denied() {
        let reg = PresenceRegistry::new();
        let conn1 = registered(&reg, "127.0.0.1").await;
        reg.identify(conn1, flat("a1")).await;
        reg.broadcast_start(conn1).await;

        let conn2 = registered(&reg, "127.0.0.2").await;
        reg.identify(conn2, flat("a1")).await;
        assert_eq!(
            reg.broadcast_start(conn2).await,
            Some(BroadcastStartResult::AlreadyBroadcasting)
        );

        let stations = reg.public_stations().await;
        assert_eq!(stations.len(), 1);
    }

    #[tokio::test]
    async fn broadcast_start_then_stop_removes_station() {
        let reg = PresenceRegistry::new();
        let conn = registered(&reg, "127.0.0.1").await;
        reg.identify(conn, flat("a1")).await;
        reg.broadcast_start(conn).await;
        reg.broadcast_stop(conn).await;
        assert!(!reg.station_exists(&flat("a1")).await);
    }

    #[tokio::test]
    async fn listener_tracked_in_station_set() {
        let reg = PresenceRegistry::new();
        let b = registered(&reg, "127.0.0.1").await;
        reg.identify(b, flat("a1")).await;
        reg.broadcast_start(b).await;

        let l = registered(&reg, "127.0.0.2").await;
        reg.identify(l, flat("b2")).await;
        reg.listen_start(l, flat("a1")).await;

        let stations = reg.public_stations().await;
        assert_eq!(stations[0].listeners, 1);
    }

    #[tokio::test]
    async fn broadcaster_disconnect_clears_listeners() {
        let reg = PresenceRegistry::new();
        let b = registered(&reg, "127.0.0.1").await;
        reg.identify(b, flat("a1")).await;
        reg.broadcast_start(b).await;

        let l = registered(&reg, "127.0.0.2").await;
        reg.identify(l, flat("b2")).await;
        reg.listen_start(l, flat("a1")).await;

        reg.remove_client(b).await;

        assert!(!reg.station_exists(&flat("a1")).await);
        let inner = reg.inner.lock().await;
        let listener = inner.clients.get(&l).unwrap();
        assert_eq!(listener.role, PresenceRole::Idle);
        assert!(listener.listening_to.is_none());
    }

    #[tokio::test]
    async fn remove_client_is_idempotent() {
        let reg = PresenceRegistry::new();
        let conn = registered(&reg, "127.0.0.1").await;
        reg.remove_client(conn).await;
        reg.remove_client(conn).await;
    }

    #[tokio::test]
    async fn mic_level_out_of_range_is_clamped() {
        let reg = PresenceRegistry::new();
        let b = registered(&reg, "127.0.0.1").await;
        reg.identify(b, flat("a1")).await;
        reg.broadcast_start(b).await;
        reg.broadcast_status(b, true, false, false, true, 5.0).await;

        let inner = reg.inner.lock().await;
        let station = inner.stations.get(&flat("a1")).unwrap();
        assert_eq!(station.audio.mic_level, 1.0);
    }

    #[tokio::test]
    async fn broadcast_stop_from_a_listener_is_a_no_op() {
        let reg = PresenceRegistry::new();
        let b = registered(&reg, "127.0.0.1").await;
        reg.identify(b, flat("a1")).await;
        reg.broadcast_start(b).await;

        let l = registered(&reg, "127.0.0.2").await;
        reg.identify(l, flat("b2")).await;
        reg.listen_start(l, flat("a1")).await;

        // The listener's own flat ("b2") has no station; broadcast_stop
        // must not touch the listener's role or listening_to, nor the
        // station it's actually listening to.
        reg.broadcast_stop(l).await;

        assert!(reg.station_exists(&flat("a1")).await);
        let inner = reg.inner.lock().await;
        let listener = inner.clients.get(&l).unwrap();
        assert_eq!(listener.role, PresenceRole::Listener);
        assert_eq!(listener.listening_to, Some(flat("a1")));
        assert!(inner.stations.get(&flat("a1")).unwrap().listeners.contains(&l));
    }

    #[tokio::test]
    async fn listen_start_without_identify_is_a_no_op() {
        let reg = PresenceRegistry::new();
        let b = registered(&reg, "127.0.0.1").await;
        reg.identify(b, flat("a1")).await;
        reg.broadcast_start(b).await;

        let l = registered(&reg, "127.0.0.2").await;
        // No reg.identify(l, ...) call — this connection never sent `identify`.
        reg.listen_start(l, flat("a1")).await;

        let stations = reg.public_stations().await;
        assert_eq!(stations[0].listeners, 0);
        let inner = reg.inner.lock().await;
        let client = inner.clients.get(&l).unwrap();
        assert_eq!(client.role, PresenceRole::Idle);
        assert!(client.listening_to.is_none());
    }
}
