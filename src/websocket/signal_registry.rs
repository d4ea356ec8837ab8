//! Signaling-channel state: connections plus the broadcaster index.
//!
//! Distinct from the presence registry — a flat can be "live" in the
//! presence sense (station exists) before its signaling connection has
//! identified as broadcaster, which is exactly the race `listen:join` must
//! handle with `BROADCASTER_SIGNAL_NOT_READY`.
use std::collections::HashMap;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};

use crate::ids::FlatId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRole {
    Unknown,
    Broadcaster,
    Listener,
}

pub struct SignalClient {
    pub id: String,
    pub flat_id: Option<FlatId>,
    #[allow(dead_code)]
    pub ip: String,
    pub role: SignalRole,
    pub listening_to: Option<FlatId>,
    pub outbox: mpsc::UnboundedSender<String>,
}

pub fn generate_signal_id() -> String {
    // 16 lowercase hex chars, from a cryptographic RNG.
    let bytes: [u8; 8] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Default)]
struct Inner {
    clients: HashMap<String, SignalClient>,
    broadcasters: HashMap<FlatId, String>,
}

#[derive(Default)]
pub struct SignalRegistry {
    inner: Mutex<Inner>,
}

pub enum IdentifyResult {
    Ok,
    AlreadyBroadcasting,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_client(&self, id: String, ip: String, outbox: mpsc::UnboundedSender<String>) {
        let mut inner = self.inner.lock().await;
        inner.clients.insert(
            id.clone(),
            SignalClient {
                id,
                flat_id: None,
                ip,
                role: SignalRole::Unknown,
                listening_to: None,
                outbox,
            },
        );
    }

    pub async fn identify(
        &self,
        id: &str,
        flat_id: FlatId,
        role: SignalRole,
    ) -> IdentifyResult {
        let mut inner = self.inner.lock().await;

        if role == SignalRole::Broadcaster {
            if inner.broadcasters.contains_key(&flat_id) {
                return IdentifyResult::AlreadyBroadcasting;
            }
            inner.broadcasters.insert(flat_id.clone(), id.to_string());
        }

        if let Some(client) = inner.clients.get_mut(id) {
            client.flat_id = Some(flat_id);
            client.role = role;
        }

        IdentifyResult::Ok
    }

    pub async fn broadcaster_sender(
        &self,
        flat_id: &FlatId,
    ) -> Option<(String, mpsc::UnboundedSender<String>)> {
        let inner = self.inner.lock().await;
        let conn_id = inner.broadcasters.get(flat_id)?;
        let client = inner.clients.get(conn_id)?;
        Some((client.id.clone(), client.outbox.clone()))
    }

    pub async fn sender_by_id(&self, id: &str) -> Option<mpsc::UnboundedSender<String>> {
        let inner = self.inner.lock().await;
        inner.clients.get(id).map(|c| c.outbox.clone())
    }

    pub async fn set_listening_to(&self, id: &str, target: Option<FlatId>) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.clients.get_mut(id) {
            client.listening_to = target;
        }
    }

    pub async fn listening_to(&self, id: &str) -> Option<FlatId> {
        let inner = self.inner.lock().await;
        inner.clients.get(id).and_then(|c| c.listening_to.clone())
    }

    pub async fn flat_id_of(&self, id: &str) -> Option<FlatId> {
        let inner = self.inner.lock().await;
        inner.clients.get(id).and_then(|c| c.flat_id.clone())
    }

    pub async fn is_registered_broadcaster(&self, flat_id: &FlatId, id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.broadcasters.get(flat_id).map(|c| c.as_str()) == Some(id)
    }

    /// Idempotent: removing an id twice (or one never inserted) is a no-op.
    pub async fn remove_client(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        let Some(client) = inner.clients.remove(id) else {
            return;
        };
        if let Some(flat_id) = client.flat_id {
            if inner.broadcasters.get(&flat_id).map(|c| c.as_str()) == Some(id) {
                inner.broadcasters.remove(&flat_id);
            }
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

    async fn registered(reg: &SignalRegistry, ip: &str) -> String {
        let id = generate_signal_id();
        let (tx, _rx) = unbounded_channel();
        reg.insert_client(id.clone(), ip.to_string(), tx).await;
        id
    }

    #[tokio::test]
    async fn generated_ids_are_16_hex_chars() {
        let id = generate_signal_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn second_broadcaster_identify_is_denied() {
        let reg = SignalRegistry::new();
        let a = registered(&reg, "127.0.0.1").await;
        let b = registered(&reg, "127.0.0.2").await;

        assert!(matches!(
            reg.identify(&a, flat("a1"), SignalRole::Broadcaster).await,
            IdentifyResult::Ok
        ));
        assert!(matches!(
            reg.identify(&b, flat("a1"), SignalRole::Broadcaster).await,
            IdentifyResult::AlreadyBroadcasting
        ));
    }

    #[tokio::test]
    async fn disconnect_only_clears_matching_broadcaster_mapping() {
        let reg = SignalRegistry::new();
        let a = registered(&reg, "127.0.0.1").await;
        reg.identify(&a, flat("a1"), SignalRole::Broadcaster).await;

        // A stale id is removed without disturbing the live mapping.
        reg.remove_client("nonexistent").await;
        assert!(reg.broadcaster_sender(&flat("a1")).await.is_some());

        reg.remove_client(&a).await;
        assert!(reg.broadcaster_sender(&flat("a1")).await.is_none());
    }

    #[tokio::test]
    async fn remove_client_is_idempotent() {
        let reg = SignalRegistry::new();
        let a = registered(&reg, "127.0.0.1").await;
        reg.remove_client(&a).await;
        reg.remove_client(&a).await;
    }
}
