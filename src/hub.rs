//! Client hub
//!
//! Tracks every realtime connection tagged with its role and owns all
//! outbound sends. Sends are best-effort: each connection has an unbounded
//! outbox pumped by its socket task, and a send to a closed outbox is
//! silently dropped (the transport close callback removes the client).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::messages::ServerMessage;
use crate::session::ConnId;

/// Connection role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Subtitler,
    Spectator,
}

/// One connected client
#[derive(Debug)]
struct ClientHandle {
    role: Role,
    name: Option<String>,
    outbox: mpsc::UnboundedSender<String>,
}

/// Role snapshot used by broadcast filters
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub id: ConnId,
    pub role: Role,
}

/// Registry of connected clients
pub struct ClientHub {
    clients: DashMap<ConnId, ClientHandle>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Register a connection. Clients start as spectators until they
    /// identify.
    pub fn add(&self, id: ConnId, outbox: mpsc::UnboundedSender<String>) {
        self.clients.insert(
            id,
            ClientHandle {
                role: Role::Spectator,
                name: None,
                outbox,
            },
        );
    }

    /// Remove a connection (transport closed)
    pub fn remove(&self, id: &str) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Apply an identify frame
    pub fn set_identity(&self, id: &str, role: Role, name: Option<String>) {
        if let Some(mut client) = self.clients.get_mut(id) {
            client.role = role;
            if name.is_some() {
                client.name = name;
            }
        }
    }

    pub fn role_of(&self, id: &str) -> Option<Role> {
        self.clients.get(id).map(|c| c.role)
    }

    pub fn name_of(&self, id: &str) -> Option<String> {
        self.clients.get(id).and_then(|c| c.name.clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.clients.iter().filter(|c| c.role == role).count()
    }

    /// Best-effort send to one client
    pub fn send_to(&self, id: &str, message: &ServerMessage) {
        let frame = message.to_json();
        if frame.is_empty() {
            return;
        }
        if let Some(client) = self.clients.get(id) {
            let _ = client.outbox.send(frame);
        }
    }

    /// Fan out a frame to every client passing the filter
    pub fn broadcast<F>(&self, message: &ServerMessage, filter: F)
    where
        F: Fn(&ClientInfo) -> bool,
    {
        let frame = message.to_json();
        if frame.is_empty() {
            return;
        }
        for client in self.clients.iter() {
            let info = ClientInfo {
                id: client.key().clone(),
                role: client.role,
            };
            if filter(&info) {
                let _ = client.outbox.send(frame.clone());
            }
        }
    }

    /// Fan out to every client
    pub fn broadcast_all(&self, message: &ServerMessage) {
        self.broadcast(message, |_| true);
    }

    pub fn to_admins(&self, message: &ServerMessage) {
        self.broadcast(message, |c| c.role == Role::Admin);
    }

    pub fn to_subtitlers(&self, message: &ServerMessage) {
        self.broadcast(message, |c| c.role == Role::Subtitler);
    }

    pub fn to_spectators(&self, message: &ServerMessage) {
        self.broadcast(message, |c| c.role == Role::Spectator);
    }

    /// Snapshot of all connections (for individualized fan-outs)
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        self.clients
            .iter()
            .map(|c| ClientInfo {
                id: c.key().clone(),
                role: c.role,
            })
            .collect()
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &ClientHub, id: &str, role: Role) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.add(id.to_string(), tx);
        hub.set_identity(id, role, Some(format!("name-{}", id)));
        rx
    }

    #[test]
    fn test_send_to_reaches_only_target() {
        let hub = ClientHub::new();
        let mut rx_a = connect(&hub, "a", Role::Subtitler);
        let mut rx_b = connect(&hub, "b", Role::Subtitler);

        hub.send_to("a", &ServerMessage::FragmentAutoSend);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_role_filtered_broadcast() {
        let hub = ClientHub::new();
        let mut admin = connect(&hub, "a", Role::Admin);
        let mut subtitler = connect(&hub, "s", Role::Subtitler);
        let mut spectator = connect(&hub, "v", Role::Spectator);

        hub.to_spectators(&ServerMessage::FragmentStopped);

        assert!(admin.try_recv().is_err());
        assert!(subtitler.try_recv().is_err());
        let frame = spectator.try_recv().unwrap();
        assert!(frame.contains("fragment:stopped"));
    }

    #[test]
    fn test_send_to_closed_outbox_is_silent() {
        let hub = ClientHub::new();
        let rx = connect(&hub, "a", Role::Spectator);
        drop(rx);
        // No panic, no error surfaced
        hub.send_to("a", &ServerMessage::FragmentStopped);
        hub.broadcast_all(&ServerMessage::FragmentStopped);
    }

    #[test]
    fn test_remove_and_counts() {
        let hub = ClientHub::new();
        let _a = connect(&hub, "a", Role::Subtitler);
        let _b = connect(&hub, "b", Role::Subtitler);
        let _c = connect(&hub, "c", Role::Admin);

        assert_eq!(hub.count_role(Role::Subtitler), 2);
        assert!(hub.remove("a"));
        assert!(!hub.remove("a"));
        assert_eq!(hub.count_role(Role::Subtitler), 1);
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_unidentified_client_is_spectator() {
        let hub = ClientHub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.add("x".to_string(), tx);
        assert_eq!(hub.role_of("x"), Some(Role::Spectator));
    }
}
