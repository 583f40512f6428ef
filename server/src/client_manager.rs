//! Registry of connected clients and the dispatch context for new connections.
//!
//! The manager is handed to the listener as its dispatcher. For each accepted
//! connection it:
//! - assigns a unique client id
//! - enforces the server's client limit
//! - records the peer address for monitoring
//! - spawns one task running the client's session, and forgets the client
//!   when that session ends

use crate::client::{Client, SessionEnd};
use crate::listener::ConnectionDispatcher;
use log::{info, warn};
use parking_lot::Mutex;
use shared::{Connection, TraditionalConnection};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Registry {
    /// Peer address per client id
    clients: HashMap<u32, Option<SocketAddr>>,
    /// Next id to hand out; ids start at 1
    next_client_id: u32,
}

/// Shared handle to the client registry. Clones refer to the same registry.
#[derive(Debug, Clone)]
pub struct ClientsManager {
    registry: Arc<Mutex<Registry>>,
    max_clients: usize,
    idle_timeout: Duration,
}

impl ClientsManager {
    /// Sessions end after `idle_timeout` without a request.
    pub fn new(max_clients: usize, idle_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                clients: HashMap::new(),
                next_client_id: 1,
            })),
            max_clients,
            idle_timeout,
        }
    }

    /// Registers a client, or returns `None` if the server is full.
    pub fn add_client(&self, addr: Option<SocketAddr>) -> Option<u32> {
        let mut registry = self.registry.lock();
        if registry.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = registry.next_client_id;
        registry.next_client_id = registry.next_client_id.wrapping_add(1).max(1);
        registry.clients.insert(client_id, addr);
        info!("Client {} connected from {:?}", client_id, addr);
        Some(client_id)
    }

    /// Returns true if the client was registered.
    pub fn remove_client(&self, client_id: u32) -> bool {
        self.registry.lock().clients.remove(&client_id).is_some()
    }

    pub fn client_count(&self) -> usize {
        self.registry.lock().clients.len()
    }

    pub fn client_addrs(&self) -> Vec<(u32, Option<SocketAddr>)> {
        let mut addrs: Vec<_> = self
            .registry
            .lock()
            .clients
            .iter()
            .map(|(id, addr)| (*id, *addr))
            .collect();
        addrs.sort_by_key(|(id, _)| *id);
        addrs
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}

impl ConnectionDispatcher for ClientsManager {
    fn dispatch(&self, conn: TraditionalConnection) {
        let Some(client_id) = self.add_client(conn.peer_addr()) else {
            warn!(
                "Server full ({} clients), refusing {:?}",
                self.max_clients,
                conn.peer_addr()
            );
            conn.disconnect();
            return;
        };

        let manager = self.clone();
        let client = Client::new(client_id, conn, self.idle_timeout);
        tokio::spawn(async move {
            let end = client.run().await;
            manager.remove_client(client_id);
            match end {
                SessionEnd::LoggedOut => info!("Client {} logged out", client_id),
                SessionEnd::IdleTimeout => info!("Client {} timed out", client_id),
                SessionEnd::Disconnected => info!("Client {} disconnected", client_id),
            }
        });
    }
}
