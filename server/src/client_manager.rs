//! Participant connection management for the relay hub
//!
//! This module handles the hub-side bookkeeping of connected participants:
//! - Connection lifecycle (connect, disconnect, timeout)
//! - Stable identity assignment, starting from 1
//! - Authority assignment: the first participant to connect while nobody
//!   holds authority becomes the authority
//! - Capacity enforcement and address lookup for routing
//!
//! The manager never inspects relay payloads; it only answers who is
//! connected, where they are, and who holds authority.

use log::{info, warn};
use shared::PeerInfo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected participant process
#[derive(Debug)]
pub struct Client {
    /// Identity assigned by the hub, stable for the connection's lifetime
    pub id: u32,
    /// Network address for routing relayed packets
    pub addr: SocketAddr,
    pub display_name: String,
    /// Last time any packet arrived from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, display_name: String) -> Self {
        Self {
            id,
            addr,
            display_name,
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Roster of connected participants and the current authority
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
    authority_id: Option<u32>,
}

impl ClientManager {
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            authority_id: None,
        }
    }

    /// Returns Some(client_id) if admitted, None if the session is full.
    pub fn add_client(&mut self, addr: SocketAddr, display_name: String) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!(
            "Client {} ('{}') connected from {}",
            client_id, display_name, addr
        );
        self.clients
            .insert(client_id, Client::new(client_id, addr, display_name));

        if self.authority_id.is_none() {
            info!("Client {} holds authority", client_id);
            self.authority_id = Some(client_id);
        }

        Some(client_id)
    }

    /// Returns true if the client was found and removed.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        let Some(client) = self.clients.remove(client_id) else {
            return false;
        };

        info!("Client {} disconnected", client.id);
        if self.authority_id == Some(client.id) {
            warn!("Authority {} left the session", client.id);
            self.authority_id = None;
        }
        true
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Refreshes the client's activity timestamp. Returns false if unknown.
    pub fn touch(&mut self, client_id: u32) -> bool {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
            true
        } else {
            false
        }
    }

    pub fn authority_id(&self) -> Option<u32> {
        self.authority_id
    }

    pub fn authority_addr(&self) -> Option<SocketAddr> {
        self.authority_id
            .and_then(|id| self.clients.get(&id))
            .map(|client| client.addr)
    }

    /// Everyone except `client_id`, ordered by id
    pub fn roster_excluding(&self, client_id: u32) -> Vec<PeerInfo> {
        let mut roster: Vec<PeerInfo> = self
            .clients
            .values()
            .filter(|client| client.id != client_id)
            .map(|client| PeerInfo {
                client_id: client.id,
                display_name: client.display_name.clone(),
            })
            .collect();
        roster.sort_by_key(|peer| peer.client_id);
        roster
    }

    /// Removes and returns clients that have been silent longer than `timeout`
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
