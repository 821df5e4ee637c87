//! Glue between the hub protocol and the session core
//!
//! `SessionBridge` owns the participant's [`Session`] and translates in both
//! directions: hub packets become session entry points, and relay traffic
//! produced by the session becomes `Notify`/`Request` packets on an outbound
//! queue. It performs no I/O itself, so the network loop stays thin.

use crate::input::Command;
use log::{debug, info, warn};
use session::{
    ParticipantHandle, RelayError, RelayTransport, Session, SessionConfig, Subscription, SyncRelay,
};
use shared::{Packet, PeerInfo, RelayMessage, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("hub refused the connection: {0}")]
    Refused(String),
}

/// Relay transport that turns session traffic into hub packets
pub struct UdpRelayTransport {
    outbound: UnboundedSender<Packet>,
}

impl UdpRelayTransport {
    pub fn new(outbound: UnboundedSender<Packet>) -> Self {
        Self { outbound }
    }
}

impl RelayTransport for UdpRelayTransport {
    fn broadcast(&mut self, message: RelayMessage) -> Result<(), RelayError> {
        self.outbound
            .send(Packet::Notify { message })
            .map_err(|_| RelayError::Closed)
    }

    fn send_to_authority(&mut self, message: RelayMessage) -> Result<(), RelayError> {
        self.outbound
            .send(Packet::Request { message })
            .map_err(|_| RelayError::Closed)
    }
}

pub struct SessionBridge {
    session: Session,
    local: Arc<ParticipantHandle>,
    /// Remote participants admitted by the hub; the session only holds weak
    /// references to these
    peers: HashMap<u32, Arc<ParticipantHandle>>,
    outbound: UnboundedSender<Packet>,
    client_id: Option<u32>,
}

impl SessionBridge {
    /// The local participant is registered right away with no identity; it
    /// resolves once the hub assigns one.
    pub fn new(config: SessionConfig, display_name: &str, outbound: UnboundedSender<Packet>) -> Self {
        let mut session = Session::new(config);
        let local = ParticipantHandle::unassigned(display_name, true);
        session.spawn_local(Arc::clone(&local));

        Self {
            session,
            local,
            peers: HashMap::new(),
            outbound,
            client_id: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn subscribe(&self) -> Subscription {
        self.session.subscribe()
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn is_connected(&self) -> bool {
        self.client_id.is_some()
    }

    pub fn connect_packet(&self) -> Packet {
        Packet::Connect {
            client_version: PROTOCOL_VERSION,
            display_name: self.local.display_name().to_string(),
        }
    }

    /// Applies one packet from the hub
    pub fn handle_packet(&mut self, packet: Packet) -> Result<(), ClientError> {
        match packet {
            Packet::Connected {
                client_id,
                authority_id,
                roster,
            } => self.on_connected(client_id, authority_id, roster),

            Packet::PeerJoined {
                client_id,
                display_name,
            } => {
                info!("{} joined as participant {}", display_name, client_id);
                self.add_peer(client_id, &display_name);
            }

            Packet::PeerLeft { client_id } => {
                info!("Participant {} left", client_id);
                self.peers.remove(&client_id);
                self.session.on_participant_left(client_id);
            }

            Packet::Relayed { from, message } => {
                debug!("Relayed from {}: {:?}", from, message);
                self.session.on_relay_message(from, message);
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.client_id = None;
                return Err(ClientError::Refused(reason));
            }

            other => warn!("Unexpected packet from hub: {:?}", other),
        }
        Ok(())
    }

    fn on_connected(&mut self, client_id: u32, authority_id: u32, roster: Vec<PeerInfo>) {
        if let Some(existing) = self.client_id {
            debug!("Already connected as {}, ignoring Connected({})", existing, client_id);
            return;
        }

        info!(
            "Connected! Participant ID: {} (authority: {})",
            client_id, authority_id
        );
        self.client_id = Some(client_id);
        self.local.assign_identity(client_id);
        self.session.check_registry();

        self.session.on_authority_determined(client_id == authority_id);
        self.session.mark_authority(authority_id);
        self.session
            .attach_relay(SyncRelay::new(UdpRelayTransport::new(self.outbound.clone())));

        for peer in roster {
            self.add_peer(peer.client_id, &peer.display_name);
        }
    }

    fn add_peer(&mut self, client_id: u32, display_name: &str) {
        if client_id == 0 || Some(client_id) == self.client_id {
            warn!("Ignoring peer announcement for participant {}", client_id);
            return;
        }
        let handle = self
            .peers
            .entry(client_id)
            .or_insert_with(|| ParticipantHandle::new(client_id, display_name, false));
        self.session.on_participant_spawned(handle);
    }

    /// Runs a command typed by the user or issued by the pickup bot
    pub fn handle_command(&mut self, command: Command) {
        let Some(local_id) = self.client_id else {
            warn!("Not connected yet, ignoring {:?}", command);
            return;
        };

        match command {
            Command::Restart => self.session.request_restart_click(local_id),
            Command::End => self.session.request_end_game(),
            Command::Pickup { item_id, value } => {
                if !self.session.input_enabled() {
                    warn!("Input is disabled, ignoring pickup of item {}", item_id);
                    return;
                }
                self.session.on_item_collected(local_id, item_id, value);
            }
            Command::Status => info!("{}", self.status_line()),
            Command::Quit => {}
        }
    }

    pub fn tick(&mut self, elapsed: Duration) {
        self.session.advance(elapsed);
    }

    pub fn status_line(&self) -> String {
        let scores: Vec<String> = self
            .session
            .registry()
            .all()
            .iter()
            .map(|p| format!("{}={}", p.display_name, p.score))
            .collect();

        format!(
            "state: {}, scores: [{}], items: {}/{}, authority: {}",
            self.session.state(),
            scores.join(", "),
            self.session.items().collected_count(),
            self.session.items().total(),
            self.session.has_authority()
        )
    }
}
