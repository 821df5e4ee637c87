//! Hub network layer: UDP admission, heartbeats and relay routing

use crate::client_manager::ClientManager;
use log::{debug, error, info, warn};
use shared::{decode_packet, encode_packet, Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        client_id: u32,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<u32>,
    },
}

/// Relay hub coordinating participant membership and message routing
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    tick_duration: Duration,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        client_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            tick_duration,
            client_timeout,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(self.socket.local_addr()?)
    }

    /// Handle for stopping the main loop from another task
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode_packet(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::BroadcastPacket { packet, exclude } => {
                        let client_addrs = {
                            let clients_guard = clients.read().await;
                            clients_guard.get_client_addrs()
                        };

                        for (client_id, addr) in client_addrs {
                            if Some(client_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    async fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = interval(timeout.min(Duration::from_secs(1)));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(timeout)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = encode_packet(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<u32>) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    async fn sender_id(&self, addr: SocketAddr) -> Option<u32> {
        let mut clients = self.clients.write().await;
        let client_id = clients.find_client_by_addr(addr)?;
        clients.touch(client_id);
        Some(client_id)
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                display_name,
            } => self.handle_connect(client_version, display_name, addr).await,

            Packet::Heartbeat => {
                if self.sender_id(addr).await.is_none() {
                    debug!("Heartbeat from unknown address {}", addr);
                }
            }

            Packet::Notify { message } => {
                let Some(client_id) = self.sender_id(addr).await else {
                    warn!("Notify from unknown address {}", addr);
                    return;
                };
                let authority_id = self.clients.read().await.authority_id();
                if authority_id != Some(client_id) {
                    warn!("Client {} tried to notify without authority", client_id);
                    return;
                }

                debug!("Relaying {:?} from authority {}", message, client_id);
                self.broadcast_packet(
                    Packet::Relayed {
                        from: client_id,
                        message,
                    },
                    Some(client_id),
                );
            }

            Packet::Request { message } => {
                let Some(client_id) = self.sender_id(addr).await else {
                    warn!("Request from unknown address {}", addr);
                    return;
                };
                let (authority_id, authority_addr) = {
                    let clients = self.clients.read().await;
                    (clients.authority_id(), clients.authority_addr())
                };

                match (authority_id, authority_addr) {
                    (Some(authority_id), _) if authority_id == client_id => {
                        warn!("Authority {} sent a request to itself", client_id);
                    }
                    (Some(_), Some(authority_addr)) => {
                        debug!("Forwarding {:?} from {} to authority", message, client_id);
                        self.send_packet(
                            Packet::Relayed {
                                from: client_id,
                                message,
                            },
                            authority_addr,
                        );
                    }
                    _ => warn!("No authority to receive request from {}", client_id),
                }
            }

            Packet::Disconnect => {
                let client_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(client_id) = client_id {
                    self.drop_client(client_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(&mut self, client_version: u32, display_name: String, addr: SocketAddr) {
        info!(
            "Client '{}' connecting from {} (version: {})",
            display_name, addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            warn!(
                "Refusing {}: protocol {} != {}",
                addr, client_version, PROTOCOL_VERSION
            );
            self.send_packet(
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        // A retried Connect from an admitted address keeps its identity
        let existing = {
            let mut clients = self.clients.write().await;
            clients.find_client_by_addr(addr).map(|client_id| {
                clients.touch(client_id);
                let authority_id = clients.authority_id().unwrap_or(client_id);
                (client_id, authority_id, clients.roster_excluding(client_id))
            })
        };

        if let Some((client_id, authority_id, roster)) = existing {
            debug!("Client {} at {} already admitted, resending Connected", client_id, addr);
            self.send_packet(
                Packet::Connected {
                    client_id,
                    authority_id,
                    roster,
                },
                addr,
            );
            return;
        }

        let admitted = {
            let mut clients = self.clients.write().await;
            clients
                .add_client(addr, display_name.clone())
                .map(|client_id| {
                    let authority_id = clients.authority_id().unwrap_or(client_id);
                    (client_id, authority_id, clients.roster_excluding(client_id))
                })
        };

        match admitted {
            Some((client_id, authority_id, roster)) => {
                self.send_packet(
                    Packet::Connected {
                        client_id,
                        authority_id,
                        roster,
                    },
                    addr,
                );
                self.broadcast_packet(
                    Packet::PeerJoined {
                        client_id,
                        display_name,
                    },
                    Some(client_id),
                );
            }
            None => {
                self.send_packet(
                    Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                    addr,
                );
            }
        }
    }

    async fn drop_client(&mut self, client_id: u32) {
        let removed = {
            let mut clients = self.clients.write().await;
            clients.remove_client(&client_id)
        };
        if removed {
            self.announce_departure(client_id);
        }
    }

    fn announce_departure(&self, client_id: u32) {
        self.broadcast_packet(Packet::PeerLeft { client_id }, Some(client_id));
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        // Initialize concurrent tasks
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            info!("Client {} timed out", client_id);
                            self.announce_departure(client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    tick += 1;

                    // Periodic membership monitoring
                    if tick % 100 == 0 {
                        let clients = self.clients.read().await;
                        if !clients.is_empty() {
                            debug!(
                                "Tick {}: {} clients, authority {:?}",
                                tick,
                                clients.len(),
                                clients.authority_id()
                            );
                        }
                    }
                },
            }
        }

        Ok(())
    }
}
