//! Synchronization relay between the authority and the other participants
//!
//! The relay is the only path for cross-participant traffic. It offers two
//! patterns on top of whatever transport delivers the bytes:
//! - `notify`: authority to every other participant. The sender is never
//!   echoed, so callers apply the effect locally themselves.
//! - `request`: any participant to the authority, which applies the effect
//!   and re-broadcasts it with `notify`.
//!
//! The relay may be created after the session core. Until it is attached the
//! [`RelaySlot`] queues outbound messages and flushes them on attach.

use log::{debug, error, info, warn};
use shared::RelayMessage;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("only the authority may notify participants")]
    NotAuthority,

    #[error("relay transport closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Every participant except the sender
    Broadcast,
    /// The authority only
    Authority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: u32,
    pub route: Route,
    pub message: RelayMessage,
}

/// Reliable one-to-many primitive supplied by the transport layer
pub trait RelayTransport: Send {
    fn broadcast(&mut self, message: RelayMessage) -> Result<(), RelayError>;

    fn send_to_authority(&mut self, message: RelayMessage) -> Result<(), RelayError>;
}

/// In-process transport: every message becomes an [`Envelope`] on a channel
/// that a host (or a test) routes between sessions.
pub struct MemoryTransport {
    from: u32,
    outbound: UnboundedSender<Envelope>,
}

impl MemoryTransport {
    pub fn new(from: u32, outbound: UnboundedSender<Envelope>) -> Self {
        Self { from, outbound }
    }

    fn send(&self, route: Route, message: RelayMessage) -> Result<(), RelayError> {
        self.outbound
            .send(Envelope {
                from: self.from,
                route,
                message,
            })
            .map_err(|_| RelayError::Closed)
    }
}

impl RelayTransport for MemoryTransport {
    fn broadcast(&mut self, message: RelayMessage) -> Result<(), RelayError> {
        self.send(Route::Broadcast, message)
    }

    fn send_to_authority(&mut self, message: RelayMessage) -> Result<(), RelayError> {
        self.send(Route::Authority, message)
    }
}

pub struct SyncRelay {
    transport: Box<dyn RelayTransport>,
}

impl SyncRelay {
    pub fn new(transport: impl RelayTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    pub fn notify(&mut self, has_authority: bool, message: RelayMessage) -> Result<(), RelayError> {
        if !has_authority {
            return Err(RelayError::NotAuthority);
        }
        self.transport.broadcast(message)
    }

    pub fn request(&mut self, message: RelayMessage) -> Result<(), RelayError> {
        self.transport.send_to_authority(message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outbound {
    Notify(RelayMessage),
    Request(RelayMessage),
}

/// Optional relay plus the backlog built up while it is absent
pub struct RelaySlot {
    relay: Option<SyncRelay>,
    queued: VecDeque<Outbound>,
    capacity: usize,
}

impl RelaySlot {
    pub fn new(capacity: usize) -> Self {
        Self {
            relay: None,
            queued: VecDeque::new(),
            capacity,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.relay.is_some()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Installs the relay and flushes the backlog. Returns the number of
    /// messages delivered.
    pub fn attach(&mut self, relay: SyncRelay, has_authority: bool) -> usize {
        if self.relay.is_some() {
            info!("Replacing attached relay");
        }
        self.relay = Some(relay);

        let backlog = std::mem::take(&mut self.queued);
        let mut flushed = 0;
        for outbound in backlog {
            let delivered = match outbound {
                Outbound::Notify(message) => self.notify(has_authority, message),
                Outbound::Request(message) => self.request(message),
            };
            if delivered {
                flushed += 1;
            }
        }

        if flushed > 0 {
            info!("Flushed {} queued relay message(s)", flushed);
        }
        flushed
    }

    /// Returns true if the message was handed to the transport
    pub fn notify(&mut self, has_authority: bool, message: RelayMessage) -> bool {
        if !has_authority {
            warn!("Refusing to notify without authority: {:?}", message);
            return false;
        }

        let Some(relay) = self.relay.as_mut() else {
            self.enqueue(Outbound::Notify(message));
            return false;
        };

        match relay.notify(has_authority, message) {
            Ok(()) => true,
            Err(e) => {
                error!("Relay notify failed: {}", e);
                false
            }
        }
    }

    /// Returns true if the message was handed to the transport
    pub fn request(&mut self, message: RelayMessage) -> bool {
        let Some(relay) = self.relay.as_mut() else {
            self.enqueue(Outbound::Request(message));
            return false;
        };

        match relay.request(message) {
            Ok(()) => true,
            Err(e) => {
                error!("Relay request failed: {}", e);
                false
            }
        }
    }

    fn enqueue(&mut self, outbound: Outbound) {
        if self.capacity == 0 {
            warn!("No relay attached, dropping {:?}", outbound);
            return;
        }
        if self.queued.len() >= self.capacity {
            if let Some(dropped) = self.queued.pop_front() {
                warn!("Relay backlog full, dropping oldest {:?}", dropped);
            }
        }
        debug!("No relay attached yet, queueing {:?}", outbound);
        self.queued.push_back(outbound);
    }
}
