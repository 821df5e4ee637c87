//! # Relay Hub Library
//!
//! This library provides the transport hub that connects the participant
//! processes of a pickup duel. The hub owns no session state: every session
//! decision is made by the participant holding authority. The hub only
//! manages membership and moves relay messages between participants.
//!
//! ## Core Responsibilities
//!
//! ### Membership
//! Handles the lifecycle of participant connections:
//! - Admission with protocol version check and capacity limit
//! - Identity assignment, starting from 1
//! - Heartbeat tracking and timeout-based removal
//! - `PeerJoined` / `PeerLeft` announcements to everyone else
//!
//! ### Authority Assignment
//! The first participant admitted while nobody holds authority becomes the
//! authority. Its id is carried in every `Connected` reply.
//!
//! ### Relay Routing
//! - `Notify` from the authority fans out to every other participant
//! - `Notify` from anyone else is dropped with a warning
//! - `Request` from a participant is forwarded to the authority
//!
//! Both arrive at their destination as `Relayed { from, message }`.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connection tracking, identity and authority bookkeeping, timeouts.
//!
//! ### Network Module (`network`)
//! UDP socket management, packet decoding and the main event loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(50),
//!         2,
//!         Duration::from_secs(5),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The server uses an event-driven architecture with internal async tasks:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes outgoing packet queue and broadcasts
//! - **Timeout Checker**: Removes participants whose heartbeats stopped
//! - **Main Loop**: Admission and routing decisions

pub mod client_manager;
pub mod network;
