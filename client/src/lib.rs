//! # Participant Client Library
//!
//! This library provides the participant process for a pickup duel. Each
//! process owns one session core and keeps it synchronized with the other
//! participant through the relay hub.
//!
//! ## Architecture Overview
//!
//! The client never decides anything the session core has not decided. It
//! feeds the core, carries the core's relay traffic, and shows the core's
//! notifications:
//!
//! ### Membership Bridging
//! `Connected`, `PeerJoined` and `PeerLeft` from the hub become registry
//! changes in the core. The `Connected` reply also tells the client whether
//! it holds authority, which is forwarded before the relay is attached.
//!
//! ### Relay Carriage
//! Authority notifications leave as `Notify` packets, requests to the
//! authority leave as `Request` packets, and `Relayed` packets from the hub
//! are handed back to the core.
//!
//! ### Presentation
//! Notifications are logged as they arrive; no rendering is performed.
//!
//! ## Module Organization
//!
//! ### Bridge Module (`bridge`)
//! Synchronous translation between hub packets and session entry points,
//! including the `UdpRelayTransport`.
//!
//! ### Input Module (`input`)
//! Console command parsing and the optional random pickup bot.
//!
//! ### Network Module (`network`)
//! UDP socket, heartbeats, console reading and the tick that drives the core.
//!
//! ### Presenter Module (`presenter`)
//! Console output of session notifications.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use session::SessionConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", "alice", SessionConfig::default(), None).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod input;
pub mod network;
pub mod presenter;
