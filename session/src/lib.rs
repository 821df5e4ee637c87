//! # Session Core
//!
//! This library holds the authoritative session state machine for a
//! two-participant pickup duel, together with the synchronization protocol
//! that keeps every participant's view of the session in agreement. It does
//! no I/O of its own: the transport layer feeds it membership changes and
//! relay messages, the gameplay layer reports pickups, and the presentation
//! layer subscribes to its notifications.
//!
//! ## Authority Model
//!
//! Exactly one participant holds authority. Its session decides every
//! transition (countdown, game over, restart) and relays each decision.
//! Every other participant runs the same code but only applies what is
//! relayed to it. The one exception is the membership fallback: any
//! participant that sees the roster drop below quorum during play returns
//! itself to the lobby without waiting for the relay.
//!
//! ## Module Organization
//!
//! ### Bus (`bus`)
//! Per-session publish/subscribe channel. Components publish notifications;
//! the session routes them, and the presentation layer reads the same stream.
//!
//! ### Registry (`registry`)
//! Roster of participants and their scores, with idempotent registration,
//! pending-identity resolution and two-strike pruning of dead entries.
//!
//! ### Relay (`relay`)
//! Authority-to-all `notify` and participant-to-authority `request` on top
//! of a pluggable [`relay::RelayTransport`]. Tolerates being attached late.
//!
//! ### Winner (`winner`)
//! Waits for score updates to settle after the round ends, bounded by a
//! timeout, then computes the winner or draw.
//!
//! ### Quorum (`quorum`)
//! Deduplicated restart votes; fires once per game-over lifecycle.
//!
//! ### Machine (`machine`)
//! The `SessionState` transitions and countdown.
//!
//! ### Scheduler (`scheduler`)
//! Named logical-clock timers. Waiting never blocks; timers fire when the
//! owner advances the clock from its tick.
//!
//! ## Usage Example
//!
//! ```rust
//! use session::{MemoryTransport, ParticipantHandle, Session, SessionConfig, SyncRelay};
//! use shared::SessionState;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! let mut session = Session::new(SessionConfig::default());
//! session.spawn_local(ParticipantHandle::new(1, "alice", true));
//! session.on_authority_determined(true);
//!
//! let (tx, _outbound) = mpsc::unbounded_channel();
//! session.attach_relay(SyncRelay::new(MemoryTransport::new(1, tx)));
//!
//! session.on_participant_joined(2, "bob");
//! assert_eq!(session.state(), SessionState::CountdownToStart);
//!
//! for _ in 0..5 {
//!     session.advance(Duration::from_secs(1));
//! }
//! assert_eq!(session.state(), SessionState::InGame);
//! ```

pub mod bus;
pub mod config;
pub mod context;
pub mod items;
pub mod machine;
pub mod quorum;
pub mod registry;
pub mod relay;
pub mod scheduler;
pub mod session;
pub mod winner;

pub use bus::{EventBus, SessionEvent, Subscription};
pub use config::SessionConfig;
pub use registry::{Participant, ParticipantHandle, ParticipantRegistry};
pub use relay::{Envelope, MemoryTransport, RelayError, RelayTransport, Route, SyncRelay};
pub use session::Session;
pub use winner::{determine_winner, EndReason, SettlementPhase, WinnerOutcome};
