use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const PROTOCOL_VERSION: u32 = 1;
pub const REQUIRED_PARTICIPANTS: usize = 2;
pub const COUNTDOWN_TICKS: u32 = 5;
pub const TOTAL_ITEMS: usize = 3;
pub const MAX_PACKET_SIZE: usize = 2048;

/// Lifecycle of one session, identical on every participant once relays settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    WaitingForPlayers,
    CountdownToStart,
    InGame,
    GameOver,
    WaitingForRestart,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::WaitingForPlayers => "waiting for players",
            SessionState::CountdownToStart => "countdown",
            SessionState::InGame => "in game",
            SessionState::GameOver => "game over",
            SessionState::WaitingForRestart => "waiting for restart",
        };
        f.write_str(label)
    }
}

/// Payloads carried by the synchronization relay.
///
/// Authority-originated messages (`notify`) and participant requests
/// (`request`) share one enum; the transport treats them as opaque values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayMessage {
    State { state: SessionState },
    Countdown { seconds_remaining: u32 },
    InputEnabled { enabled: bool },
    Winner { message: String },
    ScoreUpdate { participant_id: u32, score: u32 },
    ItemCollected { participant_id: u32, item_id: u32, value: u32 },
    ItemDeactivated { item_id: u32 },
    EndGame,
    RestartClick { participant_id: u32 },
    RestartVote { participant_id: u32 },
    ExecuteRestart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub client_id: u32,
    pub display_name: String,
}

/// Datagrams exchanged between participant processes and the relay hub.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        display_name: String,
    },
    Heartbeat,
    /// Authority only: fan out to every other participant.
    Notify {
        message: RelayMessage,
    },
    /// Any participant: deliver to the authority.
    Request {
        message: RelayMessage,
    },
    Disconnect,

    Connected {
        client_id: u32,
        authority_id: u32,
        roster: Vec<PeerInfo>,
    },
    PeerJoined {
        client_id: u32,
        display_name: String,
    },
    PeerLeft {
        client_id: u32,
    },
    Relayed {
        from: u32,
        message: RelayMessage,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("packet of {0} bytes exceeds datagram limit")]
    TooLarge(usize),
}

pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let data = bincode::serialize(packet).map_err(|e| CodecError::Encode(e.to_string()))?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(CodecError::TooLarge(data.len()));
    }
    Ok(data)
}

pub fn decode_packet(data: &[u8]) -> Result<Packet, CodecError> {
    bincode::deserialize(data).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_waiting() {
        assert_eq!(SessionState::default(), SessionState::WaitingForPlayers);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::InGame.to_string(), "in game");
        assert_eq!(
            SessionState::WaitingForRestart.to_string(),
            "waiting for restart"
        );
    }

    #[test]
    fn test_packet_serialization_relayed() {
        let packet = Packet::Relayed {
            from: 1,
            message: RelayMessage::ScoreUpdate {
                participant_id: 2,
                score: 7,
            },
        };

        let data = encode_packet(&packet).unwrap();
        match decode_packet(&data).unwrap() {
            Packet::Relayed { from, message } => {
                assert_eq!(from, 1);
                assert_eq!(
                    message,
                    RelayMessage::ScoreUpdate {
                        participant_id: 2,
                        score: 7
                    }
                );
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_connected_roster() {
        let packet = Packet::Connected {
            client_id: 2,
            authority_id: 1,
            roster: vec![PeerInfo {
                client_id: 1,
                display_name: "host".to_string(),
            }],
        };

        let data = encode_packet(&packet).unwrap();
        match decode_packet(&data).unwrap() {
            Packet::Connected {
                client_id,
                authority_id,
                roster,
            } => {
                assert_eq!(client_id, 2);
                assert_eq!(authority_id, 1);
                assert_eq!(roster.len(), 1);
                assert_eq!(roster[0].display_name, "host");
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = decode_packet(&[0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_encode_oversized_winner_message() {
        let packet = Packet::Notify {
            message: RelayMessage::Winner {
                message: "x".repeat(MAX_PACKET_SIZE * 2),
            },
        };

        assert!(matches!(
            encode_packet(&packet),
            Err(CodecError::TooLarge(_))
        ));
    }
}
