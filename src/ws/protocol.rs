//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::physics::Side;
use crate::game::{Command, PaddleIntent};

/// Longest accepted room identifier
pub const MAX_ROOM_ID_LEN: usize = 64;

/// How the seats of a room are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomMode {
    /// Two humans on separate connections
    #[default]
    Multiplayer,
    /// One human on the left, computer on the right
    VsAi,
    /// One connection drives both paddles
    Local,
}

/// Lifecycle of a match session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Playing,
    Paused,
    Finished,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Create the room if absent, otherwise take a free (or own) seat
    JoinRoom {
        room_id: String,
        #[serde(default)]
        mode: RoomMode,
    },

    /// Leave the current room
    LeaveRoom,

    /// waiting/paused -> playing
    GameStart,

    /// playing -> paused
    GamePause,

    /// any non-finished state -> waiting, scores and ball zeroed
    GameReset,

    /// Directional (`direction`) or absolute (`targetY`) paddle command
    PaddleMove {
        player: Side,
        #[serde(default)]
        direction: Option<i8>,
        #[serde(default)]
        target_y: Option<f32>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

impl ClientMsg {
    /// Reject malformed payloads before they reach a session
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ClientMsg::JoinRoom { room_id, .. } => validate_room_id(room_id),
            ClientMsg::PaddleMove { direction, target_y, .. } => match (direction, target_y) {
                (Some(d), None) if (-1..=1).contains(d) => Ok(()),
                (Some(d), None) => Err(format!("direction must be -1, 0 or 1, got {d}")),
                (None, Some(y)) if y.is_finite() => Ok(()),
                (None, Some(_)) => Err("targetY must be a finite number".to_string()),
                (Some(_), Some(_)) => Err("send either direction or targetY, not both".to_string()),
                (None, None) => Err("paddle_move needs direction or targetY".to_string()),
            },
            _ => Ok(()),
        }
    }

    /// Session-level command carried by this message, if any
    pub fn to_command(&self) -> Option<Command> {
        match self {
            ClientMsg::GameStart => Some(Command::Start),
            ClientMsg::GamePause => Some(Command::Pause),
            ClientMsg::GameReset => Some(Command::Reset),
            ClientMsg::PaddleMove { player, direction, target_y } => {
                let intent = match (direction, target_y) {
                    (Some(d), _) => PaddleIntent::Direction(*d),
                    (None, Some(y)) => PaddleIntent::Target(*y),
                    (None, None) => return None,
                };
                Some(Command::Paddle { side: *player, intent })
            }
            _ => None,
        }
    }
}

pub fn validate_room_id(room_id: &str) -> Result<(), String> {
    if room_id.is_empty() || room_id.len() > MAX_ROOM_ID_LEN {
        return Err(format!("roomId must be 1..={MAX_ROOM_ID_LEN} characters"));
    }
    if !room_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("roomId may only contain letters, digits, '-' and '_'".to_string());
    }
    Ok(())
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        user_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of a room join (sent only to the joiner)
    RoomJoined {
        room_id: String,
        mode: RoomMode,
        status: SessionStatus,
        /// Paddles this connection may drive
        controls: Vec<Side>,
        players: Vec<SeatInfo>,
        win_score: u32,
    },

    PlayerJoined {
        player: SeatInfo,
    },

    PlayerDisconnected {
        side: Side,
        user_id: Uuid,
    },

    PlayerReconnected {
        side: Side,
        user_id: Uuid,
    },

    StatusChanged {
        status: SessionStatus,
    },

    /// Per-tick state snapshot
    GameStateUpdate {
        tick: u64,
        ball: BallState,
        left_paddle: PaddleState,
        right_paddle: PaddleState,
        left_score: u32,
        right_score: u32,
    },

    /// Match has ended; no further state updates follow
    GameOver {
        winner_side: Side,
        left_score: u32,
        right_score: u32,
    },

    /// The room was torn down
    RoomClosed {
        reason: String,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddleState {
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatKind {
    Human,
    Ai,
}

/// Seat occupant as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatInfo {
    pub side: Side,
    pub kind: SeatKind,
    pub user_id: Option<Uuid>,
    pub display_name: String,
    pub connected: bool,
}
