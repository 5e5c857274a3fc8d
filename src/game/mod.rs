//! Real-time match simulation

pub mod ai;
pub mod physics;
pub mod score;
pub mod seats;
pub mod session;
pub mod snapshot;

pub use score::MatchFinished;
pub use seats::RoomSeats;
pub use session::{MatchSession, SessionHandle, SessionSettings};

use uuid::Uuid;

use crate::game::physics::Side;
use crate::ws::protocol::ServerMsg;

/// Paddle command payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaddleIntent {
    Direction(i8),
    Target(f32),
}

/// Validated player command for a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    Pause,
    Reset,
    Paddle { side: Side, intent: PaddleIntent },
}

/// Message on a session's input queue
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Player { user_id: Uuid, command: Command },
    /// Broadcast a final notice and stop the task
    Shutdown { reason: String },
}

/// Broadcast envelope; `to` narrows delivery to one user
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Option<Uuid>,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self { to: None, msg }
    }

    pub fn to(user_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            to: Some(user_id),
            msg,
        }
    }

    pub fn is_for(&self, user_id: Uuid) -> bool {
        self.to.map_or(true, |to| to == user_id)
    }
}

/// Ties a room to the tournament match it is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TournamentLink {
    pub tournament_id: Uuid,
    pub match_id: Uuid,
}

/// Reported once when a tournament-linked session finishes
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub room_id: String,
    pub link: TournamentLink,
    pub result: MatchFinished,
}
