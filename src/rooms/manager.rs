//! Session manager - owns the room table and routes commands to sessions

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::physics::Side;
use crate::game::seats::{JoinKind, LeaveKind, LeaveOutcome};
use crate::game::{
    Command, MatchOutcome, MatchSession, Outbound, RoomSeats, SessionCommand, SessionHandle,
    SessionSettings, TournamentLink,
};
use crate::ws::protocol::{validate_room_id, RoomMode, SeatInfo, ServerMsg, SessionStatus};

/// Routing failures surfaced to the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room {0} not found")]
    NotFound(String),

    #[error("Room {0} is full")]
    Full(String),

    #[error("{0}")]
    Validation(String),

    #[error("Room {0} is closed")]
    Closed(String),
}

impl RoomError {
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::NotFound(_) => "room_not_found",
            RoomError::Full(_) => "room_full",
            RoomError::Validation(_) => "validation_error",
            RoomError::Closed(_) => "room_closed",
        }
    }
}

/// Result of a successful join
pub struct JoinedRoom {
    pub handle: SessionHandle,
    pub sides: Vec<Side>,
    pub kind: JoinKind,
    pub mode: RoomMode,
    pub players: Vec<SeatInfo>,
}

impl JoinedRoom {
    /// Confirmation sent to the joiner only
    pub fn room_joined(&self) -> ServerMsg {
        ServerMsg::RoomJoined {
            room_id: self.handle.room_id.clone(),
            mode: self.mode,
            status: self.handle.status(),
            controls: self.sides.clone(),
            players: self.players.clone(),
            win_score: self.handle.win_score,
        }
    }
}

/// Room id -> running session
pub struct SessionManager {
    rooms: Arc<DashMap<String, SessionHandle>>,
    defaults: SessionSettings,
    grace: Duration,
    outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
}

impl SessionManager {
    pub fn new(
        defaults: SessionSettings,
        grace: Duration,
        outcome_tx: mpsc::UnboundedSender<MatchOutcome>,
    ) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            defaults,
            grace,
            outcome_tx,
        }
    }

    pub fn defaults(&self) -> &SessionSettings {
        &self.defaults
    }

    pub fn get(&self, room_id: &str) -> Option<SessionHandle> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// Create the room in `waiting` if absent, then seat the user
    pub fn create_or_join(
        &self,
        room_id: &str,
        user_id: Uuid,
        display_name: &str,
        mode: RoomMode,
    ) -> Result<JoinedRoom, RoomError> {
        validate_room_id(room_id).map_err(RoomError::Validation)?;

        let handle = match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let seats = RoomSeats::new(mode, Instant::now());
                let handle = self.spawn_session(room_id, seats, self.defaults.clone(), None);
                info!(room_id = %room_id, mode = ?mode, "Room created");
                entry.insert(handle).clone()
            }
        };

        if handle.command_tx.is_closed() {
            return Err(RoomError::Closed(room_id.to_string()));
        }

        let (joined, mode, players) = {
            let mut seats = handle.seats.lock();
            let joined = seats
                .join(user_id, display_name)
                .map_err(|_| RoomError::Full(room_id.to_string()))?;
            (joined, seats.mode(), seats.infos())
        };

        for side in &joined.sides {
            let msg = match joined.kind {
                JoinKind::Joined => players
                    .iter()
                    .find(|p| p.side == *side)
                    .cloned()
                    .map(|player| ServerMsg::PlayerJoined { player }),
                JoinKind::Reconnected => Some(ServerMsg::PlayerReconnected {
                    side: *side,
                    user_id,
                }),
            };
            if let Some(msg) = msg {
                handle.broadcast(Outbound::all(msg));
            }
        }

        info!(
            room_id = %room_id,
            user_id = %user_id,
            sides = ?joined.sides,
            kind = ?joined.kind,
            "Player joined room"
        );

        Ok(JoinedRoom {
            handle,
            sides: joined.sides,
            kind: joined.kind,
            mode,
            players,
        })
    }

    /// Route a validated command to its room. Never waits on the session.
    pub fn dispatch(&self, room_id: &str, user_id: Uuid, command: Command) -> Result<(), RoomError> {
        let handle = self
            .get(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;

        match handle
            .command_tx
            .try_send(SessionCommand::Player { user_id, command })
        {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(room_id = %room_id, user_id = %user_id, "Session queue full, command dropped");
                Err(RoomError::Validation("Too many pending commands".into()))
            }
            Err(TrySendError::Closed(_)) => Err(RoomError::Closed(room_id.to_string())),
        }
    }

    /// Detach a user. A seat in a waiting, open room is released; otherwise
    /// it is kept for a reconnect.
    pub fn leave(&self, room_id: &str, user_id: Uuid) -> Result<Option<LeaveOutcome>, RoomError> {
        let handle = self
            .get(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;

        let outcome = {
            let mut seats = handle.seats.lock();
            let vacate = handle.status() == SessionStatus::Waiting && !seats.is_reserved();
            seats.leave(user_id, vacate, Instant::now())
        };

        if let Some(outcome) = &outcome {
            for side in &outcome.sides {
                handle.broadcast(Outbound::all(ServerMsg::PlayerDisconnected {
                    side: *side,
                    user_id,
                }));
            }
            info!(
                room_id = %room_id,
                user_id = %user_id,
                vacated = outcome.kind == LeaveKind::Vacated,
                "Player left room"
            );
        }

        Ok(outcome)
    }

    /// Open the room for a tournament match with both seats reserved.
    /// Re-opening the same match returns the live room.
    pub fn open_reserved(
        &self,
        room_id: &str,
        players: [Uuid; 2],
        settings: SessionSettings,
        link: TournamentLink,
    ) -> Result<SessionHandle, RoomError> {
        validate_room_id(room_id).map_err(RoomError::Validation)?;

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(entry) if entry.get().link == Some(link) => Ok(entry.get().clone()),
            Entry::Occupied(_) => Err(RoomError::Validation(format!(
                "Room id {room_id} is already in use"
            ))),
            Entry::Vacant(entry) => {
                let seats = RoomSeats::reserved(players[0], players[1], Instant::now());
                let handle = self.spawn_session(room_id, seats, settings, Some(link));
                info!(
                    room_id = %room_id,
                    tournament_id = %link.tournament_id,
                    match_id = %link.match_id,
                    "Tournament room opened"
                );
                Ok(entry.insert(handle).clone())
            }
        }
    }

    /// Remove a room and stop its session. Returns false if it was unknown.
    pub fn destroy(&self, room_id: &str, reason: &str) -> bool {
        let Some((_, handle)) = self.rooms.remove(room_id) else {
            return false;
        };

        let cmd = SessionCommand::Shutdown {
            reason: reason.to_string(),
        };
        if let Err(TrySendError::Full(cmd)) = handle.command_tx.try_send(cmd) {
            let tx = handle.command_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(cmd).await;
            });
        }

        info!(room_id = %room_id, reason = %reason, "Room destroyed");
        true
    }

    /// Destroy rooms that have had no connected human for the grace window
    pub fn reap_idle(&self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .seats
                    .lock()
                    .idle_for(now)
                    .is_some_and(|idle| idle >= self.grace)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for room_id in &expired {
            self.destroy(room_id, "idle");
        }
        expired
    }

    /// Periodic reclaim loop
    pub async fn run(&self) {
        let period = (self.grace / 2).clamp(Duration::from_millis(250), Duration::from_secs(5));
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;
            let reaped = self.reap_idle(Instant::now());
            if !reaped.is_empty() {
                debug!(count = reaped.len(), "Reaped idle rooms");
            }
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn connected_players(&self) -> usize {
        self.rooms
            .iter()
            .map(|entry| entry.value().seats.lock().connected_humans())
            .sum()
    }

    fn spawn_session(
        &self,
        room_id: &str,
        seats: RoomSeats,
        settings: SessionSettings,
        link: Option<TournamentLink>,
    ) -> SessionHandle {
        let outcome_tx = link.map(|_| self.outcome_tx.clone());
        let (session, handle) = MatchSession::new(
            room_id.to_string(),
            settings,
            Arc::new(Mutex::new(seats)),
            link,
            outcome_tx,
        );

        let rooms = self.rooms.clone();
        let room_id = room_id.to_string();
        let command_tx = handle.command_tx.clone();
        tokio::spawn(async move {
            session.run().await;
            // Only drop the entry if it still points at this session
            rooms.remove_if(&room_id, |_, h| h.command_tx.same_channel(&command_tx));
        });

        handle
    }
}
