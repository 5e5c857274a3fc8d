//! Seat occupancy for one room

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::game::physics::Side;
use crate::ws::protocol::{RoomMode, SeatInfo, SeatKind};

const SIDES: [Side; 2] = [Side::Left, Side::Right];

#[derive(Debug, Clone, PartialEq)]
pub enum Occupant {
    Human { user_id: Uuid, display_name: String },
    Ai,
}

#[derive(Debug, Clone)]
pub struct Seat {
    pub occupant: Occupant,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    #[error("Room is full")]
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Joined,
    Reconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub sides: Vec<Side>,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveKind {
    /// Seat released for someone else
    Vacated,
    /// Seat kept for a reconnect
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub sides: Vec<Side>,
    pub kind: LeaveKind,
}

/// Who sits where in a room. Guarded by a room-scoped lock shared between the
/// session manager and the session task.
#[derive(Debug, Clone)]
pub struct RoomSeats {
    mode: RoomMode,
    left: Option<Seat>,
    right: Option<Seat>,
    /// Tournament rooms only admit the two reserved users, `[left, right]`
    reserved: Option<[Uuid; 2]>,
    empty_since: Option<Instant>,
}

impl RoomSeats {
    pub fn new(mode: RoomMode, now: Instant) -> Self {
        let right = match mode {
            RoomMode::VsAi => Some(Seat {
                occupant: Occupant::Ai,
                connected: true,
            }),
            _ => None,
        };

        Self {
            mode,
            left: None,
            right,
            reserved: None,
            empty_since: Some(now),
        }
    }

    pub fn reserved(left: Uuid, right: Uuid, now: Instant) -> Self {
        Self {
            reserved: Some([left, right]),
            ..Self::new(RoomMode::Multiplayer, now)
        }
    }

    pub fn mode(&self) -> RoomMode {
        self.mode
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved.is_some()
    }

    fn seat(&self, side: Side) -> &Option<Seat> {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    fn seat_mut(&mut self, side: Side) -> &mut Option<Seat> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Sides held by this user
    pub fn sides_of(&self, user_id: Uuid) -> Vec<Side> {
        SIDES
            .into_iter()
            .filter(|side| {
                matches!(
                    self.seat(*side),
                    Some(Seat { occupant: Occupant::Human { user_id: id, .. }, .. }) if *id == user_id
                )
            })
            .collect()
    }

    /// Seat a user, or re-attach them to the seats they already hold
    pub fn join(&mut self, user_id: Uuid, display_name: &str) -> Result<JoinOutcome, SeatError> {
        let held = self.sides_of(user_id);
        if !held.is_empty() {
            for side in &held {
                if let Some(seat) = self.seat_mut(*side) {
                    seat.connected = true;
                }
            }
            self.empty_since = None;
            return Ok(JoinOutcome {
                sides: held,
                kind: JoinKind::Reconnected,
            });
        }

        let sides: Vec<Side> = match (self.reserved, self.mode) {
            (Some(reserved), _) => SIDES
                .into_iter()
                .zip(reserved)
                .filter(|(side, id)| *id == user_id && self.seat(*side).is_none())
                .map(|(side, _)| side)
                .collect(),
            (None, RoomMode::Local) if self.left.is_none() && self.right.is_none() => SIDES.to_vec(),
            (None, RoomMode::Local) => Vec::new(),
            (None, _) => SIDES
                .into_iter()
                .find(|side| self.seat(*side).is_none())
                .into_iter()
                .collect(),
        };

        if sides.is_empty() {
            return Err(SeatError::Full);
        }

        for side in &sides {
            *self.seat_mut(*side) = Some(Seat {
                occupant: Occupant::Human {
                    user_id,
                    display_name: display_name.to_string(),
                },
                connected: true,
            });
        }
        self.empty_since = None;

        Ok(JoinOutcome {
            sides,
            kind: JoinKind::Joined,
        })
    }

    /// Detach a user. With `vacate` the seats are released, otherwise kept
    /// for a reconnect. Returns `None` if the user held no seat.
    pub fn leave(&mut self, user_id: Uuid, vacate: bool, now: Instant) -> Option<LeaveOutcome> {
        let sides = self.sides_of(user_id);
        if sides.is_empty() {
            return None;
        }

        for side in &sides {
            let seat = self.seat_mut(*side);
            if vacate {
                *seat = None;
            } else if let Some(seat) = seat {
                seat.connected = false;
            }
        }

        if self.connected_humans() == 0 && self.empty_since.is_none() {
            self.empty_since = Some(now);
        }

        Some(LeaveOutcome {
            sides,
            kind: if vacate {
                LeaveKind::Vacated
            } else {
                LeaveKind::Disconnected
            },
        })
    }

    /// True if `user_id` sits on `side`
    pub fn controls(&self, user_id: Uuid, side: Side) -> bool {
        self.sides_of(user_id).contains(&side)
    }

    /// Both paddles have an occupant (human or AI)
    pub fn is_full(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    pub fn connected_humans(&self) -> usize {
        let mut users: Vec<Uuid> = SIDES
            .into_iter()
            .filter_map(|side| match self.seat(side) {
                Some(Seat {
                    occupant: Occupant::Human { user_id, .. },
                    connected: true,
                }) => Some(*user_id),
                _ => None,
            })
            .collect();
        users.dedup();
        users.len()
    }

    pub fn ai_sides(&self) -> Vec<Side> {
        SIDES
            .into_iter()
            .filter(|side| matches!(self.seat(*side), Some(Seat { occupant: Occupant::Ai, .. })))
            .collect()
    }

    /// The human on a side, if any
    pub fn human_on(&self, side: Side) -> Option<Uuid> {
        match self.seat(side) {
            Some(Seat {
                occupant: Occupant::Human { user_id, .. },
                ..
            }) => Some(*user_id),
            _ => None,
        }
    }

    /// How long the room has had no connected human
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.empty_since.map(|since| now.saturating_duration_since(since))
    }

    pub fn info(&self, side: Side) -> Option<SeatInfo> {
        self.seat(side).as_ref().map(|seat| match &seat.occupant {
            Occupant::Human {
                user_id,
                display_name,
            } => SeatInfo {
                side,
                kind: SeatKind::Human,
                user_id: Some(*user_id),
                display_name: display_name.clone(),
                connected: seat.connected,
            },
            Occupant::Ai => SeatInfo {
                side,
                kind: SeatKind::Ai,
                user_id: None,
                display_name: "Computer".to_string(),
                connected: true,
            },
        })
    }

    pub fn infos(&self) -> Vec<SeatInfo> {
        SIDES.into_iter().filter_map(|side| self.info(side)).collect()
    }
}
