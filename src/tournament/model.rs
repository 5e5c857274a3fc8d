//! Tournament entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::physics::Side;
use crate::game::score::DEFAULT_WIN_SCORE;
use crate::game::SessionSettings;

pub const MAX_NAME_LEN: usize = 100;
pub const MIN_PARTICIPANTS: u32 = 2;
pub const MAX_PARTICIPANTS: u32 = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TournamentError {
    #[error("Tournament {0} not found")]
    NotFound(Uuid),

    #[error("Match {0} not found")]
    MatchNotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error("Conflicting update: {0}")]
    ConcurrencyConflict(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Tournament is full")]
    Full,

    #[error("Already registered")]
    AlreadyRegistered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentKind {
    #[default]
    SingleElimination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Registration,
    InProgress,
    Finished,
}

/// How ranks below the final are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankPolicy {
    /// Only winner (1) and runner-up (2) are ranked
    #[default]
    FinalistsOnly,
    /// Everyone knocked out in the same round shares a rank
    ByEliminationRound,
}

fn default_win_score() -> u32 {
    DEFAULT_WIN_SCORE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentSettings {
    #[serde(default = "default_win_score")]
    pub win_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paddle_speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ball_speed: Option<f32>,
    #[serde(default)]
    pub rank_policy: RankPolicy,
}

impl Default for TournamentSettings {
    fn default() -> Self {
        Self {
            win_score: DEFAULT_WIN_SCORE,
            paddle_speed: None,
            ball_speed: None,
            rank_policy: RankPolicy::default(),
        }
    }
}

impl TournamentSettings {
    pub fn validate(&self) -> Result<(), TournamentError> {
        if !(1..=99).contains(&self.win_score) {
            return Err(TournamentError::Validation("winScore must be 1..=99".into()));
        }
        for (name, value) in [("paddleSpeed", self.paddle_speed), ("ballSpeed", self.ball_speed)] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 || v > 50.0 {
                    return Err(TournamentError::Validation(format!(
                        "{name} must be in (0, 50]"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Session settings for this tournament's matches
    pub fn session_settings(&self, base: &SessionSettings) -> SessionSettings {
        let mut settings = base.clone();
        settings.win_score = self.win_score;
        if let Some(speed) = self.paddle_speed {
            settings.court.paddle_speed = speed;
        }
        if let Some(speed) = self.ball_speed {
            settings.court.ball_speed = speed;
            settings.court.max_ball_speed = settings.court.max_ball_speed.max(speed);
        }
        settings
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Tournament-scoped id (registration order, from 1)
    pub id: u32,
    pub user_id: Uuid,
    pub display_name: String,
    /// Requested seed during registration, normalised to 1..N at start
    pub seed: Option<u32>,
    pub eliminated: bool,
    pub eliminated_round: Option<u32>,
    pub final_rank: Option<u32>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
}

/// Grid cell for rendering: column `x` = round - 1, row `y` in half-slot units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketPosition {
    pub round: u32,
    pub x: u32,
    pub y: u32,
}

/// Where a match's winner goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextSlot {
    pub round: u32,
    pub index: u32,
    pub slot: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentMatch {
    pub id: Uuid,
    pub round: u32,
    pub index: u32,
    pub position: BracketPosition,
    /// Participant ids, `[left, right]`
    pub slots: [Option<u32>; 2],
    pub status: MatchStatus,
    pub scores: Option<[u32; 2]>,
    pub winner: Option<Side>,
    pub next: Option<NextSlot>,
    /// Room id of the linked match session
    pub session_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TournamentMatch {
    pub fn slot(&self, side: Side) -> Option<u32> {
        match side {
            Side::Left => self.slots[0],
            Side::Right => self.slots[1],
        }
    }

    pub fn slot_mut(&mut self, side: Side) -> &mut Option<u32> {
        match side {
            Side::Left => &mut self.slots[0],
            Side::Right => &mut self.slots[1],
        }
    }

    pub fn winner_id(&self) -> Option<u32> {
        self.winner.and_then(|side| self.slot(side))
    }

    pub fn loser_id(&self) -> Option<u32> {
        self.winner.and_then(|side| self.slot(side.opposite()))
    }

    pub fn is_filled(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: Uuid,
    pub name: String,
    pub kind: TournamentKind,
    pub status: TournamentStatus,
    pub max_participants: u32,
    pub settings: TournamentSettings,
    pub created_by: Uuid,
    pub participants: Vec<Participant>,
    /// Ordered by (round, index)
    pub matches: Vec<TournamentMatch>,
    pub rounds: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// List entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: TournamentKind,
    pub status: TournamentStatus,
    pub participant_count: usize,
    pub max_participants: u32,
    pub created_at: DateTime<Utc>,
}

impl Tournament {
    pub fn new(
        name: &str,
        max_participants: u32,
        kind: TournamentKind,
        settings: TournamentSettings,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self, TournamentError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(TournamentError::Validation(format!(
                "name must be 1..={MAX_NAME_LEN} characters"
            )));
        }
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&max_participants) {
            return Err(TournamentError::Validation(format!(
                "maxParticipants must be {MIN_PARTICIPANTS}..={MAX_PARTICIPANTS}"
            )));
        }
        settings.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            status: TournamentStatus::Registration,
            max_participants,
            settings,
            created_by,
            participants: Vec::new(),
            matches: Vec::new(),
            rounds: 0,
            created_at: now,
            started_at: None,
            finished_at: None,
        })
    }

    pub fn participant(&self, id: u32) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: u32) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn match_index(&self, match_id: Uuid) -> Result<usize, TournamentError> {
        self.matches
            .iter()
            .position(|m| m.id == match_id)
            .ok_or(TournamentError::MatchNotFound(match_id))
    }

    pub fn match_at(&self, round: u32, index: u32) -> Option<usize> {
        self.matches
            .iter()
            .position(|m| m.round == round && m.index == index)
    }

    pub fn summary(&self) -> TournamentSummary {
        TournamentSummary {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            status: self.status,
            participant_count: self.participants.len(),
            max_participants: self.max_participants,
            created_at: self.created_at,
        }
    }

    /// Add a participant during registration
    pub fn register(
        &mut self,
        user_id: Uuid,
        display_name: &str,
        seed: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<&Participant, TournamentError> {
        if self.status != TournamentStatus::Registration {
            return Err(TournamentError::InvalidState(
                "Registration is closed".into(),
            ));
        }
        if self.participants.iter().any(|p| p.user_id == user_id) {
            return Err(TournamentError::AlreadyRegistered);
        }
        if self.participants.len() as u32 >= self.max_participants {
            return Err(TournamentError::Full);
        }
        if seed == Some(0) {
            return Err(TournamentError::Validation("seed must be at least 1".into()));
        }
        let display_name = display_name.trim();
        if display_name.is_empty() || display_name.chars().count() > MAX_NAME_LEN {
            return Err(TournamentError::Validation(format!(
                "displayName must be 1..={MAX_NAME_LEN} characters"
            )));
        }

        let id = self.participants.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        self.participants.push(Participant {
            id,
            user_id,
            display_name: display_name.to_string(),
            seed,
            eliminated: false,
            eliminated_round: None,
            final_rank: None,
            registered_at: now,
        });
        Ok(&self.participants[self.participants.len() - 1])
    }
}
