//! Tournament persistence over PostgREST.
//!
//! Tables: `tournaments`, `tournament_participants`, `tournament_matches`.
//! Rows are upserted by key so a tournament can be re-saved at any point and
//! rebuilt from its rows after a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::physics::Side;
use crate::tournament::{
    BracketPosition, MatchStatus, NextSlot, Participant, Tournament, TournamentKind,
    TournamentMatch, TournamentSettings, TournamentStatus,
};

use super::supabase::SupabaseClient;
use super::{StoreError, TournamentStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TournamentRow {
    id: Uuid,
    name: String,
    kind: TournamentKind,
    status: TournamentStatus,
    max_participants: u32,
    /// jsonb column
    settings: TournamentSettings,
    created_by: Uuid,
    rounds: u32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParticipantRow {
    tournament_id: Uuid,
    participant_id: u32,
    user_id: Uuid,
    display_name: String,
    seed: Option<u32>,
    eliminated: bool,
    eliminated_round: Option<u32>,
    final_rank: Option<u32>,
    registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MatchRow {
    id: Uuid,
    tournament_id: Uuid,
    round: u32,
    match_index: u32,
    pos_x: u32,
    pos_y: u32,
    left_participant: Option<u32>,
    right_participant: Option<u32>,
    status: MatchStatus,
    left_score: Option<u32>,
    right_score: Option<u32>,
    winner_side: Option<Side>,
    next_round: Option<u32>,
    next_index: Option<u32>,
    next_slot: Option<Side>,
    session_id: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

fn to_rows(t: &Tournament) -> (TournamentRow, Vec<ParticipantRow>, Vec<MatchRow>) {
    let tournament = TournamentRow {
        id: t.id,
        name: t.name.clone(),
        kind: t.kind,
        status: t.status,
        max_participants: t.max_participants,
        settings: t.settings.clone(),
        created_by: t.created_by,
        rounds: t.rounds,
        created_at: t.created_at,
        started_at: t.started_at,
        finished_at: t.finished_at,
    };

    let participants = t
        .participants
        .iter()
        .map(|p| ParticipantRow {
            tournament_id: t.id,
            participant_id: p.id,
            user_id: p.user_id,
            display_name: p.display_name.clone(),
            seed: p.seed,
            eliminated: p.eliminated,
            eliminated_round: p.eliminated_round,
            final_rank: p.final_rank,
            registered_at: p.registered_at,
        })
        .collect();

    let matches = t
        .matches
        .iter()
        .map(|m| MatchRow {
            id: m.id,
            tournament_id: t.id,
            round: m.round,
            match_index: m.index,
            pos_x: m.position.x,
            pos_y: m.position.y,
            left_participant: m.slots[0],
            right_participant: m.slots[1],
            status: m.status,
            left_score: m.scores.map(|s| s[0]),
            right_score: m.scores.map(|s| s[1]),
            winner_side: m.winner,
            next_round: m.next.map(|n| n.round),
            next_index: m.next.map(|n| n.index),
            next_slot: m.next.map(|n| n.slot),
            session_id: m.session_id.clone(),
            completed_at: m.completed_at,
        })
        .collect();

    (tournament, participants, matches)
}

fn from_rows(row: TournamentRow, participants: Vec<ParticipantRow>, matches: Vec<MatchRow>) -> Tournament {
    let mut participants: Vec<Participant> = participants
        .into_iter()
        .map(|p| Participant {
            id: p.participant_id,
            user_id: p.user_id,
            display_name: p.display_name,
            seed: p.seed,
            eliminated: p.eliminated,
            eliminated_round: p.eliminated_round,
            final_rank: p.final_rank,
            registered_at: p.registered_at,
        })
        .collect();
    participants.sort_by_key(|p| p.id);

    let mut matches: Vec<TournamentMatch> = matches
        .into_iter()
        .map(|m| TournamentMatch {
            id: m.id,
            round: m.round,
            index: m.match_index,
            position: BracketPosition {
                round: m.round,
                x: m.pos_x,
                y: m.pos_y,
            },
            slots: [m.left_participant, m.right_participant],
            status: m.status,
            scores: m.left_score.zip(m.right_score).map(|(l, r)| [l, r]),
            winner: m.winner_side,
            next: match (m.next_round, m.next_index, m.next_slot) {
                (Some(round), Some(index), Some(slot)) => Some(NextSlot { round, index, slot }),
                _ => None,
            },
            session_id: m.session_id,
            completed_at: m.completed_at,
        })
        .collect();
    matches.sort_by_key(|m| (m.round, m.index));

    Tournament {
        id: row.id,
        name: row.name,
        kind: row.kind,
        status: row.status,
        max_participants: row.max_participants,
        settings: row.settings,
        created_by: row.created_by,
        participants,
        matches,
        rounds: row.rounds,
        created_at: row.created_at,
        started_at: row.started_at,
        finished_at: row.finished_at,
    }
}

pub struct SupabaseTournamentStore {
    client: SupabaseClient,
}

impl SupabaseTournamentStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TournamentStore for SupabaseTournamentStore {
    async fn save(&self, tournament: &Tournament) -> Result<(), StoreError> {
        let (row, participants, matches) = to_rows(tournament);

        // Parent row first for the foreign keys
        self.client
            .upsert("tournaments", std::slice::from_ref(&row), "id")
            .await?;
        self.client
            .upsert("tournament_participants", &participants, "tournament_id,participant_id")
            .await?;
        self.client
            .upsert("tournament_matches", &matches, "id")
            .await?;

        debug!(
            tournament_id = %tournament.id,
            participants = participants.len(),
            matches = matches.len(),
            "Tournament saved"
        );
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Tournament>, StoreError> {
        let rows: Vec<TournamentRow> = self.client.get("tournaments", "select=*").await?;
        let participants: Vec<ParticipantRow> =
            self.client.get("tournament_participants", "select=*").await?;
        let matches: Vec<MatchRow> = self.client.get("tournament_matches", "select=*").await?;

        let mut participants_by: HashMap<Uuid, Vec<ParticipantRow>> = HashMap::new();
        for p in participants {
            participants_by.entry(p.tournament_id).or_default().push(p);
        }
        let mut matches_by: HashMap<Uuid, Vec<MatchRow>> = HashMap::new();
        for m in matches {
            matches_by.entry(m.tournament_id).or_default().push(m);
        }

        let tournaments: Vec<Tournament> = rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                from_rows(
                    row,
                    participants_by.remove(&id).unwrap_or_default(),
                    matches_by.remove(&id).unwrap_or_default(),
                )
            })
            .collect();

        let orphans = participants_by.len() + matches_by.len();
        if orphans > 0 {
            warn!(orphans, "Rows without a tournament were skipped");
        }

        Ok(tournaments)
    }
}
