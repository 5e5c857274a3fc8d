//! Tournament service - registry of live tournaments, one lock per tournament

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::{MatchOutcome, TournamentLink};
use crate::rooms::SessionManager;
use crate::store::{RetryPolicy, StoreError, TournamentStore};

use super::bracket::{self, BracketView};
use super::model::{
    MatchStatus, Participant, Tournament, TournamentError, TournamentKind, TournamentSettings,
    TournamentSummary,
};
use super::progression::{self, ResultOutcome};

/// Create request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTournament {
    pub name: String,
    pub max_participants: u32,
    #[serde(default, rename = "type")]
    pub kind: TournamentKind,
    #[serde(default)]
    pub settings: TournamentSettings,
}

/// Mutation result plus whether it reached the store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Persisted<T> {
    pub data: T,
    pub durable: bool,
}

/// Where the two participants of a match should connect
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchTicket {
    pub tournament_id: Uuid,
    pub match_id: Uuid,
    pub room_id: String,
}

pub fn room_id_for(match_id: Uuid) -> String {
    format!("match-{}", match_id.simple())
}

/// One live tournament. Mutations hold `state`; store writes are ordered by
/// revision so an older snapshot never replaces a newer one.
struct Entry {
    state: Mutex<Tournament>,
    /// Bumped under `state` on every mutation
    revision: AtomicU64,
    /// Highest revision the store has accepted
    persisted: Mutex<u64>,
}

impl Entry {
    fn new(tournament: Tournament) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(tournament),
            revision: AtomicU64::new(0),
            persisted: Mutex::new(0),
        })
    }

    /// Snapshot a just-mutated tournament. Call with `state` held.
    fn stage(self: &Arc<Self>, tournament: &Tournament) -> PendingWrite {
        PendingWrite {
            entry: self.clone(),
            revision: self.revision.fetch_add(1, Ordering::SeqCst) + 1,
            snapshot: tournament.clone(),
        }
    }
}

/// A committed mutation waiting for the store
struct PendingWrite {
    entry: Arc<Entry>,
    revision: u64,
    snapshot: Tournament,
}

pub struct TournamentService {
    tournaments: DashMap<Uuid, Arc<Entry>>,
    store: Arc<dyn TournamentStore>,
    retry: RetryPolicy,
    rooms: Arc<SessionManager>,
}

impl TournamentService {
    pub fn new(store: Arc<dyn TournamentStore>, retry: RetryPolicy, rooms: Arc<SessionManager>) -> Self {
        Self {
            tournaments: DashMap::new(),
            store,
            retry,
            rooms,
        }
    }

    fn entry(&self, id: Uuid) -> Result<Arc<Entry>, TournamentError> {
        self.tournaments
            .get(&id)
            .map(|t| t.clone())
            .ok_or(TournamentError::NotFound(id))
    }

    /// Write through with retries. In-memory state stays authoritative if
    /// this fails.
    async fn persist(&self, tournament: &Tournament) -> bool {
        match self
            .retry
            .run("save_tournament", || self.store.save(tournament))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(tournament_id = %tournament.id, error = %e, "Tournament not persisted");
                false
            }
        }
    }

    /// Persist a staged snapshot outside the tournament lock. A write already
    /// covered by a newer accepted revision counts as durable.
    async fn commit(&self, pending: &PendingWrite) -> bool {
        let mut persisted = pending.entry.persisted.lock().await;
        if *persisted >= pending.revision {
            return true;
        }
        let durable = self.persist(&pending.snapshot).await;
        if durable {
            *persisted = pending.revision;
        }
        durable
    }

    pub async fn create(&self, user_id: Uuid, req: NewTournament) -> Result<Persisted<Tournament>, TournamentError> {
        let tournament = Tournament::new(
            &req.name,
            req.max_participants,
            req.kind,
            req.settings,
            user_id,
            Utc::now(),
        )?;
        let id = tournament.id;
        info!(tournament_id = %id, name = %tournament.name, max = tournament.max_participants, "Tournament created");

        let entry = Entry::new(tournament);
        let pending = {
            let guard = entry.state.lock().await;
            self.tournaments.insert(id, entry.clone());
            entry.stage(&guard)
        };

        let durable = self.commit(&pending).await;
        Ok(Persisted {
            data: pending.snapshot,
            durable,
        })
    }

    pub async fn register(
        &self,
        id: Uuid,
        user_id: Uuid,
        display_name: &str,
        seed: Option<u32>,
    ) -> Result<Persisted<Participant>, TournamentError> {
        let entry = self.entry(id)?;
        let (participant, pending) = {
            let mut tournament = entry.state.lock().await;
            let participant = tournament
                .register(user_id, display_name, seed, Utc::now())?
                .clone();
            (participant, entry.stage(&tournament))
        };

        info!(
            tournament_id = %id,
            user_id = %user_id,
            participant_id = participant.id,
            "Participant registered"
        );
        let durable = self.commit(&pending).await;
        Ok(Persisted {
            data: participant,
            durable,
        })
    }

    /// Generate the bracket. Only the creator may start.
    pub async fn start(&self, id: Uuid, user_id: Uuid) -> Result<Persisted<Tournament>, TournamentError> {
        let entry = self.entry(id)?;
        let pending = {
            let mut tournament = entry.state.lock().await;
            if tournament.created_by != user_id {
                return Err(TournamentError::Forbidden(
                    "only the creator can start the tournament".into(),
                ));
            }
            progression::start(&mut tournament, Utc::now())?;
            entry.stage(&tournament)
        };

        let durable = self.commit(&pending).await;
        Ok(Persisted {
            data: pending.snapshot,
            durable,
        })
    }

    /// Open (or return) the reserved room for a ready match
    pub async fn open_match_session(
        &self,
        id: Uuid,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<Persisted<MatchTicket>, TournamentError> {
        let entry = self.entry(id)?;
        let (room_id, pending) = {
            let mut tournament = entry.state.lock().await;
            let idx = tournament.match_index(match_id)?;
            let m = &tournament.matches[idx];

            match m.status {
                MatchStatus::Ready | MatchStatus::InProgress => {}
                MatchStatus::Pending => {
                    return Err(TournamentError::InvalidState(format!(
                        "Match {match_id} is waiting for its participants"
                    )))
                }
                MatchStatus::Completed => {
                    return Err(TournamentError::InvalidState(format!(
                        "Match {match_id} is already completed"
                    )))
                }
            }
            let players = progression::seated_users(&tournament, m).ok_or_else(|| {
                TournamentError::InvalidState(format!("Match {match_id} is missing a participant"))
            })?;
            if !players.contains(&user_id) && tournament.created_by != user_id {
                return Err(TournamentError::Forbidden("not a participant of this match".into()));
            }

            let was_ready = m.status == MatchStatus::Ready;
            let room_id = m.session_id.clone().unwrap_or_else(|| room_id_for(match_id));
            let settings = tournament.settings.session_settings(self.rooms.defaults());
            let link = TournamentLink {
                tournament_id: id,
                match_id,
            };

            self.rooms
                .open_reserved(&room_id, players, settings, link)
                .map_err(|e| TournamentError::InvalidState(e.to_string()))?;
            progression::mark_in_progress(&mut tournament, match_id, &room_id)?;

            let pending = was_ready.then(|| entry.stage(&tournament));
            (room_id, pending)
        };

        let durable = match &pending {
            Some(pending) => self.commit(pending).await,
            None => true,
        };

        Ok(Persisted {
            data: MatchTicket {
                tournament_id: id,
                match_id,
                room_id,
            },
            durable,
        })
    }

    /// Manual result report by a participant of the match or the creator
    pub async fn report(
        &self,
        id: Uuid,
        match_id: Uuid,
        user_id: Uuid,
        left_score: u32,
        right_score: u32,
    ) -> Result<Persisted<ResultOutcome>, TournamentError> {
        {
            let entry = self.entry(id)?;
            let tournament = entry.state.lock().await;
            let idx = tournament.match_index(match_id)?;
            let seated = progression::seated_users(&tournament, &tournament.matches[idx]);
            let allowed = tournament.created_by == user_id
                || seated.is_some_and(|players| players.contains(&user_id));
            if !allowed {
                return Err(TournamentError::Forbidden("not a participant of this match".into()));
            }
        }
        self.apply_result(id, match_id, left_score, right_score).await
    }

    /// Record a result under the tournament lock, close the match's room,
    /// then persist
    async fn apply_result(
        &self,
        id: Uuid,
        match_id: Uuid,
        left_score: u32,
        right_score: u32,
    ) -> Result<Persisted<ResultOutcome>, TournamentError> {
        let entry = self.entry(id)?;
        let (outcome, pending) = {
            let mut tournament = entry.state.lock().await;
            let outcome =
                progression::record_result(&mut tournament, match_id, left_score, right_score, Utc::now())?;
            (outcome, entry.stage(&tournament))
        };

        if let Some(room_id) = &outcome.session_id {
            self.rooms.destroy(room_id, "match_completed");
        }

        let durable = self.commit(&pending).await;
        Ok(Persisted {
            data: outcome,
            durable,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Tournament, TournamentError> {
        let entry = self.entry(id)?;
        let tournament = entry.state.lock().await;
        Ok(tournament.clone())
    }

    /// Newest first
    pub async fn list(&self) -> Vec<TournamentSummary> {
        let entries: Vec<Arc<Entry>> = self.tournaments.iter().map(|e| e.value().clone()).collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(entry.state.lock().await.summary());
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub async fn bracket(&self, id: Uuid) -> Result<BracketView, TournamentError> {
        let entry = self.entry(id)?;
        let tournament = entry.state.lock().await;
        Ok(bracket::project(&tournament))
    }

    pub fn len(&self) -> usize {
        self.tournaments.len()
    }

    /// Reload every persisted tournament, retrying like writes do. Returns
    /// how many were loaded.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let tournaments = self
            .retry
            .run("load_tournaments", || self.store.load_all())
            .await?;
        let count = tournaments.len();
        for tournament in tournaments {
            self.tournaments
                .entry(tournament.id)
                .or_insert_with(|| Entry::new(tournament));
        }
        info!(count, "Tournaments restored");
        Ok(count)
    }

    /// Feed results reported by tournament rooms into progression. Each
    /// result runs on its own task so a slow store write for one tournament
    /// does not hold back the others.
    pub async fn run_outcomes(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<MatchOutcome>) {
        while let Some(outcome) = rx.recv().await {
            let service = self.clone();
            tokio::spawn(async move { service.apply_outcome(outcome).await });
        }
    }

    async fn apply_outcome(&self, outcome: MatchOutcome) {
        let link = outcome.link;
        let result = self
            .apply_result(
                link.tournament_id,
                link.match_id,
                outcome.result.left_score,
                outcome.result.right_score,
            )
            .await;

        match result {
            Ok(ack) => info!(
                tournament_id = %link.tournament_id,
                match_id = %link.match_id,
                durable = ack.durable,
                finished = ack.data.tournament_finished,
                "Room result applied"
            ),
            Err(e) => {
                warn!(
                    tournament_id = %link.tournament_id,
                    match_id = %link.match_id,
                    error = %e,
                    "Room result rejected"
                );
                self.rooms.destroy(&outcome.room_id, "match_completed");
            }
        }
    }
}
