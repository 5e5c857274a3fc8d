//! Match progression: starting the bracket, recording results, advancing
//! winners and finishing the tournament.
//!
//! Every function here mutates one `Tournament` and must run under that
//! tournament's lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::physics::Side;

use super::bracket;
use super::model::{
    MatchStatus, RankPolicy, Tournament, TournamentError, TournamentMatch, TournamentStatus,
};

/// What a recorded result changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultOutcome {
    pub match_id: Uuid,
    pub winner: u32,
    pub loser: u32,
    /// Next match that became startable
    pub next_ready: Option<Uuid>,
    pub tournament_finished: bool,
    /// Room to close, if the match had one
    pub session_id: Option<String>,
}

/// Freeze seeds, generate the bracket and open round 1
pub fn start(tournament: &mut Tournament, now: DateTime<Utc>) -> Result<(), TournamentError> {
    if tournament.status != TournamentStatus::Registration {
        return Err(TournamentError::InvalidState(
            "Tournament has already started".into(),
        ));
    }

    let mut participants = tournament.participants.clone();
    bracket::normalize_seeds(&mut participants);
    let generated = bracket::generate(&participants)?;

    tournament.participants = participants;
    tournament.matches = generated.matches;
    tournament.rounds = generated.rounds;
    tournament.status = TournamentStatus::InProgress;
    tournament.started_at = Some(now);

    info!(
        tournament_id = %tournament.id,
        participants = tournament.participants.len(),
        rounds = tournament.rounds,
        matches = tournament.matches.len(),
        "Tournament started"
    );
    Ok(())
}

/// Link a ready match to its room
pub fn mark_in_progress(
    tournament: &mut Tournament,
    match_id: Uuid,
    session_id: &str,
) -> Result<(), TournamentError> {
    let idx = tournament.match_index(match_id)?;
    let m = &mut tournament.matches[idx];
    match m.status {
        MatchStatus::Ready => {
            m.status = MatchStatus::InProgress;
            m.session_id = Some(session_id.to_string());
            Ok(())
        }
        MatchStatus::InProgress if m.session_id.as_deref() == Some(session_id) => Ok(()),
        MatchStatus::InProgress => Err(TournamentError::ConcurrencyConflict(format!(
            "Match {match_id} is already being played"
        ))),
        MatchStatus::Pending => Err(TournamentError::InvalidState(format!(
            "Match {match_id} is waiting for its participants"
        ))),
        MatchStatus::Completed => Err(TournamentError::InvalidState(format!(
            "Match {match_id} is already completed"
        ))),
    }
}

/// Record a finished match and advance its winner.
///
/// A second report for the same match is a `ConcurrencyConflict` and leaves
/// the tournament untouched.
pub fn record_result(
    tournament: &mut Tournament,
    match_id: Uuid,
    left_score: u32,
    right_score: u32,
    now: DateTime<Utc>,
) -> Result<ResultOutcome, TournamentError> {
    let idx = tournament.match_index(match_id)?;

    // Validate everything before the first write
    let m = &tournament.matches[idx];
    match m.status {
        MatchStatus::Completed => {
            warn!(
                tournament_id = %tournament.id,
                match_id = %match_id,
                "Duplicate result rejected"
            );
            return Err(TournamentError::ConcurrencyConflict(format!(
                "Match {match_id} already has a result"
            )));
        }
        MatchStatus::Pending => {
            return Err(TournamentError::InvalidState(format!(
                "Match {match_id} is waiting for its participants"
            )));
        }
        MatchStatus::Ready | MatchStatus::InProgress => {}
    }
    if tournament.status != TournamentStatus::InProgress {
        return Err(TournamentError::InvalidState("Tournament is not running".into()));
    }
    if left_score == right_score {
        return Err(TournamentError::Validation("A match cannot end in a tie".into()));
    }

    let winner_side = if left_score > right_score { Side::Left } else { Side::Right };
    let (Some(winner), Some(loser)) = (m.slot(winner_side), m.slot(winner_side.opposite())) else {
        return Err(TournamentError::InvalidState(format!(
            "Match {match_id} is missing a participant"
        )));
    };

    let next_idx = match m.next {
        Some(next) => {
            let next_idx = tournament.match_at(next.round, next.index).ok_or_else(|| {
                TournamentError::InvalidState(format!("Successor of match {match_id} is missing"))
            })?;
            if tournament.matches[next_idx].slot(next.slot).is_some() {
                return Err(TournamentError::ConcurrencyConflict(format!(
                    "Next slot for match {match_id} is already filled"
                )));
            }
            Some((next_idx, next.slot))
        }
        None => None,
    };
    let round = m.round;

    let m = &mut tournament.matches[idx];
    m.status = MatchStatus::Completed;
    m.scores = Some([left_score, right_score]);
    m.winner = Some(winner_side);
    m.completed_at = Some(now);
    let session_id = m.session_id.clone();

    if let Some(p) = tournament.participant_mut(loser) {
        p.eliminated = true;
        p.eliminated_round = Some(round);
    }

    let mut next_ready = None;
    if let Some((next_idx, slot)) = next_idx {
        let next = &mut tournament.matches[next_idx];
        *next.slot_mut(slot) = Some(winner);
        if next.is_filled() && next.status == MatchStatus::Pending {
            next.status = MatchStatus::Ready;
            next_ready = Some(next.id);
        }
    } else {
        finish(tournament, winner, loser, now);
    }

    info!(
        tournament_id = %tournament.id,
        match_id = %match_id,
        round,
        winner,
        left_score,
        right_score,
        "Match result recorded"
    );

    Ok(ResultOutcome {
        match_id,
        winner,
        loser,
        next_ready,
        tournament_finished: tournament.status == TournamentStatus::Finished,
        session_id,
    })
}

fn finish(tournament: &mut Tournament, champion: u32, runner_up: u32, now: DateTime<Utc>) {
    tournament.status = TournamentStatus::Finished;
    tournament.finished_at = Some(now);

    let rounds = tournament.rounds;
    let policy = tournament.settings.rank_policy;
    for p in tournament.participants.iter_mut() {
        p.final_rank = if p.id == champion {
            Some(1)
        } else if p.id == runner_up {
            Some(2)
        } else {
            match (policy, p.eliminated_round) {
                (RankPolicy::ByEliminationRound, Some(round)) => Some(elimination_rank(rounds, round)),
                _ => None,
            }
        };
    }

    info!(tournament_id = %tournament.id, champion, "Tournament finished");
}

/// Shared rank for losers of `round`: semifinal losers 3, quarterfinal losers 5, ...
pub fn elimination_rank(rounds: u32, round: u32) -> u32 {
    (1u32 << rounds.saturating_sub(round)) + 1
}

/// Participants seated in a match, `[left, right]`
pub fn seated_users(tournament: &Tournament, m: &TournamentMatch) -> Option<[Uuid; 2]> {
    let user = |id: Option<u32>| id.and_then(|id| tournament.participant(id)).map(|p| p.user_id);
    Some([user(m.slots[0])?, user(m.slots[1])?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::bracket::tests::seeded;
    use crate::tournament::model::{TournamentKind, TournamentSettings};

    fn started(n: u32, policy: RankPolicy) -> Tournament {
        let settings = TournamentSettings {
            rank_policy: policy,
            ..TournamentSettings::default()
        };
        let mut t = Tournament::new(
            "Cup",
            32,
            TournamentKind::SingleElimination,
            settings,
            Uuid::new_v4(),
            Utc::now(),
        )
        .unwrap();
        t.participants = seeded(n);
        start(&mut t, Utc::now()).unwrap();
        t
    }

    fn ready_matches(t: &Tournament) -> Vec<Uuid> {
        t.matches
            .iter()
            .filter(|m| m.status == MatchStatus::Ready)
            .map(|m| m.id)
            .collect()
    }

    /// Left (better seed) wins every match
    fn play_out(t: &mut Tournament) {
        while t.status == TournamentStatus::InProgress {
            let ready = ready_matches(t);
            assert!(!ready.is_empty(), "bracket stalled");
            for id in ready {
                record_result(t, id, 11, 3, Utc::now()).unwrap();
            }
        }
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut t = started(4, RankPolicy::FinalistsOnly);
        assert!(matches!(start(&mut t, Utc::now()), Err(TournamentError::InvalidState(_))));
    }

    #[test]
    fn start_needs_two_participants() {
        let mut t = Tournament::new(
            "Cup",
            8,
            TournamentKind::SingleElimination,
            TournamentSettings::default(),
            Uuid::new_v4(),
            Utc::now(),
        )
        .unwrap();
        t.participants = seeded(1);
        assert!(start(&mut t, Utc::now()).is_err());
        assert_eq!(t.status, TournamentStatus::Registration);
    }

    #[test]
    fn winner_fills_exactly_one_next_slot() {
        let mut t = started(4, RankPolicy::FinalistsOnly);
        let first = ready_matches(&t)[0];
        let next = t.matches[t.match_index(first).unwrap()].next.unwrap();

        let out = record_result(&mut t, first, 5, 11, Utc::now()).unwrap();
        // seed 4 upsets seed 1
        assert_eq!((out.winner, out.loser), (4, 1));
        assert_eq!(out.next_ready, None);

        let filled: Vec<&TournamentMatch> = t
            .matches
            .iter()
            .filter(|m| m.round == 2 && m.slots.contains(&Some(4)))
            .collect();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].slot(next.slot), Some(4));
        assert!(t.participant(1).unwrap().eliminated);
    }

    #[test]
    fn duplicate_report_is_a_conflict() {
        let mut t = started(4, RankPolicy::FinalistsOnly);
        let id = ready_matches(&t)[0];
        record_result(&mut t, id, 11, 2, Utc::now()).unwrap();
        let snapshot = t.clone();

        let err = record_result(&mut t, id, 2, 11, Utc::now()).unwrap_err();
        assert!(matches!(err, TournamentError::ConcurrencyConflict(_)));
        assert_eq!(t, snapshot);
    }

    #[test]
    fn ties_and_pending_matches_are_rejected() {
        let mut t = started(4, RankPolicy::FinalistsOnly);
        let ready = ready_matches(&t)[0];
        assert!(matches!(
            record_result(&mut t, ready, 7, 7, Utc::now()),
            Err(TournamentError::Validation(_))
        ));

        let final_id = t.matches.iter().find(|m| m.next.is_none()).unwrap().id;
        assert!(matches!(
            record_result(&mut t, final_id, 11, 0, Utc::now()),
            Err(TournamentError::InvalidState(_))
        ));
        let missing = Uuid::new_v4();
        assert_eq!(
            record_result(&mut t, missing, 11, 0, Utc::now()),
            Err(TournamentError::MatchNotFound(missing))
        );
    }

    #[test]
    fn semifinal_winners_make_final_ready() {
        let mut t = started(4, RankPolicy::FinalistsOnly);
        let semis = ready_matches(&t);
        assert_eq!(semis.len(), 2);

        let first = record_result(&mut t, semis[0], 11, 1, Utc::now()).unwrap();
        assert_eq!(first.next_ready, None);
        let second = record_result(&mut t, semis[1], 11, 1, Utc::now()).unwrap();
        let final_id = second.next_ready.unwrap();

        let final_match = &t.matches[t.match_index(final_id).unwrap()];
        assert_eq!(final_match.status, MatchStatus::Ready);
        assert_eq!(final_match.slots, [Some(1), Some(2)]);
    }

    #[test]
    fn final_finishes_tournament_with_finalist_ranks() {
        let mut t = started(5, RankPolicy::FinalistsOnly);
        play_out(&mut t);

        assert_eq!(t.status, TournamentStatus::Finished);
        assert!(t.finished_at.is_some());
        assert_eq!(t.participant(1).unwrap().final_rank, Some(1));
        assert_eq!(t.participant(2).unwrap().final_rank, Some(2));
        assert!(t.participants.iter().filter(|p| p.final_rank.is_none()).count() == 3);
        assert!(t.matches.iter().all(|m| m.status == MatchStatus::Completed));
    }

    #[test]
    fn elimination_round_policy_shares_ranks() {
        let mut t = started(8, RankPolicy::ByEliminationRound);
        play_out(&mut t);

        let rank = |id: u32| t.participant(id).unwrap().final_rank;
        assert_eq!(rank(1), Some(1));
        assert_eq!(rank(2), Some(2));
        // semifinal losers
        assert_eq!(rank(3), Some(3));
        assert_eq!(rank(4), Some(3));
        // quarterfinal losers
        for id in 5..=8 {
            assert_eq!(rank(id), Some(5));
        }
    }

    #[test]
    fn in_progress_link_is_idempotent_per_room() {
        let mut t = started(2, RankPolicy::FinalistsOnly);
        let id = ready_matches(&t)[0];

        mark_in_progress(&mut t, id, "match-a").unwrap();
        mark_in_progress(&mut t, id, "match-a").unwrap();
        assert!(matches!(
            mark_in_progress(&mut t, id, "match-b"),
            Err(TournamentError::ConcurrencyConflict(_))
        ));

        let out = record_result(&mut t, id, 3, 11, Utc::now()).unwrap();
        assert_eq!(out.session_id.as_deref(), Some("match-a"));
        assert!(out.tournament_finished);
        assert!(matches!(mark_in_progress(&mut t, id, "match-a"), Err(TournamentError::InvalidState(_))));
    }

    #[test]
    fn seated_users_follow_slots() {
        let t = started(2, RankPolicy::FinalistsOnly);
        let m = &t.matches[0];
        let users = seated_users(&t, m).unwrap();
        assert_eq!(users[0], t.participant(1).unwrap().user_id);
        assert_eq!(users[1], t.participant(2).unwrap().user_id);
    }
}
