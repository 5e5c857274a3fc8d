//! Single-elimination bracket generation and the bracket projection

use serde::Serialize;
use uuid::Uuid;

use crate::game::physics::Side;

use super::model::{
    BracketPosition, MatchStatus, NextSlot, Participant, Tournament, TournamentError,
    TournamentMatch, TournamentStatus,
};

/// Standard seeding order for a power-of-two bracket: adjacent entries meet
/// in round 1 and the top two seeds can only meet in the final.
///
/// `seeding_order(8) == [1, 8, 4, 5, 2, 7, 3, 6]`
pub fn seeding_order(size: u32) -> Vec<u32> {
    let mut order = vec![1];
    while (order.len() as u32) < size {
        let next_size = order.len() as u32 * 2;
        order = order
            .into_iter()
            .flat_map(|seed| [seed, next_size + 1 - seed])
            .collect();
    }
    order
}

/// ceil(log2(n)) for n >= 2
pub fn round_count(n: usize) -> u32 {
    n.next_power_of_two().trailing_zeros()
}

fn position(round: u32, index: u32) -> BracketPosition {
    BracketPosition {
        round,
        x: round - 1,
        y: (2 * index + 1) << (round - 1),
    }
}

fn next_slot(round: u32, index: u32, rounds: u32) -> Option<NextSlot> {
    (round < rounds).then(|| NextSlot {
        round: round + 1,
        index: index / 2,
        slot: if index % 2 == 0 { Side::Left } else { Side::Right },
    })
}

/// Generated topology
#[derive(Debug, Clone)]
pub struct Bracket {
    pub rounds: u32,
    pub matches: Vec<TournamentMatch>,
}

/// Build the full bracket from participants carrying final seeds 1..N.
///
/// Byes produce no match: the seeded participant is written straight into
/// their round-2 slot. Every later-round match exists from the start with
/// empty slots, so exactly N-1 matches are generated.
pub fn generate(participants: &[Participant]) -> Result<Bracket, TournamentError> {
    let n = participants.len();
    if n < 2 {
        return Err(TournamentError::Validation(
            "At least two participants are required".into(),
        ));
    }

    let mut by_seed: Vec<Option<u32>> = vec![None; n];
    for p in participants {
        let seed = p
            .seed
            .filter(|s| (1..=n as u32).contains(s))
            .ok_or_else(|| TournamentError::Validation(format!("Participant {} has no valid seed", p.id)))?;
        let cell = &mut by_seed[seed as usize - 1];
        if cell.is_some() {
            return Err(TournamentError::Validation(format!("Seed {seed} assigned twice")));
        }
        *cell = Some(p.id);
    }
    let participant_at = |seed: u32| by_seed.get(seed as usize - 1).copied().flatten();

    let size = n.next_power_of_two() as u32;
    let rounds = round_count(n);

    let mut matches: Vec<TournamentMatch> = Vec::with_capacity(n - 1);
    let new_match = |round: u32, index: u32, slots: [Option<u32>; 2]| TournamentMatch {
        id: Uuid::new_v4(),
        round,
        index,
        position: position(round, index),
        slots,
        status: if slots.iter().all(Option::is_some) {
            MatchStatus::Ready
        } else {
            MatchStatus::Pending
        },
        scores: None,
        winner: None,
        next: next_slot(round, index, rounds),
        session_id: None,
        completed_at: None,
    };

    // Round 2 slots pre-filled by byes
    let mut bye_slots: Vec<[Option<u32>; 2]> = vec![[None, None]; (size / 4) as usize];

    for (index, pair) in seeding_order(size).chunks(2).enumerate() {
        let index = index as u32;
        match (participant_at(pair[0]), participant_at(pair[1])) {
            (Some(left), Some(right)) => matches.push(new_match(1, index, [Some(left), Some(right)])),
            (Some(advancing), None) | (None, Some(advancing)) => {
                let slot = &mut bye_slots[(index / 2) as usize][(index % 2) as usize];
                *slot = Some(advancing);
            }
            (None, None) => {
                return Err(TournamentError::Validation("Bracket pairing has two byes".into()));
            }
        }
    }

    for round in 2..=rounds {
        for index in 0..(size >> round) {
            let slots = if round == 2 {
                bye_slots[index as usize]
            } else {
                [None, None]
            };
            matches.push(new_match(round, index, slots));
        }
    }

    Ok(Bracket { rounds, matches })
}

/// Assign final seeds 1..N: requested seeds first (ascending), then the rest
/// in registration order.
pub fn normalize_seeds(participants: &mut [Participant]) {
    let mut order: Vec<usize> = (0..participants.len()).collect();
    order.sort_by_key(|&i| {
        let p = &participants[i];
        (p.seed.is_none(), p.seed.unwrap_or(u32::MAX), p.registered_at, p.id)
    });
    for (rank, i) in order.into_iter().enumerate() {
        participants[i].seed = Some(rank as u32 + 1);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketEntrant {
    pub participant_id: u32,
    pub display_name: String,
    pub seed: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketNode {
    pub match_id: Uuid,
    pub position: BracketPosition,
    pub index: u32,
    pub left: Option<BracketEntrant>,
    pub right: Option<BracketEntrant>,
    pub status: MatchStatus,
    pub scores: Option<[u32; 2]>,
    pub winner: Option<Side>,
    pub next: Option<NextSlot>,
    pub session_id: Option<String>,
}

/// Read-only view for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketView {
    pub tournament_id: Uuid,
    pub status: TournamentStatus,
    pub rounds: u32,
    pub nodes: Vec<BracketNode>,
}

pub fn project(tournament: &Tournament) -> BracketView {
    let entrant = |id: Option<u32>| {
        id.and_then(|id| tournament.participant(id)).map(|p| BracketEntrant {
            participant_id: p.id,
            display_name: p.display_name.clone(),
            seed: p.seed,
        })
    };

    BracketView {
        tournament_id: tournament.id,
        status: tournament.status,
        rounds: tournament.rounds,
        nodes: tournament
            .matches
            .iter()
            .map(|m| BracketNode {
                match_id: m.id,
                position: m.position,
                index: m.index,
                left: entrant(m.slots[0]),
                right: entrant(m.slots[1]),
                status: m.status,
                scores: m.scores,
                winner: m.winner,
                next: m.next,
                session_id: m.session_id.clone(),
            })
            .collect(),
    }
}
