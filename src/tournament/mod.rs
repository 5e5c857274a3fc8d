//! Single-elimination tournaments over match sessions

pub mod bracket;
pub mod model;
pub mod progression;
pub mod service;

pub use bracket::BracketView;
pub use model::{
    BracketPosition, MatchStatus, NextSlot, Participant, Tournament, TournamentError,
    TournamentKind, TournamentMatch, TournamentSettings, TournamentStatus, TournamentSummary,
};
pub use progression::ResultOutcome;
pub use service::{MatchTicket, NewTournament, Persisted, TournamentService};
