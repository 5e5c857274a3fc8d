//! Score keeping and win detection

use serde::{Deserialize, Serialize};

use super::physics::{PhysicsEvent, Side};

/// Default first-to target
pub const DEFAULT_WIN_SCORE: u32 = 11;

/// Terminal result of a match. Produced exactly once per match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFinished {
    pub winner_side: Side,
    pub left_score: u32,
    pub right_score: u32,
}

/// Running score for one match. First side to `win_score` wins, no margin rule.
#[derive(Debug, Clone)]
pub struct ScoreBoard {
    left: u32,
    right: u32,
    win_score: u32,
    finished: bool,
}

impl ScoreBoard {
    pub fn new(win_score: u32) -> Self {
        Self {
            left: 0,
            right: 0,
            win_score: win_score.max(1),
            finished: false,
        }
    }

    pub fn left(&self) -> u32 {
        self.left
    }

    pub fn right(&self) -> u32 {
        self.right
    }

    pub fn win_score(&self) -> u32 {
        self.win_score
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Apply the goals in `events`. Returns the finish result the first time
    /// a side reaches the target; goals after that are ignored.
    pub fn record(&mut self, events: &[PhysicsEvent]) -> Option<MatchFinished> {
        for event in events {
            if self.finished {
                break;
            }
            let PhysicsEvent::Goal { scorer } = event else {
                continue;
            };

            let score = match scorer {
                Side::Left => &mut self.left,
                Side::Right => &mut self.right,
            };
            *score += 1;

            if *score >= self.win_score {
                self.finished = true;
                return Some(MatchFinished {
                    winner_side: *scorer,
                    left_score: self.left,
                    right_score: self.right,
                });
            }
        }
        None
    }

    /// Zero both scores (explicit reset only)
    pub fn reset(&mut self) {
        self.left = 0;
        self.right = 0;
        self.finished = false;
    }
}
