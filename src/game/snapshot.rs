//! Snapshot building for network transmission

use crate::ws::protocol::{BallState, PaddleState, ServerMsg};

use super::physics::{Ball, Paddle};
use super::score::ScoreBoard;

/// Decides when to emit a `game_state_update` and builds it
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        let snapshot_interval = snapshot_interval.max(1);
        Self {
            ticks_since_snapshot: snapshot_interval - 1,
            snapshot_interval,
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for scoring and state changes)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    pub fn build(
        &self,
        tick: u64,
        ball: &Ball,
        left: &Paddle,
        right: &Paddle,
        score: &ScoreBoard,
    ) -> ServerMsg {
        ServerMsg::GameStateUpdate {
            tick,
            ball: BallState {
                x: ball.x,
                y: ball.y,
                dx: ball.dx,
                dy: ball.dy,
            },
            left_paddle: PaddleState { y: left.y },
            right_paddle: PaddleState { y: right.y },
            left_score: score.left(),
            right_score: score.right(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_of_one_sends_every_tick() {
        let mut builder = SnapshotBuilder::new(1);
        assert!((0..5).all(|_| builder.should_send()));
    }

    #[test]
    fn sparse_interval_can_be_forced() {
        let mut builder = SnapshotBuilder::new(3);
        let sent: Vec<bool> = (0..6).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![true, false, false, true, false, false]);

        builder.force_next();
        assert!(builder.should_send());
    }
}
