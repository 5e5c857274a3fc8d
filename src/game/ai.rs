//! Computer opponent. Only ever produces directional paddle commands.

use super::physics::{Ball, CourtConfig, Paddle, Side};

/// Tracks the ball while it approaches, drifts back to center otherwise
#[derive(Debug, Clone)]
pub struct AiController {
    side: Side,
    /// Ticks to wait after the ball changes horizontal direction
    reaction_ticks: u32,
    /// No movement while the paddle center is this close to the target
    dead_zone: f32,
    cooldown: u32,
    last_approaching: bool,
    last_direction: i8,
}

impl AiController {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            reaction_ticks: 6,
            dead_zone: 10.0,
            cooldown: 0,
            last_approaching: false,
            last_direction: 0,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Decide this tick's direction command
    pub fn decide(&mut self, ball: &Ball, paddle: &Paddle, court: &CourtConfig) -> i8 {
        let approaching = match self.side {
            Side::Left => ball.dx < 0.0,
            Side::Right => ball.dx > 0.0,
        };

        if approaching != self.last_approaching {
            self.last_approaching = approaching;
            self.cooldown = self.reaction_ticks;
        }
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return self.last_direction;
        }

        let target = if approaching { ball.y } else { court.height / 2.0 };
        let diff = target - paddle.center();
        let direction = if diff.abs() <= self.dead_zone {
            0
        } else if diff < 0.0 {
            -1
        } else {
            1
        };

        self.last_direction = direction;
        direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled(side: Side) -> AiController {
        let mut ai = AiController::new(side);
        ai.reaction_ticks = 0;
        ai
    }

    #[test]
    fn chases_an_approaching_ball() {
        let court = CourtConfig::default();
        let paddle = Paddle::new(Side::Right, &court);
        let mut ai = settled(Side::Right);

        let high = Ball { x: 600.0, y: 20.0, dx: 4.0, dy: 0.0, radius: 8.0 };
        assert_eq!(ai.decide(&high, &paddle, &court), -1);

        let low = Ball { y: 380.0, ..high };
        assert_eq!(ai.decide(&low, &paddle, &court), 1);
    }

    #[test]
    fn recenters_when_ball_moves_away() {
        let court = CourtConfig::default();
        let mut paddle = Paddle::new(Side::Right, &court);
        paddle.y = 0.0;
        let mut ai = settled(Side::Right);

        let leaving = Ball { x: 600.0, y: 20.0, dx: -4.0, dy: 0.0, radius: 8.0 };
        assert_eq!(ai.decide(&leaving, &paddle, &court), 1);

        paddle.y = court.paddle_start_y();
        assert_eq!(ai.decide(&leaving, &paddle, &court), 0);
    }

    #[test]
    fn holds_previous_command_during_reaction_delay() {
        let court = CourtConfig::default();
        let paddle = Paddle::new(Side::Left, &court);
        let mut ai = AiController::new(Side::Left);

        let approaching = Ball { x: 200.0, y: 20.0, dx: -4.0, dy: 0.0, radius: 8.0 };
        let commands: Vec<i8> = (0..8).map(|_| ai.decide(&approaching, &paddle, &court)).collect();
        assert!(commands[..6].iter().all(|&c| c == 0));
        assert_eq!(commands[6], -1);
    }
}
