//! Ball and paddle physics

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which end of the court a paddle defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Court geometry and ball tuning. Velocities are in court units per tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourtConfig {
    pub width: f32,
    pub height: f32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    /// Gap between a court edge and the back of its paddle
    pub paddle_margin: f32,
    pub paddle_speed: f32,
    pub ball_radius: f32,
    /// Speed of a freshly served ball
    pub ball_speed: f32,
    /// Applied to ball speed on every paddle hit
    pub speed_multiplier: f32,
    pub max_ball_speed: f32,
    /// Deflection at the very tip of a paddle, radians
    pub max_bounce_angle: f32,
    /// Widest serve angle off the horizontal, radians
    pub max_serve_angle: f32,
    /// Tolerance on the paddle span when testing a hit
    pub hit_epsilon: f32,
}

impl Default for CourtConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 400.0,
            paddle_width: 10.0,
            paddle_height: 80.0,
            paddle_margin: 20.0,
            paddle_speed: 6.0,
            ball_radius: 8.0,
            ball_speed: 5.0,
            speed_multiplier: 1.05,
            max_ball_speed: 14.0,
            max_bounce_angle: std::f32::consts::FRAC_PI_3,
            max_serve_angle: std::f32::consts::FRAC_PI_4,
            hit_epsilon: 1.0,
        }
    }
}

impl CourtConfig {
    /// x coordinate of the face a ball strikes on the given paddle
    pub fn paddle_face_x(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.paddle_margin + self.paddle_width,
            Side::Right => self.width - self.paddle_margin - self.paddle_width,
        }
    }

    /// Highest legal paddle y (paddle y is its top edge)
    pub fn paddle_max_y(&self) -> f32 {
        (self.height - self.paddle_height).max(0.0)
    }

    pub fn paddle_start_y(&self) -> f32 {
        self.paddle_max_y() / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub radius: f32,
}

impl Ball {
    pub fn speed(&self) -> f32 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.dx.is_finite() && self.dy.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paddle {
    pub side: Side,
    /// Top edge
    pub y: f32,
    pub height: f32,
    /// Commanded direction: -1 up, 0 hold, 1 down
    pub direction: i8,
    /// Absolute target, takes precedence over `direction` while set
    pub target_y: Option<f32>,
}

impl Paddle {
    pub fn new(side: Side, court: &CourtConfig) -> Self {
        Self {
            side,
            y: court.paddle_start_y(),
            height: court.paddle_height,
            direction: 0,
            target_y: None,
        }
    }

    pub fn center(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wall {
    Top,
    Bottom,
}

/// Collision events produced by one physics step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PhysicsEvent {
    WallBounce { wall: Wall },
    PaddleHit { side: Side },
    /// Ball went past the paddle on the far side; `scorer` gets the point
    Goal { scorer: Side },
}

/// Output of a physics step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub ball: Ball,
    pub events: Vec<PhysicsEvent>,
}

/// Physics system for advancing the ball and paddles
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Place a new ball at court center heading in a random direction
    pub fn serve<R: Rng + ?Sized>(court: &CourtConfig, rng: &mut R) -> Ball {
        let angle = if court.max_serve_angle > 0.0 {
            rng.gen_range(-court.max_serve_angle..=court.max_serve_angle)
        } else {
            0.0
        };
        let dir = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

        Ball {
            x: court.width / 2.0,
            y: court.height / 2.0,
            dx: court.ball_speed * angle.cos() * dir,
            dy: court.ball_speed * angle.sin(),
            radius: court.ball_radius,
        }
    }

    /// New paddle y after applying its command for `dt` ticks
    pub fn move_paddle(paddle: &Paddle, court: &CourtConfig, dt: f32) -> f32 {
        let max_step = court.paddle_speed * dt;
        let y = match paddle.target_y {
            Some(target) => {
                let delta = (target - paddle.y).clamp(-max_step, max_step);
                paddle.y + delta
            }
            None => paddle.y + f32::from(paddle.direction.signum()) * max_step,
        };
        y.clamp(0.0, court.paddle_max_y())
    }

    /// Advance the ball by `dt` ticks (explicit Euler) and resolve collisions.
    ///
    /// At most one paddle hit is possible per step since the ball only moves
    /// towards one paddle at a time. A goal re-serves from center.
    pub fn step<R: Rng + ?Sized>(
        ball: &Ball,
        left: &Paddle,
        right: &Paddle,
        court: &CourtConfig,
        dt: f32,
        rng: &mut R,
    ) -> StepResult {
        let mut events = Vec::new();

        if !ball.is_finite() || !dt.is_finite() {
            warn!(
                fatal = true,
                x = ball.x,
                y = ball.y,
                dx = ball.dx,
                dy = ball.dy,
                "Non-finite ball state, re-serving"
            );
            return StepResult {
                ball: Self::serve(court, rng),
                events,
            };
        }

        let r = ball.radius;
        let mut next = Ball {
            x: ball.x + ball.dx * dt,
            y: ball.y + ball.dy * dt,
            ..*ball
        };

        // Walls
        if next.y - r < 0.0 {
            next.y = r;
            next.dy = next.dy.abs();
            events.push(PhysicsEvent::WallBounce { wall: Wall::Top });
        } else if next.y + r > court.height {
            next.y = court.height - r;
            next.dy = -next.dy.abs();
            events.push(PhysicsEvent::WallBounce { wall: Wall::Bottom });
        }

        // Paddles: the ball must cross the face plane during this step
        if next.dx < 0.0 {
            let face = court.paddle_face_x(Side::Left);
            if ball.x - r >= face && next.x - r <= face && Self::within_paddle(next.y, left, court) {
                Self::deflect(&mut next, left, court);
                next.x = face + r;
                events.push(PhysicsEvent::PaddleHit { side: Side::Left });
            }
        } else if next.dx > 0.0 {
            let face = court.paddle_face_x(Side::Right);
            if ball.x + r <= face && next.x + r >= face && Self::within_paddle(next.y, right, court) {
                Self::deflect(&mut next, right, court);
                next.x = face - r;
                events.push(PhysicsEvent::PaddleHit { side: Side::Right });
            }
        }

        // Goals
        if next.x - r <= 0.0 {
            events.push(PhysicsEvent::Goal { scorer: Side::Right });
            next = Self::serve(court, rng);
        } else if next.x + r >= court.width {
            events.push(PhysicsEvent::Goal { scorer: Side::Left });
            next = Self::serve(court, rng);
        }

        StepResult { ball: next, events }
    }

    fn within_paddle(ball_y: f32, paddle: &Paddle, court: &CourtConfig) -> bool {
        ball_y >= paddle.y - court.hit_epsilon && ball_y <= paddle.y + paddle.height + court.hit_epsilon
    }

    /// Reflect off a paddle, angling by where the ball struck and speeding up to the cap
    fn deflect(ball: &mut Ball, paddle: &Paddle, court: &CourtConfig) {
        let half = (paddle.height / 2.0).max(f32::EPSILON);
        let offset = ((ball.y - paddle.center()) / half).clamp(-1.0, 1.0);
        let angle = offset * court.max_bounce_angle;

        let speed = (ball.speed() * court.speed_multiplier)
            .min(court.max_ball_speed)
            .max(f32::EPSILON);
        let dir = match paddle.side {
            Side::Left => 1.0,
            Side::Right => -1.0,
        };

        ball.dx = speed * angle.cos() * dir;
        ball.dy = speed * angle.sin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    fn paddles(court: &CourtConfig) -> (Paddle, Paddle) {
        (Paddle::new(Side::Left, court), Paddle::new(Side::Right, court))
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn ball_advances_linearly_without_collisions() {
        let court = CourtConfig::default();
        let (left, right) = paddles(&court);
        let mut ball = Ball { x: 400.0, y: 200.0, dx: 5.0, dy: 3.0, radius: court.ball_radius };
        let mut rng = rng();

        for _ in 0..10 {
            let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng);
            assert!(out.events.is_empty());
            ball = out.ball;
        }

        assert!(approx(ball.x, 450.0));
        assert!(approx(ball.y, 230.0));
        assert!(approx(ball.dx, 5.0));
        assert!(approx(ball.dy, 3.0));
    }

    #[test]
    fn wall_reflection_clamps_to_bound() {
        let court = CourtConfig::default();
        let (left, right) = paddles(&court);
        let ball = Ball { x: 400.0, y: 10.0, dx: 2.0, dy: -6.0, radius: court.ball_radius };

        let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng());
        assert_eq!(out.events, vec![PhysicsEvent::WallBounce { wall: Wall::Top }]);
        assert!(approx(out.ball.y, court.ball_radius));
        assert!(out.ball.dy > 0.0);

        let ball = Ball { x: 400.0, y: 390.0, dx: 2.0, dy: 6.0, radius: court.ball_radius };
        let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng());
        assert_eq!(out.events, vec![PhysicsEvent::WallBounce { wall: Wall::Bottom }]);
        assert!(approx(out.ball.y, court.height - court.ball_radius));
        assert!(out.ball.dy < 0.0);
    }

    #[test]
    fn paddle_hit_reverses_direction_once() {
        let court = CourtConfig::default();
        let (left, right) = paddles(&court);
        let face = court.paddle_face_x(Side::Left);
        let mut ball = Ball {
            x: face + court.ball_radius + 2.0,
            y: left.center(),
            dx: -5.0,
            dy: 0.0,
            radius: court.ball_radius,
        };
        let mut rng = rng();

        let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng);
        assert_eq!(out.events, vec![PhysicsEvent::PaddleHit { side: Side::Left }]);
        assert!(out.ball.dx > 0.0);
        assert!(approx(out.ball.x, face + court.ball_radius));
        // centre hit keeps a flat trajectory and speeds up
        assert!(approx(out.ball.dy, 0.0));
        assert!(approx(out.ball.speed(), 5.0 * court.speed_multiplier));

        // the following ticks carry it away without a second bounce
        ball = out.ball;
        for _ in 0..5 {
            let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng);
            assert!(out.events.is_empty());
            assert!(out.ball.dx > 0.0);
            ball = out.ball;
        }
    }

    #[test]
    fn off_center_hit_deflects_and_speed_is_capped() {
        let court = CourtConfig::default();
        let (left, right) = paddles(&court);
        let face = court.paddle_face_x(Side::Right);
        let ball = Ball {
            x: face - court.ball_radius - 1.0,
            y: right.y + 2.0,
            dx: court.max_ball_speed,
            dy: 0.0,
            radius: court.ball_radius,
        };

        let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng());
        assert_eq!(out.events, vec![PhysicsEvent::PaddleHit { side: Side::Right }]);
        assert!(out.ball.dx < 0.0);
        // struck near the top edge so it leaves upwards
        assert!(out.ball.dy < 0.0);
        assert!(out.ball.speed() <= court.max_ball_speed + 1e-3);
    }

    #[test]
    fn miss_scores_for_opposite_side_and_reserves() {
        let court = CourtConfig::default();
        let (mut left, right) = paddles(&court);
        left.y = 0.0;
        let ball = Ball { x: 12.0, y: 350.0, dx: -6.0, dy: 0.0, radius: court.ball_radius };

        let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng());
        assert_eq!(out.events, vec![PhysicsEvent::Goal { scorer: Side::Right }]);
        assert!(approx(out.ball.x, court.width / 2.0));
        assert!(approx(out.ball.y, court.height / 2.0));
        assert!(approx(out.ball.speed(), court.ball_speed));
    }

    #[test]
    fn non_finite_velocity_is_replaced_with_a_serve() {
        let court = CourtConfig::default();
        let (left, right) = paddles(&court);
        let ball = Ball { x: 400.0, y: 200.0, dx: f32::NAN, dy: 1.0, radius: court.ball_radius };

        let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng());
        assert!(out.events.is_empty());
        assert!(out.ball.dx.is_finite() && out.ball.dy.is_finite());
        assert!(approx(out.ball.speed(), court.ball_speed));
    }

    #[test]
    fn ball_never_leaves_the_court() {
        let court = CourtConfig::default();
        let mut rng = rng();
        let (mut left, mut right) = paddles(&court);
        let mut ball = PhysicsSystem::serve(&court, &mut rng);

        for tick in 0..20_000u32 {
            left.direction = [-1, 0, 1][(tick / 37 % 3) as usize];
            right.target_y = Some(ball.y - right.height / 2.0);
            left.y = PhysicsSystem::move_paddle(&left, &court, 1.0);
            right.y = PhysicsSystem::move_paddle(&right, &court, 1.0);

            let out = PhysicsSystem::step(&ball, &left, &right, &court, 1.0, &mut rng);
            ball = out.ball;

            assert!(ball.y - ball.radius >= -1e-3 && ball.y + ball.radius <= court.height + 1e-3);
            assert!(ball.x >= 0.0 && ball.x <= court.width);
            assert!(ball.speed() <= court.max_ball_speed + 1e-3);
            assert!(left.y >= 0.0 && left.y <= court.paddle_max_y());
            assert!(right.y >= 0.0 && right.y <= court.paddle_max_y());
        }
    }

    #[test]
    fn paddle_moves_by_command_and_stays_in_bounds() {
        let court = CourtConfig::default();
        let mut paddle = Paddle::new(Side::Left, &court);
        paddle.y = 1.0;
        paddle.direction = -1;
        assert_eq!(PhysicsSystem::move_paddle(&paddle, &court, 1.0), 0.0);

        paddle.direction = 1;
        assert!(approx(PhysicsSystem::move_paddle(&paddle, &court, 1.0), 1.0 + court.paddle_speed));

        paddle.target_y = Some(3.0);
        assert!(approx(PhysicsSystem::move_paddle(&paddle, &court, 1.0), 3.0));

        paddle.target_y = Some(10_000.0);
        paddle.y = court.paddle_max_y();
        assert_eq!(PhysicsSystem::move_paddle(&paddle, &court, 1.0), court.paddle_max_y());
    }
}
