//! Match session state and authoritative tick loop

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::{tick_duration, DEFAULT_TICK_RATE_HZ};
use crate::ws::protocol::{ServerMsg, SessionStatus};

use super::ai::AiController;
use super::physics::{Ball, CourtConfig, Paddle, PhysicsEvent, PhysicsSystem, Side};
use super::score::{MatchFinished, ScoreBoard, DEFAULT_WIN_SCORE};
use super::seats::RoomSeats;
use super::snapshot::SnapshotBuilder;
use super::{Command, MatchOutcome, Outbound, PaddleIntent, SessionCommand, TournamentLink};

/// Per-room tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub court: CourtConfig,
    pub win_score: u32,
    pub tick_rate_hz: u32,
    /// Ticks between state broadcasts (1 = every tick)
    pub snapshot_interval: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            court: CourtConfig::default(),
            win_score: DEFAULT_WIN_SCORE,
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            snapshot_interval: 1,
        }
    }
}

/// Rejected command; session state is left untouched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("{0}")]
    Validation(String),
}

impl GameError {
    pub fn code(&self) -> &'static str {
        match self {
            GameError::Validation(_) => "validation_error",
        }
    }
}

/// Result of one simulation tick
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub events: Vec<PhysicsEvent>,
    pub finished: Option<MatchFinished>,
}

/// Authoritative state of one room (owned by the session task)
pub struct SessionState {
    pub id: String,
    pub status: SessionStatus,
    pub ball: Ball,
    pub left: Paddle,
    pub right: Paddle,
    pub score: ScoreBoard,
    pub tick: u64,
    pub court: CourtConfig,
    rng: ChaCha8Rng,
    ai: Vec<AiController>,
    /// Latest paddle command per side since the last tick, `[left, right]`
    pending: [Option<PaddleIntent>; 2],
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Left => 0,
        Side::Right => 1,
    }
}

impl SessionState {
    pub fn new(id: String, settings: &SessionSettings, seed: u64, ai_sides: &[Side]) -> Self {
        let court = settings.court;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let ball = PhysicsSystem::serve(&court, &mut rng);

        Self {
            id,
            status: SessionStatus::Waiting,
            ball,
            left: Paddle::new(Side::Left, &court),
            right: Paddle::new(Side::Right, &court),
            score: ScoreBoard::new(settings.win_score),
            tick: 0,
            court,
            rng,
            ai: ai_sides.iter().map(|side| AiController::new(*side)).collect(),
            pending: [None, None],
        }
    }

    fn paddle_mut(&mut self, side: Side) -> &mut Paddle {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// Apply a player command. Returns the new status when it changed.
    pub fn apply(
        &mut self,
        user_id: Uuid,
        command: Command,
        seats: &RoomSeats,
    ) -> Result<Option<SessionStatus>, GameError> {
        if seats.sides_of(user_id).is_empty() {
            return Err(GameError::Validation("You are not seated in this room".into()));
        }
        if self.status == SessionStatus::Finished {
            return Err(GameError::Validation("Match is finished".into()));
        }

        match command {
            Command::Start => match self.status {
                SessionStatus::Playing => Err(GameError::Validation("Match is already playing".into())),
                SessionStatus::Waiting if !seats.is_full() => {
                    Err(GameError::Validation("Waiting for an opponent".into()))
                }
                _ => {
                    self.status = SessionStatus::Playing;
                    Ok(Some(SessionStatus::Playing))
                }
            },
            Command::Pause => {
                if self.status != SessionStatus::Playing {
                    return Err(GameError::Validation("Only a playing match can be paused".into()));
                }
                self.status = SessionStatus::Paused;
                Ok(Some(SessionStatus::Paused))
            }
            Command::Reset => {
                self.reset();
                Ok(Some(SessionStatus::Waiting))
            }
            Command::Paddle { side, intent } => {
                if !seats.controls(user_id, side) {
                    return Err(GameError::Validation(format!(
                        "You do not control the {side:?} paddle"
                    )));
                }
                self.pending[side_index(side)] = Some(intent);
                Ok(None)
            }
        }
    }

    fn reset(&mut self) {
        self.status = SessionStatus::Waiting;
        self.score.reset();
        self.ball = PhysicsSystem::serve(&self.court, &mut self.rng);
        self.left = Paddle::new(Side::Left, &self.court);
        self.right = Paddle::new(Side::Right, &self.court);
        self.pending = [None, None];
    }

    /// Advance one tick: AI input, paddle commands, physics, scoring
    pub fn tick(&mut self) -> TickOutput {
        self.tick += 1;

        let ai_commands: Vec<(Side, i8)> = {
            let (ball, left, right, court) = (&self.ball, &self.left, &self.right, &self.court);
            self.ai
                .iter_mut()
                .map(|ai| {
                    let paddle = match ai.side() {
                        Side::Left => left,
                        Side::Right => right,
                    };
                    (ai.side(), ai.decide(ball, paddle, court))
                })
                .collect()
        };
        for (side, direction) in ai_commands {
            self.pending[side_index(side)].get_or_insert(PaddleIntent::Direction(direction));
        }

        for side in [Side::Left, Side::Right] {
            if let Some(intent) = self.pending[side_index(side)].take() {
                let paddle = self.paddle_mut(side);
                match intent {
                    PaddleIntent::Direction(direction) => {
                        paddle.direction = direction;
                        paddle.target_y = None;
                    }
                    PaddleIntent::Target(y) => paddle.target_y = Some(y),
                }
            }
        }

        let court = self.court;
        self.left.y = PhysicsSystem::move_paddle(&self.left, &court, 1.0);
        self.right.y = PhysicsSystem::move_paddle(&self.right, &court, 1.0);

        let step = PhysicsSystem::step(&self.ball, &self.left, &self.right, &court, 1.0, &mut self.rng);
        self.ball = step.ball;

        let finished = self.score.record(&step.events);
        if finished.is_some() {
            self.status = SessionStatus::Finished;
        }

        TickOutput {
            events: step.events,
            finished,
        }
    }
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub room_id: String,
    pub command_tx: mpsc::Sender<SessionCommand>,
    pub events_tx: broadcast::Sender<Outbound>,
    pub status_rx: watch::Receiver<SessionStatus>,
    pub seats: Arc<Mutex<RoomSeats>>,
    pub link: Option<TournamentLink>,
    pub win_score: u32,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events_tx.subscribe()
    }

    pub fn broadcast(&self, outbound: Outbound) {
        let _ = self.events_tx.send(outbound);
    }
}

/// The authoritative match session task
pub struct MatchSession {
    state: SessionState,
    seats: Arc<Mutex<RoomSeats>>,
    command_rx: mpsc::Receiver<SessionCommand>,
    events_tx: broadcast::Sender<Outbound>,
    status_tx: watch::Sender<SessionStatus>,
    snapshot_builder: SnapshotBuilder,
    tick_duration: Duration,
    link: Option<TournamentLink>,
    outcome_tx: Option<mpsc::UnboundedSender<MatchOutcome>>,
}

impl MatchSession {
    /// Create a new session for a room
    pub fn new(
        room_id: String,
        settings: SessionSettings,
        seats: Arc<Mutex<RoomSeats>>,
        link: Option<TournamentLink>,
        outcome_tx: Option<mpsc::UnboundedSender<MatchOutcome>>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(128);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Waiting);

        let ai_sides = seats.lock().ai_sides();
        let state = SessionState::new(room_id.clone(), &settings, rand::random::<u64>(), &ai_sides);

        let handle = SessionHandle {
            room_id,
            command_tx,
            events_tx: events_tx.clone(),
            status_rx,
            seats: seats.clone(),
            link,
            win_score: state.score.win_score(),
        };

        let session = Self {
            state,
            seats,
            command_rx,
            events_tx,
            status_tx,
            snapshot_builder: SnapshotBuilder::new(settings.snapshot_interval),
            tick_duration: tick_duration(settings.tick_rate_hz),
            link,
            outcome_tx,
        };

        (session, handle)
    }

    /// Run until shut down. Ticks only while playing; otherwise parks on the
    /// command queue.
    pub async fn run(mut self) {
        info!(room_id = %self.state.id, "Session started");

        let mut ticker = interval(self.tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        'session: loop {
            if self.state.status == SessionStatus::Playing {
                ticker.tick().await;

                // Drain the queue once per tick
                loop {
                    match self.command_rx.try_recv() {
                        Ok(cmd) => {
                            if self.handle_command(cmd).is_break() {
                                break 'session;
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => break 'session,
                    }
                }

                if self.state.status == SessionStatus::Playing {
                    self.run_tick();
                }
            } else {
                let Some(cmd) = self.command_rx.recv().await else {
                    break;
                };
                if self.handle_command(cmd).is_break() {
                    break;
                }
                if self.state.status == SessionStatus::Playing {
                    ticker.reset();
                }
            }
        }

        info!(room_id = %self.state.id, tick = self.state.tick, "Session stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) -> ControlFlow<()> {
        match cmd {
            SessionCommand::Player { user_id, command } => {
                // Status is published under the seat lock so the manager sees
                // seats and status change together
                let result = {
                    let seats = self.seats.lock();
                    let result = self.state.apply(user_id, command, &seats);
                    if let Ok(Some(status)) = &result {
                        self.status_tx.send_replace(*status);
                    }
                    result
                };

                match result {
                    Ok(Some(status)) => self.on_status_changed(status),
                    Ok(None) => {}
                    Err(e) => {
                        debug!(room_id = %self.state.id, user_id = %user_id, error = %e, "Command rejected");
                        self.send(Outbound::to(user_id, ServerMsg::error(e.code(), e.to_string())));
                    }
                }
                ControlFlow::Continue(())
            }
            SessionCommand::Shutdown { reason } => {
                self.send(Outbound::all(ServerMsg::RoomClosed { reason }));
                ControlFlow::Break(())
            }
        }
    }

    fn on_status_changed(&mut self, status: SessionStatus) {
        info!(room_id = %self.state.id, status = ?status, "Session status changed");
        self.send(Outbound::all(ServerMsg::StatusChanged { status }));
        // Reset and pause are material changes
        self.send(Outbound::all(self.snapshot()));
        self.snapshot_builder.force_next();
    }

    fn run_tick(&mut self) {
        let out = self.state.tick();

        if let Some(finished) = out.finished {
            self.send(Outbound::all(self.snapshot()));
            self.send(Outbound::all(ServerMsg::GameOver {
                winner_side: finished.winner_side,
                left_score: finished.left_score,
                right_score: finished.right_score,
            }));
            self.status_tx.send_replace(SessionStatus::Finished);
            self.send(Outbound::all(ServerMsg::StatusChanged {
                status: SessionStatus::Finished,
            }));

            info!(
                room_id = %self.state.id,
                winner = ?finished.winner_side,
                left_score = finished.left_score,
                right_score = finished.right_score,
                "Match finished"
            );
            self.report_outcome(finished);
            return;
        }

        if out
            .events
            .iter()
            .any(|e| matches!(e, PhysicsEvent::Goal { .. }))
        {
            self.snapshot_builder.force_next();
        }

        if self.snapshot_builder.should_send() {
            self.send(Outbound::all(self.snapshot()));
        }
    }

    fn report_outcome(&self, result: MatchFinished) {
        let (Some(link), Some(tx)) = (self.link, &self.outcome_tx) else {
            return;
        };
        let outcome = MatchOutcome {
            room_id: self.state.id.clone(),
            link,
            result,
        };
        if tx.send(outcome).is_err() {
            warn!(room_id = %self.state.id, "Outcome channel closed, result not reported");
        }
    }

    fn snapshot(&self) -> ServerMsg {
        self.snapshot_builder.build(
            self.state.tick,
            &self.state.ball,
            &self.state.left,
            &self.state.right,
            &self.state.score,
        )
    }

    fn send(&self, outbound: Outbound) {
        // No receivers is fine, nobody is watching
        let _ = self.events_tx.send(outbound);
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::RoomMode;
    use std::time::Instant;
    use tokio::sync::broadcast::error::TryRecvError as BroadcastTryRecvError;

    fn two_player_seats() -> (RoomSeats, Uuid, Uuid) {
        let mut seats = RoomSeats::new(RoomMode::Multiplayer, Instant::now());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        seats.join(a, "a").unwrap();
        seats.join(b, "b").unwrap();
        (seats, a, b)
    }

    fn state(win_score: u32) -> SessionState {
        let settings = SessionSettings {
            win_score,
            ..SessionSettings::default()
        };
        SessionState::new("room".into(), &settings, 42, &[])
    }

    /// Ball one tick away from passing the left paddle
    fn aim_at_left_goal(state: &mut SessionState) {
        state.left.y = 0.0;
        state.ball = Ball {
            x: 10.0,
            y: 300.0,
            dx: -8.0,
            dy: 0.0,
            radius: state.court.ball_radius,
        };
    }

    #[test]
    fn start_requires_both_seats() {
        let mut seats = RoomSeats::new(RoomMode::Multiplayer, Instant::now());
        let a = Uuid::new_v4();
        seats.join(a, "a").unwrap();
        let mut state = state(11);

        let err = state.apply(a, Command::Start, &seats).unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(state.status, SessionStatus::Waiting);

        seats.join(Uuid::new_v4(), "b").unwrap();
        assert_eq!(state.apply(a, Command::Start, &seats), Ok(Some(SessionStatus::Playing)));
    }

    #[test]
    fn one_human_against_ai_can_start() {
        let mut seats = RoomSeats::new(RoomMode::VsAi, Instant::now());
        let a = Uuid::new_v4();
        seats.join(a, "a").unwrap();
        let mut state = SessionState::new("room".into(), &SessionSettings::default(), 1, &seats.ai_sides());

        assert_eq!(state.apply(a, Command::Start, &seats), Ok(Some(SessionStatus::Playing)));
        // the AI drives the right paddle on its own
        let start_y = state.right.y;
        state.ball.y = 10.0;
        state.ball.dx = state.ball.dx.abs();
        for _ in 0..30 {
            state.tick();
        }
        assert!(state.right.y < start_y);
    }

    #[test]
    fn pause_resume_and_reset_transitions() {
        let (seats, a, b) = two_player_seats();
        let mut state = state(11);

        assert!(state.apply(a, Command::Pause, &seats).is_err());
        state.apply(a, Command::Start, &seats).unwrap();
        assert!(state.apply(b, Command::Start, &seats).is_err());

        assert_eq!(state.apply(b, Command::Pause, &seats), Ok(Some(SessionStatus::Paused)));
        assert_eq!(state.apply(a, Command::Start, &seats), Ok(Some(SessionStatus::Playing)));

        aim_at_left_goal(&mut state);
        state.tick();
        assert_eq!(state.score.right(), 1);

        assert_eq!(state.apply(a, Command::Reset, &seats), Ok(Some(SessionStatus::Waiting)));
        assert_eq!((state.score.left(), state.score.right()), (0, 0));
        assert_eq!(state.ball.x, state.court.width / 2.0);
        assert_eq!(state.ball.y, state.court.height / 2.0);
    }

    #[test]
    fn strangers_and_wrong_paddles_are_rejected() {
        let (seats, a, _b) = two_player_seats();
        let mut state = state(11);

        assert!(state.apply(Uuid::new_v4(), Command::Start, &seats).is_err());

        let wrong = Command::Paddle { side: Side::Right, intent: PaddleIntent::Direction(1) };
        assert!(state.apply(a, wrong, &seats).is_err());
        assert_eq!(state.pending, [None, None]);
    }

    #[test]
    fn only_the_last_paddle_command_per_tick_takes_effect() {
        let (seats, a, _b) = two_player_seats();
        let mut state = state(11);
        state.apply(a, Command::Start, &seats).unwrap();
        let start_y = state.left.y;

        for direction in [1, 1, -1] {
            let cmd = Command::Paddle { side: Side::Left, intent: PaddleIntent::Direction(direction) };
            state.apply(a, cmd, &seats).unwrap();
        }
        state.tick();
        assert_eq!(state.left.y, start_y - state.court.paddle_speed);

        // direction persists across ticks until changed
        state.tick();
        assert_eq!(state.left.y, start_y - 2.0 * state.court.paddle_speed);
    }

    #[test]
    fn reaching_target_finishes_once_and_rejects_further_commands() {
        let (seats, a, _b) = two_player_seats();
        let mut state = state(1);
        state.apply(a, Command::Start, &seats).unwrap();

        aim_at_left_goal(&mut state);
        let out = state.tick();
        assert_eq!(
            out.finished,
            Some(MatchFinished { winner_side: Side::Right, left_score: 0, right_score: 1 })
        );
        assert_eq!(state.status, SessionStatus::Finished);

        assert!(state.apply(a, Command::Reset, &seats).is_err());
        assert!(state.apply(a, Command::Start, &seats).is_err());
    }

    async fn spawn_session(
        win_score: u32,
        link: Option<TournamentLink>,
        outcome_tx: Option<mpsc::UnboundedSender<MatchOutcome>>,
    ) -> (SessionHandle, Uuid, broadcast::Receiver<Outbound>) {
        let (seats, a, _b) = two_player_seats();
        let settings = SessionSettings {
            win_score,
            ..SessionSettings::default()
        };
        let (mut session, handle) =
            MatchSession::new("room-1".into(), settings, Arc::new(Mutex::new(seats)), link, outcome_tx);
        aim_at_left_goal(session.state_mut());
        let rx = handle.subscribe();
        tokio::spawn(session.run());
        (handle, a, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_broadcasts_nothing() {
        let (_handle, _a, mut rx) = spawn_session(11, None, None).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Err(BroadcastTryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn game_over_is_the_last_state_message() {
        let (handle, a, mut rx) = spawn_session(1, None, None).await;
        handle
            .command_tx
            .send(SessionCommand::Player { user_id: a, command: Command::Start })
            .await
            .unwrap();

        let mut updates_before = 0;
        loop {
            let outbound = rx.recv().await.unwrap();
            match outbound.msg {
                ServerMsg::GameStateUpdate { .. } => updates_before += 1,
                ServerMsg::GameOver { winner_side, right_score, .. } => {
                    assert_eq!(winner_side, Side::Right);
                    assert_eq!(right_score, 1);
                    break;
                }
                _ => {}
            }
        }
        assert!(updates_before >= 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        while let Ok(outbound) = rx.try_recv() {
            assert!(!matches!(outbound.msg, ServerMsg::GameStateUpdate { .. }));
        }
        assert_eq!(handle.status(), SessionStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn linked_session_reports_outcome_and_stops_on_shutdown() {
        let link = TournamentLink {
            tournament_id: Uuid::new_v4(),
            match_id: Uuid::new_v4(),
        };
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let (handle, a, mut rx) = spawn_session(1, Some(link), Some(outcome_tx)).await;

        handle
            .command_tx
            .send(SessionCommand::Player { user_id: a, command: Command::Start })
            .await
            .unwrap();

        let outcome = outcome_rx.recv().await.unwrap();
        assert_eq!(outcome.link, link);
        assert_eq!(outcome.room_id, "room-1");
        assert_eq!(outcome.result.winner_side, Side::Right);

        handle
            .command_tx
            .send(SessionCommand::Shutdown { reason: "archived".into() })
            .await
            .unwrap();
        loop {
            match rx.recv().await {
                Ok(Outbound { msg: ServerMsg::RoomClosed { reason }, .. }) => {
                    assert_eq!(reason, "archived");
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
        // task has exited and dropped its receiver
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.command_tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_is_addressed_to_sender_only() {
        let (handle, a, mut rx) = spawn_session(11, None, None).await;
        handle
            .command_tx
            .send(SessionCommand::Player { user_id: a, command: Command::Pause })
            .await
            .unwrap();

        let outbound = rx.recv().await.unwrap();
        assert_eq!(outbound.to, Some(a));
        assert!(matches!(outbound.msg, ServerMsg::Error { ref code, .. } if code == "validation_error"));
        assert!(!outbound.is_for(Uuid::new_v4()));
    }
}
