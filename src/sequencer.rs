use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::axis::AxisController;
use crate::board::Square;
use crate::config::SettleConfig;
use crate::error::RigError;
use crate::gripper::GripperController;

/// Horizontal positioning as the sequencer needs it.
#[async_trait]
pub trait Gantry: Send + Sync {
    async fn move_to_square(&self, square: Square) -> Result<(), RigError>;
    async fn move_to_discard(&self) -> Result<(), RigError>;
}

#[async_trait]
impl Gantry for AxisController {
    async fn move_to_square(&self, square: Square) -> Result<(), RigError> {
        AxisController::move_to_square(self, square).await
    }

    async fn move_to_discard(&self) -> Result<(), RigError> {
        AxisController::move_to_discard(self).await
    }
}

/// The gripper's four physical gestures.
#[async_trait]
pub trait Hand: Send + Sync {
    async fn open(&self) -> Result<(), RigError>;
    async fn close(&self) -> Result<(), RigError>;
    async fn lower(&self) -> Result<(), RigError>;
    async fn raise(&self) -> Result<(), RigError>;
}

#[async_trait]
impl Hand for GripperController {
    async fn open(&self) -> Result<(), RigError> {
        self.hand_open().await.map(|_| ())
    }

    async fn close(&self) -> Result<(), RigError> {
        self.hand_close().await.map(|_| ())
    }

    async fn lower(&self) -> Result<(), RigError> {
        self.z_down().await.map(|_| ())
    }

    async fn raise(&self) -> Result<(), RigError> {
        self.z_up().await.map(|_| ())
    }
}

/// Fixed waits inserted after each physical step. The rig cannot observe
/// motion completion, so these substitute for a completion signal.
#[derive(Debug, Clone, Copy)]
pub struct SettleDelays {
    pub travel: Duration,
    pub lift: Duration,
    pub grip: Duration,
}

impl SettleDelays {
    pub fn from_config(config: &SettleConfig) -> Self {
        Self {
            travel: Duration::from_secs(config.travel_secs),
            lift: Duration::from_secs(config.lift_secs),
            grip: Duration::from_secs(config.grip_secs),
        }
    }

    #[cfg(test)]
    fn none() -> Self {
        Self {
            travel: Duration::ZERO,
            lift: Duration::ZERO,
            grip: Duration::ZERO,
        }
    }
}

/// One symbolic move in a batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MoveRequest {
    MoveToSpace { from: String, to: String },
    RemoveFromBoard { space: String },
}

enum PlannedMove {
    Transfer { from: Square, to: Square },
    Capture { square: Square },
}

/// Turns symbolic moves into ordered pick-and-place sequences.
///
/// The sequencing mutex is held for the whole of every public operation so
/// concurrent HTTP callers cannot interleave physical commands. Failures
/// abort immediately; there is no rollback, the board state is whatever the
/// rig got to.
pub struct MoveSequencer {
    gantry: Arc<dyn Gantry>,
    hand: Arc<dyn Hand>,
    delays: RwLock<SettleDelays>,
    sequence: Mutex<()>,
}

impl MoveSequencer {
    pub fn new(gantry: Arc<dyn Gantry>, hand: Arc<dyn Hand>, delays: SettleDelays) -> Self {
        Self {
            gantry,
            hand,
            delays: RwLock::new(delays),
            sequence: Mutex::new(()),
        }
    }

    /// Takes effect from the next sequence; a running sequence keeps the
    /// delays it started with.
    pub async fn set_delays(&self, delays: SettleDelays) {
        *self.delays.write().await = delays;
    }

    /// Pick the piece on `from` and place it on `to`.
    pub async fn move_piece(&self, from: Square, to: Square) -> Result<(), RigError> {
        let _sequence = self.sequence.lock().await;
        self.transfer(from, to, false).await
    }

    /// Pick the piece on `square` and release it at the discard location.
    pub async fn remove_from_board(&self, square: Square) -> Result<(), RigError> {
        let _sequence = self.sequence.lock().await;
        self.capture(square, false).await
    }

    /// Execute a batch strictly in order. Every square is validated up
    /// front so a malformed entry cannot leave the batch half done.
    /// `skip_gripper` suppresses the gripper and lift steps, leaving only
    /// gantry motion (dry runs and calibration).
    pub async fn perform_moves(
        &self,
        moves: &[MoveRequest],
        skip_gripper: bool,
    ) -> Result<(), RigError> {
        let planned = Self::plan(moves)?;

        let _sequence = self.sequence.lock().await;
        for planned_move in planned {
            match planned_move {
                PlannedMove::Transfer { from, to } => {
                    self.transfer(from, to, skip_gripper).await?
                }
                PlannedMove::Capture { square } => self.capture(square, skip_gripper).await?,
            }
        }
        Ok(())
    }

    fn plan(moves: &[MoveRequest]) -> Result<Vec<PlannedMove>, RigError> {
        moves
            .iter()
            .map(|request| match request {
                MoveRequest::MoveToSpace { from, to } => Ok(PlannedMove::Transfer {
                    from: from.parse()?,
                    to: to.parse()?,
                }),
                MoveRequest::RemoveFromBoard { space } => Ok(PlannedMove::Capture {
                    square: space.parse()?,
                }),
            })
            .collect()
    }

    async fn transfer(&self, from: Square, to: Square, skip_gripper: bool) -> Result<(), RigError> {
        tracing::info!("Moving piece {} -> {}", from, to);
        let delays = *self.delays.read().await;

        self.gantry.move_to_square(from).await?;
        self.settle(delays.travel).await;
        self.pick(skip_gripper, delays).await?;

        self.gantry.move_to_square(to).await?;
        self.settle(delays.travel).await;
        self.place(skip_gripper, delays).await
    }

    async fn capture(&self, square: Square, skip_gripper: bool) -> Result<(), RigError> {
        tracing::info!("Removing piece from {}", square);
        let delays = *self.delays.read().await;

        self.gantry.move_to_square(square).await?;
        self.settle(delays.travel).await;
        self.pick(skip_gripper, delays).await?;

        self.gantry.move_to_discard().await?;
        self.settle(delays.travel).await;
        self.place(skip_gripper, delays).await
    }

    async fn pick(&self, skip_gripper: bool, delays: SettleDelays) -> Result<(), RigError> {
        if skip_gripper {
            return Ok(());
        }
        self.hand.lower().await?;
        self.settle(delays.lift).await;
        self.hand.close().await?;
        self.settle(delays.grip).await;
        self.hand.raise().await?;
        self.settle(delays.lift).await;
        Ok(())
    }

    async fn place(&self, skip_gripper: bool, delays: SettleDelays) -> Result<(), RigError> {
        if skip_gripper {
            return Ok(());
        }
        self.hand.lower().await?;
        self.settle(delays.lift).await;
        self.hand.open().await?;
        self.settle(delays.grip).await;
        self.hand.raise().await
    }

    async fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    struct MockGantry {
        log: Log,
    }

    #[async_trait]
    impl Gantry for MockGantry {
        async fn move_to_square(&self, square: Square) -> Result<(), RigError> {
            self.log.lock().unwrap().push(format!("move {}", square));
            Ok(())
        }

        async fn move_to_discard(&self) -> Result<(), RigError> {
            self.log.lock().unwrap().push("discard".to_string());
            Ok(())
        }
    }

    struct MockHand {
        log: Log,
        fail_on: Option<&'static str>,
        step_delay: Duration,
    }

    impl MockHand {
        async fn record(&self, op: &'static str) -> Result<(), RigError> {
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            if self.fail_on == Some(op) {
                return Err(RigError::ActuatorProtocol(format!("{} jammed", op)));
            }
            self.log.lock().unwrap().push(op.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl Hand for MockHand {
        async fn open(&self) -> Result<(), RigError> {
            self.record("open").await
        }

        async fn close(&self) -> Result<(), RigError> {
            self.record("close").await
        }

        async fn lower(&self) -> Result<(), RigError> {
            self.record("lower").await
        }

        async fn raise(&self) -> Result<(), RigError> {
            self.record("raise").await
        }
    }

    fn sequencer(log: &Log, fail_on: Option<&'static str>, step_delay: Duration) -> MoveSequencer {
        MoveSequencer::new(
            Arc::new(MockGantry { log: log.clone() }),
            Arc::new(MockHand {
                log: log.clone(),
                fail_on,
                step_delay,
            }),
            SettleDelays::none(),
        )
    }

    fn square(s: &str) -> Square {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn move_piece_runs_the_full_pick_and_place() {
        let log: Log = Default::default();
        sequencer(&log, None, Duration::ZERO)
            .move_piece(square("D2"), square("D4"))
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "move D2", "lower", "close", "raise", "move D4", "lower", "open", "raise"
            ]
        );
    }

    #[tokio::test]
    async fn remove_from_board_releases_at_the_discard_location() {
        let log: Log = Default::default();
        sequencer(&log, None, Duration::ZERO)
            .remove_from_board(square("E5"))
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "move E5", "lower", "close", "raise", "discard", "lower", "open", "raise"
            ]
        );
    }

    #[tokio::test]
    async fn skip_gripper_leaves_only_gantry_motion() {
        let log: Log = Default::default();
        let moves = vec![
            MoveRequest::MoveToSpace {
                from: "D2".to_string(),
                to: "D4".to_string(),
            },
            MoveRequest::RemoveFromBoard {
                space: "E5".to_string(),
            },
        ];
        sequencer(&log, None, Duration::ZERO)
            .perform_moves(&moves, true)
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["move D2", "move D4", "move E5", "discard"]);
    }

    #[tokio::test]
    async fn malformed_square_aborts_before_any_motion() {
        let log: Log = Default::default();
        let moves = vec![
            MoveRequest::MoveToSpace {
                from: "D2".to_string(),
                to: "D4".to_string(),
            },
            MoveRequest::MoveToSpace {
                from: "Z9".to_string(),
                to: "A1".to_string(),
            },
        ];

        let result = sequencer(&log, None, Duration::ZERO)
            .perform_moves(&moves, false)
            .await;

        assert!(matches!(result, Err(RigError::InvalidSquare(_))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_failed_grip_aborts_the_sequence() {
        let log: Log = Default::default();
        let result = sequencer(&log, Some("close"), Duration::ZERO)
            .move_piece(square("D2"), square("D4"))
            .await;

        assert!(matches!(result, Err(RigError::ActuatorProtocol(_))));
        assert_eq!(*log.lock().unwrap(), vec!["move D2", "lower"]);
    }

    #[tokio::test]
    async fn concurrent_requests_do_not_interleave() {
        let log: Log = Default::default();
        let sequencer = Arc::new(sequencer(&log, None, Duration::from_millis(5)));

        let first = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move { sequencer.move_piece(square("A1"), square("A2")).await })
        };
        let second = {
            let sequencer = sequencer.clone();
            tokio::spawn(async move { sequencer.move_piece(square("B1"), square("B2")).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 16);
        // Whichever sequence started, it must have run to completion before
        // the other touched the hardware.
        let expected: Vec<String> = if log[0] == "move A1" {
            vec!["move A1", "lower", "close", "raise", "move A2", "lower", "open", "raise"]
        } else {
            vec!["move B1", "lower", "close", "raise", "move B2", "lower", "open", "raise"]
        }
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(&log[..8], expected.as_slice());
    }

    #[test]
    fn move_requests_deserialize_from_tagged_json() {
        let request: MoveRequest = serde_json::from_str(
            r#"{ "action": "move_to_space", "from": "D2", "to": "D4" }"#,
        )
        .unwrap();
        assert!(matches!(request, MoveRequest::MoveToSpace { .. }));

        let request: MoveRequest =
            serde_json::from_str(r#"{ "action": "remove_from_board", "space": "E5" }"#).unwrap();
        assert!(matches!(request, MoveRequest::RemoveFromBoard { .. }));
    }
}
