use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::board::{BoardGeometry, Square};
use crate::config::BoardConfig;
use crate::error::RigError;
use crate::octoprint::{Axis, PrintheadCommand, Positioner, PrinterProfile};

/// Setup batch issued by `initialize`: stepper idle-power-off timeout and
/// part fan off (the fan header drives nothing on this rig).
const SETUP_COMMANDS: &[&str] = &["M84 S1800", "M107"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MachineState {
    Uninitialized,
    Initialized,
    /// Entered on any actuator-protocol failure; the only way out is a
    /// fresh successful `initialize`.
    Faulted,
}

/// Per-axis homing flags. Set only by a successful home of that axis;
/// reset only by process restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HomedAxes {
    pub x: bool,
    pub y: bool,
    pub z: bool,
}

impl HomedAxes {
    pub fn fully_homed(&self) -> bool {
        self.x && self.y && self.z
    }

    fn missing(&self) -> String {
        let mut missing = Vec::new();
        if !self.x {
            missing.push("x");
        }
        if !self.y {
            missing.push("y");
        }
        if !self.z {
            missing.push("z");
        }
        missing.join(", ")
    }
}

/// Result of the ordered actuator health checks. Checks short-circuit;
/// only the first failing one is reported, with the raw device reason.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActuatorHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_check: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActuatorHealth {
    fn healthy() -> Self {
        Self {
            ok: true,
            failed_check: None,
            reason: None,
        }
    }

    fn failed(check: &'static str, reason: String) -> Self {
        Self {
            ok: false,
            failed_check: Some(check),
            reason: Some(reason),
        }
    }
}

/// Snapshot of the axis machine for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AxisStatus {
    pub initialized: bool,
    pub faulted: bool,
    pub homed: HomedAxes,
    pub fully_homed: bool,
}

/// State machine in front of the positioning actuator.
///
/// Gates every motion command on initialization, and absolute motion on all
/// three axes being homed (absolute coordinates are meaningless before
/// homing establishes the origin). The printer profile is fetched once and
/// cached for the life of the process.
pub struct AxisController {
    positioner: Arc<dyn Positioner>,
    board: RwLock<BoardConfig>,
    profile_id: String,
    state: Mutex<MachineState>,
    homed: Mutex<HomedAxes>,
    profile: OnceCell<PrinterProfile>,
}

impl AxisController {
    pub fn new(positioner: Arc<dyn Positioner>, board: BoardConfig, profile_id: String) -> Self {
        Self {
            positioner,
            board: RwLock::new(board),
            profile_id,
            state: Mutex::new(MachineState::Uninitialized),
            homed: Mutex::new(HomedAxes::default()),
            profile: OnceCell::new(),
        }
    }

    /// Issue the fixed setup batch and unlock motion commands.
    ///
    /// Homed flags are untouched: initialization does not move anything. A
    /// failure leaves the machine state exactly as it was; the caller's
    /// remedy is to retry.
    pub async fn initialize(&self) -> Result<(), RigError> {
        tracing::info!("Initializing positioning actuator");
        let commands: Vec<String> = SETUP_COMMANDS.iter().map(|c| c.to_string()).collect();
        self.positioner.send_commands(&commands).await?;

        *self.state.lock().await = MachineState::Initialized;
        tracing::info!("Positioning actuator initialized");
        Ok(())
    }

    async fn require_initialized(&self) -> Result<(), RigError> {
        match *self.state.lock().await {
            MachineState::Initialized => Ok(()),
            _ => Err(RigError::NotInitialized("positioning actuator")),
        }
    }

    /// Send a printhead command, faulting the machine on a device failure.
    async fn printhead(&self, command: PrintheadCommand) -> Result<(), RigError> {
        match self.positioner.printhead(&command).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!("Actuator command failed, entering fault state: {}", err);
                *self.state.lock().await = MachineState::Faulted;
                Err(err)
            }
        }
    }

    /// Home the requested axis subset.
    ///
    /// `apply_hand_offset` additionally issues one relative Z move of
    /// `z_axis_height` so the gripper (which hangs below the printhead
    /// reference) ends up clear of the pieces.
    pub async fn home(
        &self,
        x: bool,
        y: bool,
        z: bool,
        apply_hand_offset: bool,
    ) -> Result<(), RigError> {
        self.require_initialized().await?;

        let mut axes = Vec::new();
        if x {
            axes.push(Axis::X);
        }
        if y {
            axes.push(Axis::Y);
        }
        if z {
            axes.push(Axis::Z);
        }
        if axes.is_empty() {
            tracing::warn!("Home requested with no axes");
            return Ok(());
        }

        tracing::info!("Homing axes {:?}", axes);
        self.printhead(PrintheadCommand::Home { axes }).await?;

        {
            let mut homed = self.homed.lock().await;
            homed.x |= x;
            homed.y |= y;
            homed.z |= z;
        }

        if apply_hand_offset {
            let z_axis_height = self.board.read().await.z_axis_height;
            tracing::info!("Applying hand offset: +{}mm on Z", z_axis_height);
            self.move_relative(None, None, Some(z_axis_height)).await?;
        }

        Ok(())
    }

    /// Relative jog. Defined from wherever the machine currently is, so no
    /// homing precondition.
    pub async fn move_relative(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> Result<(), RigError> {
        self.require_initialized().await?;
        let speed = self.board.read().await.printhead_speed;
        self.printhead(PrintheadCommand::Jog {
            absolute: false,
            x,
            y,
            z,
            speed,
        })
        .await
    }

    /// Absolute jog. Requires all three axes homed.
    pub async fn move_absolute(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> Result<(), RigError> {
        self.require_initialized().await?;

        let homed = *self.homed.lock().await;
        if !homed.fully_homed() {
            return Err(RigError::NotHomed(homed.missing()));
        }

        let speed = self.board.read().await.printhead_speed;
        self.printhead(PrintheadCommand::Jog {
            absolute: true,
            x,
            y,
            z,
            speed,
        })
        .await
    }

    /// Resolve a board square to machine coordinates and move there at
    /// travel height.
    pub async fn move_to_square(&self, square: Square) -> Result<(), RigError> {
        let board = self.board.read().await.clone();
        let geometry = BoardGeometry::new(board.clone());
        geometry.validate_against(self.profile().await?)?;

        let (x, y) = geometry.resolve(square);
        tracing::info!("Moving to square {} at ({:.2}, {:.2})", square, x, y);
        self.move_absolute(Some(x), Some(y), Some(board.z_axis_height))
            .await
    }

    /// Move to the fixed off-board discard location at travel height.
    pub async fn move_to_discard(&self) -> Result<(), RigError> {
        let board = self.board.read().await.clone();
        tracing::info!(
            "Moving to discard location ({:.2}, {:.2})",
            board.discard_x,
            board.discard_y
        );
        self.move_absolute(
            Some(board.discard_x),
            Some(board.discard_y),
            Some(board.z_axis_height),
        )
        .await
    }

    /// Fetched once, cached for the process lifetime; invalidation is a
    /// restart.
    async fn profile(&self) -> Result<&PrinterProfile, RigError> {
        self.profile
            .get_or_try_init(|| async {
                tracing::debug!("Fetching printer profile {:?}", self.profile_id);
                self.positioner.printer_profile(&self.profile_id).await
            })
            .await
    }

    /// Ordered health checks: firmware version reachable, connection
    /// operational, no job blocking. Stops at the first failure.
    pub async fn health(&self) -> ActuatorHealth {
        match self.positioner.version().await {
            Err(RigError::ActuatorUnreachable(reason)) => {
                return ActuatorHealth::failed("reachable", format!("connection failed: {}", reason))
            }
            Err(err) => return ActuatorHealth::failed("reachable", err.to_string()),
            Ok(version) => {
                tracing::debug!("Actuator server version {}", version.server);
            }
        }

        match self.positioner.connection().await {
            Ok(status) if status.current.state == "Operational" => {}
            Ok(status) => {
                return ActuatorHealth::failed(
                    "connected",
                    format!("connection state is {:?}", status.current.state),
                )
            }
            Err(err) => return ActuatorHealth::failed("connected", err.to_string()),
        }

        match self.positioner.job().await {
            Ok(job) if job.state.starts_with("Printing") || job.state.starts_with("Paus") => {
                ActuatorHealth::failed("idle", format!("job state is {:?}", job.state))
            }
            Ok(_) => ActuatorHealth::healthy(),
            Err(err) => ActuatorHealth::failed("idle", err.to_string()),
        }
    }

    pub async fn status(&self) -> AxisStatus {
        let state = *self.state.lock().await;
        let homed = *self.homed.lock().await;
        AxisStatus {
            initialized: state == MachineState::Initialized,
            faulted: state == MachineState::Faulted,
            homed,
            fully_homed: homed.fully_homed(),
        }
    }

    pub async fn board_config(&self) -> BoardConfig {
        self.board.read().await.clone()
    }

    pub async fn update_board_config(&self, board: BoardConfig) {
        *self.board.write().await = board;
    }
}
