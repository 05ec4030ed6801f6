use serde::{Deserialize, Serialize};

use crate::axis::AxisStatus;
use crate::config::{BoardConfig, SettleConfig};
use crate::gripper::SerialReport;
use crate::sequencer::MoveRequest;

fn default_true() -> bool {
    true
}

/// Daemon status snapshot
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub axis: AxisStatus,
    pub serial: SerialReport,
}

/// Generic acknowledgement for commands with no payload to return
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Home the requested axis subset; axes default to all three
#[derive(Debug, Deserialize)]
pub struct HomeRequest {
    #[serde(default = "default_true")]
    pub x: bool,
    #[serde(default = "default_true")]
    pub y: bool,
    #[serde(default = "default_true")]
    pub z: bool,
    /// Lift the hand clear of the pieces after homing
    #[serde(default)]
    pub apply_hand_offset: bool,
}

/// Manual jog; omitted axes are untouched
#[derive(Debug, Deserialize)]
pub struct JogRequest {
    #[serde(default)]
    pub absolute: bool,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct MoveToSquareRequest {
    pub square: String,
}

#[derive(Debug, Deserialize)]
pub struct MovePieceRequest {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct PerformMovesRequest {
    pub moves: Vec<MoveRequest>,
    /// Dry run: gantry motion only, no gripper or lift steps
    #[serde(default)]
    pub skip_gripper: bool,
}

/// Raw gripper serial pass-through
#[derive(Debug, Deserialize)]
pub struct RawWriteRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct RawWriteResponse {
    /// Response lines, verbatim and in order
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub board: BoardConfig,
    pub settle: SettleConfig,
}

/// Partial configuration update; absent fields keep their current value.
/// Unknown fields are rejected so a typo cannot silently do nothing.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdateRequest {
    pub board_x_offset: Option<f64>,
    pub board_y_offset: Option<f64>,
    pub board_x_padding: Option<f64>,
    pub board_y_padding: Option<f64>,
    pub space_width: Option<f64>,
    pub space_depth: Option<f64>,
    pub printhead_x_offset: Option<f64>,
    pub printhead_y_offset: Option<f64>,
    pub z_axis_height: Option<f64>,
    pub printhead_speed: Option<f64>,
    pub discard_x: Option<f64>,
    pub discard_y: Option<f64>,
    pub travel_secs: Option<u64>,
    pub lift_secs: Option<u64>,
    pub grip_secs: Option<u64>,
}

impl ConfigUpdateRequest {
    pub fn apply_to(&self, board: &mut BoardConfig, settle: &mut SettleConfig) {
        macro_rules! apply {
            ($target:expr, $($field:ident),+ $(,)?) => {
                $(if let Some(value) = self.$field {
                    $target.$field = value;
                })+
            };
        }
        apply!(
            board,
            board_x_offset,
            board_y_offset,
            board_x_padding,
            board_y_padding,
            space_width,
            space_depth,
            printhead_x_offset,
            printhead_y_offset,
            z_axis_height,
            printhead_speed,
            discard_x,
            discard_y,
        );
        apply!(settle, travel_secs, lift_secs, grip_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_request_defaults_to_all_axes() {
        let request: HomeRequest = serde_json::from_str("{}").unwrap();
        assert!(request.x && request.y && request.z);
        assert!(!request.apply_hand_offset);
    }

    #[test]
    fn config_update_applies_only_present_fields() {
        let request: ConfigUpdateRequest =
            serde_json::from_str(r#"{ "space_width": 40.0, "grip_secs": 2 }"#).unwrap();

        let mut board = BoardConfig::default();
        let mut settle = SettleConfig::default();
        request.apply_to(&mut board, &mut settle);

        assert_eq!(board.space_width, 40.0);
        assert_eq!(board.space_depth, BoardConfig::default().space_depth);
        assert_eq!(settle.grip_secs, 2);
        assert_eq!(settle.travel_secs, SettleConfig::default().travel_secs);
    }

    #[test]
    fn config_update_rejects_unknown_fields() {
        let result: Result<ConfigUpdateRequest, _> =
            serde_json::from_str(r#"{ "space_widht": 40.0 }"#);
        assert!(result.is_err());
    }
}
