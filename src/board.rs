use std::fmt;
use std::str::FromStr;

use crate::config::BoardConfig;
use crate::error::RigError;
use crate::octoprint::PrinterProfile;

/// Number of files/ranks on the board.
const BOARD_SIZE: u8 = 8;

/// A board position named by file (A-H) and rank (1-8).
///
/// Construction goes through parsing, so a `Square` is always in range.
/// Notation is strict: exactly two characters, uppercase file, no
/// normalization (lowercase input is rejected rather than silently fixed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// Zero-based column index (A=0 .. H=7)
    pub fn file_index(&self) -> u8 {
        self.file
    }

    /// Zero-based row index (rank 1 = 0 .. rank 8 = 7)
    pub fn rank_index(&self) -> u8 {
        self.rank
    }
}

impl FromStr for Square {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RigError::InvalidSquare(s.to_string());

        let mut chars = s.chars();
        let (file, rank) = match (chars.next(), chars.next(), chars.next()) {
            (Some(file), Some(rank), None) => (file, rank),
            _ => return Err(invalid()),
        };

        if !('A'..='H').contains(&file) {
            return Err(invalid());
        }
        let rank = rank.to_digit(10).ok_or_else(invalid)?;
        if !(1..=8).contains(&rank) {
            return Err(invalid());
        }

        Ok(Square {
            file: file as u8 - b'A',
            rank: rank as u8 - 1,
        })
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'A' + self.file) as char, self.rank + 1)
    }
}

/// Maps squares to absolute machine coordinates.
///
/// The playable area starts at `offset + padding`; a space's near edge sits
/// at `edge + space_size * index` and the target coordinate is the space's
/// center, shifted by the printhead offset so the gripper (not the firmware's
/// position reference) ends up over the piece. Pure function of the
/// configuration and the square.
#[derive(Debug, Clone)]
pub struct BoardGeometry {
    config: BoardConfig,
}

impl BoardGeometry {
    pub fn new(config: BoardConfig) -> Self {
        Self { config }
    }

    /// Check the configuration against the printer's usable build volume.
    ///
    /// The eight-space playable span must fit inside the volume on both
    /// axes, and every geometry value must be positive.
    pub fn validate_against(&self, profile: &PrinterProfile) -> Result<(), RigError> {
        self.validate_positive()?;
        let c = &self.config;

        let span_x = c.board_x_offset + c.board_x_padding + c.space_width * f64::from(BOARD_SIZE);
        if span_x > profile.volume.width {
            return Err(RigError::InvalidConfiguration(format!(
                "board spans {:.1}mm in X but the usable volume is only {:.1}mm wide",
                span_x, profile.volume.width
            )));
        }

        let span_y = c.board_y_offset + c.board_y_padding + c.space_depth * f64::from(BOARD_SIZE);
        if span_y > profile.volume.depth {
            return Err(RigError::InvalidConfiguration(format!(
                "board spans {:.1}mm in Y but the usable volume is only {:.1}mm deep",
                span_y, profile.volume.depth
            )));
        }

        Ok(())
    }

    /// Every geometry value must be a positive real.
    pub fn validate_positive(&self) -> Result<(), RigError> {
        let c = &self.config;

        let values = [
            ("board_x_offset", c.board_x_offset),
            ("board_y_offset", c.board_y_offset),
            ("board_x_padding", c.board_x_padding),
            ("board_y_padding", c.board_y_padding),
            ("space_width", c.space_width),
            ("space_depth", c.space_depth),
            ("printhead_x_offset", c.printhead_x_offset),
            ("printhead_y_offset", c.printhead_y_offset),
            ("z_axis_height", c.z_axis_height),
            ("printhead_speed", c.printhead_speed),
            ("discard_x", c.discard_x),
            ("discard_y", c.discard_y),
        ];
        for (name, value) in values {
            if value <= 0.0 || !value.is_finite() {
                return Err(RigError::InvalidConfiguration(format!(
                    "{} must be a positive number, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }

    /// X coordinate of the center of the square's file, gripper-corrected.
    pub fn x_for_file(&self, square: Square) -> f64 {
        Self::space_center(
            self.config.board_x_offset,
            self.config.board_x_padding,
            self.config.space_width,
            square.file_index(),
        ) - self.config.printhead_x_offset
    }

    /// Y coordinate of the center of the square's rank, gripper-corrected.
    pub fn y_for_rank(&self, square: Square) -> f64 {
        Self::space_center(
            self.config.board_y_offset,
            self.config.board_y_padding,
            self.config.space_depth,
            square.rank_index(),
        ) - self.config.printhead_y_offset
    }

    /// Resolve a square to (x, y) machine coordinates.
    pub fn resolve(&self, square: Square) -> (f64, f64) {
        (self.x_for_file(square), self.y_for_rank(square))
    }

    fn space_center(offset: f64, padding: f64, space_size: f64, index: u8) -> f64 {
        let edge = offset + padding + space_size * f64::from(index);
        edge + space_size / 2.0
    }
}
