use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8017,
        }
    }
}

/// OctoPrint connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OctoprintConfig {
    /// Host (and optional port) of the OctoPrint instance driving the gantry
    pub address: String,
    /// Static API key sent as the X-Api-Key header
    pub api_key: String,
    /// Printer profile to fetch for build-volume validation
    pub profile_id: String,
}

impl Default for OctoprintConfig {
    fn default() -> Self {
        Self {
            address: "octopi.local".to_string(),
            api_key: String::new(),
            profile_id: "_default".to_string(),
        }
    }
}

/// Serial link configuration for the gripper microcontroller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path; when unset, candidate ports are probed
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Per-line read timeout while draining responses
    pub read_timeout_ms: u64,
    /// Pause between writing a command and draining the reply
    pub settle_ms: u64,
    /// Bounded number of attempts to open the port
    pub open_attempts: u32,
    /// Interval between open attempts and handshake polls
    pub poll_interval_ms: u64,
    /// Total window to observe the handshake ACK
    pub handshake_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 1000,
            settle_ms: 50,
            open_attempts: 5,
            poll_interval_ms: 200,
            handshake_timeout_ms: 3000,
        }
    }
}

/// Board geometry and motion configuration.
///
/// Offsets and sizes are in machine millimeters. The printhead offsets
/// describe the fixed displacement between the gripper's contact point and
/// the position reference the printer firmware reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoardConfig {
    /// Distance from the machine origin to the board edge
    pub board_x_offset: f64,
    pub board_y_offset: f64,
    /// Dead border between the board edge and the playable area
    pub board_x_padding: f64,
    pub board_y_padding: f64,
    /// Size of one space
    pub space_width: f64,
    pub space_depth: f64,
    /// Gripper displacement from the printhead reference point
    pub printhead_x_offset: f64,
    pub printhead_y_offset: f64,
    /// Travel height for the Z axis (and the hand's vertical offset)
    pub z_axis_height: f64,
    /// Jog speed in mm/min
    pub printhead_speed: f64,
    /// Fixed off-board drop point for captured pieces
    pub discard_x: f64,
    pub discard_y: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            board_x_offset: 50.0,
            board_y_offset: 50.0,
            board_x_padding: 5.0,
            board_y_padding: 5.0,
            space_width: 30.0,
            space_depth: 30.0,
            printhead_x_offset: 20.0,
            printhead_y_offset: 10.0,
            z_axis_height: 30.0,
            printhead_speed: 3000.0,
            discard_x: 10.0,
            discard_y: 300.0,
        }
    }
}

/// Settle delays inserted after motion and gripper steps.
///
/// The rig has no way to detect true motion completion, so conservative
/// fixed waits substitute for a completion signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// After horizontal gantry moves
    pub travel_secs: u64,
    /// After vertical (hand lift/lower) moves
    pub lift_secs: u64,
    /// After grip/release
    pub grip_secs: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            travel_secs: 5,
            lift_secs: 5,
            grip_secs: 3,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub board: BoardConfig,
    pub octoprint: OctoprintConfig,
    pub serial: SerialConfig,
    pub settle: SettleConfig,
    pub server: ServerConfig,
}

/// Configuration manager for persistent storage
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new configuration manager and load config from disk
    pub async fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        // Ensure config directory exists
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let config = Self::load_config(&config_path).await?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the XDG-compliant config path: ~/.config/gambit/config.yaml
    fn get_config_path() -> Result<PathBuf> {
        let proj_dirs =
            ProjectDirs::from("", "", "gambit").context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    async fn load_config(path: &PathBuf) -> Result<Config> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .await
                .context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&contents).context("Failed to parse config file")?;

            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("Config file not found, creating default at {:?}", path);
            let config = Config::default();

            let yaml =
                serde_yaml::to_string(&config).context("Failed to serialize default config")?;
            fs::write(path, yaml)
                .await
                .context("Failed to write default config")?;

            Ok(config)
        }
    }

    /// Save config to disk
    async fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.config).context("Failed to serialize config")?;

        fs::write(&self.config_path, yaml)
            .await
            .context("Failed to write config file")?;

        tracing::debug!("Saved configuration to {:?}", self.config_path);
        Ok(())
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    pub fn get_board_config(&self) -> BoardConfig {
        self.config.board.clone()
    }

    /// Set and persist board configuration
    pub async fn set_board_config(&mut self, board: BoardConfig) -> Result<()> {
        self.config.board = board;
        self.save().await?;
        Ok(())
    }

    pub fn get_settle_config(&self) -> SettleConfig {
        self.config.settle.clone()
    }

    /// Set and persist settle delays
    pub async fn set_settle_config(&mut self, settle: SettleConfig) -> Result<()> {
        self.config.settle = settle;
        self.save().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_positive() {
        let board = BoardConfig::default();
        assert!(board.space_width > 0.0);
        assert!(board.space_depth > 0.0);
        assert!(board.printhead_speed > 0.0);
        assert!(board.z_axis_height > 0.0);
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.board, config.board);
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.settle.grip_secs, config.settle.grip_secs);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let parsed: Config = serde_yaml::from_str("board:\n  space_width: 40.0\n").unwrap();
        assert_eq!(parsed.board.space_width, 40.0);
        assert_eq!(parsed.board.space_depth, BoardConfig::default().space_depth);
        assert_eq!(parsed.serial.baud_rate, 9600);
    }
}
