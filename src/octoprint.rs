use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::OctoprintConfig;
use crate::error::RigError;

/// A gantry axis as the printhead API names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Printhead command payloads for `POST api/printer/printhead`.
///
/// The wire command for motion is `jog` (some historical tooling sent `job`,
/// which the firmware rejects); the tagged enum keeps the command name and
/// its fields from drifting apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum PrintheadCommand {
    Home {
        axes: Vec<Axis>,
    },
    Jog {
        absolute: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        x: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        y: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        z: Option<f64>,
        speed: f64,
    },
}

/// Usable build volume from a printer profile.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildVolume {
    pub width: f64,
    pub depth: f64,
}

/// Printer profile, fetched once per process and cached by the axis
/// controller.
#[derive(Debug, Clone, Deserialize)]
pub struct PrinterProfile {
    pub volume: BuildVolume,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    pub server: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionCurrent {
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionStatus {
    pub current: ConnectionCurrent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub state: String,
}

/// The positioning actuator as the axis controller sees it.
///
/// `OctoprintClient` is the production implementation; tests substitute a
/// mock so the state machine can be exercised without a device.
#[async_trait]
pub trait Positioner: Send + Sync {
    async fn printhead(&self, command: &PrintheadCommand) -> Result<(), RigError>;
    async fn send_commands(&self, commands: &[String]) -> Result<(), RigError>;
    async fn printer_profile(&self, id: &str) -> Result<PrinterProfile, RigError>;
    async fn version(&self) -> Result<VersionInfo, RigError>;
    async fn connection(&self) -> Result<ConnectionStatus, RigError>;
    async fn job(&self) -> Result<JobStatus, RigError>;
}

/// HTTP client for the OctoPrint REST API.
///
/// One long-lived session with the API key baked into the default headers,
/// shared process-wide.
pub struct OctoprintClient {
    base_url: String,
    client: reqwest::Client,
}

impl OctoprintClient {
    pub fn new(config: &OctoprintConfig) -> Result<Self, RigError> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&config.api_key).map_err(|_| {
            RigError::InvalidConfiguration("octoprint.api_key contains invalid characters".into())
        })?;
        headers.insert("X-Api-Key", api_key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| RigError::InvalidConfiguration(format!("http client: {}", e)))?;

        Ok(Self {
            base_url: format!("http://{}", config.address.trim_end_matches('/')),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Connection-level failures are reported distinctly from HTTP error
    /// statuses so health checks can tell "unreachable" from "unhappy".
    fn map_transport(err: reqwest::Error) -> RigError {
        if err.is_connect() || err.is_timeout() {
            RigError::ActuatorUnreachable(err.to_string())
        } else {
            RigError::ActuatorProtocol(err.to_string())
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RigError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = status.canonical_reason().unwrap_or("unknown status");
        let body = response.text().await.unwrap_or_default();
        let detail = body.trim();
        Err(RigError::ActuatorProtocol(if detail.is_empty() {
            format!("{} {}", status.as_u16(), reason)
        } else {
            format!("{} {}: {}", status.as_u16(), reason, detail)
        }))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RigError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(Self::map_transport)?;
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RigError::ActuatorProtocol(format!("malformed response: {}", e)))
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), RigError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(Self::map_transport)?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Positioner for OctoprintClient {
    async fn printhead(&self, command: &PrintheadCommand) -> Result<(), RigError> {
        self.post_json("api/printer/printhead", command).await
    }

    async fn send_commands(&self, commands: &[String]) -> Result<(), RigError> {
        self.post_json(
            "api/printer/command",
            &serde_json::json!({ "commands": commands }),
        )
        .await
    }

    async fn printer_profile(&self, id: &str) -> Result<PrinterProfile, RigError> {
        self.get_json(&format!("api/printerprofiles/{}", id)).await
    }

    async fn version(&self) -> Result<VersionInfo, RigError> {
        self.get_json("api/version").await
    }

    async fn connection(&self) -> Result<ConnectionStatus, RigError> {
        self.get_json("api/connection").await
    }

    async fn job(&self) -> Result<JobStatus, RigError> {
        self.get_json("api/job").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn home_serializes_to_the_printhead_wire_shape() {
        let command = PrintheadCommand::Home {
            axes: vec![Axis::X, Axis::Y],
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({ "command": "home", "axes": ["x", "y"] })
        );
    }

    #[test]
    fn jog_serializes_with_the_correct_command_name() {
        let command = PrintheadCommand::Jog {
            absolute: true,
            x: Some(120.0),
            y: None,
            z: Some(30.0),
            speed: 3000.0,
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({
                "command": "jog",
                "absolute": true,
                "x": 120.0,
                "z": 30.0,
                "speed": 3000.0
            })
        );
    }

    #[test]
    fn parses_printer_profile_volume() {
        let profile: PrinterProfile = serde_json::from_value(json!({
            "id": "_default",
            "volume": { "width": 235.0, "depth": 235.0, "height": 250.0 }
        }))
        .unwrap();
        assert_eq!(profile.volume.width, 235.0);
        assert_eq!(profile.volume.depth, 235.0);
    }
}
