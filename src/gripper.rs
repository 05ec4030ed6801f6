use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tokio_serial::SerialPortBuilderExt;

use crate::config::SerialConfig;
use crate::error::RigError;

/// Challenge sent to a freshly opened port.
const HANDSHAKE_CHALLENGE: &str = "heybuddy:";
/// Token the gripper firmware answers with; seeing it marks the link
/// verified.
const HANDSHAKE_ACK: &str = "sup:";

/// Anything that behaves like the gripper's serial line. Production uses a
/// `tokio_serial::SerialStream`; tests drive an in-memory duplex pipe.
pub trait SerialLink: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialLink for T {}

enum Link {
    Disconnected,
    Open {
        port: String,
        io: BufReader<Box<dyn SerialLink>>,
        verified: bool,
    },
}

/// Structured per-check report from link initialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SerialReport {
    pub port: Option<String>,
    pub open: bool,
    pub verified: bool,
    pub message: String,
}

/// Gateway to the gripper microcontroller.
///
/// Owns the single process-wide serial connection behind a mutex; commands
/// are plain text lines and responses are drained until the read timeout.
/// Re-acquisition after a dropped link happens through `initialize`, never
/// implicitly.
pub struct GripperController {
    config: RwLock<SerialConfig>,
    link: Mutex<Link>,
}

impl GripperController {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config: RwLock::new(config),
            link: Mutex::new(Link::Disconnected),
        }
    }

    /// Open the configured port (or discover one) and run the handshake.
    ///
    /// A port that cannot be opened at all is reported distinctly, without
    /// attempting the handshake.
    pub async fn initialize(&self) -> SerialReport {
        let config = self.config.read().await.clone();

        let port = match config.port.clone() {
            Some(port) => port,
            None => match self.discover_port(&config).await {
                Ok(port) => {
                    // Discovery verified the link as part of probing.
                    return SerialReport {
                        port: Some(port),
                        open: true,
                        verified: true,
                        message: "handshake acknowledged".to_string(),
                    };
                }
                Err(err) => {
                    *self.link.lock().await = Link::Disconnected;
                    return SerialReport {
                        port: None,
                        open: false,
                        verified: false,
                        message: err.to_string(),
                    };
                }
            },
        };

        tracing::info!("Opening gripper serial port {} at {} baud", port, config.baud_rate);
        let io = match Self::open_port(&port, &config).await {
            Ok(io) => io,
            Err(err) => {
                *self.link.lock().await = Link::Disconnected;
                return SerialReport {
                    port: Some(port),
                    open: false,
                    verified: false,
                    message: format!("serial open failed: {}", err),
                };
            }
        };

        match self.verify_link(&port, Box::new(io), &config).await {
            Ok(()) => SerialReport {
                port: Some(port),
                open: true,
                verified: true,
                message: "handshake acknowledged".to_string(),
            },
            Err(err) => SerialReport {
                port: Some(port),
                open: true,
                verified: false,
                message: err.to_string(),
            },
        }
    }

    /// Open with bounded retries; the device may still be enumerating after
    /// a replug or reset.
    async fn open_port(
        port: &str,
        config: &SerialConfig,
    ) -> Result<tokio_serial::SerialStream, tokio_serial::Error> {
        let mut attempt = 0;
        loop {
            match tokio_serial::new(port, config.baud_rate).open_native_async() {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    attempt += 1;
                    if attempt >= config.open_attempts.max(1) {
                        return Err(err);
                    }
                    tracing::debug!(
                        "Open attempt {}/{} on {} failed: {}",
                        attempt,
                        config.open_attempts,
                        port,
                        err
                    );
                    tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
                }
            }
        }
    }

    /// Run the challenge/ACK handshake over an open transport and install it
    /// as the active link. The link is marked verified only if the ACK token
    /// is observed within the handshake window.
    async fn verify_link(
        &self,
        port: &str,
        io: Box<dyn SerialLink>,
        config: &SerialConfig,
    ) -> Result<(), RigError> {
        let mut reader = BufReader::new(io);

        reader
            .get_mut()
            .write_all(format!("{}\n", HANDSHAKE_CHALLENGE).as_bytes())
            .await
            .map_err(|e| RigError::ActuatorProtocol(format!("handshake write failed: {}", e)))?;
        reader
            .get_mut()
            .flush()
            .await
            .map_err(|e| RigError::ActuatorProtocol(format!("handshake write failed: {}", e)))?;

        let attempts = (config.handshake_timeout_ms / config.poll_interval_ms.max(1)).max(1);
        let per_read = Duration::from_millis(config.poll_interval_ms + config.read_timeout_ms);

        let mut verified = false;
        for _ in 0..attempts {
            let mut line = String::new();
            match tokio::time::timeout(per_read, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {
                    tracing::debug!("Handshake line: {}", line.trim());
                    if line.contains(HANDSHAKE_ACK) {
                        verified = true;
                        break;
                    }
                }
                Ok(Err(e)) => {
                    return Err(RigError::ActuatorProtocol(format!(
                        "handshake read failed: {}",
                        e
                    )))
                }
                Err(_) => {}
            }
        }

        let mut link = self.link.lock().await;
        *link = Link::Open {
            port: port.to_string(),
            io: reader,
            verified,
        };

        if verified {
            tracing::info!("Gripper handshake acknowledged");
            Ok(())
        } else {
            Err(RigError::ActuatorProtocol(format!(
                "no handshake ack ({:?}) within {}ms",
                HANDSHAKE_ACK, config.handshake_timeout_ms
            )))
        }
    }

    /// Probe candidate device paths and return the first port that opens and
    /// acknowledges the handshake.
    pub async fn discover_port(&self, config: &SerialConfig) -> Result<String, RigError> {
        for port in Self::candidate_ports() {
            tracing::debug!("Probing serial port {}", port);
            let io = match tokio_serial::new(&port, config.baud_rate).open_native_async() {
                Ok(io) => io,
                Err(_) => continue,
            };
            if self.verify_link(&port, Box::new(io), config).await.is_ok() {
                tracing::info!("Gripper controller found on {}", port);
                return Ok(port);
            }
        }
        Err(RigError::NoPortFound)
    }

    #[cfg(windows)]
    fn candidate_ports() -> Vec<String> {
        (1..=16).map(|n| format!("COM{}", n)).collect()
    }

    #[cfg(not(windows))]
    fn candidate_ports() -> Vec<String> {
        const PREFIXES: &[&str] = &["ttyACM", "ttyUSB", "cu.usbmodem", "cu.usbserial"];

        let mut ports = Vec::new();
        if let Ok(entries) = std::fs::read_dir("/dev") {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
                    ports.push(format!("/dev/{}", name));
                }
            }
        }
        ports.sort();
        ports
    }

    /// Write a raw command line and drain every response line the controller
    /// emits before the read timeout. Requires a verified link.
    pub async fn write_read(&self, command: &str) -> Result<Vec<String>, RigError> {
        let config = self.config.read().await.clone();
        let mut link = self.link.lock().await;

        let reader = match &mut *link {
            Link::Open {
                io, verified: true, ..
            } => io,
            _ => return Err(RigError::NotInitialized("gripper controller")),
        };

        tracing::debug!("Gripper command: {}", command);
        reader
            .get_mut()
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| RigError::ActuatorProtocol(format!("serial write failed: {}", e)))?;
        reader
            .get_mut()
            .flush()
            .await
            .map_err(|e| RigError::ActuatorProtocol(format!("serial write failed: {}", e)))?;

        // Give the firmware a moment before draining its reply.
        tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;

        let timeout = Duration::from_millis(config.read_timeout_ms);
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        tracing::debug!("Gripper response: {}", trimmed);
                        lines.push(trimmed.to_string());
                    }
                }
                Ok(Err(e)) => {
                    return Err(RigError::ActuatorProtocol(format!(
                        "serial read failed: {}",
                        e
                    )))
                }
                Err(_) => break,
            }
        }

        Ok(lines)
    }

    pub async fn hand_open(&self) -> Result<Vec<String>, RigError> {
        self.write_read("hand:open").await
    }

    pub async fn hand_close(&self) -> Result<Vec<String>, RigError> {
        self.write_read("hand:close").await
    }

    pub async fn z_up(&self) -> Result<Vec<String>, RigError> {
        self.write_read("z:up").await
    }

    pub async fn z_down(&self) -> Result<Vec<String>, RigError> {
        self.write_read("z:down").await
    }

    /// Current link state without touching the device. An open link reports
    /// the port it actually sits on, which may have come from discovery
    /// rather than configuration.
    pub async fn status(&self) -> SerialReport {
        let config = self.config.read().await;
        let link = self.link.lock().await;
        match &*link {
            Link::Disconnected => SerialReport {
                port: config.port.clone(),
                open: false,
                verified: false,
                message: "serial link not open".to_string(),
            },
            Link::Open { port, verified, .. } => SerialReport {
                port: Some(port.clone()),
                open: true,
                verified: *verified,
                message: if *verified {
                    "handshake acknowledged".to_string()
                } else {
                    "open, handshake not verified".to_string()
                },
            },
        }
    }

    /// Drop the link; the next `initialize` re-acquires it.
    pub async fn close(&self) {
        *self.link.lock().await = Link::Disconnected;
        tracing::debug!("Gripper serial link closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn test_config() -> SerialConfig {
        SerialConfig {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 50,
            settle_ms: 0,
            open_attempts: 1,
            poll_interval_ms: 20,
            handshake_timeout_ms: 500,
        }
    }

    /// Fake firmware: acknowledges the handshake, then answers each command
    /// line with the given responses.
    fn spawn_device(io: DuplexStream, responses: &'static [&'static str]) {
        tokio::spawn(async move {
            let mut device = BufReader::new(io);
            let mut line = String::new();
            device.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), HANDSHAKE_CHALLENGE);
            device.get_mut().write_all(b"sup:\n").await.unwrap();

            loop {
                line.clear();
                if device.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                for response in responses {
                    device
                        .get_mut()
                        .write_all(format!("{}\n", response).as_bytes())
                        .await
                        .unwrap();
                }
            }
        });
    }

    #[tokio::test]
    async fn write_read_requires_a_verified_link() {
        let controller = GripperController::new(test_config());
        assert!(matches!(
            controller.write_read("hand:open").await,
            Err(RigError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn handshake_verifies_and_hand_open_sends_the_literal_command() {
        let (ours, theirs) = tokio::io::duplex(256);
        spawn_device(theirs, &["ok", "hand open"]);

        let controller = GripperController::new(test_config());
        controller
            .verify_link("/dev/ttyACM7", Box::new(ours), &test_config())
            .await
            .unwrap();

        // The report names the port the link actually sits on, even though
        // the configuration never named one.
        let report = controller.status().await;
        assert!(report.open);
        assert!(report.verified);
        assert_eq!(report.port.as_deref(), Some("/dev/ttyACM7"));

        // Response lines come back verbatim and in order.
        let lines = controller.hand_open().await.unwrap();
        assert_eq!(lines, vec!["ok".to_string(), "hand open".to_string()]);
    }

    #[tokio::test]
    async fn z_commands_use_their_fixed_literals() {
        let (ours, theirs) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut device = BufReader::new(theirs);
            let mut line = String::new();
            device.read_line(&mut line).await.unwrap();
            device.get_mut().write_all(b"sup:\n").await.unwrap();

            line.clear();
            device.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "z:down");
            device.get_mut().write_all(b"down\n").await.unwrap();

            line.clear();
            device.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "z:up");
            device.get_mut().write_all(b"up\n").await.unwrap();
        });

        let controller = GripperController::new(test_config());
        controller
            .verify_link("/dev/ttyACM7", Box::new(ours), &test_config())
            .await
            .unwrap();

        assert_eq!(controller.z_down().await.unwrap(), vec!["down".to_string()]);
        assert_eq!(controller.z_up().await.unwrap(), vec!["up".to_string()]);
    }

    #[tokio::test]
    async fn wrong_handshake_reply_leaves_the_link_unverified() {
        let (ours, theirs) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut device = BufReader::new(theirs);
            let mut line = String::new();
            device.read_line(&mut line).await.unwrap();
            device.get_mut().write_all(b"huh?\n").await.unwrap();
        });

        let controller = GripperController::new(test_config());
        let result = controller
            .verify_link("/dev/ttyACM7", Box::new(ours), &test_config())
            .await;
        assert!(matches!(result, Err(RigError::ActuatorProtocol(_))));

        let report = controller.status().await;
        assert!(report.open);
        assert!(!report.verified);

        assert!(matches!(
            controller.write_read("hand:open").await,
            Err(RigError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn silent_device_returns_no_lines() {
        let (ours, theirs) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut device = BufReader::new(theirs);
            let mut line = String::new();
            device.read_line(&mut line).await.unwrap();
            device.get_mut().write_all(b"sup:\n").await.unwrap();
            // Swallow everything after the handshake and never reply.
            loop {
                line.clear();
                if device.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
            }
        });

        let controller = GripperController::new(test_config());
        controller
            .verify_link("/dev/ttyACM7", Box::new(ours), &test_config())
            .await
            .unwrap();

        let lines = controller.write_read("hand:close").await.unwrap();
        assert!(lines.is_empty());
    }
}
