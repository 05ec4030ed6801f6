use thiserror::Error;

/// Error taxonomy for the rig.
///
/// Caller errors (`InvalidSquare`, `InvalidConfiguration`) and precondition
/// violations (`NotInitialized`, `NotHomed`) are never retried; device
/// failures carry the raw reason text from the actuator and are surfaced
/// immediately. Nothing in the core retries automatically.
#[derive(Debug, Error)]
pub enum RigError {
    /// Board notation outside A1..H8.
    #[error("invalid square {0:?}: expected a file A-H and a rank 1-8")]
    InvalidSquare(String),

    /// The named subsystem has not completed its initialization handshake.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Absolute motion requested before all axes were homed.
    #[error("axes not homed: {0}")]
    NotHomed(String),

    /// The actuator answered, but with a non-success response.
    #[error("actuator protocol error: {0}")]
    ActuatorProtocol(String),

    /// Transport-level failure: the actuator could not be reached at all.
    #[error("positioning actuator unreachable: {0}")]
    ActuatorUnreachable(String),

    /// Serial port discovery exhausted every candidate without an ACK.
    #[error("no serial port responded to the gripper handshake")]
    NoPortFound,

    /// Missing or malformed configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
