mod axis;
mod board;
mod config;
mod error;
mod gripper;
mod messages;
mod octoprint;
mod sequencer;
mod server;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Mutex;

use axis::AxisController;
use config::ConfigManager;
use gripper::GripperController;
use octoprint::OctoprintClient;
use sequencer::{MoveSequencer, SettleDelays};
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gambit=info".into()),
        )
        .init();

    tracing::info!("Starting gambit chess rig controller v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_manager = ConfigManager::new().await?;
    let config = config_manager.get().clone();

    tracing::info!("Board configuration:");
    tracing::info!(
        "  Origin offset: ({}, {}) mm",
        config.board.board_x_offset,
        config.board.board_y_offset
    );
    tracing::info!(
        "  Space size: {}x{} mm",
        config.board.space_width,
        config.board.space_depth
    );
    tracing::info!("  Travel height: {} mm", config.board.z_axis_height);
    tracing::info!("  Jog speed: {} mm/min", config.board.printhead_speed);
    tracing::info!("Positioning actuator: {}", config.octoprint.address);

    // Parse command-line arguments (can override config values)
    let args: Vec<String> = std::env::args().collect();
    let host = args
        .iter()
        .position(|arg| arg == "--host")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.to_string())
        .unwrap_or(config.server.host.clone());

    let port = args
        .iter()
        .position(|arg| arg == "--port")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(config.server.port);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let octoprint = OctoprintClient::new(&config.octoprint)?;
    let axis = Arc::new(AxisController::new(
        Arc::new(octoprint),
        config.board.clone(),
        config.octoprint.profile_id.clone(),
    ));
    let gripper = Arc::new(GripperController::new(config.serial.clone()));

    // Acquire the gripper link in the background so a missing device does
    // not hold up the HTTP surface; the link can be re-acquired any time
    // through the initialize_controller endpoint.
    {
        let gripper = gripper.clone();
        tokio::spawn(async move {
            let report = gripper.initialize().await;
            if report.verified {
                tracing::info!("Gripper link up on {:?}", report.port);
            } else {
                tracing::warn!("Gripper link not established: {}", report.message);
            }
        });
    }

    let sequencer = Arc::new(MoveSequencer::new(
        axis.clone(),
        gripper.clone(),
        SettleDelays::from_config(&config.settle),
    ));

    let state = Arc::new(AppState {
        axis,
        gripper: gripper.clone(),
        sequencer,
        config: Mutex::new(config_manager),
    });

    // Spawn server task
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::serve(addr, state).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(err) => {
            tracing::error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    // Cleanup
    tracing::info!("Shutting down...");
    server_handle.abort();
    gripper.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
